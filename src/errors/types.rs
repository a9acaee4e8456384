// 统一错误类型定义

use std::fmt;

use plugin_host_common::CommonError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 生命周期操作名称
/// 每个错误都携带发生错误的操作，便于调用方定位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOperation {
    Install,
    Start,
    Stop,
    Upgrade,
    Uninstall,
    Restart,
    UpdateConfig,
    Get,
    HealthCheck,
}

impl LifecycleOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Upgrade => "upgrade",
            Self::Uninstall => "uninstall",
            Self::Restart => "restart",
            Self::UpdateConfig => "update_config",
            Self::Get => "get",
            Self::HealthCheck => "health_check",
        }
    }
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 插件宿主统一错误类型
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "error_type", content = "details")]
pub enum PluginHostError {
    /// 插件不存在
    #[error("插件不存在: {plugin_id} (操作: {operation})")]
    NotFound {
        plugin_id: String,
        operation: LifecycleOperation,
    },

    /// 插件已存在
    #[error("插件已存在: {plugin_id} (操作: {operation})")]
    AlreadyExists {
        plugin_id: String,
        operation: LifecycleOperation,
    },

    /// 插件已在运行
    #[error("插件已在运行: {plugin_id} (操作: {operation})")]
    AlreadyRunning {
        plugin_id: String,
        operation: LifecycleOperation,
    },

    /// 插件未运行
    #[error("插件未运行: {plugin_id} (操作: {operation})")]
    NotRunning {
        plugin_id: String,
        operation: LifecycleOperation,
    },

    /// 沙箱错误
    #[error("沙箱错误: {plugin_id} (操作: {operation}) - {message}")]
    Sandbox {
        plugin_id: String,
        operation: LifecycleOperation,
        message: String,
    },

    /// 运行时错误
    #[error("运行时错误: {plugin_id} (操作: {operation}) - {message}")]
    Runtime {
        plugin_id: String,
        operation: LifecycleOperation,
        message: String,
    },

    /// 复合操作中的步骤失败
    #[error("{operation} 失败于 {step} 步骤: {source}")]
    StepFailed {
        plugin_id: String,
        operation: LifecycleOperation,
        step: LifecycleOperation,
        #[source]
        source: Box<PluginHostError>,
    },

    /// 配置错误
    #[error("配置错误: {message}")]
    Configuration { message: String },

    /// 超时错误
    #[error("操作超时: {operation}")]
    Timeout { operation: String },
}

impl PluginHostError {
    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Self::NotRunning { .. } => "NOT_RUNNING",
            Self::Sandbox { .. } => "SANDBOX_ERROR",
            Self::Runtime { .. } => "RUNTIME_ERROR",
            Self::StepFailed { source, .. } => source.error_code(),
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
        }
    }

    /// 获取 HTTP 状态码，供外层传输服务映射
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } => 409,
            Self::AlreadyRunning { .. } => 409,
            Self::NotRunning { .. } => 409,
            Self::Sandbox { .. } => 500,
            Self::Runtime { .. } => 502,
            Self::StepFailed { source, .. } => source.status_code(),
            Self::Configuration { .. } => 500,
            Self::Timeout { .. } => 408,
        }
    }

    /// 是否为客户端错误
    pub fn is_client_error(&self) -> bool {
        matches!(self.status_code(), 400..=499)
    }

    /// 是否为服务器错误
    pub fn is_server_error(&self) -> bool {
        matches!(self.status_code(), 500..=599)
    }

    /// 是否应该记录错误日志
    pub fn should_log(&self) -> bool {
        !self.is_client_error()
    }

    /// 错误关联的插件 ID
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::NotFound { plugin_id, .. }
            | Self::AlreadyExists { plugin_id, .. }
            | Self::AlreadyRunning { plugin_id, .. }
            | Self::NotRunning { plugin_id, .. }
            | Self::Sandbox { plugin_id, .. }
            | Self::Runtime { plugin_id, .. }
            | Self::StepFailed { plugin_id, .. } => Some(plugin_id),
            Self::Configuration { .. } | Self::Timeout { .. } => None,
        }
    }

    /// 错误发生时的操作
    pub fn operation(&self) -> Option<LifecycleOperation> {
        match self {
            Self::NotFound { operation, .. }
            | Self::AlreadyExists { operation, .. }
            | Self::AlreadyRunning { operation, .. }
            | Self::NotRunning { operation, .. }
            | Self::Sandbox { operation, .. }
            | Self::Runtime { operation, .. }
            | Self::StepFailed { operation, .. } => Some(*operation),
            Self::Configuration { .. } | Self::Timeout { .. } => None,
        }
    }

    /// 沿 StepFailed 链找到最内层错误
    pub fn root_cause(&self) -> &PluginHostError {
        match self {
            Self::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn not_found(plugin_id: impl Into<String>, operation: LifecycleOperation) -> Self {
        Self::NotFound {
            plugin_id: plugin_id.into(),
            operation,
        }
    }

    pub fn already_exists(plugin_id: impl Into<String>, operation: LifecycleOperation) -> Self {
        Self::AlreadyExists {
            plugin_id: plugin_id.into(),
            operation,
        }
    }

    pub fn already_running(plugin_id: impl Into<String>, operation: LifecycleOperation) -> Self {
        Self::AlreadyRunning {
            plugin_id: plugin_id.into(),
            operation,
        }
    }

    pub fn not_running(plugin_id: impl Into<String>, operation: LifecycleOperation) -> Self {
        Self::NotRunning {
            plugin_id: plugin_id.into(),
            operation,
        }
    }

    /// 包装沙箱管理器返回的错误
    pub fn sandbox(
        plugin_id: impl Into<String>,
        operation: LifecycleOperation,
        err: &anyhow::Error,
    ) -> Self {
        Self::Sandbox {
            plugin_id: plugin_id.into(),
            operation,
            message: format!("{:#}", err),
        }
    }

    /// 包装运行时返回的错误
    pub fn runtime(
        plugin_id: impl Into<String>,
        operation: LifecycleOperation,
        err: &anyhow::Error,
    ) -> Self {
        Self::Runtime {
            plugin_id: plugin_id.into(),
            operation,
            message: format!("{:#}", err),
        }
    }

    /// 将内部步骤的错误包装为外层操作的失败
    pub fn step_failed(
        plugin_id: impl Into<String>,
        operation: LifecycleOperation,
        step: LifecycleOperation,
        source: PluginHostError,
    ) -> Self {
        Self::StepFailed {
            plugin_id: plugin_id.into(),
            operation,
            step,
            source: Box::new(source),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}

/// 从 CommonError 转换
impl From<CommonError> for PluginHostError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Configuration { message } => Self::configuration(message),
            other => Self::configuration(other.to_string()),
        }
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for PluginHostError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(format!("配置加载错误: {}", err))
    }
}
