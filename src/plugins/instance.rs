// 插件实例数据模型
// 定义注册表中保存的插件实例、状态和健康检查配置

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plugins::runtime::{ResourceLimits, SandboxHandle};

/// 插件状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// 已安装
    Installed,
    /// 启动中
    Starting,
    /// 运行中
    Running,
    /// 停止中
    Stopping,
    /// 已停止
    Stopped,
    /// 错误状态，可通过重试启动/升级/卸载恢复
    Error,
    /// 升级中
    Upgrading,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Upgrading => "upgrading",
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 安装请求中的插件描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// 插件 ID
    pub id: String,
    /// 插件名称
    pub name: String,
    /// 插件版本
    pub version: String,
    /// 插件包来源（路径或 URL），由运行时解释
    #[serde(default)]
    pub source: Option<String>,
    /// 初始配置
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    /// 描述性元数据
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// 单独指定的资源限制，未指定时使用全局默认值
    #[serde(default)]
    pub resource_limits: Option<ResourceLimits>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            source: None,
            config: HashMap::new(),
            metadata: HashMap::new(),
            resource_limits: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_config(mut self, config: HashMap<String, serde_json::Value>) -> Self {
        self.config = config;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }
}

/// 健康检查配置块
/// 仅作为实例记录的一部分保存，探测由 HealthMonitor 负责
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheck {
    pub enabled: bool,
    pub path: String,
    pub method: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub max_failures: u32,
    pub failure_count: u32,
    pub last_check: Option<DateTime<Utc>>,
}

impl HealthCheck {
    /// 距上次检查是否已超过检查间隔
    ///
    /// 超出 chrono 表示范围的间隔视为永不到期。
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_check else {
            return true;
        };
        i64::try_from(self.interval_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .is_some_and(|interval| now.signed_duration_since(last) >= interval)
    }

    /// 连续失败次数是否达到阈值
    pub fn threshold_reached(&self) -> bool {
        self.failure_count >= self.max_failures
    }
}

/// 插件实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInstance {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: PluginState,
    /// 活动沙箱，仅在沙箱创建成功到销毁之间存在
    #[serde(skip)]
    pub sandbox: Option<SandboxHandle>,
    pub config: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, String>,
    pub resource_limits: Option<ResourceLimits>,
    pub installed_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub health_check: HealthCheck,
}

impl PluginInstance {
    /// 根据安装描述创建处于 Installed 状态的实例
    pub fn from_descriptor(descriptor: &PluginDescriptor, health_check: HealthCheck) -> Self {
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            state: PluginState::Installed,
            sandbox: None,
            config: descriptor.config.clone(),
            metadata: descriptor.metadata.clone(),
            resource_limits: descriptor.resource_limits.clone(),
            installed_at: Utc::now(),
            start_time: None,
            stop_time: None,
            last_error: None,
            restart_count: 0,
            health_check,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == PluginState::Running
    }

    pub fn has_sandbox(&self) -> bool {
        self.sandbox.is_some()
    }

    /// 进入错误状态并记录错误信息
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.state = PluginState::Error;
        self.last_error = Some(error.into());
    }
}

/// 插件统计信息
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginStats {
    /// 总插件数
    pub total: usize,
    /// 运行中的插件数
    pub running: usize,
    /// 错误状态的插件数
    pub error: usize,
    /// 按状态统计
    pub by_state: HashMap<PluginState, usize>,
}

impl PluginStats {
    pub fn from_instances(instances: &[PluginInstance]) -> Self {
        let mut stats = Self {
            total: instances.len(),
            ..Self::default()
        };
        for instance in instances {
            *stats.by_state.entry(instance.state).or_insert(0) += 1;
        }
        stats.running = stats.by_state.get(&PluginState::Running).copied().unwrap_or(0);
        stats.error = stats.by_state.get(&PluginState::Error).copied().unwrap_or(0);
        stats
    }
}
