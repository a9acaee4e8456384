// 应用程序设置和配置
// 定义配置结构体和加载逻辑

use config::{Config, ConfigError, Environment, File};
use plugin_host_common::CommonError;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::LoggingSetup;
use crate::plugins::{HealthCheck, ResourceLimits};

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub lifecycle: LifecycleConfig,
    pub sandbox: SandboxConfig,
    pub health_check: HealthCheckConfig,
    pub logging: LoggingConfig,
    pub environment: EnvironmentConfig,
}

/// 生命周期管理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// 事件通道容量，满时丢弃新事件
    pub event_channel_capacity: usize,
    /// 运行时启动失败时是否销毁已创建的沙箱
    pub destroy_sandbox_on_start_failure: bool,
    /// 关闭时等待事件排空的默认超时（秒），调用方上下文没有截止时间时使用
    pub shutdown_drain_timeout_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 100,
            destroy_sandbox_on_start_failure: true,
            shutdown_drain_timeout_seconds: 30,
        }
    }
}

/// 沙箱配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// 未单独指定时使用的资源限制
    pub default_limits: ResourceLimits,
}

/// 健康检查配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub path: String,
    pub method: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub max_failures: u32,
    /// 健康监视器扫描间隔（秒）
    pub scan_interval_seconds: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/health".to_string(),
            method: "GET".to_string(),
            interval_seconds: 30,
            timeout_seconds: 5,
            max_failures: 3,
            scan_interval_seconds: 5,
        }
    }
}

impl HealthCheckConfig {
    /// 新安装实例的健康检查配置块
    pub fn to_health_check(&self) -> HealthCheck {
        HealthCheck {
            enabled: self.enabled,
            path: self.path.clone(),
            method: self.method.clone(),
            interval_seconds: self.interval_seconds,
            timeout_seconds: self.timeout_seconds,
            max_failures: self.max_failures,
            failure_count: 0,
            last_check: None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_enabled: bool,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub debug: bool,
    pub version: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "development".to_string(),
            debug: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    /// 从环境变量和工作目录下的 config.toml 加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let file = Path::new("config.toml");
        Self::build(file.exists().then_some(file))
    }

    /// 从指定配置文件加载配置，环境变量仍然优先
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(Some(path.as_ref()))
    }

    fn build(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::builder();

        // 1. 加载默认配置
        config = config.add_source(Config::try_from(&AppConfig::default())?);

        // 2. 加载配置文件
        if let Some(file) = file {
            config = config.add_source(File::from(file));
        }

        // 3. 加载环境变量（优先级最高）
        config = config.add_source(
            Environment::with_prefix("PLUGIN_HOST")
                .prefix_separator("_")
                .separator("__"),
        );

        let mut app_config: AppConfig = config.build()?.try_deserialize()?;
        app_config.environment.version = env!("CARGO_PKG_VERSION").to_string();

        Ok(app_config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), CommonError> {
        use crate::config::ConfigValidator;

        ConfigValidator::validate_all(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            CommonError::configuration(format!("配置验证失败: {}", error_messages.join("; ")))
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment.name == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment.name == "production"
    }

    pub fn is_test(&self) -> bool {
        self.environment.name == "test"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let environment = EnvironmentConfig::default();
        Self {
            lifecycle: LifecycleConfig::default(),
            sandbox: SandboxConfig::default(),
            health_check: HealthCheckConfig::default(),
            logging: LoggingSetup::preset(&environment.name),
            environment,
        }
    }
}
