// 配置验证器
// 提供详细的配置验证逻辑

use crate::config::{
    AppConfig, EnvironmentConfig, HealthCheckConfig, LifecycleConfig, LoggingConfig, SandboxConfig,
};
use plugin_host_common::CommonError;

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证完整配置，收集所有错误
    pub fn validate_all(config: &AppConfig) -> Result<(), Vec<CommonError>> {
        let errors: Vec<CommonError> = [
            Self::validate_lifecycle(&config.lifecycle),
            Self::validate_sandbox(&config.sandbox),
            Self::validate_health_check(&config.health_check),
            Self::validate_logging(&config.logging),
            Self::validate_environment(&config.environment),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// 验证生命周期配置
    pub fn validate_lifecycle(config: &LifecycleConfig) -> Result<(), CommonError> {
        if config.event_channel_capacity == 0 {
            return Err(CommonError::validation("事件通道容量必须大于 0"));
        }

        if config.shutdown_drain_timeout_seconds == 0 {
            return Err(CommonError::validation("关闭排空超时必须大于 0"));
        }

        Ok(())
    }

    /// 验证沙箱资源限制
    pub fn validate_sandbox(config: &SandboxConfig) -> Result<(), CommonError> {
        let limits = &config.default_limits;

        let positive = [
            ("max_memory_mb", limits.max_memory_mb),
            ("max_disk_mb", limits.max_disk_mb),
            ("max_network_kbps", limits.max_network_kbps),
            ("max_execution_seconds", limits.max_execution_seconds),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == Some(0)) {
            return Err(CommonError::validation(format!("资源限制 {} 不能为 0", name)));
        }

        if let Some(cpu) = limits.max_cpu_percent {
            if cpu <= 0.0 || cpu > 100.0 {
                return Err(CommonError::validation("CPU 使用率限制必须在 0-100 之间"));
            }
        }

        Ok(())
    }

    /// 验证健康检查配置
    pub fn validate_health_check(config: &HealthCheckConfig) -> Result<(), CommonError> {
        if config.interval_seconds == 0 {
            return Err(CommonError::validation("健康检查间隔必须大于 0"));
        }

        if config.timeout_seconds == 0 {
            return Err(CommonError::validation("健康检查超时必须大于 0"));
        }

        if config.timeout_seconds >= config.interval_seconds {
            return Err(CommonError::validation("健康检查超时必须小于检查间隔"));
        }

        if config.max_failures == 0 {
            return Err(CommonError::validation("最大失败次数必须大于 0"));
        }

        if config.scan_interval_seconds == 0 {
            return Err(CommonError::validation("健康监视器扫描间隔必须大于 0"));
        }

        if config.path.is_empty() {
            return Err(CommonError::validation("健康检查路径不能为空"));
        }

        Ok(())
    }

    /// 验证日志配置
    pub fn validate_logging(config: &LoggingConfig) -> Result<(), CommonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.level.to_lowercase().as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志级别: {}，有效值: {:?}",
                config.level, valid_levels
            )));
        }

        let valid_formats = ["json", "pretty", "compact", "full"];
        if !valid_formats.contains(&config.format.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志格式: {}，有效值: {:?}",
                config.format, valid_formats
            )));
        }

        if config.file_enabled && config.file_path.as_deref().is_none_or(str::is_empty) {
            return Err(CommonError::validation("启用文件日志时必须指定文件路径"));
        }

        Ok(())
    }

    /// 验证环境配置
    pub fn validate_environment(config: &EnvironmentConfig) -> Result<(), CommonError> {
        let valid_environments = ["development", "test", "staging", "production"];
        if !valid_environments.contains(&config.name.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的环境名称: {}，有效值: {:?}",
                config.name, valid_environments
            )));
        }

        if config.name == "production" && config.debug {
            return Err(CommonError::validation("生产环境不应启用调试模式"));
        }

        Ok(())
    }
}
