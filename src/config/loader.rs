// 配置加载器
// 处理配置文件加载和环境变量解析

use crate::config::AppConfig;
use config::ConfigError;
use dotenvy::dotenv;
use plugin_host_common::CommonError;
use std::sync::OnceLock;
use tracing::{info, warn};

/// 全局配置实例
static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 初始化配置
    pub fn init() -> Result<&'static AppConfig, CommonError> {
        if let Err(e) = dotenv() {
            warn!("无法加载 .env 文件: {}", e);
        }

        let config = AppConfig::load().map_err(convert_config_error)?;
        config.validate()?;

        CONFIG
            .set(config)
            .map_err(|_| CommonError::internal("配置已经初始化"))?;

        let config = Self::get().ok_or_else(|| CommonError::internal("配置初始化失败"))?;

        info!("配置加载成功");
        info!("环境: {}", config.environment.name);
        info!("版本: {}", config.environment.version);
        info!("事件通道容量: {}", config.lifecycle.event_channel_capacity);

        Ok(config)
    }

    /// 获取配置，未初始化时返回 None
    pub fn get() -> Option<&'static AppConfig> {
        CONFIG.get()
    }
}

/// 配置错误转换辅助函数
pub fn convert_config_error(err: ConfigError) -> CommonError {
    CommonError::configuration(format!("配置错误: {}", err))
}
