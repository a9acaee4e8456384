// 日志系统设置

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日志系统初始化器
pub struct LoggingSetup;

impl LoggingSetup {
    /// 初始化日志系统
    ///
    /// 启用文件日志时返回写入线程的 guard，调用方需在进程生命周期内持有它，
    /// 否则缓冲中的日志会丢失。
    pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let console = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "pretty" => fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "compact" => fmt::layer().compact().with_target(true).boxed(),
            _ => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        };

        let (file_layer, guard) = match config.file_path.as_deref() {
            Some(file_path) if config.file_enabled => {
                let (directory, file_name) = Self::split_file_path(file_path)?;
                let appender = tracing_appender::rolling::daily(directory, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
                (Some(layer), Some(guard))
            }
            _ => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file_layer)
            .try_init()
            .context("日志系统已经初始化")?;

        tracing::info!("日志系统初始化完成");
        tracing::info!("日志级别: {}", config.level);
        tracing::info!("日志格式: {}", config.format);

        if config.file_enabled {
            tracing::info!("文件日志已启用: {:?}", config.file_path);
        }

        Ok(guard)
    }

    /// 拆分日志文件路径为目录与文件名
    pub fn split_file_path(file_path: &str) -> Result<(&Path, &std::ffi::OsStr)> {
        let path = Path::new(file_path);
        let file_name = path
            .file_name()
            .with_context(|| format!("日志文件路径缺少文件名: {}", file_path))?;
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Ok((directory, file_name))
    }

    /// 按环境名称选择日志预设，未知环境使用开发预设
    pub fn preset(environment: &str) -> LoggingConfig {
        match environment {
            "production" | "staging" => Self::production_config(),
            "test" => Self::test_config(),
            _ => Self::development_config(),
        }
    }

    /// 创建开发环境日志配置
    pub fn development_config() -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }

    /// 创建生产环境日志配置
    pub fn production_config() -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
            file_enabled: true,
            file_path: Some("./logs/plugin-host.log".to_string()),
        }
    }

    /// 创建测试环境日志配置
    pub fn test_config() -> LoggingConfig {
        LoggingConfig {
            level: "warn".to_string(),
            format: "compact".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }
}
