// 日志系统测试

use crate::config::AppConfig;
use crate::logging::LoggingSetup;
use std::path::Path;

#[test]
fn test_presets_by_environment() {
    let production = LoggingSetup::preset("production");
    assert_eq!(production.format, "json");
    assert!(production.file_enabled);
    assert_eq!(production.file_path.as_deref(), Some("./logs/plugin-host.log"));

    assert_eq!(LoggingSetup::preset("staging").format, "json");

    let test = LoggingSetup::preset("test");
    assert_eq!(test.level, "warn");
    assert!(!test.file_enabled);

    let unknown = LoggingSetup::preset("local");
    assert_eq!(unknown.level, "debug");
    assert_eq!(unknown.format, "pretty");
}

#[test]
fn test_default_app_config_uses_environment_preset() {
    let config = AppConfig::default();
    assert_eq!(config.environment.name, "development");
    assert_eq!(config.logging.format, LoggingSetup::development_config().format);
}

#[test]
fn test_presets_pass_validation() {
    for environment in ["development", "test", "staging", "production"] {
        let mut config = AppConfig::default();
        config.environment.name = environment.to_string();
        config.environment.debug = environment != "production";
        config.logging = LoggingSetup::preset(environment);
        assert!(config.validate().is_ok(), "{} 预设未通过验证", environment);
    }
}

#[test]
fn test_split_file_path() {
    let (directory, file_name) = LoggingSetup::split_file_path("./logs/plugin-host.log").unwrap();
    assert_eq!(directory, Path::new("./logs"));
    assert_eq!(file_name, "plugin-host.log");

    let (directory, file_name) = LoggingSetup::split_file_path("host.log").unwrap();
    assert_eq!(directory, Path::new("."));
    assert_eq!(file_name, "host.log");

    assert!(LoggingSetup::split_file_path("/").is_err());
}
