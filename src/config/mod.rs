/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖，以及日志系统初始化
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub mod runtime;

pub use runtime::RuntimeConfig;

/// 绑定层配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 绑定层主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingConfig {
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 运行时开关
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl BindingConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("BINDINGS_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
        if let Ok(val) = env::var("BINDINGS_CYCLE_GUARD") {
            self.runtime.cycle_guard = val.parse().unwrap_or(self.runtime.cycle_guard);
        }
        if let Ok(val) = env::var("BINDINGS_LEAK_WARNINGS") {
            self.runtime.leak_warnings = val.parse().unwrap_or(self.runtime.leak_warnings);
        }
        if let Ok(val) = env::var("BINDINGS_MANIFEST_PATH") {
            if !val.is_empty() {
                self.runtime.manifest_path = Some(PathBuf::from(val));
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.runtime.validate()
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./bindings.toml
    /// 2. ./bindings.json
    /// 3. 使用默认配置
    ///
    /// 最后应用环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = if let Ok(config) = Self::from_toml_file("bindings.toml") {
            tracing::info!(target: "config", "Loaded config from bindings.toml");
            config
        } else if let Ok(config) = Self::from_json_file("bindings.json") {
            tracing::info!(target: "config", "Loaded config from bindings.json");
            config
        } else {
            tracing::debug!(target: "config", "Using default configuration");
            Self::default()
        };
        config.apply_env_overrides();
        config
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,

    /// 是否在日志中包含目标模块
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_to_console: true,
            with_target: true,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// 初始化日志系统
///
/// `RUST_LOG` 环境变量优先，否则使用配置的级别。重复调用是无操作。
pub fn init_logging(config: &LoggingConfig) {
    if !config.log_to_console || LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.as_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init();
    tracing::debug!(target: "config", level = config.level.as_filter(), "Logging initialized");
}

/// 应用配置：初始化日志并发布运行时开关
pub fn apply(config: &BindingConfig) {
    init_logging(&config.logging);
    runtime::publish(&config.runtime);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BindingConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.runtime.cycle_guard);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_toml_parsing() {
        let config = BindingConfig::from_toml_str(
            r#"
            [logging]
            level = "debug"
            log_to_console = false
            with_target = false

            [runtime]
            cycle_guard = false
            leak_warnings = true
            manifest_path = "api/extension_api.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(!config.runtime.cycle_guard);
        assert_eq!(
            config.runtime.manifest_path.as_deref(),
            Some(Path::new("api/extension_api.json"))
        );
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = BindingConfig::from_json_str("{}").unwrap();
        assert!(config.runtime.leak_warnings);
        assert!(config.logging.log_to_console);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BindingConfig::default();
        config.logging.level = LogLevel::Warn;
        config.runtime.cycle_guard = false;

        let toml_path = dir.path().join("bindings.toml");
        config.save_toml(&toml_path).unwrap();
        let parsed = BindingConfig::from_toml_file(&toml_path).unwrap();
        assert_eq!(parsed.logging.level, LogLevel::Warn);
        assert!(!parsed.runtime.cycle_guard);

        let json_path = dir.path().join("bindings.json");
        config.save_json(&json_path).unwrap();
        let parsed = BindingConfig::from_json_file(&json_path).unwrap();
        assert_eq!(parsed.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" trace "), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("verbose"), None);
    }
}
