/// 运行时配置

use super::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// 运行时开关
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// 是否启用释放环检测（调试设施）
    pub cycle_guard: bool,

    /// Host 所有权句柄未结束就被丢弃时是否告警
    pub leak_warnings: bool,

    /// 类描述清单路径，未设置时使用内置清单
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_guard: cfg!(debug_assertions),
            leak_warnings: true,
            manifest_path: None,
        }
    }
}

impl RuntimeConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(path) = &self.manifest_path {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                return Err(ConfigError::ValidationError(format!(
                    "Manifest must be a .json file: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

static CYCLE_GUARD: AtomicBool = AtomicBool::new(cfg!(debug_assertions));
static LEAK_WARNINGS: AtomicBool = AtomicBool::new(true);

pub(crate) fn publish(config: &RuntimeConfig) {
    CYCLE_GUARD.store(config.cycle_guard, Ordering::Relaxed);
    LEAK_WARNINGS.store(config.leak_warnings, Ordering::Relaxed);
}

/// 当前是否启用释放环检测
pub fn cycle_guard_enabled() -> bool {
    CYCLE_GUARD.load(Ordering::Relaxed)
}

/// 当前是否启用泄漏告警
pub fn leak_warnings_enabled() -> bool {
    LEAK_WARNINGS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_extension_validation() {
        let mut config = RuntimeConfig::default();
        assert!(config.validate().is_ok());

        config.manifest_path = Some(PathBuf::from("api.yaml"));
        assert!(config.validate().is_err());

        config.manifest_path = Some(PathBuf::from("extension_api.json"));
        assert!(config.validate().is_ok());
    }
}
