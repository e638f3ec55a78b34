//! 中心设备配置和持久化
//!
//! 设置保存在 `~/.config/blecentral/settings.toml`。

use crate::ble::DiscoveryOptions;
use crate::logging::LogLevel;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// 默认的恢复标识
pub const DEFAULT_RESTORE_IDENTIFIER: &str = "blecentral.central";

/// 中心设备设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralSettings {
    /// 创建适配器时使用的恢复标识
    pub restore_identifier: String,
    /// 是否上报重复广播
    pub allow_duplicates: bool,
    /// 蓝牙关闭时是否提示
    pub show_power_alert: bool,
    /// 默认扫描的服务 UUID，为空表示不过滤
    pub service_filter: Vec<Uuid>,
    /// 还有观察者时是否忽略停止扫描
    pub stop_on_empty: bool,
    /// 默认日志级别
    pub log_level: LogLevel,
}

impl Default for CentralSettings {
    fn default() -> Self {
        Self {
            restore_identifier: DEFAULT_RESTORE_IDENTIFIER.to_string(),
            allow_duplicates: true,
            show_power_alert: true,
            service_filter: Vec::new(),
            stop_on_empty: false,
            log_level: LogLevel::Info,
        }
    }
}

impl CentralSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blecentral");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match Self::from_toml(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.to_toml()?)?;
        debug!("Saved settings to {:?}", path);
        Ok(path)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 扫描时传给适配器的选项
    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            allow_duplicates: self.allow_duplicates,
            show_power_alert: self.show_power_alert,
        }
    }

    /// 服务过滤，空列表视为不过滤
    pub fn service_filter(&self) -> Option<Vec<Uuid>> {
        if self.service_filter.is_empty() {
            None
        } else {
            Some(self.service_filter.clone())
        }
    }
}

/// 配置读写错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}
