use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mobility::{MobilityProfile, MobilityProfileConfig};
use crate::model::Location;

/// 配置文件路径环境变量。
pub const CONFIG_PATH_ENV: &str = "RFID_GATEWAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "gateway.json";

/// 标签处理器参数（支持热更新）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub departed_threshold_seconds: u32,
    pub departed_check_interval_seconds: u32,
    pub age_out_hours: u32,
    pub adjust_last_read_on_by_origin: bool,
    /// 默认别名 "<device>_<antenna>" -> 用户可读名称。
    pub aliases: HashMap<String, String>,
    pub mobility: MobilityProfileConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            departed_threshold_seconds: 600,
            departed_check_interval_seconds: 30,
            age_out_hours: 336,
            adjust_last_read_on_by_origin: true,
            aliases: HashMap::new(),
            mobility: MobilityProfileConfig::default(),
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.departed_threshold_seconds == 0 {
            return Err(ConfigError::Invalid(
                "departed_threshold_seconds must be positive".into(),
            ));
        }
        if self.departed_check_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "departed_check_interval_seconds must be positive".into(),
            ));
        }
        if self.age_out_hours == 0 {
            return Err(ConfigError::Invalid("age_out_hours must be positive".into()));
        }
        if !self.mobility.slope.is_finite() || self.mobility.slope > 0.0 {
            return Err(ConfigError::Invalid(
                "mobility slope must be zero or negative".into(),
            ));
        }
        if !self.mobility.threshold.is_finite() || !self.mobility.holdoff_millis.is_finite() {
            return Err(ConfigError::Invalid("mobility values must be finite".into()));
        }
        Ok(())
    }

    pub fn mobility_profile(&self) -> MobilityProfile {
        self.mobility.into()
    }

    pub fn departed_threshold_millis(&self) -> i64 {
        self.departed_threshold_seconds as i64 * 1000
    }

    pub fn age_out_millis(&self) -> i64 {
        self.age_out_hours as i64 * 3600 * 1000
    }

    /// 解析位置名：默认 "<device>_<antenna>"，可被别名覆盖。
    pub fn alias(&self, device_name: &str, antenna_id: u16) -> String {
        let default_alias = Location::new(device_name, antenna_id).to_string();
        match self.aliases.get(&default_alias) {
            Some(alias) if !alias.is_empty() => alias.clone(),
            _ => default_alias,
        }
    }
}

/// 网关运行参数（启动时确定）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub gateway_id: String,
    pub cache_path: PathBuf,
    pub worker_count: usize,
    pub report_queue_capacity: usize,
    pub event_queue_capacity: usize,
    pub age_out_check_interval_seconds: u32,
    /// 是否相信厂商“总是上报全部字段”的声明（跳过模糊空值补全）。
    pub trust_vendor_complete_reports: bool,
    pub processor: ProcessorConfig,
}

impl GatewaySettings {
    /// 使用指定网关 ID 构建默认参数。
    pub fn with_gateway_id(id: impl Into<String>) -> Self {
        Self {
            gateway_id: id.into(),
            cache_path: PathBuf::from("tag_cache.json"),
            worker_count: 2,
            report_queue_capacity: 1024,
            event_queue_capacity: 256,
            age_out_check_interval_seconds: 3600,
            trust_vendor_complete_reports: false,
            processor: ProcessorConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be positive".into()));
        }
        if self.report_queue_capacity == 0 || self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be positive".into()));
        }
        if self.age_out_check_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "age_out_check_interval_seconds must be positive".into(),
            ));
        }
        self.processor.validate()
    }

    /// 从 JSON 文件加载；文件不存在时使用默认值。
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = if path.exists() {
            let data = fs::read(path)?;
            serde_json::from_slice::<GatewaySettings>(&data)?
        } else {
            log::warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            GatewaySettings::default()
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// 按环境变量定位配置文件并加载。
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = env::var("RFID_GATEWAY_ID") {
            if !id.is_empty() {
                self.gateway_id = id;
            }
        }
        if let Ok(path) = env::var("RFID_CACHE_PATH") {
            if !path.is_empty() {
                self.cache_path = PathBuf::from(path);
            }
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::with_gateway_id("gateway-unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn alias_defaults_to_device_antenna() {
        let mut cfg = ProcessorConfig::default();
        assert_eq!(cfg.alias("R1", 2), "R1_2");
        cfg.aliases.insert("R1_2".into(), "Dock".into());
        assert_eq!(cfg.alias("R1", 2), "Dock");
        cfg.aliases.insert("R1_3".into(), String::new());
        assert_eq!(cfg.alias("R1", 3), "R1_3");
    }

    #[test]
    fn rejects_positive_slope() {
        let mut cfg = ProcessorConfig::default();
        cfg.mobility.slope = 0.1;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"worker_count": 4, "processor": {{"departed_threshold_seconds": 30}}}}"#
        )
        .unwrap();
        let settings = GatewaySettings::load_from(file.path()).unwrap();
        assert_eq!(settings.worker_count, 4);
        assert_eq!(settings.processor.departed_threshold_seconds, 30);
        assert_eq!(settings.processor.age_out_hours, 336);
        assert_eq!(settings.event_queue_capacity, 256);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GatewaySettings::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.worker_count, 2);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            GatewaySettings::load_from(file.path()),
            Err(ConfigError::Json(_))
        ));
    }
}
