use serde::{Deserialize, Serialize};

/// 移动性参数（可配置项）。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobilityProfileConfig {
    /// 每毫秒的权重变化（dBm/ms），通常为负。
    pub slope: f64,
    /// 权重上限（dBm）。
    pub threshold: f64,
    /// 在该时长内权重保持为上限。
    pub holdoff_millis: f64,
}

impl Default for MobilityProfileConfig {
    fn default() -> Self {
        Self {
            slope: -0.008,
            threshold: 6.0,
            holdoff_millis: 500.0,
        }
    }
}

/// 当前位置的“在位加成”随时间衰减的线性函数。
///
/// 竞争位置的平均 RSSI 必须超过 `当前位置均值 + weight` 才能触发移动。
/// 不设下限：读取越久远，权重越小（最终为负），移动越容易。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MobilityProfile {
    slope: f64,
    threshold: f64,
    holdoff_millis: f64,
    y_intercept: f64,
}

impl MobilityProfile {
    pub fn new(slope: f64, threshold: f64, holdoff_millis: f64) -> Self {
        Self {
            slope,
            threshold,
            holdoff_millis,
            y_intercept: threshold - slope * holdoff_millis,
        }
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn holdoff_millis(&self) -> f64 {
        self.holdoff_millis
    }

    /// 计算参考时刻相对最后读取时刻的权重（上限为 threshold）。
    pub fn compute_offset(&self, reference_ms: i64, last_read_ms: i64) -> f64 {
        let elapsed = (reference_ms - last_read_ms) as f64;
        let weight = self.slope * elapsed + self.y_intercept;
        weight.min(self.threshold)
    }
}

impl From<MobilityProfileConfig> for MobilityProfile {
    fn from(cfg: MobilityProfileConfig) -> Self {
        Self::new(cfg.slope, cfg.threshold, cfg.holdoff_millis)
    }
}

impl Default for MobilityProfile {
    fn default() -> Self {
        MobilityProfileConfig::default().into()
    }
}
