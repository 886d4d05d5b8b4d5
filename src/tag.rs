use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::model::{StaticTag, StaticTagStats, TagState};
use crate::moving_average::MovingAverage;

/// 每个位置的 RSSI 窗口大小。
pub const RSSI_WINDOW: NonZeroUsize = match NonZeroUsize::new(20) {
    Some(window) => window,
    None => panic!("rssi window must be non-zero"),
};

/// 单个（标签, 位置）组合的统计。
#[derive(Clone, Debug)]
pub struct TagStats {
    last_read: i64,
    rssi: MovingAverage,
}

impl TagStats {
    pub fn new() -> Self {
        Self {
            last_read: 0,
            rssi: MovingAverage::with_window(RSSI_WINDOW),
        }
    }

    /// 记录一次读取；时间戳只前进不后退。
    pub fn update(&mut self, rssi: Option<f64>, read_ms: i64) {
        if read_ms > self.last_read {
            self.last_read = read_ms;
        }
        if let Some(rssi) = rssi {
            self.rssi.add_value(rssi);
        }
    }

    pub fn last_read(&self) -> i64 {
        self.last_read
    }

    pub fn rssi_count(&self) -> usize {
        self.rssi.len()
    }

    pub fn mean_rssi(&self) -> f64 {
        self.rssi.mean()
    }

    fn to_static(&self) -> StaticTagStats {
        StaticTagStats {
            last_read: self.last_read,
            mean_rssi: if self.rssi.is_empty() {
                None
            } else {
                Some(self.rssi.mean())
            },
            count: self.rssi.len(),
        }
    }

    fn from_static(stats: &StaticTagStats) -> Self {
        let mut restored = Self::new();
        restored.last_read = stats.last_read;
        // 只恢复均值（单样本近似）
        if let Some(mean) = stats.mean_rssi {
            if stats.count > 0 {
                restored.rssi.add_value(mean);
            }
        }
        restored
    }
}

impl Default for TagStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 库存中的单个标签记录。
///
/// 状态只由 `TagProcessor` 推进，外部只能读取。
#[derive(Clone, Debug)]
pub struct Tag {
    pub(crate) epc: String,
    pub(crate) tid: String,
    pub(crate) location: String,
    pub(crate) last_read: i64,
    pub(crate) last_arrived: i64,
    pub(crate) last_departed: i64,
    pub(crate) state: TagState,
    pub(crate) stats: HashMap<String, TagStats>,
}

impl Tag {
    pub fn new(epc: impl Into<String>) -> Self {
        Self {
            epc: epc.into(),
            tid: String::new(),
            location: String::new(),
            last_read: 0,
            last_arrived: 0,
            last_departed: 0,
            state: TagState::Unknown,
            stats: HashMap::new(),
        }
    }

    pub fn epc(&self) -> &str {
        &self.epc
    }

    pub fn tid(&self) -> &str {
        &self.tid
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn last_read(&self) -> i64 {
        self.last_read
    }

    pub fn last_arrived(&self) -> i64 {
        self.last_arrived
    }

    pub fn last_departed(&self) -> i64 {
        self.last_departed
    }

    pub fn state(&self) -> TagState {
        self.state
    }

    pub fn stats_at(&self, location: &str) -> Option<&TagStats> {
        self.stats.get(location)
    }

    /// 所有位置累计的 RSSI 样本数。
    pub fn rssi_count(&self) -> usize {
        self.stats.values().map(TagStats::rssi_count).sum()
    }

    /// 仅在更新时才覆盖最后读取时间（防止乱序回退）。
    pub(crate) fn observe_read(&mut self, read_ms: i64) {
        if read_ms > self.last_read {
            self.last_read = read_ms;
        }
    }

    pub(crate) fn stats_entry(&mut self, location: &str) -> &mut TagStats {
        self.stats.entry(location.to_string()).or_default()
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats.clear();
    }

    pub fn to_static(&self) -> StaticTag {
        StaticTag {
            epc: self.epc.clone(),
            tid: self.tid.clone(),
            location: self.location.clone(),
            last_read: self.last_read,
            last_arrived: self.last_arrived,
            last_departed: self.last_departed,
            state: self.state,
            stats: self
                .stats
                .iter()
                .map(|(loc, stats)| (loc.clone(), stats.to_static()))
                .collect(),
        }
    }

    pub fn from_static(tag: &StaticTag) -> Self {
        Self {
            epc: tag.epc.clone(),
            tid: tag.tid.clone(),
            location: tag.location.clone(),
            last_read: tag.last_read,
            last_arrived: tag.last_arrived,
            last_departed: tag.last_departed,
            state: tag.state,
            stats: tag
                .stats
                .iter()
                .map(|(loc, stats)| (loc.clone(), TagStats::from_static(stats)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_read_never_regresses() {
        let mut tag = Tag::new("01");
        tag.observe_read(100);
        tag.observe_read(50);
        assert_eq!(tag.last_read(), 100);
        tag.observe_read(101);
        assert_eq!(tag.last_read(), 101);
    }

    #[test]
    fn stats_keep_latest_timestamp() {
        let mut stats = TagStats::new();
        stats.update(Some(-60.0), 20);
        stats.update(Some(-70.0), 10);
        assert_eq!(stats.last_read(), 20);
        assert_eq!(stats.rssi_count(), 2);
        assert_eq!(stats.mean_rssi(), -65.0);
    }

    #[test]
    fn static_round_trip_keeps_mean_only() {
        let mut tag = Tag::new("01");
        tag.tid = "E2".into();
        tag.location = "R1_1".into();
        tag.state = TagState::Present;
        tag.observe_read(500);
        tag.last_arrived = 400;
        let stats = tag.stats_entry("R1_1");
        stats.update(Some(-60.0), 400);
        stats.update(Some(-70.0), 500);

        let snapshot = tag.to_static();
        let restored = Tag::from_static(&snapshot);
        assert_eq!(restored.state(), TagState::Present);
        assert_eq!(restored.location(), "R1_1");
        assert_eq!(restored.tid(), "E2");
        assert_eq!(restored.last_read(), 500);
        assert_eq!(restored.last_arrived(), 400);
        let restored_stats = restored.stats_at("R1_1").unwrap();
        assert_eq!(restored_stats.rssi_count(), 1);
        assert_eq!(restored_stats.mean_rssi(), -65.0);
        assert_eq!(restored_stats.last_read(), 500);
    }
}
