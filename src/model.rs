use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 物理位置：读写器名 + 天线号。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub device_name: String,
    pub antenna_id: u16,
}

impl Location {
    pub fn new(device_name: impl Into<String>, antenna_id: u16) -> Self {
        Self {
            device_name: device_name.into(),
            antenna_id,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.device_name, self.antenna_id)
    }
}

/// 标签生命周期状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagState {
    #[default]
    Unknown,
    Present,
    Departed,
}

impl TagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagState::Unknown => "unknown",
            TagState::Present => "present",
            TagState::Departed => "departed",
        }
    }
}

/// 到达事件。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArrivedEvent {
    pub epc: String,
    pub tid: String,
    pub timestamp: i64,
    pub location: String,
}

/// 移动事件。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovedEvent {
    pub epc: String,
    pub tid: String,
    pub timestamp: i64,
    pub old_location: String,
    pub new_location: String,
}

/// 离开事件。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepartedEvent {
    pub epc: String,
    pub tid: String,
    pub timestamp: i64,
    pub last_read: i64,
    pub last_known_location: String,
}

/// 库存事件（对外发布）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Arrived(ArrivedEvent),
    Moved(MovedEvent),
    Departed(DepartedEvent),
}

impl Event {
    pub fn epc(&self) -> &str {
        match self {
            Event::Arrived(e) => &e.epc,
            Event::Moved(e) => &e.epc,
            Event::Departed(e) => &e.epc,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Arrived(_) => "arrived",
            Event::Moved(_) => "moved",
            Event::Departed(_) => "departed",
        }
    }
}

impl fmt::Display for Event {
    /// 便于日志输出的格式化展示。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Arrived(e) => write!(f, "arrived {} at {} ({})", e.epc, e.location, e.timestamp),
            Event::Moved(e) => write!(
                f,
                "moved {} {} -> {} ({})",
                e.epc, e.old_location, e.new_location, e.timestamp
            ),
            Event::Departed(e) => write!(
                f,
                "departed {} from {} ({})",
                e.epc, e.last_known_location, e.timestamp
            ),
        }
    }
}

/// 单个位置统计的静态投影（仅保留均值）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticTagStats {
    pub last_read: i64,
    pub mean_rssi: Option<f64>,
    pub count: usize,
}

/// 标签的不可变快照（序列化 / 查询用）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticTag {
    pub epc: String,
    #[serde(default)]
    pub tid: String,
    #[serde(default)]
    pub location: String,
    pub last_read: i64,
    pub last_arrived: i64,
    pub last_departed: i64,
    pub state: TagState,
    #[serde(default)]
    pub stats: HashMap<String, StaticTagStats>,
}

/// 每次上报附带的元数据。
#[derive(Clone, Debug, PartialEq)]
pub struct ReportInfo {
    pub device_name: String,
    /// 上报产生时刻（纳秒）。
    pub origin_ns: i64,
    /// 读写器时钟相对接收端时钟的修正量（微秒）。
    pub offset_micros: i64,
}

impl ReportInfo {
    pub fn new(device_name: impl Into<String>, origin_ns: i64) -> Self {
        Self {
            device_name: device_name.into(),
            origin_ns,
            offset_micros: 0,
        }
    }

    pub fn origin_millis(&self) -> i64 {
        self.origin_ns / 1_000_000
    }

    pub fn origin_micros(&self) -> i64 {
        self.origin_ns / 1_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_serializes_with_underscore() {
        assert_eq!(Location::new("R1", 3).to_string(), "R1_3");
        assert_eq!(Location::new("R1", 3), Location::new("R1", 3));
        assert_ne!(Location::new("R1", 3), Location::new("R1", 4));
    }

    #[test]
    fn event_json_is_tagged() {
        let event = Event::Arrived(ArrivedEvent {
            epc: "01".into(),
            tid: String::new(),
            timestamp: 5,
            location: "R1_1".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "arrived");
        assert_eq!(json["location"], "R1_1");
        assert_eq!(event.kind(), "arrived");
        assert_eq!(event.epc(), "01");
    }
}
