//! 网关行协议：每行一个 JSON 对象，`type` 字段区分消息类型。

use serde::{Deserialize, Serialize};

use crate::behavior::{Behavior, Environment};
use crate::config::ProcessorConfig;
use crate::device_service::DeviceCommand;
use crate::error::ProtoError;
use crate::llrp::{GetReaderCapabilitiesResponse, TagReportData};
use crate::model::{Event, StaticTag};

/// 未逐条解码的 RO_ACCESS_REPORT，单条坏数据不影响整批。
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RawReport {
    #[serde(default)]
    pub tag_reports: Vec<serde_json::Value>,
}

impl RawReport {
    /// 逐条解码；失败的条目记录日志后跳过。
    pub fn decode_readings(self, device: &str) -> Vec<TagReportData> {
        let mut readings = Vec::with_capacity(self.tag_reports.len());
        for (index, value) in self.tag_reports.into_iter().enumerate() {
            match serde_json::from_value::<TagReportData>(value) {
                Ok(reading) => readings.push(reading),
                Err(err) => {
                    log::warn!("Skipping malformed reading #{} from {}: {}", index, device, err);
                }
            }
        }
        readings
    }
}

/// 入站消息。
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Report {
        device: String,
        origin_ns: i64,
        report: RawReport,
    },
    ReaderConnected {
        device: String,
        capabilities: GetReaderCapabilitiesResponse,
    },
    ReaderClosed {
        device: String,
    },
    SetBehavior {
        behavior: Behavior,
    },
    SetEnvironment {
        environment: Environment,
    },
    StartAll,
    StopAll,
    UpdateConfig {
        config: ProcessorConfig,
    },
    Snapshot,
}

impl Inbound {
    /// 上报消息所属的读写器（用于分配工作线程）。
    pub fn device(&self) -> Option<&str> {
        match self {
            Inbound::Report { device, .. }
            | Inbound::ReaderConnected { device, .. }
            | Inbound::ReaderClosed { device } => Some(device.as_str()),
            _ => None,
        }
    }
}

/// 出站消息。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Events { events: Vec<Event> },
    DeviceCommand { device: String, command: DeviceCommand },
    Inventory { tags: Vec<StaticTag> },
    Error { message: String },
}

/// 解析一行入站消息。
pub fn parse_line(line: &str) -> Result<Inbound, ProtoError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtoError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}

/// 编码一行出站消息（不含换行）。
pub fn encode_line(message: &Outbound) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
