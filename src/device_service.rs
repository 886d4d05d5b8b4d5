use std::collections::HashMap;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::DeviceServiceError;
use crate::llrp::{GetReaderCapabilitiesResponse, RoSpec, SetReaderConfig};
use crate::proto::Outbound;

/// 出站队列满时的重试间隔。
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// 设备服务客户端（负责 LLRP 编解码与网络收发）。
///
/// 所有调用都是同步的，失败时返回错误而不是 panic。
pub trait DeviceService: Send + Sync {
    fn get_capabilities(&self, reader: &str) -> Result<GetReaderCapabilitiesResponse, DeviceServiceError>;
    fn set_config(&self, reader: &str, config: &SetReaderConfig) -> Result<(), DeviceServiceError>;
    fn add_ro_spec(&self, reader: &str, spec: &RoSpec) -> Result<(), DeviceServiceError>;
    fn delete_all_ro_specs(&self, reader: &str) -> Result<(), DeviceServiceError>;
    fn enable_ro_spec(&self, reader: &str, id: u32) -> Result<(), DeviceServiceError>;
    fn disable_ro_spec(&self, reader: &str, id: u32) -> Result<(), DeviceServiceError>;
    fn start_ro_spec(&self, reader: &str, id: u32) -> Result<(), DeviceServiceError>;
    fn stop_ro_spec(&self, reader: &str, id: u32) -> Result<(), DeviceServiceError>;
}

/// 发往设备服务的命令（出站行协议载荷）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeviceCommand {
    SetConfig { config: SetReaderConfig },
    AddRoSpec { ro_spec: RoSpec },
    DeleteAllRoSpecs,
    EnableRoSpec { id: u32 },
    DisableRoSpec { id: u32 },
    StartRoSpec { id: u32 },
    StopRoSpec { id: u32 },
}

impl DeviceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::SetConfig { .. } => "SET_READER_CONFIG",
            DeviceCommand::AddRoSpec { .. } => "ADD_ROSPEC",
            DeviceCommand::DeleteAllRoSpecs => "DELETE_ROSPEC",
            DeviceCommand::EnableRoSpec { .. } => "ENABLE_ROSPEC",
            DeviceCommand::DisableRoSpec { .. } => "DISABLE_ROSPEC",
            DeviceCommand::StartRoSpec { .. } => "START_ROSPEC",
            DeviceCommand::StopRoSpec { .. } => "STOP_ROSPEC",
        }
    }
}

/// 基于行协议的设备服务：能力来自 reader_connected 缓存，命令写入出站队列。
pub struct ChannelDeviceService {
    capabilities: RwLock<HashMap<String, GetReaderCapabilitiesResponse>>,
    outbound: SyncSender<Outbound>,
    send_timeout: Duration,
}

impl ChannelDeviceService {
    pub fn new(outbound: SyncSender<Outbound>, send_timeout: Duration) -> Self {
        Self {
            capabilities: RwLock::new(HashMap::new()),
            outbound,
            send_timeout,
        }
    }

    /// 记录读写器上线时携带的能力响应。
    pub fn remember_capabilities(&self, reader: &str, caps: GetReaderCapabilitiesResponse) {
        self.capabilities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(reader.to_string(), caps);
    }

    pub fn forget(&self, reader: &str) {
        self.capabilities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(reader);
    }

    fn send(&self, reader: &str, command: DeviceCommand) -> Result<(), DeviceServiceError> {
        log::debug!("{} -> {}", command.name(), reader);
        let mut message = Outbound::DeviceCommand {
            device: reader.to_string(),
            command,
        };
        let deadline = Instant::now() + self.send_timeout;
        loop {
            match self.outbound.try_send(message) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(DeviceServiceError::Closed),
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        log::warn!("Outbound queue full, command to {} timed out", reader);
                        return Err(DeviceServiceError::Timeout);
                    }
                    message = returned;
                    thread::sleep(SEND_RETRY_INTERVAL);
                }
            }
        }
    }
}

impl DeviceService for ChannelDeviceService {
    fn get_capabilities(&self, reader: &str) -> Result<GetReaderCapabilitiesResponse, DeviceServiceError> {
        self.capabilities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(reader)
            .cloned()
            .ok_or_else(|| DeviceServiceError::Rejected(format!("no capabilities known for {}", reader)))
    }

    fn set_config(&self, reader: &str, config: &SetReaderConfig) -> Result<(), DeviceServiceError> {
        self.send(
            reader,
            DeviceCommand::SetConfig {
                config: config.clone(),
            },
        )
    }

    fn add_ro_spec(&self, reader: &str, spec: &RoSpec) -> Result<(), DeviceServiceError> {
        self.send(
            reader,
            DeviceCommand::AddRoSpec {
                ro_spec: spec.clone(),
            },
        )
    }

    fn delete_all_ro_specs(&self, reader: &str) -> Result<(), DeviceServiceError> {
        self.send(reader, DeviceCommand::DeleteAllRoSpecs)
    }

    fn enable_ro_spec(&self, reader: &str, id: u32) -> Result<(), DeviceServiceError> {
        self.send(reader, DeviceCommand::EnableRoSpec { id })
    }

    fn disable_ro_spec(&self, reader: &str, id: u32) -> Result<(), DeviceServiceError> {
        self.send(reader, DeviceCommand::DisableRoSpec { id })
    }

    fn start_ro_spec(&self, reader: &str, id: u32) -> Result<(), DeviceServiceError> {
        self.send(reader, DeviceCommand::StartRoSpec { id })
    }

    fn stop_ro_spec(&self, reader: &str, id: u32) -> Result<(), DeviceServiceError> {
        self.send(reader, DeviceCommand::StopRoSpec { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn capabilities_come_from_cache() {
        let (tx, _rx) = mpsc::sync_channel(4);
        let service = ChannelDeviceService::new(tx, Duration::from_millis(10));
        assert!(matches!(
            service.get_capabilities("R1"),
            Err(DeviceServiceError::Rejected(_))
        ));
        service.remember_capabilities("R1", GetReaderCapabilitiesResponse::default());
        assert!(service.get_capabilities("R1").is_ok());
        service.forget("R1");
        assert!(service.get_capabilities("R1").is_err());
    }

    #[test]
    fn commands_are_forwarded_in_order() {
        let (tx, rx) = mpsc::sync_channel(4);
        let service = ChannelDeviceService::new(tx, Duration::from_millis(10));
        service.delete_all_ro_specs("R1").unwrap();
        service.start_ro_spec("R1", 1).unwrap();
        let first = rx.recv().unwrap();
        assert_eq!(
            first,
            Outbound::DeviceCommand {
                device: "R1".into(),
                command: DeviceCommand::DeleteAllRoSpecs,
            }
        );
        assert!(matches!(
            rx.recv().unwrap(),
            Outbound::DeviceCommand {
                command: DeviceCommand::StartRoSpec { id: 1 },
                ..
            }
        ));
    }

    #[test]
    fn full_queue_times_out() {
        let (tx, _rx) = mpsc::sync_channel(1);
        let service = ChannelDeviceService::new(tx, Duration::from_millis(20));
        service.enable_ro_spec("R1", 1).unwrap();
        assert_eq!(
            service.enable_ro_spec("R1", 1),
            Err(DeviceServiceError::Timeout)
        );
    }

    #[test]
    fn closed_link_is_reported() {
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);
        let service = ChannelDeviceService::new(tx, Duration::from_millis(20));
        assert_eq!(service.stop_ro_spec("R1", 1), Err(DeviceServiceError::Closed));
    }

    #[test]
    fn command_json_is_tagged() {
        let json = serde_json::to_value(DeviceCommand::EnableRoSpec { id: 1 }).unwrap();
        assert_eq!(json["op"], "enable_ro_spec");
        assert_eq!(json["id"], 1);
    }
}
