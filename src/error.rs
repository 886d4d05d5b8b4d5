use std::fmt;

use thiserror::Error;

/// 行为编译错误（能力缺失 / 无法满足）。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BehaviorError {
    #[error("missing capability info: {0}")]
    MissingCapabilityInfo(String),
    #[error("behavior unsatisfiable: {0}")]
    Unsatisfiable(String),
}

/// 设备服务调用错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceServiceError {
    #[error("device service timed out")]
    Timeout,
    #[error("device service returned status {0}")]
    Status(u16),
    #[error("device service link closed")]
    Closed,
    #[error("device service rejected request: {0}")]
    Rejected(String),
}

/// 单个读写器操作错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error(transparent)]
    Behavior(#[from] BehaviorError),
    #[error(transparent)]
    Device(#[from] DeviceServiceError),
    #[error("reader {0} is not managed by this group")]
    UnknownReader(String),
}

/// 多读写器批量操作的失败集合（逐台收集，不中断其他读写器）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError {
    pub failures: Vec<(String, DeviceServiceError)>,
}

impl MultiError {
    pub fn push(&mut self, reader: impl Into<String>, err: DeviceServiceError) {
        self.failures.push((reader.into(), err));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// 无失败时返回 Ok。
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} reader(s) failed:", self.failures.len())?;
        for (reader, err) in &self.failures {
            write!(f, " [{}: {}]", reader, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// 行为切换错误：编译阶段整体拒绝，或下发阶段部分失败。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("reader {reader}: {source}")]
    Rejected {
        reader: String,
        #[source]
        source: BehaviorError,
    },
    #[error(transparent)]
    Push(#[from] MultiError),
}

/// 快照缓存读写错误。
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 配置加载/校验错误。
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 行协议解码错误。
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("empty line")]
    Empty,
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
