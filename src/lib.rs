// 模块划分：标签推断、读写器能力与行为编译、行协议管线
pub mod behavior;
pub mod cache;
pub mod config;
pub mod device;
pub mod device_service;
pub mod error;
pub mod impinj;
pub mod inventory;
pub mod link;
pub mod llrp;
pub mod mobility;
pub mod model;
pub mod moving_average;
pub mod pipeline;
pub mod processor;
pub mod proto;
pub mod publish;
pub mod reader_group;
pub mod tag;

pub use behavior::{Behavior, Environment, ScanType};
pub use error::{BehaviorError, GroupError, MultiError};
pub use model::{Event, Location, StaticTag, TagState};
pub use processor::TagProcessor;
pub use reader_group::ReaderGroup;
