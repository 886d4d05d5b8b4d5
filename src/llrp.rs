//! 本服务使用的 LLRP 消息/参数数据结构（已由设备服务完成二进制编解码）。

use serde::{Deserialize, Serialize};

/// Impinj 的 IANA 私有企业号。
pub const IMPINJ_VENDOR_ID: u32 = 25882;

/// 厂商自定义参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Custom {
    pub vendor_id: u32,
    pub subtype: u32,
    #[serde(with = "hex::serde", default)]
    pub data: Vec<u8>,
}

impl Custom {
    pub fn new(vendor_id: u32, subtype: u32, data: Vec<u8>) -> Self {
        Self {
            vendor_id,
            subtype,
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// 标签上报
// ---------------------------------------------------------------------------

/// 96 位 EPC。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epc96 {
    #[serde(with = "hex::serde")]
    pub epc: Vec<u8>,
}

/// 变长 EPC。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpcData {
    #[serde(with = "hex::serde")]
    pub epc: Vec<u8>,
    #[serde(default)]
    pub bit_len: u16,
}

/// C1G2 读操作结果（用于读取 TID）。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct C1G2ReadOpSpecResult {
    /// 0 表示成功。
    pub result: u8,
    pub op_spec_id: u16,
    #[serde(default)]
    pub data: Vec<u16>,
}

impl C1G2ReadOpSpecResult {
    pub const SUCCESS: u8 = 0;

    pub fn is_success(&self) -> bool {
        self.result == Self::SUCCESS
    }

    /// 按大端字节序转为十六进制字符串。
    pub fn data_hex(&self) -> String {
        let bytes: Vec<u8> = self.data.iter().flat_map(|w| w.to_be_bytes()).collect();
        hex::encode(bytes)
    }
}

/// 单条标签上报。可选字段缺失时按 LLRP 规则表示“与上次相同”。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagReportData {
    pub epc_96: Option<Epc96>,
    pub epc_data: Option<EpcData>,
    pub ro_spec_id: Option<u32>,
    pub spec_index: Option<u16>,
    pub inventory_parameter_spec_id: Option<u16>,
    pub antenna_id: Option<u16>,
    pub peak_rssi: Option<i8>,
    pub channel_index: Option<u16>,
    /// 微秒（UTC）。
    pub first_seen_utc: Option<u64>,
    pub first_seen_uptime: Option<u64>,
    /// 微秒（UTC）。
    pub last_seen_utc: Option<u64>,
    pub last_seen_uptime: Option<u64>,
    pub tag_seen_count: Option<u16>,
    pub access_spec_id: Option<u32>,
    pub read_results: Vec<C1G2ReadOpSpecResult>,
    pub custom: Vec<Custom>,
}

impl TagReportData {
    /// 优先取 96 位 EPC，否则取变长 EPC。
    pub fn epc_hex(&self) -> Option<String> {
        if let Some(epc) = &self.epc_96 {
            return Some(hex::encode(&epc.epc));
        }
        self.epc_data
            .as_ref()
            .filter(|data| !data.epc.is_empty())
            .map(|data| hex::encode(&data.epc))
    }

    /// 第一个成功的读结果作为 TID。
    pub fn tid_hex(&self) -> Option<String> {
        self.read_results
            .iter()
            .find(|r| r.is_success() && !r.data.is_empty())
            .map(C1G2ReadOpSpecResult::data_hex)
    }

    /// 上报时间戳（微秒），优先 LastSeen。
    pub fn timestamp_micros(&self) -> Option<u64> {
        self.last_seen_utc.or(self.first_seen_utc)
    }
}

// ---------------------------------------------------------------------------
// 读写器能力
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioCapabilities {
    pub num_gpis: u16,
    pub num_gpos: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralDeviceCapabilities {
    pub max_supported_antennas: u16,
    pub can_set_antenna_properties: bool,
    pub has_utc_clock: bool,
    pub device_manufacturer: u32,
    pub model: u32,
    pub firmware_version: String,
    pub gpio: Option<GpioCapabilities>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlrpCapabilities {
    pub can_do_rf_survey: bool,
    pub can_report_buffer_fill_warning: bool,
    pub supports_client_request_op_spec: bool,
    pub can_do_tag_inventory_state_aware_singulation: bool,
    pub supports_event_and_report_holding: bool,
    pub max_priority_level_supported: u8,
    pub max_ro_specs: u32,
    pub max_specs_per_ro_spec: u32,
    pub max_inventory_parameter_specs_per_ai_spec: u32,
    pub max_access_specs: u32,
    pub max_op_specs_per_access_spec: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmitPowerLevelTableEntry {
    pub index: u16,
    /// dBm × 100。
    pub transmit_power_value: i16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyHopTable {
    pub hop_table_id: u8,
    /// kHz。
    pub frequencies: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedFrequencyTable {
    /// kHz。
    pub frequencies: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyInformation {
    pub hopping: bool,
    pub hop_tables: Vec<FrequencyHopTable>,
    pub fixed_frequency_table: Option<FixedFrequencyTable>,
}

/// 频谱模板：数值越大越能容忍多读写器干扰。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralMask {
    #[default]
    Unknown,
    SingleInterrogator,
    MultiInterrogator,
    DenseInterrogator,
}

impl SpectralMask {
    /// 降低一级；Unknown 已是最低。
    pub fn relax(self) -> Option<Self> {
        match self {
            SpectralMask::DenseInterrogator => Some(SpectralMask::MultiInterrogator),
            SpectralMask::MultiInterrogator => Some(SpectralMask::SingleInterrogator),
            SpectralMask::SingleInterrogator => Some(SpectralMask::Unknown),
            SpectralMask::Unknown => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modulation {
    #[default]
    Fm0,
    Miller2,
    Miller4,
    Miller8,
}

impl Modulation {
    /// 每个数据位对应的反向链路符号数。
    pub fn symbols_per_bit(self) -> u32 {
        match self {
            Modulation::Fm0 => 1,
            Modulation::Miller2 => 2,
            Modulation::Miller4 => 4,
            Modulation::Miller8 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivideRatio {
    #[default]
    Dr8,
    Dr64Over3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardLinkModulation {
    #[default]
    PrAsk,
    SsbAsk,
    DsbAsk,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UhfC1G2RfModeTableEntry {
    pub mode_id: u32,
    pub divide_ratio: DivideRatio,
    pub epc_hag_conformance: bool,
    pub modulation: Modulation,
    pub forward_link_modulation: ForwardLinkModulation,
    pub spectral_mask: SpectralMask,
    /// bps。
    pub backscatter_data_rate: u32,
    /// ×1000（1500 表示 1.5）。
    pub pie_ratio: u32,
    /// 纳秒。
    pub min_tari_time: u32,
    pub max_tari_time: u32,
    pub step_tari_time: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UhfBandCapabilities {
    pub transmit_power_levels: Vec<TransmitPowerLevelTableEntry>,
    pub frequency_information: Option<FrequencyInformation>,
    pub c1g2_rf_modes: Vec<UhfC1G2RfModeTableEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulatoryCapabilities {
    pub country_code: u16,
    pub communications_standard: u16,
    pub uhf_band_capabilities: Option<UhfBandCapabilities>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct C1G2LlrpCapabilities {
    pub supports_block_erase: bool,
    pub supports_block_write: bool,
    pub supports_block_permalock: bool,
    pub supports_tag_recommissioning: bool,
    pub supports_umi_method2: bool,
    pub supports_xpc: bool,
    pub max_num_select_filters_per_query: u16,
}

/// GET_READER_CAPABILITIES_RESPONSE。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetReaderCapabilitiesResponse {
    pub general_device_capabilities: Option<GeneralDeviceCapabilities>,
    pub llrp_capabilities: Option<LlrpCapabilities>,
    pub regulatory_capabilities: Option<RegulatoryCapabilities>,
    pub c1g2_llrp_capabilities: Option<C1G2LlrpCapabilities>,
    pub custom: Vec<Custom>,
}

// ---------------------------------------------------------------------------
// 读写器配置与 ROSpec
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagReportContentSelector {
    pub enable_ro_spec_id: bool,
    pub enable_spec_index: bool,
    pub enable_inventory_parameter_spec_id: bool,
    pub enable_antenna_id: bool,
    pub enable_channel_index: bool,
    pub enable_peak_rssi: bool,
    pub enable_first_seen_timestamp: bool,
    pub enable_last_seen_timestamp: bool,
    pub enable_tag_seen_count: bool,
    pub enable_access_spec_id: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoReportTrigger {
    None,
    #[default]
    UponNTagsOrEndOfAiSpec,
    UponNTagsOrEndOfRoSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoReportSpec {
    pub trigger: RoReportTrigger,
    /// 0 表示仅在 AISpec/ROSpec 结束时上报。
    pub n: u16,
    pub content_selector: TagReportContentSelector,
    #[serde(default)]
    pub custom: Vec<Custom>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderEventType {
    GpiEvent,
    RoSpecEvent,
    ReportBufferFillWarning,
    ReaderException,
    AntennaEvent,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderEventNotificationSpec {
    pub enabled: Vec<ReaderEventType>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveSpec {
    pub periodic: bool,
    pub interval_ms: u32,
}

/// SET_READER_CONFIG。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetReaderConfig {
    pub reset_to_factory_default: bool,
    pub reader_event_notification_spec: Option<ReaderEventNotificationSpec>,
    pub antenna_configurations: Vec<AntennaConfiguration>,
    pub ro_report_spec: Option<RoReportSpec>,
    pub keepalive_spec: Option<KeepaliveSpec>,
    pub hold_events_and_reports_upon_reconnect: Option<bool>,
    pub custom: Vec<Custom>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfTransmitter {
    pub hop_table_id: u16,
    /// 1 起始。
    pub channel_index: u16,
    /// 功率表索引（非功率值）。
    pub transmit_power: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfReceiver {
    pub receiver_sensitivity: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBank {
    Reserved,
    Epc,
    Tid,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct C1G2TagInventoryMask {
    pub memory_bank: MemoryBank,
    pub most_significant_bit: u16,
    #[serde(with = "hex::serde", default)]
    pub mask: Vec<u8>,
    #[serde(default)]
    pub mask_bit_len: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTarget {
    InventoriedS0,
    InventoriedS1,
    InventoriedS2,
    InventoriedS3,
    SelectedFlag,
}

/// 状态感知过滤动作（匹配 / 不匹配）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateAwareFilterAction {
    AssertSlOrADeassertSlOrB,
    AssertSlOrANoop,
    NoopDeassertSlOrB,
    NegateSlOrAbBaNoop,
    DeassertSlOrBAssertSlOrA,
    DeassertSlOrBNoop,
    NoopAssertSlOrA,
    NoopNegateSlOrAbBa,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct C1G2StateAwareFilter {
    pub target: FilterTarget,
    pub action: StateAwareFilterAction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct C1G2Filter {
    pub truncate: bool,
    pub mask: C1G2TagInventoryMask,
    pub state_aware_action: Option<C1G2StateAwareFilter>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct C1G2RfControl {
    pub mode_index: u16,
    /// 纳秒，0 表示使用模式默认值。
    pub tari: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    A,
    B,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlState {
    Sl,
    NotSl,
    Either,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct C1G2StateAwareSingulation {
    pub session_state: SessionState,
    pub sl_state: SlState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct C1G2SingulationControl {
    /// 0..=3。
    pub session: u8,
    pub tag_population: u16,
    /// 毫秒。
    pub tag_transit_time: u32,
    pub state_aware_action: Option<C1G2StateAwareSingulation>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct C1G2InventoryCommand {
    pub tag_inventory_state_aware: bool,
    pub filters: Vec<C1G2Filter>,
    pub rf_control: Option<C1G2RfControl>,
    pub singulation_control: Option<C1G2SingulationControl>,
    pub custom: Vec<Custom>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntennaConfiguration {
    /// 0 表示所有天线。
    pub antenna_id: u16,
    pub rf_receiver: Option<RfReceiver>,
    pub rf_transmitter: Option<RfTransmitter>,
    pub inventory_commands: Vec<C1G2InventoryCommand>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryParameterSpec {
    pub spec_id: u16,
    /// 1 = EPCGlobal Class1 Gen2。
    pub protocol_id: u8,
    #[serde(default)]
    pub antenna_configurations: Vec<AntennaConfiguration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiSpecStopTriggerType {
    #[default]
    Null,
    Duration,
    GpiWithTimeout,
    TagObservation,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSpecStopTrigger {
    pub trigger_type: AiSpecStopTriggerType,
    pub duration_ms: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSpec {
    /// 空或包含 0 表示所有天线。
    pub antenna_ids: Vec<u16>,
    pub stop_trigger: AiSpecStopTrigger,
    pub inventory_parameter_specs: Vec<InventoryParameterSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpiTriggerValue {
    pub port: u16,
    pub event: bool,
    pub timeout_ms: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoSpecStartTrigger {
    Null,
    Immediate,
    Gpi(GpiTriggerValue),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoSpecStopTrigger {
    Null,
    Duration { duration_ms: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoBoundarySpec {
    pub start_trigger: RoSpecStartTrigger,
    pub stop_trigger: RoSpecStopTrigger,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoSpecState {
    #[default]
    Disabled,
    Inactive,
    Active,
}

/// ROSpec：本服务的最终产物，交给设备服务下发。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoSpec {
    pub id: u32,
    pub priority: u8,
    pub state: RoSpecState,
    pub boundary: RoBoundarySpec,
    pub ai_specs: Vec<AiSpec>,
    pub report_spec: Option<RoReportSpec>,
}
