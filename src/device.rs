use crate::behavior::{Behavior, Environment};
use crate::error::BehaviorError;
use crate::impinj::ImpinjDevice;
use crate::llrp::{
    Custom, FrequencyInformation, GetReaderCapabilitiesResponse, KeepaliveSpec, ReaderEventNotificationSpec,
    ReaderEventType, RoReportSpec, RoReportTrigger, RoSpec, SetReaderConfig, TagReportContentSelector,
    TagReportData, TransmitPowerLevelTableEntry, UhfC1G2RfModeTableEntry, IMPINJ_VENDOR_ID,
};

// 保活间隔（毫秒）。
const KEEPALIVE_INTERVAL_MS: u32 = 10_000;

/// 读写器能力模型的统一接口（按厂商选择实现）。
pub trait Device: Send + Sync {
    /// 标准化后的能力表。
    fn basic(&self) -> &BasicDevice;

    /// 生成 SET_READER_CONFIG。
    fn new_config(&self) -> SetReaderConfig;

    /// 将行为编译为 ROSpec。
    fn new_ro_spec(&self, behavior: &Behavior, env: &Environment) -> Result<RoSpec, BehaviorError>;

    /// 处理一批上报：补全模糊空值并做厂商相关的字段整理。
    ///
    /// 同一读写器的上报必须按到达顺序逐批调用。
    fn process_tag_report(&self, cache: &mut LastSeen, tags: &mut [TagReportData], fill_nil: bool) {
        if fill_nil {
            self.basic().fill_ambiguous_nil(cache, tags);
        }
    }

    /// 厂商是否声称每次上报都携带全部已启用字段。
    fn reports_all_fields(&self) -> bool {
        false
    }

    fn vendor_name(&self) -> &'static str {
        "generic"
    }
}

/// 根据能力响应中的厂商号选择实现。
pub fn new_device(caps: &GetReaderCapabilitiesResponse) -> Result<Box<dyn Device>, BehaviorError> {
    let manufacturer = caps
        .general_device_capabilities
        .as_ref()
        .map(|gdc| gdc.device_manufacturer)
        .ok_or_else(|| missing("general device capabilities"))?;
    if manufacturer == IMPINJ_VENDOR_ID {
        return Ok(Box::new(ImpinjDevice::new(caps)?));
    }
    Ok(Box::new(BasicDevice::new(caps)?))
}

pub(crate) fn missing(what: &str) -> BehaviorError {
    BehaviorError::MissingCapabilityInfo(what.to_string())
}

/// 某读写器上一次出现的各字段值（用于补全模糊空值）。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LastSeen {
    pub ro_spec_id: Option<u32>,
    pub spec_index: Option<u16>,
    pub inventory_parameter_spec_id: Option<u16>,
    pub antenna_id: Option<u16>,
    pub peak_rssi: Option<i8>,
    pub channel_index: Option<u16>,
    pub first_seen_utc: Option<u64>,
    pub first_seen_uptime: Option<u64>,
    pub last_seen_utc: Option<u64>,
    pub last_seen_uptime: Option<u64>,
    pub tag_seen_count: Option<u16>,
    pub access_spec_id: Option<u32>,
    pub custom: Vec<Custom>,
}

impl LastSeen {
    /// 按厂商号/子类型补全自定义字段。
    pub(crate) fn fill_custom(&mut self, tag: &mut TagReportData, vendor_id: u32, subtype: u32) {
        let present = tag
            .custom
            .iter()
            .find(|c| c.vendor_id == vendor_id && c.subtype == subtype)
            .cloned();
        match present {
            Some(param) => {
                self.custom
                    .retain(|c| !(c.vendor_id == vendor_id && c.subtype == subtype));
                self.custom.push(param);
            }
            None => {
                if let Some(prev) = self
                    .custom
                    .iter()
                    .find(|c| c.vendor_id == vendor_id && c.subtype == subtype)
                {
                    tag.custom.push(prev.clone());
                }
            }
        }
    }
}

// 字段存在则更新缓存，缺失则从缓存补全。
macro_rules! fill_field {
    ($cache:expr, $tag:expr, $($field:ident),+) => {
        $(
            match $tag.$field {
                Some(value) => $cache.$field = Some(value),
                None => $tag.$field = $cache.$field,
            }
        )+
    };
}

/// 标准 LLRP 读写器的能力模型（构造后不可变）。
#[derive(Clone, Debug)]
pub struct BasicDevice {
    pub(crate) manufacturer: u32,
    pub(crate) model: u32,
    pub(crate) firmware_version: String,
    pub(crate) has_utc_clock: bool,
    /// 按功率升序。
    pub(crate) pwr_min_to_max: Vec<TransmitPowerLevelTableEntry>,
    pub(crate) modes: Vec<UhfC1G2RfModeTableEntry>,
    pub(crate) freq_info: FrequencyInformation,
    pub(crate) n_gpis: u16,
    pub(crate) n_gpos: u16,
    /// 0 表示不限。
    pub(crate) max_specs_per_ro: u32,
    pub(crate) state_aware_singulation: bool,
    pub(crate) supports_event_holding: bool,
    pub(crate) max_select_filters: u16,
    pub(crate) report_selector: TagReportContentSelector,
}

impl BasicDevice {
    /// 解析能力响应；缺少必需字段时返回 MissingCapabilityInfo。
    pub fn new(caps: &GetReaderCapabilitiesResponse) -> Result<Self, BehaviorError> {
        let gdc = caps
            .general_device_capabilities
            .as_ref()
            .ok_or_else(|| missing("general device capabilities"))?;
        let llrp = caps
            .llrp_capabilities
            .as_ref()
            .ok_or_else(|| missing("LLRP capabilities"))?;
        let regulatory = caps
            .regulatory_capabilities
            .as_ref()
            .ok_or_else(|| missing("regulatory capabilities"))?;
        let c1g2 = caps
            .c1g2_llrp_capabilities
            .as_ref()
            .ok_or_else(|| missing("C1G2 LLRP capabilities"))?;
        let uhf = regulatory
            .uhf_band_capabilities
            .as_ref()
            .ok_or_else(|| missing("UHF band capabilities"))?;

        if uhf.transmit_power_levels.is_empty() {
            return Err(missing("transmit power level table"));
        }
        // ROSpec 中模式索引只有 16 位
        let modes: Vec<UhfC1G2RfModeTableEntry> = uhf
            .c1g2_rf_modes
            .iter()
            .filter(|m| u16::try_from(m.mode_id).is_ok())
            .cloned()
            .collect();
        if modes.is_empty() {
            return Err(missing("C1G2 RF mode table"));
        }
        let freq_info = uhf
            .frequency_information
            .clone()
            .ok_or_else(|| missing("frequency information"))?;
        if freq_info.hopping {
            if freq_info.hop_tables.first().map_or(true, |t| t.frequencies.is_empty()) {
                return Err(missing("frequency hop table"));
            }
        } else if freq_info
            .fixed_frequency_table
            .as_ref()
            .map_or(true, |t| t.frequencies.is_empty())
        {
            return Err(missing("fixed frequency table"));
        }

        let gpio = gdc.gpio.unwrap_or_default();
        Ok(Self {
            manufacturer: gdc.device_manufacturer,
            model: gdc.model,
            firmware_version: gdc.firmware_version.clone(),
            has_utc_clock: gdc.has_utc_clock,
            pwr_min_to_max: sorted_power_table(&uhf.transmit_power_levels),
            modes,
            freq_info,
            n_gpis: gpio.num_gpis,
            n_gpos: gpio.num_gpos,
            max_specs_per_ro: llrp.max_specs_per_ro_spec,
            state_aware_singulation: llrp.can_do_tag_inventory_state_aware_singulation,
            supports_event_holding: llrp.supports_event_and_report_holding,
            max_select_filters: c1g2.max_num_select_filters_per_query,
            report_selector: default_report_selector(gdc.has_utc_clock),
        })
    }

    pub fn manufacturer(&self) -> u32 {
        self.manufacturer
    }

    pub fn model(&self) -> u32 {
        self.model
    }

    pub fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    pub fn power_levels(&self) -> &[TransmitPowerLevelTableEntry] {
        &self.pwr_min_to_max
    }

    pub fn rf_modes(&self) -> &[UhfC1G2RfModeTableEntry] {
        &self.modes
    }

    pub fn frequency_information(&self) -> &FrequencyInformation {
        &self.freq_info
    }

    pub fn num_gpis(&self) -> u16 {
        self.n_gpis
    }

    pub fn num_gpos(&self) -> u16 {
        self.n_gpos
    }

    pub fn report_selector(&self) -> TagReportContentSelector {
        self.report_selector
    }

    /// 本服务下发的标准上报配置。
    pub fn ro_report_spec(&self) -> RoReportSpec {
        RoReportSpec {
            trigger: RoReportTrigger::UponNTagsOrEndOfAiSpec,
            n: 1,
            content_selector: self.report_selector,
            custom: Vec::new(),
        }
    }

    pub fn basic_config(&self) -> SetReaderConfig {
        let mut enabled = vec![
            ReaderEventType::RoSpecEvent,
            ReaderEventType::ReaderException,
            ReaderEventType::AntennaEvent,
        ];
        if self.n_gpis > 0 {
            enabled.push(ReaderEventType::GpiEvent);
        }
        SetReaderConfig {
            reset_to_factory_default: false,
            reader_event_notification_spec: Some(ReaderEventNotificationSpec { enabled }),
            antenna_configurations: Vec::new(),
            ro_report_spec: Some(self.ro_report_spec()),
            keepalive_spec: Some(KeepaliveSpec {
                periodic: true,
                interval_ms: KEEPALIVE_INTERVAL_MS,
            }),
            hold_events_and_reports_upon_reconnect: self.supports_event_holding.then_some(false),
            custom: Vec::new(),
        }
    }

    /// 补全 LLRP 的“模糊空值”：已启用字段缺失表示与该读写器上次上报相同。
    pub fn fill_ambiguous_nil(&self, cache: &mut LastSeen, tags: &mut [TagReportData]) {
        let sel = self.report_selector;
        for tag in tags.iter_mut() {
            if sel.enable_ro_spec_id {
                fill_field!(cache, tag, ro_spec_id);
            }
            if sel.enable_spec_index {
                fill_field!(cache, tag, spec_index);
            }
            if sel.enable_inventory_parameter_spec_id {
                fill_field!(cache, tag, inventory_parameter_spec_id);
            }
            if sel.enable_antenna_id {
                fill_field!(cache, tag, antenna_id);
            }
            if sel.enable_peak_rssi {
                fill_field!(cache, tag, peak_rssi);
            }
            if sel.enable_channel_index {
                fill_field!(cache, tag, channel_index);
            }
            if sel.enable_first_seen_timestamp {
                if self.has_utc_clock {
                    fill_field!(cache, tag, first_seen_utc);
                } else {
                    fill_field!(cache, tag, first_seen_uptime);
                }
            }
            if sel.enable_last_seen_timestamp {
                if self.has_utc_clock {
                    fill_field!(cache, tag, last_seen_utc);
                } else {
                    fill_field!(cache, tag, last_seen_uptime);
                }
            }
            if sel.enable_tag_seen_count {
                fill_field!(cache, tag, tag_seen_count);
            }
            if sel.enable_access_spec_id {
                fill_field!(cache, tag, access_spec_id);
            }
        }
    }
}

impl Device for BasicDevice {
    fn basic(&self) -> &BasicDevice {
        self
    }

    fn new_config(&self) -> SetReaderConfig {
        self.basic_config()
    }

    fn new_ro_spec(&self, behavior: &Behavior, env: &Environment) -> Result<RoSpec, BehaviorError> {
        self.build_ro_spec(behavior, env)
    }
}

fn default_report_selector(has_utc_clock: bool) -> TagReportContentSelector {
    TagReportContentSelector {
        enable_ro_spec_id: true,
        enable_spec_index: true,
        enable_inventory_parameter_spec_id: false,
        enable_antenna_id: true,
        enable_channel_index: true,
        enable_peak_rssi: true,
        enable_first_seen_timestamp: has_utc_clock,
        enable_last_seen_timestamp: true,
        enable_tag_seen_count: true,
        enable_access_spec_id: false,
    }
}

/// 拷贝功率表；大多数读写器已升序上报，只有检测到乱序时才排序。
fn sorted_power_table(levels: &[TransmitPowerLevelTableEntry]) -> Vec<TransmitPowerLevelTableEntry> {
    let mut table = levels.to_vec();
    let sorted = table
        .windows(2)
        .all(|w| w[0].transmit_power_value <= w[1].transmit_power_value);
    if !sorted {
        table.sort_by_key(|entry| entry.transmit_power_value);
    }
    table
}
