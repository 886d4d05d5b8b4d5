use crate::behavior::{Behavior, Environment, ScanType};
use crate::device::{missing, BasicDevice, Device, LastSeen};
use crate::error::BehaviorError;
use crate::llrp::{
    AiSpecStopTrigger, C1G2InventoryCommand, C1G2ReadOpSpecResult, Custom, RoReportSpec, RoSpec,
    SetReaderConfig, TagReportData, IMPINJ_VENDOR_ID,
};

/// Impinj 自定义参数子类型。
pub mod subtype {
    pub const INVENTORY_SEARCH_MODE: u32 = 23;
    pub const TAG_REPORT_CONTENT_SELECTOR: u32 = 50;
    pub const ENABLE_SERIALIZED_TID: u32 = 51;
    pub const ENABLE_PEAK_RSSI: u32 = 53;
    pub const SERIALIZED_TID: u32 = 55;
    pub const PEAK_RSSI: u32 = 57;
}

/// 模式 ID 不低于此值的是 Autoset 占位项，其参数无意义。
pub const AUTOSET_MIN_MODE_ID: u32 = 1000;

// LLRP Custom 参数的类型号。
const CUSTOM_PARAM_TYPE: u16 = 1023;

/// ImpinjInventorySearchMode 取值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum SearchMode {
    SingleTarget = 1,
    DualTarget = 2,
}

impl SearchMode {
    pub fn for_scan(scan_type: ScanType) -> Self {
        match scan_type {
            ScanType::Normal => SearchMode::SingleTarget,
            ScanType::Fast | ScanType::Deep => SearchMode::DualTarget,
        }
    }

    pub fn to_custom(self) -> Custom {
        Custom::new(
            IMPINJ_VENDOR_ID,
            subtype::INVENTORY_SEARCH_MODE,
            (self as u16).to_be_bytes().to_vec(),
        )
    }
}

/// 取 Impinj 峰值 RSSI（dBm），数据为 dBm×100 的 i16。
pub fn custom_peak_rssi(custom: &[Custom]) -> Option<f64> {
    custom
        .iter()
        .find(|c| c.vendor_id == IMPINJ_VENDOR_ID && c.subtype == subtype::PEAK_RSSI)
        .and_then(|c| c.data.get(..2))
        .map(|b| i16::from_be_bytes([b[0], b[1]]) as f64 / 100.0)
}

/// 解析 ImpinjSerializedTID：u16 字数 + 字数据。
pub fn serialized_tid(custom: &[Custom]) -> Option<Vec<u16>> {
    let param = custom
        .iter()
        .find(|c| c.vendor_id == IMPINJ_VENDOR_ID && c.subtype == subtype::SERIALIZED_TID)?;
    let (count, rest) = param.data.split_first_chunk::<2>()?;
    let count = u16::from_be_bytes(*count) as usize;
    if count == 0 || rest.len() < count * 2 {
        return None;
    }
    Some(
        rest.chunks_exact(2)
            .take(count)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect(),
    )
}

/// 按 LLRP TLV 格式编码 Custom 参数（用于嵌套在另一个 Custom 中）。
fn encode_custom(param: &Custom) -> Vec<u8> {
    let len = (12 + param.data.len()) as u16;
    let mut out = Vec::with_capacity(len as usize);
    out.extend_from_slice(&CUSTOM_PARAM_TYPE.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&param.vendor_id.to_be_bytes());
    out.extend_from_slice(&param.subtype.to_be_bytes());
    out.extend_from_slice(&param.data);
    out
}

fn enable_flag(subtype: u32, enabled: bool) -> Custom {
    Custom::new(IMPINJ_VENDOR_ID, subtype, (enabled as u16).to_be_bytes().to_vec())
}

/// Impinj 读写器：标准能力模型 + 厂商修正与扩展。
#[derive(Clone, Debug)]
pub struct ImpinjDevice {
    basic: BasicDevice,
}

impl ImpinjDevice {
    pub fn new(caps: &crate::llrp::GetReaderCapabilitiesResponse) -> Result<Self, BehaviorError> {
        let mut basic = BasicDevice::new(caps)?;
        basic.modes.retain(|m| m.mode_id < AUTOSET_MIN_MODE_ID);
        if basic.modes.is_empty() {
            return Err(missing("C1G2 RF mode table"));
        }
        // 固件上报的是反向链路频率而非数据速率
        for mode in basic.modes.iter_mut() {
            mode.backscatter_data_rate /= mode.modulation.symbols_per_bit();
        }
        Ok(Self { basic })
    }

    fn report_selector(fast_id: bool) -> Custom {
        let mut data = encode_custom(&enable_flag(subtype::ENABLE_PEAK_RSSI, true));
        data.extend(encode_custom(&enable_flag(subtype::ENABLE_SERIALIZED_TID, fast_id)));
        Custom::new(IMPINJ_VENDOR_ID, subtype::TAG_REPORT_CONTENT_SELECTOR, data)
    }

    fn report_spec(&self, fast_id: bool) -> RoReportSpec {
        let mut spec = self.basic.ro_report_spec();
        spec.custom.push(Self::report_selector(fast_id));
        spec
    }
}

impl Device for ImpinjDevice {
    fn basic(&self) -> &BasicDevice {
        &self.basic
    }

    fn new_config(&self) -> SetReaderConfig {
        let mut config = self.basic.basic_config();
        config.ro_report_spec = Some(self.report_spec(false));
        config
    }

    fn new_ro_spec(&self, behavior: &Behavior, env: &Environment) -> Result<RoSpec, BehaviorError> {
        let basic = &self.basic;
        basic.start_trigger(behavior)?;
        let transmitter = basic.transmit(behavior)?;
        let rf_control = basic.rf_control(env)?;
        let session = behavior.scan_type.session();

        // 搜索模式替代标准的状态感知盘点
        let command = C1G2InventoryCommand {
            tag_inventory_state_aware: false,
            filters: Vec::new(),
            rf_control: Some(rf_control),
            singulation_control: Some(basic.singulation_control(session, env, None)),
            custom: vec![SearchMode::for_scan(behavior.scan_type).to_custom()],
        };
        let ai_spec = basic.ai_spec(1, AiSpecStopTrigger::default(), transmitter, command);

        let mut spec = basic.ro_spec_shell(behavior, vec![ai_spec])?;
        let fast_id = behavior.impinj_options.is_some_and(|o| o.fast_id);
        spec.report_spec = Some(self.report_spec(fast_id));
        Ok(spec)
    }

    fn process_tag_report(&self, cache: &mut LastSeen, tags: &mut [TagReportData], fill_nil: bool) {
        if fill_nil {
            self.basic.fill_ambiguous_nil(cache, tags);
        }
        for tag in tags.iter_mut() {
            if fill_nil {
                cache.fill_custom(tag, IMPINJ_VENDOR_ID, subtype::PEAK_RSSI);
            }
            if tag.read_results.is_empty() {
                if let Some(data) = serialized_tid(&tag.custom) {
                    tag.read_results.push(C1G2ReadOpSpecResult {
                        result: C1G2ReadOpSpecResult::SUCCESS,
                        op_spec_id: 0,
                        data,
                    });
                }
            }
        }
    }

    fn reports_all_fields(&self) -> bool {
        true
    }

    fn vendor_name(&self) -> &'static str {
        "impinj"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::ImpinjOptions;
    use crate::device::new_device;
    use crate::device::tests::{mode, sample_caps};
    use crate::llrp::{GetReaderCapabilitiesResponse, Modulation, SpectralMask};

    fn impinj_caps() -> GetReaderCapabilitiesResponse {
        let mut caps = sample_caps();
        let gdc = caps.general_device_capabilities.as_mut().unwrap();
        gdc.device_manufacturer = IMPINJ_VENDOR_ID;
        let uhf = caps
            .regulatory_capabilities
            .as_mut()
            .unwrap()
            .uhf_band_capabilities
            .as_mut()
            .unwrap();
        let mut miller = mode(3, SpectralMask::DenseInterrogator, 25_000, 2000, 250_000);
        miller.modulation = Modulation::Miller4;
        uhf.c1g2_rf_modes = vec![
            mode(0, SpectralMask::MultiInterrogator, 6250, 1500, 640_000),
            miller,
            mode(1000, SpectralMask::DenseInterrogator, 0, 0, 0),
            mode(1002, SpectralMask::DenseInterrogator, 0, 0, 0),
        ];
        caps
    }

    #[test]
    fn discards_autoset_modes_and_fixes_rates() {
        let device = ImpinjDevice::new(&impinj_caps()).unwrap();
        let modes = device.basic().rf_modes();
        assert_eq!(modes.len(), 2);
        assert_eq!(modes[0].backscatter_data_rate, 640_000);
        assert_eq!(modes[1].backscatter_data_rate, 62_500);
    }

    #[test]
    fn only_autoset_modes_is_missing_info() {
        let mut caps = impinj_caps();
        caps.regulatory_capabilities
            .as_mut()
            .unwrap()
            .uhf_band_capabilities
            .as_mut()
            .unwrap()
            .c1g2_rf_modes = vec![mode(1000, SpectralMask::DenseInterrogator, 0, 0, 0)];
        assert!(matches!(
            ImpinjDevice::new(&caps),
            Err(BehaviorError::MissingCapabilityInfo(_))
        ));
    }

    #[test]
    fn vendor_is_selected_by_manufacturer() {
        let device = new_device(&impinj_caps()).unwrap();
        assert_eq!(device.vendor_name(), "impinj");
        assert!(device.reports_all_fields());
    }

    #[test]
    fn deep_scan_uses_search_mode() {
        let device = ImpinjDevice::new(&impinj_caps()).unwrap();
        let behavior = Behavior {
            scan_type: ScanType::Deep,
            impinj_options: Some(ImpinjOptions { fast_id: true }),
            ..Default::default()
        };
        let spec = device.new_ro_spec(&behavior, &Environment::default()).unwrap();
        assert_eq!(spec.ai_specs.len(), 1);
        let command = &spec.ai_specs[0].inventory_parameter_specs[0].antenna_configurations[0]
            .inventory_commands[0];
        assert!(!command.tag_inventory_state_aware);
        assert!(command.filters.is_empty());
        assert_eq!(command.singulation_control.unwrap().session, 2);
        assert_eq!(command.custom, vec![SearchMode::DualTarget.to_custom()]);

        let selector = &spec.report_spec.unwrap().custom[0];
        assert_eq!(selector.subtype, subtype::TAG_REPORT_CONTENT_SELECTOR);
        // 第二个嵌套参数是 EnableSerializedTID，值为 1
        assert_eq!(&selector.data[26..28], &[0, 1]);
    }

    #[test]
    fn normal_scan_is_single_target() {
        let device = ImpinjDevice::new(&impinj_caps()).unwrap();
        let spec = device
            .new_ro_spec(&Behavior::default(), &Environment::default())
            .unwrap();
        let command = &spec.ai_specs[0].inventory_parameter_specs[0].antenna_configurations[0]
            .inventory_commands[0];
        assert_eq!(command.custom[0].data, vec![0, 1]);
        assert_eq!(command.singulation_control.unwrap().session, 1);
    }

    #[test]
    fn encodes_nested_custom_header() {
        let bytes = encode_custom(&enable_flag(subtype::ENABLE_PEAK_RSSI, true));
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[..4], &[0x03, 0xFF, 0x00, 0x0E]);
        assert_eq!(&bytes[4..8], &IMPINJ_VENDOR_ID.to_be_bytes());
        assert_eq!(&bytes[12..], &[0, 1]);
    }

    #[test]
    fn peak_rssi_custom_is_decoded_and_filled() {
        let device = ImpinjDevice::new(&impinj_caps()).unwrap();
        let rssi = Custom::new(IMPINJ_VENDOR_ID, subtype::PEAK_RSSI, (-6150i16).to_be_bytes().to_vec());
        let mut cache = LastSeen::default();
        let mut tags = vec![
            TagReportData {
                custom: vec![rssi],
                ..Default::default()
            },
            TagReportData::default(),
        ];
        device.process_tag_report(&mut cache, &mut tags, true);
        assert_eq!(custom_peak_rssi(&tags[0].custom), Some(-61.5));
        assert_eq!(custom_peak_rssi(&tags[1].custom), Some(-61.5));

        let mut untouched = vec![TagReportData::default()];
        device.process_tag_report(&mut LastSeen::default(), &mut untouched, false);
        assert_eq!(custom_peak_rssi(&untouched[0].custom), None);
    }

    #[test]
    fn serialized_tid_becomes_read_result() {
        let device = ImpinjDevice::new(&impinj_caps()).unwrap();
        let tid = Custom::new(
            IMPINJ_VENDOR_ID,
            subtype::SERIALIZED_TID,
            vec![0x00, 0x02, 0xE2, 0x80, 0x11, 0x60],
        );
        let mut tags = vec![TagReportData {
            custom: vec![tid],
            ..Default::default()
        }];
        device.process_tag_report(&mut LastSeen::default(), &mut tags, false);
        assert_eq!(tags[0].tid_hex().as_deref(), Some("e2801160"));
    }

    #[test]
    fn truncated_serialized_tid_is_ignored() {
        let tid = Custom::new(IMPINJ_VENDOR_ID, subtype::SERIALIZED_TID, vec![0x00, 0x04, 0xE2]);
        assert_eq!(serialized_tid(&[tid]), None);
    }
}
