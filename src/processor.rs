use std::sync::Arc;

use crate::config::ProcessorConfig;
use crate::error::ConfigError;
use crate::impinj;
use crate::inventory::InventoryStore;
use crate::llrp::TagReportData;
use crate::mobility::MobilityProfile;
use crate::model::{ArrivedEvent, DepartedEvent, Event, MovedEvent, ReportInfo, StaticTag, TagState};
use crate::tag::Tag;

/// 一次清扫的结果：事件与（有变化时的）快照。
pub type SweepOutcome = (Vec<Event>, Option<Vec<StaticTag>>);

/// 标签位置推断状态机。
///
/// 所有修改都在库存锁内完成，锁内不做任何 I/O。
pub struct TagProcessor {
    store: InventoryStore,
}

impl TagProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            store: InventoryStore::new(config),
        }
    }

    pub fn store(&self) -> &InventoryStore {
        &self.store
    }

    pub fn config(&self) -> Arc<ProcessorConfig> {
        self.store.config()
    }

    /// 校验并原子替换配置；正在处理的上报使用旧配置完成。
    pub fn update_config(&self, config: ProcessorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.store.replace_config(config);
        log::info!("Processor config updated");
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<StaticTag> {
        self.store.snapshot()
    }

    pub fn restore(&self, tags: &[StaticTag]) {
        self.store.restore(tags);
    }

    pub fn tag_count(&self) -> usize {
        self.store.len()
    }

    /// 处理一批标签上报，返回产生的事件。
    ///
    /// 同一读写器的批次必须按到达顺序调用。
    pub fn process_report(&self, mut info: ReportInfo, reports: &[TagReportData]) -> Vec<Event> {
        let mut inventory = self.store.lock();
        let config = inventory.config.clone();
        let profile = config.mobility_profile();

        info.offset_micros = if config.adjust_last_read_on_by_origin {
            origin_offset_micros(&info, reports)
        } else {
            0
        };

        let mut events = Vec::new();
        for report in reports {
            let Some(epc) = report.epc_hex() else {
                log::debug!("Reading from {} has no EPC, skipped", info.device_name);
                continue;
            };
            let tag = inventory.get_or_create(&epc);
            if let Some(event) = process_reading(tag, &info, report, &config, &profile) {
                log::debug!("{}", event);
                events.push(event);
            }
        }
        events
    }

    /// 将超时未读的在场标签标记为离开。
    pub fn aggregate_departed(&self, now_ms: i64) -> SweepOutcome {
        let mut inventory = self.store.lock();
        let expiry = now_ms - inventory.config.departed_threshold_millis();

        let mut events = Vec::new();
        for tag in inventory.tags.values_mut() {
            if tag.state != TagState::Present || tag.last_read >= expiry {
                continue;
            }
            tag.state = TagState::Departed;
            tag.last_departed = now_ms;
            // 重新到达时从零开始竞争位置
            tag.reset_stats();
            events.push(Event::Departed(DepartedEvent {
                epc: tag.epc.clone(),
                tid: tag.tid.clone(),
                timestamp: now_ms,
                last_read: tag.last_read,
                last_known_location: tag.location.clone(),
            }));
        }

        if events.is_empty() {
            return (events, None);
        }
        log::info!("{} tag(s) departed", events.len());
        (events, Some(inventory.snapshot()))
    }

    /// 删除长期离开的标签，返回删除数量。
    pub fn age_out(&self, now_ms: i64) -> (usize, Option<Vec<StaticTag>>) {
        let mut inventory = self.store.lock();
        let expiry = now_ms - inventory.config.age_out_millis();
        let before = inventory.tags.len();
        inventory
            .tags
            .retain(|_, tag| !(tag.state == TagState::Departed && tag.last_read < expiry));
        let removed = before - inventory.tags.len();

        if removed == 0 {
            return (0, None);
        }
        log::info!("Aged out {} tag(s)", removed);
        (removed, Some(inventory.snapshot()))
    }
}

/// 读写器时钟偏差：接收端时刻减去本批次最大的 LastSeen。
fn origin_offset_micros(info: &ReportInfo, reports: &[TagReportData]) -> i64 {
    reports
        .iter()
        .filter_map(timestamp_micros)
        .max()
        .map_or(0, |max_seen| info.origin_micros().saturating_sub(max_seen))
}

/// 超出 i64 范围的时间戳视为缺失。
fn timestamp_micros(report: &TagReportData) -> Option<i64> {
    report
        .timestamp_micros()
        .and_then(|ts| i64::try_from(ts).ok())
}

/// Impinj 峰值 RSSI 优先于标准字段。
fn reading_rssi(report: &TagReportData) -> Option<f64> {
    impinj::custom_peak_rssi(&report.custom).or(report.peak_rssi.map(f64::from))
}

fn process_reading(
    tag: &mut Tag,
    info: &ReportInfo,
    report: &TagReportData,
    config: &ProcessorConfig,
    profile: &MobilityProfile,
) -> Option<Event> {
    let prev_state = tag.state;
    let prev_location = tag.location.clone();

    if let Some(tid) = report.tid_hex() {
        tag.tid = tid;
    }

    let read_ms = match timestamp_micros(report) {
        Some(ts) => ts.saturating_add(info.offset_micros) / 1000,
        None => info.origin_millis(),
    };
    tag.observe_read(read_ms);

    // 没有天线号无法定位；标签保持原状态，Unknown 标签不会离开也不会老化
    let Some(antenna_id) = report.antenna_id else {
        log::debug!(
            "Reading of {} from {} has no antenna, location unchanged",
            tag.epc,
            info.device_name
        );
        return None;
    };
    let location = config.alias(&info.device_name, antenna_id);
    tag.stats_entry(&location).update(reading_rssi(report), read_ms);

    if should_assign(tag, &location, read_ms, profile) {
        tag.location = location;
    }

    match prev_state {
        TagState::Unknown | TagState::Departed => {
            tag.state = TagState::Present;
            tag.last_arrived = tag.last_read;
            Some(Event::Arrived(ArrivedEvent {
                epc: tag.epc.clone(),
                tid: tag.tid.clone(),
                timestamp: tag.last_read,
                location: tag.location.clone(),
            }))
        }
        TagState::Present if !prev_location.is_empty() && tag.location != prev_location => {
            Some(Event::Moved(MovedEvent {
                epc: tag.epc.clone(),
                tid: tag.tid.clone(),
                timestamp: tag.last_read,
                old_location: prev_location,
                new_location: tag.location.clone(),
            }))
        }
        TagState::Present => None,
    }
}

/// 位置竞争：新位置均值需超过当前位置均值加上随时间衰减的权重。
fn should_assign(tag: &Tag, incoming: &str, reference_ms: i64, profile: &MobilityProfile) -> bool {
    if tag.location.is_empty() || tag.location == incoming {
        return true;
    }
    let Some(prev) = tag.stats.get(&tag.location).filter(|s| s.rssi_count() > 0) else {
        return true;
    };
    let Some(next) = tag.stats.get(incoming).filter(|s| s.rssi_count() >= 2) else {
        return false;
    };
    let weight = profile.compute_offset(reference_ms, prev.last_read());
    next.mean_rssi() > prev.mean_rssi() + weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llrp::{C1G2ReadOpSpecResult, Custom, Epc96, IMPINJ_VENDOR_ID};

    const SECOND_MICROS: u64 = 1_000_000;

    fn reading(epc: u8, antenna: u16, rssi: i8, ts_micros: u64) -> TagReportData {
        TagReportData {
            epc_96: Some(Epc96 { epc: vec![epc] }),
            antenna_id: Some(antenna),
            peak_rssi: Some(rssi),
            last_seen_utc: Some(ts_micros),
            ..Default::default()
        }
    }

    fn processor() -> TagProcessor {
        let config = ProcessorConfig {
            adjust_last_read_on_by_origin: false,
            ..Default::default()
        };
        TagProcessor::new(config)
    }

    fn info(device: &str) -> ReportInfo {
        ReportInfo::new(device, 0)
    }

    fn tag_state(p: &TagProcessor, epc: &str) -> (TagState, String, i64, usize) {
        let inventory = p.store().lock();
        let tag = inventory.get(epc).unwrap();
        (tag.state(), tag.location().to_string(), tag.last_read(), tag.rssi_count())
    }

    #[test]
    fn weak_arrival_then_strong_reads_move_once() {
        let p = processor();
        let events = p.process_report(info("R1"), &[reading(1, 1, -80, 1000 * SECOND_MICROS)]);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Arrived(e) if e.location == "R1_1"));

        let mut moved = Vec::new();
        for i in 0..4 {
            let ts = (1000 + i) * SECOND_MICROS;
            moved.extend(p.process_report(info("R2"), &[reading(1, 1, -65, ts)]));
        }
        assert_eq!(moved.len(), 1);
        match &moved[0] {
            Event::Moved(e) => {
                assert_eq!(e.old_location, "R1_1");
                assert_eq!(e.new_location, "R2_1");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(tag_state(&p, "01").1, "R2_1");
    }

    #[test]
    fn second_read_at_same_location_is_silent() {
        let p = processor();
        assert_eq!(p.process_report(info("R1"), &[reading(1, 1, -60, 1000)]).len(), 1);
        assert!(p.process_report(info("R1"), &[reading(1, 1, -60, 2000)]).is_empty());
        assert_eq!(tag_state(&p, "01").0, TagState::Present);
    }

    #[test]
    fn last_read_never_goes_backwards() {
        let p = processor();
        p.process_report(info("R1"), &[reading(1, 1, -60, 5_000_000)]);
        p.process_report(info("R1"), &[reading(1, 1, -60, 1_000_000)]);
        assert_eq!(tag_state(&p, "01").2, 5000);
        p.process_report(info("R1"), &[reading(1, 1, -60, 6_000_000)]);
        assert_eq!(tag_state(&p, "01").2, 6000);
    }

    #[test]
    fn hysteresis_keeps_incumbent_within_weight() {
        let p = processor();
        let ts = 1000 * SECOND_MICROS;
        p.process_report(info("R1"), &[reading(1, 1, -60, ts), reading(1, 1, -60, ts)]);
        // 同一时刻的权重等于阈值 6：-55 > -60 + 6 不成立
        let events = p.process_report(info("R2"), &[reading(1, 1, -55, ts), reading(1, 1, -55, ts)]);
        assert!(events.is_empty());
        let (_, location, _, count) = tag_state(&p, "01");
        assert_eq!(location, "R1_1");
        // 统计仍然更新
        assert_eq!(count, 4);

        let events = p.process_report(info("R2"), &[reading(1, 1, -50, ts), reading(1, 1, -50, ts)]);
        // 第一条后均值约 -53.3 > -54 即移动，第二条不再产生事件
        assert_eq!(events.len(), 1);
        assert_eq!(tag_state(&p, "01").1, "R2_1");
    }

    #[test]
    fn single_competing_read_cannot_move() {
        let p = processor();
        p.process_report(info("R1"), &[reading(1, 1, -90, 1000)]);
        let events = p.process_report(info("R2"), &[reading(1, 1, -30, 2000)]);
        assert!(events.is_empty());
        assert_eq!(tag_state(&p, "01").1, "R1_1");
    }

    #[test]
    fn stale_incumbent_loses_bonus() {
        let p = processor();
        p.process_report(info("R1"), &[reading(1, 1, -60, 0)]);
        // 10 秒后权重为 -0.008*10000 + 10 = -70
        let ts = 10 * SECOND_MICROS;
        let events = p.process_report(info("R2"), &[reading(1, 1, -75, ts), reading(1, 1, -75, ts)]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn missing_antenna_skips_location() {
        let p = processor();
        let mut r = reading(1, 1, -60, 1000);
        r.antenna_id = None;
        assert!(p.process_report(info("R1"), &[r]).is_empty());
        let (state, location, last_read, _) = tag_state(&p, "01");
        assert_eq!(state, TagState::Unknown);
        assert!(location.is_empty());
        assert_eq!(last_read, 1);

        // 清扫只处理在场/离开的标签
        let far_future = 10_000 * 24 * 3600 * 1000;
        assert!(p.aggregate_departed(far_future).0.is_empty());
        assert_eq!(p.age_out(far_future).0, 0);
        assert_eq!(p.tag_count(), 1);

        let events = p.process_report(info("R1"), &[reading(1, 2, -60, 2000)]);
        assert!(matches!(&events[0], Event::Arrived(e) if e.location == "R1_2"));
    }

    #[test]
    fn reading_without_epc_does_not_abort_batch() {
        let p = processor();
        let batch = [TagReportData::default(), reading(2, 1, -60, 1000)];
        let events = p.process_report(info("R1"), &batch);
        assert_eq!(events.len(), 1);
        assert_eq!(p.tag_count(), 1);
    }

    #[test]
    fn departed_sweep_and_rearrival() {
        let mut config = ProcessorConfig::default();
        config.adjust_last_read_on_by_origin = false;
        config.departed_threshold_seconds = 30;
        let p = TagProcessor::new(config);
        p.process_report(info("R1"), &[reading(1, 1, -60, 1000 * SECOND_MICROS)]);

        let now = 1061 * 1000;
        let (events, snapshot) = p.aggregate_departed(now);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Departed(e) => {
                assert_eq!(e.last_known_location, "R1_1");
                assert_eq!(e.timestamp, now);
                assert_eq!(e.last_read, 1_000_000);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(snapshot.unwrap()[0].state, TagState::Departed);
        let (state, _, _, count) = tag_state(&p, "01");
        assert_eq!(state, TagState::Departed);
        assert_eq!(count, 0);

        // 第二次清扫无变化
        let (events, snapshot) = p.aggregate_departed(now + 1000);
        assert!(events.is_empty());
        assert!(snapshot.is_none());

        // 一次弱读即可在新位置到达
        let events = p.process_report(info("R2"), &[reading(1, 1, -90, 1100 * SECOND_MICROS)]);
        assert!(matches!(&events[0], Event::Arrived(e) if e.location == "R2_1"));
    }

    #[test]
    fn recent_tags_are_not_departed() {
        let p = processor();
        p.process_report(info("R1"), &[reading(1, 1, -60, 1000 * SECOND_MICROS)]);
        let (events, snapshot) = p.aggregate_departed(1000 * 1000 + 1000);
        assert!(events.is_empty());
        assert!(snapshot.is_none());
    }

    #[test]
    fn age_out_removes_only_departed() {
        let mut config = ProcessorConfig::default();
        config.adjust_last_read_on_by_origin = false;
        config.age_out_hours = 1;
        config.departed_threshold_seconds = 1;
        let p = TagProcessor::new(config);
        p.process_report(info("R1"), &[reading(1, 1, -60, 0), reading(2, 1, -60, 0)]);
        {
            let mut inventory = p.store().lock();
            inventory.get_or_create("02").state = TagState::Departed;
        }

        let two_hours = 2 * 3600 * 1000;
        let (removed, snapshot) = p.age_out(two_hours);
        assert_eq!(removed, 1);
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].epc, "01");

        let (removed, snapshot) = p.age_out(two_hours);
        assert_eq!(removed, 0);
        assert!(snapshot.is_none());
    }

    #[test]
    fn offset_aligns_reader_clock_with_origin() {
        let p = TagProcessor::new(ProcessorConfig::default());
        // 读写器时钟慢 5 秒
        let origin_ns = 100_000 * 1_000_000;
        let batch = [
            reading(1, 1, -60, 94_000 * 1000),
            reading(2, 1, -60, 95_000 * 1000),
        ];
        p.process_report(ReportInfo::new("R1", origin_ns), &batch);
        assert_eq!(tag_state(&p, "01").2, 99_000);
        assert_eq!(tag_state(&p, "02").2, 100_000);
    }

    #[test]
    fn missing_timestamp_uses_origin() {
        let p = processor();
        let mut r = reading(1, 1, -60, 0);
        r.last_seen_utc = None;
        p.process_report(ReportInfo::new("R1", 42_000_000), &[r]);
        assert_eq!(tag_state(&p, "01").2, 42);
    }

    #[test]
    fn out_of_range_timestamps_fall_back_to_origin() {
        let p = TagProcessor::new(ProcessorConfig::default());
        let batch = [reading(1, 1, -60, u64::MAX), reading(2, 1, -60, i64::MAX as u64)];
        let events = p.process_report(ReportInfo::new("R1", 7_000_000), &batch);
        assert_eq!(events.len(), 2);
        assert_eq!(tag_state(&p, "01").2, 7);
        assert!(tag_state(&p, "02").2 <= 7);
    }

    #[test]
    fn tid_and_alias_are_applied() {
        let mut config = ProcessorConfig::default();
        config.aliases.insert("R1_1".into(), "Dock".into());
        let p = TagProcessor::new(config);
        let mut r = reading(1, 1, -60, 1000);
        r.read_results.push(C1G2ReadOpSpecResult {
            result: 0,
            op_spec_id: 1,
            data: vec![0xE280],
        });
        let events = p.process_report(info("R1"), &[r]);
        match &events[0] {
            Event::Arrived(e) => {
                assert_eq!(e.location, "Dock");
                assert_eq!(e.tid, "e280");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn vendor_rssi_takes_precedence() {
        let p = processor();
        let mut r = reading(1, 1, -60, 1000);
        r.custom.push(Custom::new(
            IMPINJ_VENDOR_ID,
            impinj::subtype::PEAK_RSSI,
            (-7000i16).to_be_bytes().to_vec(),
        ));
        p.process_report(info("R1"), &[r]);
        let inventory = p.store().lock();
        let stats = inventory.get("01").unwrap().stats_at("R1_1").unwrap();
        assert_eq!(stats.mean_rssi(), -70.0);
    }

    #[test]
    fn snapshot_restores_state_and_mean() {
        let p = processor();
        p.process_report(
            info("R1"),
            &[reading(1, 1, -60, 1000), reading(1, 1, -70, 2000), reading(2, 2, -50, 3000)],
        );
        let snapshot = p.snapshot();
        let other = processor();
        other.restore(&snapshot);
        assert_eq!(other.tag_count(), 2);
        let (state, location, last_read, count) = tag_state(&other, "01");
        assert_eq!(state, TagState::Present);
        assert_eq!(location, "R1_1");
        assert_eq!(last_read, 2);
        assert_eq!(count, 1);
        let inventory = other.store().lock();
        let stats = inventory.get("01").unwrap().stats_at("R1_1").unwrap();
        assert_eq!(stats.mean_rssi(), -65.0);
    }

    #[test]
    fn invalid_config_update_is_rejected() {
        let p = processor();
        let mut bad = ProcessorConfig::default();
        bad.departed_threshold_seconds = 0;
        assert!(p.update_config(bad).is_err());
        assert!(!p.config().adjust_last_read_on_by_origin);

        let mut good = ProcessorConfig::default();
        good.departed_threshold_seconds = 1;
        p.update_config(good).unwrap();
        assert_eq!(p.config().departed_threshold_seconds, 1);
    }
}
