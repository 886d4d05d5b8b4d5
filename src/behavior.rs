use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::device::BasicDevice;
use crate::error::BehaviorError;
use crate::llrp::{
    AiSpec, AiSpecStopTrigger, AiSpecStopTriggerType, AntennaConfiguration, C1G2Filter, C1G2InventoryCommand,
    C1G2RfControl, C1G2SingulationControl, C1G2StateAwareFilter, C1G2StateAwareSingulation,
    C1G2TagInventoryMask, FilterTarget, GpiTriggerValue, InventoryParameterSpec, MemoryBank, RfTransmitter,
    RoBoundarySpec, RoSpec, RoSpecStartTrigger, RoSpecState, RoSpecStopTrigger, SessionState, SlState,
    SpectralMask, StateAwareFilterAction, UhfC1G2RfModeTableEntry,
};

/// 本服务管理的唯一 ROSpec ID。
pub const RO_SPEC_ID: u32 = 1;
/// EPCGlobal Class1 Gen2。
pub const C1G2_PROTOCOL_ID: u8 = 1;
/// 双目标盘点时每个 AISpec 的时长。
pub const DUAL_TARGET_AI_SPEC_MS: u32 = 500;

const DEFAULT_TAG_POPULATION: u16 = 32;

// 最优前向链路：Tari 6.25us，PIE 1.5。
const BEST_FORWARD_NS: f64 = 6250.0 * 2.5;
// 最优反向链路：FM0 @ 640kbps。
const BEST_BACKSCATTER_BPS: f64 = 640_000.0;

/// 扫描类型：密度与选择性的折中。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Fast,
    #[default]
    Normal,
    Deep,
}

impl ScanType {
    /// 对应的 Gen2 会话。
    pub fn session(self) -> u8 {
        match self {
            ScanType::Fast => 0,
            ScanType::Normal => 1,
            ScanType::Deep => 2,
        }
    }
}

/// GPI 启动触发。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpiTrigger {
    /// 1 起始的端口号。
    pub port: u16,
    /// true 表示高电平触发。
    pub event: bool,
    #[serde(default)]
    pub timeout_ms: u32,
}

/// Impinj 专有选项。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpinjOptions {
    /// 随 EPC 一并上报 TID（FastID）。
    pub fast_id: bool,
}

/// 期望的读写器行为（与硬件无关）。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Behavior {
    pub scan_type: ScanType,
    /// 最大发射功率（dBm × 100）。
    pub max_power: i16,
    /// 0 表示一直运行。
    pub duration_ms: u32,
    pub gpi_trigger: Option<GpiTrigger>,
    /// kHz；仅对定频区域生效。
    pub frequencies: Vec<u32>,
    pub impinj_options: Option<ImpinjOptions>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            scan_type: ScanType::Normal,
            max_power: 3000,
            duration_ms: 0,
            gpi_trigger: None,
            frequencies: Vec::new(),
            impinj_options: None,
        }
    }
}

/// 环境提示，用于 RF 模式与防碰撞参数选择。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub num_nearby_readers: u32,
    pub tag_population: u16,
    /// 毫秒。
    pub tag_transit_time_ms: u32,
}

/// 根据附近读写器数量估算需要的频谱模板等级。
pub fn target_mask(num_readers: u32, num_frequencies: usize) -> SpectralMask {
    match num_readers {
        0 => SpectralMask::Unknown,
        1 => SpectralMask::SingleInterrogator,
        n => {
            let n = n as usize;
            if num_frequencies == 0 || n >= num_frequencies {
                return SpectralMask::DenseInterrogator;
            }
            let density = n as f64 / num_frequencies as f64;
            if density > 0.5 {
                SpectralMask::DenseInterrogator
            } else {
                SpectralMask::MultiInterrogator
            }
        }
    }
}

/// 模式吞吐评分（前向/反向链路各占一半，归一化到最优值）。
pub fn mode_score(mode: &UhfC1G2RfModeTableEntry) -> f64 {
    let forward_ns = mode.min_tari_time as f64 * (1.0 + mode.pie_ratio as f64 / 1000.0);
    let forward = if forward_ns > 0.0 {
        BEST_FORWARD_NS / forward_ns
    } else {
        0.0
    };
    let backscatter = mode.backscatter_data_rate as f64 / BEST_BACKSCATTER_BPS;
    0.5 * forward + 0.5 * backscatter
}

impl BasicDevice {
    /// 查找不超过目标的最大功率；低于最小值时返回最小值。
    ///
    /// 返回（功率表索引, 功率值），调用方负责判断结果是否超出目标。
    pub fn find_power(&self, target: i16) -> (u16, i16) {
        let table = &self.pwr_min_to_max;
        let mut i = table.partition_point(|entry| entry.transmit_power_value < target);
        if i == table.len() || (table[i].transmit_power_value != target && i != 0) {
            i -= 1;
        }
        (table[i].index, table[i].transmit_power_value)
    }

    /// 可用频点数（跳频取第一张跳频表）。
    pub fn num_frequencies(&self) -> usize {
        if self.freq_info.hopping {
            self.freq_info
                .hop_tables
                .first()
                .map_or(0, |t| t.frequencies.len())
        } else {
            self.freq_info
                .fixed_frequency_table
                .as_ref()
                .map_or(0, |t| t.frequencies.len())
        }
    }

    /// 在满足频谱模板的模式中选评分最高者；找不到时逐级放宽模板。
    pub fn find_best_mode(&self, env: &Environment) -> &UhfC1G2RfModeTableEntry {
        let mut target = target_mask(env.num_nearby_readers, self.num_frequencies());
        loop {
            let mut best: Option<(&UhfC1G2RfModeTableEntry, f64)> = None;
            for mode in self.modes.iter().filter(|m| m.spectral_mask >= target) {
                let score = mode_score(mode);
                let better = match best {
                    Some((_, best_score)) => {
                        score.partial_cmp(&best_score) == Some(Ordering::Greater)
                    }
                    None => true,
                };
                if better {
                    best = Some((mode, score));
                }
            }
            if let Some((mode, _)) = best {
                return mode;
            }
            match target.relax() {
                Some(next) => target = next,
                None => break,
            }
        }
        // 构造时保证模式表非空，Unknown 必然能匹配
        &self.modes[0]
    }

    /// 选择跳频表/信道与功率索引。
    pub fn transmit(&self, behavior: &Behavior) -> Result<RfTransmitter, BehaviorError> {
        let (power_index, power) = self.find_power(behavior.max_power);
        if power > behavior.max_power {
            return Err(BehaviorError::Unsatisfiable(format!(
                "requested power {} is below the device minimum {}",
                behavior.max_power, power
            )));
        }

        if self.freq_info.hopping {
            // 假定功率在所有跳频频点都有效
            let table = self
                .freq_info
                .hop_tables
                .first()
                .ok_or_else(|| BehaviorError::MissingCapabilityInfo("frequency hop table".into()))?;
            return Ok(RfTransmitter {
                hop_table_id: table.hop_table_id as u16,
                channel_index: 1,
                transmit_power: power_index,
            });
        }

        let fixed = self
            .freq_info
            .fixed_frequency_table
            .as_ref()
            .ok_or_else(|| BehaviorError::MissingCapabilityInfo("fixed frequency table".into()))?;
        let channel = if behavior.frequencies.is_empty() {
            0
        } else {
            behavior
                .frequencies
                .iter()
                .find_map(|wanted| fixed.frequencies.iter().position(|f| f == wanted))
                .ok_or_else(|| {
                    BehaviorError::Unsatisfiable(format!(
                        "none of the requested frequencies {:?} are available",
                        behavior.frequencies
                    ))
                })?
        };
        Ok(RfTransmitter {
            hop_table_id: 0,
            // LLRP 信道索引从 1 开始
            channel_index: channel as u16 + 1,
            transmit_power: power_index,
        })
    }

    pub fn start_trigger(&self, behavior: &Behavior) -> Result<RoSpecStartTrigger, BehaviorError> {
        let Some(gpi) = behavior.gpi_trigger else {
            return Ok(RoSpecStartTrigger::Null);
        };
        if self.n_gpis == 0 {
            return Err(BehaviorError::Unsatisfiable(
                "GPI trigger requested but the device has no GPIs".into(),
            ));
        }
        if gpi.port == 0 || gpi.port > self.n_gpis {
            return Err(BehaviorError::Unsatisfiable(format!(
                "GPI port {} is out of range 1..={}",
                gpi.port, self.n_gpis
            )));
        }
        Ok(RoSpecStartTrigger::Gpi(GpiTriggerValue {
            port: gpi.port,
            event: gpi.event,
            timeout_ms: gpi.timeout_ms,
        }))
    }

    fn stop_trigger(behavior: &Behavior) -> RoSpecStopTrigger {
        if behavior.duration_ms > 0 {
            RoSpecStopTrigger::Duration {
                duration_ms: behavior.duration_ms,
            }
        } else {
            RoSpecStopTrigger::Null
        }
    }

    /// 双目标盘点需要状态感知且允许同一 RO 中有两个 spec。
    pub fn supports_dual_target(&self) -> bool {
        self.state_aware_singulation && (self.max_specs_per_ro == 0 || self.max_specs_per_ro >= 2)
    }

    pub(crate) fn singulation_control(
        &self,
        session: u8,
        env: &Environment,
        state_aware_action: Option<C1G2StateAwareSingulation>,
    ) -> C1G2SingulationControl {
        C1G2SingulationControl {
            session,
            tag_population: if env.tag_population > 0 {
                env.tag_population
            } else {
                DEFAULT_TAG_POPULATION
            },
            tag_transit_time: env.tag_transit_time_ms,
            state_aware_action,
        }
    }

    /// 按环境选出的 RF 模式。
    pub(crate) fn rf_control(&self, env: &Environment) -> Result<C1G2RfControl, BehaviorError> {
        let mode = self.find_best_mode(env);
        let mode_index = u16::try_from(mode.mode_id).map_err(|_| {
            BehaviorError::Unsatisfiable(format!("RF mode {} out of range", mode.mode_id))
        })?;
        Ok(C1G2RfControl {
            mode_index,
            tari: 0,
        })
    }

    /// 不支持 Select 过滤的读写器只能依赖会话标志自然回落。
    fn rearm_filters(&self, session: u8) -> Vec<C1G2Filter> {
        if self.max_select_filters == 0 {
            log::debug!("Reader has no select filter support, deep scan without rearm");
            return Vec::new();
        }
        vec![rearm_filter(session)]
    }

    /// 单个 AISpec（所有天线）。
    pub(crate) fn ai_spec(
        &self,
        spec_id: u16,
        stop_trigger: AiSpecStopTrigger,
        rf_transmitter: RfTransmitter,
        command: C1G2InventoryCommand,
    ) -> AiSpec {
        AiSpec {
            antenna_ids: vec![0],
            stop_trigger,
            inventory_parameter_specs: vec![InventoryParameterSpec {
                spec_id,
                protocol_id: C1G2_PROTOCOL_ID,
                antenna_configurations: vec![AntennaConfiguration {
                    antenna_id: 0,
                    rf_receiver: None,
                    rf_transmitter: Some(rf_transmitter),
                    inventory_commands: vec![command],
                }],
            }],
        }
    }

    /// 组装 ROSpec 骨架（触发器、上报配置）。
    pub(crate) fn ro_spec_shell(&self, behavior: &Behavior, ai_specs: Vec<AiSpec>) -> Result<RoSpec, BehaviorError> {
        Ok(RoSpec {
            id: RO_SPEC_ID,
            priority: 0,
            state: RoSpecState::Disabled,
            boundary: RoBoundarySpec {
                start_trigger: self.start_trigger(behavior)?,
                stop_trigger: Self::stop_trigger(behavior),
            },
            ai_specs,
            report_spec: Some(self.ro_report_spec()),
        })
    }

    /// 标准 LLRP 的行为编译。
    pub fn build_ro_spec(&self, behavior: &Behavior, env: &Environment) -> Result<RoSpec, BehaviorError> {
        // 先校验触发器，避免无效行为走完整个搜索
        self.start_trigger(behavior)?;
        let transmitter = self.transmit(behavior)?;
        let rf_control = self.rf_control(env)?;
        let session = behavior.scan_type.session();
        let run_forever = AiSpecStopTrigger::default();

        let ai_specs = match behavior.scan_type {
            ScanType::Fast | ScanType::Normal => {
                let command = C1G2InventoryCommand {
                    tag_inventory_state_aware: false,
                    filters: Vec::new(),
                    rf_control: Some(rf_control),
                    singulation_control: Some(self.singulation_control(session, env, None)),
                    custom: Vec::new(),
                };
                vec![self.ai_spec(1, run_forever, transmitter, command)]
            }
            ScanType::Deep if self.supports_dual_target() => {
                // 先盘点 A 态，再盘点 B 态，交替进行
                let alternate = AiSpecStopTrigger {
                    trigger_type: AiSpecStopTriggerType::Duration,
                    duration_ms: DUAL_TARGET_AI_SPEC_MS,
                };
                [SessionState::A, SessionState::B]
                    .into_iter()
                    .enumerate()
                    .map(|(i, state)| {
                        let command = C1G2InventoryCommand {
                            tag_inventory_state_aware: true,
                            filters: Vec::new(),
                            rf_control: Some(rf_control),
                            singulation_control: Some(self.singulation_control(
                                session,
                                env,
                                Some(C1G2StateAwareSingulation {
                                    session_state: state,
                                    sl_state: SlState::Either,
                                }),
                            )),
                            custom: Vec::new(),
                        };
                        self.ai_spec(i as u16 + 1, alternate, transmitter, command)
                    })
                    .collect()
            }
            ScanType::Deep => {
                // 单 spec：Select 将会话标志翻回 A，再盘点 A 态
                let command = C1G2InventoryCommand {
                    tag_inventory_state_aware: self.state_aware_singulation,
                    filters: self.rearm_filters(session),
                    rf_control: Some(rf_control),
                    singulation_control: Some(self.singulation_control(
                        session,
                        env,
                        self.state_aware_singulation.then_some(C1G2StateAwareSingulation {
                            session_state: SessionState::A,
                            sl_state: SlState::Either,
                        }),
                    )),
                    custom: Vec::new(),
                };
                vec![self.ai_spec(1, run_forever, transmitter, command)]
            }
        };

        self.ro_spec_shell(behavior, ai_specs)
    }
}

/// 匹配所有标签（空掩码），将指定会话标志置为 A。
fn rearm_filter(session: u8) -> C1G2Filter {
    let target = match session {
        0 => FilterTarget::InventoriedS0,
        1 => FilterTarget::InventoriedS1,
        2 => FilterTarget::InventoriedS2,
        _ => FilterTarget::InventoriedS3,
    };
    C1G2Filter {
        truncate: false,
        mask: C1G2TagInventoryMask {
            memory_bank: MemoryBank::Epc,
            most_significant_bit: 0x20,
            mask: Vec::new(),
            mask_bit_len: 0,
        },
        state_aware_action: Some(C1G2StateAwareFilter {
            target,
            action: StateAwareFilterAction::AssertSlOrADeassertSlOrB,
        }),
    }
}
