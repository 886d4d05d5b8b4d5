use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::behavior::{Behavior, Environment, RO_SPEC_ID};
use crate::device::{new_device, Device, LastSeen};
use crate::device_service::DeviceService;
use crate::error::{DeviceServiceError, GroupError, MultiError, ReaderError};
use crate::llrp::{RoSpec, RoSpecStartTrigger, TagReportData};

/// 单台读写器句柄：能力模型 + 模糊空值缓存。
pub struct TagReader {
    name: String,
    device: Box<dyn Device>,
    last_seen: Mutex<LastSeen>,
    fill_nil: bool,
}

impl TagReader {
    /// `trust_vendor` 为真且设备声称总是上报全部字段时，跳过模糊空值补全。
    pub fn new(name: impl Into<String>, device: Box<dyn Device>, trust_vendor: bool) -> Self {
        let fill_nil = !(trust_vendor && device.reports_all_fields());
        Self {
            name: name.into(),
            device,
            last_seen: Mutex::new(LastSeen::default()),
            fill_nil,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn fills_ambiguous_nil(&self) -> bool {
        self.fill_nil
    }

    /// 按到达顺序处理本读写器的一批上报。
    pub fn process_tag_report(&self, tags: &mut [TagReportData]) {
        let mut cache = self
            .last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.device.process_tag_report(&mut cache, tags, self.fill_nil);
    }
}

struct GroupState {
    behavior: Behavior,
    environment: Environment,
    running: bool,
}

/// 读写器组：统一下发行为，行为切换在编译阶段全有或全无。
pub struct ReaderGroup {
    service: Arc<dyn DeviceService>,
    readers: RwLock<HashMap<String, Arc<TagReader>>>,
    state: Mutex<GroupState>,
    // 串行化增删读写器与行为切换
    changes: Mutex<()>,
    trust_vendor_complete_reports: bool,
}

impl ReaderGroup {
    pub fn new(service: Arc<dyn DeviceService>, trust_vendor_complete_reports: bool) -> Self {
        Self {
            service,
            readers: RwLock::new(HashMap::new()),
            state: Mutex::new(GroupState {
                behavior: Behavior::default(),
                environment: Environment::default(),
                running: false,
            }),
            changes: Mutex::new(()),
            trust_vendor_complete_reports,
        }
    }

    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_change(&self) -> MutexGuard<'_, ()> {
        self.changes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 按名称排序的读写器快照（不持锁调用硬件）。
    fn readers_snapshot(&self) -> Vec<Arc<TagReader>> {
        let mut readers: Vec<Arc<TagReader>> = self
            .readers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        readers.sort_by(|a, b| a.name.cmp(&b.name));
        readers
    }

    pub fn behavior(&self) -> Behavior {
        self.state().behavior.clone()
    }

    pub fn environment(&self) -> Environment {
        self.state().environment
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn reader(&self, name: &str) -> Option<Arc<TagReader>> {
        self.readers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn reader_names(&self) -> Vec<String> {
        self.readers_snapshot()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.readers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 查询能力、编译当前行为并下发；任何一步失败读写器都不会加入组。
    pub fn add_reader(&self, name: &str) -> Result<(), ReaderError> {
        let _guard = self.begin_change();
        let result = self.configure_reader(name);
        match &result {
            Ok(reader) => {
                log::info!("Reader {} added ({})", name, reader.device().vendor_name());
            }
            Err(err) => log::warn!("Reader {} not added: {}", name, err),
        }
        let reader = result?;
        self.readers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), reader);
        Ok(())
    }

    fn configure_reader(&self, name: &str) -> Result<Arc<TagReader>, ReaderError> {
        let caps = self.service.get_capabilities(name)?;
        let device = new_device(&caps)?;
        let (behavior, environment, running) = {
            let state = self.state();
            (state.behavior.clone(), state.environment, state.running)
        };
        let spec = device.new_ro_spec(&behavior, &environment)?;

        self.service.set_config(name, &device.new_config())?;
        self.push_ro_spec(name, &spec, running)?;
        Ok(Arc::new(TagReader::new(
            name,
            device,
            self.trust_vendor_complete_reports,
        )))
    }

    /// 读写器断开：只移出组，不再下发命令。
    pub fn remove_reader(&self, name: &str) -> Option<Arc<TagReader>> {
        let _guard = self.begin_change();
        let removed = self
            .readers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);
        if removed.is_some() {
            log::info!("Reader {} removed", name);
        }
        removed
    }

    /// 先为所有读写器编译，全部成功才采用新行为并下发。
    pub fn set_behavior(&self, behavior: Behavior) -> Result<(), GroupError> {
        let _guard = self.begin_change();
        let environment = self.environment();
        let specs = self.compile_all(&behavior, &environment)?;
        let running = {
            let mut state = self.state();
            state.behavior = behavior;
            state.running
        };
        self.push_all(specs, running)
    }

    /// 环境变化同样需要重新编译（模式选择依赖附近读写器数量）。
    pub fn set_environment(&self, environment: Environment) -> Result<(), GroupError> {
        let _guard = self.begin_change();
        let behavior = self.behavior();
        let specs = self.compile_all(&behavior, &environment)?;
        let running = {
            let mut state = self.state();
            state.environment = environment;
            state.running
        };
        self.push_all(specs, running)
    }

    fn compile_all(
        &self,
        behavior: &Behavior,
        environment: &Environment,
    ) -> Result<Vec<(Arc<TagReader>, RoSpec)>, GroupError> {
        self.readers_snapshot()
            .into_iter()
            .map(|reader| {
                match reader.device().new_ro_spec(behavior, environment) {
                    Ok(spec) => Ok((reader, spec)),
                    Err(source) => {
                        log::warn!("Behavior rejected by {}: {}", reader.name, source);
                        Err(GroupError::Rejected {
                            reader: reader.name.clone(),
                            source,
                        })
                    }
                }
            })
            .collect()
    }

    fn push_all(&self, specs: Vec<(Arc<TagReader>, RoSpec)>, running: bool) -> Result<(), GroupError> {
        let mut errors = MultiError::default();
        for (reader, spec) in specs {
            if let Err(err) = self.push_ro_spec(&reader.name, &spec, running) {
                log::warn!("Pushing ROSpec to {} failed: {}", reader.name, err);
                errors.push(reader.name.clone(), err);
            }
        }
        errors.into_result().map_err(GroupError::from)
    }

    /// 替换读写器上的 ROSpec：删除全部 → 添加 → 启用 →（运行中且无 GPI 触发时）启动。
    fn push_ro_spec(&self, name: &str, spec: &RoSpec, start: bool) -> Result<(), DeviceServiceError> {
        self.service.delete_all_ro_specs(name)?;
        self.service.add_ro_spec(name, spec)?;
        self.service.enable_ro_spec(name, spec.id)?;
        if start && spec.boundary.start_trigger == RoSpecStartTrigger::Null {
            self.service.start_ro_spec(name, spec.id)?;
        }
        Ok(())
    }

    /// 启动所有读写器；GPI 触发的 ROSpec 由硬件自行启动。
    ///
    /// 与增加读写器互斥：正在加入的读写器要么看到运行标志，要么出现在启动列表中。
    pub fn start_all(&self) -> Result<(), MultiError> {
        let _guard = self.begin_change();
        let gpi_triggered = {
            let mut state = self.state();
            state.running = true;
            state.behavior.gpi_trigger.is_some()
        };
        if gpi_triggered {
            return Ok(());
        }
        self.for_each_reader("START_ROSPEC", |name| {
            self.service.start_ro_spec(name, RO_SPEC_ID)
        })
    }

    pub fn stop_all(&self) -> Result<(), MultiError> {
        let _guard = self.begin_change();
        self.state().running = false;
        self.for_each_reader("STOP_ROSPEC", |name| {
            self.service.stop_ro_spec(name, RO_SPEC_ID)
        })
    }

    fn for_each_reader<F>(&self, op: &str, mut call: F) -> Result<(), MultiError>
    where
        F: FnMut(&str) -> Result<(), DeviceServiceError>,
    {
        let mut errors = MultiError::default();
        for reader in self.readers_snapshot() {
            if let Err(err) = call(&reader.name) {
                log::warn!("{} on {} failed: {}", op, reader.name, err);
                errors.push(reader.name.clone(), err);
            }
        }
        errors.into_result()
    }

    /// 交给对应读写器做模糊空值补全与厂商字段整理。
    pub fn process_tag_report(&self, name: &str, tags: &mut [TagReportData]) -> Result<(), ReaderError> {
        let reader = self
            .reader(name)
            .ok_or_else(|| ReaderError::UnknownReader(name.to_string()))?;
        reader.process_tag_report(tags);
        Ok(())
    }
}
