use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ProcessorConfig;
use crate::model::StaticTag;
use crate::tag::Tag;

/// 库存锁内的数据：标签表 + 当前生效配置。
///
/// 配置与标签共用一把锁，热更新时整体替换指针。
pub struct Inventory {
    pub(crate) tags: HashMap<String, Tag>,
    pub(crate) config: Arc<ProcessorConfig>,
}

impl Inventory {
    /// 获取或创建标签（新建时状态为 Unknown）。
    pub(crate) fn get_or_create(&mut self, epc: &str) -> &mut Tag {
        self.tags
            .entry(epc.to_string())
            .or_insert_with(|| Tag::new(epc))
    }

    pub fn get(&self, epc: &str) -> Option<&Tag> {
        self.tags.get(epc)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn config(&self) -> &Arc<ProcessorConfig> {
        &self.config
    }

    /// 扁平拷贝全部标签。
    pub fn snapshot(&self) -> Vec<StaticTag> {
        self.tags.values().map(Tag::to_static).collect()
    }
}

/// 并发安全的库存存储（单把互斥锁作为唯一写入点）。
pub struct InventoryStore {
    inner: Mutex<Inventory>,
}

impl InventoryStore {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            inner: Mutex::new(Inventory {
                tags: HashMap::new(),
                config: Arc::new(config),
            }),
        }
    }

    /// 获取库存锁；锁中毒时继续使用内部数据。
    pub fn lock(&self) -> MutexGuard<'_, Inventory> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Vec<StaticTag> {
        self.lock().snapshot()
    }

    /// 启动时批量恢复（覆盖同 EPC 的已有记录）。
    pub fn restore(&self, tags: &[StaticTag]) {
        let mut inventory = self.lock();
        for tag in tags {
            inventory.tags.insert(tag.epc.clone(), Tag::from_static(tag));
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn config(&self) -> Arc<ProcessorConfig> {
        self.lock().config.clone()
    }

    /// 原子替换配置。
    pub fn replace_config(&self, config: ProcessorConfig) {
        self.lock().config = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TagState;

    #[test]
    fn get_or_create_starts_unknown() {
        let store = InventoryStore::new(ProcessorConfig::default());
        {
            let mut inventory = store.lock();
            let tag = inventory.get_or_create("AA");
            assert_eq!(tag.state(), TagState::Unknown);
            tag.state = TagState::Present;
            // 再次获取返回同一条记录
            assert_eq!(inventory.get_or_create("AA").state(), TagState::Present);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_and_restore() {
        let store = InventoryStore::new(ProcessorConfig::default());
        {
            let mut inventory = store.lock();
            let tag = inventory.get_or_create("AA");
            tag.state = TagState::Departed;
            tag.location = "R1_1".into();
            tag.last_read = 42;
        }
        let snapshot = store.snapshot();
        let other = InventoryStore::new(ProcessorConfig::default());
        other.restore(&snapshot);
        assert_eq!(other.snapshot(), snapshot);
    }

    #[test]
    fn replace_config_swaps_pointer() {
        let store = InventoryStore::new(ProcessorConfig::default());
        let before = store.config();
        let mut next = ProcessorConfig::default();
        next.departed_threshold_seconds = 5;
        store.replace_config(next);
        assert_eq!(before.departed_threshold_seconds, 600);
        assert_eq!(store.config().departed_threshold_seconds, 5);
    }
}
