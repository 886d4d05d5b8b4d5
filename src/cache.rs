use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::CacheError;
use crate::model::StaticTag;

/// 库存快照文件（JSON 数组），写入时先写临时文件再原子替换。
#[derive(Clone, Debug)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tag_cache.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// 持久化快照。
    pub fn persist(&self, tags: &[StaticTag]) -> Result<(), CacheError> {
        let data = serde_json::to_vec(tags)?;
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        log::debug!("Persisted {} tag(s) to {}", tags.len(), self.path.display());
        Ok(())
    }

    /// 读取快照；文件不存在返回空列表。
    pub fn load(&self) -> Result<Vec<StaticTag>, CacheError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// 启动时恢复：任何错误都只告警，冷启动总是有效的。
    pub fn load_or_empty(&self) -> Vec<StaticTag> {
        match self.load() {
            Ok(tags) => {
                log::info!("Restored {} tag(s) from {}", tags.len(), self.path.display());
                tags
            }
            Err(err) => {
                log::warn!(
                    "Tag cache {} unreadable, starting empty: {}",
                    self.path.display(),
                    err
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TagState;
    use std::collections::HashMap;

    fn sample() -> Vec<StaticTag> {
        vec![StaticTag {
            epc: "01".into(),
            tid: String::new(),
            location: "R1_1".into(),
            last_read: 10,
            last_arrived: 5,
            last_departed: 0,
            state: TagState::Present,
            stats: HashMap::new(),
        }]
    }

    #[test]
    fn persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().join("tags.json"));
        cache.persist(&sample()).unwrap();
        assert_eq!(cache.load().unwrap(), sample());
        assert!(!dir.path().join("tags.json.tmp").exists());

        cache.persist(&[]).unwrap();
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().join("absent.json"));
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.json");
        fs::write(&path, b"[{\"epc\":").unwrap();
        let cache = SnapshotCache::new(&path);
        assert!(matches!(cache.load(), Err(CacheError::Json(_))));
        assert!(cache.load_or_empty().is_empty());
    }
}
