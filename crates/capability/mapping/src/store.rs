//! 映射存储
//!
//! 使用 RwLock + Vec 保存有序映射列表：
//! - 按位置的变更在同一把写锁下串行执行
//! - 转发循环通过 `snapshot` / `enabled_mappings` 拿到副本迭代
//! - 越界索引视为空操作（返回 false，列表不变）

use crate::MappingError;
use domain::{DataPoint, Mapping};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

#[derive(Default)]
pub struct MappingStore {
    mappings: RwLock<Vec<Mapping>>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有列表构造（保持顺序）
    pub fn from_mappings(mappings: Vec<Mapping>) -> Self {
        Self {
            mappings: RwLock::new(mappings),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Mapping>> {
        self.mappings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Mapping>> {
        self.mappings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 追加映射（默认启用、无变换），返回其索引
    pub fn add_mapping(&self, source: DataPoint, destination: DataPoint) -> usize {
        let mut mappings = self.write();
        info!(
            source = %source.name(),
            destination = %destination.name(),
            index = mappings.len(),
            "mapping added"
        );
        mappings.push(Mapping::new(source, destination));
        mappings.len() - 1
    }

    pub fn remove_mapping(&self, index: usize) -> bool {
        let mut mappings = self.write();
        if index >= mappings.len() {
            return false;
        }
        let removed = mappings.remove(index);
        info!(index, source = %removed.source.name(), "mapping removed");
        true
    }

    /// 设置或清除变换名；不校验名称，解析推迟到执行时
    pub fn set_transformation(&self, index: usize, transformation: Option<String>) -> bool {
        self.update(index, |mapping| mapping.transformation = transformation)
    }

    pub fn enable(&self, index: usize) -> bool {
        self.update(index, |mapping| mapping.enabled = true)
    }

    pub fn disable(&self, index: usize) -> bool {
        self.update(index, |mapping| mapping.enabled = false)
    }

    fn update(&self, index: usize, apply: impl FnOnce(&mut Mapping)) -> bool {
        match self.write().get_mut(index) {
            Some(mapping) => {
                apply(mapping);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<Mapping> {
        self.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 当前列表的副本
    pub fn snapshot(&self) -> Vec<Mapping> {
        self.read().clone()
    }

    /// 已启用映射及其索引（副本）
    pub fn enabled_mappings(&self) -> Vec<(usize, Mapping)> {
        self.read()
            .iter()
            .enumerate()
            .filter(|(_, mapping)| mapping.enabled)
            .map(|(index, mapping)| (index, mapping.clone()))
            .collect()
    }

    /// 以格式化 JSON 保存完整列表
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), MappingError> {
        let path = path.as_ref();
        let mappings = self.snapshot();
        let json = serde_json::to_string_pretty(&mappings)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), count = mappings.len(), "mappings saved");
        Ok(())
    }

    /// 整体替换为文件中的列表；文件解析失败时保持原列表不变
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<usize, MappingError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let loaded: Vec<Mapping> = serde_json::from_str(&text)?;
        let count = loaded.len();
        *self.write() = loaded;
        info!(path = %path.display(), count, "mappings loaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(protocol: &str, address: u64) -> DataPoint {
        DataPoint::new(protocol, json!({ "address": address }), None)
    }

    #[test]
    fn update_out_of_range_leaves_list_untouched() {
        let store = MappingStore::new();
        store.add_mapping(point("Modbus", 1), point("MQTT", 2));
        let before = store.snapshot();

        assert!(!store.enable(3));
        assert!(!store.set_transformation(1, Some("negate".to_string())));
        assert_eq!(store.snapshot(), before);
    }
}
