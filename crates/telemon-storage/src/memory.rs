use crate::error::{Result, StorageError};
use crate::StorageEngine;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use telemon_common::types::{MetricKind, MetricRecord, MetricValue};

type Key = (MetricKind, String);

/// Process-local storage. Every write path takes the write lock exactly once,
/// so a batch is applied atomically and concurrent increments never race.
#[derive(Default)]
pub struct MemoryStorageEngine {
    metrics: RwLock<HashMap<Key, MetricValue>>,
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Key, MetricValue>> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Key, MetricValue>> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn merged(current: Option<&MetricValue>, incoming: MetricValue) -> Result<MetricValue> {
    match current {
        Some(current) => Ok(current.merge(incoming)?),
        None => Ok(incoming),
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn upsert(&self, record: &MetricRecord) -> Result<MetricRecord> {
        let mut map = self.write();
        let key = (record.kind(), record.name.clone());
        let value = merged(map.get(&key), record.value)?;
        map.insert(key, value);
        Ok(MetricRecord {
            name: record.name.clone(),
            value,
        })
    }

    fn mass_upsert(&self, records: &[MetricRecord]) -> Result<()> {
        let mut map = self.write();
        // Staged so a failing record leaves the map untouched.
        let mut staged: HashMap<Key, MetricValue> = HashMap::new();
        for record in records {
            let key = (record.kind(), record.name.clone());
            let value = merged(staged.get(&key).or_else(|| map.get(&key)), record.value)?;
            staged.insert(key, value);
        }
        map.extend(staged);
        Ok(())
    }

    fn replace_all(&self, records: &[MetricRecord]) -> Result<()> {
        let mut map = self.write();
        for record in records {
            map.insert((record.kind(), record.name.clone()), record.value);
        }
        Ok(())
    }

    fn get(&self, kind: MetricKind, name: &str) -> Result<MetricRecord> {
        self.read()
            .get(&(kind, name.to_string()))
            .map(|value| MetricRecord {
                name: name.to_string(),
                value: *value,
            })
            .ok_or_else(|| StorageError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    fn get_all(&self) -> Result<Vec<MetricRecord>> {
        let map = self.read();
        let mut entries: Vec<(&Key, &MetricValue)> = map.iter().collect();
        entries.sort_by(|(a, _), (b, _)| {
            a.0.as_str()
                .cmp(b.0.as_str())
                .then_with(|| a.1.cmp(&b.1))
        });
        Ok(entries
            .into_iter()
            .map(|((_, name), value)| MetricRecord {
                name: name.clone(),
                value: *value,
            })
            .collect())
    }
}
