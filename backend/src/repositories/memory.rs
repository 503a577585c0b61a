//! In-memory store used by unit tests and the `test-utils` feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use super::{
    activity_log::{ActivityLogFilters, ActivityLogStore},
    entity::EntityResolver,
};
use crate::{
    models::activity_log::{ActivityRecord, EntityKind, EntityRef},
    types::ActivityLogId,
};

#[derive(Debug, Default)]
pub struct InMemoryActivityLogStore {
    records: Mutex<Vec<ActivityRecord>>,
    entities: Mutex<HashMap<EntityRef, Value>>,
}

impl InMemoryActivityLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is, keeping its `created_at`.
    pub fn seed(&self, record: ActivityRecord) {
        self.records.lock().expect("records lock").push(record);
    }

    pub fn register_entity(&self, reference: EntityRef, document: Value) {
        self.entities
            .lock()
            .expect("entities lock")
            .insert(reference, document);
    }

    pub fn snapshot(&self) -> Vec<ActivityRecord> {
        self.records.lock().expect("records lock").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("records lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ActivityLogStore for InMemoryActivityLogStore {
    async fn insert(&self, record: &ActivityRecord) -> Result<(), sqlx::Error> {
        self.seed(record.clone());
        Ok(())
    }

    async fn find(&self, id: ActivityLogId) -> Result<Option<ActivityRecord>, sqlx::Error> {
        let records = self.records.lock().expect("records lock");
        Ok(records.iter().find(|record| record.id == id).cloned())
    }

    async fn list(
        &self,
        filters: &ActivityLogFilters,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, sqlx::Error> {
        let records = self.records.lock().expect("records lock");
        let mut matching: Vec<(usize, &ActivityRecord)> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| filters.matches(record))
            .collect();
        // Newest first; later insertions win ties.
        matching.sort_by(|(left_idx, left), (right_idx, right)| {
            right
                .created_at
                .cmp(&left.created_at)
                .then(right_idx.cmp(left_idx))
        });
        Ok(matching
            .into_iter()
            .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn delete(&self, id: ActivityLogId) -> Result<bool, sqlx::Error> {
        let mut records = self.records.lock().expect("records lock");
        let before = records.len();
        records.retain(|record| record.id != id);
        Ok(records.len() < before)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let mut records = self.records.lock().expect("records lock");
        let before = records.len();
        records.retain(|record| record.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<i64, sqlx::Error> {
        let records = self.records.lock().expect("records lock");
        let count = records
            .iter()
            .filter(|record| since.map_or(true, |since| record.created_at >= since))
            .count();
        Ok(count as i64)
    }

    async fn count_by_log_name(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        let records = self.records.lock().expect("records lock");
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for record in records.iter() {
            *counts.entry(record.log_name.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[async_trait]
impl EntityResolver for InMemoryActivityLogStore {
    async fn resolve_batch(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, sqlx::Error> {
        let entities = self.entities.lock().expect("entities lock");
        Ok(ids
            .iter()
            .filter_map(|id| {
                entities
                    .get(&EntityRef::new(kind, id.clone()))
                    .map(|document| (id.clone(), document.clone()))
            })
            .collect())
    }
}
