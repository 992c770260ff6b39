//! Keyed record tables shared by the in-memory and file stores.

use crate::error::StoreResult;
use crate::record::{RecordQuery, StoredRecord};
use crate::store::require;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tillsync_protocol::SyncGuid;

/// Record tables keyed by entity type, then by local key.
///
/// A guid index is rebuilt on load and kept in step with every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Tables {
    next_local_id: u64,
    entities: BTreeMap<String, BTreeMap<u64, StoredRecord>>,
    #[serde(skip)]
    by_guid: HashMap<(String, SyncGuid), u64>,
}

impl Default for Tables {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl Tables {
    pub(crate) fn starting_at(first_local_id: u64) -> Self {
        Self {
            next_local_id: first_local_id.max(1),
            entities: BTreeMap::new(),
            by_guid: HashMap::new(),
        }
    }

    pub(crate) fn reindex(&mut self) {
        self.by_guid.clear();
        for (entity_type, rows) in &self.entities {
            for (local_id, record) in rows {
                self.by_guid
                    .insert((entity_type.clone(), record.guid()), *local_id);
            }
        }
        let max_id = self.entities.values().flat_map(|rows| rows.keys()).max();
        if let Some(max_id) = max_id {
            self.next_local_id = self.next_local_id.max(max_id + 1);
        }
    }

    pub(crate) fn find(&self, entity_type: &str, guid: SyncGuid) -> Option<&StoredRecord> {
        let local_id = self.by_guid.get(&(entity_type.to_string(), guid))?;
        self.entities.get(entity_type)?.get(local_id)
    }

    pub(crate) fn insert(&mut self, entity_type: &str, mut record: StoredRecord) -> StoredRecord {
        let key = (entity_type.to_string(), record.guid());
        let local_id = match self.by_guid.get(&key) {
            Some(existing) => *existing,
            None => {
                let id = self.next_local_id;
                self.next_local_id += 1;
                id
            }
        };
        record.entity_type = entity_type.to_string();
        record.local_id = local_id;
        self.by_guid.insert(key, local_id);
        self.entities
            .entry(entity_type.to_string())
            .or_default()
            .insert(local_id, record.clone());
        record
    }

    pub(crate) fn apply_values(
        &mut self,
        entity_type: &str,
        existing: &StoredRecord,
        mut incoming: StoredRecord,
    ) -> StoreResult<StoredRecord> {
        let rows = self.entities.entry(entity_type.to_string()).or_default();
        let current = require(
            entity_type,
            existing.guid(),
            rows.get(&existing.local_id).cloned(),
        )?;

        incoming.entity_type = entity_type.to_string();
        incoming.local_id = current.local_id;
        rows.insert(current.local_id, incoming.clone());

        // The incoming guid normally matches; if it does not, the index must
        // follow the row.
        if current.guid() != incoming.guid() {
            self.by_guid
                .remove(&(entity_type.to_string(), current.guid()));
        }
        self.by_guid
            .insert((entity_type.to_string(), incoming.guid()), current.local_id);
        Ok(incoming)
    }

    pub(crate) fn query(&self, entity_type: &str, query: &RecordQuery) -> Vec<StoredRecord> {
        let Some(rows) = self.entities.get(entity_type) else {
            return Vec::new();
        };
        rows.values()
            .filter(|record| query.matches(record))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub(crate) fn count(&self, entity_type: &str, query: &RecordQuery) -> u64 {
        self.entities
            .get(entity_type)
            .map(|rows| rows.values().filter(|record| query.matches(record)).count() as u64)
            .unwrap_or(0)
    }

    pub(crate) fn entity_types(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.values().map(BTreeMap::len).sum()
    }
}
