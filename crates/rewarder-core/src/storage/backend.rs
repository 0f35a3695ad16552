//! Durable record backends.
//!
//! Backends are plain blocking code. [`UserStore`](super::UserStore) moves
//! every call onto the blocking pool so the tick loop never waits on them.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::record::UserRecord;
use crate::error::Result;

pub trait RecordBackend: Send + Sync {
    /// `Ok(None)` when the user has never been stored.
    fn load(&self, id: Uuid) -> Result<Option<UserRecord>>;

    fn save(&self, record: &UserRecord) -> Result<()>;
}

/// Backend that keeps records in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryRecordBackend {
    records: Mutex<HashMap<Uuid, UserRecord>>,
}

impl MemoryRecordBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with existing records.
    pub fn with_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }

    /// What was last saved for `id`.
    pub fn stored(&self, id: Uuid) -> Option<UserRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordBackend for MemoryRecordBackend {
    fn load(&self, id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.stored(id))
    }

    /// Keeps the furthest total and cursors, like the SQLite backend.
    fn save(&self, record: &UserRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut merged = record.clone();
        if let Some(stored) = records.get(&record.id) {
            merged.absorb(stored);
        }
        records.insert(record.id, merged);
        Ok(())
    }
}
