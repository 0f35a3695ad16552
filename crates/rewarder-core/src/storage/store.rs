//! Resident user records and their asynchronous persistence.
//!
//! The store owns which records are in memory. Loads and saves run on the
//! tokio blocking pool; callers on the tick path only ever take a short
//! mutex on a record and hand a snapshot to [`UserStore::save`].
//!
//! Saves are coalesced per user: one writer task per user drains the newest
//! queued snapshot, so writes for a user reach the backend in order and a
//! burst of saves costs at most two backend calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backend::RecordBackend;
use super::record::UserRecord;
use crate::error::{CoreError, Result};
use crate::events::Event;

/// A resident record. Owned by the user's session while one is active.
pub type SharedRecord = Arc<Mutex<UserRecord>>;

/// Hooks into the record lifecycle. Both methods run synchronously.
pub trait RecordObserver: Send + Sync {
    /// A record just became resident.
    fn on_loaded(&self, _record: &UserRecord) {}

    /// Return true to keep the record in memory when it is about to be unloaded.
    fn keep_resident(&self, _record: &UserRecord) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    Unloaded,
    /// An observer kept the record resident. It was still saved.
    Vetoed,
    NotResident,
}

#[derive(Default)]
struct WriteQueue {
    /// Newest snapshot not yet handed to the backend.
    latest: HashMap<Uuid, UserRecord>,
    /// Users with a writer task running.
    writing: HashSet<Uuid>,
}

pub struct UserStore {
    backend: Arc<dyn RecordBackend>,
    resident: Mutex<HashMap<Uuid, SharedRecord>>,
    observers: RwLock<Vec<Arc<dyn RecordObserver>>>,
    queue: Arc<Mutex<WriteQueue>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    events: Mutex<Vec<Event>>,
    runtime: Handle,
}

impl UserStore {
    /// Create a store on the current tokio runtime.
    ///
    /// # Errors
    /// Returns an error when called outside a tokio runtime.
    pub fn new(backend: Arc<dyn RecordBackend>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CoreError::Custom(format!("user store needs a tokio runtime: {e}")))?;
        Ok(Self::with_runtime(backend, runtime))
    }

    pub fn with_runtime(backend: Arc<dyn RecordBackend>, runtime: Handle) -> Self {
        Self {
            backend,
            resident: Mutex::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            queue: Arc::new(Mutex::new(WriteQueue::default())),
            pending: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            runtime,
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn add_observer(&self, observer: Arc<dyn RecordObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn get(&self, id: Uuid) -> Option<SharedRecord> {
        self.resident_map().get(&id).cloned()
    }

    pub fn is_resident(&self, id: Uuid) -> bool {
        self.resident_map().contains_key(&id)
    }

    pub fn resident_count(&self) -> usize {
        self.resident_map().len()
    }

    /// The resident record for `id`, loading it first if needed.
    ///
    /// Never fails: a backend error yields an empty stand-in record that
    /// plays normally but is never written back over the stored one.
    pub async fn get_or_load(&self, id: Uuid, username: &str) -> SharedRecord {
        if let Some(record) = self.get(id) {
            return record;
        }

        // A quick rejoin must read what its last unload wrote.
        self.flush().await;

        let backend = Arc::clone(&self.backend);
        let loaded = self.runtime.spawn_blocking(move || backend.load(id)).await;
        let mut record = match loaded {
            Ok(Ok(Some(record))) => record,
            Ok(Ok(None)) => {
                debug!(user = %id, "no stored record, starting fresh");
                UserRecord::new(id, username)
            }
            Ok(Err(e)) => {
                warn!(user = %id, error = %e, "failed to load user record, using defaults");
                UserRecord::degraded(id, username)
            }
            Err(e) => {
                error!(user = %id, error = %e, "user record load task failed, using defaults");
                UserRecord::degraded(id, username)
            }
        };
        if !username.is_empty() {
            record.username = username.to_string();
        }

        let (shared, inserted) = {
            let mut resident = self.resident_map();
            match resident.get(&id) {
                // Another load for the same user won the race.
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let shared = Arc::new(Mutex::new(record));
                    resident.insert(id, Arc::clone(&shared));
                    (shared, true)
                }
            }
        };

        if inserted {
            let snapshot = lock_record(&shared).clone();
            info!(user = %id, minutes = snapshot.minutes_played(), "user record resident");
            for observer in self.observer_list() {
                observer.on_loaded(&snapshot);
            }
            self.push_event(Event::RecordLoaded {
                user: id,
                minutes_played: snapshot.minutes_played(),
                at: Utc::now(),
            });
        }
        shared
    }

    /// Persist a snapshot in the background. Returns immediately.
    ///
    /// Stand-in records from a failed load are skipped.
    pub fn save(&self, record: &UserRecord) {
        if record.is_degraded() {
            debug!(user = %record.id, "not saving a stand-in record");
            return;
        }
        let id = record.id;
        let start_writer = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.latest.insert(id, record.clone());
            queue.writing.insert(id)
        };
        if !start_writer {
            return;
        }

        let handle = self.runtime.spawn(write_back(
            id,
            Arc::clone(&self.queue),
            Arc::clone(&self.backend),
        ));
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    pub fn save_shared(&self, record: &SharedRecord) {
        let snapshot = lock_record(record).clone();
        self.save(&snapshot);
    }

    /// Queue a save for every resident record.
    pub fn save_all(&self) {
        let records: Vec<SharedRecord> = self.resident_map().values().cloned().collect();
        for record in &records {
            self.save_shared(record);
        }
        debug!(count = records.len(), "queued save for all resident records");
    }

    /// Save and evict a record unless an observer keeps it resident.
    pub fn unload(&self, id: Uuid) -> UnloadOutcome {
        let Some(shared) = self.get(id) else {
            return UnloadOutcome::NotResident;
        };
        let snapshot = lock_record(&shared).clone();
        self.save(&snapshot);

        let vetoed = self
            .observer_list()
            .iter()
            .any(|observer| observer.keep_resident(&snapshot));
        if vetoed {
            info!(user = %id, "unload vetoed, record stays resident");
            self.push_event(Event::UnloadVetoed {
                user: id,
                at: Utc::now(),
            });
            return UnloadOutcome::Vetoed;
        }

        self.resident_map().remove(&id);
        debug!(user = %id, "user record unloaded");
        self.push_event(Event::RecordUnloaded {
            user: id,
            at: Utc::now(),
        });
        UnloadOutcome::Unloaded
    }

    /// Wait for every queued save to finish.
    pub async fn flush(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> =
                std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    error!(error = %e, "user record save task failed");
                }
            }
        }
    }

    /// Lifecycle events produced since the last call.
    pub fn drain_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn push_event(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    fn resident_map(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SharedRecord>> {
        self.resident.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observer_list(&self) -> Vec<Arc<dyn RecordObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Writer task for one user. Saves the newest queued snapshot until none is
/// left, one backend call at a time.
async fn write_back(id: Uuid, queue: Arc<Mutex<WriteQueue>>, backend: Arc<dyn RecordBackend>) {
    loop {
        let snapshot = {
            let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
            match queue.latest.remove(&id) {
                Some(snapshot) => snapshot,
                None => {
                    queue.writing.remove(&id);
                    return;
                }
            }
        };
        let backend = Arc::clone(&backend);
        match tokio::task::spawn_blocking(move || backend.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(user = %id, error = %e, "failed to save user record"),
            Err(e) => error!(user = %id, error = %e, "user record save task failed"),
        }
    }
}

/// Lock a shared record, recovering from a poisoned mutex.
pub fn lock_record(record: &SharedRecord) -> std::sync::MutexGuard<'_, UserRecord> {
    record.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{GoalCursor, MemoryRecordBackend};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct BrokenBackend;

    impl RecordBackend for BrokenBackend {
        fn load(&self, id: Uuid) -> Result<Option<UserRecord>> {
            Err(CoreError::Storage {
                user: id.to_string(),
                message: "disk on fire".into(),
            })
        }

        fn save(&self, _record: &UserRecord) -> Result<()> {
            Err(CoreError::Custom("read-only".into()))
        }
    }

    #[derive(Default)]
    struct Holder {
        hold: AtomicBool,
        loaded: AtomicUsize,
    }

    impl RecordObserver for Holder {
        fn on_loaded(&self, _record: &UserRecord) {
            self.loaded.fetch_add(1, Ordering::SeqCst);
        }

        fn keep_resident(&self, _record: &UserRecord) -> bool {
            self.hold.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn load_failure_falls_back_to_default_record() {
        let store = UserStore::new(Arc::new(BrokenBackend)).unwrap();
        let id = Uuid::new_v4();
        let record = store.get_or_load(id, "Steve").await;
        let record = lock_record(&record);
        assert_eq!(record.minutes_played(), 0);
        assert!(record.cursors().is_empty());
        assert_eq!(record.last_collected("global-playtime-goals"), 0);
        assert_eq!(record.username, "Steve");
    }

    #[tokio::test]
    async fn stored_record_is_loaded_once_and_cached() {
        let id = Uuid::new_v4();
        let mut stored = UserRecord::new(id, "OldName");
        stored.record_minutes(200);
        let backend = Arc::new(MemoryRecordBackend::with_records([stored]));
        let store = UserStore::new(backend).unwrap();
        let holder = Arc::new(Holder::default());
        store.add_observer(holder.clone());

        let first = store.get_or_load(id, "NewName").await;
        let second = store.get_or_load(id, "NewName").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lock_record(&first).minutes_played(), 200);
        assert_eq!(lock_record(&first).username, "NewName");
        assert_eq!(holder.loaded.load(Ordering::SeqCst), 1);
        assert!(matches!(
            store.drain_events().as_slice(),
            [Event::RecordLoaded { minutes_played: 200, .. }]
        ));
    }

    #[tokio::test]
    async fn unload_saves_and_evicts() {
        let backend = Arc::new(MemoryRecordBackend::new());
        let store = UserStore::new(backend.clone()).unwrap();
        let id = Uuid::new_v4();
        let record = store.get_or_load(id, "Alex").await;
        {
            let mut r = lock_record(&record);
            r.record_minutes(30);
            *r.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(30);
        }

        assert_eq!(store.unload(id), UnloadOutcome::Unloaded);
        assert!(!store.is_resident(id));
        store.flush().await;
        let saved = backend.stored(id).unwrap();
        assert_eq!(saved.minutes_played(), 30);
        assert_eq!(saved.last_collected("global-playtime-goals"), 30);
        assert_eq!(store.unload(id), UnloadOutcome::NotResident);
    }

    #[tokio::test]
    async fn veto_keeps_record_resident() {
        let backend = Arc::new(MemoryRecordBackend::new());
        let store = UserStore::new(backend.clone()).unwrap();
        let holder = Arc::new(Holder::default());
        holder.hold.store(true, Ordering::SeqCst);
        store.add_observer(holder.clone());

        let id = Uuid::new_v4();
        store.get_or_load(id, "Alex").await;
        assert_eq!(store.unload(id), UnloadOutcome::Vetoed);
        assert!(store.is_resident(id));

        holder.hold.store(false, Ordering::SeqCst);
        assert_eq!(store.unload(id), UnloadOutcome::Unloaded);
        store.flush().await;
        assert!(backend.stored(id).is_some());
    }

    /// Last-write-wins backend whose first save is slow.
    #[derive(Default)]
    struct SlowFirstSave {
        saves: Mutex<Vec<u32>>,
        stored: Mutex<Option<UserRecord>>,
    }

    impl RecordBackend for SlowFirstSave {
        fn load(&self, _id: Uuid) -> Result<Option<UserRecord>> {
            Ok(self.stored.lock().unwrap().clone())
        }

        fn save(&self, record: &UserRecord) -> Result<()> {
            let first = self.saves.lock().unwrap().is_empty();
            if first {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            self.saves.lock().unwrap().push(record.last_collected("global-playtime-goals"));
            *self.stored.lock().unwrap() = Some(record.clone());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn saves_for_one_user_land_in_order() {
        let backend = Arc::new(SlowFirstSave::default());
        let store = UserStore::new(backend.clone()).unwrap();
        let mut record = UserRecord::new(Uuid::new_v4(), "Steve");

        for value in 1..=3 {
            *record.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(value);
            store.save(&record);
        }
        store.flush().await;

        let saves = backend.saves.lock().unwrap().clone();
        assert!(saves.windows(2).all(|w| w[0] < w[1]), "out of order: {saves:?}");
        assert_eq!(saves.last(), Some(&3));
        let stored = backend.stored.lock().unwrap().clone().unwrap();
        assert_eq!(stored.last_collected("global-playtime-goals"), 3);
    }

    /// Fails the first load, then behaves.
    struct FlakyLoad {
        failed: AtomicBool,
        inner: MemoryRecordBackend,
    }

    impl RecordBackend for FlakyLoad {
        fn load(&self, id: Uuid) -> Result<Option<UserRecord>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(CoreError::Custom("connection reset".into()));
            }
            self.inner.load(id)
        }

        fn save(&self, record: &UserRecord) -> Result<()> {
            self.inner.save(record)
        }
    }

    #[tokio::test]
    async fn stand_in_record_is_never_written_back() {
        let id = Uuid::new_v4();
        let mut stored = UserRecord::new(id, "Steve");
        stored.record_minutes(500);
        *stored.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(500);
        let backend = Arc::new(FlakyLoad {
            failed: AtomicBool::new(false),
            inner: MemoryRecordBackend::with_records([stored.clone()]),
        });
        let store = UserStore::new(backend.clone()).unwrap();

        let record = store.get_or_load(id, "Steve2").await;
        assert!(lock_record(&record).is_degraded());
        lock_record(&record).record_minutes(3);
        store.save_shared(&record);
        store.save_all();
        assert_eq!(store.unload(id), UnloadOutcome::Unloaded);
        store.flush().await;
        assert_eq!(backend.inner.stored(id), Some(stored));

        let record = store.get_or_load(id, "Steve").await;
        let record = lock_record(&record);
        assert!(!record.is_degraded());
        assert_eq!(record.minutes_played(), 500);
        assert_eq!(record.last_collected("global-playtime-goals"), 500);
    }

    #[tokio::test]
    async fn save_failures_are_swallowed() {
        let store = UserStore::new(Arc::new(BrokenBackend)).unwrap();
        let record = store.get_or_load(Uuid::new_v4(), "Steve").await;
        store.save_shared(&record);
        store.save_all();
        store.save(&UserRecord::new(Uuid::new_v4(), "Alex"));
        store.flush().await;
        assert_eq!(store.resident_count(), 1);
    }

    #[test]
    fn new_outside_runtime_is_an_error() {
        assert!(UserStore::new(Arc::new(MemoryRecordBackend::new())).is_err());
    }
}
