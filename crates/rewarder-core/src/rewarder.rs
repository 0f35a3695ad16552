//! The rewarder context.
//!
//! Owns every collaborator the tracker and scheduler need (record store,
//! reward sink, clock, current configuration generation) and the set of
//! live sessions. The host creates one at server start, calls `tick()` from
//! its loop (or hands control to `run()`), and calls `shutdown()` at stop.
//!
//! ## Usage
//!
//! ```ignore
//! let rewarder = Rewarder::start(&config, backend, sink, Arc::new(SystemClock))?;
//! rewarder.start_session(player);
//! // Once per tick:
//! for event in rewarder.tick() { /* ... */ }
//! // At stop:
//! rewarder.shutdown().await;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::events::Event;
use crate::goals::ScopeSet;
use crate::rewards::{Recipient, RewardSink};
use crate::scheduler::RewardScheduler;
use crate::session::{ActiveSession, OnlinePlayer, SessionSlot, SessionSnapshot};
use crate::storage::{
    lock_record, Config, RecordBackend, RecordObserver, SharedRecord, UserStore,
};
use crate::tracker::{PlaytimeTracker, TickOutcome, TrackerSettings};

/// Everything derived from one configuration load. Replaced whole.
struct Generation {
    scopes: Arc<ScopeSet>,
    settings: TrackerSettings,
    tick_interval: Duration,
}

impl Generation {
    fn from_config(config: &Config) -> Self {
        Self {
            scopes: config.goal_scopes().shared(),
            settings: config.tracker_settings(),
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
        }
    }
}

pub struct Rewarder {
    store: Arc<UserStore>,
    scheduler: RewardScheduler,
    generation: RwLock<Arc<Generation>>,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<Uuid, SessionSlot>>,
}

impl Rewarder {
    /// Build the context on the current tokio runtime.
    ///
    /// # Errors
    /// Returns an error when called outside a tokio runtime.
    pub fn start(
        config: &Config,
        backend: Arc<dyn RecordBackend>,
        sink: Arc<dyn RewardSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = Arc::new(UserStore::new(backend)?);
        let generation = Generation::from_config(config);
        info!(scopes = ?generation.scopes.scopes(), "rewarder started");
        Ok(Self {
            scheduler: RewardScheduler::new(sink, Arc::clone(&store)),
            store,
            generation: RwLock::new(Arc::new(generation)),
            clock,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<UserStore> {
        &self.store
    }

    /// Goal scopes of the current configuration generation.
    pub fn scopes(&self) -> Arc<ScopeSet> {
        Arc::clone(&self.current().scopes)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        self.current().settings
    }

    pub fn tick_interval(&self) -> Duration {
        self.current().tick_interval
    }

    pub fn session(&self, id: Uuid) -> Option<SessionSnapshot> {
        self.sessions_map().get(&id).map(SessionSlot::snapshot)
    }

    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> =
            self.sessions_map().values().map(SessionSlot::snapshot).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn add_observer(&self, observer: Arc<dyn RecordObserver>) {
        self.store.add_observer(observer);
    }

    /// Begin tracking a player. Their record loads in the background; the
    /// session is not ticked until it has arrived.
    pub fn start_session(&self, player: Arc<dyn OnlinePlayer>) {
        let id = player.id();
        let mut sessions = self.sessions_map();
        if sessions.contains_key(&id) {
            debug!(user = %id, "session already tracked");
            return;
        }

        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let name = player.name();
        self.store.runtime().spawn(async move {
            let record = store.get_or_load(id, &name).await;
            if tx.send(record).is_err() {
                // The session ended before the record arrived.
                store.unload(id);
            }
        });

        sessions.insert(
            id,
            SessionSlot::Loading {
                player,
                record: rx,
            },
        );
    }

    /// Start sessions for every player already online, e.g. after a restart.
    pub fn start_sessions(&self, players: impl IntoIterator<Item = Arc<dyn OnlinePlayer>>) {
        for player in players {
            self.start_session(player);
        }
    }

    /// Advance every session by one tick.
    pub fn tick(&self) -> Vec<Event> {
        let generation = self.current();
        let today = self.clock.today();
        let mut events = Vec::new();
        let mut ended = Vec::new();

        let finished: Vec<SessionSlot> = {
            let mut sessions = self.sessions_map();
            for (id, slot) in sessions.iter_mut() {
                let attached = match slot {
                    SessionSlot::Loading { player, record } => match record.try_recv() {
                        Ok(shared) => Some(self.attach(Arc::clone(player), shared, &generation, today)),
                        Err(TryRecvError::Empty) => continue,
                        Err(TryRecvError::Closed) => {
                            warn!(user = %id, "record load was abandoned, dropping session");
                            ended.push(*id);
                            continue;
                        }
                    },
                    SessionSlot::Active(_) => None,
                };
                if let Some(session) = attached {
                    events.push(Event::SessionStarted {
                        user: *id,
                        global_minutes: session.tracker.global_minutes(),
                        at: Utc::now(),
                    });
                    *slot = SessionSlot::Active(session);
                }

                if let SessionSlot::Active(session) = slot {
                    if self.tick_session(session, &generation, today, &mut events) {
                        ended.push(*id);
                    }
                }
            }

            ended.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        // Observers run during unload and may call back into the rewarder.
        for slot in finished {
            self.finish(slot, &mut events);
        }

        events.extend(self.store.drain_events());
        events
    }

    /// Stop tracking a player right away, e.g. on a quit notification.
    pub fn end_session(&self, id: Uuid) -> Vec<Event> {
        let mut events = Vec::new();
        let slot = self.sessions_map().remove(&id);
        if let Some(slot) = slot {
            self.finish(slot, &mut events);
        }
        events.extend(self.store.drain_events());
        events
    }

    /// Swap in a new configuration generation.
    ///
    /// Ticks already running finish against the old generation; the next
    /// tick sees the new one.
    pub fn reload(&self, config: &Config) -> Event {
        let generation = Arc::new(Generation::from_config(config));
        let scopes = generation.scopes.scopes();
        let settings = generation.settings;
        *self.generation.write().unwrap_or_else(|e| e.into_inner()) = generation;

        for slot in self.sessions_map().values_mut() {
            if let SessionSlot::Active(session) = slot {
                session.tracker.set_settings(settings);
            }
        }
        info!(?scopes, "configuration reloaded");
        Event::ConfigReloaded {
            scopes,
            at: Utc::now(),
        }
    }

    /// End every session, save every resident record and wait for the writes.
    pub async fn shutdown(&self) -> Vec<Event> {
        let mut events = Vec::new();
        let slots: Vec<SessionSlot> = self.sessions_map().drain().map(|(_, s)| s).collect();
        for slot in slots {
            self.finish(slot, &mut events);
        }
        self.store.save_all();
        self.store.flush().await;
        events.extend(self.store.drain_events());
        info!("rewarder stopped");
        events
    }

    /// Tick on the configured interval until `shutdown` resolves, then shut down.
    pub async fn run<F>(&self, shutdown: F, mut on_events: impl FnMut(Vec<Event>))
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let events = self.tick();
                    if !events.is_empty() {
                        on_events(events);
                    }
                }
            }
        }

        let events = self.shutdown().await;
        if !events.is_empty() {
            on_events(events);
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn current(&self) -> Arc<Generation> {
        Arc::clone(&self.generation.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn sessions_map(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn attach(
        &self,
        player: Arc<dyn OnlinePlayer>,
        record: SharedRecord,
        generation: &Generation,
        today: NaiveDate,
    ) -> ActiveSession {
        let minutes = {
            let mut rec = lock_record(&record);
            self.scheduler.prepare(&mut rec, &generation.scopes, today);
            rec.minutes_played()
        };
        debug!(user = %player.id(), minutes, "tracker attached");
        let tracker = PlaytimeTracker::new(minutes, player.location(), generation.settings);
        ActiveSession {
            player,
            record,
            tracker,
        }
    }

    /// Returns true when the session has ended.
    fn tick_session(
        &self,
        session: &mut ActiveSession,
        generation: &Generation,
        today: NaiveDate,
        events: &mut Vec<Event>,
    ) -> bool {
        let user = session.player.id();
        let report = match session.tracker.tick(session.player.presence()) {
            TickOutcome::SessionEnded => return true,
            TickOutcome::Tracked(report) => report,
        };

        match report.afk_changed {
            Some(true) => {
                debug!(user = %user, "went afk");
                events.push(Event::AfkStarted {
                    user,
                    idle_ticks: session.tracker.idle_ticks(),
                    at: Utc::now(),
                });
            }
            Some(false) => {
                debug!(user = %user, "back from afk");
                events.push(Event::AfkEnded {
                    user,
                    at: Utc::now(),
                });
            }
            None => {}
        }

        let Some(minute) = report.minute else {
            return false;
        };
        events.push(Event::PlaytimeMinute {
            user,
            global_minutes: minute.global_minutes,
            at: Utc::now(),
        });

        let recipient = Recipient {
            id: user,
            name: session.player.name(),
            global_minutes: minute.global_minutes,
        };
        let evaluation =
            self.scheduler
                .on_minute(&recipient, &session.record, &generation.scopes, today);
        for reached in &evaluation.reached {
            events.push(Event::GoalReached {
                user,
                scope: reached.scope,
                threshold: reached.threshold,
                rewards: reached.rewards,
                at: Utc::now(),
            });
        }

        if minute.flush {
            let snapshot = {
                let mut rec = lock_record(&session.record);
                rec.record_minutes(minute.global_minutes);
                (!evaluation.persisted).then(|| rec.clone())
            };
            if let Some(snapshot) = snapshot {
                self.store.save(&snapshot);
            }
        }
        false
    }

    fn finish(&self, slot: SessionSlot, events: &mut Vec<Event>) {
        let session = match slot {
            SessionSlot::Active(session) => session,
            SessionSlot::Loading { player, mut record } => {
                // A load still in flight sees the closed channel and unloads itself.
                record.close();
                if record.try_recv().is_ok() {
                    self.store.unload(player.id());
                }
                return;
            }
        };
        let user = session.player.id();
        let global = session.tracker.global_minutes();
        lock_record(&session.record).record_minutes(global);
        info!(
            user = %user,
            session_minutes = session.tracker.reported_session_minutes(),
            global_minutes = global,
            "session ended"
        );
        events.push(Event::SessionEnded {
            user,
            session_minutes: session.tracker.reported_session_minutes(),
            global_minutes: global,
            at: Utc::now(),
        });
        self.store.unload(user);
    }
}
