//! Named, persisted event schedules.
//!
//! A schedule says "emit `name` in N ms" (once) or "every N ms" (interval).
//! Schedules are persisted in session storage so they survive the
//! background worker being torn down; listeners are in-memory only and
//! must be registered again by their owners after every restart.
//!
//! ```text
//!   set_schedule ──► unarmed ──activate──► armed ──fire──► removed (once)
//!                       ▲                    │
//!                       └──── restart ───────┘──fire──► next += period (interval)
//! ```
//!
//! A schedule is armed while a timer for it lives in the current process;
//! its `activation_id` identifies that timer. Revived schedules are always
//! unarmed until the next activation sweep.

use crate::clock::Clock;
use crate::storage::{SessionStorage, StorageError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Storage namespace of the scheduler.
pub const STORAGE_NAMESPACE: &str = "ScheduledEventEmitter.storage";

/// Key under which the whole schedule table is persisted.
pub const STORAGE_KEY: &str = "schedules";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleType {
    /// Emit once, then forget the schedule
    #[default]
    Once,
    /// Emit every period until removed
    Interval,
}

/// Persisted state of one named schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Milliseconds between emissions (or until the single emission)
    pub period: u64,
    /// Epoch milliseconds of the next planned emission
    pub next: u64,
    pub run_once: bool,
    /// Number of emissions so far
    pub count: u64,
    /// Identifies the live timer in this process, if armed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_id: Option<u64>,
}

/// Passed to a listener on every emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerInfo {
    /// 1-based number of this emission
    pub call_count: u64,
}

pub type ScheduleListener = dyn Fn(ListenerInfo) + Send + Sync;

#[derive(Default)]
struct State {
    schedules: BTreeMap<String, Schedule>,
    listeners: HashMap<String, Arc<ScheduleListener>>,
    timers: HashMap<String, JoinHandle<()>>,
}

struct Inner {
    storage: Arc<dyn SessionStorage>,
    clock: Clock,
    state: Mutex<State>,
    /// Held from snapshot until the write completes
    persist_lock: tokio::sync::Mutex<()>,
    next_activation: AtomicU64,
}

/// Emits named events on persisted schedules.
///
/// Cloning yields another handle to the same emitter. Timers stop once the
/// last handle is dropped; the persisted table stays in storage.
#[derive(Clone)]
pub struct ScheduledEventEmitter {
    inner: Arc<Inner>,
}

impl ScheduledEventEmitter {
    /// Revives persisted schedules and runs the startup activation sweep.
    pub async fn open(storage: Arc<dyn SessionStorage>) -> Self {
        Self::open_with_clock(storage, Clock::new()).await
    }

    pub async fn open_with_clock(storage: Arc<dyn SessionStorage>, clock: Clock) -> Self {
        let emitter = Self::restore(storage, clock).await;
        emitter.activate_schedules().await;
        emitter
    }

    /// Revives persisted schedules without arming any timers.
    ///
    /// Every revived schedule starts out unarmed.
    pub async fn restore(storage: Arc<dyn SessionStorage>, clock: Clock) -> Self {
        let schedules = revive(storage.as_ref()).await;
        debug!("Revived {} schedule(s)", schedules.len());

        Self {
            inner: Arc::new(Inner {
                storage,
                clock,
                state: Mutex::new(State {
                    schedules,
                    ..State::default()
                }),
                persist_lock: tokio::sync::Mutex::new(()),
                next_activation: AtomicU64::new(1),
            }),
        }
    }

    pub fn clock(&self) -> Clock {
        self.inner.clock
    }

    /// Current time in epoch milliseconds, as the emitter sees it.
    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Registers the listener for `name`, replacing any previous one, and
    /// delivers emissions that became due while nobody was listening.
    pub async fn set_listener<F>(&self, name: &str, listener: F)
    where
        F: Fn(ListenerInfo) + Send + Sync + 'static,
    {
        let replaced = self
            .inner
            .state
            .lock()
            .listeners
            .insert(name.to_string(), Arc::new(listener))
            .is_some();
        if replaced {
            warn!("Overwriting already registered listener for event \"{}\"", name);
        }

        self.activate_schedules().await;
    }

    /// Removes the listener only; the schedule keeps running.
    pub fn remove_listener(&self, name: &str) {
        self.inner.state.lock().listeners.remove(name);
    }

    pub fn has_listener(&self, name: &str) -> bool {
        self.inner.state.lock().listeners.contains_key(name)
    }

    /// Plans the emission of `name` in `time_ms`, once or every `time_ms`.
    ///
    /// Replaces any existing schedule of that name.
    pub async fn set_schedule(
        &self,
        name: &str,
        time_ms: u64,
        schedule_type: ScheduleType,
    ) -> Result<(), StorageError> {
        let schedule = Schedule {
            period: time_ms,
            next: self.now_ms().saturating_add(time_ms),
            run_once: schedule_type == ScheduleType::Once,
            count: 0,
            activation_id: None,
        };
        self.insert_schedule(name, schedule).await
    }

    /// Plans an interval whose first emission happens at `first_at_ms`
    /// (epoch milliseconds) and every `period_ms` after that.
    ///
    /// A first emission time in the past fires on activation.
    pub async fn set_schedule_from(
        &self,
        name: &str,
        first_at_ms: u64,
        period_ms: u64,
    ) -> Result<(), StorageError> {
        let schedule = Schedule {
            period: period_ms,
            next: first_at_ms,
            run_once: false,
            count: 0,
            activation_id: None,
        };
        self.insert_schedule(name, schedule).await
    }

    /// Stops and forgets the schedule for `name`. No-op if there is none.
    pub async fn remove_schedule(&self, name: &str) -> Result<(), StorageError> {
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.timers.remove(name) {
                timer.abort();
            }
            state.schedules.remove(name).is_some()
        };

        if removed {
            self.inner.persist().await?;
        }
        Ok(())
    }

    pub fn has_schedule(&self, name: &str) -> bool {
        self.inner.state.lock().schedules.contains_key(name)
    }

    /// Copy of the current schedule for `name`.
    pub fn schedule(&self, name: &str) -> Option<Schedule> {
        self.inner.state.lock().schedules.get(name).cloned()
    }

    /// Whether a timer for `name` is live in this process.
    pub fn is_armed(&self, name: &str) -> bool {
        self.inner
            .state
            .lock()
            .schedules
            .get(name)
            .is_some_and(|schedule| schedule.activation_id.is_some())
    }

    /// Arms timers for every unarmed schedule and emits one-shot schedules
    /// that are already due.
    pub async fn activate_schedules(&self) {
        let due = {
            let mut guard = self.inner.state.lock();
            let State {
                schedules, timers, ..
            } = &mut *guard;
            let now = self.inner.clock.now_ms();
            let mut due = Vec::new();

            for (name, schedule) in schedules.iter_mut() {
                if schedule.activation_id.is_some() {
                    continue;
                }

                let activation_id = self.inner.next_activation.fetch_add(1, Ordering::Relaxed);
                schedule.activation_id = Some(activation_id);

                if !schedule.run_once {
                    let timer = self.inner.arm_interval(name, activation_id, schedule.next, schedule.period);
                    timers.insert(name.clone(), timer);
                } else if schedule.next > now {
                    let timer = self.inner.arm_timeout(name, activation_id, schedule.next);
                    timers.insert(name.clone(), timer);
                } else {
                    due.push((name.clone(), activation_id));
                }
            }
            due
        };

        for (name, activation_id) in due {
            self.inner.emit(&name, Some(activation_id)).await;
        }
    }

    /// Emits `name` now if it has both a schedule and a listener.
    pub async fn emit_event(&self, name: &str) {
        self.inner.emit(name, None).await;
    }

    async fn insert_schedule(&self, name: &str, schedule: Schedule) -> Result<(), StorageError> {
        {
            let mut state = self.inner.state.lock();
            if state.schedules.insert(name.to_string(), schedule).is_some() {
                warn!("Overwriting already registered schedule for name \"{}\"", name);
            }
            if let Some(timer) = state.timers.remove(name) {
                timer.abort();
            }
        }

        self.inner.persist().await?;
        self.activate_schedules().await;
        Ok(())
    }
}

impl Inner {
    fn arm_timeout(self: &Arc<Self>, name: &str, activation_id: u64, at_ms: u64) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        let name = name.to_string();
        let deadline = self.clock.deadline(at_ms);

        tokio::spawn(async move {
            sleep_until(deadline).await;
            spawn_emission(&inner, &name, activation_id);
        })
    }

    fn arm_interval(self: &Arc<Self>, name: &str, activation_id: u64, first_at_ms: u64, period_ms: u64) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        let name = name.to_string();
        let start = self.clock.deadline(first_at_ms);
        let period = Duration::from_millis(period_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !spawn_emission(&inner, &name, activation_id) {
                    break;
                }
            }
        })
    }

    /// Emits `name`. With `expected` set, only if that activation is still
    /// the schedule's current one.
    async fn emit(self: &Arc<Self>, name: &str, expected: Option<u64>) {
        let (listener, info, activation_id, run_once) = {
            let mut guard = self.state.lock();
            let State {
                schedules,
                listeners,
                timers,
            } = &mut *guard;

            let Some(schedule) = schedules.get_mut(name) else {
                return;
            };
            if expected.is_some() && schedule.activation_id != expected {
                return;
            }
            let Some(listener) = listeners.get(name).cloned() else {
                if expected.is_some() && schedule.run_once {
                    // Nobody to tell yet, the next sweep delivers it
                    schedule.activation_id = None;
                    timers.remove(name);
                }
                return;
            };

            schedule.count += 1;
            (
                listener,
                ListenerInfo {
                    call_count: schedule.count,
                },
                schedule.activation_id,
                schedule.run_once,
            )
        };

        if catch_unwind(AssertUnwindSafe(|| listener(info))).is_err() {
            error!("Listener for event \"{}\" panicked", name);
        }

        let changed = {
            let mut guard = self.state.lock();
            let State {
                schedules, timers, ..
            } = &mut *guard;
            let now = self.clock.now_ms();

            // The listener may have replaced or removed the schedule
            let current = schedules
                .get(name)
                .is_some_and(|schedule| schedule.activation_id == activation_id);
            if current {
                if run_once {
                    schedules.remove(name);
                    if let Some(timer) = timers.remove(name) {
                        timer.abort();
                    }
                } else if let Some(schedule) = schedules.get_mut(name) {
                    schedule.next = now.saturating_add(schedule.period);
                }
            }
            current
        };

        if changed {
            if let Err(e) = self.persist().await {
                error!("Failed to persist schedules after emitting \"{}\": {}", name, e);
            }
        }
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let _write = self.persist_lock.lock().await;
        let snapshot = {
            let state = self.state.lock();
            serde_json::to_value(&state.schedules)?
        };
        self.storage.set(STORAGE_KEY, snapshot).await
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, timer) in self.state.get_mut().timers.drain() {
            timer.abort();
        }
    }
}

/// Runs an emission detached from the timer, so cancelling the timer never
/// cancels an emission in progress. Returns `false` once the emitter is gone.
fn spawn_emission(inner: &Weak<Inner>, name: &str, activation_id: u64) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    let name = name.to_string();
    tokio::spawn(async move {
        inner.emit(&name, Some(activation_id)).await;
    });
    true
}

/// Loads the persisted schedule table, dropping anything malformed.
async fn revive(storage: &dyn SessionStorage) -> BTreeMap<String, Schedule> {
    let stored = match storage.get(STORAGE_KEY).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return BTreeMap::new(),
        Err(e) => {
            warn!("Could not restore stored schedules: {}", e);
            return BTreeMap::new();
        }
    };

    match serde_json::from_value::<BTreeMap<String, Schedule>>(stored) {
        Ok(mut schedules) => {
            for schedule in schedules.values_mut() {
                schedule.activation_id = None;
            }
            schedules
        }
        Err(e) => {
            warn!("Could not restore stored schedules: {}", e);
            BTreeMap::new()
        }
    }
}
