//! # Sentinel Scheduler
//!
//! Timers that survive the background worker being suspended. Schedules are
//! kept in session storage and re-armed when the worker comes back; the
//! owning features only need to register their listeners again.
//!
//! ```rust,no_run
//! use sentinel_scheduler::{
//!     MemorySessionStorage, ScheduleType, ScheduledEventEmitter, SessionArea, STORAGE_NAMESPACE,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), sentinel_scheduler::StorageError> {
//! let storage = Arc::new(MemorySessionStorage::new(STORAGE_NAMESPACE, SessionArea::new()));
//! let scheduler = ScheduledEventEmitter::open(storage).await;
//!
//! scheduler.set_schedule("my-event", 60 * 60 * 1000, ScheduleType::Once).await?;
//! scheduler
//!     .set_listener("my-event", |info| println!("Ding! Call #{}", info.call_count))
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod emitter;
pub mod storage;

pub use clock::{millis, Clock, MAX_DELAY};
pub use emitter::{
    ListenerInfo, Schedule, ScheduleListener, ScheduleType, ScheduledEventEmitter, STORAGE_KEY,
    STORAGE_NAMESPACE,
};
pub use storage::{global_key, MemorySessionStorage, SessionArea, SessionStorage, StorageError};
