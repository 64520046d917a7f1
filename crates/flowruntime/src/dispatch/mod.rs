//! Background dispatch: a durable submission queue drained by a fixed
//! worker pool, and a scheduler that turns time-based triggers into
//! queued runs.

mod cron;
mod queue;
mod scheduler;
mod worker;

pub use cron::CronSchedule;
pub use queue::{DispatchQueue, FileQueueStore, MemoryQueueStore, QueueStore, RunJob};
pub use scheduler::{
    FileTriggerState, MemoryTriggerState, Schedule, TriggerScheduler, TriggerStateStore,
};
pub use worker::WorkerPool;
