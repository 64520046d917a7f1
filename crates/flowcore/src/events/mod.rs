mod base;

pub use base::{EventType, ExecutionId, MonitorEvent};
