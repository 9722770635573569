//! Broadcasting of job state transitions to external observers.

pub mod job_events;

pub use job_events::{JobEvent, JobEventBroadcaster, JobEventKind};
