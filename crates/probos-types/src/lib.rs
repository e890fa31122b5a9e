//! Shared value types for the probing rig: probe identity and
//! configuration, task status records, the event model and the global
//! error taxonomy.

pub mod error;
pub mod event;
pub mod probe;
pub mod task;

pub use error::RigError;
pub use event::{Event, EventPayload};
pub use probe::{
    DigitalLevel, MultiplexerChannel, ProbeConfig, ProbeStatus, ProbeType, RigConfig,
};
pub use task::{TaskId, TaskRecord, TaskStatus};
