//! Single-flight task execution for the probing rig.
//!
//! Hardware-actuating work is wrapped in [`Task`] implementations and
//! submitted to the [`TaskProcessor`], which guarantees that at most one
//! task body touches the hardware at a time.  Task lifecycle records are
//! persisted through the [`TaskStore`] port before the corresponding bus
//! event is published, so observers never see an event the store cannot
//! confirm.

pub mod jobs;
pub mod processor;
pub mod store;
pub mod task;

pub use jobs::{DemoProbingTask, MoveProbesTask};
pub use processor::TaskProcessor;
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{Task, TaskContext};
