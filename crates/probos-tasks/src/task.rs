//! The `Task` trait and the context handed to a running task.

use std::sync::Arc;

use async_trait::async_trait;
use probos_bus::{EventBus, Topic};
use probos_motion::ProbeRig;
use probos_types::{Event, EventPayload, RigError, TaskId};
use tokio_util::sync::CancellationToken;

use crate::store::TaskStore;

/// A unit of hardware-actuating work.
///
/// Tasks are cancelled cooperatively: long-running implementations call
/// [`TaskContext::checkpoint`] at their suspension points and run their own
/// cleanup (e.g. clearing the probing area) before returning
/// [`RigError::Cancelled`].
#[async_trait]
pub trait Task: Send {
    /// Stable task name, used in records and events.
    fn name(&self) -> &str;

    /// The parameters the task was built with, for the persisted record.
    fn params(&self) -> serde_json::Value;

    /// Execute the task body.  Runs at most once.
    async fn run(&mut self, ctx: TaskContext) -> Result<serde_json::Value, RigError>;
}

/// Execution context of one task run.
#[derive(Clone)]
pub struct TaskContext {
    rig: Arc<ProbeRig>,
    bus: EventBus,
    token: CancellationToken,
    store: Arc<dyn TaskStore>,
    task_id: TaskId,
    task_name: String,
}

impl TaskContext {
    pub(crate) fn new(
        rig: Arc<ProbeRig>,
        bus: EventBus,
        token: CancellationToken,
        store: Arc<dyn TaskStore>,
        task_id: TaskId,
        task_name: String,
    ) -> Self {
        Self {
            rig,
            bus,
            token,
            store,
            task_id,
            task_name,
        }
    }

    pub fn rig(&self) -> Arc<ProbeRig> {
        Arc::clone(&self.rig)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Observe a pending cancellation request.
    ///
    /// Tasks call this at every suspension point; once it fails the task
    /// runs its cleanup and returns the error.
    pub fn checkpoint(&self) -> Result<(), RigError> {
        if self.token.is_cancelled() {
            Err(RigError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Report task progress in `[0, 1]`.
    ///
    /// The record is persisted before the `TaskChanged` event goes out.
    pub async fn set_progress(&self, progress: f32) -> Result<(), RigError> {
        let mut record = self
            .store
            .get(self.task_id)
            .await?
            .ok_or_else(|| RigError::Storage(format!("unknown task {}", self.task_id)))?;
        record.progress = progress.clamp(0.0, 1.0);
        let progress = record.progress;
        self.store.update(record).await?;
        self.bus.publish(
            Topic::Tasks,
            Event::new(
                "task-processor",
                EventPayload::TaskChanged {
                    task: self.task_id,
                    name: self.task_name.clone(),
                    progress,
                },
            ),
        );
        Ok(())
    }
}
