//! The single-flight task processor.
//!
//! Every submitted task gets a persisted record and a spawned, gated
//! runner.  The scheduler loop opens one gate at a time and waits for the
//! runner to finish before popping the next entry, so at most one task
//! body ever actuates hardware.  Cancellation is cooperative through a
//! [`CancellationToken`]; a task cancelled while still queued never runs
//! at all.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use probos_bus::{EventBus, Topic};
use probos_motion::ProbeRig;
use probos_types::{Event, EventPayload, RigError, TaskId, TaskRecord, TaskStatus};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::TaskStore;
use crate::task::{Task, TaskContext};

const EVENT_SOURCE: &str = "task-processor";
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

type ResultRelay = oneshot::Sender<Result<serde_json::Value, RigError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ScheduledEntry {
    id: TaskId,
    name: String,
    /// Opening the gate releases the runner; dropping it without sending
    /// counts as a cancellation.
    gate: oneshot::Sender<()>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
struct CurrentTask {
    id: TaskId,
    name: String,
    token: CancellationToken,
}

/// Single-flight task engine.
pub struct TaskProcessor {
    rig: Arc<ProbeRig>,
    store: Arc<dyn TaskStore>,
    bus: EventBus,
    queue: Mutex<VecDeque<ScheduledEntry>>,
    current: Mutex<Option<CurrentTask>>,
}

impl TaskProcessor {
    pub fn new(rig: Arc<ProbeRig>, store: Arc<dyn TaskStore>) -> Self {
        let bus = rig.bus();
        Self {
            rig,
            store,
            bus,
            queue: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
        }
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    /// Submit a task and return its id immediately.
    pub async fn schedule_task(&self, task: Box<dyn Task>) -> Result<TaskId, RigError> {
        self.enqueue(task, None).await
    }

    /// Submit a task and wait for its result.
    ///
    /// The task still goes through the queue, so it runs only once every
    /// previously scheduled task has reached a terminal state.
    pub async fn execute_task(
        &self,
        task: Box<dyn Task>,
    ) -> Result<serde_json::Value, RigError> {
        let (relay, result) = oneshot::channel();
        self.enqueue(task, Some(relay)).await?;
        result
            .await
            .map_err(|_| RigError::Storage("task result channel closed".to_string()))?
    }

    async fn enqueue(
        &self,
        task: Box<dyn Task>,
        relay: Option<ResultRelay>,
    ) -> Result<TaskId, RigError> {
        let record = TaskRecord::new(task.name(), task.params());
        let id = record.id;
        let name = record.name.clone();
        self.store.insert(record).await?;
        self.bus.publish(
            Topic::Tasks,
            Event::new(
                EVENT_SOURCE,
                EventPayload::TaskScheduled {
                    task: id,
                    name: name.clone(),
                },
            ),
        );

        let (gate, gate_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let runner = TaskRunner {
            store: Arc::clone(&self.store),
            bus: self.bus.clone(),
            rig: Arc::clone(&self.rig),
            id,
            name: name.clone(),
            token: token.clone(),
        };
        let handle = tokio::spawn(runner.run(task, gate_rx, relay));
        lock(&self.queue).push_back(ScheduledEntry {
            id,
            name,
            gate,
            token,
            handle,
        });
        info!(task = %id, "task scheduled");
        Ok(id)
    }

    /// Drive the queue.  Run exactly one instance of this loop.
    ///
    /// A failing or panicking task never breaks the loop.
    pub async fn run_scheduler(self: Arc<Self>) {
        loop {
            let entry = lock(&self.queue).pop_front();
            let Some(entry) = entry else {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            };
            debug!(task = %entry.id, name = %entry.name, "dispatching task");
            *lock(&self.current) = Some(CurrentTask {
                id: entry.id,
                name: entry.name.clone(),
                token: entry.token.clone(),
            });
            // A receiver that is already gone means the runner has observed
            // a cancellation; it finalizes the record on its own.
            let _ = entry.gate.send(());
            if let Err(join_err) = entry.handle.await {
                error!(task = %entry.id, error = %join_err, "task runner aborted");
                self.mark_aborted(entry.id, &entry.name).await;
            }
            *lock(&self.current) = None;
        }
    }

    /// Cancel the task that is currently running, if any.
    pub fn cancel(&self) {
        if let Some(current) = lock(&self.current).as_ref() {
            info!(task = %current.id, "cancelling current task");
            current.token.cancel();
        }
    }

    /// Cancel a task by id, whether it is running or still queued.
    ///
    /// Returns whether a live task with that id was found.  A queued task
    /// is removed from the queue and its record goes straight to
    /// `Cancelled` without the task ever running.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        if let Some(current) = lock(&self.current).as_ref()
            && current.id == id
        {
            info!(task = %id, "cancelling running task");
            current.token.cancel();
            return true;
        }
        let mut queue = lock(&self.queue);
        if let Some(position) = queue.iter().position(|entry| entry.id == id) {
            if let Some(entry) = queue.remove(position) {
                info!(task = %id, "cancelling queued task");
                entry.token.cancel();
                return true;
            }
        }
        false
    }

    /// Id and name of the currently running task.
    pub fn current_task(&self) -> Option<(TaskId, String)> {
        lock(&self.current)
            .as_ref()
            .map(|current| (current.id, current.name.clone()))
    }

    /// Reclassify records left over from a previous run.
    ///
    /// Call once at startup, before the scheduler: stale `SCHEDULED`
    /// records are cancelled; stale `RUNNING` records indicate an unclean
    /// shutdown and are cancelled with a warning.
    pub async fn house_keeping(&self) -> Result<(), RigError> {
        for record in self.store.all().await? {
            match record.status {
                TaskStatus::Scheduled => {
                    info!(task = %record.id, "cancelling stale scheduled task");
                    self.reclassify_as_cancelled(record).await?;
                }
                TaskStatus::Running => {
                    warn!(
                        task = %record.id,
                        "stale running task found, assuming unclean shutdown"
                    );
                    self.reclassify_as_cancelled(record).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn reclassify_as_cancelled(&self, mut record: TaskRecord) -> Result<(), RigError> {
        record.status = TaskStatus::Cancelled;
        record.finished_at = Some(Utc::now());
        let (id, name) = (record.id, record.name.clone());
        self.store.update(record).await?;
        self.bus.publish(
            Topic::Tasks,
            Event::new(
                EVENT_SOURCE,
                EventPayload::TaskFinished {
                    task: id,
                    name,
                    cancelled: true,
                    had_error: false,
                },
            ),
        );
        Ok(())
    }

    /// Last-resort bookkeeping when a runner terminated without
    /// finalizing its own record.
    async fn mark_aborted(&self, id: TaskId, name: &str) {
        match self.store.get(id).await {
            Ok(Some(mut record)) if !record.status.is_terminal() => {
                record.status = TaskStatus::Errored;
                record.error = Some("task runner aborted".to_string());
                record.finished_at = Some(Utc::now());
                if let Err(err) = self.store.update(record).await {
                    error!(task = %id, error = %err, "could not persist aborted task");
                    return;
                }
                self.bus.publish(
                    Topic::Tasks,
                    Event::new(
                        EVENT_SOURCE,
                        EventPayload::TaskFinished {
                            task: id,
                            name: name.to_string(),
                            cancelled: false,
                            had_error: true,
                        },
                    ),
                );
            }
            Ok(_) => {}
            Err(err) => error!(task = %id, error = %err, "could not load aborted task"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TaskRunner
// ────────────────────────────────────────────────────────────────────────────

/// Everything one spawned runner needs to execute and finalize a task.
struct TaskRunner {
    store: Arc<dyn TaskStore>,
    bus: EventBus,
    rig: Arc<ProbeRig>,
    id: TaskId,
    name: String,
    token: CancellationToken,
}

impl TaskRunner {
    async fn run(
        self,
        mut task: Box<dyn Task>,
        gate: oneshot::Receiver<()>,
        relay: Option<ResultRelay>,
    ) {
        let opened = tokio::select! {
            opened = gate => opened.is_ok(),
            () = self.token.cancelled() => false,
        };
        if !opened || self.token.is_cancelled() {
            debug!(task = %self.id, "task cancelled before it ever ran");
            self.finalize(Err(RigError::Cancelled), relay).await;
            return;
        }

        if let Err(err) = self.mark_running().await {
            error!(task = %self.id, error = %err, "could not mark task as running");
            self.finalize(Err(err), relay).await;
            return;
        }

        let ctx = TaskContext::new(
            Arc::clone(&self.rig),
            self.bus.clone(),
            self.token.clone(),
            Arc::clone(&self.store),
            self.id,
            self.name.clone(),
        );
        let outcome = task.run(ctx).await;
        // A cancellation observed during the run wins over the value the
        // task happened to return.
        let outcome = match outcome {
            Err(err) if err.is_cancelled() => Err(RigError::Cancelled),
            Ok(_) if self.token.is_cancelled() => Err(RigError::Cancelled),
            other => other,
        };
        self.finalize(outcome, relay).await;
    }

    async fn mark_running(&self) -> Result<(), RigError> {
        let mut record = self
            .store
            .get(self.id)
            .await?
            .ok_or_else(|| RigError::Storage(format!("unknown task {}", self.id)))?;
        record.status = TaskStatus::Running;
        self.store.update(record).await?;
        self.bus.publish(
            Topic::Tasks,
            Event::new(
                EVENT_SOURCE,
                EventPayload::TaskStarted {
                    task: self.id,
                    name: self.name.clone(),
                },
            ),
        );
        info!(task = %self.id, name = %self.name, "task started");
        Ok(())
    }

    /// Persist the terminal state, then notify the bus, then relay the
    /// outcome to a waiting `execute_task` caller.
    async fn finalize(&self, outcome: Result<serde_json::Value, RigError>, relay: Option<ResultRelay>) {
        let (cancelled, had_error) = match &outcome {
            Ok(_) => (false, false),
            Err(err) if err.is_cancelled() => (true, false),
            Err(_) => (false, true),
        };
        match self.store.get(self.id).await {
            Ok(Some(mut record)) if !record.status.is_terminal() => {
                match &outcome {
                    Ok(value) => {
                        record.status = TaskStatus::Finished;
                        record.progress = 1.0;
                        record.result = Some(value.clone());
                    }
                    Err(err) if err.is_cancelled() => record.status = TaskStatus::Cancelled,
                    Err(err) => {
                        record.status = TaskStatus::Errored;
                        record.error = Some(err.to_string());
                    }
                }
                record.finished_at = Some(Utc::now());
                if let Err(err) = self.store.update(record).await {
                    error!(task = %self.id, error = %err, "could not persist terminal task state");
                }
                self.bus.publish(
                    Topic::Tasks,
                    Event::new(
                        EVENT_SOURCE,
                        EventPayload::TaskFinished {
                            task: self.id,
                            name: self.name.clone(),
                            cancelled,
                            had_error,
                        },
                    ),
                );
            }
            Ok(Some(_)) => debug!(task = %self.id, "task record already terminal"),
            Ok(None) => warn!(task = %self.id, "no record for finished task"),
            Err(err) => error!(task = %self.id, error = %err, "could not load task record"),
        }
        info!(task = %self.id, cancelled, had_error, "task finished");
        if let Some(relay) = relay {
            let _ = relay.send(outcome);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use probos_hal::Probe;
    use probos_hal::sim::SimProbe;
    use probos_types::RigConfig;
    use serde_json::json;

    struct SleepTask {
        name: String,
        millis: u64,
    }

    impl SleepTask {
        fn new(name: &str, millis: u64) -> Self {
            Self {
                name: name.to_string(),
                millis,
            }
        }
    }

    #[async_trait]
    impl Task for SleepTask {
        fn name(&self) -> &str {
            &self.name
        }

        fn params(&self) -> serde_json::Value {
            json!({ "millis": self.millis })
        }

        async fn run(&mut self, ctx: TaskContext) -> Result<serde_json::Value, RigError> {
            // Sleep in slices so a cancellation is observed promptly.
            for _ in 0..10 {
                ctx.checkpoint()?;
                tokio::time::sleep(Duration::from_millis(self.millis / 10)).await;
            }
            Ok(json!({ "slept_ms": self.millis }))
        }
    }

    struct FailingTask;

    #[async_trait]
    impl Task for FailingTask {
        fn name(&self) -> &str {
            "failing"
        }

        fn params(&self) -> serde_json::Value {
            json!({})
        }

        async fn run(&mut self, _ctx: TaskContext) -> Result<serde_json::Value, RigError> {
            Err(RigError::HardwareFault {
                unit: "probe 2".to_string(),
                details: "endstop triggered".to_string(),
            })
        }
    }

    struct ProgressTask;

    #[async_trait]
    impl Task for ProgressTask {
        fn name(&self) -> &str {
            "progress"
        }

        fn params(&self) -> serde_json::Value {
            json!({})
        }

        async fn run(&mut self, ctx: TaskContext) -> Result<serde_json::Value, RigError> {
            ctx.set_progress(0.5).await?;
            Ok(json!({}))
        }
    }

    async fn test_processor() -> (Arc<TaskProcessor>, Arc<InMemoryTaskStore>, EventBus) {
        let bus = EventBus::default();
        let probes: Vec<Arc<dyn Probe>> = RigConfig::simulated()
            .probes
            .into_iter()
            .map(|config| Arc::new(SimProbe::new(config, bus.clone())) as Arc<dyn Probe>)
            .collect();
        let rig = Arc::new(ProbeRig::new("test rig", probes, bus.clone()).unwrap());
        rig.start().await.unwrap();
        let store = Arc::new(InMemoryTaskStore::new());
        let processor = Arc::new(TaskProcessor::new(rig, Arc::clone(&store) as Arc<dyn TaskStore>));
        (processor, store, bus)
    }

    use crate::store::InMemoryTaskStore;

    async fn status_of(store: &InMemoryTaskStore, id: TaskId) -> TaskStatus {
        store.get(id).await.unwrap().unwrap().status
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_tasks_one_at_a_time() {
        let (processor, store, bus) = test_processor().await;
        let mut rx = bus.subscribe(Topic::Tasks);

        let first = processor
            .schedule_task(Box::new(SleepTask::new("first", 200)))
            .await
            .unwrap();
        let second = processor
            .schedule_task(Box::new(SleepTask::new("second", 50)))
            .await
            .unwrap();
        let scheduler = tokio::spawn(Arc::clone(&processor).run_scheduler());

        let mut order = Vec::new();
        while order.iter().filter(|(kind, _)| *kind == "finished").count() < 2 {
            match rx.recv().await.expect("event stream open").payload {
                EventPayload::TaskStarted { task, .. } => order.push(("started", task)),
                EventPayload::TaskFinished { task, .. } => order.push(("finished", task)),
                _ => {}
            }
        }
        scheduler.abort();

        assert_eq!(
            order,
            vec![
                ("started", first),
                ("finished", first),
                ("started", second),
                ("finished", second),
            ]
        );
        assert_eq!(status_of(&store, first).await, TaskStatus::Finished);
        assert_eq!(status_of(&store, second).await, TaskStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_task_cancelled_without_ever_running() {
        let (processor, store, bus) = test_processor().await;
        let mut rx = bus.subscribe(Topic::Tasks);

        let first = processor
            .schedule_task(Box::new(SleepTask::new("first", 200)))
            .await
            .unwrap();
        let second = processor
            .schedule_task(Box::new(SleepTask::new("second", 50)))
            .await
            .unwrap();
        assert!(processor.cancel_task(second));

        let scheduler = tokio::spawn(Arc::clone(&processor).run_scheduler());

        let mut finished = 0;
        let mut second_started = false;
        while finished < 2 {
            match rx.recv().await.expect("event stream open").payload {
                EventPayload::TaskStarted { task, .. } if task == second => {
                    second_started = true;
                }
                EventPayload::TaskFinished { task, cancelled, .. } => {
                    finished += 1;
                    if task == second {
                        assert!(cancelled);
                    }
                }
                _ => {}
            }
        }
        scheduler.abort();

        assert!(!second_started, "cancelled queued task must never start");
        assert_eq!(status_of(&store, second).await, TaskStatus::Cancelled);
        assert_eq!(status_of(&store, first).await, TaskStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn running_task_cancels_at_next_checkpoint() {
        let (processor, store, bus) = test_processor().await;
        let mut rx = bus.subscribe(Topic::Tasks);

        let id = processor
            .schedule_task(Box::new(SleepTask::new("long", 60_000)))
            .await
            .unwrap();
        let scheduler = tokio::spawn(Arc::clone(&processor).run_scheduler());

        loop {
            if let EventPayload::TaskStarted { .. } =
                rx.recv().await.expect("event stream open").payload
            {
                break;
            }
        }
        processor.cancel();

        loop {
            if let EventPayload::TaskFinished { task, cancelled, had_error, .. } =
                rx.recv().await.expect("event stream open").payload
            {
                assert_eq!(task, id);
                assert!(cancelled);
                assert!(!had_error);
                break;
            }
        }
        scheduler.abort();
        assert_eq!(status_of(&store, id).await, TaskStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_is_recorded_as_errored() {
        let (processor, store, bus) = test_processor().await;
        let mut rx = bus.subscribe(Topic::Tasks);
        let id = processor
            .schedule_task(Box::new(FailingTask))
            .await
            .unwrap();
        let scheduler = tokio::spawn(Arc::clone(&processor).run_scheduler());

        loop {
            if let EventPayload::TaskFinished { cancelled, had_error, .. } =
                rx.recv().await.expect("event stream open").payload
            {
                assert!(!cancelled);
                assert!(had_error);
                break;
            }
        }
        scheduler.abort();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Errored);
        assert!(record.error.unwrap().contains("endstop"));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_task_relays_the_result() {
        let (processor, _store, _bus) = test_processor().await;
        let scheduler = tokio::spawn(Arc::clone(&processor).run_scheduler());

        let result = processor
            .execute_task(Box::new(SleepTask::new("quick", 50)))
            .await
            .unwrap();
        scheduler.abort();
        assert_eq!(result, json!({ "slept_ms": 50 }));
    }

    #[tokio::test(start_paused = true)]
    async fn house_keeping_reclassifies_stale_records() {
        let (processor, store, _bus) = test_processor().await;

        let stale_scheduled = TaskRecord::new("stale scheduled", json!({}));
        let mut stale_running = TaskRecord::new("stale running", json!({}));
        stale_running.status = TaskStatus::Running;
        let mut done = TaskRecord::new("done", json!({}));
        done.status = TaskStatus::Finished;
        let ids = (stale_scheduled.id, stale_running.id, done.id);
        store.insert(stale_scheduled).await.unwrap();
        store.insert(stale_running).await.unwrap();
        store.insert(done).await.unwrap();

        processor.house_keeping().await.unwrap();

        assert_eq!(status_of(&store, ids.0).await, TaskStatus::Cancelled);
        assert_eq!(status_of(&store, ids.1).await, TaskStatus::Cancelled);
        assert_eq!(status_of(&store, ids.2).await, TaskStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn records_are_persisted_before_events_are_published() {
        let (processor, store, bus) = test_processor().await;
        let mut rx = bus.subscribe(Topic::Tasks);
        let id = processor
            .schedule_task(Box::new(ProgressTask))
            .await
            .unwrap();
        let scheduler = tokio::spawn(Arc::clone(&processor).run_scheduler());

        // Events may be observed later than they were published, so the
        // store must be at or past the state each event announces.
        loop {
            let event = rx.recv().await.expect("event stream open");
            let record = store.get(id).await.unwrap().expect("record persisted");
            match event.payload {
                EventPayload::TaskStarted { .. } => {
                    assert_ne!(
                        record.status,
                        TaskStatus::Scheduled,
                        "start event outran the store"
                    );
                }
                EventPayload::TaskChanged { progress, .. } => {
                    assert_eq!(progress, 0.5);
                    assert!(
                        record.progress >= progress,
                        "progress event outran the store"
                    );
                }
                EventPayload::TaskFinished { .. } => {
                    assert!(record.status.is_terminal());
                    break;
                }
                _ => {}
            }
        }
        scheduler.abort();
    }
}
