//! Event model broadcast over the rig's event bus.

use chrono::{DateTime, Utc};
use probos_geometry::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::probe::ProbeType;
use crate::task::TaskId;

/// A single event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Symbolic name of the component that emitted the event.
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// The event variants observable on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TaskScheduled {
        task: TaskId,
        name: String,
    },
    TaskStarted {
        task: TaskId,
        name: String,
    },
    /// Progress or status change of a live task.
    TaskChanged {
        task: TaskId,
        name: String,
        progress: f32,
    },
    /// A task reached a terminal state.
    TaskFinished {
        task: TaskId,
        name: String,
        cancelled: bool,
        had_error: bool,
    },
    ProbeMoveStarted {
        probe_type: ProbeType,
        start_global: Vec3,
        destination_global: Vec3,
        feed: f64,
    },
    ProbeMoveFinished {
        probe_type: ProbeType,
    },
    /// A hardware unit changed connection or readiness state.
    UnitStatusChanged {
        unit: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serde_is_internally_tagged() {
        let event = Event::new(
            "rig",
            EventPayload::ProbeMoveFinished {
                probe_type: ProbeType::P1,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "probe_move_finished");
        assert_eq!(json["payload"]["probe_type"], "P1");
    }

    #[test]
    fn task_finished_round_trips() {
        let payload = EventPayload::TaskFinished {
            task: Uuid::new_v4(),
            name: "move probes".to_string(),
            cancelled: true,
            had_error: false,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: EventPayload = serde_json::from_str(&json).unwrap();
        match back {
            EventPayload::TaskFinished {
                cancelled,
                had_error,
                ..
            } => {
                assert!(cancelled);
                assert!(!had_error);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
