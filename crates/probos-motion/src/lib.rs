//! Motion planning and orchestration for the four-probe rig.
//!
//! [`MoveCoordinator`] is a pure planner: it validates a destination set,
//! parks unassigned probes out of the way, throttles feeds so probe paths
//! never intersect in time, and emits batches of movements that are safe to
//! run concurrently.  [`ProbeRig`] owns the hardware units and executes
//! those batches.

pub mod coordinator;
pub mod rig;

pub use coordinator::{Batch, MoveCoordinator, MoveSpeeds, ProbeMovement, ProbeSnapshot};
pub use rig::ProbeRig;
