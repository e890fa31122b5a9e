//! The `Probe` capability trait.
//!
//! A probe is a three-axis actuator whose local coordinate frame is related
//! to the shared global frame by a rigid calibration transform.  All
//! cross-probe planning happens in global coordinates; the conversion to a
//! probe's local frame happens here, at the driver boundary.

use async_trait::async_trait;
use probos_geometry::{Transform, Vec3};
use probos_types::{ProbeConfig, ProbeStatus, ProbeType, RigError};
use uuid::Uuid;

/// One actuator axis of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// A single movable probe unit.
///
/// Drivers implement the required methods; identity accessors and the
/// global-frame helpers are provided on top of [`config`][Probe::config]
/// and [`transform`][Probe::transform].
#[async_trait]
pub trait Probe: Send + Sync {
    /// Calibration configuration the driver was built from.
    fn config(&self) -> &ProbeConfig;

    /// The cached local→global calibration transform.
    fn transform(&self) -> &Transform;

    /// Whether the unit is currently reachable.
    fn connected(&self) -> bool;

    /// Whether a movement command is in flight.
    fn moving(&self) -> bool;

    /// Current position in the probe-local frame.
    fn position_local(&self) -> Vec3;

    /// Bring the unit up (open the connection, reset controller state).
    async fn start(&self) -> Result<(), RigError>;

    /// Shut the unit down.
    async fn stop(&self) -> Result<(), RigError>;

    /// Home the given axis, or all axes when `None`.
    async fn home(&self, axis: Option<Axis>) -> Result<(), RigError>;

    /// Move to `destination` in the local frame at `feed` mm/min and wait
    /// until the position is reached.
    ///
    /// # Errors
    ///
    /// [`RigError::HardwareConnection`] when the unit is not connected,
    /// [`RigError::HardwareFault`] when the controller rejects the move.
    async fn move_to_local(&self, destination: Vec3, feed: f64) -> Result<(), RigError>;

    /// Probe the four cardinal contact points around the current pin and
    /// return them in local coordinates (+X, −X, +Y, −Y order).
    async fn center_probe(&self) -> Result<[Vec3; 4], RigError>;

    // ── provided ────────────────────────────────────────────────────────

    fn id(&self) -> Uuid {
        self.config().id
    }

    fn name(&self) -> &str {
        &self.config().name
    }

    fn probe_type(&self) -> ProbeType {
        self.config().probe_type
    }

    /// Map a local-frame point into the global frame.
    fn to_global(&self, local: Vec3) -> Vec3 {
        self.transform().to_global(local)
    }

    /// Map a global-frame point into the local frame.
    fn to_local(&self, global: Vec3) -> Vec3 {
        self.transform().to_local(global)
    }

    /// Current position in the global frame, derived from
    /// [`position_local`][Probe::position_local].
    fn position_global(&self) -> Vec3 {
        self.to_global(self.position_local())
    }

    /// Global position of the probe's local origin.
    fn origin_global(&self) -> Vec3 {
        self.transform().origin_global()
    }

    /// The safety parking position nearest the homed position, in the
    /// local frame.
    fn safety_position(&self) -> Vec3 {
        self.config().safety_position()
    }

    /// Move to `destination` given in the global frame.
    async fn move_to_global(&self, destination: Vec3, feed: f64) -> Result<(), RigError> {
        let local = self.to_local(destination);
        self.move_to_local(local, feed).await
    }

    /// Park at the safety position.
    async fn move_to_safety_position(&self, feed: f64) -> Result<(), RigError> {
        let destination = self.safety_position();
        self.move_to_local(destination, feed).await
    }

    /// Snapshot of the unit's live state.
    fn status(&self) -> ProbeStatus {
        let local = self.position_local();
        ProbeStatus {
            id: self.id(),
            name: self.name().to_string(),
            probe_type: self.probe_type(),
            order_index: self.probe_type().order_index(),
            connected: self.connected(),
            moving: self.moving(),
            position_local: local,
            position_global: self.to_global(local),
        }
    }
}
