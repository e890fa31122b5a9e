//! Concrete tasks.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use probos_geometry::Vec3;
use probos_motion::ProbeRig;
use probos_types::{ProbeType, RigError};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::task::{Task, TaskContext};

// ────────────────────────────────────────────────────────────────────────────
// MoveProbesTask
// ────────────────────────────────────────────────────────────────────────────

/// Move a set of probes to global destinations through the queue.
pub struct MoveProbesTask {
    destinations: HashMap<ProbeType, Vec3>,
    xy_feed: f64,
    drop_feed: f64,
    soft_drop: bool,
}

impl MoveProbesTask {
    pub fn new(
        destinations: HashMap<ProbeType, Vec3>,
        xy_feed: f64,
        drop_feed: f64,
        soft_drop: bool,
    ) -> Self {
        Self {
            destinations,
            xy_feed,
            drop_feed,
            soft_drop,
        }
    }
}

#[async_trait]
impl Task for MoveProbesTask {
    fn name(&self) -> &str {
        "move-probes"
    }

    fn params(&self) -> serde_json::Value {
        json!({
            "destinations": self.destinations,
            "xy_feed": self.xy_feed,
            "drop_feed": self.drop_feed,
            "soft_drop": self.soft_drop,
        })
    }

    async fn run(&mut self, ctx: TaskContext) -> Result<serde_json::Value, RigError> {
        ctx.checkpoint()?;
        let moved = ctx
            .rig()
            .move_probes(&self.destinations, self.xy_feed, self.drop_feed, self.soft_drop)
            .await?;
        Ok(json!({ "moved": moved }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DemoProbingTask
// ────────────────────────────────────────────────────────────────────────────

/// Endless-loop demonstration of coordinated probing.
///
/// Touches a fixed list of fake pins round after round, restores the
/// starting pose when done, and clears the probing area before
/// propagating a cancellation.
pub struct DemoProbingTask {
    feed: f64,
    drop_feed: f64,
    z_offset: f64,
    rounds: u32,
}

/// Fake pin centers in the global frame, millimetres.
const DEMO_PINS: [Vec3; 10] = [
    Vec3::new(20.0, 70.0, -5.0),
    Vec3::new(-15.0, 35.0, -5.0),
    Vec3::new(-35.0, 70.0, -5.0),
    Vec3::new(15.0, 39.0, -5.0),
    Vec3::new(5.0, -20.0, -5.0),
    Vec3::new(25.0, -44.0, -5.0),
    Vec3::new(-30.0, -50.0, -5.0),
    Vec3::new(-25.0, -14.0, -5.0),
    Vec3::new(-31.0, 24.0, -5.0),
    Vec3::new(-10.0, 10.0, -5.0),
];

impl DemoProbingTask {
    pub fn new(feed: f64, drop_feed: f64, z_offset: f64, rounds: u32) -> Self {
        Self {
            // Clamp to ranges the rig can safely follow.
            feed: feed.clamp(0.0, 5000.0),
            drop_feed,
            z_offset: z_offset.clamp(-10.0, -3.0),
            rounds,
        }
    }

    async fn probe_party(&self, ctx: &TaskContext, rig: &ProbeRig) -> Result<(), RigError> {
        let mut pins = DEMO_PINS.to_vec();
        pins.sort_by(|a, b| a.x.total_cmp(&b.x));

        debug!("saving current rig pose");
        let initial_pose: HashMap<ProbeType, Vec3> = rig
            .probes()
            .iter()
            .map(|probe| (probe.probe_type(), probe.position_global()))
            .collect();

        for round in 0..self.rounds {
            for i in 0..pins.len() - 1 {
                debug!(run = i + 1, of = pins.len() - 1, "connectivity run");
                self.probe_against_master(ctx, rig, &pins, i).await?;
            }
            ctx.set_progress((round + 1) as f32 / self.rounds as f32)
                .await?;
        }

        debug!("restoring initial rig pose");
        rig.move_probes(&initial_pose, self.feed, self.drop_feed, false)
            .await?;
        Ok(())
    }

    /// Touch the pins right of `pins[master]` against the master pin, three
    /// at a time.  The leftmost probe holds the master pin while the three
    /// others walk the remaining pins in rail order.
    async fn probe_against_master(
        &self,
        ctx: &TaskContext,
        rig: &ProbeRig,
        pins: &[Vec3],
        master: usize,
    ) -> Result<(), RigError> {
        let master_pin = pins[master].with_z(self.z_offset);
        for chunk in pins[master + 1..].chunks(3) {
            ctx.checkpoint()?;
            let mut destinations = HashMap::from([(ProbeType::P11, master_pin)]);
            for (probe_type, pin) in [ProbeType::P1, ProbeType::P2, ProbeType::P21]
                .iter()
                .zip(chunk)
            {
                destinations.insert(*probe_type, pin.with_z(self.z_offset));
            }
            rig.move_probes(&destinations, self.feed, self.drop_feed, true)
                .await?;
            // Fake measurement dwell.
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }
}

impl Default for DemoProbingTask {
    fn default() -> Self {
        Self::new(1000.0, 6000.0, -5.0, 10)
    }
}

#[async_trait]
impl Task for DemoProbingTask {
    fn name(&self) -> &str {
        "demo-probing"
    }

    fn params(&self) -> serde_json::Value {
        json!({
            "feed": self.feed,
            "drop_feed": self.drop_feed,
            "z_offset": self.z_offset,
            "rounds": self.rounds,
        })
    }

    async fn run(&mut self, ctx: TaskContext) -> Result<serde_json::Value, RigError> {
        info!(rounds = self.rounds, "starting demo probing");
        let rig = ctx.rig();
        match self.probe_party(&ctx, &rig).await {
            Ok(()) => Ok(json!({ "rounds": self.rounds })),
            Err(err) if err.is_cancelled() => {
                // Leave the rig in a safe state before reporting the
                // cancellation.
                if let Err(clear_err) = rig.clear_probing_area().await {
                    warn!(error = %clear_err, "could not clear probing area");
                }
                Err(RigError::Cancelled)
            }
            Err(err) => Err(err),
        }
    }
}
