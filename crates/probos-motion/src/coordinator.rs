//! Collision-free movement planning.
//!
//! The coordinator works on an immutable snapshot of the rig pose, entirely
//! in the global frame.  Planning has four stages:
//!
//! 1. validation — the assigned probes must form a contiguous run on the
//!    rail and their destinations must respect the rail order in X;
//! 2. gap filling — unassigned probes are parked outward of the assigned
//!    destinations at a raised Z level;
//! 3. feed throttling — adjacent probe pairs whose paths could intersect
//!    in time get their XY feeds clamped to the slower probe's X speed,
//!    with an extra margin cut on the slower one;
//! 4. batch generation — raise all Z axes, traverse the XY plane, then
//!    lower to the final destinations (optionally in two soft-drop stages).

use std::collections::HashMap;

use probos_geometry::Vec3;
use probos_types::{ProbeType, RigError};
use tracing::{debug, warn};

/// Distance between parked probes when filling destination gaps, in mm.
const PARKING_SPACING: f64 = 20.0;

/// Lower bound of the collision time window, in seconds.  Slightly below
/// zero to absorb rounding errors around simultaneous starts.
const COLLISION_WINDOW_START: f64 = -0.1;

/// Upper bound on throttling iterations.  The fixed-point loop converges
/// after one or two passes for every ordered destination set; the cap only
/// guards against numerically degenerate input.
const MAX_THROTTLE_PASSES: usize = 32;

/// Adjacent probe pairs checked for path intersections, ordered along the
/// rail.  The first element of each pair has the higher order index.
const COLLISION_PAIRS: [(ProbeType, ProbeType); 3] = [
    (ProbeType::P21, ProbeType::P2),
    (ProbeType::P2, ProbeType::P1),
    (ProbeType::P1, ProbeType::P11),
];

/// Immutable pose of one probe at planning time.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSnapshot {
    pub probe_type: ProbeType,
    /// Current position in the global frame.
    pub position_global: Vec3,
    /// Global Z of the probe's local origin; safety levels derive from the
    /// maximum over all probes.
    pub origin_z_global: f64,
}

/// Feed rates and descent parameters used by the planner.
#[derive(Debug, Clone, Copy)]
pub struct MoveSpeeds {
    /// XY traverse feed in mm/min.
    pub plane_feed: f64,
    /// Z raise/lower feed in mm/min.
    pub drop_feed: f64,
    /// Feed for the last soft-drop stage in mm/min.
    pub soft_drop_feed: f64,
    /// Z offset above the destination where the soft drop begins, in mm.
    pub soft_drop_offset: f64,
    /// Fractional feed cut applied to the slower probe of a throttled pair.
    pub collision_margin: f64,
}

impl Default for MoveSpeeds {
    fn default() -> Self {
        Self {
            plane_feed: 3000.0,
            drop_feed: 2000.0,
            soft_drop_feed: 300.0,
            soft_drop_offset: 1.0,
            collision_margin: 0.2,
        }
    }
}

/// One planned movement: a destination in the global frame plus the feed
/// it must be driven at.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeMovement {
    pub probe_type: ProbeType,
    pub destination_global: Vec3,
    pub feed: f64,
}

/// Movements safe to execute concurrently.  Batches must complete in full
/// before the next batch starts.
pub type Batch = Vec<ProbeMovement>;

/// Pure movement planner over a rig pose snapshot.
pub struct MoveCoordinator {
    snapshots: [ProbeSnapshot; 4],
    speeds: MoveSpeeds,
    safe_z_high_1: f64,
    safe_z_high_2: f64,
    safe_z_low: f64,
}

impl MoveCoordinator {
    /// Build a planner from one snapshot per probe slot.
    ///
    /// The highest common Z level varies between probes due to assembly
    /// tolerances, so the safety levels derive from the maximum origin Z.
    pub fn new(mut snapshots: [ProbeSnapshot; 4], speeds: MoveSpeeds) -> Self {
        snapshots.sort_by_key(|s| s.probe_type.order_index());
        let safe_z_high_2 = snapshots
            .iter()
            .map(|s| s.origin_z_global)
            .fold(f64::NEG_INFINITY, f64::max);
        let safe_z_high_1 = safe_z_high_2 + 5.0;
        let safe_z_low = safe_z_high_1 + 3.0;
        debug!(
            safe_z_high_1,
            safe_z_high_2, safe_z_low, "derived safety Z levels"
        );
        Self {
            snapshots,
            speeds,
            safe_z_high_1,
            safe_z_high_2,
            safe_z_low,
        }
    }

    /// Plan a validated, collision-free movement to `destinations`.
    ///
    /// Returns the batches in execution order: one raise batch, one XY
    /// traverse batch, then one (hard drop) or two (soft drop) lowering
    /// batches.  The last batch reaches the requested destinations exactly.
    ///
    /// # Errors
    ///
    /// [`RigError::InvalidDestinations`] when the assigned probes are not a
    /// contiguous run on the rail or the destinations violate the rail
    /// order in X.
    pub fn plan(
        &self,
        destinations: &HashMap<ProbeType, Vec3>,
        soft_drop: bool,
    ) -> Result<Vec<Batch>, RigError> {
        for (probe_type, destination) in destinations {
            debug!(probe = %probe_type, destination = %destination, "requested destination");
        }
        self.validate(destinations)?;
        let targets = self.fill_parking_positions(destinations);
        let feeds = self.throttle_feeds(&targets);
        Ok(self.build_batches(&targets, &feeds, soft_drop))
    }

    /// The raised Z level a probe travels the XY plane at.  The two inner
    /// probes get distinct levels so they can pass above each other's
    /// needle; the outer probes travel above both.
    fn raised_z(&self, probe_type: ProbeType) -> f64 {
        match probe_type {
            ProbeType::P1 => self.safe_z_high_1,
            ProbeType::P2 => self.safe_z_high_2,
            ProbeType::P11 | ProbeType::P21 => self.safe_z_low,
        }
    }

    fn snapshot(&self, probe_type: ProbeType) -> &ProbeSnapshot {
        &self.snapshots[probe_type.order_index()]
    }

    // ── validation ──────────────────────────────────────────────────────

    fn validate(&self, destinations: &HashMap<ProbeType, Vec3>) -> Result<(), RigError> {
        if destinations.is_empty() {
            return Err(RigError::InvalidDestinations(
                "no destinations assigned".to_string(),
            ));
        }
        if !Self::is_contiguous(destinations) {
            return Err(RigError::InvalidDestinations(
                "assigned set of probes must be contiguous".to_string(),
            ));
        }
        let mut assigned: Vec<ProbeType> = destinations.keys().copied().collect();
        assigned.sort_by_key(|p| p.order_index());
        for pair in assigned.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let (dest_l, dest_r) = (destinations[&left], destinations[&right]);
            if dest_l.x > dest_r.x {
                return Err(RigError::InvalidDestinations(format!(
                    "destinations violate rail order: {left} -> {dest_l}, {right} -> {dest_r}"
                )));
            }
        }
        Ok(())
    }

    /// Whether the assigned probes form a contiguous run under the order
    /// index (e.g. {P1, P2, P21} is fine, {P11, P2} is not).
    fn is_contiguous(destinations: &HashMap<ProbeType, Vec3>) -> bool {
        let mut started = false;
        let mut stopped = false;
        for probe_type in ProbeType::ALL_ORDERED {
            let assigned = destinations.contains_key(&probe_type);
            if stopped && assigned {
                return false;
            }
            started |= assigned;
            stopped |= started && !assigned;
        }
        true
    }

    // ── gap filling ─────────────────────────────────────────────────────

    /// Assign parking destinations to the unassigned probes, outward of the
    /// assigned destinations on each side.
    ///
    /// Parking slots sit `PARKING_SPACING` apart, starting
    /// `count × PARKING_SPACING` outward of the outermost assigned X on
    /// that side, where `count` is the number of unassigned probes on the
    /// side.  A probe already further out keeps its current X.  Parked
    /// probes travel at a raised Z and keep their current Y.
    fn fill_parking_positions(
        &self,
        destinations: &HashMap<ProbeType, Vec3>,
    ) -> HashMap<ProbeType, Vec3> {
        let mut targets = destinations.clone();
        let min_x = destinations
            .values()
            .map(|d| d.x)
            .fold(f64::INFINITY, f64::min);
        let max_x = destinations
            .values()
            .map(|d| d.x)
            .fold(f64::NEG_INFINITY, f64::max);

        let left: Vec<ProbeType> = ProbeType::ALL_ORDERED
            .into_iter()
            .take_while(|p| !destinations.contains_key(p))
            .collect();
        let mut x = min_x - left.len() as f64 * PARKING_SPACING;
        for probe_type in left {
            let current = self.snapshot(probe_type).position_global;
            if current.x < x {
                x = current.x;
            }
            targets.insert(
                probe_type,
                Vec3::new(x, current.y, self.raised_z(probe_type)),
            );
            x += PARKING_SPACING;
        }

        let right: Vec<ProbeType> = ProbeType::ALL_ORDERED
            .into_iter()
            .rev()
            .take_while(|p| !destinations.contains_key(p))
            .collect();
        let mut x = max_x + right.len() as f64 * PARKING_SPACING;
        for probe_type in right {
            let current = self.snapshot(probe_type).position_global;
            if current.x > x {
                x = current.x;
            }
            targets.insert(
                probe_type,
                Vec3::new(x, current.y, self.raised_z(probe_type)),
            );
            x -= PARKING_SPACING;
        }
        targets
    }

    // ── feed throttling ─────────────────────────────────────────────────

    /// Reduce XY feeds until no adjacent probe pair intersects in time.
    ///
    /// An adjustment to one pair changes the timing of the others, so the
    /// pairs are re-checked until a full pass finds no intersection.
    fn throttle_feeds(&self, targets: &HashMap<ProbeType, Vec3>) -> HashMap<ProbeType, f64> {
        let mut feeds: HashMap<ProbeType, f64> = ProbeType::ALL_ORDERED
            .into_iter()
            .map(|p| (p, self.speeds.plane_feed))
            .collect();

        for _ in 0..MAX_THROTTLE_PASSES {
            let mut adjusted = false;
            for (first, second) in COLLISION_PAIRS {
                let intersection = x_intersection(
                    self.snapshot(first).position_global,
                    targets[&first],
                    feeds[&first],
                    self.snapshot(second).position_global,
                    targets[&second],
                    feeds[&second],
                    self.speeds.collision_margin,
                );
                if let Some((t, feed_1, feed_2)) = intersection {
                    debug!(
                        pair = ?(first, second),
                        at_seconds = t,
                        feed_1,
                        feed_2,
                        "path intersection, reducing feeds"
                    );
                    feeds.insert(first, feed_1);
                    feeds.insert(second, feed_2);
                    adjusted = true;
                }
            }
            if !adjusted {
                return feeds;
            }
        }
        warn!("feed throttling did not settle, keeping last feeds");
        feeds
    }

    // ── batch generation ────────────────────────────────────────────────

    fn build_batches(
        &self,
        targets: &HashMap<ProbeType, Vec3>,
        feeds: &HashMap<ProbeType, f64>,
        soft_drop: bool,
    ) -> Vec<Batch> {
        let mut batches = Vec::with_capacity(if soft_drop { 4 } else { 3 });

        // Raise every probe to its traverse level.
        batches.push(
            ProbeType::ALL_ORDERED
                .into_iter()
                .map(|p| ProbeMovement {
                    probe_type: p,
                    destination_global: self
                        .snapshot(p)
                        .position_global
                        .with_z(self.raised_z(p)),
                    feed: self.speeds.drop_feed,
                })
                .collect(),
        );

        // Traverse the XY plane at the throttled feeds, Z held.
        batches.push(
            ProbeType::ALL_ORDERED
                .into_iter()
                .map(|p| ProbeMovement {
                    probe_type: p,
                    destination_global: targets[&p].with_z(self.raised_z(p)),
                    feed: feeds[&p],
                })
                .collect(),
        );

        // Lower to the destinations.  The soft-drop offset applies to every
        // probe in the batch, parked ones included.
        if soft_drop {
            batches.push(
                ProbeType::ALL_ORDERED
                    .into_iter()
                    .map(|p| ProbeMovement {
                        probe_type: p,
                        destination_global: targets[&p]
                            - Vec3::new(0.0, 0.0, self.speeds.soft_drop_offset),
                        feed: self.speeds.drop_feed,
                    })
                    .collect(),
            );
        }
        let final_feed = if soft_drop {
            self.speeds.soft_drop_feed
        } else {
            self.speeds.drop_feed
        };
        batches.push(
            ProbeType::ALL_ORDERED
                .into_iter()
                .map(|p| ProbeMovement {
                    probe_type: p,
                    destination_global: targets[&p],
                    feed: final_feed,
                })
                .collect(),
        );
        batches
    }
}

/// Check whether two straight-line movements intersect on the X axis
/// within their shared travel time.
///
/// Returns the collision time plus the adjusted feeds for both movements:
/// both X speeds are clamped to the slower one and the slower-adjusted
/// side is cut further by `margin` to keep a buffer zone.
#[allow(clippy::too_many_arguments)]
fn x_intersection(
    source_1: Vec3,
    destination_1: Vec3,
    feed_1: f64,
    source_2: Vec3,
    destination_2: Vec3,
    feed_2: f64,
    margin: f64,
) -> Option<(f64, f64, f64)> {
    let x_min_1 = source_1.x.min(destination_1.x);
    let x_max_1 = source_1.x.max(destination_1.x);

    // Pre-check: the second movement must touch the first one's X range.
    let could_intersect = (x_min_1..=x_max_1).contains(&source_2.x)
        || (x_min_1..=x_max_1).contains(&destination_2.x);
    if !could_intersect {
        return None;
    }

    let delta_1 = destination_1 - source_1;
    let dist_1 = delta_1.norm();
    let delta_2 = destination_2 - source_2;
    let dist_2 = delta_2.norm();
    if dist_1 == 0.0 || dist_2 == 0.0 {
        return None;
    }

    // X speeds in mm/s.
    let vx_1 = feed_1 / 60.0 * (delta_1.x / dist_1);
    let vx_2 = feed_2 / 60.0 * (delta_2.x / dist_2);
    if vx_1 == 0.0 || vx_2 == 0.0 {
        // A probe that does not move in X cannot close the gap; an overlap
        // in the final positions is caught by destination validation.
        return None;
    }
    let vx_diff = vx_1 - vx_2;
    if vx_diff.abs() < 1e-7 {
        return None;
    }

    // Time for the differential speed to close the X gap between the
    // starting positions.
    let t_travel = (source_2.x - source_1.x) / vx_diff;
    let travel_time_1 = dist_1 / (feed_1 / 60.0);
    let travel_time_2 = dist_2 / (feed_2 / 60.0);
    if (COLLISION_WINDOW_START..=travel_time_1).contains(&t_travel)
        && (COLLISION_WINDOW_START..=travel_time_2).contains(&t_travel)
    {
        let min_vx = vx_1.abs().min(vx_2.abs());
        let mut feed_1_adjusted = feed_1 * min_vx / vx_1.abs();
        let mut feed_2_adjusted = feed_2 * min_vx / vx_2.abs();
        // Buffer zone: slow the trailing side down a little further.
        if feed_1_adjusted < feed_2_adjusted {
            feed_1_adjusted -= feed_1_adjusted * margin;
        } else {
            feed_2_adjusted -= feed_2_adjusted * margin;
        }
        return Some((t_travel, feed_1_adjusted, feed_2_adjusted));
    }
    None
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
