//! The rig orchestrator: owns the hardware units and executes planned
//! movements.
//!
//! All safe movement goes through [`ProbeRig::move_probes`], which plans
//! with the [`MoveCoordinator`] first and only touches hardware once the
//! destination set has been validated.  Batches run strictly one after
//! another; the movements inside a batch run concurrently.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use probos_bus::{EventBus, Topic};
use probos_geometry::Vec3;
use probos_hal::{Axis, Camera, PowerController, Probe, SignalRouter, UartAdapter};
use probos_types::{Event, EventPayload, ProbeStatus, ProbeType, RigError};
use tracing::{error, info};

use crate::coordinator::{MoveCoordinator, MoveSpeeds, ProbeSnapshot};

const DEFAULT_UART_BAUD_RATE: u32 = 115_200;

/// The assembled probing rig.
pub struct ProbeRig {
    name: String,
    /// Exactly one probe per slot, sorted by order index.
    probes: [Arc<dyn Probe>; 4],
    cameras: Vec<Arc<dyn Camera>>,
    signal_router: Option<Arc<dyn SignalRouter>>,
    power_controller: Option<Arc<dyn PowerController>>,
    uart_adapter: Option<Arc<dyn UartAdapter>>,
    speeds: MoveSpeeds,
    bus: EventBus,
}

impl ProbeRig {
    /// Assemble a rig from one probe per slot.
    ///
    /// # Errors
    ///
    /// [`RigError::HardwareFault`] when a slot is missing or doubly
    /// occupied.
    pub fn new(
        name: impl Into<String>,
        probes: Vec<Arc<dyn Probe>>,
        bus: EventBus,
    ) -> Result<Self, RigError> {
        let name = name.into();
        if probes.len() != 4 {
            return Err(RigError::HardwareFault {
                unit: name,
                details: format!("expected 4 probes, got {}", probes.len()),
            });
        }
        let mut slots: [Option<Arc<dyn Probe>>; 4] = [None, None, None, None];
        for probe in probes {
            let index = probe.probe_type().order_index();
            if slots[index].is_some() {
                return Err(RigError::HardwareFault {
                    unit: name,
                    details: format!("probe slot {} doubly occupied", probe.probe_type()),
                });
            }
            slots[index] = Some(probe);
        }
        // Length and uniqueness checked above, so every slot is filled.
        let mut ordered = slots.into_iter().flatten();
        let probes = std::array::from_fn(|_| {
            ordered
                .next()
                .unwrap_or_else(|| unreachable!("all four slots are occupied"))
        });
        Ok(Self {
            name,
            probes,
            cameras: Vec::new(),
            signal_router: None,
            power_controller: None,
            uart_adapter: None,
            speeds: MoveSpeeds::default(),
            bus,
        })
    }

    pub fn with_cameras(mut self, cameras: Vec<Arc<dyn Camera>>) -> Self {
        self.cameras = cameras;
        self
    }

    pub fn with_signal_router(mut self, router: Arc<dyn SignalRouter>) -> Self {
        self.signal_router = Some(router);
        self
    }

    pub fn with_power_controller(mut self, power: Arc<dyn PowerController>) -> Self {
        self.power_controller = Some(power);
        self
    }

    pub fn with_uart_adapter(mut self, uart: Arc<dyn UartAdapter>) -> Self {
        self.uart_adapter = Some(uart);
        self
    }

    pub fn with_speeds(mut self, speeds: MoveSpeeds) -> Self {
        self.speeds = speeds;
        self
    }

    // ── accessors ───────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn speeds(&self) -> MoveSpeeds {
        self.speeds
    }

    /// The probe mounted in the given slot.
    pub fn probe(&self, probe_type: ProbeType) -> Arc<dyn Probe> {
        Arc::clone(&self.probes[probe_type.order_index()])
    }

    /// All probes, sorted by order index.
    pub fn probes(&self) -> &[Arc<dyn Probe>; 4] {
        &self.probes
    }

    pub fn cameras(&self) -> &[Arc<dyn Camera>] {
        &self.cameras
    }

    pub fn signal_router(&self) -> Option<Arc<dyn SignalRouter>> {
        self.signal_router.clone()
    }

    pub fn power_controller(&self) -> Option<Arc<dyn PowerController>> {
        self.power_controller.clone()
    }

    pub fn uart_adapter(&self) -> Option<Arc<dyn UartAdapter>> {
        self.uart_adapter.clone()
    }

    /// Live status of every probe, sorted by order index.
    pub fn status(&self) -> Vec<ProbeStatus> {
        self.probes.iter().map(|p| p.status()).collect()
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Start every hardware unit.
    pub async fn start(&self) -> Result<(), RigError> {
        info!(rig = %self.name, "starting camera systems");
        for camera in &self.cameras {
            camera.start().await?;
        }
        info!(rig = %self.name, "starting probes");
        try_join_all(self.probes.iter().map(|p| p.start())).await?;
        if let Some(router) = &self.signal_router {
            info!(rig = %self.name, "starting signal multiplexer");
            router.start().await?;
        }
        if let Some(power) = &self.power_controller {
            info!(rig = %self.name, "starting target power controller");
            power.start().await?;
        }
        if let Some(uart) = &self.uart_adapter {
            info!(rig = %self.name, "opening uart adapter");
            uart.open(DEFAULT_UART_BAUD_RATE).await?;
        }
        self.publish_unit_status();
        Ok(())
    }

    /// Shut every hardware unit down.
    pub async fn stop(&self) -> Result<(), RigError> {
        info!(rig = %self.name, "stopping camera systems");
        for camera in &self.cameras {
            camera.stop().await?;
        }
        info!(rig = %self.name, "stopping probes");
        try_join_all(self.probes.iter().map(|p| p.stop())).await?;
        if let Some(router) = &self.signal_router {
            router.stop().await?;
        }
        if let Some(power) = &self.power_controller {
            power.stop().await?;
        }
        if let Some(uart) = &self.uart_adapter {
            uart.close().await?;
        }
        self.publish_unit_status();
        Ok(())
    }

    fn publish_unit_status(&self) {
        for probe in &self.probes {
            self.bus.publish(
                Topic::Hardware,
                Event::new(
                    self.name.clone(),
                    EventPayload::UnitStatusChanged {
                        unit: probe.name().to_string(),
                    },
                ),
            );
        }
    }

    // ── movement ────────────────────────────────────────────────────────

    /// Move probes to `destinations` (global frame) with collision
    /// avoidance.
    ///
    /// Returns `Ok(false)` without touching any hardware when the
    /// destination set is rejected by planning; `Ok(true)` once all
    /// batches have completed.  Hardware failures propagate as errors.
    pub async fn move_probes(
        &self,
        destinations: &HashMap<ProbeType, Vec3>,
        xy_feed: f64,
        drop_feed: f64,
        soft_drop: bool,
    ) -> Result<bool, RigError> {
        info!(rig = %self.name, ?destinations, "moving probes");
        let speeds = MoveSpeeds {
            plane_feed: xy_feed,
            drop_feed,
            ..self.speeds
        };
        let coordinator = MoveCoordinator::new(self.snapshot(), speeds);
        let batches = match coordinator.plan(destinations, soft_drop) {
            Ok(batches) => batches,
            Err(RigError::InvalidDestinations(details)) => {
                error!(rig = %self.name, %details, "probes could not be moved");
                return Ok(false);
            }
            Err(other) => return Err(other),
        };
        for batch in batches {
            try_join_all(batch.into_iter().map(|movement| {
                let probe = self.probe(movement.probe_type);
                async move {
                    probe
                        .move_to_global(movement.destination_global, movement.feed)
                        .await
                }
            }))
            .await?;
        }
        Ok(true)
    }

    /// Capture the current rig pose for planning.
    fn snapshot(&self) -> [ProbeSnapshot; 4] {
        std::array::from_fn(|i| {
            let probe = &self.probes[i];
            ProbeSnapshot {
                probe_type: probe.probe_type(),
                position_global: probe.position_global(),
                origin_z_global: probe.origin_global().z,
            }
        })
    }

    // ── homing and clearing ─────────────────────────────────────────────

    /// Home all probes into a known state.
    ///
    /// The axes are homed in a fixed order so no needle can touch a
    /// neighbour on the way: inner Z, outer Z, all Y, outer X, inner X.
    pub async fn home(&self) -> Result<(), RigError> {
        use ProbeType::{P1, P2, P11, P21};
        info!(rig = %self.name, "homing all probes");
        self.home_axes(&[P1, P2], Axis::Z).await?;
        self.home_axes(&[P11, P21], Axis::Z).await?;
        self.home_axes(&[P1, P2, P11, P21], Axis::Y).await?;
        self.home_axes(&[P11, P21], Axis::X).await?;
        self.home_axes(&[P1, P2], Axis::X).await?;
        Ok(())
    }

    async fn home_axes(&self, slots: &[ProbeType], axis: Axis) -> Result<(), RigError> {
        try_join_all(slots.iter().map(|probe_type| {
            let probe = self.probe(*probe_type);
            async move { probe.home(Some(axis)).await }
        }))
        .await?;
        Ok(())
    }

    /// Home a single probe and park it at its safety position.
    pub async fn home_probe(&self, probe_type: ProbeType) -> Result<(), RigError> {
        let probe = self.probe(probe_type);
        probe.home(None).await?;
        probe.move_to_safety_position(self.speeds.plane_feed).await
    }

    /// Move every probe safely to its parking position.
    pub async fn clear_probing_area(&self) -> Result<bool, RigError> {
        let destinations: HashMap<ProbeType, Vec3> = self
            .probes
            .iter()
            .map(|p| (p.probe_type(), p.to_global(p.safety_position())))
            .collect();
        self.move_probes(
            &destinations,
            self.speeds.plane_feed,
            self.speeds.drop_feed,
            false,
        )
        .await
    }

    /// Clear the area around one probe: probes left of it move to their
    /// rightmost safety positions, probes right of it to their leftmost
    /// ones.  The probe itself stays where it is, which also keeps the
    /// destination set contiguous for planning.
    pub async fn clear_area_for_probe(&self, probe_type: ProbeType) -> Result<bool, RigError> {
        info!(rig = %self.name, probe = %probe_type, "clearing area around probe");
        let anchor = probe_type.order_index();
        let destinations: HashMap<ProbeType, Vec3> = self
            .probes
            .iter()
            .map(|p| {
                let destination = match p.probe_type().order_index().cmp(&anchor) {
                    Ordering::Less => p.to_global(p.config().pos_x_safety),
                    Ordering::Greater => p.to_global(p.config().neg_x_safety),
                    Ordering::Equal => p.position_global(),
                };
                (p.probe_type(), destination)
            })
            .collect();
        self.move_probes(
            &destinations,
            self.speeds.plane_feed,
            self.speeds.drop_feed,
            false,
        )
        .await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use probos_hal::sim::SimProbe;
    use probos_types::RigConfig;
    use ProbeType::{P1, P2, P11, P21};

    fn sim_rig() -> ProbeRig {
        let bus = EventBus::default();
        let probes: Vec<Arc<dyn Probe>> = RigConfig::simulated()
            .probes
            .into_iter()
            .map(|config| Arc::new(SimProbe::new(config, bus.clone())) as Arc<dyn Probe>)
            .collect();
        ProbeRig::new("test rig", probes, bus).unwrap()
    }

    fn global_x(rig: &ProbeRig, probe_type: ProbeType) -> f64 {
        rig.probe(probe_type).position_global().x
    }

    #[test]
    fn rig_requires_one_probe_per_slot() {
        let bus = EventBus::default();
        let mut configs = RigConfig::simulated().probes;
        // Duplicate P1 into the P2 slot position.
        configs[2] = configs[1].clone();
        let probes: Vec<Arc<dyn Probe>> = configs
            .into_iter()
            .map(|c| Arc::new(SimProbe::new(c, bus.clone())) as Arc<dyn Probe>)
            .collect();
        let err = ProbeRig::new("broken", probes, bus)
            .err()
            .expect("duplicate slot must be rejected");
        assert!(matches!(err, RigError::HardwareFault { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn move_probes_reaches_destinations() {
        let rig = sim_rig();
        rig.start().await.unwrap();

        let destinations: HashMap<ProbeType, Vec3> = [
            (P1, Vec3::new(-10.0, 5.0, -1.0)),
            (P2, Vec3::new(10.0, 5.0, -1.0)),
        ]
        .into_iter()
        .collect();
        let moved = rig
            .move_probes(&destinations, 3000.0, 2000.0, true)
            .await
            .unwrap();
        assert!(moved);
        assert_eq!(
            rig.probe(P1).position_global(),
            Vec3::new(-10.0, 5.0, -1.0)
        );
        assert_eq!(rig.probe(P2).position_global(), Vec3::new(10.0, 5.0, -1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_destinations_leave_hardware_untouched() {
        let rig = started_rig().await;
        let before: Vec<Vec3> = rig.probes().iter().map(|p| p.position_global()).collect();

        // P1 right of P2 crosses the rail order.
        let destinations: HashMap<ProbeType, Vec3> = [
            (P1, Vec3::new(10.0, 0.0, 0.0)),
            (P2, Vec3::new(-10.0, 0.0, 0.0)),
        ]
        .into_iter()
        .collect();
        let moved = rig
            .move_probes(&destinations, 3000.0, 2000.0, true)
            .await
            .unwrap();
        assert!(!moved);
        let after: Vec<Vec3> = rig.probes().iter().map(|p| p.position_global()).collect();
        assert_eq!(before, after);
    }

    async fn started_rig() -> ProbeRig {
        let rig = sim_rig();
        rig.start().await.unwrap();
        rig
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_errors_propagate() {
        // Plan succeeds, but the probes were never started.
        let rig = sim_rig();
        let destinations: HashMap<ProbeType, Vec3> =
            [(P1, Vec3::new(-10.0, 0.0, 0.0))].into_iter().collect();
        let err = rig
            .move_probes(&destinations, 3000.0, 2000.0, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::HardwareConnection { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_probing_area_parks_all_probes() {
        let rig = started_rig().await;
        let cleared = rig.clear_probing_area().await.unwrap();
        assert!(cleared);
        assert_eq!(global_x(&rig, P11), -120.0);
        assert_eq!(global_x(&rig, P1), -60.0);
        assert_eq!(global_x(&rig, P2), 60.0);
        assert_eq!(global_x(&rig, P21), 120.0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_area_for_probe_splits_sides() {
        let rig = started_rig().await;
        let before = rig.probe(P2).position_global();

        let cleared = rig.clear_area_for_probe(P2).await.unwrap();
        assert!(cleared);
        // Lower-index probes move to their rightmost safety positions,
        // higher-index ones to their leftmost.
        assert_eq!(global_x(&rig, P11), -60.0);
        assert_eq!(global_x(&rig, P1), 0.0);
        assert_eq!(global_x(&rig, P21), 60.0);
        // The anchor probe ends where it started.
        assert_eq!(rig.probe(P2).position_global(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn home_zeroes_all_axes() {
        let rig = started_rig().await;
        let destinations: HashMap<ProbeType, Vec3> = [
            (P1, Vec3::new(-10.0, 5.0, -1.0)),
            (P2, Vec3::new(10.0, 5.0, -1.0)),
        ]
        .into_iter()
        .collect();
        rig.move_probes(&destinations, 3000.0, 2000.0, false)
            .await
            .unwrap();

        rig.home().await.unwrap();
        for probe in rig.probes() {
            assert_eq!(probe.position_local(), Vec3::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn home_probe_parks_at_safety_position() {
        let rig = started_rig().await;
        rig.home_probe(P21).await.unwrap();
        assert_eq!(
            rig.probe(P21).position_local(),
            Vec3::new(30.0, 0.0, 0.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_all_probes_in_order() {
        let rig = started_rig().await;
        let status = rig.status();
        assert_eq!(status.len(), 4);
        for (i, s) in status.iter().enumerate() {
            assert_eq!(s.order_index, i);
            assert!(s.connected);
            assert!(!s.moving);
        }
    }
}
