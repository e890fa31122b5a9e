//! In-process simulation drivers for CI and headless testing.
//!
//! Every trait in this crate has a `Sim*` implementation here that keeps
//! plausible kinematic state and timing without any physical hardware.
//! Movement duration follows the real firmware: `distance / feed * 60`
//! seconds for a feed given in mm/min.  Homing takes a fixed 1.5 s and
//! parks the probe at its safety position.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use probos_bus::{EventBus, Topic};
use probos_geometry::{Transform, Vec3};
use probos_types::{
    DigitalLevel, Event, EventPayload, MultiplexerChannel, ProbeConfig, RigError,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::camera::{Camera, CameraFrame};
use crate::power::PowerController;
use crate::probe::{Axis, Probe};
use crate::router::SignalRouter;
use crate::uart::UartAdapter;

/// Fixed homing duration of the simulated axis controllers.
const HOMING_DURATION: Duration = Duration::from_millis(1500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock only means another test thread panicked; the state
    // itself is still plain data.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_connected(unit: &str) -> RigError {
    RigError::HardwareConnection {
        unit: unit.to_string(),
        details: "unit is not connected".to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimProbe
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ProbeState {
    connected: bool,
    moving: bool,
    position: Vec3,
}

/// A simulated probe that models realistic movement timing and publishes
/// move start/finish events on the [`Topic::Hardware`] lane.
pub struct SimProbe {
    config: ProbeConfig,
    transform: Transform,
    bus: EventBus,
    state: Mutex<ProbeState>,
}

impl SimProbe {
    pub fn new(config: ProbeConfig, bus: EventBus) -> Self {
        let transform = Transform::new(config.tmat_to_global);
        Self {
            config,
            transform,
            bus,
            state: Mutex::new(ProbeState {
                connected: false,
                moving: false,
                position: Vec3::ZERO,
            }),
        }
    }

    fn require_connected(&self) -> Result<(), RigError> {
        if lock(&self.state).connected {
            Ok(())
        } else {
            Err(not_connected(&self.config.name))
        }
    }
}

#[async_trait]
impl Probe for SimProbe {
    fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn transform(&self) -> &Transform {
        &self.transform
    }

    fn connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn moving(&self) -> bool {
        lock(&self.state).moving
    }

    fn position_local(&self) -> Vec3 {
        lock(&self.state).position
    }

    async fn start(&self) -> Result<(), RigError> {
        lock(&self.state).connected = true;
        info!(probe = %self.config.name, "simulated probe connected");
        Ok(())
    }

    async fn stop(&self) -> Result<(), RigError> {
        lock(&self.state).connected = false;
        info!(probe = %self.config.name, "simulated probe disconnected");
        Ok(())
    }

    async fn home(&self, axis: Option<Axis>) -> Result<(), RigError> {
        self.require_connected()?;
        lock(&self.state).moving = true;
        tokio::time::sleep(HOMING_DURATION).await;
        let mut state = lock(&self.state);
        match axis {
            Some(Axis::X) => state.position.x = 0.0,
            Some(Axis::Y) => state.position.y = 0.0,
            Some(Axis::Z) => state.position.z = 0.0,
            None => state.position = self.config.safety_position(),
        }
        state.moving = false;
        debug!(probe = %self.config.name, ?axis, "homing finished");
        Ok(())
    }

    async fn move_to_local(&self, destination: Vec3, feed: f64) -> Result<(), RigError> {
        self.require_connected()?;
        if feed <= 0.0 {
            return Err(RigError::HardwareFault {
                unit: self.config.name.clone(),
                details: format!("non-positive feed rate {feed}"),
            });
        }
        let start = {
            let mut state = lock(&self.state);
            state.moving = true;
            state.position
        };
        let distance = (destination - start).norm();
        self.bus.publish(
            Topic::Hardware,
            Event::new(
                self.config.name.clone(),
                EventPayload::ProbeMoveStarted {
                    probe_type: self.config.probe_type,
                    start_global: self.transform.to_global(start),
                    destination_global: self.transform.to_global(destination),
                    feed,
                },
            ),
        );
        // Feed is mm/min; movement time in seconds.
        tokio::time::sleep(Duration::from_secs_f64(distance / feed * 60.0)).await;
        {
            let mut state = lock(&self.state);
            state.position = destination;
            state.moving = false;
        }
        self.bus.publish(
            Topic::Hardware,
            Event::new(
                self.config.name.clone(),
                EventPayload::ProbeMoveFinished {
                    probe_type: self.config.probe_type,
                },
            ),
        );
        debug!(probe = %self.config.name, destination = %destination, feed, "move finished");
        Ok(())
    }

    async fn center_probe(&self) -> Result<[Vec3; 4], RigError> {
        self.require_connected()?;
        // Four cardinal contact probes around the current pin at a fixed
        // 0.5 mm approach radius.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let p = lock(&self.state).position;
        Ok([
            p + Vec3::new(0.5, 0.0, 0.0),
            p - Vec3::new(0.5, 0.0, 0.0),
            p + Vec3::new(0.0, 0.5, 0.0),
            p - Vec3::new(0.0, 0.5, 0.0),
        ])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimCamera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera returning black frames of a fixed resolution.
pub struct SimCamera {
    name: String,
    width: u32,
    height: u32,
    connected: Mutex<bool>,
}

impl SimCamera {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: 640,
            height: 480,
            connected: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Camera for SimCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn connected(&self) -> bool {
        *lock(&self.connected)
    }

    async fn start(&self) -> Result<(), RigError> {
        *lock(&self.connected) = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), RigError> {
        *lock(&self.connected) = false;
        Ok(())
    }

    async fn capture(&self) -> Result<CameraFrame, RigError> {
        if !self.connected() {
            return Err(not_connected(&self.name));
        }
        Ok(CameraFrame {
            width: self.width,
            height: self.height,
            data: vec![0; (self.width * self.height * 3) as usize],
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimSignalRouter
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Disconnected,
    Digital,
    Analog,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    pulled: bool,
    route: Route,
}

/// A simulated four-channel signal multiplexer with per-channel state
/// tables.  Channels read high unless actively pulled.
pub struct SimSignalRouter {
    connected: Mutex<bool>,
    channels: Mutex<HashMap<MultiplexerChannel, ChannelState>>,
}

impl SimSignalRouter {
    pub fn new() -> Self {
        let channels = [
            MultiplexerChannel::One,
            MultiplexerChannel::Two,
            MultiplexerChannel::Three,
            MultiplexerChannel::Four,
        ]
        .into_iter()
        .map(|c| {
            (
                c,
                ChannelState {
                    pulled: false,
                    route: Route::Disconnected,
                },
            )
        })
        .collect();
        Self {
            connected: Mutex::new(false),
            channels: Mutex::new(channels),
        }
    }

    fn with_channel<R>(
        &self,
        channel: MultiplexerChannel,
        f: impl FnOnce(&mut ChannelState) -> R,
    ) -> Result<R, RigError> {
        if !self.connected() {
            return Err(not_connected("signal multiplexer"));
        }
        let mut channels = lock(&self.channels);
        let state = channels.entry(channel).or_insert(ChannelState {
            pulled: false,
            route: Route::Disconnected,
        });
        Ok(f(state))
    }
}

impl Default for SimSignalRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalRouter for SimSignalRouter {
    fn connected(&self) -> bool {
        *lock(&self.connected)
    }

    async fn start(&self) -> Result<(), RigError> {
        *lock(&self.connected) = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), RigError> {
        *lock(&self.connected) = false;
        Ok(())
    }

    async fn pull(&self, channel: MultiplexerChannel) -> Result<(), RigError> {
        self.with_channel(channel, |s| s.pulled = true)
    }

    async fn release(&self, channel: MultiplexerChannel) -> Result<(), RigError> {
        self.with_channel(channel, |s| s.pulled = false)
    }

    async fn connect_to_digital(&self, channel: MultiplexerChannel) -> Result<(), RigError> {
        self.with_channel(channel, |s| s.route = Route::Digital)
    }

    async fn connect_to_analog(&self, channel: MultiplexerChannel) -> Result<(), RigError> {
        self.with_channel(channel, |s| s.route = Route::Analog)
    }

    async fn test_channel(&self, channel: MultiplexerChannel) -> Result<DigitalLevel, RigError> {
        self.with_channel(channel, |s| {
            if s.pulled {
                DigitalLevel::Low
            } else {
                DigitalLevel::High
            }
        })
    }

    async fn release_all(&self) -> Result<(), RigError> {
        if !self.connected() {
            return Err(not_connected("signal multiplexer"));
        }
        for state in lock(&self.channels).values_mut() {
            state.pulled = false;
            state.route = Route::Disconnected;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimPowerController
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PowerState {
    connected: bool,
    on: bool,
}

/// A simulated board power switch.
#[derive(Default)]
pub struct SimPowerController {
    state: Mutex<PowerState>,
}

impl SimPowerController {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PowerController for SimPowerController {
    fn connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn start(&self) -> Result<(), RigError> {
        lock(&self.state).connected = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), RigError> {
        let mut state = lock(&self.state);
        state.on = false;
        state.connected = false;
        Ok(())
    }

    async fn switch_on(&self) -> Result<(), RigError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(not_connected("power controller"));
        }
        state.on = true;
        Ok(())
    }

    async fn switch_off(&self) -> Result<(), RigError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(not_connected("power controller"));
        }
        state.on = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        lock(&self.state).on
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimUartAdapter
// ────────────────────────────────────────────────────────────────────────────

/// A simulated UART that loops every sent line back to the rx subscribers.
pub struct SimUartAdapter {
    state: Mutex<UartState>,
    rx_fanout: broadcast::Sender<String>,
}

#[derive(Debug, Default)]
struct UartState {
    connected: bool,
    baud_rate: u32,
}

impl SimUartAdapter {
    pub fn new() -> Self {
        let (rx_fanout, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(UartState::default()),
            rx_fanout,
        }
    }
}

impl Default for SimUartAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UartAdapter for SimUartAdapter {
    fn connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn open(&self, baud_rate: u32) -> Result<(), RigError> {
        let mut state = lock(&self.state);
        state.connected = true;
        state.baud_rate = baud_rate;
        debug!(baud_rate, "simulated uart opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), RigError> {
        lock(&self.state).connected = false;
        Ok(())
    }

    async fn send(&self, data: &str) -> Result<(), RigError> {
        if !self.connected() {
            return Err(not_connected("uart adapter"));
        }
        // Loopback: the simulated board echoes everything it receives.
        let _ = self.rx_fanout.send(data.to_string());
        Ok(())
    }

    fn subscribe_rx(&self) -> broadcast::Receiver<String> {
        self.rx_fanout.subscribe()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use probos_types::{ProbeType, RigConfig};

    fn sim_probe(probe_type: ProbeType) -> SimProbe {
        let config = RigConfig::simulated()
            .probes
            .into_iter()
            .find(|p| p.probe_type == probe_type)
            .unwrap();
        SimProbe::new(config, EventBus::default())
    }

    #[tokio::test(start_paused = true)]
    async fn move_duration_follows_distance_over_feed() {
        let probe = sim_probe(ProbeType::P1);
        probe.start().await.unwrap();

        let before = tokio::time::Instant::now();
        // 50 mm at 3000 mm/min = 1 s.
        probe
            .move_to_local(Vec3::new(50.0, 0.0, 0.0), 3000.0)
            .await
            .unwrap();
        let elapsed = before.elapsed();
        assert!(
            (elapsed.as_secs_f64() - 1.0).abs() < 0.05,
            "expected ~1s, got {elapsed:?}"
        );
        assert_eq!(probe.position_local(), Vec3::new(50.0, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn global_position_is_derived_from_local() {
        let probe = sim_probe(ProbeType::P2);
        probe.start().await.unwrap();
        probe
            .move_to_local(Vec3::new(10.0, 5.0, -2.0), 3000.0)
            .await
            .unwrap();
        // P2 sits at global x = +30.
        assert_eq!(probe.position_global(), Vec3::new(40.0, 5.0, -2.0));
        let status = probe.status();
        assert_eq!(status.position_global, probe.to_global(status.position_local));
    }

    #[tokio::test]
    async fn move_when_disconnected_fails() {
        let probe = sim_probe(ProbeType::P11);
        let err = probe
            .move_to_local(Vec3::ZERO, 3000.0)
            .await
            .expect_err("must fail while disconnected");
        assert!(matches!(err, RigError::HardwareConnection { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn homing_parks_at_safety_position() {
        let probe = sim_probe(ProbeType::P21);
        probe.start().await.unwrap();
        probe
            .move_to_local(Vec3::new(5.0, 5.0, 5.0), 3000.0)
            .await
            .unwrap();

        let before = tokio::time::Instant::now();
        probe.home(None).await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(1500));
        // P21 parks in positive local X.
        assert_eq!(probe.position_local(), Vec3::new(30.0, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn homing_single_axis_zeroes_only_that_axis(){
        let probe = sim_probe(ProbeType::P1);
        probe.start().await.unwrap();
        probe
            .move_to_local(Vec3::new(5.0, 6.0, 7.0), 3000.0)
            .await
            .unwrap();
        probe.home(Some(Axis::Z)).await.unwrap();
        assert_eq!(probe.position_local(), Vec3::new(5.0, 6.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn move_publishes_start_and_finish_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(Topic::Hardware);
        let config = RigConfig::simulated().probes.remove(1);
        let probe = SimProbe::new(config, bus);
        probe.start().await.unwrap();

        probe
            .move_to_local(Vec3::new(1.0, 0.0, 0.0), 3000.0)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.payload,
            EventPayload::ProbeMoveStarted {
                probe_type: ProbeType::P1,
                ..
            }
        ));
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.payload,
            EventPayload::ProbeMoveFinished {
                probe_type: ProbeType::P1,
            }
        ));
    }

    #[tokio::test]
    async fn router_pull_and_test_channel() {
        let router = SimSignalRouter::new();
        router.start().await.unwrap();

        let channel = MultiplexerChannel::Three;
        assert_eq!(router.test_channel(channel).await.unwrap(), DigitalLevel::High);
        router.pull(channel).await.unwrap();
        assert_eq!(router.test_channel(channel).await.unwrap(), DigitalLevel::Low);
        router.release_all().await.unwrap();
        assert_eq!(router.test_channel(channel).await.unwrap(), DigitalLevel::High);
    }

    #[tokio::test]
    async fn power_controller_round_trip() {
        let power = SimPowerController::new();
        assert!(power.switch_on().await.is_err());
        power.start().await.unwrap();
        power.switch_on().await.unwrap();
        assert!(power.is_on());
        power.stop().await.unwrap();
        assert!(!power.is_on());
    }

    #[tokio::test]
    async fn uart_echoes_sent_lines() {
        let uart = SimUartAdapter::new();
        uart.open(115_200).await.unwrap();
        let mut rx = uart.subscribe_rx();
        uart.send("AT").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "AT");
    }
}
