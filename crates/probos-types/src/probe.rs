//! Probe identity, calibration configuration and live status.

use probos_geometry::{Matrix4, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Physical probe slot on the shared rail.
///
/// The variants carry a fixed total order (`order_index`) used for every
/// left-to-right spatial decision: P11 < P1 < P2 < P21, ascending along
/// the global X axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeType {
    /// Outermost probe on the low-X end of the rail.
    P11,
    /// Inner probe next to P11.
    P1,
    /// Inner probe next to P21.
    P2,
    /// Outermost probe on the high-X end of the rail.
    P21,
}

impl ProbeType {
    /// All probe slots, ascending by [`order_index`][Self::order_index].
    pub const ALL_ORDERED: [ProbeType; 4] =
        [ProbeType::P11, ProbeType::P1, ProbeType::P2, ProbeType::P21];

    /// Numerical rail position used for collision reasoning and path
    /// planning.
    pub fn order_index(self) -> usize {
        match self {
            ProbeType::P11 => 0,
            ProbeType::P1 => 1,
            ProbeType::P2 => 2,
            ProbeType::P21 => 3,
        }
    }

    /// The signal-multiplexer channel permanently wired to this probe.
    pub fn multiplexer_channel(self) -> MultiplexerChannel {
        match self {
            ProbeType::P11 => MultiplexerChannel::One,
            ProbeType::P1 => MultiplexerChannel::Two,
            ProbeType::P2 => MultiplexerChannel::Three,
            ProbeType::P21 => MultiplexerChannel::Four,
        }
    }
}

impl std::fmt::Display for ProbeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProbeType::P11 => "P11",
            ProbeType::P1 => "P1",
            ProbeType::P2 => "P2",
            ProbeType::P21 => "P21",
        };
        write!(f, "{s}")
    }
}

/// One of the four signal-multiplexer input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultiplexerChannel {
    One,
    Two,
    Three,
    Four,
}

impl MultiplexerChannel {
    /// The probe slot wired to this channel (inverse of
    /// [`ProbeType::multiplexer_channel`]).
    pub fn probe_type(self) -> ProbeType {
        match self {
            MultiplexerChannel::One => ProbeType::P11,
            MultiplexerChannel::Two => ProbeType::P1,
            MultiplexerChannel::Three => ProbeType::P2,
            MultiplexerChannel::Four => ProbeType::P21,
        }
    }
}

/// Digital level measured on a multiplexer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitalLevel {
    Low,
    High,
}

/// Persisted calibration configuration for a single probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Unique probe identifier.
    pub id: Uuid,
    /// Symbolic display name.
    pub name: String,
    /// Rail slot the probe is mounted in.
    pub probe_type: ProbeType,
    /// 4×4 homogeneous local→global calibration matrix.
    pub tmat_to_global: Matrix4,
    /// Safety parking position in positive local X, probe-local frame.
    pub pos_x_safety: Vec3,
    /// Safety parking position in negative local X, probe-local frame.
    pub neg_x_safety: Vec3,
}

impl ProbeConfig {
    /// The primary safety position, i.e. the one nearest the probe's
    /// homed position: P2/P21 park in positive X, P1/P11 in negative X.
    pub fn safety_position(&self) -> Vec3 {
        match self.probe_type {
            ProbeType::P2 | ProbeType::P21 => self.pos_x_safety,
            ProbeType::P1 | ProbeType::P11 => self.neg_x_safety,
        }
    }
}

/// Live status snapshot of a probe unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeStatus {
    pub id: Uuid,
    pub name: String,
    pub probe_type: ProbeType,
    pub order_index: usize,
    pub connected: bool,
    pub moving: bool,
    /// Current position in the probe-local actuator frame.
    pub position_local: Vec3,
    /// Current position in the global frame; always derived from
    /// `position_local` through the calibration transform, never tracked
    /// independently.
    pub position_global: Vec3,
}

/// Persisted configuration of the whole rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    pub name: String,
    pub probes: Vec<ProbeConfig>,
}

impl RigConfig {
    /// A fully simulated four-probe rig with translation-only calibration,
    /// used by the demo binary and by integration tests.
    ///
    /// Probes sit 60 mm apart along X; safety positions lie 30 mm to
    /// either side of each local origin.
    pub fn simulated() -> Self {
        let probe = |name: &str, probe_type: ProbeType, tx: f64| ProbeConfig {
            id: Uuid::new_v4(),
            name: name.to_string(),
            probe_type,
            tmat_to_global: Matrix4::translation(Vec3::new(tx, 0.0, 0.0)),
            pos_x_safety: Vec3::new(30.0, 0.0, 0.0),
            neg_x_safety: Vec3::new(-30.0, 0.0, 0.0),
        };
        Self {
            name: "simulated rig".to_string(),
            probes: vec![
                probe("probe 1.1", ProbeType::P11, -90.0),
                probe("probe 1", ProbeType::P1, -30.0),
                probe("probe 2", ProbeType::P2, 30.0),
                probe("probe 2.1", ProbeType::P21, 90.0),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_index_is_total_and_ascending() {
        let indices: Vec<usize> = ProbeType::ALL_ORDERED
            .iter()
            .map(|p| p.order_index())
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn probe_type_serde_uses_symbolic_names() {
        let json = serde_json::to_string(&ProbeType::P21).unwrap();
        assert_eq!(json, "\"P21\"");
        let back: ProbeType = serde_json::from_str("\"P11\"").unwrap();
        assert_eq!(back, ProbeType::P11);
    }

    #[test]
    fn multiplexer_channel_mapping_round_trips() {
        for probe_type in ProbeType::ALL_ORDERED {
            assert_eq!(probe_type.multiplexer_channel().probe_type(), probe_type);
        }
    }

    #[test]
    fn safety_position_selector_per_slot() {
        let config = RigConfig::simulated();
        for probe in &config.probes {
            let expected = match probe.probe_type {
                ProbeType::P2 | ProbeType::P21 => probe.pos_x_safety,
                _ => probe.neg_x_safety,
            };
            assert_eq!(probe.safety_position(), expected);
        }
    }

    #[test]
    fn simulated_rig_has_one_probe_per_slot() {
        let config = RigConfig::simulated();
        assert_eq!(config.probes.len(), 4);
        for (i, slot) in ProbeType::ALL_ORDERED.iter().enumerate() {
            assert_eq!(config.probes[i].probe_type, *slot);
        }
    }

    #[test]
    fn probe_config_serde_round_trip() {
        let config = RigConfig::simulated();
        let json = serde_json::to_string(&config).unwrap();
        let back: RigConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.probes.len(), 4);
        assert_eq!(back.probes[0].probe_type, ProbeType::P11);
    }
}
