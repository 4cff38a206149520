//! Configuration for a mesh simulation run.
//!
//! Every field has a default reproducing the reference scenario: 100 nodes on
//! 4 channels, a 10x10 grid with 15 m spacing, addresses from 10.1.0.0/16 and
//! UDP echo traffic of 1000 packets of 1024 bytes every 5 ms. Scenario files
//! only need to name the values they change.

use std::net::Ipv4Addr;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Deserialize;

use crate::mesh_error::ConfigurationError;
use crate::mesh_interface::{AccessCategory, SimTime};

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration for a simulation run
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Total simulated duration (seconds); also the throughput denominator
    pub duration_s: f64,

    /// Random seed for reproducibility (None = generate random)
    pub seed: Option<[u8; 32]>,

    pub topology: TopologyConfig,

    pub traffic: TrafficConfig,

    pub phy: PhyConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration_s: 10.0,
            seed: None,
            topology: TopologyConfig::default(),
            traffic: TrafficConfig::default(),
            phy: PhyConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load a YAML configuration; missing fields keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let config: SimConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigurationError::Scenario(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Scenario(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&yaml)
    }

    /// Get or generate seed
    pub fn resolve_seed(&self) -> [u8; 32] {
        self.seed.unwrap_or_else(|| {
            let mut temp_rng = StdRng::from_entropy();
            let mut seed = [0u8; 32];
            temp_rng.fill_bytes(&mut seed);
            seed
        })
    }

    pub fn duration(&self) -> Result<SimTime, ConfigurationError> {
        SimTime::from_secs_f64(self.duration_s)
    }

    /// Check every constraint that can be checked without building the topology
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let t = &self.topology;
        if t.num_nodes == 0 {
            return Err(ConfigurationError::NoNodes);
        }
        if t.num_channels == 0 {
            return Err(ConfigurationError::NoChannels);
        }
        if t.num_nodes % t.num_channels != 0 {
            return Err(ConfigurationError::UnevenChannelSplit {
                nodes: t.num_nodes,
                channels: t.num_channels,
            });
        }
        if t.grid.width == 0 {
            return Err(ConfigurationError::ZeroGridWidth);
        }
        require_positive("duration_s", self.duration_s)?;
        require_finite(t.grid.min_x)?;
        require_finite(t.grid.min_y)?;
        require_finite(t.grid.delta_x)?;
        require_finite(t.grid.delta_y)?;
        if let Some(range) = t.max_range_m {
            require_positive("max_range_m", range)?;
        }

        let tr = &self.traffic;
        require_positive("interval_s", tr.interval_s)?;
        require_positive("packet_size", tr.packet_size as f64)?;
        let start = SimTime::from_secs_f64(tr.client_start_s)?;
        let stop = SimTime::from_secs_f64(tr.client_stop_s.unwrap_or(self.duration_s))?;
        if stop < start {
            return Err(ConfigurationError::ClientWindowInverted { start, stop });
        }

        require_positive("data_rate_mbps", self.phy.data_rate_mbps)?;
        SimTime::from_secs_f64(self.phy.preamble_us * 1e-6)?;
        if let PropagationModel::Fixed { delay_s } = self.phy.propagation {
            SimTime::from_secs_f64(delay_s)?;
        }
        Ok(())
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigurationError::NonPositive { name, value });
    }
    Ok(())
}

fn require_finite(value: f64) -> Result<(), ConfigurationError> {
    if !value.is_finite() {
        return Err(ConfigurationError::InvalidTime { value });
    }
    Ok(())
}

// ============================================================================
// Topology
// ============================================================================

/// Node count, channel split, placement and addressing
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopologyConfig {
    pub num_nodes: usize,

    /// Channels; nodes are split into equal contiguous groups
    pub num_channels: usize,

    pub grid: GridConfig,

    pub address_base: Ipv4Addr,

    pub address_mask: Ipv4Addr,

    pub access_policy: AccessPolicy,

    /// Whether a node can reach a destination tuned to another channel
    pub cross_channel: CrossChannelPolicy,

    /// Destinations farther than this (meters) are unreachable
    pub max_range_m: Option<f64>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            num_nodes: 100,
            num_channels: 4,
            grid: GridConfig::default(),
            address_base: Ipv4Addr::new(10, 1, 0, 0),
            address_mask: Ipv4Addr::new(255, 255, 0, 0),
            access_policy: AccessPolicy::RoundRobin,
            cross_channel: CrossChannelPolicy::Unreachable,
            max_range_m: None,
        }
    }
}

/// Row-first rectangular grid
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    pub min_x: f64,
    pub min_y: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    /// Nodes per row
    pub width: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            delta_x: 15.0,
            delta_y: 15.0,
            width: 10,
        }
    }
}

/// How access categories are handed to nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPolicy {
    /// voice, video, best-effort, background, voice, ...
    RoundRobin,
    Fixed(AccessCategory),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrossChannelPolicy {
    /// Radios on different channels cannot hear each other
    Unreachable,
    /// Deliver across channels as if the groups were bridged
    Bridged,
}

// ============================================================================
// Traffic
// ============================================================================

/// UDP echo client/server parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrafficConfig {
    /// Payload bytes per packet
    pub packet_size: u32,

    /// Packets each client sends
    pub packet_count: u32,

    /// Seconds between two client sends
    pub interval_s: f64,

    pub client_start_s: f64,

    /// Defaults to the simulation duration
    pub client_stop_s: Option<f64>,

    pub server_port: u16,

    pub client_port: u16,

    /// Servers answer every request
    pub echo_replies: bool,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            packet_size: 1024,
            packet_count: 1000,
            interval_s: 0.005,
            client_start_s: 0.1,
            client_stop_s: None,
            server_port: 9,
            client_port: 49153,
            echo_replies: true,
        }
    }
}

// ============================================================================
// Medium access / PHY abstraction
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhyConfig {
    pub data_rate_mbps: f64,

    /// Fixed per-frame preamble airtime (microseconds)
    pub preamble_us: f64,

    /// MAC + IP + UDP header bytes added to the payload on air
    pub overhead_bytes: u32,

    pub propagation: PropagationModel,

    pub collision_model: CollisionModel,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            data_rate_mbps: 54.0,
            preamble_us: 40.0,
            overhead_bytes: 36,
            propagation: PropagationModel::ConstantSpeed,
            collision_model: CollisionModel::WinnerCaptures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropagationModel {
    /// Distance divided by the speed of light
    ConstantSpeed,
    Fixed { delay_s: f64 },
}

/// What an overlap does to the transmission that started on an idle medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionModel {
    /// The first transmission captures the receiver, later overlaps are lost
    WinnerCaptures,
    /// Every overlapping transmission is lost, the first one included
    AllCorrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_scenario() {
        let config = SimConfig::default();
        assert_eq!(config.topology.num_nodes, 100);
        assert_eq!(config.topology.num_channels, 4);
        assert_eq!(config.topology.grid.width, 10);
        assert_eq!(config.topology.address_base, Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(config.traffic.packet_size, 1024);
        assert_eq!(config.traffic.packet_count, 1000);
        assert_eq!(config.duration().unwrap(), SimTime::from_millis(10_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_uneven_channel_split_rejected() {
        let mut config = SimConfig::default();
        config.topology.num_nodes = 10;
        config.topology.num_channels = 4;
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::UnevenChannelSplit { nodes: 10, channels: 4 })
        );
    }

    #[test]
    fn test_negative_times_rejected() {
        let mut config = SimConfig::default();
        config.traffic.client_start_s = -1.0;
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidTime { .. })));

        let mut config = SimConfig::default();
        config.duration_s = -10.0;
        assert!(matches!(config.validate(), Err(ConfigurationError::NonPositive { .. })));

        let mut config = SimConfig::default();
        config.phy.propagation = PropagationModel::Fixed { delay_s: -0.5 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_client_window_rejected() {
        let mut config = SimConfig::default();
        config.traffic.client_start_s = 5.0;
        config.traffic.client_stop_s = Some(1.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::ClientWindowInverted { .. })
        ));
    }

    #[test]
    fn test_yaml_overrides_subset() {
        let yaml = r#"
duration_s: 2.5
topology:
  num_nodes: 8
  num_channels: 2
  access_policy: !fixed video
  cross_channel: bridged
traffic:
  packet_count: 10
  echo_replies: false
phy:
  collision_model: all-corrupted
  propagation: !fixed
    delay_s: 0.000001
"#;
        let config = SimConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.duration_s, 2.5);
        assert_eq!(config.topology.num_nodes, 8);
        assert_eq!(config.topology.access_policy, AccessPolicy::Fixed(AccessCategory::Video));
        assert_eq!(config.topology.cross_channel, CrossChannelPolicy::Bridged);
        assert_eq!(config.topology.grid.delta_x, 15.0);
        assert_eq!(config.traffic.packet_count, 10);
        assert_eq!(config.traffic.packet_size, 1024);
        assert!(!config.traffic.echo_replies);
        assert_eq!(config.phy.collision_model, CollisionModel::AllCorrupted);
        assert_eq!(config.phy.propagation, PropagationModel::Fixed { delay_s: 0.000001 });
    }

    #[test]
    fn test_yaml_invalid_values_fail_fast() {
        let err = SimConfig::from_yaml_str("topology:\n  num_nodes: 7\n  num_channels: 2\n").unwrap_err();
        assert_eq!(err, ConfigurationError::UnevenChannelSplit { nodes: 7, channels: 2 });

        let err = SimConfig::from_yaml_str("bogus_field: 1\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::Scenario(_)));
    }

    #[test]
    fn test_resolve_seed_prefers_configured() {
        let mut config = SimConfig::default();
        config.seed = Some([7u8; 32]);
        assert_eq!(config.resolve_seed(), [7u8; 32]);
    }
}
