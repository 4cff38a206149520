//! Error taxonomy for the mesh simulator.
//!
//! Packet loss is never an error: collisions and undelivered packets are
//! recorded as flow data. Errors here are usage and configuration mistakes,
//! and each is rejected before it can change simulation state.

use std::net::Ipv4Addr;

use crate::mesh_interface::{ChannelId, NodeId, SimTime};

/// Invalid simulation configuration, reported at construction time
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("node count must be positive")]
    NoNodes,

    #[error("channel count must be positive")]
    NoChannels,

    #[error("{channels} channels do not evenly divide {nodes} nodes")]
    UnevenChannelSplit { nodes: usize, channels: usize },

    #[error("time value {value} is negative or not finite")]
    InvalidTime { value: f64 },

    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("mask {mask} is not a contiguous prefix")]
    InvalidMask { mask: Ipv4Addr },

    #[error("base address {base} has host bits set for mask {mask}")]
    BaseNotNetwork { base: Ipv4Addr, mask: Ipv4Addr },

    #[error("address block {base}/{mask} holds {capacity} hosts, {requested} requested")]
    AddressBlockExhausted {
        base: Ipv4Addr,
        mask: Ipv4Addr,
        capacity: u64,
        requested: usize,
    },

    #[error("grid width must be positive")]
    ZeroGridWidth,

    #[error("client stop {stop} precedes client start {start}")]
    ClientWindowInverted { start: SimTime, stop: SimTime },

    #[error("invalid scenario: {0}")]
    Scenario(String),
}

/// Rejected scheduling request; the queue is left untouched
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    #[error("negative or non-finite delay {delay}")]
    InvalidDelay { delay: f64 },

    #[error("cannot schedule at {requested} when the clock reads {now}")]
    NonCausal { requested: SimTime, now: SimTime },

    #[error("scheduler is closed, simulation already stopped")]
    Closed,

    #[error("simulation time overflow")]
    Overflow,

    #[error("node {node} is not a station on channel {channel}")]
    NotOnChannel { node: NodeId, channel: ChannelId },

    #[error("node {node} is not part of the topology")]
    UnknownNode { node: NodeId },
}

/// Lifecycle of [`crate::mesh_runner::SimulationRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Configured,
    Running,
    Stopped,
    Reported,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunnerState::Configured => "Configured",
            RunnerState::Running => "Running",
            RunnerState::Stopped => "Stopped",
            RunnerState::Reported => "Reported",
        };
        f.write_str(name)
    }
}

/// Lifecycle operation invoked out of order
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportingError {
    #[error("{operation} requires state {expected}, runner is {actual}")]
    WrongState {
        operation: &'static str,
        expected: RunnerState,
        actual: RunnerState,
    },

    #[error("flow report requested before finalize")]
    NotFinalized,

    #[error("flow statistics already finalized")]
    AlreadyFinalized,
}

/// Any error surfaced by the simulator API
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Reporting(#[from] ReportingError),
}

pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let e = ConfigurationError::UnevenChannelSplit { nodes: 10, channels: 4 };
        assert_eq!(e.to_string(), "4 channels do not evenly divide 10 nodes");
    }

    #[test]
    fn test_scheduling_error_display() {
        let e = SchedulingError::NonCausal {
            requested: SimTime::from_millis(1),
            now: SimTime::from_millis(2),
        };
        let s = e.to_string();
        assert!(s.contains("0.001000000s"));
        assert!(s.contains("0.002000000s"));
    }

    #[test]
    fn test_reporting_error_display() {
        let e = ReportingError::WrongState {
            operation: "finalize",
            expected: RunnerState::Stopped,
            actual: RunnerState::Running,
        };
        assert_eq!(e.to_string(), "finalize requires state Stopped, runner is Running");
    }

    #[test]
    fn test_sim_error_from_conversions() {
        let e: SimError = SchedulingError::Closed.into();
        assert!(matches!(e, SimError::Scheduling(SchedulingError::Closed)));
        let e: SimError = ConfigurationError::NoNodes.into();
        assert_eq!(e.to_string(), "node count must be positive");
        let boxed: Box<dyn std::error::Error> = Box::new(e);
        assert!(!boxed.to_string().is_empty());
    }
}
