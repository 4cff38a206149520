//! # mesh-qos-sim - Multi-channel ad-hoc mesh with QoS contention
//!
//! A discrete-event simulator for a static wireless mesh: nodes placed on a
//! grid, split evenly over several non-overlapping channels, each running a UDP
//! echo client and server. Stations on a channel contend for the medium with
//! EDCA-style access categories; overlapping transmissions collide. A flow
//! monitor reports per-flow packets, loss, throughput and delay.
//!
//! ## Core Components
//!
//! - **EventScheduler**: time-ordered event queue with cancellable handles
//! - **ChannelArbiter**: per-channel medium access, airtime and collisions
//! - **Topology**: node placement, channel split and address registry
//! - **FlowTracker**: 5-tuple flow statistics
//! - **SimulationRunner**: Configured -> Running -> Stopped -> Reported
//!
//! ## Usage
//!
//! ```no_run
//! use mesh_sim::{SimConfig, SimulationRunner};
//!
//! let mut config = SimConfig::default();
//! config.seed = Some([1u8; 32]);
//!
//! let mut runner = SimulationRunner::with_echo(&config).unwrap();
//! for flow in runner.run_to_report().unwrap() {
//!     println!("{}", flow);
//! }
//! ```
//!
//! Scenario files for the `scenario_runner` binary live in `scenarios/`.

pub mod mesh_channel;
pub mod mesh_config;
pub mod mesh_error;
pub mod mesh_flows;
pub mod mesh_interface;
pub mod mesh_runner;
pub mod mesh_scheduler;
pub mod mesh_topology;
pub mod mesh_traffic;

// Re-export commonly used types
pub use mesh_channel::{ChannelArbiter, ChannelStats, EdcaParams, MediumTiming};
pub use mesh_config::{
    AccessPolicy, CollisionModel, CrossChannelPolicy, PhyConfig, PropagationModel, SimConfig,
    TopologyConfig, TrafficConfig,
};
pub use mesh_error::{ConfigurationError, ReportingError, RunnerState, SchedulingError, SimError, SimResult};
pub use mesh_flows::{FlowSummary, FlowTotals, FlowTracker};
pub use mesh_interface::{AccessCategory, ChannelId, FlowKey, NodeId, Packet, SimTime};
pub use mesh_runner::SimulationRunner;
pub use mesh_scheduler::{EventHandle, EventHandler, EventScheduler, RunOutcome, RunSummary};
pub use mesh_topology::Topology;
pub use mesh_traffic::{Application, EchoApplication};
