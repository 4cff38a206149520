//! Simulation lifecycle: Configured -> Running -> Stopped -> Reported.
//!
//! The runner owns the scheduler and everything the events act on. Events are
//! dispatched to a [`MeshWorld`] borrowed separately from the scheduler, so a
//! handler can schedule follow-ups while the clock is frozen.

use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::mesh_channel::{ChannelArbiter, ChannelEvent, ChannelEventKind, ChannelStats, MediumTiming, TxOutcome};
use crate::mesh_config::SimConfig;
use crate::mesh_error::{ReportingError, RunnerState, SchedulingError, SimError, SimResult};
use crate::mesh_flows::{FlowSummary, FlowTracker};
use crate::mesh_interface::{ChannelId, NodeId, SequenceNumber, SimTime};
use crate::mesh_scheduler::{EventHandle, EventHandler, EventScheduler, RunSummary};
use crate::mesh_topology::Topology;
use crate::mesh_traffic::{Application, EchoApplication, Transmit};

/// Everything the scheduler can dispatch during a run
#[derive(Debug, Clone, PartialEq)]
pub enum MeshAction {
    Channel(ChannelEvent),
    /// Application timer of a node fired
    AppTimer { node: NodeId },
    /// End of a node's client window
    ClientStop { node: NodeId },
}

impl From<ChannelEvent> for MeshAction {
    fn from(event: ChannelEvent) -> Self {
        MeshAction::Channel(event)
    }
}

/// Sub-seed for one channel's backoff generator
pub fn channel_seed(seed: &[u8; 32], channel: ChannelId) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed);
    hasher.update(&(channel as u64).to_le_bytes());
    hasher.finalize().into()
}

/// State mutated by events
pub struct MeshWorld<P: Application> {
    topology: Topology,
    arbiters: Vec<ChannelArbiter<StdRng>>,
    tracker: FlowTracker,
    application: P,
    timers: Vec<Option<EventHandle>>,
    next_sequence: SequenceNumber,
    failure: Option<SimError>,
}

impl<P: Application> MeshWorld<P> {
    fn dispatch(&mut self, scheduler: &mut EventScheduler<MeshAction>, action: MeshAction) -> SimResult<()> {
        let now = scheduler.now();
        match action {
            MeshAction::AppTimer { node } => {
                if let Some(slot) = self.timers.get_mut(node) {
                    *slot = None;
                }
                let timer = self.application.on_timer(node, now, &self.topology);
                if let Some(transmit) = timer.send {
                    self.transmit(scheduler, transmit)?;
                }
                if let Some(at) = timer.next {
                    let handle = scheduler.schedule_at(at, MeshAction::AppTimer { node })?;
                    if let Some(slot) = self.timers.get_mut(node) {
                        *slot = Some(handle);
                    }
                }
            }
            MeshAction::ClientStop { node } => {
                if let Some(handle) = self.timers.get_mut(node).and_then(Option::take) {
                    scheduler.cancel(handle);
                    debug!("n{} client stopped at {}", node, now);
                }
            }
            MeshAction::Channel(event) => self.on_channel_event(scheduler, event)?,
        }
        Ok(())
    }

    fn on_channel_event(&mut self, scheduler: &mut EventScheduler<MeshAction>, event: ChannelEvent) -> SimResult<()> {
        let channel = event.channel;
        match event.kind {
            ChannelEventKind::AccessAttempt { node } => {
                self.arbiter(channel, node)?.on_access_attempt(scheduler, node)?;
            }
            ChannelEventKind::TransmissionEnd { node } => {
                let arbiter = self
                    .arbiters
                    .get_mut(channel)
                    .ok_or(SchedulingError::NotOnChannel { node, channel })?;
                match arbiter.on_transmission_end(scheduler, &self.topology, node)? {
                    Some(TxOutcome::Collided(packet)) => self.tracker.record_collision(&packet),
                    Some(TxOutcome::Unreachable(packet)) => {
                        debug!("ch{} n{} -> n{} unreachable, seq {}", channel, packet.src, packet.dst, packet.sequence_number)
                    }
                    Some(TxOutcome::Delivered { .. }) | None => {}
                }
            }
            ChannelEventKind::Reception { packet } => {
                let now = scheduler.now();
                if self.tracker.record_receive(&packet, now) {
                    if let Some(answer) = self.application.on_receive(packet.dst, &packet, now) {
                        self.transmit(scheduler, answer)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn arbiter(&mut self, channel: ChannelId, node: NodeId) -> Result<&mut ChannelArbiter<StdRng>, SchedulingError> {
        self.arbiters
            .get_mut(channel)
            .ok_or(SchedulingError::NotOnChannel { node, channel })
    }

    /// Record a send and queue the packet at the sender's arbiter
    fn transmit(&mut self, scheduler: &mut EventScheduler<MeshAction>, transmit: Transmit) -> SimResult<()> {
        let src = transmit.src;
        let channel = self
            .topology
            .channel_of(src)
            .ok_or(SchedulingError::UnknownNode { node: src })?;
        let packet = transmit.into_packet(scheduler.now(), self.next_sequence);
        self.next_sequence += 1;

        self.tracker.record_send(&packet)?;
        self.arbiter(channel, src)?.enqueue(scheduler, src, packet)?;
        Ok(())
    }
}

impl<P: Application> EventHandler<MeshAction> for MeshWorld<P> {
    fn handle(&mut self, scheduler: &mut EventScheduler<MeshAction>, action: MeshAction) {
        if let Err(e) = self.dispatch(scheduler, action) {
            error!("event at {} failed: {}", scheduler.now(), e);
            if self.failure.is_none() {
                self.failure = Some(e);
            }
            scheduler.close();
        }
    }
}

/// Drives one simulation from configuration to flow report
pub struct SimulationRunner<P: Application = EchoApplication> {
    state: RunnerState,
    seed: [u8; 32],
    stop_time: SimTime,
    scheduler: EventScheduler<MeshAction>,
    world: MeshWorld<P>,
    summary: Option<RunSummary>,
    report: Vec<FlowSummary>,
}

impl SimulationRunner<EchoApplication> {
    /// Runner with the UDP echo workload described by `config.traffic`
    pub fn with_echo(config: &SimConfig) -> SimResult<Self> {
        let application = EchoApplication::from_config(config)?;
        Self::new(config, application)
    }
}

impl<P: Application> SimulationRunner<P> {
    pub fn new(config: &SimConfig, application: P) -> SimResult<Self> {
        config.validate()?;
        let topology = Topology::build(&config.topology)?;
        let timing = MediumTiming::from_config(&config.phy)?;
        let stop_time = config.duration()?;
        let seed = config.resolve_seed();

        let arbiters = (0..topology.num_channels())
            .map(|channel| {
                ChannelArbiter::new(
                    channel,
                    &topology,
                    timing.clone(),
                    config.phy.collision_model,
                    StdRng::from_seed(channel_seed(&seed, channel)),
                )
            })
            .collect();

        let timers = vec![None; topology.num_nodes()];
        Ok(Self {
            state: RunnerState::Configured,
            seed,
            stop_time,
            scheduler: EventScheduler::new(),
            world: MeshWorld {
                topology,
                arbiters,
                tracker: FlowTracker::new(),
                application,
                timers,
                next_sequence: 0,
                failure: None,
            },
            summary: None,
            report: Vec::new(),
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn seed_used(&self) -> [u8; 32] {
        self.seed
    }

    pub fn stop_time(&self) -> SimTime {
        self.stop_time
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn topology(&self) -> &Topology {
        &self.world.topology
    }

    pub fn tracker(&self) -> &FlowTracker {
        &self.world.tracker
    }

    pub fn application(&self) -> &P {
        &self.world.application
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.summary
    }

    pub fn channel_stats(&self) -> Vec<(ChannelId, ChannelStats)> {
        self.world
            .arbiters
            .iter()
            .map(|a| (a.id(), a.stats().clone()))
            .collect()
    }

    fn expect_state(&self, operation: &'static str, expected: RunnerState) -> Result<(), ReportingError> {
        if self.state != expected {
            return Err(ReportingError::WrongState {
                operation,
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Install every node's first application timer and its stop event
    pub fn start(&mut self) -> SimResult<()> {
        self.expect_state("start", RunnerState::Configured)?;
        let mut clients = 0usize;
        for node in 0..self.world.topology.num_nodes() {
            if let Some(at) = self.world.application.start_time(node) {
                let handle = self.scheduler.schedule_at(at, MeshAction::AppTimer { node })?;
                self.world.timers[node] = Some(handle);
                clients += 1;
            }
            if let Some(at) = self.world.application.stop_time(node) {
                self.scheduler.schedule_at(at, MeshAction::ClientStop { node })?;
            }
        }
        self.state = RunnerState::Running;
        info!(
            "simulation started: {} nodes, {} channels, {} clients, stop at {}",
            self.world.topology.num_nodes(),
            self.world.topology.num_channels(),
            clients,
            self.stop_time
        );
        Ok(())
    }

    /// Process events up to the stop time, then close the scheduler
    pub fn run(&mut self) -> SimResult<RunSummary> {
        self.expect_state("run", RunnerState::Running)?;
        let summary = self.scheduler.run_until(self.stop_time, &mut self.world)?;
        self.scheduler.close();
        self.state = RunnerState::Stopped;
        self.summary = Some(summary);

        info!(
            "simulation stopped at {}: {:?}, {} events executed, {} cancelled",
            summary.final_time, summary.outcome, summary.events_executed, summary.events_skipped
        );
        for arbiter in &self.world.arbiters {
            let stats = arbiter.stats();
            debug!(
                "ch{}: {} transmissions, {} delivered, {} collisions, {} unreachable, utilisation {:.3}",
                arbiter.id(),
                stats.transmissions,
                stats.delivered,
                stats.collisions,
                stats.unreachable,
                stats.utilisation(self.stop_time)
            );
        }

        match self.world.failure.take() {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Close the flow books; lost counts are computed here and only here
    pub fn finalize(&mut self) -> SimResult<&[FlowSummary]> {
        self.expect_state("finalize", RunnerState::Stopped)?;
        self.world.tracker.finalize(self.stop_time)?;
        self.report = self.world.tracker.report()?;
        self.state = RunnerState::Reported;
        info!("{} flows reported", self.report.len());
        Ok(&self.report)
    }

    pub fn report(&self) -> SimResult<&[FlowSummary]> {
        self.expect_state("report", RunnerState::Reported)?;
        Ok(&self.report)
    }

    pub fn run_to_report(&mut self) -> SimResult<&[FlowSummary]> {
        self.start()?;
        self.run()?;
        self.finalize()
    }
}
