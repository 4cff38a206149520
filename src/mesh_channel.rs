//! Shared-medium contention for one channel.
//!
//! Each channel has one `ChannelArbiter`. Stations contend with an EDCA-like
//! rule: a packet waits AIFS plus a random number of slots drawn from its
//! access category's contention window, measured from the moment it becomes
//! ready (idle medium) or from the end of the current on-air activity (busy
//! medium, with the window doubled once).
//!
//! The first transmission to start on an idle medium is the winner. Any
//! transmission that starts while something is on air is a collision and is
//! lost. Whether the overlap also destroys the winner depends on the
//! [`CollisionModel`].
//!
//! The arbiter drives itself through [`ChannelEvent`]s on the shared
//! scheduler; the action type only has to be convertible from them.

use std::collections::VecDeque;

use hashbrown::HashMap;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, RngCore};

use crate::mesh_config::{CollisionModel, PhyConfig, PropagationModel};
use crate::mesh_error::{ConfigurationError, SchedulingError};
use crate::mesh_interface::{AccessCategory, ChannelId, NodeId, Packet, SimTime};
use crate::mesh_scheduler::{EventHandle, EventScheduler};
use crate::mesh_topology::Topology;

pub const SLOT_TIME: SimTime = SimTime::from_micros(9);
pub const SIFS: SimTime = SimTime::from_micros(16);
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

// ============================================================================
// EDCA parameters
// ============================================================================

/// Contention parameters of one access category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdcaParams {
    pub aifsn: u32,
    pub cw_min: u32,
    pub cw_max: u32,
}

impl EdcaParams {
    /// 802.11 default EDCA parameter set for an OFDM PHY
    pub fn for_category(category: AccessCategory) -> Self {
        match category {
            AccessCategory::Voice => EdcaParams { aifsn: 2, cw_min: 3, cw_max: 7 },
            AccessCategory::Video => EdcaParams { aifsn: 2, cw_min: 7, cw_max: 15 },
            AccessCategory::BestEffort => EdcaParams { aifsn: 3, cw_min: 15, cw_max: 1023 },
            AccessCategory::Background => EdcaParams { aifsn: 7, cw_min: 15, cw_max: 1023 },
        }
    }

    pub fn aifs(&self) -> SimTime {
        SIFS.saturating_add(SLOT_TIME.times(self.aifsn as u64))
    }

    /// Window used for a draw; doubled once when the medium was sensed busy
    pub fn contention_window(&self, medium_busy: bool) -> u32 {
        if medium_busy {
            (2 * (self.cw_min + 1) - 1).min(self.cw_max)
        } else {
            self.cw_min
        }
    }

    /// Longest wait a draw can produce
    pub fn max_wait(&self, medium_busy: bool) -> SimTime {
        self.aifs()
            .saturating_add(SLOT_TIME.times(self.contention_window(medium_busy) as u64))
    }
}

// ============================================================================
// Airtime and propagation
// ============================================================================

/// Converts packet sizes to airtime and distances to propagation delay
#[derive(Debug, Clone)]
pub struct MediumTiming {
    data_rate_bps: f64,
    preamble: SimTime,
    overhead_bytes: u32,
    propagation: PropagationModel,
}

impl MediumTiming {
    pub fn from_config(phy: &PhyConfig) -> Result<Self, ConfigurationError> {
        if !phy.data_rate_mbps.is_finite() || phy.data_rate_mbps <= 0.0 {
            return Err(ConfigurationError::NonPositive {
                name: "data_rate_mbps",
                value: phy.data_rate_mbps,
            });
        }
        if let PropagationModel::Fixed { delay_s } = phy.propagation {
            SimTime::from_secs_f64(delay_s)?;
        }
        Ok(Self {
            data_rate_bps: phy.data_rate_mbps * 1e6,
            preamble: SimTime::from_secs_f64(phy.preamble_us * 1e-6)?,
            overhead_bytes: phy.overhead_bytes,
            propagation: phy.propagation,
        })
    }

    /// Time the medium is occupied by a packet of `size_bytes` payload
    pub fn airtime(&self, size_bytes: u32) -> SimTime {
        let bits = (size_bytes as f64 + self.overhead_bytes as f64) * 8.0;
        let nanos = (bits / self.data_rate_bps * 1e9).round() as u64;
        self.preamble.saturating_add(SimTime::from_nanos(nanos))
    }

    pub fn propagation_delay(&self, distance_m: f64) -> SimTime {
        match self.propagation {
            PropagationModel::ConstantSpeed => {
                SimTime::from_nanos((distance_m / SPEED_OF_LIGHT_M_S * 1e9).round() as u64)
            }
            // validated in from_config
            PropagationModel::Fixed { delay_s } => SimTime::from_secs_f64(delay_s).unwrap_or_default(),
        }
    }
}

// ============================================================================
// Events and outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    /// Backoff expired; the station starts transmitting
    AccessAttempt { node: NodeId },
    /// The station's frame left the air
    TransmissionEnd { node: NodeId },
    /// A successfully transmitted frame reaches its destination
    Reception { packet: Packet },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub kind: ChannelEventKind,
}

/// Fate of a frame once it has left the air
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Delivered { packet: Packet, arrival: SimTime },
    Collided(Packet),
    Unreachable(Packet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumState {
    Idle,
    Busy,
}

/// Per-channel counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelStats {
    pub transmissions: u64,
    pub delivered: u64,
    /// Frames lost to an overlap, counted when they leave the air
    pub collisions: u64,
    pub unreachable: u64,
    pub busy_time: SimTime,
}

impl ChannelStats {
    /// Fraction of `elapsed` the medium carried at least one frame
    pub fn utilisation(&self, elapsed: SimTime) -> f64 {
        if elapsed == SimTime::ZERO {
            return 0.0;
        }
        self.busy_time.as_secs_f64() / elapsed.as_secs_f64()
    }
}

// ============================================================================
// Arbiter
// ============================================================================

#[derive(Debug)]
struct Station {
    category: AccessCategory,
    queue: VecDeque<Packet>,
    /// Pending access attempt
    backoff: Option<EventHandle>,
    transmitting: bool,
}

#[derive(Debug, Clone)]
struct OnAir {
    node: NodeId,
    packet: Packet,
    start: SimTime,
    corrupted: bool,
}

pub struct ChannelArbiter<R: RngCore = StdRng> {
    id: ChannelId,
    rng: R,
    timing: MediumTiming,
    collision_model: CollisionModel,
    stations: HashMap<NodeId, Station>,
    on_air: Vec<OnAir>,
    winner: Option<NodeId>,
    busy_until: SimTime,
    busy_since: SimTime,
    stats: ChannelStats,
}

impl<R: RngCore> ChannelArbiter<R> {
    /// Create the arbiter for `id` with every member of that channel as a station
    pub fn new(
        id: ChannelId,
        topology: &Topology,
        timing: MediumTiming,
        collision_model: CollisionModel,
        rng: R,
    ) -> Self {
        let stations = topology
            .members(id)
            .iter()
            .filter_map(|&node| {
                let category = topology.access_category_of(node)?;
                Some((
                    node,
                    Station {
                        category,
                        queue: VecDeque::new(),
                        backoff: None,
                        transmitting: false,
                    },
                ))
            })
            .collect();

        Self {
            id,
            rng,
            timing,
            collision_model,
            stations,
            on_air: Vec::new(),
            winner: None,
            busy_until: SimTime::ZERO,
            busy_since: SimTime::ZERO,
            stats: ChannelStats::default(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub fn is_member(&self, node: NodeId) -> bool {
        self.stations.contains_key(&node)
    }

    pub fn medium_state(&self) -> MediumState {
        if self.on_air.is_empty() {
            MediumState::Idle
        } else {
            MediumState::Busy
        }
    }

    /// The winning frame currently on air, if any
    pub fn current_transmission(&self) -> Option<&Packet> {
        let winner = self.winner?;
        self.on_air.iter().find(|t| t.node == winner).map(|t| &t.packet)
    }

    /// Packets waiting at `node`, excluding one already on air
    pub fn queued(&self, node: NodeId) -> usize {
        self.stations.get(&node).map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Hand a packet to `node`'s transmit queue
    pub fn enqueue<A>(
        &mut self,
        scheduler: &mut EventScheduler<A>,
        node: NodeId,
        packet: Packet,
    ) -> Result<(), SchedulingError>
    where
        A: From<ChannelEvent>,
    {
        let station = self
            .stations
            .get_mut(&node)
            .ok_or(SchedulingError::NotOnChannel { node, channel: self.id })?;
        station.queue.push_back(packet);
        let idle = station.backoff.is_none() && !station.transmitting;
        if idle {
            self.start_contention(scheduler, node)?;
        }
        Ok(())
    }

    /// Draw a backoff for the head-of-line packet of `node`
    fn start_contention<A>(&mut self, scheduler: &mut EventScheduler<A>, node: NodeId) -> Result<(), SchedulingError>
    where
        A: From<ChannelEvent>,
    {
        let now = scheduler.now();
        let busy = now < self.busy_until || !self.on_air.is_empty();
        let Some(station) = self.stations.get_mut(&node) else {
            return Ok(());
        };
        if station.queue.is_empty() {
            return Ok(());
        }

        let params = EdcaParams::for_category(station.category);
        let window = params.contention_window(busy);
        let slots = self.rng.gen_range(0..=window) as u64;
        let defer_from = if busy { self.busy_until.max(now) } else { now };
        let at = defer_from
            .saturating_add(params.aifs())
            .saturating_add(SLOT_TIME.times(slots));

        trace!(
            "ch{} n{} {} backoff {} slots (cw {}, busy {}) -> {}",
            self.id,
            node,
            station.category,
            slots,
            window,
            busy,
            at
        );

        let handle = scheduler.schedule_at(
            at,
            A::from(ChannelEvent {
                channel: self.id,
                kind: ChannelEventKind::AccessAttempt { node },
            }),
        )?;
        station.backoff = Some(handle);
        Ok(())
    }

    /// Backoff expired: put the head-of-line frame on air
    pub fn on_access_attempt<A>(&mut self, scheduler: &mut EventScheduler<A>, node: NodeId) -> Result<(), SchedulingError>
    where
        A: From<ChannelEvent>,
    {
        let now = scheduler.now();
        let Some(station) = self.stations.get_mut(&node) else {
            return Err(SchedulingError::NotOnChannel { node, channel: self.id });
        };
        station.backoff = None;
        let Some(packet) = station.queue.pop_front() else {
            return Ok(());
        };
        station.transmitting = true;
        let category = station.category;

        let end = now.saturating_add(self.timing.airtime(packet.size_bytes));
        let mut corrupted = false;

        if self.on_air.is_empty() {
            self.busy_since = now;
            self.winner = Some(node);
        } else {
            // a same-instant tie goes to the higher category, then the lower node id
            let takes_over = match self.winner.and_then(|w| self.on_air.iter().find(|t| t.node == w)) {
                Some(current) if current.start == now => {
                    let current_category = self.category_of(current.node);
                    category.outranks(current_category)
                        || (category == current_category && node < current.node)
                }
                _ => false,
            };

            if takes_over {
                if let Some(previous) = self.winner {
                    for t in self.on_air.iter_mut().filter(|t| t.node == previous) {
                        t.corrupted = true;
                    }
                    debug!("ch{} n{} outranks n{} at {}", self.id, node, previous, now);
                }
                self.winner = Some(node);
            } else {
                corrupted = true;
            }

            if self.collision_model == CollisionModel::AllCorrupted {
                corrupted = true;
                for t in self.on_air.iter_mut() {
                    t.corrupted = true;
                }
            }
        }

        trace!(
            "ch{} n{} on air {}..{} seq {} {}",
            self.id,
            node,
            now,
            end,
            packet.sequence_number,
            if corrupted { "(collided)" } else { "" }
        );

        self.on_air.push(OnAir {
            node,
            packet,
            start: now,
            corrupted,
        });
        self.busy_until = self.busy_until.max(end);
        self.stats.transmissions += 1;

        scheduler.schedule_at(
            end,
            A::from(ChannelEvent {
                channel: self.id,
                kind: ChannelEventKind::TransmissionEnd { node },
            }),
        )?;
        Ok(())
    }

    /// Frame of `node` left the air.
    ///
    /// Schedules the reception for a clean, reachable frame and starts
    /// contention for the station's next packet.
    pub fn on_transmission_end<A>(
        &mut self,
        scheduler: &mut EventScheduler<A>,
        topology: &Topology,
        node: NodeId,
    ) -> Result<Option<TxOutcome>, SchedulingError>
    where
        A: From<ChannelEvent>,
    {
        let now = scheduler.now();
        let Some(index) = self.on_air.iter().position(|t| t.node == node) else {
            return Ok(None);
        };
        let finished = self.on_air.swap_remove(index);
        if self.winner == Some(node) {
            self.winner = None;
        }
        if self.on_air.is_empty() {
            let busy = now.saturating_sub(self.busy_since);
            self.stats.busy_time = self.stats.busy_time.saturating_add(busy);
        }

        let packet = finished.packet;
        let outcome = if finished.corrupted {
            self.stats.collisions += 1;
            TxOutcome::Collided(packet)
        } else if !topology.can_reach(packet.src, packet.dst) {
            self.stats.unreachable += 1;
            TxOutcome::Unreachable(packet)
        } else {
            let delay = self.timing.propagation_delay(topology.distance(packet.src, packet.dst));
            let arrival = now.saturating_add(delay);
            self.stats.delivered += 1;
            scheduler.schedule_at(
                arrival,
                A::from(ChannelEvent {
                    channel: self.id,
                    kind: ChannelEventKind::Reception { packet: packet.clone() },
                }),
            )?;
            TxOutcome::Delivered { packet, arrival }
        };

        if let Some(station) = self.stations.get_mut(&node) {
            station.transmitting = false;
        }
        self.start_contention(scheduler, node)?;

        Ok(Some(outcome))
    }

    /// Withdraw `node` from contention: cancel its pending backoff and hand
    /// back everything it still had queued.
    pub fn withdraw<A>(&mut self, scheduler: &mut EventScheduler<A>, node: NodeId) -> Vec<Packet> {
        let Some(station) = self.stations.get_mut(&node) else {
            return Vec::new();
        };
        if let Some(handle) = station.backoff.take() {
            scheduler.cancel(handle);
        }
        station.queue.drain(..).collect()
    }

    fn category_of(&self, node: NodeId) -> AccessCategory {
        self.stations
            .get(&node)
            .map(|s| s.category)
            .unwrap_or(AccessCategory::Background)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_config::{AccessPolicy, CrossChannelPolicy, TopologyConfig};
    use crate::mesh_interface::{FlowKey, PacketKind};
    use rand::SeedableRng;

    fn topology(nodes: usize, channels: usize, policy: AccessPolicy) -> Topology {
        let config = TopologyConfig {
            num_nodes: nodes,
            num_channels: channels,
            access_policy: policy,
            cross_channel: CrossChannelPolicy::Bridged,
            ..TopologyConfig::default()
        };
        Topology::build(&config).unwrap()
    }

    fn packet(topo: &Topology, src: NodeId, seq: u64) -> Packet {
        let dst = topo.neighbor_for(src);
        Packet {
            flow_key: FlowKey::udp(
                topo.address_of(src).unwrap(),
                49153,
                topo.address_of(dst).unwrap(),
                9,
            ),
            access_category: topo.access_category_of(src).unwrap(),
            size_bytes: 1024,
            send_time: SimTime::ZERO,
            sequence_number: seq,
            src,
            dst,
            kind: PacketKind::EchoRequest,
        }
    }

    fn arbiters(topo: &Topology, seed: u64) -> Vec<ChannelArbiter<StdRng>> {
        let timing = MediumTiming::from_config(&PhyConfig::default()).unwrap();
        (0..topo.num_channels())
            .map(|c| {
                ChannelArbiter::new(
                    c,
                    topo,
                    timing.clone(),
                    CollisionModel::WinnerCaptures,
                    StdRng::seed_from_u64(seed + c as u64),
                )
            })
            .collect()
    }

    /// Run all channel events; returns every outcome and received packet
    fn drive(
        topo: &Topology,
        arbiters: &mut [ChannelArbiter<StdRng>],
        scheduler: &mut EventScheduler<ChannelEvent>,
    ) -> (Vec<TxOutcome>, Vec<(SimTime, Packet)>) {
        let mut outcomes = Vec::new();
        let mut received = Vec::new();
        scheduler
            .run_until(SimTime::from_millis(1000), &mut |s: &mut EventScheduler<ChannelEvent>, e: ChannelEvent| {
                let arbiter = &mut arbiters[e.channel];
                match e.kind {
                    ChannelEventKind::AccessAttempt { node } => arbiter.on_access_attempt(s, node).unwrap(),
                    ChannelEventKind::TransmissionEnd { node } => {
                        if let Some(o) = arbiter.on_transmission_end(s, topo, node).unwrap() {
                            outcomes.push(o);
                        }
                    }
                    ChannelEventKind::Reception { packet } => received.push((s.now(), packet)),
                }
            })
            .unwrap();
        (outcomes, received)
    }

    #[test]
    fn test_edca_priority_ordering() {
        let vo = EdcaParams::for_category(AccessCategory::Voice);
        let vi = EdcaParams::for_category(AccessCategory::Video);
        let be = EdcaParams::for_category(AccessCategory::BestEffort);
        let bk = EdcaParams::for_category(AccessCategory::Background);
        assert!(vo.max_wait(false) < vi.max_wait(false));
        assert!(vi.max_wait(false) < be.max_wait(false));
        assert!(be.max_wait(false) < bk.max_wait(false));
        assert_eq!(be.aifs(), SimTime::from_micros(43));
        assert_eq!(be.contention_window(true), 31);
        assert_eq!(vo.contention_window(true), 7);
    }

    #[test]
    fn test_airtime_scales_with_size() {
        let timing = MediumTiming::from_config(&PhyConfig::default()).unwrap();
        // 40 us preamble + (1024 + 36) * 8 bits at 54 Mb/s
        assert_eq!(timing.airtime(1024), SimTime::from_nanos(40_000 + 157_037));
        assert!(timing.airtime(512) < timing.airtime(1024));
        assert_eq!(timing.propagation_delay(15.0), SimTime::from_nanos(50));
    }

    #[test]
    fn test_single_domain_one_winner() {
        let topo = topology(4, 1, AccessPolicy::Fixed(AccessCategory::BestEffort));
        for seed in 0..20 {
            let mut arbs = arbiters(&topo, seed);
            let mut sched = EventScheduler::new();
            for node in 0..4 {
                arbs[0].enqueue(&mut sched, node, packet(&topo, node, node as u64)).unwrap();
            }
            let (outcomes, received) = drive(&topo, &mut arbs, &mut sched);

            let delivered = outcomes.iter().filter(|o| matches!(o, TxOutcome::Delivered { .. })).count();
            let collided = outcomes.iter().filter(|o| matches!(o, TxOutcome::Collided(_))).count();
            assert_eq!(delivered, 1, "seed {}", seed);
            assert_eq!(collided, 3, "seed {}", seed);
            assert_eq!(received.len(), 1);
            assert_eq!(arbs[0].stats().collisions, 3);
            assert_eq!(arbs[0].medium_state(), MediumState::Idle);
        }
    }

    #[test]
    fn test_channels_isolated() {
        let topo = topology(4, 4, AccessPolicy::Fixed(AccessCategory::BestEffort));
        let mut arbs = arbiters(&topo, 7);
        let mut sched = EventScheduler::new();
        for node in 0..4 {
            let channel = topo.channel_of(node).unwrap();
            arbs[channel].enqueue(&mut sched, node, packet(&topo, node, 0)).unwrap();
        }
        let (outcomes, received) = drive(&topo, &mut arbs, &mut sched);

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| matches!(o, TxOutcome::Delivered { .. })));
        assert_eq!(received.len(), 4);
        assert!(arbs.iter().all(|a| a.stats().collisions == 0));
    }

    #[test]
    fn test_queued_packets_serialised_after_success() {
        let topo = topology(2, 1, AccessPolicy::Fixed(AccessCategory::Voice));
        let mut arbs = arbiters(&topo, 3);
        let mut sched = EventScheduler::new();
        for seq in 0..3 {
            arbs[0].enqueue(&mut sched, 0, packet(&topo, 0, seq)).unwrap();
        }
        assert_eq!(arbs[0].queued(0), 3);

        let (outcomes, received) = drive(&topo, &mut arbs, &mut sched);
        assert_eq!(outcomes.len(), 3);
        let seqs: Vec<u64> = received.iter().map(|(_, p)| p.sequence_number).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        // a single station never collides with itself
        assert_eq!(arbs[0].stats().collisions, 0);
        for w in received.windows(2) {
            assert!(w[1].0 >= w[0].0.saturating_add(MediumTiming::from_config(&PhyConfig::default()).unwrap().airtime(1024)));
        }
    }

    #[test]
    fn test_busy_medium_defers_new_contender() {
        let topo = topology(2, 1, AccessPolicy::Fixed(AccessCategory::BestEffort));
        let mut arbs = arbiters(&topo, 11);
        let mut sched: EventScheduler<ChannelEvent> = EventScheduler::new();

        arbs[0].enqueue(&mut sched, 0, packet(&topo, 0, 0)).unwrap();
        let mut outcomes = Vec::new();
        let mut late_enqueued = false;
        sched
            .run_until(SimTime::from_millis(10), &mut |s: &mut EventScheduler<ChannelEvent>, e: ChannelEvent| {
                let arbiter = &mut arbs[e.channel];
                match e.kind {
                    ChannelEventKind::AccessAttempt { node } => {
                        arbiter.on_access_attempt(s, node).unwrap();
                        if !late_enqueued {
                            // node 1 becomes ready while node 0 is on air
                            late_enqueued = true;
                            assert_eq!(arbiter.medium_state(), MediumState::Busy);
                            arbiter.enqueue(s, 1, packet(&topo, 1, 1)).unwrap();
                        }
                    }
                    ChannelEventKind::TransmissionEnd { node } => {
                        outcomes.push(arbiter.on_transmission_end(s, &topo, node).unwrap().unwrap());
                    }
                    ChannelEventKind::Reception { .. } => {}
                }
            })
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o, TxOutcome::Delivered { .. })));
        assert_eq!(arbs[0].stats().collisions, 0);
    }

    #[test]
    fn test_equal_start_tie_broken_by_category_then_id() {
        let topo = topology(4, 1, AccessPolicy::Fixed(AccessCategory::Video));
        let mut arbs = arbiters(&topo, 5);
        let mut sched: EventScheduler<ChannelEvent> = EventScheduler::new();

        // force both attempts to the same instant, higher id first
        for node in [3usize, 1] {
            arbs[0].stations.get_mut(&node).unwrap().queue.push_back(packet(&topo, node, node as u64));
            sched
                .schedule_at(
                    SimTime::from_micros(100),
                    ChannelEvent { channel: 0, kind: ChannelEventKind::AccessAttempt { node } },
                )
                .unwrap();
        }

        let (outcomes, _) = drive(&topo, &mut arbs, &mut sched);
        let winner: Vec<NodeId> = outcomes
            .iter()
            .filter_map(|o| match o {
                TxOutcome::Delivered { packet, .. } => Some(packet.src),
                _ => None,
            })
            .collect();
        assert_eq!(winner, vec![1]);
    }

    #[test]
    fn test_all_corrupted_model_loses_winner_too() {
        let topo = topology(4, 1, AccessPolicy::Fixed(AccessCategory::BestEffort));
        let timing = MediumTiming::from_config(&PhyConfig::default()).unwrap();
        let mut arbs = vec![ChannelArbiter::new(
            0,
            &topo,
            timing,
            CollisionModel::AllCorrupted,
            StdRng::seed_from_u64(1),
        )];
        let mut sched = EventScheduler::new();
        for node in 0..4 {
            arbs[0].enqueue(&mut sched, node, packet(&topo, node, 0)).unwrap();
        }
        let (outcomes, received) = drive(&topo, &mut arbs, &mut sched);
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| matches!(o, TxOutcome::Collided(_))));
        assert!(received.is_empty());
        // the corrupted winner is a lost frame too
        assert_eq!(arbs[0].stats().collisions, 4);
        assert_eq!(arbs[0].stats().delivered, 0);
    }

    #[test]
    fn test_unreachable_destination_never_received() {
        let config = TopologyConfig {
            num_nodes: 2,
            num_channels: 2,
            ..TopologyConfig::default()
        };
        let topo = Topology::build(&config).unwrap();
        let mut arbs = arbiters(&topo, 2);
        let mut sched = EventScheduler::new();
        arbs[0].enqueue(&mut sched, 0, packet(&topo, 0, 0)).unwrap();
        let (outcomes, received) = drive(&topo, &mut arbs, &mut sched);
        assert!(matches!(outcomes[0], TxOutcome::Unreachable(_)));
        assert!(received.is_empty());
        assert_eq!(arbs[0].stats().unreachable, 1);
    }

    #[test]
    fn test_enqueue_rejects_foreign_node() {
        let topo = topology(4, 2, AccessPolicy::RoundRobin);
        let mut arbs = arbiters(&topo, 0);
        let mut sched: EventScheduler<ChannelEvent> = EventScheduler::new();
        let err = arbs[0].enqueue(&mut sched, 3, packet(&topo, 3, 0)).unwrap_err();
        assert_eq!(err, SchedulingError::NotOnChannel { node: 3, channel: 0 });
    }

    #[test]
    fn test_withdraw_cancels_backoff() {
        let topo = topology(2, 1, AccessPolicy::RoundRobin);
        let mut arbs = arbiters(&topo, 0);
        let mut sched: EventScheduler<ChannelEvent> = EventScheduler::new();
        arbs[0].enqueue(&mut sched, 0, packet(&topo, 0, 0)).unwrap();
        arbs[0].enqueue(&mut sched, 0, packet(&topo, 0, 1)).unwrap();
        assert_eq!(sched.pending(), 1);

        let returned = arbs[0].withdraw(&mut sched, 0);
        assert_eq!(returned.len(), 2);
        assert!(sched.is_idle());
        let (outcomes, _) = drive(&topo, &mut arbs, &mut sched);
        assert!(outcomes.is_empty());
    }
}
