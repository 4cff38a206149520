//! Per-flow delivery statistics.
//!
//! Packets are classified by their 5-tuple. A flow is created the first time
//! a packet with a new key is sent and keeps its slot for the rest of the run;
//! flow ids follow first-seen order starting at 1.
//!
//! Loss is never counted directly. Collisions are tallied for diagnostics, but
//! the authoritative lost figure is computed once, at `finalize`, as
//! `tx - rx`.

use std::fmt;
use std::net::Ipv4Addr;

use indexmap::IndexMap;
use log::{debug, warn};

use crate::mesh_error::ReportingError;
use crate::mesh_interface::{FlowId, FlowKey, Packet, SimTime};

/// Running counters for one flow
#[derive(Debug, Clone, PartialEq)]
pub struct FlowStats {
    pub flow_id: FlowId,
    pub key: FlowKey,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub delay_sum: SimTime,
    pub jitter_sum: SimTime,
    pub collisions: u64,
    pub first_seen: SimTime,
    pub last_rx: Option<SimTime>,
    last_delay: Option<SimTime>,
}

impl FlowStats {
    fn new(flow_id: FlowId, key: FlowKey, first_seen: SimTime) -> Self {
        Self {
            flow_id,
            key,
            tx_packets: 0,
            rx_packets: 0,
            lost_packets: 0,
            tx_bytes: 0,
            rx_bytes: 0,
            delay_sum: SimTime::ZERO,
            jitter_sum: SimTime::ZERO,
            collisions: 0,
            first_seen,
            last_rx: None,
            last_delay: None,
        }
    }
}

/// Final record for one flow, as handed to reporting
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSummary {
    pub flow_id: FlowId,
    pub key: FlowKey,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub collisions: u64,
    pub throughput_mbps: f64,
    /// None when nothing was received
    pub avg_delay_s: Option<f64>,
    pub avg_jitter_s: Option<f64>,
}

impl FlowSummary {
    pub fn loss_ratio(&self) -> f64 {
        if self.tx_packets == 0 {
            return 0.0;
        }
        self.lost_packets as f64 / self.tx_packets as f64
    }
}

impl fmt::Display for FlowSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Flow {}: {} -> {}", self.flow_id, self.src_addr, self.dst_addr)?;
        writeln!(f, "  Tx Packets: {}", self.tx_packets)?;
        writeln!(f, "  Rx Packets: {}", self.rx_packets)?;
        writeln!(f, "  Lost Packets: {}", self.lost_packets)?;
        write!(f, "  Throughput: {:.2} Mbps", self.throughput_mbps)?;
        if let Some(delay) = self.avg_delay_s {
            write!(f, "\n  Average delay: {:.6} s", delay)?;
        }
        Ok(())
    }
}

/// rx_bytes * 8 / simulation_time / 1e6; zero for an empty interval
pub fn throughput_mbps(rx_bytes: u64, simulation_time: SimTime) -> f64 {
    let secs = simulation_time.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    rx_bytes as f64 * 8.0 / secs / 1e6
}

/// Aggregate over all flows of a report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowTotals {
    pub flows: usize,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub collisions: u64,
    pub throughput_mbps: f64,
}

impl FlowTotals {
    pub fn from_summaries(summaries: &[FlowSummary]) -> Self {
        summaries.iter().fold(
            FlowTotals {
                flows: summaries.len(),
                ..FlowTotals::default()
            },
            |mut acc, s| {
                acc.tx_packets += s.tx_packets;
                acc.rx_packets += s.rx_packets;
                acc.lost_packets += s.lost_packets;
                acc.collisions += s.collisions;
                acc.throughput_mbps += s.throughput_mbps;
                acc
            },
        )
    }

    pub fn delivery_ratio(&self) -> f64 {
        if self.tx_packets == 0 {
            return 0.0;
        }
        self.rx_packets as f64 / self.tx_packets as f64
    }
}

/// 5-tuple flow classifier and statistics store
#[derive(Debug, Default)]
pub struct FlowTracker {
    flows: IndexMap<FlowKey, FlowStats>,
    finalized_at: Option<SimTime>,
}

impl FlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    pub fn flow(&self, key: &FlowKey) -> Option<&FlowStats> {
        self.flows.get(key)
    }

    /// Count a transmitted packet, creating its flow on first sight
    pub fn record_send(&mut self, packet: &Packet) -> Result<FlowId, ReportingError> {
        if self.finalized_at.is_some() {
            return Err(ReportingError::AlreadyFinalized);
        }
        let next_id = self.flows.len() as FlowId + 1;
        let stats = self
            .flows
            .entry(packet.flow_key)
            .or_insert_with(|| FlowStats::new(next_id, packet.flow_key, packet.send_time));
        stats.tx_packets += 1;
        stats.tx_bytes += packet.size_bytes as u64;
        Ok(stats.flow_id)
    }

    /// Count a delivered packet and its end-to-end delay.
    ///
    /// Returns false, leaving all counters untouched, when the packet cannot
    /// belong to a known flow.
    pub fn record_receive(&mut self, packet: &Packet, receive_time: SimTime) -> bool {
        if self.finalized_at.is_some() {
            warn!("receive for {} after finalize ignored", packet.flow_key);
            return false;
        }
        let Some(stats) = self.flows.get_mut(&packet.flow_key) else {
            warn!("receive for unknown flow {} ignored", packet.flow_key);
            return false;
        };
        if stats.rx_packets + stats.lost_packets >= stats.tx_packets {
            warn!(
                "flow {}: receive would exceed {} transmitted packets, ignored",
                stats.flow_id, stats.tx_packets
            );
            return false;
        }
        if receive_time < packet.send_time {
            warn!(
                "flow {}: seq {} received at {} before it was sent at {}",
                stats.flow_id, packet.sequence_number, receive_time, packet.send_time
            );
            return false;
        }

        let delay = receive_time.saturating_sub(packet.send_time);
        if let Some(previous) = stats.last_delay {
            let jitter = if delay > previous {
                delay.saturating_sub(previous)
            } else {
                previous.saturating_sub(delay)
            };
            stats.jitter_sum = stats.jitter_sum.saturating_add(jitter);
        }
        stats.last_delay = Some(delay);
        stats.delay_sum = stats.delay_sum.saturating_add(delay);
        stats.rx_packets += 1;
        stats.rx_bytes += packet.size_bytes as u64;
        stats.last_rx = Some(receive_time);
        true
    }

    /// Note that a packet of this flow was destroyed in a collision.
    ///
    /// Informational only; it does not feed `lost_packets`.
    pub fn record_collision(&mut self, packet: &Packet) {
        match self.flows.get_mut(&packet.flow_key) {
            Some(stats) => stats.collisions += 1,
            None => warn!("collision for unknown flow {} ignored", packet.flow_key),
        }
    }

    /// Close the books: lost = tx - rx for every flow
    pub fn finalize(&mut self, stop_time: SimTime) -> Result<(), ReportingError> {
        if self.finalized_at.is_some() {
            return Err(ReportingError::AlreadyFinalized);
        }
        for stats in self.flows.values_mut() {
            stats.lost_packets = stats.tx_packets - stats.rx_packets;
        }
        self.finalized_at = Some(stop_time);
        debug!("finalized {} flows at {}", self.flows.len(), stop_time);
        Ok(())
    }

    /// Summaries sorted by flow key
    pub fn report(&self) -> Result<Vec<FlowSummary>, ReportingError> {
        let simulation_time = self.finalized_at.ok_or(ReportingError::NotFinalized)?;

        let mut summaries: Vec<FlowSummary> = self
            .flows
            .values()
            .map(|s| FlowSummary {
                flow_id: s.flow_id,
                key: s.key,
                src_addr: s.key.src_addr,
                dst_addr: s.key.dst_addr,
                tx_packets: s.tx_packets,
                rx_packets: s.rx_packets,
                lost_packets: s.lost_packets,
                tx_bytes: s.tx_bytes,
                rx_bytes: s.rx_bytes,
                collisions: s.collisions,
                throughput_mbps: throughput_mbps(s.rx_bytes, simulation_time),
                avg_delay_s: (s.rx_packets > 0)
                    .then(|| s.delay_sum.as_secs_f64() / s.rx_packets as f64),
                avg_jitter_s: (s.rx_packets > 1)
                    .then(|| s.jitter_sum.as_secs_f64() / (s.rx_packets - 1) as f64),
            })
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }
}
