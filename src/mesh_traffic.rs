//! Application layer: what nodes send and how they answer.
//!
//! An [`Application`] never touches the medium directly. It returns
//! [`Transmit`] requests and the runner turns them into packets, records them
//! with the flow tracker and hands them to the sender's channel arbiter.

use hashbrown::HashMap;
use log::{trace, warn};

use crate::mesh_config::{SimConfig, TrafficConfig};
use crate::mesh_error::ConfigurationError;
use crate::mesh_interface::{AccessCategory, FlowKey, NodeId, Packet, PacketKind, SimTime};
use crate::mesh_topology::Topology;

/// A packet the application wants on air now
#[derive(Debug, Clone, PartialEq)]
pub struct Transmit {
    pub src: NodeId,
    pub dst: NodeId,
    pub flow_key: FlowKey,
    pub access_category: AccessCategory,
    pub size_bytes: u32,
    pub kind: PacketKind,
}

impl Transmit {
    /// Stamp the request into a packet leaving at `now`
    pub fn into_packet(self, now: SimTime, sequence_number: u64) -> Packet {
        Packet {
            flow_key: self.flow_key,
            access_category: self.access_category,
            size_bytes: self.size_bytes,
            send_time: now,
            sequence_number,
            src: self.src,
            dst: self.dst,
            kind: self.kind,
        }
    }
}

/// Result of a timer firing: an optional send and the absolute time of the
/// next timer, if any
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerAction {
    pub send: Option<Transmit>,
    pub next: Option<SimTime>,
}

impl TimerAction {
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Traffic source and sink installed on every node
pub trait Application {
    /// First timer for `node`, None for a node that never sends on its own
    fn start_time(&self, node: NodeId) -> Option<SimTime>;

    /// Time after which `node` stops sending; pending timers are cancelled
    fn stop_time(&self, node: NodeId) -> Option<SimTime>;

    fn on_timer(&mut self, node: NodeId, now: SimTime, topology: &Topology) -> TimerAction;

    /// A packet addressed to `node` arrived; optionally answer it
    fn on_receive(&mut self, node: NodeId, packet: &Packet, now: SimTime) -> Option<Transmit>;
}

/// Per-node echo counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoCounters {
    pub requests_sent: u32,
    pub requests_served: u32,
    pub replies_received: u32,
}

/// UDP echo client and server on every node.
///
/// Each client sends `packet_count` requests of `packet_size` bytes to its
/// index neighbor, one every `interval_s`, inside the client window. Servers
/// answer each request on the reversed flow with the same access category.
#[derive(Debug, Clone)]
pub struct EchoApplication {
    traffic: TrafficConfig,
    start: SimTime,
    stop: SimTime,
    interval: SimTime,
    counters: HashMap<NodeId, EchoCounters>,
}

impl EchoApplication {
    pub fn new(traffic: &TrafficConfig, duration: SimTime) -> Result<Self, ConfigurationError> {
        let start = SimTime::from_secs_f64(traffic.client_start_s)?;
        let stop = match traffic.client_stop_s {
            Some(secs) => SimTime::from_secs_f64(secs)?,
            None => duration,
        };
        if stop < start {
            return Err(ConfigurationError::ClientWindowInverted { start, stop });
        }
        if !traffic.interval_s.is_finite() || traffic.interval_s <= 0.0 {
            return Err(ConfigurationError::NonPositive {
                name: "interval_s",
                value: traffic.interval_s,
            });
        }
        Ok(Self {
            traffic: traffic.clone(),
            start,
            stop,
            interval: SimTime::from_secs_f64(traffic.interval_s)?,
            counters: HashMap::new(),
        })
    }

    pub fn from_config(config: &SimConfig) -> Result<Self, ConfigurationError> {
        Self::new(&config.traffic, config.duration()?)
    }

    pub fn counters(&self, node: NodeId) -> EchoCounters {
        self.counters.get(&node).copied().unwrap_or_default()
    }

    pub fn total_replies(&self) -> u64 {
        self.counters.values().map(|c| c.replies_received as u64).sum()
    }
}

impl Application for EchoApplication {
    fn start_time(&self, _node: NodeId) -> Option<SimTime> {
        (self.traffic.packet_count > 0).then_some(self.start)
    }

    fn stop_time(&self, _node: NodeId) -> Option<SimTime> {
        Some(self.stop)
    }

    fn on_timer(&mut self, node: NodeId, now: SimTime, topology: &Topology) -> TimerAction {
        let dst = topology.neighbor_for(node);
        let (Some(src_addr), Some(dst_addr), Some(category)) = (
            topology.address_of(node),
            topology.address_of(dst),
            topology.access_category_of(node),
        ) else {
            warn!("echo client timer for unknown node {}", node);
            return TimerAction::idle();
        };

        let counters = self.counters.entry(node).or_default();
        if counters.requests_sent >= self.traffic.packet_count {
            return TimerAction::idle();
        }
        counters.requests_sent += 1;

        let next = (counters.requests_sent < self.traffic.packet_count)
            .then(|| now.saturating_add(self.interval));

        TimerAction {
            send: Some(Transmit {
                src: node,
                dst,
                flow_key: FlowKey::udp(src_addr, self.traffic.client_port, dst_addr, self.traffic.server_port),
                access_category: category,
                size_bytes: self.traffic.packet_size,
                kind: PacketKind::EchoRequest,
            }),
            next,
        }
    }

    fn on_receive(&mut self, node: NodeId, packet: &Packet, now: SimTime) -> Option<Transmit> {
        let counters = self.counters.entry(node).or_default();
        match packet.kind {
            PacketKind::EchoRequest => {
                counters.requests_served += 1;
                if !self.traffic.echo_replies {
                    return None;
                }
                trace!("n{} echoes seq {} to n{} at {}", node, packet.sequence_number, packet.src, now);
                Some(Transmit {
                    src: node,
                    dst: packet.src,
                    flow_key: packet.flow_key.reversed(),
                    access_category: packet.access_category,
                    size_bytes: packet.size_bytes,
                    kind: PacketKind::EchoReply,
                })
            }
            PacketKind::EchoReply => {
                counters.replies_received += 1;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_config::TopologyConfig;
    use std::net::Ipv4Addr;

    fn app(count: u32) -> EchoApplication {
        let traffic = TrafficConfig {
            packet_count: count,
            ..TrafficConfig::default()
        };
        EchoApplication::new(&traffic, SimTime::from_millis(10_000)).unwrap()
    }

    #[test]
    fn test_client_window_defaults() {
        let app = app(3);
        assert_eq!(app.start_time(0), Some(SimTime::from_millis(100)));
        assert_eq!(app.stop_time(0), Some(SimTime::from_millis(10_000)));
        assert_eq!(self::app(0).start_time(0), None);
    }

    #[test]
    fn test_client_sends_count_packets_to_neighbor() {
        let topo = Topology::build(&TopologyConfig::default()).unwrap();
        let mut app = app(3);
        let mut now = SimTime::from_millis(100);
        let mut sent = Vec::new();
        loop {
            let action = app.on_timer(99, now, &topo);
            if let Some(t) = action.send {
                sent.push(t);
            }
            match action.next {
                Some(next) => {
                    assert_eq!(next, now.saturating_add(SimTime::from_millis(5)));
                    now = next;
                }
                None => break,
            }
        }
        assert_eq!(sent.len(), 3);
        let first = &sent[0];
        assert_eq!(first.dst, 0);
        assert_eq!(first.flow_key.src_addr, Ipv4Addr::new(10, 1, 0, 100));
        assert_eq!(first.flow_key.dst_addr, Ipv4Addr::new(10, 1, 0, 1));
        assert_eq!(first.flow_key.src_port, 49153);
        assert_eq!(first.flow_key.dst_port, 9);
        // 99 % 4 == 3
        assert_eq!(first.access_category, AccessCategory::Background);
        assert_eq!(app.counters(99).requests_sent, 3);
        assert_eq!(app.on_timer(99, now, &topo), TimerAction::idle());
    }

    #[test]
    fn test_server_echoes_on_reversed_flow() {
        let topo = Topology::build(&TopologyConfig::default()).unwrap();
        let mut app = app(1);
        let request = app
            .on_timer(4, SimTime::from_millis(100), &topo)
            .send
            .unwrap()
            .into_packet(SimTime::from_millis(100), 7);

        let reply = app.on_receive(5, &request, SimTime::from_millis(101)).unwrap();
        assert_eq!(reply.src, 5);
        assert_eq!(reply.dst, 4);
        assert_eq!(reply.flow_key, request.flow_key.reversed());
        assert_eq!(reply.access_category, AccessCategory::Voice);
        assert_eq!(reply.kind, PacketKind::EchoReply);

        let reply_packet = reply.into_packet(SimTime::from_millis(101), 8);
        assert_eq!(app.on_receive(4, &reply_packet, SimTime::from_millis(102)), None);
        assert_eq!(app.counters(5).requests_served, 1);
        assert_eq!(app.counters(4).replies_received, 1);
        assert_eq!(app.total_replies(), 1);
    }

    #[test]
    fn test_echo_replies_can_be_disabled() {
        let topo = Topology::build(&TopologyConfig::default()).unwrap();
        let traffic = TrafficConfig {
            echo_replies: false,
            ..TrafficConfig::default()
        };
        let mut app = EchoApplication::new(&traffic, SimTime::from_millis(1000)).unwrap();
        let request = app
            .on_timer(0, SimTime::ZERO, &topo)
            .send
            .unwrap()
            .into_packet(SimTime::ZERO, 0);
        assert_eq!(app.on_receive(1, &request, SimTime::from_millis(1)), None);
        assert_eq!(app.counters(1).requests_served, 1);
    }

    #[test]
    fn test_inverted_window_rejected() {
        let traffic = TrafficConfig {
            client_start_s: 2.0,
            ..TrafficConfig::default()
        };
        assert!(matches!(
            EchoApplication::new(&traffic, SimTime::from_millis(1000)),
            Err(ConfigurationError::ClientWindowInverted { .. })
        ));
    }
}
