use std::fmt;
use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::mesh_error::ConfigurationError;

// all node/channel indices are small dense integers
pub type NodeId = usize;
pub type ChannelId = usize;
pub type FlowId = u32;
pub type SequenceNumber = u64;

/// IANA protocol number carried in the flow 5-tuple
pub const PROTOCOL_UDP: u8 = 17;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

// ============================================================================
// Simulation time
// ============================================================================

/// Point in simulated time, in nanoseconds since the start of the run.
///
/// Only the scheduler advances the clock. Everything else reads it or builds
/// offsets from it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros * 1_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis * 1_000_000)
    }

    /// Convert seconds to simulated time.
    ///
    /// Negative, NaN and infinite values are rejected rather than clamped.
    pub fn from_secs_f64(secs: f64) -> Result<Self, ConfigurationError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigurationError::InvalidTime { value: secs });
        }
        let nanos = (secs * NANOS_PER_SEC as f64).round();
        if nanos >= u64::MAX as f64 {
            return Err(ConfigurationError::InvalidTime { value: secs });
        }
        Ok(SimTime(nanos as u64))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub fn checked_add(self, other: SimTime) -> Option<SimTime> {
        self.0.checked_add(other.0).map(SimTime)
    }

    pub fn saturating_add(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(other.0))
    }

    /// Time elapsed since `earlier`, or zero when `earlier` is in the future
    pub fn saturating_sub(self, earlier: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(earlier.0))
    }

    pub fn times(self, factor: u64) -> SimTime {
        SimTime(self.0.saturating_mul(factor))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.as_secs_f64())
    }
}

// ============================================================================
// QoS access categories
// ============================================================================

/// EDCA access category, declared from highest to lowest priority so that the
/// derived `Ord` ranks `Voice` first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessCategory {
    Voice,
    Video,
    BestEffort,
    Background,
}

impl AccessCategory {
    /// Round-robin order used when assigning categories to nodes
    pub const ALL: [AccessCategory; 4] = [
        AccessCategory::Voice,
        AccessCategory::Video,
        AccessCategory::BestEffort,
        AccessCategory::Background,
    ];

    /// 0 is the highest priority
    pub fn priority_rank(self) -> u8 {
        self as u8
    }

    /// True if `self` wins channel access over `other` on an exact tie
    pub fn outranks(self, other: AccessCategory) -> bool {
        self.priority_rank() < other.priority_rank()
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessCategory::Voice => "voice",
            AccessCategory::Video => "video",
            AccessCategory::BestEffort => "best-effort",
            AccessCategory::Background => "background",
        }
    }
}

impl fmt::Display for AccessCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Flows and packets
// ============================================================================

/// 5-tuple flow classifier.
///
/// Field order defines the report order: source address first, then
/// destination, ports and protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowKey {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl FlowKey {
    pub fn udp(src_addr: Ipv4Addr, src_port: u16, dst_addr: Ipv4Addr, dst_port: u16) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            protocol: PROTOCOL_UDP,
        }
    }

    /// Key of the flow travelling the opposite way
    pub fn reversed(&self) -> Self {
        Self {
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.src_addr, self.src_port, self.dst_addr, self.dst_port, self.protocol
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketKind {
    EchoRequest,
    EchoReply,
}

/// A single datagram in flight through the simulated mesh
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub flow_key: FlowKey,
    pub access_category: AccessCategory,
    pub size_bytes: u32,
    pub send_time: SimTime,
    pub sequence_number: SequenceNumber,
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: PacketKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_from_secs() {
        let t = SimTime::from_secs_f64(0.005).unwrap();
        assert_eq!(t.as_nanos(), 5_000_000);
        assert_eq!(SimTime::from_secs_f64(10.0).unwrap(), SimTime::from_millis(10_000));
        assert!((t.as_secs_f64() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_sim_time_rejects_negative_and_nan() {
        assert!(SimTime::from_secs_f64(-0.1).is_err());
        assert!(SimTime::from_secs_f64(f64::NAN).is_err());
        assert!(SimTime::from_secs_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_sim_time_arithmetic() {
        let a = SimTime::from_micros(10);
        let b = SimTime::from_micros(4);
        assert_eq!(a.saturating_sub(b), SimTime::from_micros(6));
        assert_eq!(b.saturating_sub(a), SimTime::ZERO);
        assert_eq!(b.times(3), SimTime::from_micros(12));
        assert_eq!(SimTime::from_nanos(u64::MAX).checked_add(a), None);
    }

    #[test]
    fn test_access_category_priority() {
        assert!(AccessCategory::Voice.outranks(AccessCategory::Video));
        assert!(AccessCategory::Video.outranks(AccessCategory::BestEffort));
        assert!(AccessCategory::BestEffort.outranks(AccessCategory::Background));
        assert!(!AccessCategory::BestEffort.outranks(AccessCategory::BestEffort));
        assert_eq!(AccessCategory::BestEffort.to_string(), "best-effort");
    }

    #[test]
    fn test_flow_key_order_and_reverse() {
        let a = FlowKey::udp(Ipv4Addr::new(10, 1, 0, 1), 49153, Ipv4Addr::new(10, 1, 0, 2), 9);
        let b = FlowKey::udp(Ipv4Addr::new(10, 1, 0, 2), 9, Ipv4Addr::new(10, 1, 0, 1), 49153);
        assert!(a < b);
        assert_eq!(a.reversed(), b);
        assert_eq!(b.reversed(), a);
    }
}
