//! Static node placement, channel split and address registry.
//!
//! Built once from [`TopologyConfig`] and never mutated afterwards. The
//! assignment rules are exposed as pure functions so that they can be checked
//! without building a topology.

use std::net::Ipv4Addr;

use hashbrown::HashMap;
use log::debug;

use crate::mesh_config::{AccessPolicy, CrossChannelPolicy, GridConfig, TopologyConfig};
use crate::mesh_error::ConfigurationError;
use crate::mesh_interface::{AccessCategory, ChannelId, NodeId};

/// Channel for node `index` under contiguous group partitioning:
/// node i goes to channel ⌊i / (N/K)⌋.
pub fn channel_of_index(index: NodeId, num_nodes: usize, num_channels: usize) -> ChannelId {
    let group = num_nodes / num_channels;
    index / group
}

/// Access category for node `index`
pub fn access_category_of(index: NodeId, policy: AccessPolicy) -> AccessCategory {
    match policy {
        AccessPolicy::RoundRobin => AccessCategory::ALL[index % AccessCategory::ALL.len()],
        AccessPolicy::Fixed(category) => category,
    }
}

/// Row-first grid position for node `index`
pub fn grid_position(index: NodeId, grid: &GridConfig) -> (f64, f64) {
    let column = index % grid.width;
    let row = index / grid.width;
    (
        grid.min_x + grid.delta_x * column as f64,
        grid.min_y + grid.delta_y * row as f64,
    )
}

/// Number of leading one bits, or None if the mask is not contiguous
fn prefix_len(mask: Ipv4Addr) -> Option<u32> {
    let bits = u32::from(mask);
    let ones = bits.leading_ones();
    if ones < 32 && bits << ones != 0 {
        return None;
    }
    Some(ones)
}

/// Hand out `count` host addresses from `base/mask`, starting at base + 1
pub fn allocate_addresses(
    base: Ipv4Addr,
    mask: Ipv4Addr,
    count: usize,
) -> Result<Vec<Ipv4Addr>, ConfigurationError> {
    let prefix = prefix_len(mask).ok_or(ConfigurationError::InvalidMask { mask })?;
    let network = u32::from(base);
    if network & !u32::from(mask) != 0 {
        return Err(ConfigurationError::BaseNotNetwork { base, mask });
    }

    // network and broadcast addresses are not assignable
    let capacity = (1u64 << (32 - prefix)).saturating_sub(2);
    if count as u64 > capacity {
        return Err(ConfigurationError::AddressBlockExhausted {
            base,
            mask,
            capacity,
            requested: count,
        });
    }

    Ok((0..count)
        .map(|i| Ipv4Addr::from(network + 1 + i as u32))
        .collect())
}

/// A placed, addressed node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub position: (f64, f64),
    pub channel_id: ChannelId,
    pub address: Ipv4Addr,
    pub access_category: AccessCategory,
}

/// The immutable node registry
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
    channels: Vec<Vec<NodeId>>,
    by_address: HashMap<Ipv4Addr, NodeId>,
    cross_channel: CrossChannelPolicy,
    max_range_m: Option<f64>,
}

impl Topology {
    pub fn build(config: &TopologyConfig) -> Result<Self, ConfigurationError> {
        if config.num_nodes == 0 {
            return Err(ConfigurationError::NoNodes);
        }
        if config.num_channels == 0 {
            return Err(ConfigurationError::NoChannels);
        }
        if config.num_nodes % config.num_channels != 0 {
            return Err(ConfigurationError::UnevenChannelSplit {
                nodes: config.num_nodes,
                channels: config.num_channels,
            });
        }
        if config.grid.width == 0 {
            return Err(ConfigurationError::ZeroGridWidth);
        }

        let addresses = allocate_addresses(config.address_base, config.address_mask, config.num_nodes)?;

        let mut nodes = Vec::with_capacity(config.num_nodes);
        let mut channels = vec![Vec::new(); config.num_channels];
        let mut by_address = HashMap::with_capacity(config.num_nodes);

        for (id, address) in addresses.into_iter().enumerate() {
            let channel_id = channel_of_index(id, config.num_nodes, config.num_channels);
            channels[channel_id].push(id);
            by_address.insert(address, id);
            nodes.push(Node {
                id,
                position: grid_position(id, &config.grid),
                channel_id,
                address,
                access_category: access_category_of(id, config.access_policy),
            });
        }

        debug!(
            "topology: {} nodes on {} channels ({} per channel), addresses {}..{}",
            nodes.len(),
            channels.len(),
            config.num_nodes / config.num_channels,
            nodes[0].address,
            nodes[nodes.len() - 1].address
        );

        Ok(Self {
            nodes,
            channels,
            by_address,
            cross_channel: config.cross_channel,
            max_range_m: config.max_range_m,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn channel_of(&self, id: NodeId) -> Option<ChannelId> {
        self.node(id).map(|n| n.channel_id)
    }

    pub fn address_of(&self, id: NodeId) -> Option<Ipv4Addr> {
        self.node(id).map(|n| n.address)
    }

    pub fn access_category_of(&self, id: NodeId) -> Option<AccessCategory> {
        self.node(id).map(|n| n.access_category)
    }

    /// Traffic partner: the next node in index order, wrapping around
    pub fn neighbor_for(&self, id: NodeId) -> NodeId {
        (id + 1) % self.nodes.len()
    }

    /// Nodes sharing `channel`, in index order
    pub fn members(&self, channel: ChannelId) -> &[NodeId] {
        self.channels.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_by_address(&self, address: Ipv4Addr) -> Option<NodeId> {
        self.by_address.get(&address).copied()
    }

    /// Euclidean distance in meters; zero for unknown ids
    pub fn distance(&self, a: NodeId, b: NodeId) -> f64 {
        match (self.node(a), self.node(b)) {
            (Some(a), Some(b)) => {
                let dx = a.position.0 - b.position.0;
                let dy = a.position.1 - b.position.1;
                (dx * dx + dy * dy).sqrt()
            }
            _ => 0.0,
        }
    }

    /// Whether a frame sent by `src` can be received by `dst` at all
    pub fn can_reach(&self, src: NodeId, dst: NodeId) -> bool {
        let (Some(s), Some(d)) = (self.node(src), self.node(dst)) else {
            return false;
        };
        if s.channel_id != d.channel_id && self.cross_channel == CrossChannelPolicy::Unreachable {
            return false;
        }
        match self.max_range_m {
            Some(range) => self.distance(src, dst) <= range,
            None => true,
        }
    }
}
