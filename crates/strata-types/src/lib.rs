//! Shared types and identifiers for strata.
//!
//! This crate defines the value types used across the strata workspace:
//! the member identifier ([`NodeId`]), cluster members with their physical
//! location ([`Member`], [`NodeTopology`]), the hash functions a placement
//! can be computed with ([`HashFunction`]), and placement configuration
//! ([`PlacementConfig`], [`PlacementStrategy`]).

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash32;

// ---------------------------------------------------------------------------
// Member identity
// ---------------------------------------------------------------------------

/// Identifier for a cluster member.
///
/// Opaque to the placement engine: it is only compared, ordered and hashed,
/// never constructed by it. Ordering is bytewise and breaks every tie in
/// candidate ranking, so it must be the same on every node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// BLAKE3 of `data`, e.g. a member name from the cluster config.
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Stable 32-bit seed for this member's virtual nodes.
    ///
    /// The first four bytes of the identifier, little-endian. Unlike
    /// `std::hash::Hash` this never changes between processes or builds.
    pub fn member_hash(&self) -> i32 {
        i32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl From<[u8; 32]> for NodeId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// First eight bytes as hex; enough to tell members apart in routing tables.
impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

/// Per-member capacity weights. A weight of 0 excludes a member from ownership.
pub type CapacityFactors = BTreeMap<NodeId, f32>;

// ---------------------------------------------------------------------------
// Cluster types
// ---------------------------------------------------------------------------

/// Physical location of a member, used for failure-domain diversity.
///
/// Missing components compare equal to each other, so members that report
/// no site all share the same (anonymous) site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeTopology {
    /// Data center or region.
    pub site: Option<String>,
    /// Rack within the site.
    pub rack: Option<String>,
    /// Physical host within the rack.
    pub machine: Option<String>,
}

impl NodeTopology {
    /// Build a fully specified location.
    pub fn new(site: &str, rack: &str, machine: &str) -> Self {
        Self {
            site: Some(site.to_string()),
            rack: Some(rack.to_string()),
            machine: Some(machine.to_string()),
        }
    }

    pub fn is_same_site(&self, other: &NodeTopology) -> bool {
        self.site == other.site
    }

    pub fn is_same_rack(&self, other: &NodeTopology) -> bool {
        self.is_same_site(other) && self.rack == other.rack
    }

    pub fn is_same_machine(&self, other: &NodeTopology) -> bool {
        self.is_same_rack(other) && self.machine == other.machine
    }
}

/// A member of the cluster as seen by the placement engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    /// Unique identifier for this node.
    pub node_id: NodeId,
    /// Where the node lives. Only consulted by topology-aware placement.
    #[serde(default)]
    pub topology: NodeTopology,
}

impl Member {
    /// A member with no location information.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            topology: NodeTopology::default(),
        }
    }

    /// A member at the given location.
    pub fn with_topology(node_id: NodeId, topology: NodeTopology) -> Self {
        Self { node_id, topology }
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Hash function used to place virtual nodes and keys on the 31-bit circle.
///
/// Two placements are compatible only if they use the same variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    /// First four bytes of BLAKE3.
    #[default]
    Blake3,
    /// XXH32 with seed 0.
    XxHash32,
}

impl HashFunction {
    /// Hash a 32-bit integer.
    pub fn hash(&self, value: i32) -> i32 {
        self.hash_bytes(&value.to_le_bytes())
    }

    /// Hash an arbitrary key.
    pub fn hash_bytes(&self, data: &[u8]) -> i32 {
        match self {
            HashFunction::Blake3 => {
                let digest = blake3::hash(data);
                let bytes = digest.as_bytes();
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            HashFunction::XxHash32 => {
                let mut hasher = XxHash32::with_seed(0);
                hasher.write(data);
                hasher.finish() as u32 as i32
            }
        }
    }

    /// Hash `value` and clear the sign bit, giving a position in `[0, 2^31)`.
    pub fn normalized(&self, value: i32) -> u32 {
        (self.hash(value) & i32::MAX) as u32
    }

    /// Hash a key and clear the sign bit.
    pub fn normalized_bytes(&self, data: &[u8]) -> u32 {
        (self.hash_bytes(data) & i32::MAX) as u32
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How backup owners are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategy {
    /// Capacity-proportional budgets only.
    #[default]
    Balanced,
    /// Capacity budgets plus site/rack/machine diversity.
    TopologyAware,
    /// Every member owns every segment; only the primary is balanced.
    Replicated,
}

/// Parameters fixed for the lifetime of a partitioned cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Requested replication factor (primary + backups).
    pub num_owners: usize,
    /// Number of hash-space segments.
    pub num_segments: usize,
    /// Hash function for virtual nodes and keys.
    pub hash_function: HashFunction,
    /// Owner selection strategy.
    pub strategy: PlacementStrategy,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            num_owners: 2,
            num_segments: 256,
            hash_function: HashFunction::Blake3,
            strategy: PlacementStrategy::Balanced,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
