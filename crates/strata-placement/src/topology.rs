//! Grouping of members by site, rack and machine.
//!
//! [`TopologyInfo`] is rebuilt for every assignment pass from the member
//! list. It answers two questions for topology-aware placement: whether a
//! candidate shares a failure domain with an already selected owner, and
//! how many segments each member should own once copies are spread across
//! as many failure domains as possible.

use std::collections::{BTreeMap, HashMap};

use strata_types::{Member, NodeId, NodeTopology};

use crate::capacity::CapacityModel;

/// Failure-domain granularity, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TopologyLevel {
    Site,
    Rack,
    Machine,
    /// Plain member identity.
    Node,
}

impl TopologyLevel {
    /// All levels from coarsest to finest.
    pub const ALL: [TopologyLevel; 4] = [
        TopologyLevel::Site,
        TopologyLevel::Rack,
        TopologyLevel::Machine,
        TopologyLevel::Node,
    ];
}

/// One node of the site → rack → machine → member tree.
#[derive(Debug, Clone)]
struct Group {
    capacity: f64,
    /// Number of loaded members below this group.
    leaves: usize,
    children: Vec<Group>,
    node: Option<NodeId>,
}

impl Group {
    fn leaf(node: NodeId, capacity: f64) -> Self {
        Self {
            capacity,
            leaves: 1,
            children: Vec::new(),
            node: Some(node),
        }
    }

    fn inner(mut children: Vec<Group>) -> Self {
        // Largest groups first so saturation ties resolve the same way every time.
        children.sort_by(|a, b| b.capacity.total_cmp(&a.capacity));
        Self {
            capacity: children.iter().map(|c| c.capacity).sum(),
            leaves: children.iter().map(|c| c.leaves).sum(),
            children,
            node: None,
        }
    }
}

type MachineMap = BTreeMap<Option<String>, Vec<Group>>;
type RackMap = BTreeMap<Option<String>, MachineMap>;
type SiteMap = BTreeMap<Option<String>, RackMap>;

/// Read-only view of where the loaded members live.
#[derive(Debug, Clone)]
pub struct TopologyInfo {
    locations: HashMap<NodeId, NodeTopology>,
    root: Group,
    num_sites: usize,
    num_racks: usize,
    num_machines: usize,
}

impl TopologyInfo {
    /// Group the members with positive capacity.
    pub fn new(members: &[Member], capacity: &CapacityModel) -> Self {
        let locations: HashMap<NodeId, NodeTopology> = members
            .iter()
            .map(|m| (m.node_id, m.topology.clone()))
            .collect();

        let mut sites = SiteMap::new();
        for node in capacity.loaded_members() {
            let topo = locations.get(&node).cloned().unwrap_or_default();
            sites
                .entry(topo.site)
                .or_default()
                .entry(topo.rack)
                .or_default()
                .entry(topo.machine)
                .or_default()
                .push(Group::leaf(node, capacity.factor(&node) as f64));
        }

        let num_sites = sites.len();
        let num_racks = sites.values().map(|racks| racks.len()).sum();
        let num_machines = sites
            .values()
            .flat_map(|racks| racks.values())
            .map(|machines| machines.len())
            .sum();

        let root = Group::inner(
            sites
                .into_values()
                .map(|racks| {
                    Group::inner(
                        racks
                            .into_values()
                            .map(|machines| {
                                Group::inner(machines.into_values().map(Group::inner).collect())
                            })
                            .collect(),
                    )
                })
                .collect(),
        );

        Self {
            locations,
            root,
            num_sites,
            num_racks,
            num_machines,
        }
    }

    pub fn num_sites(&self) -> usize {
        self.num_sites
    }

    pub fn num_racks(&self) -> usize {
        self.num_racks
    }

    pub fn num_machines(&self) -> usize {
        self.num_machines
    }

    /// Location of `node`; members without one share the default location.
    pub fn location(&self, node: &NodeId) -> Option<&NodeTopology> {
        self.locations.get(node)
    }

    /// Whether `candidate` shares the failure domain at `level` with any of `owners`.
    pub fn location_conflict(
        &self,
        candidate: &NodeId,
        owners: &[NodeId],
        level: TopologyLevel,
    ) -> bool {
        let unknown = NodeTopology::default();
        let here = self.location(candidate).unwrap_or(&unknown);
        owners.iter().any(|owner| {
            let there = self.location(owner).unwrap_or(&unknown);
            match level {
                TopologyLevel::Site => here.is_same_site(there),
                TopologyLevel::Rack => here.is_same_rack(there),
                TopologyLevel::Machine => here.is_same_machine(there),
                TopologyLevel::Node => owner == candidate,
            }
        })
    }

    /// Expected owned segments per loaded member for `num_copies` copies of each segment.
    ///
    /// Copies are split top-down. A group that can hold at least one copy of
    /// every segment in each of its children first gives each child one full
    /// set; the remainder is shared by capacity, with no child receiving more
    /// copies per segment than diversity (or its member count) allows.
    pub fn expected_segments(&self, num_segments: usize, num_copies: usize) -> HashMap<NodeId, f64> {
        let mut out = HashMap::new();
        let num_segments = num_segments as f64;
        distribute(
            &self.root,
            num_copies as f64 * num_segments,
            num_copies.min(self.root.leaves),
            num_segments,
            &mut out,
        );
        out
    }
}

fn distribute(
    group: &Group,
    copies: f64,
    per_segment_limit: usize,
    num_segments: f64,
    out: &mut HashMap<NodeId, f64>,
) {
    if let Some(node) = group.node {
        out.insert(node, copies);
        return;
    }
    let n = group.children.len();
    if n == 0 {
        return;
    }

    let (base, child_limit) = if copies + 1e-9 >= n as f64 * num_segments && per_segment_limit >= n {
        (num_segments, per_segment_limit - (n - 1))
    } else {
        (0.0, 1)
    };

    let capacities: Vec<f64> = group.children.iter().map(|c| c.capacity).collect();
    let caps: Vec<f64> = group
        .children
        .iter()
        .map(|c| num_segments * child_limit.min(c.leaves) as f64 - base)
        .collect();
    let extra = water_fill(&capacities, &caps, (copies - base * n as f64).max(0.0));

    for (child, extra) in group.children.iter().zip(extra) {
        distribute(
            child,
            base + extra,
            child_limit.min(child.leaves),
            num_segments,
            out,
        );
    }
}

/// Split `total` proportionally to `capacities`, never exceeding `caps`.
///
/// The most oversubscribed group is saturated first and the rest is
/// re-split among the others, one group at a time.
pub(crate) fn water_fill(capacities: &[f64], caps: &[f64], total: f64) -> Vec<f64> {
    let n = capacities.len();
    let mut alloc = vec![0.0; n];
    let mut active: Vec<bool> = capacities.iter().map(|&c| c > 0.0).collect();
    let mut remaining = total;

    loop {
        let remaining_capacity: f64 = (0..n).filter(|&i| active[i]).map(|i| capacities[i]).sum();
        if remaining_capacity <= 0.0 || remaining <= 0.0 {
            break;
        }

        let mut worst: Option<(usize, f64)> = None;
        for i in (0..n).filter(|&i| active[i]) {
            let share = capacities[i] / remaining_capacity * remaining;
            if share > caps[i] {
                let ratio = if caps[i] > 0.0 { share / caps[i] } else { f64::INFINITY };
                if worst.is_none_or(|(_, r)| ratio > r) {
                    worst = Some((i, ratio));
                }
            }
        }

        match worst {
            Some((i, _)) => {
                let cap = caps[i].max(0.0);
                alloc[i] = cap;
                remaining -= cap;
                active[i] = false;
            }
            None => {
                for i in (0..n).filter(|&i| active[i]) {
                    alloc[i] = capacities[i] / remaining_capacity * remaining;
                }
                break;
            }
        }
    }
    alloc
}
