//! TOML cluster description for `stratactl`.
//!
//! A config file names the cluster members, their capacity and location,
//! and the placement parameters. Every section is optional.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;
use strata_types::{CapacityFactors, Member, NodeId, NodeTopology, PlacementConfig};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Placement parameters.
    pub placement: PlacementConfig,
    /// Cluster members, in join order.
    pub members: Vec<MemberSection>,
    /// Logging configuration.
    pub log: LogSection,
}

/// One `[[members]]` entry.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct MemberSection {
    /// Human-readable name; the node ID is derived from it.
    pub name: String,
    /// Capacity factor. Defaults to 1.0 when any member sets one.
    pub capacity: Option<f32>,
    pub site: Option<String>,
    pub rack: Option<String>,
    pub machine: Option<String>,
}

impl MemberSection {
    /// Node ID for this member: BLAKE3 of its name.
    pub fn node_id(&self) -> NodeId {
        NodeId::from_data(self.name.as_bytes())
    }

    fn topology(&self) -> NodeTopology {
        NodeTopology {
            site: self.site.clone(),
            rack: self.rack.clone(),
            machine: self.machine.clone(),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("invalid config in {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Members as the placement engine sees them.
    ///
    /// Fails on an empty list, an unnamed member or a repeated name.
    pub fn member_list(&self) -> anyhow::Result<Vec<Member>> {
        if self.members.is_empty() {
            bail!("no members configured; add [[members]] entries to the config file");
        }
        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(self.members.len());
        for section in &self.members {
            if section.name.is_empty() {
                bail!("every member needs a name");
            }
            if !seen.insert(section.name.as_str()) {
                bail!("member {:?} is listed twice", section.name);
            }
            members.push(Member::with_topology(section.node_id(), section.topology()));
        }
        Ok(members)
    }

    /// Explicit capacity factors, if any member sets one.
    pub fn capacity_factors(&self) -> Option<CapacityFactors> {
        if self.members.iter().all(|m| m.capacity.is_none()) {
            return None;
        }
        Some(
            self.members
                .iter()
                .map(|m| (m.node_id(), m.capacity.unwrap_or(1.0)))
                .collect(),
        )
    }

    /// Display name for every configured member.
    pub fn names(&self) -> BTreeMap<NodeId, String> {
        self.members
            .iter()
            .map(|m| (m.node_id(), m.name.clone()))
            .collect()
    }
}
