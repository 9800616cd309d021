//! `stratactl`: inspect strata segment placements.
//!
//! Reads a TOML cluster description, computes the segment ownership the
//! cluster would converge on, and simulates members leaving.
//!
//! # Usage
//!
//! ```text
//! stratactl plan -c cluster.toml                  # routing table
//! stratactl stats -c cluster.toml                 # per-member counts and budgets
//! stratactl leave -c cluster.toml node-3          # segments that move when node-3 leaves
//! stratactl leave -c cluster.toml node-3 --rebalance
//! stratactl stats -c cluster.toml --segments 1024 --owners 3 --strategy topology-aware
//! ```

mod config;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use strata_placement::{
    CapacityModel, ConsistentHash, ConsistentHashFactory, OwnershipStatistics,
    ReplicatedConsistentHash, ReplicatedConsistentHashFactory, SyncConsistentHashFactory,
    TopologyInfo,
};
use strata_types::{CapacityFactors, Member, NodeId, PlacementConfig, PlacementStrategy};
use tracing::{debug, info};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "stratactl",
    version,
    about = "Inspect and simulate strata segment placements"
)]
struct Cli {
    /// Path to TOML cluster description.
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Override the number of segments.
    #[arg(long, global = true)]
    segments: Option<usize>,

    /// Override the requested number of owners per segment.
    #[arg(long, global = true)]
    owners: Option<usize>,

    /// Override the placement strategy.
    #[arg(long, global = true, value_parser = parse_strategy)]
    strategy: Option<PlacementStrategy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the owners of every segment, primary first.
    Plan,

    /// Show owned and primary-owned segments per member next to their budgets.
    Stats,

    /// Remove members and show which segments move.
    Leave {
        /// Names of the members that leave.
        #[arg(required = true)]
        names: Vec<String>,

        /// Also recompute ownership from scratch and report the extra movement.
        #[arg(long)]
        rebalance: bool,
    },
}

fn parse_strategy(s: &str) -> Result<PlacementStrategy, String> {
    match s {
        "balanced" => Ok(PlacementStrategy::Balanced),
        "topology-aware" => Ok(PlacementStrategy::TopologyAware),
        "replicated" => Ok(PlacementStrategy::Replicated),
        other => Err(format!(
            "unknown strategy {other:?} (expected balanced, topology-aware or replicated)"
        )),
    }
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    let mut placement = config.placement;
    if let Some(segments) = cli.segments {
        placement.num_segments = segments;
    }
    if let Some(owners) = cli.owners {
        placement.num_owners = owners;
    }
    if let Some(strategy) = cli.strategy {
        placement.strategy = strategy;
    }
    debug!(
        num_owners = placement.num_owners,
        num_segments = placement.num_segments,
        strategy = ?placement.strategy,
        "placement parameters"
    );

    let cluster = Cluster::from_config(&config, placement)?;
    match cli.command {
        Commands::Plan => cmd_plan(&cluster),
        Commands::Stats => cmd_stats(&cluster),
        Commands::Leave { names, rebalance } => cmd_leave(&cluster, &names, rebalance),
    }
}

fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// -----------------------------------------------------------------------
// Cluster model
// -----------------------------------------------------------------------

/// A placement computed by whichever factory the strategy selects.
enum Placement {
    Distributed(Arc<ConsistentHash>),
    Replicated(Arc<ReplicatedConsistentHash>),
}

impl Placement {
    fn num_segments(&self) -> usize {
        match self {
            Placement::Distributed(ch) => ch.num_segments(),
            Placement::Replicated(ch) => ch.num_segments(),
        }
    }

    fn owners(&self, segment: usize) -> Vec<NodeId> {
        match self {
            Placement::Distributed(ch) => ch.locate_owners(segment).to_vec(),
            Placement::Replicated(ch) => ch.locate_owners(segment),
        }
    }

    /// `(owned, primary_owned)` per member.
    fn counts(&self, members: &[Member]) -> BTreeMap<NodeId, (usize, usize)> {
        match self {
            Placement::Distributed(ch) => {
                let stats = OwnershipStatistics::from_hash(ch, members.iter().map(|m| m.node_id));
                members
                    .iter()
                    .map(|m| {
                        let id = m.node_id;
                        (id, (stats.owned(&id), stats.primary_owned(&id)))
                    })
                    .collect()
            }
            Placement::Replicated(ch) => members
                .iter()
                .map(|m| {
                    let id = m.node_id;
                    (
                        id,
                        (
                            ch.num_segments(),
                            ch.primary_segments_for_owner(&id).len(),
                        ),
                    )
                })
                .collect(),
        }
    }
}

/// Configured members plus the parameters to place them with.
struct Cluster {
    placement: PlacementConfig,
    members: Vec<Member>,
    capacity_factors: Option<CapacityFactors>,
    names: BTreeMap<NodeId, String>,
}

impl Cluster {
    fn from_config(config: &CliConfig, placement: PlacementConfig) -> Result<Self> {
        Ok(Self {
            placement,
            members: config.member_list()?,
            capacity_factors: config.capacity_factors(),
            names: config.names(),
        })
    }

    fn name(&self, node: &NodeId) -> String {
        self.names
            .get(node)
            .cloned()
            .unwrap_or_else(|| node.to_string())
    }

    fn sync_factory(&self) -> SyncConsistentHashFactory {
        match self.placement.strategy {
            PlacementStrategy::TopologyAware => SyncConsistentHashFactory::topology_aware(),
            _ => SyncConsistentHashFactory::balanced(),
        }
    }

    fn create(&self) -> Result<Placement> {
        let p = &self.placement;
        let placement = match p.strategy {
            PlacementStrategy::Replicated => Placement::Replicated(
                ReplicatedConsistentHashFactory::new().create(
                    p.hash_function,
                    p.num_owners,
                    p.num_segments,
                    &self.members,
                    self.capacity_factors.as_ref(),
                )?,
            ),
            _ => Placement::Distributed(self.sync_factory().create(
                p.hash_function,
                p.num_owners,
                p.num_segments,
                &self.members,
                self.capacity_factors.as_ref(),
            )?),
        };
        Ok(placement)
    }

    /// Expected `(owned, primary_owned)` segments per loaded member.
    fn expected(&self) -> Result<BTreeMap<NodeId, (f64, f64)>> {
        let p = &self.placement;
        let model = CapacityModel::new(
            &self.members,
            self.capacity_factors.as_ref(),
            p.num_segments,
        )?;
        let copies = model.actual_num_owners(p.num_owners);
        let expected = match p.strategy {
            PlacementStrategy::TopologyAware => {
                let topology = TopologyInfo::new(&self.members, &model);
                let owned = topology.expected_segments(p.num_segments, copies);
                let primary = topology.expected_segments(p.num_segments, 1);
                owned
                    .into_iter()
                    .map(|(id, o)| (id, (o, primary.get(&id).copied().unwrap_or(0.0))))
                    .collect()
            }
            PlacementStrategy::Replicated => {
                // Primaries come from an unweighted single-owner placement.
                let share = p.num_segments as f64 / self.members.len() as f64;
                self.members
                    .iter()
                    .map(|m| (m.node_id, (p.num_segments as f64, share)))
                    .collect()
            }
            PlacementStrategy::Balanced => model
                .loaded_members()
                .map(|id| {
                    (
                        id,
                        (
                            model.expected_segments(&id, copies),
                            model.expected_segments(&id, 1),
                        ),
                    )
                })
                .collect(),
        };
        Ok(expected)
    }

    /// Members and capacity factors after `leavers` are gone.
    fn without(&self, leavers: &[String]) -> Result<(Vec<Member>, Option<CapacityFactors>)> {
        let mut gone = Vec::with_capacity(leavers.len());
        for name in leavers {
            let Some((id, _)) = self.names.iter().find(|(_, n)| *n == name) else {
                bail!("unknown member {name:?}");
            };
            gone.push(*id);
        }
        let remaining: Vec<Member> = self
            .members
            .iter()
            .filter(|m| !gone.contains(&m.node_id))
            .cloned()
            .collect();
        if remaining.is_empty() {
            bail!("cannot remove every member");
        }
        let factors: Option<CapacityFactors> = self.capacity_factors.as_ref().map(|f| {
            f.iter()
                .filter(|(id, _)| !gone.contains(*id))
                .map(|(id, v)| (*id, *v))
                .collect()
        });
        Ok((remaining, factors))
    }
}

// -----------------------------------------------------------------------
// stratactl plan
// -----------------------------------------------------------------------

fn cmd_plan(cluster: &Cluster) -> Result<()> {
    let placement = cluster.create()?;
    println!(
        "{} segments, {} members, strategy {:?}",
        placement.num_segments(),
        cluster.members.len(),
        cluster.placement.strategy
    );
    for segment in 0..placement.num_segments() {
        let owners: Vec<String> = placement
            .owners(segment)
            .iter()
            .map(|id| cluster.name(id))
            .collect();
        println!("{segment:>6}  {}", owners.join(" "));
    }
    Ok(())
}

// -----------------------------------------------------------------------
// stratactl stats
// -----------------------------------------------------------------------

fn cmd_stats(cluster: &Cluster) -> Result<()> {
    let placement = cluster.create()?;
    let expected = cluster.expected()?;
    print_counts(cluster, &cluster.members, &placement, Some(&expected));
    Ok(())
}

fn print_counts(
    cluster: &Cluster,
    members: &[Member],
    placement: &Placement,
    expected: Option<&BTreeMap<NodeId, (f64, f64)>>,
) {
    let width = members
        .iter()
        .map(|m| cluster.name(&m.node_id).len())
        .max()
        .unwrap_or(0)
        .max(6);
    match expected {
        Some(_) => println!(
            "{:<width$}  {:>7}  {:>7}  {:>9}  {:>9}",
            "member", "owned", "primary", "exp-owned", "exp-prim"
        ),
        None => println!("{:<width$}  {:>7}  {:>7}", "member", "owned", "primary"),
    }

    let counts = placement.counts(members);
    for member in members {
        let id = member.node_id;
        let (owned, primary) = counts.get(&id).copied().unwrap_or((0, 0));
        let name = cluster.name(&id);
        match expected {
            Some(expected) => {
                let (exp_owned, exp_primary) = expected.get(&id).copied().unwrap_or((0.0, 0.0));
                println!(
                    "{name:<width$}  {owned:>7}  {primary:>7}  {exp_owned:>9.1}  {exp_primary:>9.1}"
                );
            }
            None => println!("{name:<width$}  {owned:>7}  {primary:>7}"),
        }
    }
}

// -----------------------------------------------------------------------
// stratactl leave
// -----------------------------------------------------------------------

fn cmd_leave(cluster: &Cluster, leavers: &[String], rebalance: bool) -> Result<()> {
    let (remaining, factors) = cluster.without(leavers)?;
    let base = cluster.create()?;
    info!(leaving = leavers.len(), remaining = remaining.len(), "simulating leave");

    match base {
        Placement::Distributed(base) => {
            let factory = cluster.sync_factory();
            let updated = factory.update_members(&base, &remaining, factors.as_ref())?;
            let migrations = ConsistentHash::diff(&base, &updated)?;

            print_counts(
                cluster,
                &remaining,
                &Placement::Distributed(Arc::clone(&updated)),
                None,
            );
            println!();
            println!("{} segment copies move:", migrations.len());
            for m in &migrations {
                let from = m
                    .from
                    .map(|id| cluster.name(&id))
                    .unwrap_or_else(|| "-".to_string());
                println!("{:>6}  {} -> {}", m.segment, from, cluster.name(&m.to));
            }

            if rebalance {
                let rebalanced = factory.rebalance(&updated)?;
                let extra = ConsistentHash::diff(&updated, &rebalanced)?;
                println!();
                println!("rebalance moves {} more segment copies", extra.len());
            }
        }
        Placement::Replicated(base) => {
            let factory = ReplicatedConsistentHashFactory::new();
            let updated = factory.update_members(&base, &remaining, factors.as_ref())?;
            print_counts(
                cluster,
                &remaining,
                &Placement::Replicated(Arc::clone(&updated)),
                None,
            );
            let moved = primaries_moved(&base, &updated);
            println!();
            println!("{moved} primaries move");

            if rebalance {
                let rebalanced = factory.rebalance(&updated)?;
                println!(
                    "rebalance moves {} more primaries",
                    primaries_moved(&updated, &rebalanced)
                );
            }
        }
    }
    Ok(())
}

fn primaries_moved(old: &ReplicatedConsistentHash, new: &ReplicatedConsistentHash) -> usize {
    (0..old.num_segments())
        .filter(|&s| old.locate_primary(s) != new.locate_primary(s))
        .count()
}
