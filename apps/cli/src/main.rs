//! Admin CLI for the resource group manager (external interface 6.6):
//! `rgmctl start|stop|disable|relocate|migrate <group>`,
//! `rgmctl status [<group>] [--all] [--fast]`, `rgmctl reconfigure`.
//!
//! Wires its own in-process [`Engine`] against the in-memory test doubles
//! (`InMemoryLock`, `ScriptedAgent`, `InMemoryMembership`), loading rules
//! and resources from a local JSON file. A real cluster config store,
//! distributed lock, and agent transport are external collaborators this
//! workspace only defines as trait boundaries — see `DESIGN.md`.

mod config;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use rgm_core::{GroupName, NodeId};
use rgm_engine::{AdminOp, ClusterMember, Engine, InMemoryMembership, MembershipEvent};
use rgm_forest::Forest;
use rgm_state::{InMemoryLock, RgStateRecord, ScriptedAgent};

#[derive(Parser)]
#[command(name = "rgmctl", about = "Administer a resource group manager node", version)]
struct Cli {
    /// Path to a JSON file describing resource rules and resources.
    #[arg(long, global = true, default_value = "rgm.json")]
    config: PathBuf,

    /// This process's cluster node id.
    #[arg(long, global = true, default_value_t = 1)]
    node: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a group if it is not already running.
    Start {
        /// The resource group's name.
        group: String,
    },
    /// Stop a group.
    Stop {
        /// The resource group's name.
        group: String,
    },
    /// Stop a group and exclude it from automatic evaluation.
    Disable {
        /// The resource group's name.
        group: String,
    },
    /// Move a group to whichever node currently scores best.
    Relocate {
        /// The resource group's name.
        group: String,
    },
    /// Move a group to a specific node.
    Migrate {
        /// The resource group's name.
        group: String,
        /// The destination node id.
        target: u64,
    },
    /// Report a group's (or every group's) current `rg_state`.
    Status {
        /// A single group's name. Omit when using `--all`.
        group: Option<String>,
        /// Report every configured group instead of just `group`.
        #[arg(long)]
        all: bool,
        /// Read the last known record instead of forcing a live status walk.
        #[arg(long)]
        fast: bool,
    },
    /// Reload rules and resources from the configuration file.
    Reconfigure,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = rgm_log::LoggerBuilder::new().init();
    let cli = Cli::parse();

    let store = config::load(&cli.config)?;
    let forest = rgm_forest::new_handle(Forest::load(&store).await?);

    let self_node = NodeId::from(cli.node);
    let lock = Arc::new(InMemoryLock::new());
    state::load_into(&cli.config, &lock)?;
    state::seed_new_groups(&forest, &lock);
    let agent = Arc::new(ScriptedAgent::new());
    let membership = Arc::new(InMemoryMembership::new(vec![ClusterMember { node_id: self_node, is_live: true }]));
    let engine = Engine::new(forest, self_node, lock.clone(), agent, membership);

    let result = match cli.command {
        Command::Start { group } => run(&engine, group, AdminOp::Start).await,
        Command::Stop { group } => run(&engine, group, AdminOp::Stop).await,
        Command::Disable { group } => run(&engine, group, AdminOp::Disable).await,
        Command::Relocate { group } => run(&engine, group, AdminOp::Relocate).await,
        Command::Migrate { group, target } => run(&engine, group, AdminOp::Migrate { target: NodeId::from(target) }).await,
        Command::Status { group, all, fast } => status(&engine, group, all, fast).await,
        Command::Reconfigure => {
            engine.reconfigure(&store).await?;
            engine.evaluate(MembershipEvent::Timer).await?;
            println!("reconfigured");
            Ok(())
        }
    };

    state::save_from(&cli.config, &lock)?;
    result
}

async fn run(engine: &Engine, group: String, op: AdminOp) -> Result<()> {
    engine.run_op(GroupName::new(group.clone()), op).await?;
    println!("{group}: request processed");
    Ok(())
}

async fn status(engine: &Engine, group: Option<String>, all: bool, fast: bool) -> Result<()> {
    if !all && group.is_none() {
        bail!("specify a group name or pass --all");
    }

    let records = engine.status_all(fast).await?;
    let wanted = group.map(GroupName::new);
    for record in &records {
        if wanted.as_ref().is_none_or(|name| name == &record.name) {
            print_record(record);
        }
    }
    Ok(())
}

fn print_record(record: &RgStateRecord) {
    println!("{}: {} (owner={})", record.name, record.state, record.owner);
}
