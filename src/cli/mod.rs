//! CLI module for flowdeploy
//!
//! Provides subcommands:
//! - `flowdeploy serve` - Run the scheduler and its HTTP surface
//! - `flowdeploy deploy` / `stop` / `test` - Manage service instances
//! - `flowdeploy get` - List instances, flows, capacity or services
//! - `flowdeploy validate` - Check a service catalog file
//! - `flowdeploy topology` - Print a built-in topology

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::topology::TopologyKind;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

/// Default server URL for client subcommands
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8282";

#[derive(Parser, Debug)]
#[command(name = "flowdeploy")]
#[command(about = "Place multi-component services on a virtual network and keep its flows in step")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Scheduler URL used by client subcommands
    #[arg(long, global = true, env = "FLOWDEPLOY_SERVER", default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler
    Serve(ServeArgs),

    /// Deploy one instance of a service
    Deploy {
        /// Service name from the catalog
        service: String,
    },

    /// Stop a service instance
    Stop {
        /// Service key (e.g. random-1)
        key: String,
    },

    /// Wait for an instance's reporter output
    Test {
        /// Service key (e.g. datetime-2)
        key: String,
    },

    /// Get/list resources
    Get(GetArgs),

    /// Validate a service catalog file
    Validate(ValidateArgs),

    /// Show the hosts, switches and links of a topology
    Topology(TopologyArgs),
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Path to settings file (default: ~/.flowdeploy/config.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address for the server
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Topology to run against (overrides the settings file)
    #[arg(long, value_enum)]
    pub topology: Option<TopologyKind>,

    /// Simulate processes and flow pushes instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Seed for host selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to a .env file
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Resource type to list
    #[command(subcommand)]
    pub resource: GetResource,
}

#[derive(Subcommand, Debug)]
pub enum GetResource {
    /// List running components of every instance
    #[command(name = "instances", visible_alias = "instance", visible_alias = "i")]
    Instances,

    /// List installed forwarding rules
    #[command(name = "flows", visible_alias = "flow", visible_alias = "f")]
    Flows,

    /// Show per-host capacity
    #[command(name = "status", visible_alias = "capacity")]
    Status,

    /// List deployable services
    #[command(name = "services", visible_alias = "service", visible_alias = "svc")]
    Services,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the catalog file (JSON or JSONC)
    pub file: PathBuf,
}

/// Arguments for the topology command
#[derive(Parser, Debug)]
pub struct TopologyArgs {
    /// Built-in topology shape
    #[arg(long, value_enum, default_value = "simple")]
    pub kind: TopologyKind,

    /// JSON topology file (overrides --kind)
    #[arg(long)]
    pub file: Option<PathBuf>,
}
