// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and the run and plan subcommands for netsched

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::ExecutionStrategy;

#[derive(Parser)]
#[command(name = "netsched")]
#[command(about = "Dependency-aware concurrent scheduler for dataflow module networks")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

/// Network description shared by every subcommand.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct NetworkArgs {
    #[arg(short, long = "module", help = "Add a module to the network (repeatable)")]
    pub modules: Vec<String>,

    #[arg(
        short,
        long = "edge",
        help = "Add a dependency FROM:TO; TO runs after FROM (repeatable)"
    )]
    pub edges: Vec<String>,

    #[arg(long = "fail", help = "Make a module report an error when executed")]
    pub fail: Vec<String>,

    #[arg(long, default_value_t = 0, help = "Simulated work per module in milliseconds")]
    pub work_ms: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a network
    Run {
        #[command(flatten)]
        network: NetworkArgs,

        #[arg(long, help = "Execution strategy: serial, parallel or dynamic")]
        strategy: Option<ExecutionStrategy>,

        #[arg(long, help = "Maximum number of concurrently executing modules")]
        max_concurrent: Option<usize>,

        #[arg(long, help = "Fail the run if it takes longer than this many seconds")]
        timeout_secs: Option<u64>,

        #[arg(long, help = "Only run this module and everything downstream of it")]
        from: Option<String>,

        #[arg(long, help = "Print the run report as JSON")]
        json: bool,
    },

    /// Show the dependency groups of a network without executing it
    Plan {
        #[command(flatten)]
        network: NetworkArgs,

        #[arg(long, help = "Print the groups as JSON")]
        json: bool,
    },
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse a dependency edge from FROM:TO format
    pub fn parse_edge(edge: &str) -> anyhow::Result<(String, String)> {
        match edge.split_once(':') {
            Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
                Ok((from.trim().to_string(), to.trim().to_string()))
            }
            _ => Err(anyhow::anyhow!(
                "Invalid edge format '{}'. Expected 'FROM:TO'",
                edge
            )),
        }
    }
}
