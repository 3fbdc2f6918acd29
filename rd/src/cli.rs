//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rendezvous - serialized access to a single resource holder
#[derive(Parser, Debug)]
#[command(
    name = "rd",
    about = "Serialized rendezvous coordinator for a single resource holder",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator
    Serve {
        /// Address to bind (overrides config)
        address: Option<String>,

        /// Port for requesters
        requester_port: Option<u16>,

        /// Port for the resource holder
        holder_port: Option<u16>,

        /// Port for observers (omit to disable the live feed)
        observer_port: Option<u16>,
    },

    /// Print the live event feed
    Observe {
        /// Server address
        address: String,

        /// Observer port
        port: u16,
    },

    /// Request one exclusive turn with the resource holder
    Request {
        /// Server address
        address: String,

        /// Requester port
        port: u16,

        /// Correlation token (defaults to this process id)
        #[arg(short, long, allow_negative_numbers = true)]
        token: Option<i32>,
    },

    /// Act as the resource holder, echoing every token
    Hold {
        /// Server address
        address: String,

        /// Resource holder port
        port: u16,

        /// Simulated service time per requester in milliseconds
        #[arg(short, long, default_value = "1000")]
        service_ms: u64,

        /// Stop after this many requesters
        #[arg(short = 'n', long)]
        sessions: Option<usize>,
    },
}
