use clap::{Parser, Subcommand};

/// CLI for roadie
#[derive(Parser, Debug)]
#[command(name = "roadie", version, about = "Local service supervisor")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start services in the foreground and stream their logs
    Run {
        /// File path to the manifest (TOML)
        #[arg(short, long)]
        file: Option<String>,

        /// Services to start; all of them when empty
        services: Vec<String>,
    },

    /// Start services detached and return
    Start {
        #[arg(short, long)]
        file: Option<String>,

        /// Services to start; all of them when empty
        services: Vec<String>,
    },

    /// Stop services, re-attaching to processes from a previous run
    Stop {
        #[arg(short, long)]
        file: Option<String>,

        /// Services to stop; all of them when empty
        services: Vec<String>,
    },

    /// Restart services
    Restart {
        #[arg(short, long)]
        file: Option<String>,

        /// Services to restart; all of them when empty
        services: Vec<String>,
    },

    /// Show the current status of every service
    Status {
        #[arg(short, long)]
        file: Option<String>,
    },
}
