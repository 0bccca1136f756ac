use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rawrecv")]
#[command(about = "Apply a decoder_raw logical replication stream to a local database")]
#[command(version)]
pub struct Cli {
    /// Path to the rawrecv.toml config file
    #[arg(short, long, global = true, default_value = rawrecv_config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream changes from the source and apply them locally
    Run {
        /// Exit after the first worker failure instead of restarting
        #[arg(long)]
        once: bool,
    },

    /// Write a sample configuration file
    Init {
        /// Where to write the file (defaults to the --config path)
        path: Option<PathBuf>,
    },

    /// Validate the configuration and print the effective settings
    Check,
}
