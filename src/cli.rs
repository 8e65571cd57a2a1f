//! Command-line interface definitions.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "opsdec", about = "Activity monitor for Plex, Emby, Jellyfin and Audiobookshelf")]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server.
    Start {
        /// Listen host (overrides OPSDEC_HOST).
        #[arg(long)]
        host: Option<String>,
        /// Listen port (overrides OPSDEC_PORT).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Hash a password for manual account provisioning.
    HashPassword { password: String },
    /// Generate a random secret for OPSDEC_TOKEN_SECRET or
    /// OPSDEC_ENCRYPTION_KEY.
    GenerateSecret,
    /// Print the version.
    Version,
}
