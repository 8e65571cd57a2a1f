mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use opsdec_core::config::Config;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing. Respect RUST_LOG env var; otherwise use defaults
    // based on the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "opsdec=trace,opsdec_db=debug,opsdec_core=debug,tower_http=debug".to_string()
        } else {
            "opsdec=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&env_filter))
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port))
        }
        Commands::HashPassword { password } => hash_password(&password),
        Commands::GenerateSecret => {
            println!("{}", opsdec::crypto::generate_secret());
            Ok(())
        }
        Commands::Version => {
            println!("opsdec {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::from_env();

    // CLI flags override the environment.
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    tracing::info!("Starting opsdec server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.host,
        config.port
    );

    opsdec::start(config).await?;
    Ok(())
}

fn hash_password(password: &str) -> Result<(), Box<dyn std::error::Error>> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".into());
    }
    println!("{}", opsdec::crypto::hash_password(password)?);
    Ok(())
}
