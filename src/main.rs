use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use stream_agent::agent::Agent;
use stream_agent::api::{API_KEY_HEADER, API_PREFIX};
use stream_agent::config::{generate_api_key, AgentConfig, DEFAULT_PORT};
use stream_agent::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "stream-agent")]
#[command(version)]
#[command(about = "Agent that runs ffmpeg streaming jobs on behalf of a remote controller")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the agent API server
    Serve(ServeArgs),

    /// Query the health endpoint of a running agent
    Health {
        /// Agent base URL
        #[arg(long, short = 'a', default_value = "http://127.0.0.1:8002")]
        addr: String,
    },

    /// Print a freshly generated API key
    GenerateKey,
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Shared secret clients must send in the X-API-Key header.
    /// A random key is generated and logged when omitted.
    #[arg(long, env = "AGENT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Media binary used for the test run
    #[arg(long, env = "AGENT_BINARY", default_value = "ffmpeg")]
    binary: String,

    /// Directory under which job inputs are staged
    #[arg(long, env = "AGENT_STAGING_DIR")]
    staging_dir: Option<PathBuf>,
}

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let api_key = match args.api_key.filter(|key| !key.is_empty()) {
        Some(key) => key,
        None => {
            let key = generate_api_key();
            tracing::warn!(
                api_key = %key,
                "No AGENT_API_KEY configured, generated one for this run"
            );
            key
        }
    };

    let mut config = AgentConfig::new(listen_addr, api_key).with_binary(args.binary);
    if let Some(dir) = args.staging_dir {
        config = config.with_staging_dir(dir);
    }
    tokio::fs::create_dir_all(&config.staging_dir).await?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        binary = %config.binary,
        staging_dir = %config.staging_dir.display(),
        "Starting stream agent"
    );

    let shutdown = install_shutdown_handler()?;
    let agent = Arc::new(Agent::new(config));
    agent.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_health(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}{}/health", addr.trim_end_matches('/'), API_PREFIX);
    let body: Value = reqwest::get(&url).await?.error_for_status()?.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_server(serve_args).await?;
        }
        Commands::Health { addr } => {
            handle_health(&addr).await?;
        }
        Commands::GenerateKey => {
            println!("{}", generate_api_key());
            eprintln!(
                "Set it as AGENT_API_KEY on the agent and send it in the {} header.",
                API_KEY_HEADER
            );
        }
    }

    Ok(())
}
