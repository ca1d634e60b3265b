use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "keywardd",
    about = "Keywardd — license key issuing and validation daemon",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Keyward HTTP server
    Serve {
        /// Port to listen on (default: $KEYWARD_PORT or 3000)
        #[arg(long, env = "KEYWARD_PORT", default_value = "3000")]
        port: u16,
        /// Host to bind (default: $KEYWARD_HOST or 0.0.0.0)
        #[arg(long, env = "KEYWARD_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Log level: error, warn, info, debug, verbose (default: $KEYWARD_LOG_LEVEL or warn)
        #[arg(long, env = "KEYWARD_LOG_LEVEL")]
        log_level: Option<String>,
    },
    /// Replace the admin secret with a freshly generated one (offline).
    /// Requires direct access to the data directory; the server must be stopped.
    ResetSecret {
        /// Length of the generated secret
        #[arg(long, default_value_t = keyward_server::auth::DEFAULT_GENERATED_LENGTH)]
        length: usize,
    },
    /// Print the full persisted state as a JSON document (offline).
    Export,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let raw = match &cli.command {
        Commands::Serve { log_level, .. } => log_level.clone(),
        _ => None,
    }
    .or_else(|| std::env::var("KEYWARD_LOG_LEVEL").ok())
    .unwrap_or_else(|| "warn".into());
    let effective_log_level = if raw.eq_ignore_ascii_case("verbose") {
        "debug".to_owned()
    } else {
        raw
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&effective_log_level))
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            log_level: _,
        } => cmd_serve(host, port).await,

        Commands::ResetSecret { length } => cmd_reset_secret(length),

        Commands::Export => cmd_export(),
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = keyward_server::ServerConfig {
        host,
        port,
        ..Default::default()
    };

    keyward_server::run(cfg).await
}

fn open_offline_store() -> Result<keyward_server::store::Store> {
    let data_dir_env = std::env::var("KEYWARD_DATA_DIR").ok().map(Into::into);
    let data_dir = keyward_server::resolve_data_dir(data_dir_env.as_ref())?;
    keyward_server::open_store(&data_dir).context("open store — is the server still running?")
}

fn cmd_reset_secret(length: usize) -> Result<()> {
    let store = open_offline_store()?;
    let gate = keyward_server::auth::AdminGate::new(store);
    let secret = gate.generate_and_rotate(length)?;

    println!("new admin secret: {}", secret.as_str());
    println!("the previous secret no longer works");
    Ok(())
}

fn cmd_export() -> Result<()> {
    let store = open_offline_store()?;
    let document = store.snapshot()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&document).context("serialize state document")?
    );
    Ok(())
}
