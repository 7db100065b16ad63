use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use twin_core::config::{env_credential, OPIK_KEY_VAR};
use twin_core::llm::GeminiClient;
use twin_core::store::{FileSessionStore, SessionStore};
use twin_core::telemetry::{RunId, TelemetryRecorder};
use twin_core::TwinConfig;

use twin_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "twin.toml")]
    config: String,

    /// Print configuration status and exit.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match TwinConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let level = config
        .service
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    // Open session store
    let store = match FileSessionStore::open(&config.storage.dir).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open session store at {}: {}", config.storage.dir, e);
            std::process::exit(1);
        }
    };
    let store: Arc<dyn SessionStore> = Arc::new(store);

    let llm = match GeminiClient::from_llm_config(&config.llm) {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!("LLM endpoints disabled: {}", e);
            None
        }
    };
    let sink_enabled = env_credential(&[OPIK_KEY_VAR]).is_some();

    if args.health {
        println!(
            "{} LLM: {}",
            if llm.is_some() { "✅" } else { "❌" },
            llm.as_ref().map(|c| c.model()).unwrap_or("no GEMINI_API_KEY"),
        );
        println!(
            "{} Telemetry: {}",
            if sink_enabled { "✅" } else { "❌" },
            if sink_enabled { "enabled" } else { "no OPIK_API_KEY" },
        );
        println!("✅ Session store: {}", config.storage.dir);
        return Ok(());
    }

    let run_id = RunId::load_or_create(store.as_ref()).await;
    tracing::info!(run_id = %run_id, "Session run id");
    let telemetry = Arc::new(TelemetryRecorder::from_config(&config.telemetry, run_id));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState::new(config, llm, store, telemetry, sink_enabled));
    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
