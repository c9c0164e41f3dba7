use std::sync::Arc;

use anyhow::Context;
use axum::http::Method;
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use chimera_domain::config::Config;
use chimera_engine::agent::WidgetRegistry;
use chimera_gateway::api;
use chimera_gateway::registry::ActiveTaskRegistry;
use chimera_gateway::state::AppState;
use chimera_protocol::store::ThreadStore;
use chimera_providers::ModelRegistry;

#[derive(Parser)]
#[command(name = "chimera", about = "Multi-agent conversation runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Bind host (overrides CHIMERA_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides CHIMERA_PORT).
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway server (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let mut config = Config::from_env();
            if let Some(host) = cli.host {
                config.host = host;
            }
            if let Some(port) = cli.port {
                config.port = port;
            }
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("chimera {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chimera_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Chimera starting");

    // ── Model registry ───────────────────────────────────────────────
    let resolver = Arc::new(ModelRegistry::from_env(config.default_model.clone()));
    tracing::info!(default_model = %config.default_model, "model registry ready");

    // ── Widget catalog ───────────────────────────────────────────────
    // The engine ships no concrete widgets; hosts embedding the gateway
    // register their catalog before calling api::router.
    let widgets = Arc::new(WidgetRegistry::new());

    // ── Thread store (optional server-side persistence) ─────────────
    let threads = match &config.threads_dir {
        Some(dir) => {
            let store = ThreadStore::new(dir).context("initializing thread store")?;
            tracing::info!(path = %dir.display(), "thread store ready");
            Some(Arc::new(store))
        }
        None => {
            tracing::info!("no CHIMERA_THREADS_DIR set - streaming-only, client owns persistence");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        resolver,
        widgets,
        registry: Arc::new(ActiveTaskRegistry::new()),
        threads,
    };

    // ── Router ───────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let max_concurrent = std::env::var("CHIMERA_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);

    let app = api::router(state)
        .layer(cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "Chimera listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}
