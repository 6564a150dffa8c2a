use std::sync::Arc;

use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use invorto_domain::config::{Config, ConfigSeverity};
use invorto_gateway::api;
use invorto_gateway::bootstrap::build_app_state;
use invorto_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = invorto_gateway::cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = invorto_gateway::cli::load_config(&cli.config)?;
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            let errors = issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count();
            if errors > 0 {
                std::process::exit(1);
            }
            println!("config ok ({} warning(s))", issues.len());
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = invorto_gateway::cli::load_config(&cli.config)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("invorto {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve path.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,invorto_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "invorto starting");

    let (state, background) = build_app_state(config.clone())?;

    // ── CORS ─────────────────────────────────────────────────────────
    let cors = if config.server.cors.allowed_origins == vec!["*".to_string()] {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let app = api::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    let shutdown = state.shutdown.clone();
    let sessions = state.sessions.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining sessions");
            sessions.cancel_all();
            shutdown.cancel();
        })
        .await?;

    // Let the webhook workers and mirror observe the token and stop.
    background.join().await;
    tracing::info!("invorto stopped");
    Ok(())
}
