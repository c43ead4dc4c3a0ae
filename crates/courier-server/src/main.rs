use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use courier_core::memory::InMemoryBackend;
use courier_core::Collaborators;
use courier_ws::GatewayService;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("courier=info,security=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;
    if let Some(bind_address) = args.bind_address {
        config.server.bind_address = bind_address;
    }

    let backend = Arc::new(InMemoryBackend::new());
    seed_backend(&backend, &config.seed);

    let gateway = GatewayService::new(
        config.gateway_config(),
        Collaborators::from_backend(backend),
    );
    let heartbeat = gateway.spawn_heartbeat();

    let app = Router::new()
        .route("/health", get(health))
        .merge(courier_ws::gateway_router())
        .layer(TraceLayer::new_for_http())
        .with_state(gateway.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        bind_address = %config.server.bind_address,
        heartbeat_interval_seconds = config.gateway.heartbeat_interval_seconds,
        seeded_users = config.seed.users.len(),
        seeded_contexts = config.seed.contexts.len(),
        "courier gateway listening"
    );

    // Graceful shutdown: drain the gateway before the listener stops.
    let shutdown_gateway = gateway.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down (ctrl-c)...");
        shutdown_gateway.shutdown().await;
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if let Err(e) = heartbeat.await {
        tracing::warn!("Heartbeat task ended abnormally: {}", e);
    }
    Ok(())
}

fn seed_backend(backend: &InMemoryBackend, seed: &config::SeedConfig) {
    for user in &seed.users {
        backend.add_user(user.id, user.name.clone(), user.token.clone());
    }
    for context in &seed.contexts {
        backend.add_context(context.id, context.participants.iter().copied());
        for publisher in &context.publishers {
            backend.allow_location_publisher(context.id, *publisher);
        }
    }
}

async fn health(State(gateway): State<Arc<GatewayService>>) -> Json<Value> {
    let status = if gateway.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(json!({
        "status": status,
        "connections": gateway.tracked_count(),
        "authenticated": gateway.registry().len(),
        "users": gateway.registry().user_count(),
    }))
}
