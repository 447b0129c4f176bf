//! fixline server entry point.
//!
//! Starts the Axum HTTP server exposing the messaging webhook, payment
//! callbacks, and health endpoint.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use fixline::api;
use fixline::app_state::AppState;
use fixline::config::{AdminRegistry, BotConfig};
use fixline::domain::Catalog;
use fixline::persistence::memory::MemoryLedger;
use fixline::persistence::postgres::PostgresLedger;
use fixline::persistence::Ledger;
use fixline::service::conversation::ConversationEngine;
use fixline::service::messaging::WhatsAppSender;
use fixline::service::payment::PayPalGateway;
use fixline::service::receipt::{ReceiptIssuer, TextReceiptRenderer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = BotConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting fixline");

    // Outbound HTTP client with the global bounded timeout
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;

    // Durable ledger: Postgres, or in-memory when persistence is disabled
    let ledger: Arc<dyn Ledger> = if config.persistence_enabled {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        let ledger = PostgresLedger::new(pool);
        ledger.init_schema().await?;
        Arc::new(ledger)
    } else {
        tracing::warn!("persistence disabled; records will not survive restart");
        Arc::new(MemoryLedger::new())
    };

    // Collaborators
    let sender = Arc::new(WhatsAppSender::new(
        http.clone(),
        &config.wa_phone_number_id,
        &config.wa_access_token,
        &config.wa_graph_version,
    ));
    let gateway = Arc::new(PayPalGateway::new(
        http,
        &config.paypal_api_base,
        &config.paypal_client_id,
        &config.paypal_client_secret,
        &config.currency,
        &config.business.name,
        &config.public_base_url,
    ));
    let renderer = Arc::new(TextReceiptRenderer::new(
        config.receipts_dir.clone(),
        config.business.clone(),
    ));
    let issuer = Arc::new(ReceiptIssuer::new(Arc::clone(&ledger), renderer));
    let admins = Arc::new(AdminRegistry::new(config.admin_phones.clone()));

    // The conversation state machine
    let engine = Arc::new(ConversationEngine::new(
        Arc::clone(&ledger),
        Arc::clone(&sender) as _,
        Arc::clone(&gateway) as _,
        Arc::clone(&issuer),
        Catalog::standard(),
        admins,
        config.business.clone(),
    ));

    // Build application state
    let app_state = AppState {
        engine,
        ledger,
        gateway,
        issuer,
        sender,
        verify_token: config.webhook_verify_token.clone(),
    };

    // Build router
    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.http_timeout_secs * 2,
        )))
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
