//! Example payment settlement service.
//!
//! Exposes the payment API over HTTP. Payments are created with a fresh deposit address,
//! and advance through burn, attestation, forwarding and pool deposit whenever their
//! status is read or a burn hash is submitted.
//!
//! Run with:
//! ```bash
//! cargo run --example settlement_service
//! ```
//!
//! Environment variables (a `.env` file is loaded if present):
//! - PAYMENT_WALLET_ENCRYPTION_KEY: Secret sealing deposit-wallet keys (required)
//! - CCTP_SOLANA_FORWARDER_URL: Relayer for attested messages (required)
//! - SHADOWWIRE_POOL_SECRET_KEY: Pool operating keypair as a JSON byte array (required)
//! - SOLANA_RPC_URL: Solana JSON-RPC endpoint (required)
//! - SHADOWWIRE_API_KEY, SHADOWWIRE_API_BASE_URL, CIRCLE_IRIS_BASE_URL: Optional overrides
//! - EVM_RPC_<chainId>: Per-chain RPC override
//! - PAYMENT_STORE_DIR: Directory of payments.json (default: .data)
//! - PORT: Server port (default: 3000)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cctp_settlement::types::{CreatePaymentRequest, PaymentResponse, SubmitTxRequest};
use cctp_settlement::{SettlementConfig, SettlementError, SettlementService};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    service: SettlementService,
}

fn status_for(error: &SettlementError) -> StatusCode {
    match error {
        SettlementError::ValidationError(_)
        | SettlementError::InvalidAmount(_)
        | SettlementError::InvalidAddress(_)
        | SettlementError::UnsupportedDomain(_) => StatusCode::BAD_REQUEST,
        SettlementError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::SourceTxHashImmutable(_) | SettlementError::StatusConflict { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(result: cctp_settlement::Result<cctp_settlement::PaymentRequest>) -> axum::response::Response {
    match result {
        Ok(payment) => (StatusCode::OK, Json(PaymentResponse { payment })).into_response(),
        Err(e) => (status_for(&e), Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn create_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePaymentRequest>,
) -> impl IntoResponse {
    respond(state.service.handle_create(request).await)
}

async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    respond(state.service.handle_get(&id).await)
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitTxRequest>,
) -> impl IntoResponse {
    respond(state.service.handle_submit(request).await)
}

async fn advance_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    respond(state.service.handle_advance(&id).await)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "cctp-settlement",
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()?;

    let config = SettlementConfig::from_env()?;
    let service = SettlementService::from_config(&config)?;
    tracing::info!(store = %config.store_dir.display(), "Settlement service configured");

    let state = Arc::new(AppState { service });

    // Build router
    let app = Router::new()
        .route("/api/payments/create", post(create_handler))
        .route("/api/payments/submit", post(submit_handler))
        .route("/api/payments/:id", get(get_handler))
        .route("/api/payments/:id/advance", post(advance_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Settlement service listening");

    axum::serve(listener, app).await?;

    Ok(())
}
