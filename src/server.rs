use crate::app::{Failure, PaymentReceipt, PaymentUseCase, TrainUseCase};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub const TRAIN_PATH: &str = "/functions/v1/train";
pub const PAYMENT_PATH: &str = "/api/payment";
const STRIPE_SIGNATURE: &str = "stripe-signature";
const TRAIN_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

#[derive(Clone)]
pub struct AppState {
    pub train: Arc<TrainUseCase>,
    pub payment: Arc<PaymentUseCase>,
    pub metrics: Option<PrometheusHandle>,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "train_gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Sent on every trigger response, with or without an Origin header.
fn train_cors_headers() -> [(HeaderName, HeaderValue); 2] {
    [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(TRAIN_ALLOW_HEADERS)),
    ]
}

async fn train(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state.train.trigger(&headers).await {
        Ok(receipt) => (
            StatusCode::OK,
            train_cors_headers(),
            Json(serde_json::json!({ "message": "Ready for training", "data": receipt })),
        )
            .into_response(),
        Err(Failure { error, .. }) => (
            error.status_code(),
            train_cors_headers(),
            Json(serde_json::json!({ "error": error.public_message(), "code": error.code() })),
        )
            .into_response(),
    }
}

async fn payment(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers.get(STRIPE_SIGNATURE).and_then(|v| v.to_str().ok());
    match state.payment.handle(&body, signature).await {
        Ok(receipt) => {
            if let PaymentReceipt::Applied { user_id } = &receipt {
                info!(user_id = %user_id, "Payment applied");
            }
            (StatusCode::OK, Json(serde_json::json!({ "done": true }))).into_response()
        }
        Err(Failure { error, .. }) => (
            error.status_code(),
            Json(serde_json::json!({ "message": error.public_message(), "code": error.code() })),
        )
            .into_response(),
    }
}

/// Create the HTTP router with all routes.
///
/// The CORS layer answers every `OPTIONS` request itself.
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route(PAYMENT_PATH, post(payment))
        .route(TRAIN_PATH, post(train))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = create_server(state);
    let listener = TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;

    info!(%addr, "HTTP server listening");
    info!("Health check: http://{addr}/health");
    info!("Training trigger: http://{addr}{TRAIN_PATH}");
    info!("Payment webhook: http://{addr}{PAYMENT_PATH}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
