use std::iter::once;
use std::net::SocketAddr;

use axum::{
    body::Body,
    http::{
        header::{
            self, InvalidHeaderValue, ACCEPT, ACCEPT_ENCODING, AUTHORIZATION,
            CONTENT_TYPE, ORIGIN,
        },
        HeaderName, HeaderValue, Request, StatusCode,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    propagate_header::PropagateHeaderLayer,
    sensitive_headers::SetSensitiveRequestHeadersLayer,
    trace::TraceLayer,
};

/// Parses a comma separated list of allowed CORS origins.
///
/// Blank entries are skipped, so a trailing comma is harmless.
///
/// # Errors
///
/// Returns an error if an origin is not a valid header value.
pub fn parse_origins(origins: &str) -> Result<Vec<HeaderValue>, InvalidHeaderValue> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(HeaderValue::from_str)
        .collect()
}

/// Adds `/health`, the JSON 404 fallback and the layers every service
/// shares to an app whose state has already been provided.
///
/// An empty `allowed_origins` allows any origin.
pub fn with_common_layers(app: Router, allowed_origins: Vec<HeaderValue>) -> Router {
    // Set up a trace layer
    let trace_layer = TraceLayer::new_for_http().on_request(
        |request: &Request<Body>, _: &tracing::Span| {
            tracing::info!(
                "received request: {method} {uri}",
                method = request.method(),
                uri = request.uri()
            );
        },
    );

    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(allowed_origins)
    };

    // Set up a CORS layer
    let cors_layer = CorsLayer::new()
        .allow_headers([ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE, ORIGIN])
        .allow_methods(Any)
        .allow_origin(allow_origin);

    let compression_layer = CompressionLayer::new().gzip(true).deflate(true);

    app.route("/health", get(health))
        .fallback(not_found)
        .layer(cors_layer)
        // Mark the `Authorization` request header as sensitive so it doesn't show in logs
        .layer(SetSensitiveRequestHeadersLayer::new(once(AUTHORIZATION)))
        .layer(trace_layer)
        .layer(compression_layer)
        // Propagate `X-Request-Id`s from requests to responses
        .layer(PropagateHeaderLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
}

/// Serves the router on `addr` until SIGINT or SIGTERM arrives, then
/// finishes in-flight requests and returns.
///
/// # Errors
///
/// Returns an error if the listener can't bind to `addr` or the server
/// fails while running.
pub async fn run_app(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[tracing::instrument]
pub async fn health() -> impl IntoResponse {
    tracing::info!("health check");

    Json(json!({ "status" : "UP" }))
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "application/json")],
        Json(json!({
            "message": "not found",
        })),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::warn!("signal received, starting graceful shutdown");
}
