use crate::{
    handlers::{health_check, premium_content, report, HealthState},
    middleware::{x402_middleware_layer, X402Middleware},
};
use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

/// Demo application: `/health` plus the paid content routes.
///
/// The x402 layer wraps every route; which paths cost money is decided by
/// the middleware's route table.
pub fn build_router(x402: Arc<X402Middleware>, health: HealthState) -> Router {
    Router::new()
        // Public endpoints (no payment required)
        .route("/health", get(health_check))
        // Protected endpoints (payment required)
        .route("/api/premium", get(premium_content))
        .route("/api/reports/:id", get(report))
        .with_state(health)
        .layer(axum_middleware::from_fn(move |req, next| {
            let x402 = x402.clone();
            async move { x402_middleware_layer(x402, req, next).await }
        }))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
