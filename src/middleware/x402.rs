use crate::{
    error::GuardError,
    middleware::{pipeline::VerificationPipeline, routes::RouteTable},
};
use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::Arc;

/// Request header carrying the base64 payment proof.
pub const PAYMENT_HEADER: &str = "X-Payment";

#[derive(Clone)]
pub struct X402Middleware {
    pipeline: Arc<VerificationPipeline>,
    routes: Arc<RouteTable>,
}

impl X402Middleware {
    pub fn new(pipeline: Arc<VerificationPipeline>, routes: RouteTable) -> Self {
        Self {
            pipeline,
            routes: Arc::new(routes),
        }
    }

    pub fn pipeline(&self) -> &Arc<VerificationPipeline> {
        &self.pipeline
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

// Axum middleware function
pub async fn x402_middleware_layer(
    middleware: Arc<X402Middleware>,
    mut request: Request,
    next: Next,
) -> Result<Response, GuardError> {
    let Some(challenge) = middleware.routes.challenge_for(request.uri().path()) else {
        return Ok(next.run(request).await);
    };

    let payment_header = match request.headers().get(PAYMENT_HEADER) {
        Some(value) => Some(value.to_str().map_err(|_| {
            GuardError::InvalidProofFormat("X-Payment header is not ASCII".to_string())
        })?),
        None => None,
    };

    let verified = middleware
        .pipeline
        .verify(challenge, payment_header)
        .await?;

    tracing::debug!(
        path = %request.uri().path(),
        signer = ?verified.signer,
        "Serving paid request"
    );

    // Payment verified, continue to handler
    request.extensions_mut().insert(verified);
    Ok(next.run(request).await)
}
