use crate::{
    middleware::VerificationPipeline,
    models::HealthStatus,
    services::ChainReader,
};
use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct HealthState {
    pub chain: Option<Arc<dyn ChainReader>>,
    pub pipeline: Arc<VerificationPipeline>,
    pub started_at: Instant,
}

pub async fn health_check(
    State(state): State<HealthState>,
) -> Json<HealthStatus> {
    let chain_ok = match &state.chain {
        Some(chain) => chain.block_number().await.is_ok(),
        None => false,
    };

    // Without transaction checks the gate keeps working when the node is down.
    let status = if chain_ok || !state.pipeline.config().verify_transaction {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chain_rpc: chain_ok,
        replay_entries: state.pipeline.replay_guard().len(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}
