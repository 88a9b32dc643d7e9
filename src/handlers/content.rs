use crate::{
    middleware::VerifiedPayment,
    models::{ApiResponse, PaidContent},
};
use axum::{extract::Path, Extension, Json};
use chrono::Utc;
use uuid::Uuid;

fn paid(resource: String, payment: &VerifiedPayment) -> Json<ApiResponse<PaidContent>> {
    let fields = &payment.proof.fields;

    Json(ApiResponse {
        success: true,
        data: PaidContent {
            resource,
            payer: format!("{:?}", payment.signer),
            tx_hash: format!("{:?}", fields.tx_hash),
            amount: fields.amount.to_string(),
        },
        timestamp: Utc::now(),
        request_id: Uuid::new_v4().to_string(),
    })
}

pub async fn premium_content(
    Extension(payment): Extension<VerifiedPayment>,
) -> Json<ApiResponse<PaidContent>> {
    paid("premium".to_string(), &payment)
}

pub async fn report(
    Path(id): Path<String>,
    Extension(payment): Extension<VerifiedPayment>,
) -> Json<ApiResponse<PaidContent>> {
    tracing::debug!(report = %id, "Serving paid report");
    paid(format!("report/{id}"), &payment)
}
