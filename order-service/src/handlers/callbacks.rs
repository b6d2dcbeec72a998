//! Invoice provider callbacks.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::dtos::{InvoiceCallback, StatusResponse};
use crate::models::OrderStatus;
use crate::startup::AppState;

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Order status for a provider invoice status.
pub fn map_invoice_status(status: &str) -> Option<OrderStatus> {
    match status {
        "PAID" | "SETTLED" => Some(OrderStatus::Paid),
        "EXPIRED" => Some(OrderStatus::Expired),
        "PENDING" => Some(OrderStatus::Pending),
        _ => None,
    }
}

fn token_matches(headers: &HeaderMap, expected: &str) -> bool {
    let Some(provided) = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    !expected.is_empty() && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

/// The token is checked before the body is parsed.
#[tracing::instrument(skip(state, headers, body))]
pub async fn invoice_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if !token_matches(&headers, state.callback_token.expose_secret()) {
        tracing::warn!("Rejected invoice callback with invalid token");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Invalid callback token"
        )));
    }

    let callback: InvoiceCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid callback body: {}", e)))?;

    let status = map_invoice_status(&callback.status).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Unsupported invoice status: {}",
            callback.status
        ))
    })?;

    let order_id = Uuid::parse_str(&callback.external_id)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid external_id")))?;

    if !state.store.update_status(order_id, status).await? {
        return Err(AppError::NotFound(anyhow::anyhow!("Order not found")));
    }

    tracing::info!(
        order_id = %order_id,
        invoice_id = callback.id.as_deref().unwrap_or(""),
        provider_status = %callback.status,
        status = %status,
        "Invoice callback applied"
    );

    Ok((
        StatusCode::OK,
        Json(StatusResponse {
            order_id,
            status: status.as_str().to_string(),
        }),
    ))
}
