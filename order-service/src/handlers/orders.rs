use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    CreateOrderRequest, InvoiceFailureResponse, ListOrdersQuery, OrderListResponse,
    SettlementResponse, StatusResponse, UpdateStatusRequest,
};
use crate::middleware::UserContext;
use crate::models::{ListOrdersFilter, OrderStatus};
use crate::settlement::{SettlementError, SettlementFailure, SettlementRequest};
use crate::startup::AppState;

/// Settlement errors as responses. A gateway failure keeps the committed
/// order in the body so callers can tell it apart from a failed checkout.
fn settlement_error_response(err: SettlementError) -> Response {
    match err {
        SettlementError {
            failure: SettlementFailure::Gateway { order, source },
            ..
        } => (
            StatusCode::BAD_GATEWAY,
            Json(InvoiceFailureResponse {
                error: "invoice_generation_failed".to_string(),
                details: source.to_string(),
                order: *order,
            }),
        )
            .into_response(),
        other => {
            let stage = other.stage;
            let err = AppError::from(other);
            tracing::warn!(kind = err.kind(), stage = %stage, error = %err, "Settlement request failed");
            err.into_response()
        }
    }
}

#[tracing::instrument(skip(state, user, payload), fields(user_id = %user.user_id))]
pub async fn create_order(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;

    let request = SettlementRequest {
        buyer: user.buyer(),
        shipping: payload.shipping(),
        lines: payload.lines(),
        voucher_id: payload.voucher_id,
    };

    match state.coordinator.settle(request).await {
        Ok(settlement) => Ok((
            StatusCode::CREATED,
            Json(SettlementResponse::from(settlement)),
        )
            .into_response()),
        Err(err) => Ok(settlement_error_response(err)),
    }
}

#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get_order(
    State(state): State<AppState>,
    user: UserContext,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .store
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;

    if order.user_id != user.user_id {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Order belongs to another user"
        )));
    }

    Ok(Json(order))
}

#[tracing::instrument(skip(state, user, query), fields(user_id = %user.user_id))]
pub async fn list_orders(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let filter = ListOrdersFilter {
        status,
        page: query.page.unwrap_or(1).max(1),
        page_size: query.page_size.unwrap_or(20),
    };

    let orders = state.store.list_orders(user.user_id, &filter).await?;

    Ok(Json(OrderListResponse {
        orders,
        page: filter.page,
        page_size: filter.limit(),
    }))
}

#[tracing::instrument(skip(state, payload))]
pub async fn update_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let status: OrderStatus = payload
        .status
        .parse()
        .map_err(|e: String| AppError::BadRequest(anyhow::anyhow!(e)))?;

    if !state.store.update_status(order_id, status).await? {
        return Err(AppError::NotFound(anyhow::anyhow!("Order not found")));
    }

    tracing::info!(order_id = %order_id, status = %status, "Order status changed");

    Ok(Json(StatusResponse {
        order_id,
        status: status.as_str().to_string(),
    }))
}

/// Re-runs pricing for an order stranded between creation and pricing.
#[tracing::instrument(skip(state))]
pub async fn reprice_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let order = state.coordinator.reprice(order_id).await?;
    Ok(Json(order))
}

/// Issues, or returns the already issued, invoice for one order.
#[tracing::instrument(skip(state))]
pub async fn issue_invoice(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Response {
    match state.coordinator.issue_invoice(order_id).await {
        Ok(settlement) => Json(SettlementResponse::from(settlement)).into_response(),
        Err(err) => settlement_error_response(err),
    }
}
