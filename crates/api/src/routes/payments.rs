//! Provider webhooks and payment status polling.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use payment::{PaymentStatusView, WebhookEvent, WebhookOutcome};

use super::parse_aggregate_id;
use crate::error::ApiError;
use crate::state::AppState;

/// POST /payments/webhook
///
/// A repeated `event_id` answers 200 with the stored outcome so the
/// provider stops redelivering.
#[tracing::instrument(skip_all)]
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WebhookEvent>, JsonRejection>,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let Json(event) = payload?;
    let outcome = state.saga.handle_webhook(&event).await?;
    Ok(Json(outcome))
}

/// GET /payments/{order_id}
#[tracing::instrument(skip(state))]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentStatusView>, ApiError> {
    let order_id = parse_aggregate_id(&order_id)?;
    Ok(Json(state.saga.payment_status(order_id).await?))
}
