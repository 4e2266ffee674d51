//! Order submission, status and fulfillment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::{Aggregate, Money, Order, UserId};
use event_store::Version;
use saga::OrderItemRequest;
use serde::{Deserialize, Serialize};

use super::parse_aggregate_id;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct SubmitOrderRequest {
    pub user_id: UserId,
    pub items: Vec<ItemRequest>,
}

#[derive(Deserialize)]
pub struct ItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct OwnerQuery {
    pub user_id: UserId,
}

#[derive(Deserialize)]
pub struct ShipRequest {
    pub tracking_number: String,
    pub expected_version: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct DeliverRequest {
    pub expected_version: Option<i64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub user_id: Option<UserId>,
    pub status: String,
    pub lines: Vec<OrderLineResponse>,
    pub grand_total: Money,
    pub payment_id: Option<String>,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub cancel_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id().map(|id| id.to_string()).unwrap_or_default(),
            user_id: order.user_id(),
            status: order.status().to_string(),
            lines: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
            grand_total: order.grand_total(),
            payment_id: order.payment_id().map(|id| id.to_string()),
            payment_deadline: order.payment_deadline(),
            tracking_number: order.tracking_number().map(String::from),
            cancel_reason: order.cancel_reason().map(|reason| reason.to_string()),
            failure_reason: order.failure_reason().map(String::from),
            version: order.version().as_i64(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: create an order, reserve its stock and request payment.
///
/// Answers 201 with the order in `PendingPayment`; the payment outcome
/// arrives later through the provider's webhook.
#[tracing::instrument(skip_all)]
pub async fn submit(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(req) = payload?;
    let items = req
        .items
        .into_iter()
        .map(|item| OrderItemRequest::new(item.product_id, item.quantity))
        .collect();

    let order = state.saga.submit_order(req.user_id, items).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id}?user_id=: the order as its owner sees it.
#[tracing::instrument(skip(state, owner))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    owner: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let Query(owner) = owner?;
    let order = state.saga.get_status(owner.user_id, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/ship
#[tracing::instrument(skip(state, payload))]
pub async fn ship(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ShipRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let Json(req) = payload?;
    let order = state
        .saga
        .mark_shipped(
            order_id,
            req.tracking_number,
            req.expected_version.map(Version::new),
        )
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/deliver. The body is optional.
#[tracing::instrument(skip(state, body))]
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let req: DeliverRequest = if body.is_empty() {
        DeliverRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };
    let order = state
        .saga
        .mark_delivered(order_id, req.expected_version.map(Version::new))
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}
