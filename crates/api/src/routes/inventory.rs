//! Stock administration.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::ProductId;
use inventory::StockLevel;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

/// PUT /inventory/{product_id}: adds `quantity` units to on-hand stock.
#[tracing::instrument(skip(state, payload))]
pub async fn restock(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    payload: Result<Json<RestockRequest>, JsonRejection>,
) -> Result<Json<StockLevel>, ApiError> {
    let Json(req) = payload?;
    let level = state
        .ledger
        .restock(&ProductId::new(product_id), req.quantity)
        .await?;
    Ok(Json(level))
}

/// GET /inventory/{product_id}
#[tracing::instrument(skip(state))]
pub async fn stock_level(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> Result<Json<StockLevel>, ApiError> {
    let level = state
        .ledger
        .stock_level(&ProductId::new(product_id))
        .await?;
    Ok(Json(level))
}
