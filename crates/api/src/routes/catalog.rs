use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use domain::Money;
use saga::{CatalogEntry, SagaError};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SetPriceRequest {
    pub name: String,
    pub unit_price: Money,
}

/// PUT /catalog/{product_id}: sets the name and price later orders snapshot.
#[tracing::instrument(skip(state, payload))]
pub async fn set_price(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    payload: Result<Json<SetPriceRequest>, JsonRejection>,
) -> Result<Json<CatalogEntry>, ApiError> {
    let Json(req) = payload?;
    if product_id.trim().is_empty() || req.name.trim().is_empty() {
        return Err(SagaError::Validation("product id and name are required".into()).into());
    }
    if !req.unit_price.is_positive() {
        return Err(SagaError::Validation("unit price must be positive".into()).into());
    }
    let entry = state
        .catalog
        .set_price(product_id, req.name, req.unit_price)
        .await;
    Ok(Json(entry))
}
