//! Catalog collaborator: product names and current unit prices.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::ProductId;
use domain::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub unit_price: Money,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Price lookup, consulted once when an order is created.
///
/// Products the catalog does not know are simply absent from the result.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_prices(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, CatalogEntry>, CatalogError>;
}

/// In-memory catalog for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    entries: Arc<RwLock<HashMap<ProductId, CatalogEntry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name and price later orders will snapshot.
    pub async fn set_price(
        &self,
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        unit_price: Money,
    ) -> CatalogEntry {
        let entry = CatalogEntry {
            name: name.into(),
            unit_price,
        };
        self.entries
            .write()
            .await
            .insert(product_id.into(), entry.clone());
        entry
    }

    pub async fn get(&self, product_id: &ProductId) -> Option<CatalogEntry> {
        self.entries.read().await.get(product_id).cloned()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_prices(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, CatalogEntry>, CatalogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("simulated outage".into()));
        }

        let entries = self.entries.read().await;
        Ok(product_ids
            .iter()
            .filter_map(|id| entries.get(id).map(|entry| (id.clone(), entry.clone())))
            .collect())
    }
}
