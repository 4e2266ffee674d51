use async_trait::async_trait;
use common::{AggregateId, ProductId};

use crate::error::Result;
use crate::reservation::{Reservation, ReservationLine, ReservationTransition, StockLevel};

/// How long a reservation holds stock before it lapses, in seconds.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

/// Reserve/confirm/release operations over per-product stock.
///
/// Every operation is idempotent for the order it names: reserving twice
/// returns the live hold, confirming a confirmed reservation and releasing a
/// released one both succeed without touching stock.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Holds stock for every line or for none of them.
    async fn reserve(
        &self,
        order_id: AggregateId,
        lines: &[ReservationLine],
    ) -> Result<Reservation>;

    /// Turns a live hold into a permanent decrement of on-hand stock.
    async fn confirm(&self, order_id: AggregateId) -> Result<Reservation>;

    /// Returns held stock to the sellable pool.
    async fn release(&self, order_id: AggregateId) -> Result<Reservation>;

    async fn get_reservation(&self, order_id: AggregateId) -> Result<Option<Reservation>>;

    /// Status changes of one reservation, oldest first.
    async fn history(&self, order_id: AggregateId) -> Result<Vec<ReservationTransition>>;

    /// Adds units to on-hand stock, creating the product row if needed.
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<StockLevel>;

    async fn stock_level(&self, product_id: &ProductId) -> Result<StockLevel>;

    /// Releases every held reservation past its expiry and returns the
    /// affected orders.
    async fn release_expired(&self) -> Result<Vec<AggregateId>>;
}
