use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Clock, ProductId, SystemClock};
use tokio::sync::RwLock;

use crate::error::{LedgerError, Result};
use crate::ledger::{DEFAULT_RESERVATION_TTL_SECS, InventoryLedger};
use crate::reservation::{
    Reservation, ReservationLine, ReservationStatus, ReservationTransition, StockLevel,
    normalize_lines,
};

#[derive(Debug, Default, Clone, Copy)]
struct StockRow {
    on_hand: u64,
    held: u64,
    confirmed: u64,
}

impl StockRow {
    fn available(&self) -> u64 {
        self.on_hand - self.held
    }
}

#[derive(Default)]
struct Ledger {
    stock: HashMap<ProductId, StockRow>,
    reservations: HashMap<AggregateId, Reservation>,
    transitions: Vec<ReservationTransition>,
}

impl Ledger {
    fn level(&self, product_id: &ProductId) -> StockLevel {
        match self.stock.get(product_id) {
            Some(row) => StockLevel {
                product_id: product_id.clone(),
                on_hand: row.on_hand,
                held: row.held,
                confirmed: row.confirmed,
                available: row.available(),
            },
            None => StockLevel::empty(product_id.clone()),
        }
    }

    fn record(
        &mut self,
        order_id: AggregateId,
        from: Option<ReservationStatus>,
        to: ReservationStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) {
        self.transitions.push(ReservationTransition {
            order_id,
            from,
            to,
            reason: reason.to_string(),
            at,
        });
    }

    /// Moves a held reservation to `to`, adjusting stock rows. Returns the
    /// updated reservation.
    fn settle(
        &mut self,
        order_id: AggregateId,
        to: ReservationStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<Reservation> {
        let reservation = self.reservations.get_mut(&order_id)?;
        if reservation.status != ReservationStatus::Held {
            return Some(reservation.clone());
        }

        for line in &reservation.lines {
            let qty = u64::from(line.quantity);
            let row = self.stock.entry(line.product_id.clone()).or_default();
            row.held -= qty;
            if to == ReservationStatus::Confirmed {
                row.on_hand -= qty;
                row.confirmed += qty;
            }
        }
        reservation.status = to;
        reservation.updated_at = now;
        let snapshot = reservation.clone();

        self.record(order_id, Some(ReservationStatus::Held), to, reason, now);
        Some(snapshot)
    }

    fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<AggregateId> {
        let mut due: Vec<AggregateId> = self
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.order_id)
            .collect();
        due.sort();

        for order_id in &due {
            self.settle(*order_id, ReservationStatus::Released, "expired", now);
        }
        due
    }
}

/// In-memory ledger for tests and local runs.
///
/// One write lock covers each check-and-update, which gives the same
/// all-or-nothing guarantee as the conditional updates in
/// [`crate::PostgresInventoryLedger`].
#[derive(Clone)]
pub struct InMemoryInventoryLedger {
    ledger: Arc<RwLock<Ledger>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryInventoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::with_clock(
            Arc::new(SystemClock),
            chrono::Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        )
    }

    pub fn with_clock(clock: Arc<dyn Clock>, ttl: chrono::Duration) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(Ledger::default())),
            clock,
            ttl,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every subsequent call fail with [`LedgerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn reservation_count(&self) -> usize {
        self.ledger.read().await.reservations.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    #[tracing::instrument(skip_all, fields(%order_id))]
    async fn reserve(
        &self,
        order_id: AggregateId,
        lines: &[ReservationLine],
    ) -> Result<Reservation> {
        self.check_available()?;
        let lines = normalize_lines(lines)?;
        let now = self.clock.now();
        let mut ledger = self.ledger.write().await;

        let expired = ledger.expire_due(now);
        if !expired.is_empty() {
            metrics::counter!("reservations_expired_total").increment(expired.len() as u64);
        }

        if let Some(existing) = ledger.reservations.get(&order_id) {
            return match existing.status {
                ReservationStatus::Held => Ok(existing.clone()),
                status => Err(LedgerError::Closed { order_id, status }),
            };
        }

        for line in &lines {
            let available = ledger
                .stock
                .get(&line.product_id)
                .map(StockRow::available)
                .unwrap_or(0);
            let requested = u64::from(line.quantity);
            if available < requested {
                return Err(LedgerError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    requested,
                    available,
                });
            }
        }

        for line in &lines {
            if let Some(row) = ledger.stock.get_mut(&line.product_id) {
                row.held += u64::from(line.quantity);
            }
        }

        let reservation = Reservation {
            order_id,
            lines,
            status: ReservationStatus::Held,
            created_at: now,
            expires_at: now + self.ttl,
            updated_at: now,
        };
        ledger.reservations.insert(order_id, reservation.clone());
        ledger.record(order_id, None, ReservationStatus::Held, "reserved", now);

        tracing::debug!(expires_at = %reservation.expires_at, "stock reserved");
        Ok(reservation)
    }

    #[tracing::instrument(skip_all, fields(%order_id))]
    async fn confirm(&self, order_id: AggregateId) -> Result<Reservation> {
        self.check_available()?;
        let now = self.clock.now();
        let mut ledger = self.ledger.write().await;

        let reservation = ledger
            .reservations
            .get(&order_id)
            .cloned()
            .ok_or(LedgerError::NotFound { order_id })?;

        match reservation.status {
            ReservationStatus::Confirmed => Ok(reservation),
            ReservationStatus::Released => Err(LedgerError::Released { order_id }),
            ReservationStatus::Held if reservation.is_expired(now) => {
                ledger.settle(order_id, ReservationStatus::Released, "expired", now);
                metrics::counter!("reservations_expired_total").increment(1);
                Err(LedgerError::Expired { order_id })
            }
            ReservationStatus::Held => ledger
                .settle(order_id, ReservationStatus::Confirmed, "confirmed", now)
                .ok_or(LedgerError::NotFound { order_id }),
        }
    }

    #[tracing::instrument(skip_all, fields(%order_id))]
    async fn release(&self, order_id: AggregateId) -> Result<Reservation> {
        self.check_available()?;
        let now = self.clock.now();
        let mut ledger = self.ledger.write().await;

        let status = ledger
            .reservations
            .get(&order_id)
            .map(|r| r.status)
            .ok_or(LedgerError::NotFound { order_id })?;

        if status == ReservationStatus::Confirmed {
            return Err(LedgerError::AlreadyConfirmed { order_id });
        }

        ledger
            .settle(order_id, ReservationStatus::Released, "released", now)
            .ok_or(LedgerError::NotFound { order_id })
    }

    async fn get_reservation(&self, order_id: AggregateId) -> Result<Option<Reservation>> {
        self.check_available()?;
        Ok(self.ledger.read().await.reservations.get(&order_id).cloned())
    }

    async fn history(&self, order_id: AggregateId) -> Result<Vec<ReservationTransition>> {
        self.check_available()?;
        let ledger = self.ledger.read().await;
        Ok(ledger
            .transitions
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect())
    }

    #[tracing::instrument(skip_all, fields(%product_id))]
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<StockLevel> {
        self.check_available()?;
        if quantity == 0 {
            return Err(LedgerError::InvalidRequest(
                "restock quantity must be positive".into(),
            ));
        }

        let mut ledger = self.ledger.write().await;
        ledger.stock.entry(product_id.clone()).or_default().on_hand += u64::from(quantity);
        Ok(ledger.level(product_id))
    }

    async fn stock_level(&self, product_id: &ProductId) -> Result<StockLevel> {
        self.check_available()?;
        let now = self.clock.now();
        let mut ledger = self.ledger.write().await;
        let expired = ledger.expire_due(now);
        if !expired.is_empty() {
            metrics::counter!("reservations_expired_total").increment(expired.len() as u64);
        }
        Ok(ledger.level(product_id))
    }

    #[tracing::instrument(skip(self))]
    async fn release_expired(&self) -> Result<Vec<AggregateId>> {
        self.check_available()?;
        let now = self.clock.now();
        let expired = self.ledger.write().await.expire_due(now);
        if !expired.is_empty() {
            metrics::counter!("reservations_expired_total").increment(expired.len() as u64);
            tracing::info!(count = expired.len(), "released expired reservations");
        }
        Ok(expired)
    }
}
