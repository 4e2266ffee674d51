//! Reservation model shared by the ledger backends.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Held,
    Confirmed,
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "held",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "held" => Some(ReservationStatus::Held),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "released" => Some(ReservationStatus::Released),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ReservationLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// A TTL-bounded hold on stock for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: AggregateId,
    pub lines: Vec<ReservationLine>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// A held reservation past its expiry is logically released even before
    /// a sweep gets to it.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Held && self.expires_at <= now
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Held && !self.is_expired(now)
    }

    pub fn total_units(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

/// One row of a reservation's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationTransition {
    pub order_id: AggregateId,
    pub from: Option<ReservationStatus>,
    pub to: ReservationStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub on_hand: u64,
    pub held: u64,
    pub confirmed: u64,
    pub available: u64,
}

impl StockLevel {
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            on_hand: 0,
            held: 0,
            confirmed: 0,
            available: 0,
        }
    }
}

/// Validates reservation lines and returns them ordered by product.
///
/// Both backends touch stock rows in this order so two reservations over the
/// same products never lock them in opposite orders.
pub(crate) fn normalize_lines(lines: &[ReservationLine]) -> Result<Vec<ReservationLine>> {
    if lines.is_empty() {
        return Err(LedgerError::InvalidRequest(
            "a reservation needs at least one line".into(),
        ));
    }

    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 {
            return Err(LedgerError::InvalidRequest(format!(
                "quantity for {} must be positive",
                line.product_id
            )));
        }
        if !seen.insert(&line.product_id) {
            return Err(LedgerError::InvalidRequest(format!(
                "product {} appears more than once",
                line.product_id
            )));
        }
    }

    let mut sorted = lines.to_vec();
    sorted.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    Ok(sorted)
}
