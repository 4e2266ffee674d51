//! Inventory Ledger
//!
//! The single source of truth for stock. Orders hold stock through
//! reservations that are all-or-nothing across their lines and bounded by a
//! TTL; a reservation is later confirmed (stock leaves the shelf) or released
//! (stock becomes sellable again).
//!
//! Two backends implement [`InventoryLedger`]:
//! - [`InMemoryInventoryLedger`] for tests and local runs
//! - [`PostgresInventoryLedger`] which races concurrent reservations at the
//!   storage layer with conditional updates

pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod reservation;

pub use error::{LedgerError, Result};
pub use ledger::{DEFAULT_RESERVATION_TTL_SECS, InventoryLedger};
pub use memory::InMemoryInventoryLedger;
pub use postgres::PostgresInventoryLedger;
pub use reservation::{
    Reservation, ReservationLine, ReservationStatus, ReservationTransition, StockLevel,
};
