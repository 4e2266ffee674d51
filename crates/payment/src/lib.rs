//! Payment Gateway Adapter
//!
//! Talks to the external payment service provider (PSP) and owns the
//! payment records:
//!
//! - [`PaymentGateway::initiate`] creates one payment per order, keyed by
//!   the order id, and forwards it to the provider
//! - [`PaymentGateway::handle_webhook`] verifies, deduplicates and applies
//!   the provider's asynchronous verdicts
//! - [`PaymentGateway::get_status`] is the read side for client polling

pub mod error;
pub mod gateway;
pub mod provider;
pub mod signature;
pub mod simulated;
pub mod webhook;

pub use error::{PaymentError, Result};
pub use gateway::{PaymentGateway, PaymentHandle, PaymentStatusView};
pub use provider::{HttpPaymentProvider, PaymentProvider, ProviderReceipt, ProviderRequest};
pub use signature::WebhookSigner;
pub use simulated::SimulatedPaymentProvider;
pub use webhook::{PaymentOutcome, WebhookEvent, WebhookOutcome, WebhookRecord, WebhookRecordEvent};
