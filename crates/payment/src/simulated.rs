//! In-process stand-in for the PSP.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::PaymentStatus;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::provider::{PaymentProvider, ProviderReceipt, ProviderRequest};
use crate::signature::WebhookSigner;
use crate::webhook::WebhookEvent;

#[derive(Default)]
struct Accounts {
    requests: Vec<ProviderRequest>,
    /// idempotency key -> (provider reference, request)
    issued: HashMap<String, (String, ProviderRequest)>,
}

/// Simulated provider for local runs and tests.
///
/// Records every initiate request, answers repeated idempotency keys with
/// the same reference, and produces webhooks signed with the shared secret.
#[derive(Clone)]
pub struct SimulatedPaymentProvider {
    accounts: Arc<RwLock<Accounts>>,
    signer: WebhookSigner,
    failing: Arc<AtomicBool>,
}

impl SimulatedPaymentProvider {
    pub fn new(signer: WebhookSigner) -> Self {
        Self {
            accounts: Arc::new(RwLock::new(Accounts::default())),
            signer,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// While set, initiate calls fail with a transient provider error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn requests(&self) -> Vec<ProviderRequest> {
        self.accounts.read().await.requests.clone()
    }

    /// Provider reference issued for an order, if it was ever initiated.
    pub async fn reference_for(&self, order_id: &str) -> Option<String> {
        let accounts = self.accounts.read().await;
        accounts
            .issued
            .values()
            .find(|(_, request)| request.order_id == order_id)
            .map(|(reference, _)| reference.clone())
    }

    /// A signed webhook reporting `status` for an initiated order, carrying
    /// the amount and currency of the original request.
    pub async fn webhook(&self, order_id: &str, status: PaymentStatus) -> Option<WebhookEvent> {
        let accounts = self.accounts.read().await;
        let (reference, request) = accounts
            .issued
            .values()
            .find(|(_, request)| request.order_id == order_id)?;

        let mut event = WebhookEvent {
            event_id: format!("evt_{}", Uuid::new_v4().simple()),
            payment_id: reference.clone(),
            order_id: request.order_id.clone(),
            status: status.as_str().to_string(),
            amount: request.amount,
            currency: request.currency.clone(),
            signature: String::new(),
            created_at: Some(chrono::Utc::now()),
        };
        event.signature = self.signer.sign(&event);
        Some(event)
    }
}

#[async_trait]
impl PaymentProvider for SimulatedPaymentProvider {
    async fn initiate(&self, request: &ProviderRequest) -> Result<ProviderReceipt> {
        let mut accounts = self.accounts.write().await;
        accounts.requests.push(request.clone());

        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::provider("simulated provider outage", true));
        }

        let reference = accounts
            .issued
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| (format!("psp_{}", Uuid::new_v4().simple()), request.clone()))
            .0
            .clone();

        tracing::debug!(order_id = %request.order_id, %reference, "simulated payment intent");
        Ok(ProviderReceipt {
            payment_id: reference,
        })
    }
}
