//! End-to-end tests for the order fulfillment saga.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use common::{AggregateId, Clock, ManualClock, ProductId, RetryPolicy};
use domain::{Aggregate, CancelReason, Money, OrderEvent, OrderStatus, PaymentStatus, UserId};
use event_store::{EventStore, InMemoryEventStore, Version};
use inventory::{
    DEFAULT_RESERVATION_TTL_SECS, InMemoryInventoryLedger, InventoryLedger, LedgerError,
    Reservation, ReservationLine, ReservationStatus, ReservationTransition, StockLevel,
};
use payment::{PaymentGateway, PaymentOutcome, SimulatedPaymentProvider, WebhookSigner};
use saga::{InMemoryCatalog, OrderItemRequest, SagaCoordinator, SagaError, SagaPolicy};

const SECRET: &str = "test-webhook-secret";

/// Delegates to the in-memory ledger but can fail every `reserve`.
struct ReserveOutage {
    inner: InMemoryInventoryLedger,
    down: Arc<AtomicBool>,
}

#[async_trait]
impl InventoryLedger for ReserveOutage {
    async fn reserve(
        &self,
        order_id: AggregateId,
        lines: &[ReservationLine],
    ) -> inventory::Result<Reservation> {
        if self.down.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("reserve path down".into()));
        }
        self.inner.reserve(order_id, lines).await
    }

    async fn confirm(&self, order_id: AggregateId) -> inventory::Result<Reservation> {
        self.inner.confirm(order_id).await
    }

    async fn release(&self, order_id: AggregateId) -> inventory::Result<Reservation> {
        self.inner.release(order_id).await
    }

    async fn get_reservation(
        &self,
        order_id: AggregateId,
    ) -> inventory::Result<Option<Reservation>> {
        self.inner.get_reservation(order_id).await
    }

    async fn history(
        &self,
        order_id: AggregateId,
    ) -> inventory::Result<Vec<ReservationTransition>> {
        self.inner.history(order_id).await
    }

    async fn restock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> inventory::Result<StockLevel> {
        self.inner.restock(product_id, quantity).await
    }

    async fn stock_level(&self, product_id: &ProductId) -> inventory::Result<StockLevel> {
        self.inner.stock_level(product_id).await
    }

    async fn release_expired(&self) -> inventory::Result<Vec<AggregateId>> {
        self.inner.release_expired().await
    }
}

struct TestHarness {
    saga: SagaCoordinator<InMemoryEventStore>,
    store: InMemoryEventStore,
    ledger: InMemoryInventoryLedger,
    catalog: InMemoryCatalog,
    psp: SimulatedPaymentProvider,
    clock: ManualClock,
    reserve_down: Arc<AtomicBool>,
}

impl TestHarness {
    async fn new() -> Self {
        let store = InMemoryEventStore::new();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let signer = WebhookSigner::new(SECRET).unwrap();
        let psp = SimulatedPaymentProvider::new(signer.clone());
        let gateway = PaymentGateway::with_clock(
            store.clone(),
            Arc::new(psp.clone()),
            signer,
            "http://localhost:3000/payments/webhook",
            shared.clone(),
        );
        let ledger = InMemoryInventoryLedger::with_clock(
            shared.clone(),
            Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        );
        let catalog = InMemoryCatalog::new();

        let retry = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(std::time::Duration::from_millis(1))
            .max_delay(std::time::Duration::from_millis(5))
            .build();
        let reserve_down = Arc::new(AtomicBool::new(false));
        let saga = SagaCoordinator::with_clock(
            store.clone(),
            gateway,
            Arc::new(ReserveOutage {
                inner: ledger.clone(),
                down: reserve_down.clone(),
            }),
            Arc::new(catalog.clone()),
            shared,
        )
        .with_policy(SagaPolicy::default().with_retry(retry));

        catalog
            .set_price("SKU-1", "Kettle", Money::from_minor(2_500))
            .await;
        catalog.set_price("SKU-2", "Mug", Money::from_minor(400)).await;
        ledger.restock(&"SKU-1".into(), 10).await.unwrap();
        ledger.restock(&"SKU-2".into(), 10).await.unwrap();

        Self {
            saga,
            store,
            ledger,
            catalog,
            psp,
            clock,
            reserve_down,
        }
    }

    /// A harness whose payment window ends before the reservation TTL.
    async fn with_payment_window(window: Duration) -> Self {
        let mut h = Self::new().await;
        let policy = h.saga.policy().clone().with_payment_window(window);
        h.saga = h.saga.with_policy(policy);
        h
    }

    fn items() -> Vec<OrderItemRequest> {
        vec![
            OrderItemRequest::new("SKU-1", 2),
            OrderItemRequest::new("SKU-2", 3),
        ]
    }

    async fn create(&self, items: Vec<OrderItemRequest>) -> (AggregateId, UserId) {
        let user_id = UserId::new();
        let order = self.saga.create_order(user_id, items).await.unwrap();
        (order.id().unwrap(), user_id)
    }

    /// An order reserved and awaiting payment.
    async fn pending(&self) -> (AggregateId, UserId) {
        let (order_id, user_id) = self.create(Self::items()).await;
        let order = self.saga.reserve_and_pay(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::PendingPayment);
        (order_id, user_id)
    }

    async fn webhook(&self, order_id: AggregateId, status: PaymentStatus) -> payment::WebhookEvent {
        self.psp
            .webhook(&order_id.to_string(), status)
            .await
            .expect("order was forwarded to the provider")
    }

    async fn available(&self, product: &str) -> u64 {
        self.ledger
            .stock_level(&ProductId::new(product))
            .await
            .unwrap()
            .available
    }

    async fn status(&self, order_id: AggregateId) -> OrderStatus {
        self.saga.orders().get(order_id).await.unwrap().status()
    }

    async fn confirmations(&self, order_id: AggregateId) -> usize {
        self.ledger
            .history(order_id)
            .await
            .unwrap()
            .iter()
            .filter(|t| t.to == ReservationStatus::Confirmed)
            .count()
    }
}

mod creation {
    use super::*;

    #[tokio::test]
    async fn grand_total_is_the_snapshot_sum_and_survives_price_changes() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.create(TestHarness::items()).await;

        h.catalog
            .set_price("SKU-1", "Kettle", Money::from_minor(9_999))
            .await;

        let order = h.saga.orders().get(order_id).await.unwrap();
        let snapshot_sum: i64 = order
            .lines()
            .iter()
            .map(|line| line.line_total().unwrap().minor())
            .sum();
        assert_eq!(order.grand_total(), Money::from_minor(2 * 2_500 + 3 * 400));
        assert_eq!(order.grand_total().minor(), snapshot_sum);
        assert_eq!(order.lines()[0].unit_price, Money::from_minor(2_500));
        assert_eq!(order.status(), OrderStatus::New);
    }

    #[tokio::test]
    async fn empty_and_zero_quantity_orders_are_rejected() {
        let h = TestHarness::new().await;

        let empty = h.saga.create_order(UserId::new(), vec![]).await.unwrap_err();
        let zero = h
            .saga
            .create_order(UserId::new(), vec![OrderItemRequest::new("SKU-1", 0)])
            .await
            .unwrap_err();

        assert_eq!(empty.reason_code(), "validation");
        assert_eq!(zero.reason_code(), "validation");
        assert_eq!(h.store.latest_sequence().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn catalog_failures_abort_creation() {
        let h = TestHarness::new().await;

        let unknown = h
            .saga
            .create_order(UserId::new(), vec![OrderItemRequest::new("SKU-404", 1)])
            .await
            .unwrap_err();
        h.catalog.set_unavailable(true);
        let outage = h
            .saga
            .create_order(UserId::new(), TestHarness::items())
            .await
            .unwrap_err();

        assert!(matches!(unknown, SagaError::Validation(_)));
        assert!(matches!(outage, SagaError::Validation(_)));
        assert_eq!(h.store.latest_sequence().await.unwrap(), 0);
    }
}

mod reservation {
    use super::*;

    #[tokio::test]
    async fn insufficient_stock_cancels_without_payment() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.create(vec![OrderItemRequest::new("SKU-1", 11)]).await;

        let err = h.saga.reserve_and_pay(order_id).await.unwrap_err();

        assert_eq!(err.reason_code(), "out_of_stock");
        let order = h.saga.orders().get(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(order.cancel_reason(), Some(CancelReason::OutOfStock));
        assert!(h.psp.requests().await.is_empty());
        assert!(h.saga.payments().find(order_id).await.unwrap().is_none());
        assert_eq!(h.available("SKU-1").await, 10);
    }

    #[tokio::test]
    async fn two_orders_racing_for_the_last_units_have_one_winner() {
        let h = TestHarness::new().await;
        h.catalog.set_price("SKU-P", "Lamp", Money::from_minor(1_000)).await;
        h.ledger.restock(&"SKU-P".into(), 2).await.unwrap();
        let (a, _) = h.create(vec![OrderItemRequest::new("SKU-P", 2)]).await;
        let (b, _) = h.create(vec![OrderItemRequest::new("SKU-P", 2)]).await;

        let (ra, rb) = tokio::join!(h.saga.reserve_and_pay(a), h.saga.reserve_and_pay(b));

        assert!(ra.is_ok() ^ rb.is_ok());
        let loser = ra.err().or(rb.err()).unwrap();
        assert!(matches!(loser, SagaError::OutOfStock { .. }));
        let statuses = [h.status(a).await, h.status(b).await];
        assert!(statuses.contains(&OrderStatus::PendingPayment));
        assert!(statuses.contains(&OrderStatus::Canceled));
        assert_eq!(h.available("SKU-P").await, 0);
    }

    #[tokio::test]
    async fn retried_reserve_and_pay_reuses_the_payment() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;

        let order = h.saga.reserve_and_pay(order_id).await.unwrap();

        assert_eq!(order.status(), OrderStatus::PendingPayment);
        assert_eq!(h.available("SKU-1").await, 8);
        let requests = h.psp.requests().await;
        assert_eq!(requests.len(), 1);
        let status = h.saga.payment_status(order_id).await.unwrap();
        assert_eq!(
            status.external_id,
            h.psp.reference_for(&order_id.to_string()).await
        );
    }

    #[tokio::test]
    async fn failed_initiation_releases_stock_then_cancels() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.create(TestHarness::items()).await;
        h.psp.set_failing(true);

        let err = h.saga.reserve_and_pay(order_id).await.unwrap_err();

        assert_eq!(err.reason_code(), "payment_unavailable");
        assert!(err.is_transient());
        let order = h.saga.orders().get(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(
            order.cancel_reason(),
            Some(CancelReason::PaymentInitiationFailed)
        );
        let reservation = h.ledger.get_reservation(order_id).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Released);
        assert_eq!(h.available("SKU-1").await, 10);
        assert_eq!(
            h.saga.payment_status(order_id).await.unwrap().status,
            PaymentStatus::Canceled
        );
        // One attempt plus two retries.
        assert_eq!(h.psp.requests().await.len(), 3);
    }
}

mod stuck_orders {
    use super::*;

    /// The only order in the log.
    async fn only_order(h: &TestHarness) -> AggregateId {
        h.store.read_from(0, 1).await.unwrap()[0].aggregate_id
    }

    #[tokio::test]
    async fn reserve_failing_after_retries_cancels_the_order() {
        let h = TestHarness::new().await;
        h.reserve_down.store(true, Ordering::SeqCst);

        let err = h
            .saga
            .submit_order(UserId::new(), TestHarness::items())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        let order_id = only_order(&h).await;
        let order = h.saga.orders().get(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(order.cancel_reason(), Some(CancelReason::SystemError));
        assert!(h.psp.requests().await.is_empty());
        assert_eq!(h.available("SKU-1").await, 10);
    }

    #[tokio::test]
    async fn order_left_new_by_a_ledger_outage_is_canceled_by_the_sweep() {
        let h = TestHarness::new().await;
        h.ledger.set_unavailable(true);

        let err = h
            .saga
            .submit_order(UserId::new(), TestHarness::items())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        let order_id = only_order(&h).await;
        // The release failed too, so the order could not be canceled yet.
        assert_eq!(h.status(order_id).await, OrderStatus::New);

        h.ledger.set_unavailable(false);
        let early = h.saga.run_maintenance().await.unwrap();
        assert_eq!(early.orders_abandoned, 0);
        assert_eq!(h.status(order_id).await, OrderStatus::New);

        h.clock.advance(Duration::minutes(16));
        let report = h.saga.run_maintenance().await.unwrap();

        assert_eq!(report.orders_abandoned, 1);
        let order = h.saga.orders().get(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(order.cancel_reason(), Some(CancelReason::SystemError));
        assert_eq!(h.available("SKU-1").await, 10);

        let again = h.saga.run_maintenance().await.unwrap();
        assert_eq!(again.orders_abandoned, 0);
    }

    #[tokio::test]
    async fn fresh_new_orders_are_not_swept() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.create(TestHarness::items()).await;

        h.clock.advance(Duration::minutes(5));
        let report = h.saga.run_maintenance().await.unwrap();

        assert_eq!(report, saga::MaintenanceReport::default());
        assert_eq!(h.status(order_id).await, OrderStatus::New);
        let order = h.saga.reserve_and_pay(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::PendingPayment);
    }
}

mod webhooks {
    use super::*;

    #[tokio::test]
    async fn captured_payment_confirms_stock_and_pays_order() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        let event = h.webhook(order_id, PaymentStatus::Captured).await;

        let outcome = h.saga.handle_webhook(&event).await.unwrap();

        assert_eq!(outcome.outcome, PaymentOutcome::Succeeded);
        assert!(!outcome.duplicate);
        assert_eq!(h.status(order_id).await, OrderStatus::Paid);
        let level = h.ledger.stock_level(&"SKU-1".into()).await.unwrap();
        assert_eq!((level.on_hand, level.held, level.confirmed), (8, 0, 2));
        assert_eq!(h.confirmations(order_id).await, 1);
    }

    #[tokio::test]
    async fn rejected_payment_restores_stock_and_cancels() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        let event = h.webhook(order_id, PaymentStatus::Rejected).await;

        let outcome = h.saga.handle_webhook(&event).await.unwrap();

        assert!(matches!(outcome.outcome, PaymentOutcome::Failed { .. }));
        let order = h.saga.orders().get(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(order.cancel_reason(), Some(CancelReason::PaymentRejected));
        let reservation = h.ledger.get_reservation(order_id).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Released);
        assert_eq!(h.available("SKU-1").await, 10);
        assert_eq!(h.available("SKU-2").await, 10);

        let types: Vec<_> = h
            .store
            .get_events_for_aggregate(order_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            &types[types.len() - 2..],
            &[OrderEvent::PAYMENT_FAILED, OrderEvent::CANCELED]
        );
    }

    #[tokio::test]
    async fn replayed_event_is_applied_once() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        let event = h.webhook(order_id, PaymentStatus::Captured).await;

        let first = h.saga.handle_webhook(&event).await.unwrap();
        let version = h.saga.orders().get(order_id).await.unwrap().version();
        let second = h.saga.handle_webhook(&event).await.unwrap();

        assert!(second.duplicate);
        assert_eq!(second.outcome, first.outcome);
        assert_eq!(h.status(order_id).await, OrderStatus::Paid);
        assert_eq!(
            h.saga.orders().get(order_id).await.unwrap().version(),
            version
        );
        assert_eq!(h.confirmations(order_id).await, 1);
    }

    #[tokio::test]
    async fn capture_after_authorization_changes_nothing_on_the_order() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;

        let authorized = h.webhook(order_id, PaymentStatus::Authorized).await;
        h.saga.handle_webhook(&authorized).await.unwrap();
        let version = h.saga.orders().get(order_id).await.unwrap().version();

        let captured = h.webhook(order_id, PaymentStatus::Captured).await;
        let outcome = h.saga.handle_webhook(&captured).await.unwrap();

        assert_eq!(outcome.status, PaymentStatus::Captured);
        assert_eq!(h.status(order_id).await, OrderStatus::Paid);
        assert_eq!(
            h.saga.orders().get(order_id).await.unwrap().version(),
            version
        );
        assert_eq!(h.confirmations(order_id).await, 1);
    }

    #[tokio::test]
    async fn bad_signature_changes_nothing() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        let mut event = h.webhook(order_id, PaymentStatus::Captured).await;
        event.amount += 1;
        let before = h.store.latest_sequence().await.unwrap();

        let err = h.saga.handle_webhook(&event).await.unwrap_err();

        assert_eq!(err.reason_code(), "invalid_signature");
        assert_eq!(h.store.latest_sequence().await.unwrap(), before);
        assert_eq!(h.status(order_id).await, OrderStatus::PendingPayment);
        let reservation = h.ledger.get_reservation(order_id).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Held);
    }
}

mod maintenance {
    use super::*;

    #[tokio::test]
    async fn abandoned_order_times_out_and_late_webhook_is_a_no_op() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        let late = h.webhook(order_id, PaymentStatus::Captured).await;

        h.clock.advance(Duration::minutes(16));
        let report = h.saga.run_maintenance().await.unwrap();

        assert_eq!(report.reservations_released, 1);
        assert_eq!(report.orders_timed_out, 1);
        let order = h.saga.orders().get(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(order.cancel_reason(), Some(CancelReason::PaymentTimeout));
        assert_eq!(h.available("SKU-1").await, 10);

        let version = order.version();
        let outcome = h.saga.handle_webhook(&late).await.unwrap();

        assert_eq!(outcome.status, PaymentStatus::Canceled);
        assert_eq!(h.status(order_id).await, OrderStatus::Canceled);
        assert_eq!(
            h.saga.orders().get(order_id).await.unwrap().version(),
            version
        );
        assert_eq!(h.confirmations(order_id).await, 0);
        assert_eq!(h.available("SKU-1").await, 10);
    }

    #[tokio::test]
    async fn orders_inside_their_window_are_left_alone() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;

        h.clock.advance(Duration::minutes(5));
        let report = h.saga.run_maintenance().await.unwrap();

        assert_eq!(report, saga::MaintenanceReport::default());
        assert_eq!(h.status(order_id).await, OrderStatus::PendingPayment);
    }

    #[tokio::test]
    async fn settled_payment_with_stale_order_is_reconciled() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        // The gateway recorded the capture but the order step never ran.
        let event = h.webhook(order_id, PaymentStatus::Captured).await;
        h.saga.payments().handle_webhook(&event).await.unwrap();
        assert_eq!(h.status(order_id).await, OrderStatus::PendingPayment);

        let report = h.saga.run_maintenance().await.unwrap();

        assert_eq!(report.orders_reconciled, 1);
        assert_eq!(h.status(order_id).await, OrderStatus::Paid);
        assert_eq!(h.confirmations(order_id).await, 1);

        let again = h.saga.run_maintenance().await.unwrap();
        assert_eq!(again.orders_reconciled, 0);
    }
}

mod races {
    use super::*;

    impl TestHarness {
        /// Holds that left `Held` for the order, either way.
        async fn settlements(&self, order_id: AggregateId) -> usize {
            self.ledger
                .history(order_id)
                .await
                .unwrap()
                .iter()
                .filter(|t| t.from == Some(ReservationStatus::Held))
                .count()
        }

        async fn terminal_events(&self, order_id: AggregateId) -> usize {
            self.store
                .get_events_for_aggregate(order_id)
                .await
                .unwrap()
                .iter()
                .filter(|e| {
                    e.event_type == OrderEvent::PAID || e.event_type == OrderEvent::CANCELED
                })
                .count()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_sweep_and_failure_webhook_release_once() {
        let h = TestHarness::with_payment_window(Duration::minutes(5)).await;
        let (order_id, _) = h.pending().await;
        let rejected = h.webhook(order_id, PaymentStatus::Rejected).await;
        h.clock.advance(Duration::minutes(6));

        let (swept, delivered) =
            tokio::join!(h.saga.run_maintenance(), h.saga.handle_webhook(&rejected));

        let report = swept.unwrap();
        delivered.unwrap();
        assert_eq!(report.reservations_released, 0);
        assert_eq!(h.status(order_id).await, OrderStatus::Canceled);
        assert_eq!(h.settlements(order_id).await, 1);
        assert_eq!(h.terminal_events(order_id).await, 1);
        assert_eq!(h.available("SKU-1").await, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_failure_webhooks_release_once() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        let rejected = h.webhook(order_id, PaymentStatus::Rejected).await;
        let failed = h.webhook(order_id, PaymentStatus::Failed).await;
        assert_ne!(rejected.event_id, failed.event_id);

        let (first, second) = tokio::join!(
            h.saga.handle_webhook(&rejected),
            h.saga.handle_webhook(&failed)
        );

        assert!(!first.unwrap().duplicate);
        assert!(!second.unwrap().duplicate);
        let order = h.saga.orders().get(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(order.cancel_reason(), Some(CancelReason::PaymentRejected));
        assert_eq!(h.settlements(order_id).await, 1);
        assert_eq!(h.terminal_events(order_id).await, 1);
        assert_eq!(h.available("SKU-1").await, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_capture_webhooks_confirm_once() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        let first = h.webhook(order_id, PaymentStatus::Captured).await;
        let second = h.webhook(order_id, PaymentStatus::Captured).await;

        let (a, b) = tokio::join!(h.saga.handle_webhook(&first), h.saga.handle_webhook(&second));

        a.unwrap();
        b.unwrap();
        assert_eq!(h.status(order_id).await, OrderStatus::Paid);
        assert_eq!(h.confirmations(order_id).await, 1);
        assert_eq!(h.settlements(order_id).await, 1);
        assert_eq!(h.terminal_events(order_id).await, 1);
        assert_eq!(h.available("SKU-1").await, 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_sweeps_time_out_an_order_once() {
        let h = TestHarness::with_payment_window(Duration::minutes(5)).await;
        let (order_id, _) = h.pending().await;
        h.clock.advance(Duration::minutes(6));

        let (a, b) = tokio::join!(h.saga.run_maintenance(), h.saga.run_maintenance());

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.orders_timed_out + b.orders_timed_out, 1);
        let order = h.saga.orders().get(order_id).await.unwrap();
        assert_eq!(order.cancel_reason(), Some(CancelReason::PaymentTimeout));
        assert_eq!(h.settlements(order_id).await, 1);
        assert_eq!(h.terminal_events(order_id).await, 1);
    }
}

mod queries {
    use super::*;

    #[tokio::test]
    async fn only_the_owner_sees_the_order() {
        let h = TestHarness::new().await;
        let (order_id, user_id) = h.pending().await;

        let order = h.saga.get_status(user_id, order_id).await.unwrap();
        let stranger = h
            .saga
            .get_status(UserId::new(), order_id)
            .await
            .unwrap_err();
        let missing = h
            .saga
            .get_status(user_id, AggregateId::new())
            .await
            .unwrap_err();

        assert_eq!(order.status(), OrderStatus::PendingPayment);
        assert_eq!(stranger.reason_code(), "forbidden");
        assert_eq!(missing.reason_code(), "not_found");
    }

    #[tokio::test]
    async fn paid_order_ships_and_delivers() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;
        let event = h.webhook(order_id, PaymentStatus::Captured).await;
        h.saga.handle_webhook(&event).await.unwrap();

        let shipped = h
            .saga
            .mark_shipped(order_id, "TRK-1".into(), None)
            .await
            .unwrap();
        assert_eq!(shipped.tracking_number(), Some("TRK-1"));

        let stale = h
            .saga
            .mark_delivered(order_id, Some(Version::new(shipped.version().as_i64() - 1)))
            .await
            .unwrap_err();
        assert!(stale.is_conflict());

        let delivered = h.saga.mark_delivered(order_id, None).await.unwrap();
        assert_eq!(delivered.status(), OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn unpaid_order_cannot_ship() {
        let h = TestHarness::new().await;
        let (order_id, _) = h.pending().await;

        let err = h
            .saga
            .mark_shipped(order_id, "TRK-1".into(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SagaError::InvalidTransition {
                status: OrderStatus::PendingPayment,
                ..
            }
        ));
    }
}
