//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::config::Config;
use api::state::Components;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::{PaymentStatus, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{InMemoryNotifier, InMemoryShippingIntake, Subscriber};
use payment::{SimulatedPaymentProvider, WebhookSigner};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: Router,
    components: Components,
    psp: SimulatedPaymentProvider,
    shipping: InMemoryShippingIntake,
    notifier: InMemoryNotifier,
}

impl TestApp {
    fn new() -> Self {
        let config = Config::default();
        let signer = WebhookSigner::new(&config.webhook_secret).unwrap();
        let psp = SimulatedPaymentProvider::new(signer);
        let shipping = InMemoryShippingIntake::new();
        let notifier = InMemoryNotifier::new();
        let subscribers: Vec<Arc<dyn Subscriber>> =
            vec![Arc::new(shipping.clone()), Arc::new(notifier.clone())];
        let components =
            api::state::in_memory(&config, Arc::new(psp.clone()), subscribers).unwrap();
        let app = api::create_app(components.state.clone(), get_metrics_handle());
        Self {
            app,
            components,
            psp,
            shipping,
            notifier,
        }
    }

    /// A kettle priced 2500 with `stock` units on hand.
    async fn stocked(stock: u32) -> Self {
        let app = Self::new();
        let (status, _) = app
            .send("PUT", "/catalog/SKU-1", Some(json!({ "name": "Kettle", "unit_price": 2500 })))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .send("PUT", "/inventory/SKU-1", Some(json!({ "quantity": stock })))
            .await;
        assert_eq!(status, StatusCode::OK);
        app
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn submit(&self, user_id: UserId, quantity: u32) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/orders",
            Some(json!({
                "user_id": user_id,
                "items": [{ "product_id": "SKU-1", "quantity": quantity }]
            })),
        )
        .await
    }

    async fn webhook(&self, order_id: &str, status: PaymentStatus) -> (StatusCode, Value) {
        let event = self.psp.webhook(order_id, status).await.unwrap();
        self.send("POST", "/payments/webhook", Some(serde_json::to_value(event).unwrap()))
            .await
    }

    async fn order(&self, order_id: &str, user_id: UserId) -> Value {
        let (status, body) = self
            .send("GET", &format!("/orders/{order_id}?user_id={user_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, json) = app.send("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();

    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn submitted_order_awaits_payment_with_held_stock() {
    let app = TestApp::stocked(10).await;
    let user_id = UserId::new();

    let (status, order) = app.submit(user_id, 3).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "PendingPayment");
    assert_eq!(order["grand_total"], 7500);
    assert_eq!(order["lines"][0]["product_name"], "Kettle");

    let (_, stock) = app.send("GET", "/inventory/SKU-1", None).await;
    assert_eq!(stock["held"], 3);
    assert_eq!(stock["available"], 7);
}

#[tokio::test]
async fn captured_payment_marks_order_paid_and_ships() {
    let app = TestApp::stocked(10).await;
    let user_id = UserId::new();
    let (_, order) = app.submit(user_id, 2).await;
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let (status, outcome) = app.webhook(&order_id, PaymentStatus::Captured).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["duplicate"], false);

    let order = app.order(&order_id, user_id).await;
    assert_eq!(order["status"], "Paid");

    let (status, payment) = app.send("GET", &format!("/payments/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "captured");
    assert_eq!(payment["amount"], 5000);
    assert_eq!(payment["currency"], "RUB");

    let (_, stock) = app.send("GET", "/inventory/SKU-1", None).await;
    assert_eq!(stock["held"], 0);
    assert_eq!(stock["on_hand"], 8);

    let report = app.components.relay.run_once().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(app.shipping.shipments().await.len(), 1);
}

#[tokio::test]
async fn rejected_payment_cancels_and_restores_stock() {
    let app = TestApp::stocked(5).await;
    let user_id = UserId::new();
    let (_, order) = app.submit(user_id, 5).await;
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let (status, _) = app.webhook(&order_id, PaymentStatus::Rejected).await;
    assert_eq!(status, StatusCode::OK);

    let order = app.order(&order_id, user_id).await;
    assert_eq!(order["status"], "Canceled");
    assert_eq!(order["cancel_reason"], "payment_rejected");

    let (_, stock) = app.send("GET", "/inventory/SKU-1", None).await;
    assert_eq!(stock["available"], 5);

    app.components.relay.run_once().await.unwrap();
    assert!(app.shipping.shipments().await.is_empty());
    assert_eq!(app.notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn out_of_stock_is_unprocessable() {
    let app = TestApp::stocked(1).await;

    let (status, body) = app.submit(UserId::new(), 2).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["reason"], "out_of_stock");
}

#[tokio::test]
async fn unknown_product_is_a_validation_error() {
    let app = TestApp::new();

    let (status, body) = app.submit(UserId::new(), 1).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "validation");
}

#[tokio::test]
async fn order_is_only_visible_to_its_owner() {
    let app = TestApp::stocked(10).await;
    let (_, order) = app.submit(UserId::new(), 1).await;
    let order_id = order["order_id"].as_str().unwrap();

    let (status, body) = app
        .send("GET", &format!("/orders/{order_id}?user_id={}", UserId::new()), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "forbidden");

    let (status, _) = app.send("GET", &format!("/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(
            "GET",
            &format!("/orders/{}?user_id={}", uuid::Uuid::new_v4(), UserId::new()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["reason"], "not_found");
}

#[tokio::test]
async fn tampered_webhook_is_rejected() {
    let app = TestApp::stocked(10).await;
    let user_id = UserId::new();
    let (_, order) = app.submit(user_id, 1).await;
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let mut event = app.psp.webhook(&order_id, PaymentStatus::Captured).await.unwrap();
    event.amount = 1;
    let (status, body) = app
        .send("POST", "/payments/webhook", Some(serde_json::to_value(event).unwrap()))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "invalid_signature");
    assert_eq!(app.order(&order_id, user_id).await["status"], "PendingPayment");
}

#[tokio::test]
async fn webhook_with_separator_in_a_field_is_rejected() {
    let app = TestApp::stocked(10).await;
    let user_id = UserId::new();
    let (_, order) = app.submit(user_id, 1).await;
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let mut event = app.psp.webhook(&order_id, PaymentStatus::Captured).await.unwrap();
    event.event_id = format!("{}|x", event.event_id);
    event.signature = WebhookSigner::new(&Config::default().webhook_secret)
        .unwrap()
        .sign(&event);
    let (status, body) = app
        .send("POST", "/payments/webhook", Some(serde_json::to_value(event).unwrap()))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "invalid_signature");
    assert_eq!(app.order(&order_id, user_id).await["status"], "PendingPayment");
}

#[tokio::test]
async fn malformed_webhook_is_a_bad_request() {
    let app = TestApp::new();

    let (status, body) = app
        .send("POST", "/payments/webhook", Some(json!({ "event_id": "evt_1" })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "validation");
}

#[tokio::test]
async fn repeated_webhook_is_acknowledged_once() {
    let app = TestApp::stocked(10).await;
    let (_, order) = app.submit(UserId::new(), 1).await;
    let order_id = order["order_id"].as_str().unwrap().to_string();
    let event = app.psp.webhook(&order_id, PaymentStatus::Captured).await.unwrap();
    let body = serde_json::to_value(event).unwrap();

    let (first, _) = app.send("POST", "/payments/webhook", Some(body.clone())).await;
    let (second, replay) = app.send("POST", "/payments/webhook", Some(body)).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(replay["duplicate"], true);
}

#[tokio::test]
async fn paid_order_ships_then_delivers() {
    let app = TestApp::stocked(10).await;
    let user_id = UserId::new();
    let (_, order) = app.submit(user_id, 1).await;
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/ship"),
            Some(json!({ "tracking_number": "TRK-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "conflict");

    app.webhook(&order_id, PaymentStatus::Captured).await;
    let paid = app.order(&order_id, user_id).await;
    let version = paid["version"].as_i64().unwrap();

    let (status, shipped) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/ship"),
            Some(json!({ "tracking_number": "TRK-1", "expected_version": version })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shipped["status"], "Shipped");
    assert_eq!(shipped["tracking_number"], "TRK-1");

    let (status, _) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/deliver"),
            Some(json!({ "expected_version": version })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, delivered) = app
        .send("POST", &format!("/orders/{order_id}/deliver"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivered["status"], "Delivered");
}

#[tokio::test]
async fn catalog_rejects_non_positive_prices() {
    let app = TestApp::new();

    let (status, body) = app
        .send("PUT", "/catalog/SKU-9", Some(json!({ "name": "Free", "unit_price": 0 })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "validation");
}
