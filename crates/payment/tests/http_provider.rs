//! `HttpPaymentProvider` against a local axum stand-in for the PSP.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use payment::{HttpPaymentProvider, PaymentProvider, ProviderReceipt, ProviderRequest};
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct Psp {
    calls: Arc<AtomicUsize>,
}

async fn initiate(
    State(psp): State<Psp>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    psp.calls.fetch_add(1, Ordering::SeqCst);
    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match body["order_id"].as_str() {
        Some("boom") => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "down"})),
        ),
        Some("bad") => (StatusCode::BAD_REQUEST, Json(json!({"error": "bad"}))),
        _ => (
            StatusCode::OK,
            Json(json!({"payment_id": format!("psp-{key}")})),
        ),
    }
}

async fn spawn_psp() -> (String, Psp) {
    let psp = Psp::default();
    let app = Router::new()
        .route("/initiate", post(initiate))
        .with_state(psp.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), psp)
}

fn request(order_id: &str) -> ProviderRequest {
    ProviderRequest {
        amount: 2_500,
        currency: "RUB".into(),
        order_id: order_id.into(),
        callback_url: "http://localhost:3000/payments/webhook".into(),
        description: "Order".into(),
        idempotency_key: format!("key-{order_id}"),
    }
}

#[tokio::test]
async fn posts_initiate_and_reads_the_reference() {
    let (base, psp) = spawn_psp().await;
    let provider = HttpPaymentProvider::new(base).unwrap();

    let receipt = provider.initiate(&request("o-1")).await.unwrap();

    assert_eq!(
        receipt,
        ProviderReceipt {
            payment_id: "psp-key-o-1".into()
        }
    );
    assert_eq!(psp.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_transient_client_errors_are_not() {
    let (base, _) = spawn_psp().await;
    let provider = HttpPaymentProvider::new(base).unwrap();

    assert!(provider.initiate(&request("boom")).await.unwrap_err().is_transient());
    assert!(!provider.initiate(&request("bad")).await.unwrap_err().is_transient());
}

#[tokio::test]
async fn unreachable_provider_is_transient() {
    let provider = HttpPaymentProvider::new("http://127.0.0.1:9").unwrap();
    assert!(provider.initiate(&request("o-1")).await.unwrap_err().is_transient());
}
