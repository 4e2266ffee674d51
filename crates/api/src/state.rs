//! Wiring: picks backends from the configuration and assembles the saga.

use std::sync::Arc;

use common::SystemClock;
use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use inventory::{InMemoryInventoryLedger, InventoryLedger, PostgresInventoryLedger};
use outbox::{
    CheckpointStore, HttpSubscriber, InMemoryCheckpointStore, LogSubscriber, OutboxError,
    OutboxRelay, PostgresCheckpointStore, Subscriber,
};
use payment::{
    HttpPaymentProvider, PaymentError, PaymentGateway, PaymentProvider, SimulatedPaymentProvider,
    WebhookSigner,
};
use saga::{InMemoryCatalog, SagaCoordinator, SagaPolicy};
use sqlx::PgPool;
use thiserror::Error;

use crate::config::Config;

/// The event store as chosen at startup.
pub type SharedStore = Arc<dyn EventStore>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub saga: SagaCoordinator<SharedStore>,
    pub ledger: Arc<dyn InventoryLedger>,
    pub catalog: Arc<InMemoryCatalog>,
    pub storage: &'static str,
    pub payment_provider: &'static str,
}

/// Everything `main` needs: handler state plus the background relay.
pub struct Components {
    pub state: Arc<AppState>,
    pub relay: Arc<OutboxRelay<SharedStore>>,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("event store: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("payment provider: {0}")]
    Payment(#[from] PaymentError),

    #[error("outbox subscriber: {0}")]
    Subscriber(#[from] OutboxError),
}

/// Builds the components described by `config`.
///
/// With `DATABASE_URL` set the event store, ledger and outbox checkpoints
/// live in PostgreSQL and migrations are applied first. With `PSP_BASE_URL`
/// set payments go to the real provider over HTTP. `SHIPPING_URL` and
/// `NOTIFICATION_URL` point the relay at the downstream services.
pub async fn build(config: &Config) -> Result<Components, StartupError> {
    let signer = WebhookSigner::new(&config.webhook_secret)?;
    let provider: Arc<dyn PaymentProvider> = match &config.psp_base_url {
        Some(base_url) => Arc::new(HttpPaymentProvider::new(base_url.as_str())?),
        None => Arc::new(SimulatedPaymentProvider::new(signer.clone())),
    };
    let provider_name = if config.psp_base_url.is_some() {
        "http"
    } else {
        "simulated"
    };
    let subscribers = downstream_subscribers(config)?;

    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await?;
            let store = PostgresEventStore::new(pool.clone());
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL backends");

            let ledger = Arc::new(PostgresInventoryLedger::with_clock(
                pool.clone(),
                Arc::new(SystemClock),
                config.reservation_ttl(),
            ));
            Ok(assemble(
                config,
                Backends {
                    store: Arc::new(store),
                    ledger,
                    checkpoints: Arc::new(PostgresCheckpointStore::new(pool)),
                    storage: "postgres",
                },
                (provider, provider_name),
                signer,
                subscribers,
            ))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory backends");
            Ok(assemble(
                config,
                Backends::in_memory(config),
                (provider, provider_name),
                signer,
                subscribers,
            ))
        }
    }
}

/// In-memory components around a given provider and subscribers; used by
/// tests.
pub fn in_memory(
    config: &Config,
    provider: Arc<dyn PaymentProvider>,
    subscribers: Vec<Arc<dyn Subscriber>>,
) -> Result<Components, StartupError> {
    let signer = WebhookSigner::new(&config.webhook_secret)?;
    Ok(assemble(
        config,
        Backends::in_memory(config),
        (provider, "custom"),
        signer,
        subscribers,
    ))
}

/// Shipping and notification subscribers: HTTP where a URL is configured,
/// log-only otherwise.
fn downstream_subscribers(config: &Config) -> Result<Vec<Arc<dyn Subscriber>>, StartupError> {
    let shipping: Arc<dyn Subscriber> = match &config.shipping_url {
        Some(url) => Arc::new(HttpSubscriber::shipping(url.as_str())?),
        None => {
            tracing::info!("SHIPPING_URL not set, paid orders are only logged");
            Arc::new(LogSubscriber::shipping())
        }
    };
    let notifications: Arc<dyn Subscriber> = match &config.notification_url {
        Some(url) => Arc::new(HttpSubscriber::notifications(url.as_str())?),
        None => {
            tracing::info!("NOTIFICATION_URL not set, notifications are only logged");
            Arc::new(LogSubscriber::notifications())
        }
    };
    Ok(vec![shipping, notifications])
}

struct Backends {
    store: SharedStore,
    ledger: Arc<dyn InventoryLedger>,
    checkpoints: Arc<dyn CheckpointStore>,
    storage: &'static str,
}

impl Backends {
    fn in_memory(config: &Config) -> Self {
        Self {
            store: Arc::new(InMemoryEventStore::new()),
            ledger: Arc::new(InMemoryInventoryLedger::with_clock(
                Arc::new(SystemClock),
                config.reservation_ttl(),
            )),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            storage: "memory",
        }
    }
}

fn assemble(
    config: &Config,
    backends: Backends,
    (provider, payment_provider): (Arc<dyn PaymentProvider>, &'static str),
    signer: WebhookSigner,
    subscribers: Vec<Arc<dyn Subscriber>>,
) -> Components {
    let Backends {
        store,
        ledger,
        checkpoints,
        storage,
    } = backends;
    let catalog = Arc::new(InMemoryCatalog::new());
    let callback_url = config.callback_url.as_str();
    let payments = PaymentGateway::new(store.clone(), provider, signer, callback_url);
    let policy = SagaPolicy::default()
        .with_payment_window(config.payment_window())
        .with_stale_order_after(config.reservation_ttl())
        .with_currency(config.currency.as_str());
    let saga = SagaCoordinator::new(store.clone(), payments, ledger.clone(), catalog.clone())
        .with_policy(policy);

    let mut relay = OutboxRelay::new(store, checkpoints);
    for subscriber in subscribers {
        relay.register(subscriber);
    }

    Components {
        state: Arc::new(AppState {
            saga,
            ledger,
            catalog,
            storage,
            payment_provider,
        }),
        relay: Arc::new(relay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relay_gets_shipping_and_notification_subscribers() {
        let config = Config::default();

        let components = build(&config).await.unwrap();

        assert_eq!(components.relay.subscriber_count(), 2);
        assert_eq!(components.state.storage, "memory");
        assert_eq!(components.state.payment_provider, "simulated");
    }

    #[tokio::test]
    async fn configured_urls_select_http_subscribers() {
        let config = Config {
            shipping_url: Some("http://warehouse.local/intake".into()),
            notification_url: Some("http://notify.local/send".into()),
            ..Config::default()
        };

        let subscribers = downstream_subscribers(&config).unwrap();

        let names: Vec<_> = subscribers.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["shipping", "notifications"]);
        assert!(subscribers[0].wants(outbox::ORDER_PAID));
        assert!(!subscribers[0].wants(outbox::ORDER_CANCELED));
    }
}
