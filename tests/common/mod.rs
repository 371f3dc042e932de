#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use money_movement::events::EventEmitter;
use money_movement::messaging::InMemoryPublisher;
use money_movement::metrics::Metrics;
use money_movement::models::{AccountType, WalletType};
use money_movement::relay::{OutboxRelay, RelayConfig};
use money_movement::store::MemoryStore;
use money_movement::health::HealthRegistry;
use money_movement::utils::RetryConfig;
use money_movement::MoneyMovementEngine;

pub const CUSTOMER: &str = "customer-1";
pub const MERCHANT: &str = "merchant-1";

/// A customer with 10000 cents to spend and a merchant with an empty till
pub struct Harness {
    pub store: MemoryStore,
    pub publisher: InMemoryPublisher,
    pub metrics: Arc<Metrics>,
    pub emitter: Arc<EventEmitter>,
    pub engine: Arc<MoneyMovementEngine>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_balance(10_000).await
    }

    pub async fn with_balance(default_cents: i64) -> Self {
        let store = MemoryStore::new();
        store
            .provision_wallet(
                CUSTOMER,
                WalletType::Customer,
                &[(AccountType::Default, default_cents), (AccountType::Payment, 0)],
            )
            .await;
        store
            .provision_wallet(MERCHANT, WalletType::Merchant, &[(AccountType::Incoming, 0)])
            .await;

        let publisher = InMemoryPublisher::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let emitter = Arc::new(EventEmitter::new(
            Arc::new(publisher.clone()),
            Arc::new(store.clone()),
            metrics.clone(),
        ));
        let engine = Arc::new(MoneyMovementEngine::new(
            Arc::new(store.clone()),
            emitter.clone(),
            metrics.clone(),
        ));

        Self {
            store,
            publisher,
            metrics,
            emitter,
            engine,
        }
    }

    pub fn relay(&self, max_attempts: i32) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(self.store.clone()),
            self.emitter.clone(),
            self.metrics.clone(),
            HealthRegistry::new(),
            RelayConfig {
                min_age: Duration::ZERO,
                max_attempts,
                retry: RetryConfig {
                    max_attempts: 1,
                    ..RetryConfig::default()
                },
                ..RelayConfig::default()
            },
        )
    }

    pub async fn balance(&self, user_id: &str, account_type: AccountType) -> i64 {
        self.store.balance(user_id, account_type).await.unwrap()
    }

    /// (customer DEFAULT, customer PAYMENT, merchant INCOMING)
    pub async fn balances(&self) -> (i64, i64, i64) {
        (
            self.balance(CUSTOMER, AccountType::Default).await,
            self.balance(CUSTOMER, AccountType::Payment).await,
            self.balance(MERCHANT, AccountType::Incoming).await,
        )
    }

    pub async fn total(&self) -> i64 {
        let (default, payment, incoming) = self.balances().await;
        default + payment + incoming
    }
}
