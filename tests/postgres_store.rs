//! Runs against a real database:
//! `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`

use std::sync::Arc;

use chrono::Utc;

use money_movement::events::EventEmitter;
use money_movement::messaging::InMemoryPublisher;
use money_movement::metrics::Metrics;
use money_movement::models::{AccountType, NewLedgerEntry, PaymentStage};
use money_movement::store::{PostgresStore, Store};
use money_movement::{ErrorKind, MoneyMovementEngine, MoneyMovementError};

async fn store() -> PostgresStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let store = PostgresStore::connect(&url, 5).await.unwrap();
    store.migrate().await.unwrap();
    store
}

/// Fresh customer and merchant; returns their user ids
async fn provision(store: &PostgresStore, customer_cents: i64) -> (String, String) {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let customer = format!("customer-{}", suffix);
    let merchant = format!("merchant-{}", suffix);

    let customer_wallet: i64 =
        sqlx::query_scalar("INSERT INTO wallet (user_id, wallet_type) VALUES ($1, 'CUSTOMER') RETURNING id")
            .bind(&customer)
            .fetch_one(store.pool())
            .await
            .unwrap();
    let merchant_wallet: i64 =
        sqlx::query_scalar("INSERT INTO wallet (user_id, wallet_type) VALUES ($1, 'MERCHANT') RETURNING id")
            .bind(&merchant)
            .fetch_one(store.pool())
            .await
            .unwrap();

    for (wallet_id, account_type, cents) in [
        (customer_wallet, "DEFAULT", customer_cents),
        (customer_wallet, "PAYMENT", 0),
        (merchant_wallet, "INCOMING", 0),
    ] {
        sqlx::query("INSERT INTO account (wallet_id, account_type, cents) VALUES ($1, $2, $3)")
            .bind(wallet_id)
            .bind(account_type)
            .bind(cents)
            .execute(store.pool())
            .await
            .unwrap();
    }

    (customer, merchant)
}

async fn balance(store: &PostgresStore, user_id: &str, account_type: AccountType) -> i64 {
    sqlx::query_scalar(
        "SELECT a.cents FROM account a JOIN wallet w ON w.id = a.wallet_id \
         WHERE w.user_id = $1 AND a.account_type = $2",
    )
    .bind(user_id)
    .bind(account_type.as_str())
    .fetch_one(store.pool())
    .await
    .unwrap()
}

fn engine(store: &PostgresStore, publisher: &InMemoryPublisher) -> Arc<MoneyMovementEngine> {
    let store: Arc<dyn Store> = Arc::new(store.clone());
    let metrics = Arc::new(Metrics::new().unwrap());
    let emitter = Arc::new(EventEmitter::new(Arc::new(publisher.clone()), store.clone(), metrics.clone()));
    Arc::new(MoneyMovementEngine::new(store, emitter, metrics))
}

#[tokio::test]
#[ignore]
async fn test_postgres_authorize_and_capture() {
    let store = store().await;
    let publisher = InMemoryPublisher::new();
    let (customer, merchant) = provision(&store, 10_000).await;
    let engine = engine(&store, &publisher);

    let pid = engine.authorize(&customer, &merchant, 2500, "USD").await.unwrap();
    assert_eq!(balance(&store, &customer, AccountType::Default).await, 7500);
    assert_eq!(balance(&store, &customer, AccountType::Payment).await, 2500);

    engine.capture(&pid).await.unwrap();
    assert_eq!(balance(&store, &customer, AccountType::Payment).await, 0);
    assert_eq!(balance(&store, &merchant, AccountType::Incoming).await, 2500);
    assert_eq!(publisher.published().await.len(), 2);

    let mut uow = store.begin().await.unwrap();
    let authorized = uow.entry(&pid, PaymentStage::Authorized).await.unwrap().unwrap();
    assert_eq!(authorized.src_account_type, AccountType::Default);
    uow.rollback().await.unwrap();

    let err = engine.capture(&pid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert_eq!(balance(&store, &merchant, AccountType::Incoming).await, 2500);
}

#[tokio::test]
#[ignore]
async fn test_postgres_concurrent_authorizations() {
    let store = store().await;
    let publisher = InMemoryPublisher::new();
    let (customer, merchant) = provision(&store, 10_000).await;
    let engine = engine(&store, &publisher);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let customer = customer.clone();
            let merchant = merchant.clone();
            tokio::spawn(async move { engine.authorize(&customer, &merchant, 6000, "USD").await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(balance(&store, &customer, AccountType::Default).await, 4000);
    assert_eq!(balance(&store, &customer, AccountType::Payment).await, 6000);
}

#[tokio::test]
#[ignore]
async fn test_postgres_outbox_lifecycle() {
    let store = store().await;
    let publisher = InMemoryPublisher::new();
    publisher.fail_topic("email").await;
    let (customer, merchant) = provision(&store, 1000).await;
    let engine = engine(&store, &publisher);

    let pid = engine.authorize(&customer, &merchant, 400, "USD").await.unwrap();
    engine.capture(&pid).await.unwrap();

    let pending = store.pending_outbox(Utc::now(), 1000).await.unwrap();
    let ours: Vec<_> = pending.iter().filter(|m| m.pid == pid).collect();
    assert_eq!(ours.len(), 1);
    assert_eq!(ours[0].topic, "email");
    assert_eq!(ours[0].attempts, 1);

    store.record_delivery_failure(ours[0].id, "still down", true).await.unwrap();
    let pending = store.pending_outbox(Utc::now(), 1000).await.unwrap();
    assert!(pending.iter().all(|m| m.pid != pid));
}

#[tokio::test]
#[ignore]
async fn test_postgres_concurrent_captures() {
    let store = store().await;
    let publisher = InMemoryPublisher::new();
    let (customer, merchant) = provision(&store, 10_000).await;
    let engine = engine(&store, &publisher);

    let pid = engine.authorize(&customer, &merchant, 3000, "USD").await.unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let pid = pid.clone();
            tokio::spawn(async move { engine.capture(&pid).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut aborted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(e) if e.kind() == ErrorKind::Aborted => aborted += 1,
            Err(e) => panic!("unexpected capture error: {}", e),
        }
    }

    assert_eq!((succeeded, aborted), (1, 1));
    assert_eq!(balance(&store, &customer, AccountType::Payment).await, 0);
    assert_eq!(balance(&store, &merchant, AccountType::Incoming).await, 3000);
}

#[tokio::test]
#[ignore]
async fn test_postgres_duplicate_captured_row_is_rejected() {
    let store = store().await;
    let publisher = InMemoryPublisher::new();
    let (customer, merchant) = provision(&store, 1000).await;
    let engine = engine(&store, &publisher);

    let pid = engine.authorize(&customer, &merchant, 200, "USD").await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let authorized = uow.entry(&pid, PaymentStage::Authorized).await.unwrap().unwrap();
    let captured = NewLedgerEntry {
        pid: authorized.pid.clone(),
        stage: PaymentStage::Captured,
        src_user_id: authorized.src_user_id.clone(),
        dst_user_id: authorized.dst_user_id.clone(),
        src_wallet_id: authorized.src_wallet_id,
        dst_wallet_id: authorized.final_dst_merchant_wallet_id,
        src_account_type: AccountType::Payment,
        dst_account_type: AccountType::Incoming,
        final_dst_merchant_wallet_id: authorized.final_dst_merchant_wallet_id,
        amount: authorized.amount,
    };

    uow.append_entry(captured.clone()).await.unwrap();
    let err = uow.append_entry(captured).await.unwrap_err();
    assert!(matches!(err, MoneyMovementError::AlreadyCaptured(ref p) if p == &pid));
    assert_eq!(err.kind(), ErrorKind::Aborted);
    drop(uow);

    let mut uow = store.begin().await.unwrap();
    assert!(uow.entry(&pid, PaymentStage::Captured).await.unwrap().is_none());
    uow.rollback().await.unwrap();
}
