pub mod transfer;

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{MoneyMovementError, Result};
use crate::events::{CaptureNotification, EventEmitter};
use crate::metrics::Metrics;
use crate::models::{AccountType, Currency, NewLedgerEntry, OutboxMessage, PaymentStage};
use crate::store::{Store, UnitOfWork};

pub use transfer::transfer;

const AUTHORIZE: &str = "authorize";
const CAPTURE: &str = "capture";

// ============================================================================
// Money Movement Engine
// ============================================================================
//
// Authorize moves funds from the customer's DEFAULT account into escrow
// (PAYMENT) and records an AUTHORIZED journal row under a fresh pid. Capture
// releases that escrow to the merchant's INCOMING account and records the
// CAPTURED row. Each call runs in exactly one unit of work: either every
// balance write and journal row of the call commits, or none does.
//
// Capture also writes its notifications to the outbox inside the same unit
// and hands them to the emitter only after commit.
//
// ============================================================================

pub struct MoneyMovementEngine {
    store: Arc<dyn Store>,
    emitter: Arc<EventEmitter>,
    metrics: Arc<Metrics>,
}

impl MoneyMovementEngine {
    pub fn new(store: Arc<dyn Store>, emitter: Arc<EventEmitter>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            emitter,
            metrics,
        }
    }

    /// Escrow `cents` from the customer's DEFAULT account and return the new pid
    pub async fn authorize(
        &self,
        customer_user_id: &str,
        merchant_user_id: &str,
        cents: i64,
        currency: &str,
    ) -> Result<String> {
        let started = Instant::now();
        let result = self
            .run_authorize(customer_user_id, merchant_user_id, cents, currency)
            .await;
        self.observe(AUTHORIZE, started, &result);

        match &result {
            Ok(pid) => {
                self.metrics.payments_authorized.inc();
                tracing::info!(pid = %pid, customer = customer_user_id, merchant = merchant_user_id, cents, "Payment authorized");
            }
            Err(e) => {
                tracing::warn!(error = %e, kind = e.kind().as_str(), customer = customer_user_id, merchant = merchant_user_id, cents, "Authorize failed");
            }
        }
        result
    }

    /// Release the escrow of an authorized payment to its merchant
    pub async fn capture(&self, pid: &str) -> Result<()> {
        let started = Instant::now();
        let result = self.run_capture(pid).await;
        self.observe(CAPTURE, started, &result);

        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, kind = e.kind().as_str(), pid, "Capture failed");
                return Err(e);
            }
        };

        self.metrics.payments_captured.inc();
        tracing::info!(pid, "Payment captured");

        // Committed; notification trouble is the relay's problem from here
        let delivered = self.emitter.on_captured(&messages).await;
        if delivered < messages.len() {
            tracing::warn!(pid, delivered, pending = messages.len() - delivered, "Capture notifications left in outbox");
        }

        Ok(())
    }

    fn observe<T>(&self, operation: &str, started: Instant, result: &Result<T>) {
        self.metrics.record_rpc(
            operation,
            started.elapsed().as_secs_f64(),
            result.as_ref().err().map(|e| e.kind()),
        );
    }

    async fn run_authorize(
        &self,
        customer_user_id: &str,
        merchant_user_id: &str,
        cents: i64,
        currency: &str,
    ) -> Result<String> {
        Currency::ensure_supported(currency)?;
        if cents <= 0 {
            return Err(MoneyMovementError::InvalidAmount(cents));
        }

        let mut uow = self.store.begin().await?;
        match authorize_in(uow.as_mut(), customer_user_id, merchant_user_id, cents).await {
            Ok(pid) => {
                uow.commit().await?;
                Ok(pid)
            }
            Err(e) => Err(abort(uow, e).await),
        }
    }

    async fn run_capture(&self, pid: &str) -> Result<Vec<OutboxMessage>> {
        let mut uow = self.store.begin().await?;
        match capture_in(uow.as_mut(), pid).await {
            Ok(messages) => {
                uow.commit().await?;
                Ok(messages)
            }
            Err(e) => Err(abort(uow, e).await),
        }
    }
}

async fn authorize_in(
    uow: &mut dyn UnitOfWork,
    customer_user_id: &str,
    merchant_user_id: &str,
    cents: i64,
) -> Result<String> {
    let merchant_wallet = uow.wallet_by_user(merchant_user_id).await?;
    let customer_wallet = uow.wallet_by_user(customer_user_id).await?;

    let default = uow.account(customer_wallet.id, AccountType::Default).await?;
    let payment = uow.account(customer_wallet.id, AccountType::Payment).await?;

    let (default, payment) = transfer(uow, &default, &payment, cents).await?;

    let pid = Uuid::new_v4().to_string();
    let entry = NewLedgerEntry::for_transfer(
        &pid,
        PaymentStage::Authorized,
        &default,
        &payment,
        &customer_wallet,
        &customer_wallet,
        &merchant_wallet,
        cents,
    );
    uow.append_entry(entry).await?;

    Ok(pid)
}

async fn capture_in(uow: &mut dyn UnitOfWork, pid: &str) -> Result<Vec<OutboxMessage>> {
    let authorized = uow
        .entry(pid, PaymentStage::Authorized)
        .await?
        .ok_or_else(|| MoneyMovementError::PaymentNotFound(pid.to_string()))?;

    let escrow = uow.account(authorized.dst_wallet_id, AccountType::Payment).await?;
    let incoming = uow
        .account(authorized.final_dst_merchant_wallet_id, AccountType::Incoming)
        .await?;

    let customer_wallet = uow.wallet_by_user(&authorized.src_user_id).await?;
    let merchant_wallet = uow.wallet_by_id(authorized.final_dst_merchant_wallet_id).await?;

    // Checked with both accounts locked, so a concurrent capture of the same
    // pid sees the committed CAPTURED row here
    if uow.entry(pid, PaymentStage::Captured).await?.is_some() {
        return Err(MoneyMovementError::AlreadyCaptured(pid.to_string()));
    }

    let (escrow, incoming) = transfer(uow, &escrow, &incoming, authorized.amount).await?;

    let entry = NewLedgerEntry::for_transfer(
        pid,
        PaymentStage::Captured,
        &escrow,
        &incoming,
        &customer_wallet,
        &merchant_wallet,
        &merchant_wallet,
        authorized.amount,
    );
    uow.append_entry(entry).await?;

    let notification = CaptureNotification {
        pid: pid.to_string(),
        user_id: customer_wallet.user_id.clone(),
        amount: authorized.amount,
        captured_on: Utc::now().date_naive(),
    };
    let messages = notification.outbox_messages()?;
    for message in &messages {
        uow.enqueue(message).await?;
    }

    Ok(messages)
}

/// Roll back a failed unit, keeping `cause` as the reported error
async fn abort(uow: Box<dyn UnitOfWork>, cause: MoneyMovementError) -> MoneyMovementError {
    match uow.rollback().await {
        Ok(()) => cause,
        Err(rollback) => {
            tracing::error!(error = %cause, rollback_error = %rollback, "Rollback failed");
            cause.with_rollback_failure(rollback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::messaging::InMemoryPublisher;
    use crate::models::WalletType;
    use crate::store::MemoryStore;

    async fn engine() -> (MoneyMovementEngine, MemoryStore, InMemoryPublisher) {
        let store = MemoryStore::new();
        store
            .provision_wallet(
                "alice",
                WalletType::Customer,
                &[(AccountType::Default, 10_000), (AccountType::Payment, 0)],
            )
            .await;
        store
            .provision_wallet("shop", WalletType::Merchant, &[(AccountType::Incoming, 0)])
            .await;

        let publisher = InMemoryPublisher::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let emitter = Arc::new(EventEmitter::new(
            Arc::new(publisher.clone()),
            Arc::new(store.clone()),
            metrics.clone(),
        ));
        let engine = MoneyMovementEngine::new(Arc::new(store.clone()), emitter, metrics);
        (engine, store, publisher)
    }

    #[tokio::test]
    async fn test_authorize_records_escrow_row() {
        let (engine, store, publisher) = engine().await;

        let pid = engine.authorize("alice", "shop", 2500, "USD").await.unwrap();

        let entries = store.entries(&pid).await;
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.stage, PaymentStage::Authorized);
        assert_eq!(entry.src_account_type, AccountType::Default);
        assert_eq!(entry.dst_account_type, AccountType::Payment);
        assert_eq!(entry.src_wallet_id, entry.dst_wallet_id);
        assert_eq!(entry.src_user_id, "alice");
        assert_eq!(entry.amount, 2500);
        assert!(publisher.published().await.is_empty());
        assert_eq!(engine.metrics.payments_authorized.get(), 1);
    }

    #[tokio::test]
    async fn test_authorize_validates_before_touching_store() {
        let (engine, store, _) = engine().await;

        let err = engine.authorize("alice", "shop", 100, "EUR").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = engine.authorize("alice", "shop", 0, "USD").await.unwrap_err();
        assert!(matches!(err, MoneyMovementError::InvalidAmount(0)));

        assert_eq!(store.balance("alice", AccountType::Default).await, Some(10_000));
    }

    #[tokio::test]
    async fn test_authorize_unknown_parties() {
        let (engine, _, _) = engine().await;

        let err = engine.authorize("alice", "nobody", 100, "USD").await.unwrap_err();
        assert!(matches!(err, MoneyMovementError::WalletNotFound(ref u) if u == "nobody"));

        // The merchant has no DEFAULT account to pay from
        let err = engine.authorize("shop", "shop", 100, "USD").await.unwrap_err();
        assert!(matches!(err, MoneyMovementError::AccountNotFound { .. }));
    }

    #[tokio::test]
    async fn test_capture_records_release_row_and_outbox() {
        let (engine, store, publisher) = engine().await;
        let pid = engine.authorize("alice", "shop", 2500, "USD").await.unwrap();

        engine.capture(&pid).await.unwrap();

        let entries = store.entries(&pid).await;
        assert_eq!(entries.len(), 2);
        let captured = &entries[1];
        assert_eq!(captured.stage, PaymentStage::Captured);
        assert_eq!(captured.src_account_type, AccountType::Payment);
        assert_eq!(captured.dst_account_type, AccountType::Incoming);
        assert_eq!(captured.dst_user_id, "shop");
        assert_eq!(captured.final_dst_merchant_wallet_id, captured.dst_wallet_id);

        assert_eq!(store.outbox().await.len(), 2);
        assert!(store.pending_outbox(Utc::now(), 10).await.unwrap().is_empty());
        assert_eq!(publisher.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_capture_unknown_pid() {
        let (engine, _, publisher) = engine().await;

        let err = engine.capture("no-such-pid").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(publisher.published().await.is_empty());
        assert_eq!(
            engine
                .metrics
                .payment_failures
                .with_label_values(&[CAPTURE, "not_found"])
                .get(),
            1
        );
    }
}
