// ============================================================================
// Store - Relational source of truth for wallets, balances and the journal
// ============================================================================
//
// A `UnitOfWork` is one open database transaction. Every read and write the
// orchestrator performs for a single Authorize or Capture goes through the
// same unit, and nothing is visible to other units until `commit`.
//
// Dropping a unit without committing discards its writes.
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Account, AccountType, LedgerEntry, NewLedgerEntry, OutboxMessage, PaymentStage, Wallet};

#[async_trait]
pub trait UnitOfWork: Send {
    // --- Wallet Directory ---

    /// Wallet owned by `user_id`, or `WalletNotFound`
    async fn wallet_by_user(&mut self, user_id: &str) -> Result<Wallet>;

    /// Wallet with primary key `wallet_id`, or `WalletNotFound`
    async fn wallet_by_id(&mut self, wallet_id: i64) -> Result<Wallet>;

    // --- Account Store ---

    /// Account of the given purpose under a wallet, or `AccountNotFound`.
    /// The row stays locked against other units until this one ends.
    async fn account(&mut self, wallet_id: i64, account_type: AccountType) -> Result<Account>;

    /// Re-read an account by id inside this unit
    async fn account_by_id(&mut self, account_id: i64) -> Result<Account>;

    /// Write `new_cents` only if the balance is still `expected_cents`.
    /// Returns false when the balance moved underneath the caller.
    async fn set_balance(&mut self, account_id: i64, expected_cents: i64, new_cents: i64) -> Result<bool>;

    // --- Ledger Journal ---

    /// Append an immutable journal row. A second row for the same
    /// `(pid, CAPTURED)` fails with `AlreadyCaptured`.
    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry>;

    /// The row recorded for `pid` at exactly `stage`
    async fn entry(&mut self, pid: &str, stage: PaymentStage) -> Result<Option<LedgerEntry>>;

    // --- Outbox ---

    async fn enqueue(&mut self, message: &OutboxMessage) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Open a new unit of work
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Undelivered, not dead-lettered outbox rows created at or before
    /// `created_before`, oldest first
    async fn pending_outbox(&self, created_before: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>>;

    async fn mark_delivered(&self, id: Uuid) -> Result<()>;

    /// Count a failed delivery; `dead_letter` parks the row for manual handling
    async fn record_delivery_failure(&self, id: Uuid, error: &str, dead_letter: bool) -> Result<()>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<()>;
}
