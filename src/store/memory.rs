use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, UnitOfWork};
use crate::error::{MoneyMovementError, Result};
use crate::models::{
    Account, AccountType, LedgerEntry, NewLedgerEntry, OutboxMessage, PaymentStage, Wallet, WalletType,
};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Same contract as the Postgres store, kept in process. A unit of work holds
// the store lock from `begin` until it ends and mutates a private copy of the
// state, so units are fully serialized and a rollback is just dropping the
// copy. Only the test suites use it; the service always runs on Postgres.
//
// ============================================================================

#[derive(Clone, Default)]
struct MemoryState {
    wallets: Vec<Wallet>,
    accounts: BTreeMap<i64, Account>,
    entries: Vec<LedgerEntry>,
    outbox: Vec<OutboxRow>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone)]
struct OutboxRow {
    message: OutboxMessage,
    last_error: Option<String>,
    delivered: bool,
    dead_lettered: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
    fail_next_rollback: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a wallet with one account per listed purpose
    pub async fn provision_wallet(
        &self,
        user_id: &str,
        wallet_type: WalletType,
        balances: &[(AccountType, i64)],
    ) -> Wallet {
        let mut state = self.state.lock().await;
        let wallet = Wallet {
            id: state.next_id(),
            user_id: user_id.to_string(),
            wallet_type,
        };
        state.wallets.push(wallet.clone());

        for (account_type, cents) in balances {
            let id = state.next_id();
            state.accounts.insert(
                id,
                Account {
                    id,
                    wallet_id: wallet.id,
                    account_type: *account_type,
                    cents: *cents,
                },
            );
        }

        wallet
    }

    /// Committed balance of a user's account
    pub async fn balance(&self, user_id: &str, account_type: AccountType) -> Option<i64> {
        let state = self.state.lock().await;
        let wallet = state.wallets.iter().find(|w| w.user_id == user_id)?;
        state
            .accounts
            .values()
            .find(|a| a.wallet_id == wallet.id && a.account_type == account_type)
            .map(|a| a.cents)
    }

    /// Committed journal rows for a pid, in insertion order
    pub async fn entries(&self, pid: &str) -> Vec<LedgerEntry> {
        let state = self.state.lock().await;
        state.entries.iter().filter(|e| e.pid == pid).cloned().collect()
    }

    /// Every committed outbox row regardless of delivery state
    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        let state = self.state.lock().await;
        state.outbox.iter().map(|row| row.message.clone()).collect()
    }

    pub async fn dead_lettered(&self) -> Vec<OutboxMessage> {
        let state = self.state.lock().await;
        state
            .outbox
            .iter()
            .filter(|row| row.dead_lettered)
            .map(|row| row.message.clone())
            .collect()
    }

    pub async fn last_delivery_error(&self, id: Uuid) -> Option<String> {
        let state = self.state.lock().await;
        state
            .outbox
            .iter()
            .find(|row| row.message.id == id)
            .and_then(|row| row.last_error.clone())
    }

    /// Make the next commit fail after the unit has done its work
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_rollback(&self) {
        self.fail_next_rollback.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            fail_commit: self.fail_next_commit.clone(),
            fail_rollback: self.fail_next_rollback.clone(),
        }))
    }

    async fn pending_outbox(&self, created_before: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>> {
        let state = self.state.lock().await;
        let mut pending: Vec<OutboxMessage> = state
            .outbox
            .iter()
            .filter(|row| !row.delivered && !row.dead_lettered)
            .filter(|row| row.message.created_at <= created_before)
            .map(|row| row.message.clone())
            .collect();
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|row| row.message.id == id) {
            row.delivered = true;
        }
        Ok(())
    }

    async fn record_delivery_failure(&self, id: Uuid, error: &str, dead_letter: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|row| row.message.id == id) {
            row.message.attempts += 1;
            row.last_error = Some(error.to_string());
            row.dead_lettered = dead_letter;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_commit: Arc<AtomicBool>,
    fail_rollback: Arc<AtomicBool>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn wallet_by_user(&mut self, user_id: &str) -> Result<Wallet> {
        self.working
            .wallets
            .iter()
            .find(|w| w.user_id == user_id)
            .cloned()
            .ok_or_else(|| MoneyMovementError::WalletNotFound(user_id.to_string()))
    }

    async fn wallet_by_id(&mut self, wallet_id: i64) -> Result<Wallet> {
        self.working
            .wallets
            .iter()
            .find(|w| w.id == wallet_id)
            .cloned()
            .ok_or_else(|| MoneyMovementError::WalletNotFound(wallet_id.to_string()))
    }

    async fn account(&mut self, wallet_id: i64, account_type: AccountType) -> Result<Account> {
        self.working
            .accounts
            .values()
            .find(|a| a.wallet_id == wallet_id && a.account_type == account_type)
            .cloned()
            .ok_or(MoneyMovementError::AccountNotFound {
                wallet_id,
                account_type,
            })
    }

    async fn account_by_id(&mut self, account_id: i64) -> Result<Account> {
        self.working
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| MoneyMovementError::Storage(format!("account {} vanished", account_id)))
    }

    async fn set_balance(&mut self, account_id: i64, expected_cents: i64, new_cents: i64) -> Result<bool> {
        if new_cents < 0 {
            return Err(MoneyMovementError::Storage(format!(
                "account {} balance would become {}",
                account_id, new_cents
            )));
        }

        match self.working.accounts.get_mut(&account_id) {
            Some(account) if account.cents == expected_cents => {
                account.cents = new_cents;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let duplicate = self
            .working
            .entries
            .iter()
            .any(|e| e.pid == entry.pid && e.stage == entry.stage);
        if duplicate {
            return Err(match entry.stage {
                PaymentStage::Captured => MoneyMovementError::AlreadyCaptured(entry.pid),
                PaymentStage::Authorized => {
                    MoneyMovementError::Storage(format!("pid {} already authorized", entry.pid))
                }
            });
        }

        let id = self.working.next_id();
        let row = LedgerEntry::from_new(id, entry, Utc::now());
        self.working.entries.push(row.clone());
        Ok(row)
    }

    async fn entry(&mut self, pid: &str, stage: PaymentStage) -> Result<Option<LedgerEntry>> {
        Ok(self
            .working
            .entries
            .iter()
            .find(|e| e.pid == pid && e.stage == stage)
            .cloned())
    }

    async fn enqueue(&mut self, message: &OutboxMessage) -> Result<()> {
        self.working.outbox.push(OutboxRow {
            message: message.clone(),
            last_error: None,
            delivered: false,
            dead_lettered: false,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(MoneyMovementError::Storage("commit failed".to_string()));
        }

        let MemoryUnitOfWork { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        if self.fail_rollback.swap(false, Ordering::SeqCst) {
            return Err(MoneyMovementError::Storage("rollback failed".to_string()));
        }
        Ok(())
    }
}
