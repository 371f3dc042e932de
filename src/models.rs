use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::MoneyMovementError;

// ============================================================================
// Wallets and Accounts
// ============================================================================

pub struct Currency;

impl Currency {
    /// The single currency this service moves
    pub const SUPPORTED: &'static str = "USD";

    pub fn ensure_supported(currency: &str) -> Result<(), MoneyMovementError> {
        if currency == Self::SUPPORTED {
            Ok(())
        } else {
            Err(MoneyMovementError::UnsupportedCurrency(currency.to_string()))
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletType {
    Customer,
    Merchant,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Customer => "CUSTOMER",
            WalletType::Merchant => "MERCHANT",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Wallet {
    pub id: i64,
    pub user_id: String,
    pub wallet_type: WalletType,
}

/// Role of a balance bucket under a wallet
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    /// Funding source
    Default,
    /// Escrow for authorized, uncaptured payments
    Payment,
    /// Merchant receiving account
    Incoming,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Default => "DEFAULT",
            AccountType::Payment => "PAYMENT",
            AccountType::Incoming => "INCOMING",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub wallet_id: i64,
    pub account_type: AccountType,
    /// Balance in minor units, never negative
    pub cents: i64,
}

// ============================================================================
// Ledger Journal
// ============================================================================

/// Lifecycle stage recorded on each journal row.
/// A pid has at most one row per stage.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStage {
    Authorized,
    Captured,
}

impl PaymentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStage::Authorized => "AUTHORIZED",
            PaymentStage::Captured => "CAPTURED",
        }
    }
}

/// Journal row as written by the orchestrator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub pid: String,
    pub stage: PaymentStage,
    pub src_user_id: String,
    pub dst_user_id: String,
    pub src_wallet_id: i64,
    pub dst_wallet_id: i64,
    pub src_account_type: AccountType,
    pub dst_account_type: AccountType,
    pub final_dst_merchant_wallet_id: i64,
    pub amount: i64,
}

impl NewLedgerEntry {
    /// Describe a transfer between two accounts of the given wallets
    #[allow(clippy::too_many_arguments)]
    pub fn for_transfer(
        pid: &str,
        stage: PaymentStage,
        src_account: &Account,
        dst_account: &Account,
        src_wallet: &Wallet,
        dst_wallet: &Wallet,
        final_merchant_wallet: &Wallet,
        amount: i64,
    ) -> Self {
        Self {
            pid: pid.to_string(),
            stage,
            src_user_id: src_wallet.user_id.clone(),
            dst_user_id: dst_wallet.user_id.clone(),
            src_wallet_id: src_wallet.id,
            dst_wallet_id: dst_wallet.id,
            src_account_type: src_account.account_type,
            dst_account_type: dst_account.account_type,
            final_dst_merchant_wallet_id: final_merchant_wallet.id,
            amount,
        }
    }
}

/// Persisted, immutable journal row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i64,
    pub pid: String,
    pub stage: PaymentStage,
    pub src_user_id: String,
    pub dst_user_id: String,
    pub src_wallet_id: i64,
    pub dst_wallet_id: i64,
    pub src_account_type: AccountType,
    pub dst_account_type: AccountType,
    pub final_dst_merchant_wallet_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_new(id: i64, entry: NewLedgerEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            pid: entry.pid,
            stage: entry.stage,
            src_user_id: entry.src_user_id,
            dst_user_id: entry.dst_user_id,
            src_wallet_id: entry.src_wallet_id,
            dst_wallet_id: entry.dst_wallet_id,
            src_account_type: entry.src_account_type,
            dst_account_type: entry.dst_account_type,
            final_dst_merchant_wallet_id: entry.final_dst_merchant_wallet_id,
            amount: entry.amount,
            created_at,
        }
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Notification waiting to be delivered to the event bus
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub pid: String,
    pub topic: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub attempts: i32,
}

impl OutboxMessage {
    pub fn new(pid: &str, topic: &str, payload: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            pid: pid.to_string(),
            topic: topic.to_string(),
            payload,
            created_at: Utc::now(),
            attempts: 0,
        }
    }
}

// ============================================================================
// Text representations shared by storage and logs
// ============================================================================

macro_rules! text_enum {
    ($ty:ty, $label:literal, [$($variant:ident),+]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = MoneyMovementError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == Self::$variant.as_str() {
                        return Ok(Self::$variant);
                    }
                )+
                Err(MoneyMovementError::Corrupt(format!("unknown {}: {}", $label, s)))
            }
        }
    };
}

text_enum!(WalletType, "wallet type", [Customer, Merchant]);
text_enum!(AccountType, "account type", [Default, Payment, Incoming]);
text_enum!(PaymentStage, "payment stage", [Authorized, Captured]);
