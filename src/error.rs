use crate::models::AccountType;

// ============================================================================
// Money Movement Errors
// ============================================================================
//
// Every failure the engine can surface, tagged with the kind the RPC caller
// sees. Lookups map to NotFound, input checks to InvalidArgument, business
// rule rejections to Aborted, and storage or encoding failures to Internal.
//
// ============================================================================

pub type Result<T, E = MoneyMovementError> = std::result::Result<T, E>;

/// Caller-visible classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Aborted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MoneyMovementError {
    #[error("only accepts USD, got {0:?}")]
    UnsupportedCurrency(String),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("source and destination are the same account: {0}")]
    SameAccount(i64),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("{account_type} account not found for wallet {wallet_id}")]
    AccountNotFound {
        wallet_id: i64,
        account_type: AccountType,
    },

    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    #[error("not enough money: account {account_id} holds {available} cents, {requested} requested")]
    InsufficientFunds {
        account_id: i64,
        available: i64,
        requested: i64,
    },

    #[error("payment already captured: {0}")]
    AlreadyCaptured(String),

    #[error("balance of account {0} kept changing underneath the transfer")]
    Conflict(i64),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{cause} (rollback also failed: {rollback})")]
    RollbackFailed {
        cause: Box<MoneyMovementError>,
        rollback: String,
    },
}

impl MoneyMovementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedCurrency(_) | Self::InvalidAmount(_) | Self::SameAccount(_) => {
                ErrorKind::InvalidArgument
            }
            Self::WalletNotFound(_) | Self::AccountNotFound { .. } | Self::PaymentNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::InsufficientFunds { .. } | Self::AlreadyCaptured(_) => ErrorKind::Aborted,
            Self::Conflict(_)
            | Self::Corrupt(_)
            | Self::Storage(_)
            | Self::Database(_)
            | Self::Serialization(_) => {
                ErrorKind::Internal
            }
            // The original failure stays the primary cause
            Self::RollbackFailed { cause, .. } => cause.kind(),
        }
    }

    /// Attach a failed rollback to the error that triggered it
    pub fn with_rollback_failure(self, rollback: impl std::fmt::Display) -> Self {
        Self::RollbackFailed {
            cause: Box::new(self),
            rollback: rollback.to_string(),
        }
    }
}

impl From<MoneyMovementError> for tonic::Status {
    fn from(err: MoneyMovementError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::InvalidArgument => tonic::Status::invalid_argument(message),
            ErrorKind::NotFound => tonic::Status::not_found(message),
            ErrorKind::Aborted => tonic::Status::aborted(message),
            ErrorKind::Internal => tonic::Status::internal(message),
        }
    }
}
