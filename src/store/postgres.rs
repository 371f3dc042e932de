use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{Store, UnitOfWork};
use crate::error::{MoneyMovementError, Result};
use crate::models::{Account, AccountType, LedgerEntry, NewLedgerEntry, OutboxMessage, PaymentStage, Wallet};

// ============================================================================
// Postgres Store
// ============================================================================
//
// Concurrency: account rows are read with `FOR UPDATE`, so two units that
// touch the same account queue behind each other, and balance writes are
// conditional on the balance that was read. A transfer therefore never
// writes a balance computed from a stale read.
//
// ============================================================================

const SELECT_WALLET_BY_USER: &str = "SELECT id, user_id, wallet_type FROM wallet WHERE user_id = $1";
const SELECT_WALLET_BY_ID: &str = "SELECT id, user_id, wallet_type FROM wallet WHERE id = $1";

const SELECT_ACCOUNT_FOR_UPDATE: &str = "SELECT id, wallet_id, account_type, cents FROM account \
     WHERE wallet_id = $1 AND account_type = $2 FOR UPDATE";
const SELECT_ACCOUNT_BY_ID_FOR_UPDATE: &str =
    "SELECT id, wallet_id, account_type, cents FROM account WHERE id = $1 FOR UPDATE";
const UPDATE_BALANCE: &str = "UPDATE account SET cents = $1 WHERE id = $2 AND cents = $3";

const INSERT_ENTRY: &str = r#"
    INSERT INTO "transaction" (
        pid, stage, src_user_id, dst_user_id, src_wallet_id, dst_wallet_id,
        src_account_type, dst_account_type, final_dst_merchant_wallet_id, amount
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    RETURNING id, created_at
"#;
const SELECT_ENTRY: &str = r#"
    SELECT id, pid, stage, src_user_id, dst_user_id, src_wallet_id, dst_wallet_id,
           src_account_type, dst_account_type, final_dst_merchant_wallet_id, amount, created_at
    FROM "transaction"
    WHERE pid = $1 AND stage = $2
    ORDER BY id ASC
    LIMIT 1
"#;

const INSERT_OUTBOX: &str = "INSERT INTO outbox (id, pid, topic, payload, created_at, attempts) \
     VALUES ($1, $2, $3, $4, $5, $6)";
const SELECT_PENDING_OUTBOX: &str = r#"
    SELECT id, pid, topic, payload, created_at, attempts
    FROM outbox
    WHERE delivered_at IS NULL AND dead_lettered_at IS NULL AND created_at <= $1
    ORDER BY created_at ASC
    LIMIT $2
"#;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        tracing::info!(max_connections, "Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn pending_outbox(&self, created_before: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(SELECT_PENDING_OUTBOX)
            .bind(created_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE outbox SET delivered_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_delivery_failure(&self, id: Uuid, error: &str, dead_letter: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox SET
                attempts = attempts + 1,
                last_error = $2,
                dead_lettered_at = CASE WHEN $3 THEN NOW() ELSE NULL END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(dead_letter)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn wallet_by_user(&mut self, user_id: &str) -> Result<Wallet> {
        let row = sqlx::query(SELECT_WALLET_BY_USER)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| MoneyMovementError::WalletNotFound(user_id.to_string()))?;

        wallet_from_row(&row)
    }

    async fn wallet_by_id(&mut self, wallet_id: i64) -> Result<Wallet> {
        let row = sqlx::query(SELECT_WALLET_BY_ID)
            .bind(wallet_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| MoneyMovementError::WalletNotFound(wallet_id.to_string()))?;

        wallet_from_row(&row)
    }

    async fn account(&mut self, wallet_id: i64, account_type: AccountType) -> Result<Account> {
        let row = sqlx::query(SELECT_ACCOUNT_FOR_UPDATE)
            .bind(wallet_id)
            .bind(account_type.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(MoneyMovementError::AccountNotFound {
                wallet_id,
                account_type,
            })?;

        account_from_row(&row)
    }

    async fn account_by_id(&mut self, account_id: i64) -> Result<Account> {
        let row = sqlx::query(SELECT_ACCOUNT_BY_ID_FOR_UPDATE)
            .bind(account_id)
            .fetch_one(&mut *self.tx)
            .await?;

        account_from_row(&row)
    }

    async fn set_balance(&mut self, account_id: i64, expected_cents: i64, new_cents: i64) -> Result<bool> {
        let result = sqlx::query(UPDATE_BALANCE)
            .bind(new_cents)
            .bind(account_id)
            .bind(expected_cents)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let inserted = sqlx::query(INSERT_ENTRY)
            .bind(&entry.pid)
            .bind(entry.stage.as_str())
            .bind(&entry.src_user_id)
            .bind(&entry.dst_user_id)
            .bind(entry.src_wallet_id)
            .bind(entry.dst_wallet_id)
            .bind(entry.src_account_type.as_str())
            .bind(entry.dst_account_type.as_str())
            .bind(entry.final_dst_merchant_wallet_id)
            .bind(entry.amount)
            .fetch_one(&mut *self.tx)
            .await;

        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() && entry.stage == PaymentStage::Captured => {
                return Err(MoneyMovementError::AlreadyCaptured(entry.pid));
            }
            Err(e) => return Err(e.into()),
        };

        let id: i64 = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        Ok(LedgerEntry::from_new(id, entry, created_at))
    }

    async fn entry(&mut self, pid: &str, stage: PaymentStage) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(SELECT_ENTRY)
            .bind(pid)
            .bind(stage.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn enqueue(&mut self, message: &OutboxMessage) -> Result<()> {
        sqlx::query(INSERT_OUTBOX)
            .bind(message.id)
            .bind(&message.pid)
            .bind(&message.topic)
            .bind(&message.payload)
            .bind(message.created_at)
            .bind(message.attempts)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    let wallet_type: String = row.try_get("wallet_type")?;
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        wallet_type: wallet_type.parse()?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let account_type: String = row.try_get("account_type")?;
    Ok(Account {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        account_type: account_type.parse()?,
        cents: row.try_get("cents")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let stage: String = row.try_get("stage")?;
    let src_account_type: String = row.try_get("src_account_type")?;
    let dst_account_type: String = row.try_get("dst_account_type")?;

    Ok(LedgerEntry {
        id: row.try_get("id")?,
        pid: row.try_get("pid")?,
        stage: stage.parse()?,
        src_user_id: row.try_get("src_user_id")?,
        dst_user_id: row.try_get("dst_user_id")?,
        src_wallet_id: row.try_get("src_wallet_id")?,
        dst_wallet_id: row.try_get("dst_wallet_id")?,
        src_account_type: src_account_type.parse()?,
        dst_account_type: dst_account_type.parse()?,
        final_dst_merchant_wallet_id: row.try_get("final_dst_merchant_wallet_id")?,
        amount: row.try_get("amount")?,
        created_at: row.try_get("created_at")?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxMessage> {
    Ok(OutboxMessage {
        id: row.try_get("id")?,
        pid: row.try_get("pid")?,
        topic: row.try_get("topic")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        attempts: row.try_get("attempts")?,
    })
}
