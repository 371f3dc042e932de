use crate::error::{MoneyMovementError, Result};
use crate::models::Account;
use crate::store::UnitOfWork;

/// How often a lost compare-and-swap is retried before giving up
const MAX_CAS_ATTEMPTS: u32 = 3;

/// Move `amount` cents from `src` to `dst` inside the caller's unit of work.
///
/// The funds check runs against the balance the unit currently sees, and each
/// balance write only lands if that balance is still current. When a write
/// loses, the account is re-read and the step is retried. Returns both
/// accounts as they stand after the transfer.
pub async fn transfer(
    uow: &mut dyn UnitOfWork,
    src: &Account,
    dst: &Account,
    amount: i64,
) -> Result<(Account, Account)> {
    if amount <= 0 {
        return Err(MoneyMovementError::InvalidAmount(amount));
    }
    if src.id == dst.id {
        return Err(MoneyMovementError::SameAccount(src.id));
    }

    let src = debit(uow, src.clone(), amount).await?;
    let dst = credit(uow, dst.clone(), amount).await?;

    tracing::debug!(
        src_account = src.id,
        dst_account = dst.id,
        amount,
        src_balance = src.cents,
        dst_balance = dst.cents,
        "Transferred funds"
    );

    Ok((src, dst))
}

async fn debit(uow: &mut dyn UnitOfWork, mut account: Account, amount: i64) -> Result<Account> {
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        if account.cents < amount {
            return Err(MoneyMovementError::InsufficientFunds {
                account_id: account.id,
                available: account.cents,
                requested: amount,
            });
        }

        let new_cents = account.cents - amount;
        if uow.set_balance(account.id, account.cents, new_cents).await? {
            account.cents = new_cents;
            return Ok(account);
        }

        tracing::warn!(account_id = account.id, attempt, "Balance changed before debit, re-reading");
        account = uow.account_by_id(account.id).await?;
    }

    Err(MoneyMovementError::Conflict(account.id))
}

async fn credit(uow: &mut dyn UnitOfWork, mut account: Account, amount: i64) -> Result<Account> {
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let new_cents = account
            .cents
            .checked_add(amount)
            .ok_or_else(|| MoneyMovementError::Storage(format!("account {} balance overflow", account.id)))?;

        if uow.set_balance(account.id, account.cents, new_cents).await? {
            account.cents = new_cents;
            return Ok(account);
        }

        tracing::warn!(account_id = account.id, attempt, "Balance changed before credit, re-reading");
        account = uow.account_by_id(account.id).await?;
    }

    Err(MoneyMovementError::Conflict(account.id))
}
