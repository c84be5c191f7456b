use anyhow::{bail, Context, Result};
use sqlx::{Sqlite, SqlitePool, Transaction as SqlxTransaction};
use tracing::debug;

use crate::domain::{
    Account, AccountId, Category, CategoryId, Transaction, TransactionId, UserId,
};

use super::Repository;

/// One atomic group of reads and writes against the store.
///
/// The unit of work opens with `BEGIN IMMEDIATE`, so it holds SQLite's write
/// lock from its first statement: concurrent units of work that touch the same
/// account run one after another. Dropping it without [`UnitOfWork::commit`]
/// rolls everything back.
pub struct UnitOfWork {
    tx: SqlxTransaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(super) async fn begin(pool: &SqlitePool) -> Result<Self> {
        let tx = pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to begin unit of work")?;
        debug!("unit of work started");
        Ok(Self { tx })
    }

    /// Make every write of this unit of work durable.
    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit unit of work")?;
        debug!("unit of work committed");
        Ok(())
    }

    /// Discard every write of this unit of work.
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back unit of work")?;
        debug!("unit of work rolled back");
        Ok(())
    }

    // ========================
    // Accounts
    // ========================

    pub async fn find_account(&mut self, owner: UserId, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, account_type, balance_cents, opening_balance_cents, currency, is_active, created_at
            FROM accounts
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Repository::row_to_account).transpose()
    }

    /// Persist every mutable field of an account, including its cached balance.
    pub async fn save_account(&mut self, account: &Account) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = ?, account_type = ?, balance_cents = ?, opening_balance_cents = ?, currency = ?, is_active = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(account.balance_cents)
        .bind(account.opening_balance_cents)
        .bind(&account.currency)
        .bind(account.is_active)
        .bind(account.id.to_string())
        .bind(account.user_id.to_string())
        .execute(&mut *self.tx)
        .await
        .context("Failed to update account")?;

        if result.rows_affected() != 1 {
            bail!("Account {} disappeared during update", account.id);
        }
        Ok(())
    }

    /// Remove an account row. Fails if transactions still reference it.
    pub async fn delete_account(&mut self, owner: UserId, id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete account")?;
        Ok(())
    }

    /// Every account of `owner`, active or not.
    pub async fn list_accounts(&mut self, owner: UserId) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, account_type, balance_cents, opening_balance_cents, currency, is_active, created_at
            FROM accounts
            WHERE user_id = ?
            ORDER BY name
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Repository::row_to_account).collect()
    }

    /// Number of transactions referencing an account.
    pub async fn count_transactions_for_account(&mut self, id: AccountId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE account_id = ?")
                .bind(id.to_string())
                .fetch_one(&mut *self.tx)
                .await
                .context("Failed to count transactions for account")?;
        Ok(count)
    }

    // ========================
    // Categories
    // ========================

    pub async fn find_category(
        &mut self,
        owner: UserId,
        id: CategoryId,
    ) -> Result<Option<Category>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, category_type, icon, color, created_at
            FROM categories
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch category")?;

        row.as_ref().map(Repository::row_to_category).transpose()
    }

    // ========================
    // Transactions
    // ========================

    pub async fn find_transaction(
        &mut self,
        owner: UserId,
        id: TransactionId,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, account_id, category_id, transaction_type, amount_cents, description, transaction_date, payment_method, notes, created_at
            FROM transactions
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch transaction")?;

        row.as_ref().map(Repository::row_to_transaction).transpose()
    }

    /// Every transaction of `owner`.
    pub async fn list_transactions(&mut self, owner: UserId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, account_id, category_id, transaction_type, amount_cents, description, transaction_date, payment_method, notes, created_at
            FROM transactions
            WHERE user_id = ?
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Repository::row_to_transaction).collect()
    }

    /// Whether a transaction ID is taken by any owner.
    pub async fn transaction_id_exists(&mut self, id: TransactionId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to look up transaction ID")?;
        Ok(count > 0)
    }

    pub async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, user_id, account_id, category_id, transaction_type, amount_cents, description, transaction_date, payment_method, notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.user_id.to_string())
        .bind(transaction.account_id.to_string())
        .bind(transaction.category_id.to_string())
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.amount_cents)
        .bind(&transaction.description)
        .bind(transaction.date.to_string())
        .bind(&transaction.payment_method)
        .bind(&transaction.notes)
        .bind(transaction.created_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await
        .context("Failed to save transaction")?;
        Ok(())
    }

    pub async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET account_id = ?, category_id = ?, transaction_type = ?, amount_cents = ?, description = ?,
                transaction_date = ?, payment_method = ?, notes = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(transaction.account_id.to_string())
        .bind(transaction.category_id.to_string())
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.amount_cents)
        .bind(&transaction.description)
        .bind(transaction.date.to_string())
        .bind(&transaction.payment_method)
        .bind(&transaction.notes)
        .bind(transaction.id.to_string())
        .bind(transaction.user_id.to_string())
        .execute(&mut *self.tx)
        .await
        .context("Failed to update transaction")?;

        if result.rows_affected() != 1 {
            bail!("Transaction {} disappeared during update", transaction.id);
        }
        Ok(())
    }

    pub async fn delete_transaction(&mut self, owner: UserId, id: TransactionId) -> Result<()> {
        let result = sqlx::query("DELETE FROM transactions WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete transaction")?;

        if result.rows_affected() != 1 {
            bail!("Transaction {} disappeared during delete", id);
        }
        Ok(())
    }
}
