use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountType, Budget, BudgetId, BudgetMonth, Category, CategoryId, Cents,
    Transaction, TransactionId, TransactionType, User, UserId,
};

use super::{StoreConfig, UnitOfWork, MIGRATION_001_INITIAL, MIGRATION_002_BUDGETS};

/// Repository for persisting and querying users, accounts, categories,
/// transactions and budgets. Every query is scoped to an owner.
///
/// Reads that stand alone go straight to the pool. Anything that touches a
/// balance runs inside a [`UnitOfWork`] obtained from [`Repository::begin`].
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the SQLite database described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(config.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.busy_timeout)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to database {}",
                    config.database_path.display()
                )
            })?;

        debug!(path = %config.database_path.display(), "connected to database");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_BUDGETS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        info!("database schema is up to date");
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let repo = Self::connect(config).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a unit of work holding the database write lock.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        UnitOfWork::begin(&self.pool).await
    }

    // ========================
    // User operations
    // ========================

    pub async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.username)
            .bind(user.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save user")?;
        Ok(())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by username")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    // ========================
    // Account operations
    // ========================

    /// Save a new account to the database.
    pub async fn save_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, name, account_type, balance_cents, opening_balance_cents, currency, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.user_id.to_string())
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(account.balance_cents)
        .bind(account.opening_balance_cents)
        .bind(&account.currency)
        .bind(account.is_active)
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Get an account by ID, if it belongs to `owner`.
    pub async fn get_account(&self, owner: UserId, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, account_type, balance_cents, opening_balance_cents, currency, is_active, created_at
            FROM accounts
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// List accounts for `owner` (optionally including deactivated ones).
    pub async fn list_accounts(&self, owner: UserId, include_inactive: bool) -> Result<Vec<Account>> {
        let query = if include_inactive {
            "SELECT id, user_id, name, account_type, balance_cents, opening_balance_cents, currency, is_active, created_at FROM accounts WHERE user_id = ? ORDER BY name"
        } else {
            "SELECT id, user_id, name, account_type, balance_cents, opening_balance_cents, currency, is_active, created_at FROM accounts WHERE user_id = ? AND is_active = 1 ORDER BY name"
        };

        let rows = sqlx::query(query)
            .bind(owner.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    // ========================
    // Category operations
    // ========================

    pub async fn save_category(&self, category: &Category) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO categories (id, user_id, name, category_type, icon, color, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(category.id.to_string())
        .bind(category.user_id.to_string())
        .bind(&category.name)
        .bind(category.category_type.as_str())
        .bind(&category.icon)
        .bind(&category.color)
        .bind(category.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save category")?;
        Ok(())
    }

    pub async fn get_category(&self, owner: UserId, id: CategoryId) -> Result<Option<Category>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, category_type, icon, color, created_at
            FROM categories
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch category")?;

        row.as_ref().map(Self::row_to_category).transpose()
    }

    pub async fn list_categories(&self, owner: UserId) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, category_type, icon, color, created_at
            FROM categories
            WHERE user_id = ?
            ORDER BY category_type, name
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list categories")?;

        rows.iter().map(Self::row_to_category).collect()
    }

    // ========================
    // Transaction operations
    // ========================

    pub async fn get_transaction(
        &self,
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
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    /// List transactions for `owner` with optional filters, newest first.
    pub async fn list_transactions_filtered(
        &self,
        owner: UserId,
        account_id: Option<AccountId>,
        category_id: Option<CategoryId>,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        // Build query dynamically based on filters
        let mut query = String::from(
            "SELECT id, user_id, account_id, category_id, transaction_type, amount_cents, description, transaction_date, payment_method, notes, created_at FROM transactions WHERE user_id = ?",
        );

        if account_id.is_some() {
            query.push_str(" AND account_id = ?");
        }
        if category_id.is_some() {
            query.push_str(" AND category_id = ?");
        }
        if from_date.is_some() {
            query.push_str(" AND transaction_date >= ?");
        }
        if to_date.is_some() {
            query.push_str(" AND transaction_date <= ?");
        }

        query.push_str(" ORDER BY transaction_date DESC, created_at DESC");

        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query).bind(owner.to_string());

        if let Some(id) = account_id {
            sql_query = sql_query.bind(id.to_string());
        }
        if let Some(id) = category_id {
            sql_query = sql_query.bind(id.to_string());
        }
        if let Some(date) = from_date {
            sql_query = sql_query.bind(date.to_string());
        }
        if let Some(date) = to_date {
            sql_query = sql_query.bind(date.to_string());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list filtered transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Every transaction of `owner`, newest first.
    pub async fn list_all_transactions(&self, owner: UserId) -> Result<Vec<Transaction>> {
        self.list_transactions_filtered(owner, None, None, None, None, None)
            .await
    }

    // ========================
    // Budget operations
    // ========================

    pub async fn save_budget(&self, budget: &Budget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO budgets (id, user_id, category_id, amount_cents, month, year, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(budget.id.to_string())
        .bind(budget.user_id.to_string())
        .bind(budget.category_id.to_string())
        .bind(budget.amount_cents)
        .bind(budget.period.month)
        .bind(budget.period.year)
        .bind(budget.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save budget")?;
        Ok(())
    }

    pub async fn get_budget(&self, owner: UserId, id: BudgetId) -> Result<Option<Budget>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, category_id, amount_cents, month, year, created_at
            FROM budgets
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch budget")?;

        row.as_ref().map(Self::row_to_budget).transpose()
    }

    /// Find the budget for a category in a given month.
    pub async fn find_budget(
        &self,
        owner: UserId,
        category_id: CategoryId,
        period: BudgetMonth,
    ) -> Result<Option<Budget>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, category_id, amount_cents, month, year, created_at
            FROM budgets
            WHERE user_id = ? AND category_id = ? AND month = ? AND year = ?
            "#,
        )
        .bind(owner.to_string())
        .bind(category_id.to_string())
        .bind(period.month)
        .bind(period.year)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find budget")?;

        row.as_ref().map(Self::row_to_budget).transpose()
    }

    pub async fn list_budgets(&self, owner: UserId) -> Result<Vec<Budget>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, category_id, amount_cents, month, year, created_at
            FROM budgets
            WHERE user_id = ?
            ORDER BY year DESC, month DESC
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list budgets")?;

        rows.iter().map(Self::row_to_budget).collect()
    }

    /// Delete a budget. Returns false when nothing matched.
    pub async fn delete_budget(&self, owner: UserId, id: BudgetId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM budgets WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete budget")?;
        Ok(result.rows_affected() > 0)
    }

    /// Sum expense transactions in a category within `[from_date, to_date)`.
    pub async fn sum_expenses_by_category(
        &self,
        owner: UserId,
        category_id: CategoryId,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0) as total
            FROM transactions
            WHERE user_id = ? AND category_id = ? AND transaction_type = 'expense'
              AND transaction_date >= ? AND transaction_date < ?
            "#,
        )
        .bind(owner.to_string())
        .bind(category_id.to_string())
        .bind(from_date.to_string())
        .bind(to_date.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum expenses by category")?;

        Ok(row.get("total"))
    }

    // ========================
    // Row mapping
    // ========================

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");

        Ok(User {
            id: Uuid::parse_str(&id_str).context("Invalid user ID")?,
            username: row.get("username"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    pub(super) fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let account_type_str: String = row.get("account_type");
        let created_at_str: String = row.get("created_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid account owner ID")?,
            name: row.get("name"),
            account_type: AccountType::from_str(&account_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account type: {}", account_type_str))?,
            balance_cents: row.get("balance_cents"),
            opening_balance_cents: row.get("opening_balance_cents"),
            currency: row.get("currency"),
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    pub(super) fn row_to_category(row: &SqliteRow) -> Result<Category> {
        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let category_type_str: String = row.get("category_type");
        let created_at_str: String = row.get("created_at");

        Ok(Category {
            id: Uuid::parse_str(&id_str).context("Invalid category ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid category owner ID")?,
            name: row.get("name"),
            category_type: TransactionType::from_str(&category_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid category type: {}", category_type_str))?,
            icon: row.get("icon"),
            color: row.get("color"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    pub(super) fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let account_id_str: String = row.get("account_id");
        let category_id_str: String = row.get("category_id");
        let type_str: String = row.get("transaction_type");
        let date_str: String = row.get("transaction_date");
        let created_at_str: String = row.get("created_at");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid transaction owner ID")?,
            account_id: Uuid::parse_str(&account_id_str).context("Invalid account ID")?,
            category_id: Uuid::parse_str(&category_id_str).context("Invalid category ID")?,
            transaction_type: TransactionType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_str))?,
            amount_cents: row.get("amount_cents"),
            description: row.get("description"),
            date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .context("Invalid transaction date")?,
            payment_method: row.get("payment_method"),
            notes: row.get("notes"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_budget(row: &SqliteRow) -> Result<Budget> {
        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let category_id_str: String = row.get("category_id");
        let created_at_str: String = row.get("created_at");
        let month: u32 = row.get("month");
        let year: i32 = row.get("year");

        Ok(Budget {
            id: Uuid::parse_str(&id_str).context("Invalid budget ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid budget owner ID")?,
            category_id: Uuid::parse_str(&category_id_str).context("Invalid category ID")?,
            amount_cents: row.get("amount_cents"),
            period: BudgetMonth::new(year, month)
                .ok_or_else(|| anyhow::anyhow!("Invalid budget month: {}-{}", year, month))?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Invalid created_at timestamp")?
        .with_timezone(&Utc))
}
