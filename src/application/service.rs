use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    build_consistency_report, is_valid_currency, Account, AccountId, AccountType, Budget,
    BudgetId, BudgetMonth, Category, CategoryId, CategoryType, Cents, ConsistencyReport,
    Transaction, TransactionId, TransactionIntent, TransactionPatch, TransactionType, User,
    UserId,
};
use crate::storage::{Repository, StoreConfig, UnitOfWork};

use super::AppError;

/// Application service providing the owner-scoped operations of the tracker.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// Every operation that moves money runs in a single [`UnitOfWork`]: the
/// transaction record and the cached balance of each touched account are
/// written together or not at all.
#[derive(Clone)]
pub struct FinanceService {
    repo: Repository,
}

/// Fields of an account that may be changed after creation.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub account_type: Option<AccountType>,
    pub currency: Option<String>,
    /// Set the balance directly; the opening balance absorbs the difference
    pub balance_cents: Option<Cents>,
}

/// What `delete_account` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// No transaction referenced the account, so the row is gone
    HardDeleted,
    /// Transactions reference the account; it was flagged inactive
    Deactivated,
}

/// Filter for querying transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub account: Option<AccountId>,
    pub category: Option<CategoryId>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

/// Budget status information
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub budget: Budget,
    pub category_name: String,
    pub spent_cents: Cents,
    pub remaining_cents: Cents,
}

impl FinanceService {
    /// Create a new service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create (if needed) and migrate the database described by `config`.
    pub async fn init(config: &StoreConfig) -> Result<Self, AppError> {
        let config = config.clone().create_if_missing(true);
        let repo = Repository::init(&config).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(config).await?;
        Ok(Self::new(repo))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Users
    // ========================

    /// Register a new user.
    #[instrument(skip(self))]
    pub async fn register_user(&self, username: &str) -> Result<User, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("Username must not be empty".into()));
        }
        if self.repo.get_user_by_username(username).await?.is_some() {
            return Err(AppError::Validation(format!(
                "Username already taken: {}",
                username
            )));
        }

        let user = User::new(username.to_string());
        self.repo.save_user(&user).await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Resolve the caller's identity.
    pub async fn authenticate(&self, username: &str) -> Result<UserId, AppError> {
        self.repo
            .get_user_by_username(username)
            .await?
            .map(|user| user.id)
            .ok_or_else(|| AppError::Unauthorized(format!("Unknown user: {}", username)))
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, AppError> {
        self.repo
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::Unauthorized(format!("Unknown user: {}", id)))
    }

    // ========================
    // Accounts
    // ========================

    /// Create an account. The opening balance is its first posting.
    #[instrument(skip(self, name, currency), fields(owner = %owner))]
    pub async fn create_account(
        &self,
        owner: UserId,
        name: String,
        account_type: AccountType,
        opening_balance_cents: Cents,
        currency: Option<String>,
    ) -> Result<Account, AppError> {
        let name = validate_name(name, "Account")?;
        let mut account = Account::new(owner, name, account_type, opening_balance_cents);
        if let Some(currency) = currency {
            account = account.with_currency(validate_currency(currency)?);
        }

        self.repo.save_account(&account).await?;
        info!(account_id = %account.id, balance = account.balance_cents, "account created");
        Ok(account)
    }

    pub async fn get_account(&self, owner: UserId, id: AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(owner, id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))
    }

    pub async fn list_accounts(
        &self,
        owner: UserId,
        include_inactive: bool,
    ) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts(owner, include_inactive).await?)
    }

    #[instrument(skip(self, update), fields(owner = %owner, account_id = %id))]
    pub async fn update_account(
        &self,
        owner: UserId,
        id: AccountId,
        update: AccountUpdate,
    ) -> Result<Account, AppError> {
        let mut uow = self.repo.begin().await?;
        let mut account = load_account(&mut uow, owner, id).await?;

        if let Some(name) = update.name {
            account.name = validate_name(name, "Account")?;
        }
        if let Some(account_type) = update.account_type {
            account.account_type = account_type;
        }
        if let Some(currency) = update.currency {
            account.currency = validate_currency(currency)?;
        }
        if let Some(balance_cents) = update.balance_cents {
            let shift = account
                .set_balance(balance_cents)
                .ok_or_else(|| AppError::InvalidAmount("Balance is out of range".into()))?;
            info!(shift, "account balance set directly");
        }

        uow.save_account(&account).await?;
        uow.commit().await?;
        Ok(account)
    }

    /// Delete an account: hard delete when no transaction references it,
    /// otherwise flag it inactive so the transaction log stays intact.
    #[instrument(skip(self), fields(owner = %owner, account_id = %id))]
    pub async fn delete_account(
        &self,
        owner: UserId,
        id: AccountId,
    ) -> Result<DeleteOutcome, AppError> {
        let mut uow = self.repo.begin().await?;
        let mut account = load_account(&mut uow, owner, id).await?;

        let outcome = if uow.count_transactions_for_account(id).await? == 0 {
            uow.delete_account(owner, id).await?;
            DeleteOutcome::HardDeleted
        } else {
            account.is_active = false;
            uow.save_account(&account).await?;
            DeleteOutcome::Deactivated
        };

        uow.commit().await?;
        info!(?outcome, "account deleted");
        Ok(outcome)
    }

    // ========================
    // Categories
    // ========================

    #[instrument(skip(self, name, icon, color), fields(owner = %owner))]
    pub async fn create_category(
        &self,
        owner: UserId,
        name: String,
        category_type: CategoryType,
        icon: Option<String>,
        color: Option<String>,
    ) -> Result<Category, AppError> {
        let name = validate_name(name, "Category")?;
        let mut category = Category::new(owner, name, category_type);
        if let Some(icon) = icon {
            category = category.with_icon(icon);
        }
        if let Some(color) = color {
            category = category.with_color(color);
        }

        self.repo.save_category(&category).await?;
        debug!(category_id = %category.id, "category created");
        Ok(category)
    }

    pub async fn get_category(&self, owner: UserId, id: CategoryId) -> Result<Category, AppError> {
        self.repo
            .get_category(owner, id)
            .await?
            .ok_or_else(|| AppError::CategoryNotFound(id.to_string()))
    }

    pub async fn list_categories(&self, owner: UserId) -> Result<Vec<Category>, AppError> {
        Ok(self.repo.list_categories(owner).await?)
    }

    // ========================
    // Transactions
    // ========================

    /// Record a new transaction and post it to its account.
    pub async fn create_transaction(
        &self,
        owner: UserId,
        intent: TransactionIntent,
    ) -> Result<Transaction, AppError> {
        self.create_transaction_with_id(owner, Uuid::new_v4(), intent)
            .await
    }

    /// Record a transaction under a caller-chosen ID.
    ///
    /// Resubmitting the same ID is safe: if the owner already has a
    /// transaction with that ID it is returned unchanged and nothing is
    /// posted a second time.
    #[instrument(
        skip(self, intent),
        fields(owner = %owner, transaction_id = %id, account_id = %intent.account_id)
    )]
    pub async fn create_transaction_with_id(
        &self,
        owner: UserId,
        id: TransactionId,
        intent: TransactionIntent,
    ) -> Result<Transaction, AppError> {
        intent.validate()?;

        let mut uow = self.repo.begin().await?;

        if let Some(existing) = uow.find_transaction(owner, id).await? {
            uow.rollback().await?;
            debug!("transaction already recorded, not posting again");
            return Ok(existing);
        }
        if uow.transaction_id_exists(id).await? {
            return Err(AppError::Validation(format!(
                "Transaction ID already in use: {}",
                id
            )));
        }

        let mut account = load_account(&mut uow, owner, intent.account_id).await?;
        ensure_active(&account)?;
        load_category(&mut uow, owner, intent.category_id).await?;

        let transaction = Transaction::from_intent(id, owner, intent);
        uow.insert_transaction(&transaction).await?;

        account.apply_posting(&transaction.posting())?;
        uow.save_account(&account).await?;

        uow.commit().await?;
        info!(
            transaction_type = %transaction.transaction_type,
            amount = transaction.amount_cents,
            balance = account.balance_cents,
            "transaction posted"
        );
        Ok(transaction)
    }

    /// Replace every field of a transaction, moving its balance effect.
    ///
    /// The stored posting is reversed on the account it was made against
    /// before the new posting is applied. When both postings hit the same
    /// account they are applied to one in-memory copy that is written once.
    #[instrument(skip(self, intent), fields(owner = %owner, transaction_id = %id))]
    pub async fn update_transaction(
        &self,
        owner: UserId,
        id: TransactionId,
        intent: TransactionIntent,
    ) -> Result<Transaction, AppError> {
        intent.validate()?;

        let mut uow = self.repo.begin().await?;
        let transaction = uow
            .find_transaction(owner, id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))?;

        rewrite_transaction(uow, owner, transaction, intent).await
    }

    /// Change some fields of a transaction. The stored record is read in the
    /// same unit of work as the write, so a concurrent edit is never
    /// overwritten with stale values.
    #[instrument(skip(self, patch), fields(owner = %owner, transaction_id = %id))]
    pub async fn patch_transaction(
        &self,
        owner: UserId,
        id: TransactionId,
        patch: TransactionPatch,
    ) -> Result<Transaction, AppError> {
        let mut uow = self.repo.begin().await?;
        let transaction = uow
            .find_transaction(owner, id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))?;

        let intent = patch.merge(&transaction);
        intent.validate()?;

        rewrite_transaction(uow, owner, transaction, intent).await
    }

    /// Delete a transaction and reverse its posting.
    #[instrument(skip(self), fields(owner = %owner, transaction_id = %id))]
    pub async fn delete_transaction(&self, owner: UserId, id: TransactionId) -> Result<(), AppError> {
        let mut uow = self.repo.begin().await?;
        let transaction = uow
            .find_transaction(owner, id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))?;

        let mut account = load_account(&mut uow, owner, transaction.account_id).await?;
        account.reverse_posting(&transaction.posting())?;

        uow.delete_transaction(owner, id).await?;
        uow.save_account(&account).await?;

        uow.commit().await?;
        info!(balance = account.balance_cents, "transaction deleted");
        Ok(())
    }

    pub async fn get_transaction(
        &self,
        owner: UserId,
        id: TransactionId,
    ) -> Result<Transaction, AppError> {
        self.repo
            .get_transaction(owner, id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))
    }

    /// List transactions with filters, newest first.
    pub async fn list_transactions(
        &self,
        owner: UserId,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(self
            .repo
            .list_transactions_filtered(
                owner,
                filter.account,
                filter.category,
                filter.from_date,
                filter.to_date,
                filter.limit,
            )
            .await?)
    }

    // ========================
    // Budgets
    // ========================

    /// Create a monthly budget for an expense category.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn create_budget(
        &self,
        owner: UserId,
        category_id: CategoryId,
        amount_cents: Cents,
        period: BudgetMonth,
    ) -> Result<Budget, AppError> {
        if amount_cents < 0 {
            return Err(AppError::InvalidAmount(
                "Budget amount must not be negative".into(),
            ));
        }

        let category = self.get_category(owner, category_id).await?;
        if category.category_type != TransactionType::Expense {
            return Err(AppError::Validation(format!(
                "Budgets apply to expense categories, '{}' is {}",
                category.name, category.category_type
            )));
        }
        if self
            .repo
            .find_budget(owner, category_id, period)
            .await?
            .is_some()
        {
            return Err(AppError::Validation(format!(
                "Budget for '{}' in {} already exists",
                category.name, period
            )));
        }

        let budget = Budget::new(owner, category_id, amount_cents, period);
        self.repo.save_budget(&budget).await?;
        info!(budget_id = %budget.id, %period, "budget created");
        Ok(budget)
    }

    pub async fn get_budget(&self, owner: UserId, id: BudgetId) -> Result<Budget, AppError> {
        self.repo
            .get_budget(owner, id)
            .await?
            .ok_or_else(|| AppError::BudgetNotFound(id.to_string()))
    }

    pub async fn list_budgets(&self, owner: UserId) -> Result<Vec<Budget>, AppError> {
        Ok(self.repo.list_budgets(owner).await?)
    }

    pub async fn delete_budget(&self, owner: UserId, id: BudgetId) -> Result<(), AppError> {
        if !self.repo.delete_budget(owner, id).await? {
            return Err(AppError::BudgetNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Spending vs limit for one budget's month.
    pub async fn budget_status(&self, owner: UserId, id: BudgetId) -> Result<BudgetStatus, AppError> {
        let budget = self.get_budget(owner, id).await?;
        self.status_for(owner, budget).await
    }

    /// Status for all budgets.
    pub async fn all_budget_statuses(&self, owner: UserId) -> Result<Vec<BudgetStatus>, AppError> {
        let budgets = self.list_budgets(owner).await?;
        let mut statuses = Vec::with_capacity(budgets.len());

        for budget in budgets {
            statuses.push(self.status_for(owner, budget).await?);
        }

        Ok(statuses)
    }

    async fn status_for(&self, owner: UserId, budget: Budget) -> Result<BudgetStatus, AppError> {
        let category = self.get_category(owner, budget.category_id).await?;
        let (start, end) = budget.period.date_range().ok_or_else(|| {
            AppError::Validation(format!("Invalid budget month: {}", budget.period))
        })?;

        let spent_cents = self
            .repo
            .sum_expenses_by_category(owner, budget.category_id, start, end)
            .await?;

        Ok(BudgetStatus {
            remaining_cents: budget.remaining(spent_cents),
            category_name: category.name,
            spent_cents,
            budget,
        })
    }

    // ========================
    // Consistency
    // ========================

    /// Replay every account of `owner` from its opening balance and compare
    /// with the cached balance. Reads one consistent snapshot.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn check_balances(&self, owner: UserId) -> Result<ConsistencyReport, AppError> {
        let mut uow = self.repo.begin().await?;
        let accounts = uow.list_accounts(owner).await?;
        let transactions = uow.list_transactions(owner).await?;
        uow.rollback().await?;

        let report = build_consistency_report(&accounts, &transactions);
        for mismatch in &report.mismatches {
            warn!(
                account_id = %mismatch.account_id,
                cached = mismatch.cached_cents,
                replayed = ?mismatch.replayed_cents,
                "cached balance disagrees with transaction log"
            );
        }
        Ok(report)
    }
}

/// Move `transaction` to `intent` inside `uow` and commit.
async fn rewrite_transaction(
    mut uow: UnitOfWork,
    owner: UserId,
    mut transaction: Transaction,
    intent: TransactionIntent,
) -> Result<Transaction, AppError> {
    let old_posting = transaction.posting();
    let mut old_account = load_account(&mut uow, owner, old_posting.account_id).await?;
    old_account.reverse_posting(&old_posting)?;

    load_category(&mut uow, owner, intent.category_id).await?;
    transaction.overwrite(intent);
    let new_posting = transaction.posting();

    if new_posting.account_id == old_account.id {
        old_account.apply_posting(&new_posting)?;
        uow.update_transaction(&transaction).await?;
        uow.save_account(&old_account).await?;
        debug!(balance = old_account.balance_cents, "posting replaced in place");
    } else {
        let mut new_account = load_account(&mut uow, owner, new_posting.account_id).await?;
        ensure_active(&new_account)?;
        new_account.apply_posting(&new_posting)?;

        uow.update_transaction(&transaction).await?;
        uow.save_account(&old_account).await?;
        uow.save_account(&new_account).await?;
        debug!(
            from_account = %old_account.id,
            to_account = %new_account.id,
            "posting moved between accounts"
        );
    }

    uow.commit().await?;
    info!("transaction updated");
    Ok(transaction)
}

async fn load_account(
    uow: &mut UnitOfWork,
    owner: UserId,
    id: AccountId,
) -> Result<Account, AppError> {
    uow.find_account(owner, id)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(id.to_string()))
}

async fn load_category(
    uow: &mut UnitOfWork,
    owner: UserId,
    id: CategoryId,
) -> Result<Category, AppError> {
    uow.find_category(owner, id)
        .await?
        .ok_or_else(|| AppError::CategoryNotFound(id.to_string()))
}

/// New postings may only land on active accounts.
fn ensure_active(account: &Account) -> Result<(), AppError> {
    if !account.is_active {
        return Err(AppError::Validation(format!(
            "Account is inactive: {}",
            account.name
        )));
    }
    Ok(())
}

fn validate_name(name: String, what: &str) -> Result<String, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} name must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

fn validate_currency(currency: String) -> Result<String, AppError> {
    let currency = currency.trim().to_uppercase();
    if !is_valid_currency(&currency) {
        return Err(AppError::Validation(format!(
            "Invalid currency code: {}",
            currency
        )));
    }
    Ok(currency)
}
