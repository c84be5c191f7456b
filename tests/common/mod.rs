// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::NaiveDate;
use fintrack::application::FinanceService;
use fintrack::domain::{
    Account, AccountId, AccountType, Category, Cents, TransactionIntent, TransactionType, UserId,
};
use fintrack::storage::StoreConfig;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(FinanceService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = StoreConfig::new(temp_dir.path().join("test.db"));
    let service = FinanceService::init(&config).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into NaiveDate
pub fn parse_date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// Test fixture: one user with a bank account and a category of each type
pub struct Household {
    pub owner: UserId,
    pub checking: Account,
    pub salary: Category,
    pub groceries: Category,
}

impl Household {
    /// Register `username` with a checking account holding `opening` cents
    pub async fn create(
        service: &FinanceService,
        username: &str,
        opening: Cents,
    ) -> Result<Self> {
        let owner = service.register_user(username).await?.id;
        let checking = service
            .create_account(owner, "Checking".into(), AccountType::Bank, opening, None)
            .await?;
        let salary = service
            .create_category(owner, "Salary".into(), TransactionType::Income, None, None)
            .await?;
        let groceries = service
            .create_category(
                owner,
                "Groceries".into(),
                TransactionType::Expense,
                Some("🛒".into()),
                None,
            )
            .await?;

        Ok(Self {
            owner,
            checking,
            salary,
            groceries,
        })
    }

    /// Add another account for this owner
    pub async fn open_account(
        &self,
        service: &FinanceService,
        name: &str,
        opening: Cents,
    ) -> Result<Account> {
        Ok(service
            .create_account(self.owner, name.into(), AccountType::Cash, opening, None)
            .await?)
    }

    /// Intent for an expense against `account`
    pub fn expense(&self, account: AccountId, amount: Cents, date: &str) -> TransactionIntent {
        TransactionIntent::new(
            account,
            self.groceries.id,
            TransactionType::Expense,
            amount,
            "Groceries",
            parse_date(date),
        )
    }

    /// Intent for income into `account`
    pub fn income(&self, account: AccountId, amount: Cents, date: &str) -> TransactionIntent {
        TransactionIntent::new(
            account,
            self.salary.id,
            TransactionType::Income,
            amount,
            "Salary",
            parse_date(date),
        )
    }

    /// Current cached balance of an account
    pub async fn balance(&self, service: &FinanceService, account: AccountId) -> Result<Cents> {
        Ok(service.get_account(self.owner, account).await?.balance_cents)
    }

    /// Assert every cached balance matches a replay of the transaction log
    pub async fn assert_consistent(&self, service: &FinanceService) -> Result<()> {
        let report = service.check_balances(self.owner).await?;
        assert!(
            report.is_consistent(),
            "balances diverged from the log: {:?}",
            report.mismatches
        );
        Ok(())
    }
}
