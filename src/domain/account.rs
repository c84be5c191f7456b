use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId};

pub type AccountId = Uuid;

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Bank,
    Cash,
    CreditCard,
    Investment,
    Savings,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Bank => "bank",
            AccountType::Cash => "cash",
            AccountType::CreditCard => "credit_card",
            AccountType::Investment => "investment",
            AccountType::Savings => "savings",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bank" => Some(AccountType::Bank),
            "cash" => Some(AccountType::Cash),
            "credit_card" => Some(AccountType::CreditCard),
            "investment" => Some(AccountType::Investment),
            "savings" => Some(AccountType::Savings),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A monetary account owned by one user.
///
/// `balance_cents` is a cached value: it always equals `opening_balance_cents`
/// plus the postings of every transaction currently recorded against the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub name: String,
    pub account_type: AccountType,
    pub balance_cents: Cents,
    /// The initial posting made when the account was created
    pub opening_balance_cents: Cents,
    pub currency: String,
    /// False once the account was soft-deleted
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        user_id: UserId,
        name: String,
        account_type: AccountType,
        opening_balance_cents: Cents,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            account_type,
            balance_cents: opening_balance_cents,
            opening_balance_cents,
            currency: DEFAULT_CURRENCY.to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Set the cached balance directly, moving the opening balance by the
    /// same amount so a replay of the transaction log still agrees.
    pub fn set_balance(&mut self, balance_cents: Cents) -> Option<Cents> {
        let shift = balance_cents.checked_sub(self.balance_cents)?;
        self.opening_balance_cents = self.opening_balance_cents.checked_add(shift)?;
        self.balance_cents = balance_cents;
        Some(shift)
    }
}

/// Returns true for ISO-4217 shaped codes such as "USD".
pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}
