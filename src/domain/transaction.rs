use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{cents_from_f64, AccountId, CategoryId, Cents, MoneyError, UserId};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "income" => Some(TransactionType::Income),
            "expense" => Some(TransactionType::Expense),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntentError {
    #[error("amount must not be negative")]
    NegativeAmount,

    #[error("description must not be empty")]
    EmptyDescription,
}

/// The caller-supplied fields of a transaction, used for both create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub account_id: AccountId,
    pub category_id: CategoryId,
    pub transaction_type: TransactionType,
    /// Unsigned magnitude; the sign comes from `transaction_type`
    pub amount_cents: Cents,
    pub description: String,
    pub date: NaiveDate,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

impl TransactionIntent {
    pub fn new(
        account_id: AccountId,
        category_id: CategoryId,
        transaction_type: TransactionType,
        amount_cents: Cents,
        description: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            account_id,
            category_id,
            transaction_type,
            amount_cents,
            description: description.into(),
            date,
            payment_method: None,
            notes: None,
        }
    }

    pub fn with_payment_method(mut self, payment_method: impl Into<String>) -> Self {
        self.payment_method = Some(payment_method.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), IntentError> {
        if self.amount_cents < 0 {
            return Err(IntentError::NegativeAmount);
        }
        if self.description.trim().is_empty() {
            return Err(IntentError::EmptyDescription);
        }
        Ok(())
    }
}

/// A transaction as submitted by API clients: the amount is a float in major
/// units. Convert it with [`TransactionRequest::into_intent`] before any
/// arithmetic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransactionRequest {
    /// Client-chosen identity; resubmitting it never posts twice
    pub id: Option<TransactionId>,
    pub account_id: AccountId,
    pub category_id: CategoryId,
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub description: String,
    pub date: NaiveDate,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

impl TransactionRequest {
    /// Round the amount to the cent and drop the float.
    pub fn into_intent(self) -> Result<TransactionIntent, MoneyError> {
        Ok(TransactionIntent {
            account_id: self.account_id,
            category_id: self.category_id,
            transaction_type: self.transaction_type,
            amount_cents: cents_from_f64(self.amount)?,
            description: self.description,
            date: self.date,
            payment_method: self.payment_method,
            notes: self.notes,
        })
    }
}

/// A partial change to a stored transaction. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPatch {
    pub account_id: Option<AccountId>,
    pub category_id: Option<CategoryId>,
    pub transaction_type: Option<TransactionType>,
    pub amount_cents: Option<Cents>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    /// `Some(None)` clears the payment method
    pub payment_method: Option<Option<String>>,
    /// `Some(None)` clears the notes
    pub notes: Option<Option<String>>,
}

impl TransactionPatch {
    /// The full intent that results from applying this patch to `current`.
    pub fn merge(self, current: &Transaction) -> TransactionIntent {
        TransactionIntent {
            account_id: self.account_id.unwrap_or(current.account_id),
            category_id: self.category_id.unwrap_or(current.category_id),
            transaction_type: self.transaction_type.unwrap_or(current.transaction_type),
            amount_cents: self.amount_cents.unwrap_or(current.amount_cents),
            description: self
                .description
                .unwrap_or_else(|| current.description.clone()),
            date: self.date.unwrap_or(current.date),
            payment_method: self
                .payment_method
                .unwrap_or_else(|| current.payment_method.clone()),
            notes: self.notes.unwrap_or_else(|| current.notes.clone()),
        }
    }
}

/// A recorded income or expense against exactly one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub category_id: CategoryId,
    pub transaction_type: TransactionType,
    pub amount_cents: Cents,
    pub description: String,
    /// When the transaction occurred in the real world
    pub date: NaiveDate,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    /// When we recorded this transaction in the system
    pub created_at: DateTime<Utc>,
}

/// The signed balance effect of one transaction on its account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub account_id: AccountId,
    pub transaction_type: TransactionType,
    pub amount_cents: Cents,
}

impl Transaction {
    pub fn from_intent(id: TransactionId, user_id: UserId, intent: TransactionIntent) -> Self {
        Self {
            id,
            user_id,
            account_id: intent.account_id,
            category_id: intent.category_id,
            transaction_type: intent.transaction_type,
            amount_cents: intent.amount_cents,
            description: intent.description,
            date: intent.date,
            payment_method: intent.payment_method,
            notes: intent.notes,
            created_at: Utc::now(),
        }
    }

    /// Overwrite every caller-controlled field. Identity, owner and
    /// `created_at` are preserved.
    pub fn overwrite(&mut self, intent: TransactionIntent) {
        self.account_id = intent.account_id;
        self.category_id = intent.category_id;
        self.transaction_type = intent.transaction_type;
        self.amount_cents = intent.amount_cents;
        self.description = intent.description;
        self.date = intent.date;
        self.payment_method = intent.payment_method;
        self.notes = intent.notes;
    }

    pub fn posting(&self) -> Posting {
        Posting {
            account_id: self.account_id,
            transaction_type: self.transaction_type,
            amount_cents: self.amount_cents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_intent(amount_cents: Cents) -> TransactionIntent {
        TransactionIntent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TransactionType::Expense,
            amount_cents,
            "Groceries",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        )
    }

    #[test]
    fn test_transaction_type_roundtrip() {
        assert_eq!(TransactionType::from_str("INCOME"), Some(TransactionType::Income));
        assert_eq!(TransactionType::from_str("expense"), Some(TransactionType::Expense));
        assert_eq!(TransactionType::from_str("transfer"), None);
    }

    #[test]
    fn test_validate_rejects_negative_amount() {
        assert_eq!(sample_intent(-1).validate(), Err(IntentError::NegativeAmount));
    }

    #[test]
    fn test_validate_accepts_zero_amount() {
        assert_eq!(sample_intent(0).validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_blank_description() {
        let mut intent = sample_intent(100);
        intent.description = "   ".into();
        assert_eq!(intent.validate(), Err(IntentError::EmptyDescription));
    }

    #[test]
    fn test_overwrite_keeps_identity() {
        let owner = Uuid::new_v4();
        let id = Uuid::new_v4();
        let mut tx = Transaction::from_intent(id, owner, sample_intent(5000));
        let created_at = tx.created_at;

        let mut intent = sample_intent(3000).with_notes("split with Sam");
        intent.transaction_type = TransactionType::Income;
        tx.overwrite(intent.clone());

        assert_eq!(tx.id, id);
        assert_eq!(tx.user_id, owner);
        assert_eq!(tx.created_at, created_at);
        assert_eq!(tx.account_id, intent.account_id);
        assert_eq!(tx.transaction_type, TransactionType::Income);
        assert_eq!(tx.amount_cents, 3000);
        assert_eq!(tx.notes.as_deref(), Some("split with Sam"));
    }

    #[test]
    fn test_request_rounds_float_amount_to_cents() {
        let json = format!(
            r#"{{
                "account_id": "{}",
                "category_id": "{}",
                "transaction_type": "expense",
                "amount": 19.99,
                "description": "Lunch",
                "date": "2024-03-01"
            }}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let request: TransactionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.id, None);
        assert_eq!(request.payment_method, None);

        let intent = request.into_intent().unwrap();
        assert_eq!(intent.amount_cents, 1999);
        assert_eq!(intent.transaction_type, TransactionType::Expense);
    }

    #[test]
    fn test_request_absorbs_float_noise() {
        let mut request = TransactionRequest {
            id: None,
            account_id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            transaction_type: TransactionType::Income,
            amount: 0.1 + 0.2,
            description: "Refund".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            payment_method: None,
            notes: None,
        };
        assert_eq!(request.clone().into_intent().unwrap().amount_cents, 30);

        request.amount = f64::NAN;
        assert!(request.into_intent().is_err());
    }

    #[test]
    fn test_patch_keeps_unset_fields_and_clears_explicitly() {
        let mut intent = sample_intent(1200);
        intent.payment_method = Some("cash".into());
        intent.notes = Some("split with Sam".into());
        let current = Transaction::from_intent(Uuid::new_v4(), Uuid::new_v4(), intent);

        let merged = TransactionPatch {
            amount_cents: Some(1500),
            notes: Some(None),
            ..Default::default()
        }
        .merge(&current);

        assert_eq!(merged.amount_cents, 1500);
        assert_eq!(merged.account_id, current.account_id);
        assert_eq!(merged.description, "Groceries");
        assert_eq!(merged.payment_method.as_deref(), Some("cash"));
        assert_eq!(merged.notes, None);
    }
}
