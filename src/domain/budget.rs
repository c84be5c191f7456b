use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CategoryId, Cents, UserId};

pub type BudgetId = Uuid;

/// A calendar month a budget applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetMonth {
    pub year: i32,
    pub month: u32,
}

impl BudgetMonth {
    /// Returns `None` unless `month` is in 1..=12 and the year is representable.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Half-open date range `[first day, first day of next month)`.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let start = NaiveDate::from_ymd_opt(self.year, self.month, 1)?;
        let end = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)?
        };
        Some((start, end))
    }
}

impl std::fmt::Display for BudgetMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A monthly spending limit for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: BudgetId,
    pub user_id: UserId,
    pub category_id: CategoryId,
    pub amount_cents: Cents,
    pub period: BudgetMonth,
    pub created_at: DateTime<Utc>,
}

impl Budget {
    pub fn new(
        user_id: UserId,
        category_id: CategoryId,
        amount_cents: Cents,
        period: BudgetMonth,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            category_id,
            amount_cents,
            period,
            created_at: Utc::now(),
        }
    }

    pub fn remaining(&self, spent_cents: Cents) -> Cents {
        self.amount_cents - spent_cents
    }
}
