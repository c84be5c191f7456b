use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TransactionType, UserId};

pub type CategoryId = Uuid;

/// Categories are tagged with the same income/expense kinds as transactions.
pub type CategoryType = TransactionType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub user_id: UserId,
    pub name: String,
    pub category_type: CategoryType,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(user_id: UserId, name: String, category_type: CategoryType) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            category_type,
            icon: None,
            color: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}
