mod config;
mod repository;
mod unit_of_work;

pub use config::*;
pub use repository::*;
pub use unit_of_work::*;

/// SQL migration for users, accounts, categories and transactions
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for budgets
pub const MIGRATION_002_BUDGETS: &str = include_str!("migrations/002_budgets.sql");
