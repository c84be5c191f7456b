use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::application::{
    AccountUpdate, AppError, DeleteOutcome, FinanceService, TransactionFilter,
};
use crate::domain::{
    format_cents, parse_amount, AccountId, AccountType, BudgetMonth, CategoryId, TransactionIntent,
    TransactionPatch, TransactionRequest, TransactionType, UserId,
};
use crate::storage::StoreConfig;

/// Fintrack - Personal Finance Tracker
#[derive(Parser)]
#[command(name = "fintrack")]
#[command(about = "Track accounts, income and expenses, and monthly budgets")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(long, env = "FINTRACK_DATABASE", default_value = "fintrack.db", global = true)]
    pub database: String,

    /// Username to act as
    #[arg(short, long, env = "FINTRACK_USER", global = true)]
    pub user: Option<String>,

    /// How long to wait for a busy database before giving up (milliseconds)
    #[arg(long, env = "FINTRACK_BUSY_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub busy_timeout_ms: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Category management commands
    #[command(subcommand)]
    Category(CategoryCommands),

    /// Income and expense transactions
    #[command(subcommand)]
    Tx(TxCommands),

    /// Monthly budget commands
    #[command(subcommand)]
    Budget(BudgetCommands),

    /// Verify cached balances against the transaction log
    Check,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a new user
    Register {
        /// Username (must be unique)
        username: String,
    },

    /// Show the current user
    Whoami,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account
    Create {
        /// Account name
        name: String,

        /// Account type: bank, cash, credit_card, investment, savings
        #[arg(short = 't', long = "type")]
        account_type: String,

        /// Opening balance (e.g., "100.00")
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        balance: String,

        /// Currency code (e.g., USD, EUR)
        #[arg(short, long)]
        currency: Option<String>,
    },

    /// List accounts
    List {
        /// Include deactivated accounts
        #[arg(long)]
        all: bool,
    },

    /// Show an account
    Show {
        /// Account ID
        id: String,
    },

    /// Change account details
    Update {
        /// Account ID
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(short = 't', long = "type")]
        account_type: Option<String>,

        #[arg(short, long)]
        currency: Option<String>,

        /// Set the balance directly
        #[arg(short, long, allow_hyphen_values = true)]
        balance: Option<String>,
    },

    /// Delete an account (deactivates it when transactions reference it)
    Delete {
        /// Account ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CategoryCommands {
    /// Create a new category
    Create {
        /// Category name
        name: String,

        /// Category type: income, expense
        #[arg(short = 't', long = "type")]
        category_type: String,

        #[arg(long)]
        icon: Option<String>,

        #[arg(long)]
        color: Option<String>,
    },

    /// List categories
    List,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Record a new transaction
    Add {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Account ID
        #[arg(long)]
        account: String,

        /// Category ID
        #[arg(long)]
        category: String,

        /// Transaction type: income, expense
        #[arg(short = 't', long = "type")]
        transaction_type: String,

        /// Description
        #[arg(short, long)]
        description: String,

        /// Date of the transaction (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        payment_method: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Client-chosen transaction ID; resubmitting it never posts twice
        #[arg(long)]
        id: Option<String>,
    },

    /// Change a transaction; omitted fields keep their current value
    Update {
        /// Transaction ID
        id: String,

        #[arg(long)]
        amount: Option<String>,

        #[arg(long)]
        account: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(short = 't', long = "type")]
        transaction_type: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        date: Option<String>,

        #[arg(long, conflicts_with = "clear_payment_method")]
        payment_method: Option<String>,

        #[arg(long, conflicts_with = "clear_notes")]
        notes: Option<String>,

        /// Remove the stored payment method
        #[arg(long)]
        clear_payment_method: bool,

        /// Remove the stored notes
        #[arg(long)]
        clear_notes: bool,
    },

    /// Record transactions from a JSON array with decimal amounts
    Import {
        /// Path to the JSON file
        file: String,
    },

    /// Delete a transaction
    Delete {
        /// Transaction ID
        id: String,
    },

    /// List transactions, newest first
    List {
        /// Filter by account ID
        #[arg(long)]
        account: Option<String>,

        /// Filter by category ID
        #[arg(long)]
        category: Option<String>,

        /// Filter from date (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD)
        #[arg(long)]
        to_date: Option<String>,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show a transaction
    Show {
        /// Transaction ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum BudgetCommands {
    /// Create a monthly budget for an expense category
    Create {
        /// Budget limit (e.g., "400.00")
        amount: String,

        /// Category ID
        #[arg(long)]
        category: String,

        /// Month (YYYY-MM, defaults to the current month)
        #[arg(long)]
        month: Option<String>,
    },

    /// List budgets
    List,

    /// Show spending against budgets
    Status {
        /// Budget ID (omit for all budgets)
        id: Option<String>,
    },

    /// Delete a budget
    Delete {
        /// Budget ID
        id: String,
    },
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.database)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    pub async fn run(self) -> Result<()> {
        let config = self.store_config();
        let json = self.json;
        let user = self.user;

        match self.command {
            Commands::Init => {
                FinanceService::init(&config).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::User(UserCommands::Register { username }) => {
                let service = FinanceService::connect(&config).await?;
                let registered = service.register_user(&username).await?;
                if json {
                    print_json(&registered)?;
                } else {
                    println!("Registered user: {} ({})", registered.username, registered.id);
                }
            }

            Commands::User(UserCommands::Whoami) => {
                let (service, owner) = open_session(&config, user.as_deref()).await?;
                let me = service.get_user(owner).await?;
                if json {
                    print_json(&me)?;
                } else {
                    println!("{} ({})", me.username, me.id);
                }
            }

            Commands::Account(cmd) => {
                let (service, owner) = open_session(&config, user.as_deref()).await?;
                run_account_command(&service, owner, cmd, json).await?;
            }

            Commands::Category(cmd) => {
                let (service, owner) = open_session(&config, user.as_deref()).await?;
                run_category_command(&service, owner, cmd, json).await?;
            }

            Commands::Tx(cmd) => {
                let (service, owner) = open_session(&config, user.as_deref()).await?;
                run_tx_command(&service, owner, cmd, json).await?;
            }

            Commands::Budget(cmd) => {
                let (service, owner) = open_session(&config, user.as_deref()).await?;
                run_budget_command(&service, owner, cmd, json).await?;
            }

            Commands::Check => {
                let (service, owner) = open_session(&config, user.as_deref()).await?;
                run_check_command(&service, owner, json).await?;
            }
        }

        Ok(())
    }
}

/// Connect and resolve `--user` to an owner ID, failing with `Unauthorized`.
async fn open_session(
    config: &StoreConfig,
    username: Option<&str>,
) -> Result<(FinanceService, UserId)> {
    let username = username.ok_or_else(|| {
        AppError::Unauthorized("no user given, pass --user or set FINTRACK_USER".into())
    })?;
    let service = FinanceService::connect(config).await?;
    let owner = service.authenticate(username).await?;
    Ok((service, owner))
}

async fn run_account_command(
    service: &FinanceService,
    owner: UserId,
    cmd: AccountCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        AccountCommands::Create {
            name,
            account_type,
            balance,
            currency,
        } => {
            let account_type = parse_account_type(&account_type)?;
            let balance_cents =
                parse_amount(&balance).context("Invalid balance format. Use '50.00' or '50'")?;

            let account = service
                .create_account(owner, name, account_type, balance_cents, currency)
                .await?;

            if json {
                print_json(&account)?;
            } else {
                println!(
                    "Created account: {} ({}) {} {}",
                    account.name,
                    account.id,
                    format_cents(account.balance_cents),
                    account.currency
                );
            }
        }

        AccountCommands::List { all } => {
            let accounts = service.list_accounts(owner, all).await?;
            if json {
                print_json(&accounts)?;
            } else if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<36}  {:<20} {:<12} {:>12} {:<8}",
                    "ID", "NAME", "TYPE", "BALANCE", "CURRENCY"
                );
                println!("{}", "-".repeat(94));
                for account in accounts {
                    let name = if account.is_active {
                        truncate(&account.name, 20)
                    } else {
                        truncate(&format!("{} [inactive]", account.name), 20)
                    };
                    println!(
                        "{:<36}  {:<20} {:<12} {:>12} {:<8}",
                        account.id,
                        name,
                        account.account_type,
                        format_cents(account.balance_cents),
                        account.currency
                    );
                }
            }
        }

        AccountCommands::Show { id } => {
            let account = service.get_account(owner, parse_id(&id, "account")?).await?;
            if json {
                print_json(&account)?;
            } else {
                println!("Account: {}", account.name);
                println!("  ID:              {}", account.id);
                println!("  Type:            {}", account.account_type);
                println!(
                    "  Balance:         {} {}",
                    format_cents(account.balance_cents),
                    account.currency
                );
                println!(
                    "  Opening balance: {}",
                    format_cents(account.opening_balance_cents)
                );
                println!(
                    "  Status:          {}",
                    if account.is_active { "active" } else { "inactive" }
                );
                println!(
                    "  Created:         {}",
                    account.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        AccountCommands::Update {
            id,
            name,
            account_type,
            currency,
            balance,
        } => {
            let update = AccountUpdate {
                name,
                account_type: account_type.as_deref().map(parse_account_type).transpose()?,
                currency,
                balance_cents: balance
                    .map(|b| parse_amount(&b))
                    .transpose()
                    .context("Invalid balance format")?,
            };

            let account = service
                .update_account(owner, parse_id(&id, "account")?, update)
                .await?;
            if json {
                print_json(&account)?;
            } else {
                println!(
                    "Updated account: {} {} {}",
                    account.name,
                    format_cents(account.balance_cents),
                    account.currency
                );
            }
        }

        AccountCommands::Delete { id } => {
            let outcome = service
                .delete_account(owner, parse_id(&id, "account")?)
                .await?;
            match outcome {
                DeleteOutcome::HardDeleted => println!("Deleted account: {}", id),
                DeleteOutcome::Deactivated => {
                    println!("Account has transactions, deactivated instead: {}", id)
                }
            }
        }
    }
    Ok(())
}

async fn run_category_command(
    service: &FinanceService,
    owner: UserId,
    cmd: CategoryCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        CategoryCommands::Create {
            name,
            category_type,
            icon,
            color,
        } => {
            let category_type = parse_transaction_type(&category_type)?;
            let category = service
                .create_category(owner, name, category_type, icon, color)
                .await?;
            if json {
                print_json(&category)?;
            } else {
                println!(
                    "Created category: {} [{}] ({})",
                    category.name, category.category_type, category.id
                );
            }
        }

        CategoryCommands::List => {
            let categories = service.list_categories(owner).await?;
            if json {
                print_json(&categories)?;
            } else if categories.is_empty() {
                println!("No categories found.");
            } else {
                println!("{:<36}  {:<8} NAME", "ID", "TYPE");
                println!("{}", "-".repeat(70));
                for category in categories {
                    let icon = category.icon.as_deref().unwrap_or("");
                    println!(
                        "{:<36}  {:<8} {} {}",
                        category.id, category.category_type, icon, category.name
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_tx_command(
    service: &FinanceService,
    owner: UserId,
    cmd: TxCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        TxCommands::Add {
            amount,
            account,
            category,
            transaction_type,
            description,
            date,
            payment_method,
            notes,
            id,
        } => {
            let amount_cents =
                parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let date = match date {
                Some(date_str) => parse_date(&date_str)?,
                None => Local::now().date_naive(),
            };

            let mut intent = TransactionIntent::new(
                parse_id(&account, "account")?,
                parse_id(&category, "category")?,
                parse_transaction_type(&transaction_type)?,
                amount_cents,
                description,
                date,
            );
            intent.payment_method = payment_method;
            intent.notes = notes;

            let transaction = match id {
                Some(id) => {
                    service
                        .create_transaction_with_id(owner, parse_id(&id, "transaction")?, intent)
                        .await?
                }
                None => service.create_transaction(owner, intent).await?,
            };

            if json {
                print_json(&transaction)?;
            } else {
                println!(
                    "Recorded {}: {} {} ({})",
                    transaction.transaction_type,
                    format_cents(transaction.amount_cents),
                    transaction.description,
                    transaction.id
                );
            }
        }

        TxCommands::Update {
            id,
            amount,
            account,
            category,
            transaction_type,
            description,
            date,
            payment_method,
            notes,
            clear_payment_method,
            clear_notes,
        } => {
            let id = parse_id(&id, "transaction")?;
            let patch = TransactionPatch {
                account_id: account.map(|a| parse_id(&a, "account")).transpose()?,
                category_id: category.map(|c| parse_id(&c, "category")).transpose()?,
                transaction_type: transaction_type
                    .map(|t| parse_transaction_type(&t))
                    .transpose()?,
                amount_cents: amount
                    .map(|a| parse_amount(&a).context("Invalid amount format"))
                    .transpose()?,
                description,
                date: date.map(|d| parse_date(&d)).transpose()?,
                payment_method: if clear_payment_method {
                    Some(None)
                } else {
                    payment_method.map(Some)
                },
                notes: if clear_notes { Some(None) } else { notes.map(Some) },
            };

            let transaction = service.patch_transaction(owner, id, patch).await?;
            if json {
                print_json(&transaction)?;
            } else {
                println!(
                    "Updated transaction: {} {} ({})",
                    transaction.transaction_type,
                    format_cents(transaction.amount_cents),
                    transaction.id
                );
            }
        }

        TxCommands::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file))?;
            let requests: Vec<TransactionRequest> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse transactions in {}", file))?;

            let mut recorded = Vec::with_capacity(requests.len());
            for request in requests {
                let id = request.id;
                let intent = request.into_intent().map_err(AppError::from)?;
                let transaction = match id {
                    Some(id) => service.create_transaction_with_id(owner, id, intent).await?,
                    None => service.create_transaction(owner, intent).await?,
                };
                recorded.push(transaction);
            }

            if json {
                print_json(&recorded)?;
            } else {
                println!("Recorded {} transactions from {}", recorded.len(), file);
            }
        }

        TxCommands::Delete { id } => {
            service
                .delete_transaction(owner, parse_id(&id, "transaction")?)
                .await?;
            println!("Deleted transaction: {}", id);
        }

        TxCommands::List {
            account,
            category,
            from_date,
            to_date,
            limit,
        } => {
            let filter = TransactionFilter {
                account: account.map(|a| parse_id(&a, "account")).transpose()?,
                category: category.map(|c| parse_id(&c, "category")).transpose()?,
                from_date: from_date
                    .map(|s| parse_date(&s))
                    .transpose()
                    .context("Invalid from-date")?,
                to_date: to_date
                    .map(|s| parse_date(&s))
                    .transpose()
                    .context("Invalid to-date")?,
                limit,
            };

            let transactions = service.list_transactions(owner, filter).await?;
            if json {
                print_json(&transactions)?;
            } else if transactions.is_empty() {
                println!("No transactions found.");
            } else {
                let account_names = account_names(service, owner).await?;

                println!(
                    "{:<12} {:>10} {:<15} {:<36}  DESCRIPTION",
                    "DATE", "AMOUNT", "ACCOUNT", "ID"
                );
                println!("{}", "-".repeat(100));

                for transaction in transactions {
                    let signed = match transaction.transaction_type {
                        TransactionType::Income => transaction.amount_cents,
                        TransactionType::Expense => -transaction.amount_cents,
                    };
                    let account_name = account_names
                        .get(&transaction.account_id)
                        .map(|s| s.as_str())
                        .unwrap_or("?");
                    println!(
                        "{:<12} {:>10} {:<15} {:<36}  {}",
                        transaction.date,
                        format_cents(signed),
                        truncate(account_name, 15),
                        transaction.id,
                        truncate(&transaction.description, 30)
                    );
                }
            }
        }

        TxCommands::Show { id } => {
            let transaction = service
                .get_transaction(owner, parse_id(&id, "transaction")?)
                .await?;
            if json {
                print_json(&transaction)?;
            } else {
                let account = service.get_account(owner, transaction.account_id).await?;
                let category = service.get_category(owner, transaction.category_id).await?;

                println!("Transaction: {}", transaction.id);
                println!("  Type:        {}", transaction.transaction_type);
                println!(
                    "  Amount:      {} {}",
                    format_cents(transaction.amount_cents),
                    account.currency
                );
                println!("  Account:     {}", account.name);
                println!("  Category:    {}", category.name);
                println!("  Date:        {}", transaction.date);
                println!("  Description: {}", transaction.description);
                if let Some(method) = &transaction.payment_method {
                    println!("  Paid with:   {}", method);
                }
                if let Some(notes) = &transaction.notes {
                    println!("  Notes:       {}", notes);
                }
            }
        }
    }
    Ok(())
}

async fn run_budget_command(
    service: &FinanceService,
    owner: UserId,
    cmd: BudgetCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        BudgetCommands::Create {
            amount,
            category,
            month,
        } => {
            let amount_cents =
                parse_amount(&amount).context("Invalid amount format. Use '400.00' or '400'")?;
            let period = match month {
                Some(m) => parse_month(&m)?,
                None => BudgetMonth::containing(Local::now().date_naive()),
            };
            let category_id: CategoryId = parse_id(&category, "category")?;

            let budget = service
                .create_budget(owner, category_id, amount_cents, period)
                .await?;
            if json {
                print_json(&budget)?;
            } else {
                println!(
                    "Created budget: {} for {} ({})",
                    format_cents(budget.amount_cents),
                    budget.period,
                    budget.id
                );
            }
        }

        BudgetCommands::List => {
            let budgets = service.list_budgets(owner).await?;
            if json {
                print_json(&budgets)?;
            } else if budgets.is_empty() {
                println!("No budgets found.");
            } else {
                println!("{:<36}  {:<8} {:>12} CATEGORY", "ID", "MONTH", "LIMIT");
                println!("{}", "-".repeat(80));
                for budget in budgets {
                    println!(
                        "{:<36}  {:<8} {:>12} {}",
                        budget.id,
                        budget.period,
                        format_cents(budget.amount_cents),
                        budget.category_id
                    );
                }
            }
        }

        BudgetCommands::Status { id } => {
            let statuses = match id {
                Some(id) => vec![service.budget_status(owner, parse_id(&id, "budget")?).await?],
                None => service.all_budget_statuses(owner).await?,
            };

            if json {
                print_json(&statuses)?;
                return Ok(());
            }
            if statuses.is_empty() {
                println!("No budgets found.");
                return Ok(());
            }

            println!(
                "{:<20} {:<8} {:>12} {:>12} {:>12}",
                "CATEGORY", "MONTH", "LIMIT", "SPENT", "REMAINING"
            );
            println!("{}", "-".repeat(68));
            for status in statuses {
                let marker = if status.remaining_cents < 0 { " OVER" } else { "" };
                println!(
                    "{:<20} {:<8} {:>12} {:>12} {:>12}{}",
                    truncate(&status.category_name, 20),
                    status.budget.period,
                    format_cents(status.budget.amount_cents),
                    format_cents(status.spent_cents),
                    format_cents(status.remaining_cents),
                    marker
                );
            }
        }

        BudgetCommands::Delete { id } => {
            service.delete_budget(owner, parse_id(&id, "budget")?).await?;
            println!("Deleted budget: {}", id);
        }
    }
    Ok(())
}

async fn run_check_command(service: &FinanceService, owner: UserId, json: bool) -> Result<()> {
    let report = service.check_balances(owner).await?;

    if json {
        print_json(&report)?;
    } else {
        println!("Accounts:     {}", report.account_count);
        println!("Transactions: {}", report.transaction_count);
        println!();
    }

    if report.is_consistent() {
        if !json {
            println!("All balances match the transaction log.");
        }
    } else {
        if !json {
            println!("Issues found:");
            for mismatch in &report.mismatches {
                println!("  - {}", mismatch);
            }
        }
        anyhow::bail!("Balance consistency check failed");
    }

    Ok(())
}

async fn account_names(
    service: &FinanceService,
    owner: UserId,
) -> Result<HashMap<AccountId, String>> {
    let accounts = service.list_accounts(owner, true).await?;
    Ok(accounts.into_iter().map(|a| (a.id, a.name)).collect())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn parse_id(s: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).with_context(|| format!("Invalid {} ID (expected UUID): {}", what, s))
}

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date format '{}'. Use YYYY-MM-DD", date_str))
}

fn parse_month(month_str: &str) -> Result<BudgetMonth> {
    let (year, month) = month_str
        .trim()
        .split_once('-')
        .with_context(|| format!("Invalid month '{}'. Use YYYY-MM", month_str))?;
    let year: i32 = year
        .parse()
        .with_context(|| format!("Invalid year in '{}'", month_str))?;
    let month: u32 = month
        .parse()
        .with_context(|| format!("Invalid month in '{}'", month_str))?;
    BudgetMonth::new(year, month)
        .with_context(|| format!("Month out of range in '{}'", month_str))
}

fn parse_account_type(s: &str) -> Result<AccountType> {
    AccountType::from_str(s).ok_or_else(|| {
        AppError::Validation(format!(
            "Unknown account type '{}'. Use bank, cash, credit_card, investment or savings",
            s
        ))
        .into()
    })
}

fn parse_transaction_type(s: &str) -> Result<TransactionType> {
    TransactionType::from_str(s).ok_or_else(|| {
        AppError::Validation(format!("Unknown type '{}'. Use income or expense", s)).into()
    })
}
