mod common;

use std::time::Duration;

use anyhow::Result;
use common::{test_service, Household};
use fintrack::application::{AppError, ErrorKind, FinanceService};
use fintrack::domain::{BudgetMonth, Transaction, TransactionIntent, UserId};
use fintrack::storage::StoreConfig;
use tempfile::TempDir;

/// Resubmit on `Conflict`, as a client would.
async fn create_with_retry(
    service: &FinanceService,
    owner: UserId,
    intent: TransactionIntent,
) -> Result<Transaction, AppError> {
    loop {
        match service.create_transaction(owner, intent.clone()).await {
            Err(err) if err.kind() == ErrorKind::Conflict => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            result => return result,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_postings_to_one_account_both_land() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service, "alice", 0).await?;
    let checking = home.checking.id;

    let income = tokio::spawn({
        let service = service.clone();
        let intent = home.income(checking, 2000, "2024-05-01");
        let owner = home.owner;
        async move { create_with_retry(&service, owner, intent).await }
    });
    let expense = tokio::spawn({
        let service = service.clone();
        let intent = home.expense(checking, 500, "2024-05-01");
        let owner = home.owner;
        async move { create_with_retry(&service, owner, intent).await }
    });

    income.await??;
    expense.await??;

    assert_eq!(home.balance(&service, checking).await?, 1500);
    home.assert_consistent(&service).await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_writers_lose_no_update() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service, "alice", 10000).await?;
    let wallet = home.open_account(&service, "Wallet", 0).await?;

    let mut handles = Vec::new();
    for i in 0..24 {
        let service = service.clone();
        let owner = home.owner;
        // Alternate accounts and directions so writers overlap on both
        let account = if i % 2 == 0 { home.checking.id } else { wallet.id };
        let intent = if i % 3 == 0 {
            home.income(account, 100, "2024-05-02")
        } else {
            home.expense(account, 25, "2024-05-02")
        };
        handles.push(tokio::spawn(async move {
            create_with_retry(&service, owner, intent).await
        }));
    }

    for handle in handles {
        handle.await??;
    }

    // Checking gets i = 0, 2, .., 22: four incomes (i % 6 == 0) and eight expenses
    assert_eq!(home.balance(&service, home.checking.id).await?, 10000 + 400 - 200);
    // Wallet gets i = 1, 3, .., 23: four incomes (i = 3, 9, 15, 21) and eight expenses
    assert_eq!(home.balance(&service, wallet.id).await?, 400 - 200);
    home.assert_consistent(&service).await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_update_and_delete_stay_consistent() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service, "alice", 0).await?;
    let wallet = home.open_account(&service, "Wallet", 0).await?;

    let mut created = Vec::new();
    for _ in 0..10 {
        created.push(
            service
                .create_transaction(home.owner, home.expense(home.checking.id, 1000, "2024-05-03"))
                .await?,
        );
    }

    let mut handles = Vec::new();
    for (i, tx) in created.into_iter().enumerate() {
        let service = service.clone();
        let owner = home.owner;
        let moved = home.expense(wallet.id, 700, "2024-05-03");
        handles.push(tokio::spawn(async move {
            loop {
                let result = if i % 2 == 0 {
                    service.update_transaction(owner, tx.id, moved.clone()).await.map(|_| ())
                } else {
                    service.delete_transaction(owner, tx.id).await
                };
                match result {
                    Err(err) if err.kind() == ErrorKind::Conflict => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    other => return other,
                }
            }
        }));
    }

    for handle in handles {
        handle.await??;
    }

    assert_eq!(home.balance(&service, home.checking.id).await?, 0);
    assert_eq!(home.balance(&service, wallet.id).await?, -3500);
    home.assert_consistent(&service).await?;

    Ok(())
}

#[tokio::test]
async fn test_held_write_lock_surfaces_as_conflict() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = StoreConfig::new(temp_dir.path().join("test.db"))
        .with_busy_timeout(Duration::from_millis(100))
        .with_max_connections(2);
    let service = FinanceService::init(&config).await?;
    let home = Household::create(&service, "alice", 5000).await?;

    let blocker = service.repository().begin().await?;

    let err = service
        .create_transaction(home.owner, home.expense(home.checking.id, 100, "2024-05-04"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.is_retryable());

    blocker.rollback().await?;

    // Once the lock is gone the same request goes through
    let intent = home.expense(home.checking.id, 100, "2024-05-04");
    service.create_transaction(home.owner, intent).await?;
    assert_eq!(home.balance(&service, home.checking.id).await?, 4900);
    home.assert_consistent(&service).await?;

    Ok(())
}

/// Outcome of each racer once transient lock conflicts are retried away.
async fn settle<T, F, Fut>(attempt: F) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    loop {
        match attempt().await {
            Err(err) if err.kind() == ErrorKind::Conflict => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            result => return result,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_registrations_of_one_username() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            settle(|| service.register_user("carol")).await
        }));
    }

    let mut registered = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => registered += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::ValidationError, "{err}"),
        }
    }
    assert_eq!(registered, 1);
    service.authenticate("carol").await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_budgets_for_one_month() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service, "alice", 0).await?;
    let june = BudgetMonth::new(2024, 6).unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let owner = home.owner;
        let category = home.groceries.id;
        handles.push(tokio::spawn(async move {
            settle(|| service.create_budget(owner, category, 10000 + i, june)).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => created += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::ValidationError, "{err}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(service.list_budgets(home.owner).await?.len(), 1);

    Ok(())
}
