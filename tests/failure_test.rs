mod common;

use anyhow::Result;
use common::{test_service, Household};
use fintrack::application::{ErrorKind, FinanceService, TransactionFilter};

/// Make every write to the accounts table fail from now on.
async fn break_account_writes(service: &FinanceService) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TRIGGER fail_account_update
        BEFORE UPDATE ON accounts
        BEGIN
            SELECT RAISE(ABORT, 'simulated account write failure');
        END;
        "#,
    )
    .execute(service.repository().pool())
    .await?;
    Ok(())
}

async fn repair_account_writes(service: &FinanceService) -> Result<()> {
    sqlx::query("DROP TRIGGER fail_account_update")
        .execute(service.repository().pool())
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_create_leaves_no_trace() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service, "alice", 10000).await?;
    break_account_writes(&service).await?;

    let err = service
        .create_transaction(home.owner, home.expense(home.checking.id, 2500, "2024-06-01"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert!(err.is_retryable());

    // The transaction row was inserted before the balance write failed
    let transactions = service
        .list_transactions(home.owner, TransactionFilter::default())
        .await?;
    assert!(transactions.is_empty());
    assert_eq!(home.balance(&service, home.checking.id).await?, 10000);

    // A resubmission after the store recovers posts exactly once
    repair_account_writes(&service).await?;
    service
        .create_transaction(home.owner, home.expense(home.checking.id, 2500, "2024-06-01"))
        .await?;
    assert_eq!(home.balance(&service, home.checking.id).await?, 7500);
    home.assert_consistent(&service).await?;

    Ok(())
}

#[tokio::test]
async fn test_failed_update_leaves_state_identical() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service, "alice", 10000).await?;
    let wallet = home.open_account(&service, "Wallet", 500).await?;

    let tx = service
        .create_transaction(home.owner, home.income(home.checking.id, 5000, "2024-06-02"))
        .await?;
    let before = service.get_transaction(home.owner, tx.id).await?;
    break_account_writes(&service).await?;

    // Same-account rewrite
    let err = service
        .update_transaction(home.owner, tx.id, home.expense(home.checking.id, 3000, "2024-06-02"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);

    // Cross-account move
    let err = service
        .update_transaction(home.owner, tx.id, home.income(wallet.id, 5000, "2024-06-02"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);

    assert_eq!(service.get_transaction(home.owner, tx.id).await?, before);
    assert_eq!(home.balance(&service, home.checking.id).await?, 15000);
    assert_eq!(home.balance(&service, wallet.id).await?, 500);

    repair_account_writes(&service).await?;
    home.assert_consistent(&service).await?;

    Ok(())
}

#[tokio::test]
async fn test_failed_delete_keeps_transaction_and_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service, "alice", 10000).await?;

    let tx = service
        .create_transaction(home.owner, home.expense(home.checking.id, 4000, "2024-06-03"))
        .await?;
    break_account_writes(&service).await?;

    let err = service.delete_transaction(home.owner, tx.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);

    assert!(service.get_transaction(home.owner, tx.id).await.is_ok());
    assert_eq!(home.balance(&service, home.checking.id).await?, 6000);

    repair_account_writes(&service).await?;
    service.delete_transaction(home.owner, tx.id).await?;
    assert_eq!(home.balance(&service, home.checking.id).await?, 10000);
    home.assert_consistent(&service).await?;

    Ok(())
}

#[tokio::test]
async fn test_failed_transaction_write_leaves_balance_alone() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service, "alice", 10000).await?;

    sqlx::query(
        r#"
        CREATE TRIGGER fail_transaction_insert
        BEFORE INSERT ON transactions
        BEGIN
            SELECT RAISE(ABORT, 'simulated log write failure');
        END;
        "#,
    )
    .execute(service.repository().pool())
    .await?;

    let err = service
        .create_transaction(home.owner, home.income(home.checking.id, 100, "2024-06-04"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert_eq!(home.balance(&service, home.checking.id).await?, 10000);
    home.assert_consistent(&service).await?;

    Ok(())
}
