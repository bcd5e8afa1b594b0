use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::api::password_hash_create;
use crate::error::ServiceError;
use crate::models::{Device, Role, TransactionStatus, TransactionType, User};

use super::{AppState, DatabaseConnection};

async fn connection(app_state: &AppState) -> DatabaseConnection {
    DatabaseConnection {
        connection: app_state.pool.acquire().await.unwrap(),
    }
}

async fn register(db: &mut DatabaseConnection, email: &str) -> (User, Device) {
    let hash = password_hash_create("secret1").unwrap();
    db.register_user(email, &hash, "Jane", "Doe").await.unwrap()
}

#[sqlx::test]
async fn register_creates_user_device_and_account(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;

    let (user, device) = register(&mut db, "jane@example.org").await;

    assert_eq!(user.email, "jane@example.org");
    assert_eq!(user.role, Role::User);
    assert!(user.is_active);

    assert_eq!(device.user_id, user.id);
    assert!(!device.is_verified);
    assert!(!device.device_id.is_empty());

    let account = db.get_account_by_user(user.id).await.unwrap().unwrap();
    assert_eq!(account.balance, Decimal::ZERO);
    assert_eq!(account.currency, "USD");
}

#[sqlx::test]
async fn register_rejects_duplicate_email(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;

    register(&mut db, "jane@example.org").await;

    let hash = password_hash_create("secret2").unwrap();
    let result = db
        .register_user("jane@example.org", &hash, "Janet", "Doe")
        .await;
    assert_eq!(
        result,
        Err(ServiceError::BadRequest("User already exists".to_owned()))
    );

    let (_, total) = db.list_users(10, 0).await.unwrap();
    assert_eq!(total, 1);
}

#[sqlx::test]
async fn deposit_then_overdraw_scenario(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, _) = register(&mut db, "a@x.com").await;

    let account = db.get_or_create_account(user.id).await.unwrap();
    assert_eq!(account.balance, Decimal::ZERO);
    assert_eq!(account.currency, "USD");

    let deposit = db
        .deposit(user.id, Decimal::from(100), "Deposit")
        .await
        .unwrap();
    assert_eq!(deposit.transaction_type, TransactionType::Deposit);
    assert_eq!(deposit.status, TransactionStatus::Completed);
    assert_eq!(deposit.balance_before, Decimal::ZERO);
    assert_eq!(deposit.balance_after, Decimal::from(100));
    assert_eq!(
        db.get_or_create_account(user.id).await.unwrap().balance,
        Decimal::from(100)
    );

    let overdraw = db.withdraw(user.id, Decimal::from(150), "Withdrawal").await;
    assert_eq!(overdraw, Err(ServiceError::InsufficientFunds));

    // the failed withdrawal left no trace
    assert_eq!(
        db.get_or_create_account(user.id).await.unwrap().balance,
        Decimal::from(100)
    );
    let (transactions, total) = db.transaction_history(user.id, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(transactions[0].id, deposit.id);
}

#[sqlx::test]
async fn withdraw_updates_balance_and_ledger(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, _) = register(&mut db, "jane@example.org").await;

    db.deposit(user.id, Decimal::new(10050, 2), "Deposit")
        .await
        .unwrap();
    let withdrawal = db
        .withdraw(user.id, Decimal::new(2550, 2), "Rent")
        .await
        .unwrap();

    assert_eq!(withdrawal.transaction_type, TransactionType::Withdrawal);
    assert_eq!(withdrawal.amount, Decimal::new(2550, 2));
    assert_eq!(withdrawal.balance_before, Decimal::new(10050, 2));
    assert_eq!(withdrawal.balance_after, Decimal::new(7500, 2));
    assert_eq!(withdrawal.description, "Rent");

    let account = db.get_or_create_account(user.id).await.unwrap();
    assert_eq!(account.balance, withdrawal.balance_after);
}

#[sqlx::test]
async fn non_positive_amounts_are_rejected(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, _) = register(&mut db, "jane@example.org").await;

    assert_eq!(
        db.deposit(user.id, Decimal::ZERO, "Deposit").await,
        Err(ServiceError::InvalidAmount)
    );
    assert_eq!(
        db.deposit(user.id, Decimal::from(-5), "Deposit").await,
        Err(ServiceError::InvalidAmount)
    );
    assert_eq!(
        db.withdraw(user.id, Decimal::ZERO, "Withdrawal").await,
        Err(ServiceError::InvalidAmount)
    );

    let (transactions, total) = db.transaction_history(user.id, 10, 0).await.unwrap();
    assert!(transactions.is_empty());
    assert_eq!(total, 0);
}

#[sqlx::test]
async fn history_is_paginated_newest_first(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, _) = register(&mut db, "jane@example.org").await;

    db.deposit(user.id, Decimal::from(10), "first").await.unwrap();
    db.deposit(user.id, Decimal::from(20), "second").await.unwrap();
    db.withdraw(user.id, Decimal::from(5), "third").await.unwrap();

    let (page, total) = db.transaction_history(user.id, 2, 0).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].description, "third");
    assert_eq!(page[1].description, "second");

    let (page, _) = db.transaction_history(user.id, 2, 2).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].description, "first");
}

#[sqlx::test]
async fn concurrent_withdrawals_cannot_overdraw(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, _) = register(&mut db, "jane@example.org").await;
    db.deposit(user.id, Decimal::from(100), "Deposit")
        .await
        .unwrap();

    let mut db1 = connection(&app_state).await;
    let mut db2 = connection(&app_state).await;

    let (first, second) = futures::join!(
        db1.withdraw(user.id, Decimal::from(100), "Withdrawal"),
        db2.withdraw(user.id, Decimal::from(100), "Withdrawal"),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results {
        if let Err(err) = result {
            assert_eq!(err, ServiceError::InsufficientFunds);
        }
    }

    let account = db.get_or_create_account(user.id).await.unwrap();
    assert_eq!(account.balance, Decimal::ZERO);

    // one deposit, exactly one recorded withdrawal
    let (transactions, total) = db.transaction_history(user.id, 10, 0).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(
        transactions[0].transaction_type,
        TransactionType::Withdrawal
    );
}

#[sqlx::test]
async fn account_is_only_created_once(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, _) = register(&mut db, "jane@example.org").await;

    let first = db.get_or_create_account(user.id).await.unwrap();
    let second = db.get_or_create_account(user.id).await.unwrap();
    assert_eq!(first.id, second.id);

    assert_eq!(db.get_all_accounts().await.unwrap().len(), 1);
}

#[sqlx::test]
async fn admin_seed_is_idempotent(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let hash = password_hash_create("admin-password").unwrap();

    db.seed_admin("admin@example.org", &hash, "seed-device")
        .await
        .unwrap();
    db.seed_admin("admin@example.org", &hash, "seed-device")
        .await
        .unwrap();

    let (users, total) = db.list_users(10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(users[0].role, Role::Admin);

    let devices = db.get_devices_by_user(users[0].id).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert!(devices[0].is_verified);
    assert_eq!(devices[0].device_id, "seed-device");
}

#[sqlx::test]
async fn deactivation_and_reactivation(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, _) = register(&mut db, "jane@example.org").await;

    let user = db.set_user_active(user.id, false).await.unwrap().unwrap();
    assert!(!user.is_active);

    let user = db.set_user_active(user.id, true).await.unwrap().unwrap();
    assert!(user.is_active);

    assert_eq!(db.set_user_active(4242, false).await.unwrap(), None);
}

#[sqlx::test]
async fn deleting_a_user_cascades(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, _) = register(&mut db, "jane@example.org").await;
    db.deposit(user.id, Decimal::from(50), "Deposit")
        .await
        .unwrap();

    assert!(db.delete_user(user.id).await.unwrap());

    assert_eq!(db.get_user_by_id(user.id).await.unwrap(), None);
    assert_eq!(db.get_account_by_user(user.id).await.unwrap(), None);
    assert!(db.get_devices_by_user(user.id).await.unwrap().is_empty());
    let (_, total) = db.get_all_transactions(10, 0).await.unwrap();
    assert_eq!(total, 0);

    // a second delete finds nothing
    assert!(!db.delete_user(user.id).await.unwrap());
}

#[sqlx::test]
async fn device_management(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;
    let (user, registered) = register(&mut db, "jane@example.org").await;

    assert!(!db.has_verified_device(user.id).await.unwrap());

    let assigned = db.assign_device(user.id, Some("tablet")).await.unwrap();
    assert!(!assigned.is_verified);
    assert_eq!(
        db.assign_device(user.id, Some("tablet")).await,
        Err(ServiceError::BadRequest("Device already assigned".to_owned()))
    );

    // identifiers are generated when the admin does not supply one
    let generated = db.assign_device(user.id, None).await.unwrap();
    assert!(!generated.device_id.is_empty());
    assert_ne!(generated.device_id, assigned.device_id);

    db.set_device_verified(assigned.id).await.unwrap();
    assert!(db.has_verified_device(user.id).await.unwrap());

    assert!(db.delete_device(registered.id).await.unwrap());
    assert_eq!(db.get_device_by_id(registered.id).await.unwrap(), None);

    let stats = db.get_stats().await.unwrap();
    assert_eq!(stats.total_devices, 2);
    assert_eq!(stats.verified_devices, 1);
}

#[sqlx::test]
async fn stats_aggregate_the_ledger(pool: PgPool) {
    let app_state = AppState::from_pool(pool).await;
    let mut db = connection(&app_state).await;

    let (jane, _) = register(&mut db, "jane@example.org").await;
    let (john, _) = register(&mut db, "john@example.org").await;
    db.deposit(jane.id, Decimal::from(100), "Deposit")
        .await
        .unwrap();
    db.deposit(john.id, Decimal::from(50), "Deposit")
        .await
        .unwrap();
    db.withdraw(john.id, Decimal::from(20), "Withdrawal")
        .await
        .unwrap();
    db.set_user_active(john.id, false).await.unwrap();

    let stats = db.get_stats().await.unwrap();
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.active_users, 1);
    assert_eq!(stats.total_accounts, 2);
    assert_eq!(stats.total_balance, Decimal::from(130));
    assert_eq!(stats.total_transactions, 3);
}
