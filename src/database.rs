use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::migrate::Migrator;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Pool, Postgres, Transaction as SqlxTransaction};

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Account, Device, Role, Stats, Transaction, TransactionStatus, TransactionType, User,
};

mod migration;
#[cfg(test)]
mod tests;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool<Postgres>,
}

impl AppState {
    pub async fn connect(url: &str) -> AppState {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .expect("connect to database");

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: Pool<Postgres>) -> AppState {
        let migrator = Migrator::new(migration::postgresql_migrations())
            .await
            .expect("load migrations");
        migrator.run(&pool).await.expect("run migrations");

        AppState { pool }
    }
}

pub struct DatabaseConnection {
    pub connection: PoolConnection<Postgres>,
}

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, role, is_active, created_at";
const DEVICE_COLUMNS: &str = "id, user_id, device_id, is_verified, created_at";
const ACCOUNT_COLUMNS: &str = "id, user_id, balance, currency, created_at";
const TRANSACTION_COLUMNS: &str = "id, account_id, transaction_type, amount, \
     balance_before, balance_after, description, status, created_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

/// Select the account row of the given user under a row lock, creating it
/// with a zero balance first if it does not exist yet. The lock is held
/// until the surrounding transaction commits or rolls back.
async fn lock_account(
    tx: &mut SqlxTransaction<'_, Postgres>,
    user_id: i64,
) -> ServiceResult<Account> {
    let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 FOR UPDATE");

    let account = sqlx::query_as::<_, Account>(&query)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
    if let Some(account) = account {
        return Ok(account);
    }

    sqlx::query("INSERT INTO accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    let account = sqlx::query_as::<_, Account>(&query)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(account)
}

impl DatabaseConnection {
    // ------------------------------------------------------------------
    // users

    pub async fn get_user_by_id(&mut self, id: i64) -> ServiceResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.connection)
        .await?;
        Ok(user)
    }

    pub async fn get_user_by_email(&mut self, email: &str) -> ServiceResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&mut *self.connection)
        .await?;
        Ok(user)
    }

    pub async fn list_users(
        &mut self,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<(Vec<User>, i64)> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC \
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.connection)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *self.connection)
            .await?;

        Ok((users, total))
    }

    pub async fn set_user_active(
        &mut self,
        id: i64,
        is_active: bool,
    ) -> ServiceResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET is_active = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(is_active)
        .fetch_optional(&mut *self.connection)
        .await?;
        Ok(user)
    }

    pub async fn update_user_password(
        &mut self,
        id: i64,
        password_hash: &[u8],
    ) -> ServiceResult<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&mut *self.connection)
            .await?;
        Ok(())
    }

    /// Delete a user. Devices, the account and its transactions are removed
    /// by the foreign key cascade.
    pub async fn delete_user(&mut self, id: i64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // registration & seeding

    /// Create user, unverified device and zero balance account in one
    /// transaction. The device identifier is generated server side.
    pub async fn register_user(
        &mut self,
        email: &str,
        password_hash: &[u8],
        first_name: &str,
        last_name: &str,
    ) -> ServiceResult<(User, Device)> {
        if self.get_user_by_email(email).await?.is_some() {
            return Err(ServiceError::BadRequest("User already exists".to_owned()));
        }

        let mut tx = self.connection.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, password_hash, first_name, last_name) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(email)
        .bind(password_hash)
        .bind(first_name)
        .bind(last_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            // two concurrent registrations can both pass the pre-check
            if is_unique_violation(&err) {
                ServiceError::BadRequest("User already exists".to_owned())
            } else {
                err.into()
            }
        })?;

        let device_id = generate_device_identifier(&mut *tx).await?;
        let device = sqlx::query_as::<_, Device>(&format!(
            "INSERT INTO devices (user_id, device_id) VALUES ($1, $2) \
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&device_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO accounts (user_id) VALUES ($1)")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((user, device))
    }

    /// Ensure the admin user and its verified device exist. Called on every
    /// startup, must be idempotent.
    pub async fn seed_admin(
        &mut self,
        email: &str,
        password_hash: &[u8],
        device_id: &str,
    ) -> ServiceResult<()> {
        let admin = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND role = 'admin'"
        ))
        .bind(email)
        .fetch_optional(&mut *self.connection)
        .await?;

        if let Some(admin) = admin {
            log::info!("admin already exists: {email}");

            let device = self.get_device(admin.id, device_id).await?;
            match device {
                Some(device) if !device.is_verified => {
                    self.set_device_verified(device.id).await?;
                    log::info!("verified existing admin device: {device_id}");
                }
                Some(_) => {}
                None => {
                    self.create_device(admin.id, device_id, true).await?;
                    log::info!("seeded admin device: {device_id}");
                }
            }
            return Ok(());
        }

        let mut tx = self.connection.begin().await?;

        let admin = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, password_hash, first_name, last_name, role) \
             VALUES ($1, $2, 'Admin', 'User', $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(email)
        .bind(password_hash)
        .bind(Role::Admin)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO devices (user_id, device_id, is_verified) VALUES ($1, $2, TRUE)")
            .bind(admin.id)
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        log::info!("seeded admin user {email} with device {device_id}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // devices

    pub async fn get_device_by_id(&mut self, id: i64) -> ServiceResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.connection)
        .await?;
        Ok(device)
    }

    pub async fn get_device(
        &mut self,
        user_id: i64,
        device_id: &str,
    ) -> ServiceResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = $1 AND device_id = $2"
        ))
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&mut *self.connection)
        .await?;
        Ok(device)
    }

    pub async fn get_devices_by_user(&mut self, user_id: i64) -> ServiceResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&mut *self.connection)
        .await?;
        Ok(devices)
    }

    pub async fn get_all_devices(&mut self) -> ServiceResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&mut *self.connection)
        .await?;
        Ok(devices)
    }

    pub async fn has_verified_device(&mut self, user_id: i64) -> ServiceResult<bool> {
        let verified: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM devices WHERE user_id = $1 AND is_verified)",
        )
        .bind(user_id)
        .fetch_one(&mut *self.connection)
        .await?;
        Ok(verified)
    }

    pub async fn create_device(
        &mut self,
        user_id: i64,
        device_id: &str,
        is_verified: bool,
    ) -> ServiceResult<Device> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "INSERT INTO devices (user_id, device_id, is_verified) VALUES ($1, $2, $3) \
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(device_id)
        .bind(is_verified)
        .fetch_one(&mut *self.connection)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ServiceError::BadRequest("Device already assigned".to_owned())
            } else {
                err.into()
            }
        })?;
        Ok(device)
    }

    /// Admin assignment of a device to a user. Generates an identifier when
    /// the admin does not supply one. The device starts unverified.
    pub async fn assign_device(
        &mut self,
        user_id: i64,
        device_id: Option<&str>,
    ) -> ServiceResult<Device> {
        let device_id = match device_id {
            Some(device_id) => device_id.to_owned(),
            None => generate_device_identifier(&mut self.connection).await?,
        };

        self.create_device(user_id, &device_id, false).await
    }

    pub async fn set_device_verified(&mut self, id: i64) -> ServiceResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "UPDATE devices SET is_verified = TRUE WHERE id = $1 RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.connection)
        .await?;
        Ok(device)
    }

    pub async fn delete_device(&mut self, id: i64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // accounts

    /// Return the user's account, creating it with a zero balance on first
    /// access. Safe against concurrent creation through the unique user_id
    /// constraint.
    pub async fn get_or_create_account(&mut self, user_id: i64) -> ServiceResult<Account> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1");

        let account = sqlx::query_as::<_, Account>(&query)
            .bind(user_id)
            .fetch_optional(&mut *self.connection)
            .await?;
        if let Some(account) = account {
            return Ok(account);
        }

        sqlx::query("INSERT INTO accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *self.connection)
            .await?;

        let account = sqlx::query_as::<_, Account>(&query)
            .bind(user_id)
            .fetch_one(&mut *self.connection)
            .await?;
        Ok(account)
    }

    pub async fn get_account_by_user(&mut self, user_id: i64) -> ServiceResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.connection)
        .await?;
        Ok(account)
    }

    pub async fn get_all_accounts(&mut self) -> ServiceResult<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&mut *self.connection)
        .await?;
        Ok(accounts)
    }

    // ------------------------------------------------------------------
    // ledger

    /// Add `amount` to the user's balance and record the transition as a
    /// COMPLETED transaction. Balance update and ledger insert commit
    /// together or not at all.
    pub async fn deposit(
        &mut self,
        user_id: i64,
        amount: Decimal,
        description: &str,
    ) -> ServiceResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount);
        }

        let mut tx = self.connection.begin().await?;

        let account = lock_account(&mut tx, user_id).await?;
        let balance_before = account.balance;
        let balance_after = balance_before + amount;

        let transaction = write_balance_transition(
            &mut tx,
            &account,
            TransactionType::Deposit,
            amount,
            balance_before,
            balance_after,
            description,
        )
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    /// Subtract `amount` from the user's balance. Fails with
    /// `InsufficientFunds` without touching any row when the locked balance
    /// is smaller than the amount.
    pub async fn withdraw(
        &mut self,
        user_id: i64,
        amount: Decimal,
        description: &str,
    ) -> ServiceResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount);
        }

        let mut tx = self.connection.begin().await?;

        let account = lock_account(&mut tx, user_id).await?;
        let balance_before = account.balance;
        if balance_before < amount {
            return Err(ServiceError::InsufficientFunds);
        }
        let balance_after = balance_before - amount;

        let transaction = write_balance_transition(
            &mut tx,
            &account,
            TransactionType::Withdrawal,
            amount,
            balance_before,
            balance_after,
            description,
        )
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    /// The user's transactions, newest first, plus the total count.
    pub async fn transaction_history(
        &mut self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<(Vec<Transaction>, i64)> {
        let account = self.get_or_create_account(user_id).await?;

        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(account.id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.connection)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE account_id = $1")
                .bind(account.id)
                .fetch_one(&mut *self.connection)
                .await?;

        Ok((transactions, total))
    }

    /// Recent transactions of one account, newest first. Used by the admin
    /// user details view, which must not create accounts as a side effect.
    pub async fn get_transactions_by_account(
        &mut self,
        account_id: i64,
        limit: i64,
    ) -> ServiceResult<Vec<Transaction>> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(&mut *self.connection)
        .await?;
        Ok(transactions)
    }

    pub async fn get_all_transactions(
        &mut self,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<(Vec<Transaction>, i64)> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.connection)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&mut *self.connection)
            .await?;

        Ok((transactions, total))
    }

    // ------------------------------------------------------------------
    // statistics

    pub async fn get_stats(&mut self) -> ServiceResult<Stats> {
        let stats = sqlx::query_as::<_, Stats>(
            "SELECT \
                (SELECT COUNT(*) FROM users) AS total_users, \
                (SELECT COUNT(*) FROM users WHERE is_active) AS active_users, \
                (SELECT COUNT(*) FROM devices) AS total_devices, \
                (SELECT COUNT(*) FROM devices WHERE is_verified) AS verified_devices, \
                (SELECT COUNT(*) FROM accounts) AS total_accounts, \
                (SELECT COALESCE(SUM(balance), 0) FROM accounts) AS total_balance, \
                (SELECT COUNT(*) FROM transactions) AS total_transactions",
        )
        .fetch_one(&mut *self.connection)
        .await?;
        Ok(stats)
    }
}

async fn write_balance_transition(
    tx: &mut SqlxTransaction<'_, Postgres>,
    account: &Account,
    transaction_type: TransactionType,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    description: &str,
) -> ServiceResult<Transaction> {
    sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
        .bind(balance_after)
        .bind(account.id)
        .execute(&mut **tx)
        .await?;

    let transaction = sqlx::query_as::<_, Transaction>(&format!(
        "INSERT INTO transactions \
             (account_id, transaction_type, amount, balance_before, balance_after, description, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {TRANSACTION_COLUMNS}"
    ))
    .bind(account.id)
    .bind(transaction_type)
    .bind(amount)
    .bind(balance_before)
    .bind(balance_after)
    .bind(description)
    .bind(TransactionStatus::Completed)
    .fetch_one(&mut **tx)
    .await?;

    Ok(transaction)
}

/// Generate a device identifier that is unique across all users. A few
/// random attempts, then a timestamp+random composite.
async fn generate_device_identifier(
    connection: &mut sqlx::PgConnection,
) -> ServiceResult<String> {
    for _ in 0..5 {
        let candidate = random_hex(16);
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM devices WHERE device_id = $1)")
                .bind(&candidate)
                .fetch_one(&mut *connection)
                .await?;
        if !taken {
            return Ok(candidate);
        }
    }

    Ok(format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        random_hex(4)
    ))
}
