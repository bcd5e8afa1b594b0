use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Role of a user. Admins manage users and devices and bypass device
/// verification on login.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, PartialEq, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Keyed argon2 hash, never the plain password.
    pub password_hash: Vec<u8>,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A named client identifier whose trust status gates login for non-admin
/// users. The `device_id` string is unique per user.
#[derive(Debug, PartialEq, Clone, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub user_id: i64,
    pub device_id: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// The single balance record owned by a user.
#[derive(Debug, PartialEq, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub balance: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "UPPERCASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// Append-only ledger entry. `balance_after` equals `balance_before` plus or
/// minus `amount` and matches the account balance at commit time.
#[derive(Debug, PartialEq, Clone, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Aggregated counters for the admin dashboard.
#[derive(Debug, PartialEq, Clone, sqlx::FromRow)]
pub struct Stats {
    pub total_users: i64,
    pub active_users: i64,
    pub total_devices: i64,
    pub verified_devices: i64,
    pub total_accounts: i64,
    pub total_balance: Decimal,
    pub total_transactions: i64,
}

/// Authenticated request context: the decoded token claims plus the user as
/// currently stored. Role and active flag are always read from storage, not
/// from the token.
#[derive(Debug, PartialEq, Clone)]
pub struct Session {
    pub user: User,
    pub device_id: Option<i64>,
}
