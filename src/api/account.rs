use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::Query;
use axum::Json;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models;
use crate::request_state::RequestState;

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/account/balance", get_with(get_balance, get_balance_docs))
        .api_route("/account/deposit", post_with(post_deposit, post_deposit_docs))
        .api_route(
            "/account/withdraw",
            post_with(post_withdraw, post_withdraw_docs),
        )
        .api_route(
            "/account/transactions",
            get_with(list_transactions, list_transactions_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct AccountDto {
    pub id: i64,
    pub balance: String,
    pub currency: String,
    pub created_at: String,
}

impl From<&models::Account> for AccountDto {
    fn from(value: &models::Account) -> Self {
        Self {
            id: value.id.to_owned(),
            balance: value.balance.to_string(),
            currency: value.currency.to_owned(),
            created_at: format!("{:?}", value.created_at),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub enum TransactionTypeDto {
    Deposit,
    Withdrawal,
}

impl From<&models::TransactionType> for TransactionTypeDto {
    fn from(value: &models::TransactionType) -> Self {
        match value {
            models::TransactionType::Deposit => TransactionTypeDto::Deposit,
            models::TransactionType::Withdrawal => TransactionTypeDto::Withdrawal,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub enum TransactionStatusDto {
    Pending,
    Completed,
    Failed,
}

impl From<&models::TransactionStatus> for TransactionStatusDto {
    fn from(value: &models::TransactionStatus) -> Self {
        match value {
            models::TransactionStatus::Pending => TransactionStatusDto::Pending,
            models::TransactionStatus::Completed => TransactionStatusDto::Completed,
            models::TransactionStatus::Failed => TransactionStatusDto::Failed,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct TransactionDto {
    pub id: i64,
    pub account_id: i64,
    pub transaction_type: TransactionTypeDto,
    pub amount: String,
    pub balance_before: String,
    pub balance_after: String,
    pub description: String,
    pub status: TransactionStatusDto,
    pub created_at: String,
}

impl From<&models::Transaction> for TransactionDto {
    fn from(value: &models::Transaction) -> Self {
        Self {
            id: value.id.to_owned(),
            account_id: value.account_id.to_owned(),
            transaction_type: (&value.transaction_type).into(),
            amount: value.amount.to_string(),
            balance_before: value.balance_before.to_string(),
            balance_after: value.balance_after.to_string(),
            description: value.description.to_owned(),
            status: (&value.status).into(),
            created_at: format!("{:?}", value.created_at),
        }
    }
}

/// Parse a json amount into the two decimal places the ledger stores.
/// Non finite and non positive values are rejected before any storage call.
fn parse_amount(amount: f64) -> ServiceResult<Decimal> {
    let amount = Decimal::try_from(amount).map_err(|_| ServiceError::InvalidAmount)?;
    if amount <= Decimal::ZERO {
        return Err(ServiceError::InvalidAmount);
    }
    Ok(amount.round_dp(2))
}

async fn get_balance(mut state: RequestState) -> ServiceResult<Json<AccountDto>> {
    let session = state.session_require()?;

    let account = state.db.get_or_create_account(session.user.id).await?;
    Ok(Json(AccountDto::from(&account)))
}

fn get_balance_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get the current account balance.")
        .tag("account")
        .response::<200, Json<AccountDto>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("BearerToken")
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct AmountDto {
    pub amount: f64,
    pub description: Option<String>,
}

async fn post_deposit(
    mut state: RequestState,
    form: Json<AmountDto>,
) -> ServiceResult<Json<TransactionDto>> {
    let session = state.session_require()?;

    let form = form.0;
    let amount = parse_amount(form.amount)?;
    let description = form.description.as_deref().unwrap_or("Deposit");

    let transaction = state
        .db
        .deposit(session.user.id, amount, description)
        .await?;
    Ok(Json(TransactionDto::from(&transaction)))
}

fn post_deposit_docs(op: TransformOperation) -> TransformOperation {
    op.description("Deposit the given amount into the account.")
        .tag("account")
        .response::<200, Json<TransactionDto>>()
        .response_with::<400, (), _>(|res| res.description("Amount must be positive!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("BearerToken")
}

async fn post_withdraw(
    mut state: RequestState,
    form: Json<AmountDto>,
) -> ServiceResult<Json<TransactionDto>> {
    let session = state.session_require()?;

    let form = form.0;
    let amount = parse_amount(form.amount)?;
    let description = form.description.as_deref().unwrap_or("Withdrawal");

    let transaction = state
        .db
        .withdraw(session.user.id, amount, description)
        .await?;
    Ok(Json(TransactionDto::from(&transaction)))
}

fn post_withdraw_docs(op: TransformOperation) -> TransformOperation {
    op.description("Withdraw the given amount from the account.")
        .tag("account")
        .response::<200, Json<TransactionDto>>()
        .response_with::<400, (), _>(|res| {
            res.description("Amount must be positive and covered by the balance!")
        })
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("BearerToken")
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct PageQueryDto {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQueryDto {
    pub fn limit_or_default(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    pub fn offset_or_default(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct TransactionListDto {
    pub transactions: Vec<TransactionDto>,
    pub total: i64,
}

async fn list_transactions(
    mut state: RequestState,
    query: Query<PageQueryDto>,
) -> ServiceResult<Json<TransactionListDto>> {
    let session = state.session_require()?;

    let (transactions, total) = state
        .db
        .transaction_history(
            session.user.id,
            query.limit_or_default(),
            query.offset_or_default(),
        )
        .await?;

    Ok(Json(TransactionListDto {
        transactions: transactions.iter().map(|t| t.into()).collect(),
        total,
    }))
}

fn list_transactions_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the account's transactions, newest first.")
        .tag("account")
        .response::<200, Json<TransactionListDto>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("BearerToken")
}
