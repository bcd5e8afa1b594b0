use aide::axum::routing::{delete_with, get_with, post_with, put_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::Json;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models;
use crate::request_state::RequestState;

use super::account::{PageQueryDto, TransactionDto, TransactionListDto};
use super::auth::{DeviceDto, UserDto};

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/admin/users", get_with(list_users, list_users_docs))
        .api_route(
            "/admin/user/:id",
            get_with(get_user, get_user_docs).delete_with(delete_user, delete_user_docs),
        )
        .api_route(
            "/admin/user/:id/details",
            get_with(get_user_details, get_user_details_docs),
        )
        .api_route(
            "/admin/user/:id/access",
            put_with(set_user_access, set_user_access_docs),
        )
        .api_route(
            "/admin/user/:id/device",
            post_with(assign_device, assign_device_docs),
        )
        .api_route("/admin/devices", get_with(list_devices, list_devices_docs))
        .api_route(
            "/admin/device/:id/verify",
            post_with(verify_device, verify_device_docs),
        )
        .api_route(
            "/admin/device/:id",
            delete_with(delete_device, delete_device_docs),
        )
        .api_route(
            "/admin/accounts",
            get_with(list_accounts, list_accounts_docs),
        )
        .api_route(
            "/admin/transactions",
            get_with(list_transactions, list_transactions_docs),
        )
        .api_route("/admin/stats", get_with(get_stats, get_stats_docs))
        .with_state(app_state)
}

/// Device representation for the admin views, includes the owner.
#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct AdminDeviceDto {
    pub id: i64,
    pub user_id: i64,
    pub device_id: String,
    pub is_verified: bool,
    pub created_at: String,
}

impl From<&models::Device> for AdminDeviceDto {
    fn from(value: &models::Device) -> Self {
        Self {
            id: value.id.to_owned(),
            user_id: value.user_id.to_owned(),
            device_id: value.device_id.to_owned(),
            is_verified: value.is_verified,
            created_at: format!("{:?}", value.created_at),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct AdminAccountDto {
    pub id: i64,
    pub user_id: i64,
    pub balance: String,
    pub currency: String,
    pub created_at: String,
}

impl From<&models::Account> for AdminAccountDto {
    fn from(value: &models::Account) -> Self {
        Self {
            id: value.id.to_owned(),
            user_id: value.user_id.to_owned(),
            balance: value.balance.to_string(),
            currency: value.currency.to_owned(),
            created_at: format!("{:?}", value.created_at),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct UserListDto {
    pub users: Vec<UserDto>,
    pub total: i64,
}

pub async fn list_users(
    mut state: RequestState,
    query: Query<PageQueryDto>,
) -> ServiceResult<Json<UserListDto>> {
    state.session_require_admin()?;

    let (users, total) = state
        .db
        .list_users(query.limit_or_default(), query.offset_or_default())
        .await?;

    Ok(Json(UserListDto {
        users: users.iter().map(|u| u.into()).collect(),
        total,
    }))
}

fn list_users_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all users, newest first.")
        .tag("admin")
        .response::<200, Json<UserListDto>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

pub async fn get_user(
    mut state: RequestState,
    Path(id): Path<i64>,
) -> ServiceResult<Json<UserDto>> {
    state.session_require_admin()?;

    let user = state.db.get_user_by_id(id).await?;

    if let Some(user) = user {
        return Ok(Json(UserDto::from(&user)));
    }

    Err(ServiceError::NotFound)
}

fn get_user_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get a user by id.")
        .tag("admin")
        .response::<200, Json<UserDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested user does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct UserDetailsDto {
    pub user: UserDto,
    pub account: Option<AdminAccountDto>,
    pub devices: Vec<AdminDeviceDto>,
    pub transactions: Vec<TransactionDto>,
}

pub async fn get_user_details(
    mut state: RequestState,
    Path(id): Path<i64>,
) -> ServiceResult<Json<UserDetailsDto>> {
    state.session_require_admin()?;

    let user = state.db.get_user_by_id(id).await?.ok_or(ServiceError::NotFound)?;
    let account = state.db.get_account_by_user(id).await?;
    let devices = state.db.get_devices_by_user(id).await?;

    let transactions = match &account {
        Some(account) => state.db.get_transactions_by_account(account.id, 50).await?,
        None => Vec::new(),
    };

    Ok(Json(UserDetailsDto {
        user: UserDto::from(&user),
        account: account.as_ref().map(AdminAccountDto::from),
        devices: devices.iter().map(|d| d.into()).collect(),
        transactions: transactions.iter().map(|t| t.into()).collect(),
    }))
}

fn get_user_details_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get a user with account, devices and recent transactions.")
        .tag("admin")
        .response::<200, Json<UserDetailsDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested user does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct SetAccessDto {
    pub is_active: bool,
}

pub async fn set_user_access(
    mut state: RequestState,
    Path(id): Path<i64>,
    form: Json<SetAccessDto>,
) -> ServiceResult<Json<UserDto>> {
    state.session_require_admin()?;

    let user = state.db.set_user_active(id, form.0.is_active).await?;

    if let Some(user) = user {
        return Ok(Json(UserDto::from(&user)));
    }

    Err(ServiceError::NotFound)
}

fn set_user_access_docs(op: TransformOperation) -> TransformOperation {
    op.description("Enable or disable a user's access.")
        .tag("admin")
        .response::<200, Json<UserDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested user does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

pub async fn delete_user(
    mut state: RequestState,
    Path(id): Path<i64>,
) -> ServiceResult<StatusCode> {
    state.session_require_admin()?;

    if !state.db.delete_user(id).await? {
        return Err(ServiceError::NotFound);
    }

    Ok(StatusCode::NO_CONTENT)
}

fn delete_user_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete a user with all devices, account and transactions.")
        .tag("admin")
        .response_with::<204, (), _>(|res| res.description("The user was successfully deleted!"))
        .response_with::<404, (), _>(|res| res.description("The requested user does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct AssignDeviceDto {
    pub device_id: Option<String>,
}

pub async fn assign_device(
    mut state: RequestState,
    Path(id): Path<i64>,
    form: Json<AssignDeviceDto>,
) -> ServiceResult<Json<DeviceDto>> {
    state.session_require_admin()?;

    if state.db.get_user_by_id(id).await?.is_none() {
        return Err(ServiceError::NotFound);
    }

    let device = state
        .db
        .assign_device(id, form.0.device_id.as_deref())
        .await?;
    Ok(Json(DeviceDto::from(&device)))
}

fn assign_device_docs(op: TransformOperation) -> TransformOperation {
    op.description("Assign a new device to a user.")
        .tag("admin")
        .response::<200, Json<DeviceDto>>()
        .response_with::<400, (), _>(|res| res.description("Device already assigned!"))
        .response_with::<404, (), _>(|res| res.description("The requested user does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

pub async fn list_devices(mut state: RequestState) -> ServiceResult<Json<Vec<AdminDeviceDto>>> {
    state.session_require_admin()?;

    let devices = state.db.get_all_devices().await?;
    Ok(Json(devices.iter().map(|d| d.into()).collect()))
}

fn list_devices_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all devices.")
        .tag("admin")
        .response::<200, Json<Vec<AdminDeviceDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

pub async fn verify_device(
    mut state: RequestState,
    Path(id): Path<i64>,
) -> ServiceResult<Json<DeviceDto>> {
    state.session_require_admin()?;

    let device = state.db.set_device_verified(id).await?;

    if let Some(device) = device {
        return Ok(Json(DeviceDto::from(&device)));
    }

    Err(ServiceError::NotFound)
}

fn verify_device_docs(op: TransformOperation) -> TransformOperation {
    op.description("Mark a device as verified.")
        .tag("admin")
        .response::<200, Json<DeviceDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested device does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

pub async fn delete_device(
    mut state: RequestState,
    Path(id): Path<i64>,
) -> ServiceResult<StatusCode> {
    state.session_require_admin()?;

    if !state.db.delete_device(id).await? {
        return Err(ServiceError::NotFound);
    }

    Ok(StatusCode::NO_CONTENT)
}

fn delete_device_docs(op: TransformOperation) -> TransformOperation {
    op.description("Delete a device.")
        .tag("admin")
        .response_with::<204, (), _>(|res| res.description("The device was successfully deleted!"))
        .response_with::<404, (), _>(|res| res.description("The requested device does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

pub async fn list_accounts(mut state: RequestState) -> ServiceResult<Json<Vec<AdminAccountDto>>> {
    state.session_require_admin()?;

    let accounts = state.db.get_all_accounts().await?;
    Ok(Json(accounts.iter().map(|a| a.into()).collect()))
}

fn list_accounts_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all accounts.")
        .tag("admin")
        .response::<200, Json<Vec<AdminAccountDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

pub async fn list_transactions(
    mut state: RequestState,
    query: Query<PageQueryDto>,
) -> ServiceResult<Json<TransactionListDto>> {
    state.session_require_admin()?;

    let (transactions, total) = state
        .db
        .get_all_transactions(query.limit_or_default(), query.offset_or_default())
        .await?;

    Ok(Json(TransactionListDto {
        transactions: transactions.iter().map(|t| t.into()).collect(),
        total,
    }))
}

fn list_transactions_docs(op: TransformOperation) -> TransformOperation {
    op.description("List all transactions across all accounts.")
        .tag("admin")
        .response::<200, Json<TransactionListDto>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct StatsDto {
    pub total_users: i64,
    pub active_users: i64,
    pub total_devices: i64,
    pub verified_devices: i64,
    pub total_accounts: i64,
    pub total_balance: String,
    pub total_transactions: i64,
}

impl From<&models::Stats> for StatsDto {
    fn from(value: &models::Stats) -> Self {
        Self {
            total_users: value.total_users,
            active_users: value.active_users,
            total_devices: value.total_devices,
            verified_devices: value.verified_devices,
            total_accounts: value.total_accounts,
            total_balance: value.total_balance.to_string(),
            total_transactions: value.total_transactions,
        }
    }
}

pub async fn get_stats(mut state: RequestState) -> ServiceResult<Json<StatsDto>> {
    state.session_require_admin()?;

    let stats = state.db.get_stats().await?;
    Ok(Json(StatsDto::from(&stats)))
}

fn get_stats_docs(op: TransformOperation) -> TransformOperation {
    op.description("Aggregated user, device and ledger statistics.")
        .tag("admin")
        .response::<200, Json<StatsDto>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<403, (), _>(|res| res.description("Missing permissions!"))
        .security_requirement_scopes("BearerToken", ["admin"])
}
