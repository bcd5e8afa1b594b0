use std::sync::Arc;

use aide::axum::routing::get;
use aide::axum::{ApiRouter, IntoApiResponse};
use aide::openapi::OpenApi;
use axum::http::{header, HeaderValue, Method};
use axum::{Extension, Json};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

mod api;
mod auth_token;
mod database;
mod docs;
mod env;
mod error;
mod models;
mod request_state;

use crate::database::{AppState, DatabaseConnection};
use crate::error::{ServiceError, ServiceResult};

#[tokio::main]
async fn main() {
    let result = init().await;

    let exit_code = match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn init() -> ServiceResult<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let app_state = AppState::connect(env::DATABASE_URL.as_str()).await;

    seed_admin(&app_state).await?;
    start_server(app_state).await
}

/// Ensure the configured admin user and its verified device exist.
async fn seed_admin(app_state: &AppState) -> ServiceResult<()> {
    let connection = app_state
        .pool
        .acquire()
        .await
        .map_err(|err| ServiceError::InternalServerError(err.to_string()))?;
    let mut db = DatabaseConnection { connection };

    let password_hash = api::password_hash_create(env::ADMIN_PASSWORD.as_str())?;
    db.seed_admin(
        env::ADMIN_EMAIL.as_str(),
        &password_hash,
        env::ADMIN_DEVICE_ID.as_str(),
    )
    .await
}

async fn start_server(app_state: AppState) -> ServiceResult<()> {
    let mut open_api = OpenApi::default();

    let app = ApiRouter::new()
        .nest_api_service("/api", api::router(app_state))
        .nest_api_service("/docs", docs::docs_routes())
        .route("/health", get(health))
        .finish_api_with(&mut open_api, docs::api_docs)
        .layer(Extension(Arc::new(open_api)))
        .layer(cors_layer());

    let address = format!("{}:{}", env::API_HOST.as_str(), env::API_PORT.as_str());
    log::info!("Start http server at {}", address);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|err| ServiceError::InternalServerError(err.to_string()))?;
    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|err| ServiceError::InternalServerError(err.to_string()))?;

    Ok(())
}

fn cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = env::CORS_ORIGIN
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health() -> impl IntoApiResponse {
    Json(json!({
        "status": "OK",
        "timestamp": format!("{:?}", chrono::Utc::now()),
        "service": "Jambo Savings Backend",
    }))
}
