use std::sync::Arc;

use aide::{
    axum::{
        routing::{get, get_with},
        ApiRouter, IntoApiResponse,
    },
    openapi::{OpenApi, Tag},
    redoc::Redoc,
    transform::TransformOpenApi,
};
use axum::{response::IntoResponse, Extension, Json};

pub fn api_docs(api: TransformOpenApi) -> TransformOpenApi {
    api.title("Jambo Savings API")
        .summary("Savings accounts with device verified logins")
        .description(include_str!("../README.md"))
        .tag(Tag {
            name: "auth".into(),
            description: Some("Registration, login and token handling".into()),
            ..Default::default()
        })
        .tag(Tag {
            name: "account".into(),
            description: Some("Balance, deposits, withdrawals and history".into()),
            ..Default::default()
        })
        .tag(Tag {
            name: "admin".into(),
            description: Some("User and device management".into()),
            ..Default::default()
        })
        .security_scheme(
            "BearerToken",
            aide::openapi::SecurityScheme::Http {
                scheme: "bearer".into(),
                bearer_format: Some("JWT".into()),
                description: Some("Token issued by /api/auth/login.".into()),
                extensions: Default::default(),
            },
        )
}

pub fn docs_routes() -> ApiRouter {
    aide::gen::infer_responses(true);

    let router = ApiRouter::new()
        .api_route_with(
            "/",
            get_with(
                Redoc::new("/docs/api.json")
                    .with_title("jambo-savings")
                    .axum_handler(),
                |op| op.description("This documentation page."),
            ),
            |p| p,
        )
        .route("/api.json", get(serve_docs));

    aide::gen::infer_responses(false);

    router
}

async fn serve_docs(Extension(api): Extension<Arc<OpenApi>>) -> impl IntoApiResponse {
    Json(api).into_response()
}
