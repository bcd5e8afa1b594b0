use aide::OperationInput;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};

use crate::{
    auth_token,
    database::{AppState, DatabaseConnection},
    error::{ServiceError, ServiceResult},
    models::{Role, Session},
};

/// Per request context: a pooled database connection and, when a valid
/// bearer token is present, the authenticated session. The user is loaded
/// from storage on every request so deactivations and role changes take
/// effect immediately, whatever the token claims say.
pub struct RequestState {
    pub db: DatabaseConnection,
    pub session: Option<Session>,
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestState
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let connection = state
            .pool
            .acquire()
            .await
            .map_err(|err| ServiceError::InternalServerError(err.to_string()))?;
        let mut db = DatabaseConnection { connection };

        let session = if let Ok(TypedHeader(Authorization(bearer))) =
            parts.extract::<TypedHeader<Authorization<Bearer>>>().await
        {
            match auth_token::verify_token(bearer.token()) {
                Ok(claims) => db
                    .get_user_by_id(claims.sub)
                    .await?
                    .map(|user| Session {
                        user,
                        device_id: claims.device,
                    }),
                Err(_) => None,
            }
        } else {
            None
        };

        Ok(Self { db, session })
    }
}

impl RequestState {
    pub fn session_require(&self) -> ServiceResult<Session> {
        let session = self
            .session
            .as_ref()
            .ok_or(ServiceError::Unauthorized("Invalid or expired token"))?;

        if !session.user.is_active {
            return Err(ServiceError::Forbidden(
                "Account inactive. Please contact support.",
            ));
        }

        Ok(session.clone())
    }

    pub fn session_require_admin(&self) -> ServiceResult<Session> {
        let session = self.session_require()?;

        if session.user.role != Role::Admin {
            return Err(ServiceError::Forbidden("Admin access required"));
        }

        Ok(session)
    }
}

impl OperationInput for RequestState {}
