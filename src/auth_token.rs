use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Role, User};

/// Claims of a bearer token. Role is only a routing hint for clients, every
/// request re-checks role and active flag against storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id.
    pub sub: i64,
    pub role: Role,
    /// Device the token was issued for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<i64>,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration time (unix timestamp).
    pub exp: i64,
}

/// Issue a signed HS256 token for the given user, valid for
/// `JWT_EXPIRES_IN_MINUTES`.
pub fn create_token(user: &User, device_id: Option<i64>) -> ServiceResult<String> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: user.id,
        role: user.role,
        device: device_id,
        iat: now.timestamp(),
        exp: (now + Duration::minutes(*env::JWT_EXPIRES_IN_MINUTES)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(env::JWT_SECRET.as_bytes()),
    )
    .map_err(|err| ServiceError::InternalServerError(format!("sign token: {err}")))
}

/// Verify signature and expiry. Every failure collapses to the same 401.
pub fn verify_token(token: &str) -> ServiceResult<TokenClaims> {
    decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(env::JWT_SECRET.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ServiceError::Unauthorized("Invalid or expired token"))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::User;

    fn test_user(role: Role) -> User {
        User {
            id: 7,
            email: "jane.doe@example.org".to_owned(),
            password_hash: vec![0u8; 32],
            first_name: "Jane".to_owned(),
            last_name: "Doe".to_owned(),
            role,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn token_round_trip() {
        let token = create_token(&test_user(Role::User), Some(3)).unwrap();
        let claims = verify_token(&token).unwrap();

        assert_eq!(claims.sub, 7);
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.device, Some(3));
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = create_token(&test_user(Role::Admin), None).unwrap();
        let mut tampered = token.clone();
        tampered.pop();

        assert_eq!(
            verify_token(&tampered),
            Err(ServiceError::Unauthorized("Invalid or expired token"))
        );
        assert!(verify_token("not-a-token").is_err());
    }
}
