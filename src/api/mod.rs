use aide::axum::ApiRouter;
use argon2rs::argon2i_simple;
use rand::{distributions::Alphanumeric, Rng};

use crate::database::AppState;
use crate::env;
use crate::error::ServiceResult;

pub mod account;
pub mod admin;
pub mod auth;

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .merge(auth::router(app_state.clone()))
        .merge(account::router(app_state.clone()))
        .merge(admin::router(app_state))
}

/// Hash a password with argon2, keyed with the `PASSWORD_SALT` secret.
pub fn password_hash_create(password: &str) -> ServiceResult<Vec<u8>> {
    Ok(argon2i_simple(password, env::PASSWORD_SALT.as_str()).to_vec())
}

pub fn password_hash_verify(hash: &[u8], password: &str) -> ServiceResult<bool> {
    Ok(password_hash_create(password)? == hash)
}

/// Random alphanumeric password for the reset flow.
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_and_rejects() {
        let hash = password_hash_create("secret1").unwrap();

        assert!(password_hash_verify(&hash, "secret1").unwrap());
        assert!(!password_hash_verify(&hash, "secret2").unwrap());
        assert!(!password_hash_verify(&hash, "").unwrap());
    }

    #[test]
    fn hash_is_not_the_password() {
        let hash = password_hash_create("secret1").unwrap();
        assert_ne!(hash, b"secret1".to_vec());
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn generated_passwords_are_random() {
        let a = generate_password(10);
        let b = generate_password(10);

        assert_eq!(a.len(), 10);
        assert_ne!(a, b);
    }
}
