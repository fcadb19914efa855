//! Authentication backend for axum-login.
//!
//! Users live in the account store; sessions are keyed by user id and
//! invalidated whenever the stored password hash changes.

use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use axum_login::{AuthUser, AuthnBackend, UserId};
use rand::rngs::OsRng;
use serde::Deserialize;

use crate::domain::error::QuantdeskError;
use crate::domain::user::User;
use crate::ports::store_port::AccountStore;

impl AuthUser for User {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }

    fn session_auth_hash(&self) -> &[u8] {
        self.password_hash.as_bytes()
    }
}

/// Login credentials submitted as JSON.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct Backend {
    store: Arc<dyn AccountStore + Send + Sync>,
}

impl Backend {
    pub fn new(store: Arc<dyn AccountStore + Send + Sync>) -> Self {
        Self { store }
    }
}

/// Hashes a password with Argon2id and a fresh salt, in PHC string form.
pub fn hash_password(password: &str) -> Result<String, QuantdeskError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default());
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| QuantdeskError::Database {
            reason: format!("password hashing failed: {e}"),
        })
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

impl AuthnBackend for Backend {
    type User = User;
    type Credentials = Credentials;
    type Error = QuantdeskError;

    async fn authenticate(
        &self,
        creds: Self::Credentials,
    ) -> Result<Option<Self::User>, Self::Error> {
        let Some(user) = self.store.find_user_by_username(creds.username.trim())? else {
            return Ok(None);
        };

        if verify_password(&creds.password, &user.password_hash) {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    async fn get_user(&self, user_id: &UserId<Self>) -> Result<Option<Self::User>, Self::Error> {
        self.store.find_user(*user_id)
    }
}
