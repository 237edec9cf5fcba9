//! Login gate check against the single configured credential.
//!
//! Callers hash the plaintext themselves and pass the hex SHA-256 digest;
//! [`password_hash`] does that for them.

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::config::CredentialConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Deliberately says nothing about which half was wrong
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Lowercase hex SHA-256 of `plain`.
pub fn password_hash(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialVerifier {
    username: String,
    password_hash: String,
}

impl CredentialVerifier {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
        }
    }

    pub fn from_config(config: &CredentialConfig) -> Self {
        Self::new(config.username.clone(), config.password_hash.clone())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// False when no password hash is configured; nobody can log in then.
    pub fn is_enabled(&self) -> bool {
        !self.password_hash.is_empty()
    }

    /// Exact comparison of both strings. An unset hash matches nothing.
    pub fn verify(&self, username: &str, password_hash: &str) -> bool {
        self.is_enabled()
            && username == self.username
            && password_hash == self.password_hash
    }

    pub fn authenticate(&self, username: &str, password_hash: &str) -> Result<(), AuthError> {
        if self.verify(username, password_hash) {
            Ok(())
        } else {
            debug!("Rejected login attempt");
            Err(AuthError::InvalidCredentials)
        }
    }
}
