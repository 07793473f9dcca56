//! Credential parsing.
//!
//! Private keys are decoded before any network traffic happens, so a bad key
//! fails fast with [`PoolError::Credential`] and never leaves a half-open
//! connection behind.

use std::fmt;
use std::sync::Arc;

use protocol::Credential;
use russh::keys::{decode_secret_key, PrivateKey};

use crate::session::PoolError;

/// A credential ready to be handed to the connection library.
#[derive(Clone)]
pub enum AuthMethod {
    /// Password authentication.
    Password(String),
    /// Public key authentication with a decoded (and decrypted) key.
    PublicKey(Arc<PrivateKey>),
}

impl AuthMethod {
    /// Resolves request credential material.
    ///
    /// An empty passphrase is treated as no passphrase.
    pub fn from_credential(credential: &Credential) -> Result<Self, PoolError> {
        match credential {
            Credential::Password { password } => Ok(AuthMethod::Password(password.clone())),
            Credential::PrivateKey { key, passphrase } => {
                if key.trim().is_empty() {
                    return Err(PoolError::Credential("private key is empty".to_string()));
                }
                let passphrase = passphrase.as_deref().filter(|p| !p.is_empty());
                let key = decode_secret_key(key, passphrase)
                    .map_err(|e| PoolError::Credential(e.to_string()))?;
                Ok(AuthMethod::PublicKey(Arc::new(key)))
            }
        }
    }

    /// Name of the authentication method, for logs.
    pub fn method_name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey(_) => "publickey",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthMethod({})", self.method_name())
    }
}
