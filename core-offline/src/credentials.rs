//! Server credentials read from the host's secure store

use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use bridge_traits::storage::SecureStore;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Secure store key holding the media server access token
pub const ACCESS_TOKEN_KEY: &str = "server.access_token";
/// Secure store key holding the signed-in user id
pub const USER_ID_KEY: &str = "server.user_id";

/// Credentials attached to every transfer
#[derive(Clone, PartialEq, Eq)]
pub struct ServerCredentials {
    pub access_token: String,
    pub user_id: Option<String>,
}

impl ServerCredentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: None,
        }
    }
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredentials")
            .field("access_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Source of the credentials used for a transfer
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// # Errors
    /// `MissingCredentials` when no usable access token is stored
    async fn credentials(&self) -> Result<ServerCredentials>;
}

/// Reads credentials from a [`SecureStore`] on every call
pub struct SecureStoreCredentials {
    store: Arc<dyn SecureStore>,
}

impl SecureStoreCredentials {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }

    async fn read_string(&self, key: &str) -> Result<Option<String>> {
        let raw = self
            .store
            .get_secret(key)
            .await
            .map_err(|e| OfflineError::MissingCredentials(format!("{}: {}", key, e)))?;

        match raw {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| OfflineError::MissingCredentials(format!("{} is not UTF-8", key))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialProvider for SecureStoreCredentials {
    async fn credentials(&self) -> Result<ServerCredentials> {
        let access_token = self
            .read_string(ACCESS_TOKEN_KEY)
            .await?
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                OfflineError::MissingCredentials("no access token stored".to_string())
            })?;

        let user_id = self.read_string(USER_ID_KEY).await?;
        debug!(has_user_id = user_id.is_some(), "Loaded server credentials");

        Ok(ServerCredentials {
            access_token,
            user_id,
        })
    }
}
