// Admin authentication and delete authorization

use crate::chat::client::ConnectionId;
use crate::chat::error::{ChatError, ChatResult};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

/// The single admin credential, kept only as digests
#[derive(Clone)]
pub struct AdminCredentials {
    username: [u8; 32],
    password: [u8; 32],
}

impl AdminCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: digest(username),
            password: digest(password),
        }
    }

    /// Compare in constant time
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username.ct_eq(&digest(username));
        let pass_ok = self.password.ct_eq(&digest(password));
        (user_ok & pass_ok).unwrap_u8() == 1
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminCredentials(..)")
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    Granted,
    Denied,
}

/// Tracks which connections hold the elevated capability
pub struct ModerationGate {
    credentials: Option<AdminCredentials>,
    elevated: RwLock<HashSet<ConnectionId>>,
}

impl ModerationGate {
    /// Without credentials every login attempt is denied
    pub fn new(credentials: Option<AdminCredentials>) -> Self {
        Self {
            credentials,
            elevated: RwLock::new(HashSet::new()),
        }
    }

    pub async fn authenticate(
        &self,
        connection: ConnectionId,
        username: &str,
        password: &str,
    ) -> Authentication {
        let granted = self
            .credentials
            .as_ref()
            .is_some_and(|c| c.matches(username, password));

        if !granted {
            tracing::info!("Admin login denied for client {}", connection);
            return Authentication::Denied;
        }

        let mut elevated = self.elevated.write().await;
        elevated.insert(connection);
        tracing::info!("Client {} elevated to admin", connection);
        Authentication::Granted
    }

    pub async fn is_elevated(&self, connection: ConnectionId) -> bool {
        let elevated = self.elevated.read().await;
        elevated.contains(&connection)
    }

    /// Drop elevation; idempotent
    pub async fn revoke(&self, connection: ConnectionId) {
        let mut elevated = self.elevated.write().await;
        elevated.remove(&connection);
    }

    pub async fn authorize_delete(&self, connection: ConnectionId) -> ChatResult<()> {
        if self.is_elevated(connection).await {
            Ok(())
        } else {
            Err(ChatError::NotAuthorized)
        }
    }
}
