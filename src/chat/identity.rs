// Display-name registry

use crate::chat::client::ConnectionId;
use crate::chat::error::{ChatError, ChatResult};
use tokio::sync::RwLock;

/// Result of a successful `claim`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claimed {
    pub name: String,
    /// Name the connection held before, if any
    pub previous: Option<String>,
}

/// Result of a successful `rename`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub old: String,
    pub new: String,
}

impl Renamed {
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

struct Identity {
    name: String,
    connection: ConnectionId,
}

/// Unique display names bound to live connections.
///
/// Names are stored trimmed and never empty, and no two connections ever hold
/// the same name. A single list keeps roster order and name ownership in one
/// place, so every operation is one critical section.
pub struct IdentityRegistry {
    entries: RwLock<Vec<Identity>>,
}

fn normalize(raw: &str) -> ChatResult<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ChatError::UsernameEmpty);
    }
    Ok(name)
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Bind `raw` (trimmed) to `connection`, replacing any name it held before
    pub async fn claim(&self, connection: ConnectionId, raw: &str) -> ChatResult<Claimed> {
        let name = normalize(raw)?;
        let mut entries = self.entries.write().await;

        if entries
            .iter()
            .any(|e| e.name == name && e.connection != connection)
        {
            return Err(ChatError::UsernameTaken);
        }

        let previous = match entries.iter_mut().find(|e| e.connection == connection) {
            Some(entry) => Some(std::mem::replace(&mut entry.name, name.to_string())),
            None => {
                entries.push(Identity {
                    name: name.to_string(),
                    connection,
                });
                None
            }
        };

        Ok(Claimed {
            name: name.to_string(),
            previous,
        })
    }

    /// Swap the connection's current name for `raw` (trimmed).
    ///
    /// Renaming to the name already held succeeds without changing anything.
    pub async fn rename(&self, connection: ConnectionId, raw: &str) -> ChatResult<Renamed> {
        let mut entries = self.entries.write().await;

        let index = entries
            .iter()
            .position(|e| e.connection == connection)
            .ok_or(ChatError::NotNamed)?;
        let name = normalize(raw)?;

        if entries
            .iter()
            .any(|e| e.name == name && e.connection != connection)
        {
            return Err(ChatError::UsernameTaken);
        }

        let old = std::mem::replace(&mut entries[index].name, name.to_string());
        Ok(Renamed {
            old,
            new: name.to_string(),
        })
    }

    /// Drop the connection's name. Safe to call any number of times.
    pub async fn release(&self, connection: ConnectionId) -> Option<String> {
        let mut entries = self.entries.write().await;
        let index = entries.iter().position(|e| e.connection == connection)?;
        Some(entries.remove(index).name)
    }

    pub async fn is_claimed(&self, name: &str) -> bool {
        let entries = self.entries.read().await;
        entries.iter().any(|e| e.name == name)
    }

    /// Roster in registration order
    pub async fn all(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Connection currently holding `name`
    pub async fn find(&self, name: &str) -> Option<ConnectionId> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.connection)
    }

    /// Name currently held by `connection`
    pub async fn name_of(&self, connection: ConnectionId) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|e| e.connection == connection)
            .map(|e| e.name.clone())
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
