// Chat broker: session lifecycle, event dispatch and presence

use crate::chat::client::{ClientConnection, ClientManager, ConnectionId, EventSender};
use crate::chat::error::{ChatError, ChatResult};
use crate::chat::identity::IdentityRegistry;
use crate::chat::message::{
    FileAttachment, MessageDraft, MessageKind, MessageLog, StoredFile, MAX_FILE_SIZE,
};
use crate::chat::moderation::{AdminCredentials, Authentication, ModerationGate};
use crate::chat::protocol::{ClientEvent, InboundFile, Notice, ReplyFields, ServerEvent};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Text that asks for a private roster listing instead of being posted
pub const ONLINE_COMMAND: &str = "!online";

/// Characters of message text carried in a mention preview
pub const MENTION_PREVIEW_CHARS: usize = 50;

/// Owns all shared chat state.
///
/// Each piece synchronizes itself, so handlers for different connections may
/// run concurrently. Events from one connection must be fed in order.
pub struct MessageBroker {
    clients: ClientManager,
    identities: IdentityRegistry,
    log: MessageLog,
    moderation: ModerationGate,
}

impl MessageBroker {
    /// Create a new message broker
    pub fn new(credentials: Option<AdminCredentials>) -> Self {
        Self {
            clients: ClientManager::new(),
            identities: IdentityRegistry::new(),
            log: MessageLog::new(),
            moderation: ModerationGate::new(credentials),
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    pub fn message_log(&self) -> &MessageLog {
        &self.log
    }

    pub fn moderation(&self) -> &ModerationGate {
        &self.moderation
    }

    /// Register a new connection and replay history to it
    pub async fn open_session(&self, tx: EventSender) -> ConnectionId {
        let id = self.clients.add_client(ClientConnection::new(tx)).await;

        let messages = self.log.snapshot().await;
        self.clients
            .unicast(id, Notice::Init { messages }.into())
            .await;

        let users = self.identities.all().await;
        self.clients
            .unicast(id, Notice::OnlineUsers { users }.into())
            .await;

        id
    }

    /// Tear down a connection. Safe to call more than once.
    pub async fn close_session(&self, id: ConnectionId) {
        self.clients.remove_client(id).await;
        self.moderation.revoke(id).await;

        if let Some(name) = self.identities.release(id).await {
            tracing::info!("{} left (client {})", name, id);
            self.clients
                .broadcast_all(ServerEvent::system(format!("{} has left the chat.", name)))
                .await;
        }

        self.publish_presence().await;
    }

    /// Parse and handle one raw text frame.
    ///
    /// Frames that do not parse are logged and dropped.
    pub async fn handle_frame(&self, id: ConnectionId, text: &str) {
        match ClientEvent::from_text(text) {
            Ok(event) => self.handle_event(id, event).await,
            Err(e) => {
                tracing::warn!("Ignoring malformed event from client {}: {}", id, e);
            }
        }
    }

    /// Handle one inbound event to completion
    pub async fn handle_event(&self, id: ConnectionId, event: ClientEvent) {
        let result = match event {
            ClientEvent::SetUsername { username } => self.handle_set_username(id, &username).await,
            ClientEvent::ChangeUsername { new_username } => {
                self.handle_change_username(id, &new_username).await
            }
            ClientEvent::User { message, reply } => self.handle_chat(id, message, reply).await,
            ClientEvent::File(file) => self.handle_file(id, file).await,
            ClientEvent::AdminLogin { username, password } => {
                self.handle_admin_login(id, &username, &password).await;
                Ok(())
            }
            ClientEvent::DeleteMessage { message_id } => self.handle_delete(id, message_id).await,
            ClientEvent::Typing => self.handle_typing(id, true).await,
            ClientEvent::StopTyping => self.handle_typing(id, false).await,
        };

        if let Err(e) = result {
            self.reject(id, e).await;
        }
    }

    /// Push the current roster to every connection
    pub async fn publish_presence(&self) {
        let users = self.identities.all().await;
        self.clients
            .broadcast_all(Notice::OnlineUsers { users }.into())
            .await;
    }

    /// Republish the roster on a fixed period
    pub fn start_presence_heartbeat(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(period);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval_timer.tick().await;
                self.publish_presence().await;
            }
        })
    }

    /// Attachment lookup for the download route
    pub async fn lookup_file(&self, file_id: &str) -> ChatResult<Option<StoredFile>> {
        self.log.lookup_file(file_id).await
    }

    async fn handle_set_username(&self, id: ConnectionId, username: &str) -> ChatResult<()> {
        let claimed = self.identities.claim(id, username).await?;

        self.clients
            .unicast(
                id,
                Notice::UsernameSet {
                    username: claimed.name.clone(),
                }
                .into(),
            )
            .await;

        match claimed.previous {
            Some(previous) if previous == claimed.name => {}
            Some(previous) => {
                tracing::info!("{} is now known as {}", previous, claimed.name);
                self.publish_presence().await;
                self.clients
                    .broadcast_all(ServerEvent::system(format!(
                        "{} is now known as {}.",
                        previous, claimed.name
                    )))
                    .await;
            }
            None => {
                tracing::info!("Client {} joined as {}", id, claimed.name);
                self.publish_presence().await;
                self.clients
                    .broadcast_except(
                        ServerEvent::system(format!("{} has joined the chat.", claimed.name)),
                        id,
                    )
                    .await;
            }
        }

        Ok(())
    }

    async fn handle_change_username(&self, id: ConnectionId, new_username: &str) -> ChatResult<()> {
        let renamed = self.identities.rename(id, new_username).await?;

        self.clients
            .unicast(
                id,
                Notice::UsernameChanged {
                    old_username: renamed.old.clone(),
                    new_username: renamed.new.clone(),
                }
                .into(),
            )
            .await;

        if renamed.is_noop() {
            return Ok(());
        }

        tracing::info!("{} is now known as {}", renamed.old, renamed.new);
        self.publish_presence().await;
        self.clients
            .broadcast_all(ServerEvent::system(format!(
                "{} is now known as {}.",
                renamed.old, renamed.new
            )))
            .await;

        Ok(())
    }

    async fn handle_chat(
        &self,
        id: ConnectionId,
        text: String,
        reply: ReplyFields,
    ) -> ChatResult<()> {
        let username = self.require_name(id).await?;

        if text == ONLINE_COMMAND {
            let users = self.identities.all().await;
            self.clients
                .unicast(id, ServerEvent::system(online_listing(&users)))
                .await;
            return Ok(());
        }

        let message = self
            .log
            .append(MessageDraft {
                username: username.clone(),
                message: text,
                is_admin: self.moderation.is_elevated(id).await,
                reply: reply.into_ref(),
                kind: MessageKind::User,
            })
            .await;

        self.clients
            .broadcast_all(ServerEvent::Chat(message.clone()))
            .await;

        for name in mentioned_names(&message.message) {
            let Some(target) = self.identities.find(name).await else {
                continue;
            };
            if target == id {
                continue;
            }

            self.clients
                .unicast(
                    target,
                    Notice::Mention {
                        from: username.clone(),
                        message: preview(&message.message),
                    }
                    .into(),
                )
                .await;
        }

        Ok(())
    }

    async fn handle_file(&self, id: ConnectionId, file: InboundFile) -> ChatResult<()> {
        let username = self.require_name(id).await?;

        if file.file_size > MAX_FILE_SIZE {
            tracing::info!(
                "Rejected {} byte file {:?} from {}",
                file.file_size,
                file.file_name,
                username
            );
            return Err(ChatError::FileTooLarge {
                size: file.file_size,
                limit: MAX_FILE_SIZE,
            });
        }

        let message = self
            .log
            .append(MessageDraft {
                username,
                message: file.message.unwrap_or_default(),
                is_admin: self.moderation.is_elevated(id).await,
                reply: file.reply.into_ref(),
                kind: MessageKind::File(FileAttachment {
                    file_id: file.file_id,
                    file_name: file.file_name,
                    file_type: file.file_type,
                    file_size: file.file_size,
                    file_data: file.file_data,
                    file_category: file.file_category,
                }),
            })
            .await;

        self.clients.broadcast_all(ServerEvent::Chat(message)).await;
        Ok(())
    }

    async fn handle_admin_login(&self, id: ConnectionId, username: &str, password: &str) {
        let notice = match self.moderation.authenticate(id, username, password).await {
            Authentication::Granted => {
                let name = self
                    .identities
                    .name_of(id)
                    .await
                    .unwrap_or_else(|| "Admin".to_string());
                format!("{} has logged in as administrator.", name)
            }
            Authentication::Denied => "Admin login failed. Incorrect password.".to_string(),
        };

        self.clients.unicast(id, ServerEvent::system(notice)).await;
    }

    async fn handle_delete(&self, id: ConnectionId, message_id: u64) -> ChatResult<()> {
        self.moderation.authorize_delete(id).await?;

        if !self.log.delete(message_id).await {
            return Err(ChatError::MessageNotFound(message_id));
        }

        tracing::info!("Client {} deleted message {}", id, message_id);
        self.clients
            .broadcast_all(Notice::DeleteMessage { message_id }.into())
            .await;
        Ok(())
    }

    async fn handle_typing(&self, id: ConnectionId, started: bool) -> ChatResult<()> {
        // Unnamed connections have nothing to show
        let Some(username) = self.identities.name_of(id).await else {
            return Ok(());
        };

        let notice = if started {
            Notice::Typing { username }
        } else {
            Notice::StopTyping { username }
        };
        self.clients.broadcast_except(notice.into(), id).await;
        Ok(())
    }

    async fn require_name(&self, id: ConnectionId) -> ChatResult<String> {
        self.identities.name_of(id).await.ok_or(ChatError::NotNamed)
    }

    /// Report a rejection privately to the originating connection
    async fn reject(&self, id: ConnectionId, error: ChatError) {
        tracing::debug!("Rejected event from client {}: {}", id, error);

        let message = error.to_string();
        let event = match error {
            ChatError::UsernameEmpty => Notice::UsernameInvalid { message }.into(),
            ChatError::UsernameTaken => Notice::UsernameTaken { message }.into(),
            ChatError::FileTooLarge { .. } => ServerEvent::system(message),
            ChatError::NotNamed
            | ChatError::NotAuthorized
            | ChatError::MessageNotFound(_)
            | ChatError::CorruptPayload(_) => ServerEvent::error(message),
        };

        self.clients.unicast(id, event).await;
    }
}

static MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").unwrap());

/// Distinct `@name` tokens in order of first appearance.
///
/// A name is one or more ASCII letters, digits or underscores.
pub fn mentioned_names(text: &str) -> Vec<&str> {
    let mut seen = HashSet::new();

    MENTION
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|name| seen.insert(*name))
        .collect()
}

/// First characters of a message, with `...` appended when cut
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MENTION_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

fn online_listing(users: &[String]) -> String {
    let lines: Vec<String> = users
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{}. {}👨‍💻", i + 1, name))
        .collect();
    format!("Online users 🌐:<br>{}", lines.join("<br>"))
}
