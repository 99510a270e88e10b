// Chat relay core
//
// This module holds the shared chat state (names, history, admin set), the
// broker that drives it from client events, and the HTTP/WebSocket front
// end that feeds the broker.

pub mod error;
pub mod message;
pub mod protocol;
pub mod client;
pub mod identity;
pub mod moderation;
pub mod broker;
pub mod server;
pub mod cli;

pub use error::{ChatError, ChatResult};
pub use message::{Message, MessageKind, MessageLog, StoredFile, MAX_FILE_SIZE};
pub use protocol::{ClientEvent, Notice, ServerEvent};
pub use client::{ClientConnection, ClientManager, ConnectionId};
pub use identity::IdentityRegistry;
pub use moderation::{AdminCredentials, Authentication, ModerationGate};
pub use broker::MessageBroker;
pub use server::{run_session, ServerInstance, MAX_FRAME_SIZE};
pub use cli::{RelayCli, RelayConfig};
