//! chatrelay - real-time group chat relay
//!
//! Clients connect over a WebSocket, claim a unique display name, exchange
//! text and small file attachments, and see a live roster of who else is
//! connected. The [`chat`] module holds the broker and its front end.

pub mod chat;

pub use chat::{MessageBroker, RelayCli, RelayConfig, ServerInstance};
