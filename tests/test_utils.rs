//! Test utilities and fixtures for chatrelay
//!
//! In-memory clients that talk to a broker through the same channels a
//! WebSocket session uses, plus helpers for inspecting what they received.

#![allow(dead_code)]

use chatrelay::chat::client::EventReceiver;
use chatrelay::chat::{AdminCredentials, ClientEvent, ConnectionId, MessageBroker};
use serde_json::Value;
use tokio::sync::mpsc;

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct horse";

/// Broker configured with the test admin credential
pub fn broker() -> MessageBroker {
    MessageBroker::new(Some(AdminCredentials::new(ADMIN_USER, ADMIN_PASSWORD)))
}

/// A connection whose outgoing events land in a local queue
pub struct TestClient {
    pub id: ConnectionId,
    rx: EventReceiver,
}

impl TestClient {
    /// Open a session and discard the initial `init` and roster events
    pub async fn connect(broker: &MessageBroker) -> Self {
        let mut client = Self::connect_raw(broker).await;
        client.drain();
        client
    }

    /// Open a session keeping everything it is sent
    pub async fn connect_raw(broker: &MessageBroker) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = broker.open_session(tx).await;
        Self { id, rx }
    }

    /// Send a JSON event as if it arrived over the socket
    pub async fn send(&self, broker: &MessageBroker, event: Value) {
        broker.handle_frame(self.id, &event.to_string()).await;
    }

    pub async fn send_event(&self, broker: &MessageBroker, event: ClientEvent) {
        broker.handle_event(self.id, event).await;
    }

    /// Everything queued so far, as wire JSON
    pub fn drain(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(serde_json::to_value(&*event).expect("event serializes"));
        }
        events
    }

    /// Queued events of one `type`, discarding the rest
    pub fn drain_of(&mut self, kind: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|e| e["type"] == kind)
            .collect()
    }
}

/// Claim a name and clear the resulting notices from every given client
pub async fn named(broker: &MessageBroker, name: &str) -> TestClient {
    let mut client = TestClient::connect(broker).await;
    client
        .send(broker, serde_json::json!({"type": "set-username", "username": name}))
        .await;
    client.drain();
    client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_receives_init_then_roster() {
        let broker = broker();
        let mut client = TestClient::connect_raw(&broker).await;

        let events = client.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "init");
        assert_eq!(events[1]["type"], "online-users");
    }
}
