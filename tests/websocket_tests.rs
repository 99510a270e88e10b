// End-to-end tests over a real listener

use chatrelay::chat::{AdminCredentials, RelayConfig, ServerInstance};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(public_dir: &std::path::Path) -> ServerInstance {
    let config = RelayConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        public_dir: public_dir.to_path_buf(),
        admin_credentials: Some(AdminCredentials::new("admin", "pw")),
        presence_interval: Duration::from_secs(60),
    };
    ServerInstance::start(config).await.unwrap()
}

async fn open(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, event: Value) {
    socket.send(Frame::text(event.to_string())).await.unwrap();
}

/// Next event of the given type, skipping anything else
async fn next_of(socket: &mut Socket, kind: &str) -> Value {
    let wait = async {
        while let Some(frame) = socket.next().await {
            if let Frame::Text(text) = frame.unwrap() {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        }
        panic!("Socket closed while waiting for {}", kind);
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {}", kind))
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_chat_over_websocket() {
    let dir = tempdir().unwrap();
    let server = start(dir.path()).await;
    let addr = server.local_addr();

    let mut alice = open(addr).await;
    let init = next_of(&mut alice, "init").await;
    assert_eq!(init["messages"], json!([]));

    send(&mut alice, json!({"type": "set-username", "username": "alice"})).await;
    assert_eq!(next_of(&mut alice, "username-set").await["username"], "alice");

    let mut bob = open(addr).await;
    next_of(&mut bob, "init").await;
    send(&mut bob, json!({"type": "set-username", "username": "bob"})).await;
    next_of(&mut bob, "username-set").await;

    send(&mut alice, json!({"type": "user", "message": "hello @bob"})).await;
    let mention = next_of(&mut bob, "mention").await;
    assert_eq!(mention["from"], "alice");
    assert_eq!(mention["message"], "hello @bob");

    let chat = next_of(&mut alice, "user").await;
    assert_eq!(chat["id"], 0);
    assert_eq!(chat["username"], "alice");

    alice.close(None).await.unwrap();
    let departure = next_of(&mut bob, "system").await;
    assert_eq!(departure["message"], "alice has left the chat.");
    let roster = next_of(&mut bob, "online-users").await;
    assert_eq!(roster["users"], json!(["bob"]));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_routes() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<title>chat</title>").unwrap();
    let server = start(dir.path()).await;
    let addr = server.local_addr();

    let health = http_get(addr, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.ends_with("OK"));

    let index = http_get(addr, "/").await;
    assert!(index.starts_with("HTTP/1.1 200"));
    assert!(index.contains("<title>chat</title>"));

    let missing = http_get(addr, "/download/nope").await;
    assert!(missing.starts_with("HTTP/1.1 404"));
    assert!(missing.ends_with("File not found"));

    let mut alice = open(addr).await;
    send(&mut alice, json!({"type": "set-username", "username": "alice"})).await;
    send(
        &mut alice,
        json!({
            "type": "file",
            "fileId": "f-1",
            "fileName": "greeting.txt",
            "fileType": "text/plain",
            "fileSize": 5,
            "fileData": "aGVsbG8=",
        }),
    )
    .await;
    next_of(&mut alice, "file").await;

    let download = http_get(addr, "/download/f-1").await;
    assert!(download.starts_with("HTTP/1.1 200"));
    assert!(download
        .to_ascii_lowercase()
        .contains("content-disposition: attachment; filename=\"greeting.txt\""));
    assert!(download.ends_with("hello"));

    server.shutdown().await.unwrap();
}
