// HTTP front end: WebSocket sessions, downloads, health and static assets

use crate::chat::broker::MessageBroker;
use crate::chat::cli::RelayConfig;
use crate::chat::client::handle_client_stream;
use crate::chat::error::ChatError;
use anyhow::{Context, Result};
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;

/// Largest inbound WebSocket message or frame (15 MiB)
pub const MAX_FRAME_SIZE: usize = 15 * 1024 * 1024;

struct AppState {
    broker: Arc<MessageBroker>,
    public_dir: PathBuf,
}

/// A running relay: HTTP listener plus the presence heartbeat
pub struct ServerInstance {
    local_addr: SocketAddr,
    broker: Arc<MessageBroker>,
    shutdown_tx: oneshot::Sender<()>,
    server_task: JoinHandle<Result<()>>,
    heartbeat: JoinHandle<()>,
}

impl ServerInstance {
    /// Bind the listener and start serving in the background
    pub async fn start(config: RelayConfig) -> Result<Self> {
        let broker = Arc::new(MessageBroker::new(config.admin_credentials.clone()));
        let state = Arc::new(AppState {
            broker: broker.clone(),
            public_dir: config.public_dir.clone(),
        });

        let make_svc = make_service_fn(move |_conn| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| route(state.clone(), req)))
            }
        });

        let server = hyper::Server::try_bind(&config.bind_addr)
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?
            .serve(make_svc);
        let local_addr = server.local_addr();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let server_task = tokio::spawn(async move {
            graceful.await.context("HTTP server error")
        });

        let heartbeat = broker.clone().start_presence_heartbeat(config.presence_interval);

        tracing::info!("Chat relay listening on {}", local_addr);

        Ok(Self {
            local_addr,
            broker,
            shutdown_tx,
            server_task,
            heartbeat,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broker(&self) -> Arc<MessageBroker> {
        self.broker.clone()
    }

    /// Run until the listener fails or `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let Self {
            shutdown_tx,
            mut server_task,
            heartbeat,
            ..
        } = self;

        let result = tokio::select! {
            result = &mut server_task => result.context("HTTP server task panicked")?,
            _ = shutdown => {
                tracing::info!("Shutting down");
                let _ = shutdown_tx.send(());
                server_task.await.context("HTTP server task panicked")?
            }
        };

        heartbeat.abort();
        result
    }

    /// Stop accepting connections and wait for the listener to finish
    pub async fn shutdown(self) -> Result<()> {
        self.run_until(async {}).await
    }
}

async fn route(state: Arc<AppState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if is_websocket_upgrade(&req) {
        return Ok(upgrade(state, req));
    }

    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"));
    }

    let path = match percent_decode_str(req.uri().path()).decode_utf8() {
        Ok(path) => path.into_owned(),
        Err(_) => return Ok(text_response(StatusCode::NOT_FOUND, "Not found")),
    };

    let response = if path == "/health" {
        text_response(StatusCode::OK, "OK")
    } else if let Some(file_id) = path.strip_prefix("/download/") {
        download(&state.broker, file_id).await
    } else {
        serve_static(&state.public_dir, &path).await
    };

    Ok(response)
}

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    let upgrade = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    let connection = req
        .headers()
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });

    upgrade && connection
}

fn upgrade(state: Arc<AppState>, mut req: Request<Body>) -> Response<Body> {
    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY) else {
        return text_response(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key");
    };
    let accept = derive_accept_key(key.as_bytes());

    let on_upgrade = hyper::upgrade::on(&mut req);
    let broker = state.broker.clone();

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let config = WebSocketConfig::default()
                    .max_message_size(Some(MAX_FRAME_SIZE))
                    .max_frame_size(Some(MAX_FRAME_SIZE));
                let stream =
                    WebSocketStream::from_raw_socket(upgraded, Role::Server, Some(config)).await;
                run_session(broker, stream).await;
            }
            Err(e) => tracing::warn!("WebSocket upgrade failed: {}", e),
        }
    });

    let builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept);
    finish(builder, Body::empty())
}

/// Drive one chat session from open to close.
///
/// Frames are handled strictly in arrival order; cleanup runs however the
/// socket ends.
pub async fn run_session<S>(broker: Arc<MessageBroker>, stream: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (incoming_tx, mut incoming_rx) = mpsc::unbounded_channel::<String>();

    let id = broker.open_session(outgoing_tx).await;

    let dispatcher = broker.clone();
    let dispatch_task = tokio::spawn(async move {
        while let Some(text) = incoming_rx.recv().await {
            dispatcher.handle_frame(id, &text).await;
        }
    });

    if let Err(e) = handle_client_stream(stream, outgoing_rx, incoming_tx).await {
        tracing::error!("Client stream error: {}", e);
    }

    if let Err(e) = dispatch_task.await {
        tracing::error!("Event handler for client {} failed: {}", id, e);
    }

    broker.close_session(id).await;
}

async fn download(broker: &MessageBroker, file_id: &str) -> Response<Body> {
    match broker.lookup_file(file_id).await {
        Ok(Some(file)) => {
            let content_type = HeaderValue::from_str(&file.mime_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            let builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", header_safe(&file.file_name)),
                );
            finish(builder, Body::from(file.bytes))
        }
        Ok(None) => text_response(StatusCode::NOT_FOUND, "File not found"),
        Err(e @ ChatError::CorruptPayload(_)) => {
            tracing::error!("{}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Stored file is corrupt")
        }
        Err(e) => {
            tracing::error!("Download of {} failed: {}", file_id, e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Keep a filename usable inside a quoted header parameter
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn serve_static(public_dir: &Path, path: &str) -> Response<Body> {
    let relative = match path.trim_start_matches('/') {
        "" => "index.html",
        other => other,
    };

    let relative = Path::new(relative);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return text_response(StatusCode::NOT_FOUND, "Not found");
    }

    match tokio::fs::read(public_dir.join(relative)).await {
        Ok(bytes) => {
            let builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type_for(relative));
            finish(builder, Body::from(bytes))
        }
        Err(_) => text_response(StatusCode::NOT_FOUND, "Not found"),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

fn finish(builder: hyper::http::response::Builder, body: Body) -> Response<Body> {
    builder.body(body).unwrap_or_else(|e| {
        tracing::error!("Failed to build response: {}", e);
        text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_safe() {
        assert_eq!(header_safe("report.pdf"), "report.pdf");
        assert_eq!(header_safe("a\"b\\c\r\n.txt"), "a_b_c__.txt");
        assert_eq!(header_safe("résumé.doc"), "r_sum_.doc");
    }

    #[test]
    fn test_upgrade_detection() {
        let req = Request::builder()
            .header(header::UPGRADE, "WebSocket")
            .header(header::CONNECTION, "keep-alive, Upgrade")
            .body(Body::empty())
            .unwrap();
        assert!(is_websocket_upgrade(&req));

        let req = Request::builder()
            .header(header::CONNECTION, "keep-alive")
            .body(Body::empty())
            .unwrap();
        assert!(!is_websocket_upgrade(&req));
    }

    #[tokio::test]
    async fn test_serve_static() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>chat</h1>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();

        let response = serve_static(dir.path(), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );

        let response = serve_static(dir.path(), "/app.js").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = serve_static(dir.path(), "/../secret").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = serve_static(dir.path(), "/missing.css").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_route_decodes_request_path() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("my page.html"), "<p>hi</p>").unwrap();

        let broker = Arc::new(MessageBroker::new(None));
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = broker.open_session(tx).await;
        broker
            .handle_frame(id, r#"{"type":"set-username","username":"alice"}"#)
            .await;
        broker
            .handle_frame(
                id,
                r#"{"type":"file","fileId":"my file","fileName":"hello.txt","fileType":"text/plain","fileSize":5,"fileData":"aGVsbG8=","fileCategory":"document"}"#,
            )
            .await;

        let state = Arc::new(AppState {
            broker,
            public_dir: dir.path().to_path_buf(),
        });

        let response = route(state.clone(), get("/download/my%20file")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"hello");

        let response = route(state.clone(), get("/my%20page.html")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = route(state.clone(), get("/%2E%2E/secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = route(state, get("/download/%FF")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
