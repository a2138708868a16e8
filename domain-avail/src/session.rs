//! WebSocket endpoint and per-connection query loop.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use domain_avail_lib::{AvailabilityChecker, AvailabilityStatus, Resolution, StatusSource};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared by every connection.
#[derive(Clone)]
pub struct AppState {
    pub checker: Arc<AvailabilityChecker>,
    pub allowed_origins: Arc<Vec<String>>,
    pub protocol: String,
}

/// Every path accepts the upgrade, so routing is a single fallback.
pub fn router(state: AppState) -> Router {
    Router::new().fallback(handle_request).with_state(state)
}

/// Exact match against the allow-list. A missing origin never matches.
pub fn origin_is_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    match origin {
        Some(origin) if !origin.is_empty() => allowed.iter().any(|a| a == origin),
        _ => false,
    }
}

async fn handle_request(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    if !origin_is_allowed(origin, &state.allowed_origins) {
        info!(%peer, origin = origin.unwrap_or("-"), "connection rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(%peer, %rejection, "plain HTTP request");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    info!(%peer, origin = origin.unwrap_or("-"), "connection accepted");
    let checker = state.checker.clone();
    ws.protocols([state.protocol.clone()])
        .on_upgrade(move |socket| serve_connection(socket, checker, peer))
}

async fn serve_connection(mut socket: WebSocket, checker: Arc<AvailabilityChecker>, peer: SocketAddr) {
    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, error = %e, "receive failed");
                break;
            }
        };

        let resolution = match message {
            Message::Text(text) => checker.check(text.as_str()).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => checker.check(text).await,
                Err(_) => {
                    warn!(%peer, len = bytes.len(), "binary frame is not UTF-8, answering INVALID");
                    Resolution {
                        query: String::from_utf8_lossy(&bytes).into_owned(),
                        status: AvailabilityStatus::Invalid,
                        source: StatusSource::Input,
                    }
                }
            },
            Message::Close(_) => break,
            // Ping/pong are answered by the transport
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        info!(
            %peer,
            query = %resolution.query,
            status = %resolution.status,
            source = %resolution.source,
            "DOMAINSTATUS"
        );

        if let Err(e) = socket.send(Message::Text(resolution.reply().into())).await {
            warn!(%peer, error = %e, "send failed");
            break;
        }
    }

    info!(%peer, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use domain_avail_lib::protocols::{DnsProbe, WhoisProbe};
    use domain_avail_lib::{DnsOutcome, ResultCache, WhoisOutcome, WhoisSignals};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tower::ServiceExt;

    const ALLOWED: &str = "http://allowed.example";

    struct StaticDns;

    #[async_trait]
    impl DnsProbe for StaticDns {
        async fn probe(&self, domain: &str) -> DnsOutcome {
            if domain == "example.com" {
                DnsOutcome::HasRecords(vec!["a.iana-servers.net.".to_string()])
            } else {
                DnsOutcome::NotFound
            }
        }
    }

    struct StaticWhois;

    #[async_trait]
    impl WhoisProbe for StaticWhois {
        async fn probe(&self, _domain: &str) -> WhoisOutcome {
            WhoisOutcome::Success("no match for domain".to_string())
        }
    }

    fn test_state() -> AppState {
        let checker = AvailabilityChecker::from_parts(
            ResultCache::disabled(),
            Arc::new(StaticDns),
            Arc::new(StaticWhois),
            Arc::new(WhoisSignals::default()),
        );
        AppState {
            checker: Arc::new(checker),
            allowed_origins: Arc::new(vec![ALLOWED.to_string()]),
            protocol: "echo-protocol".to_string(),
        }
    }

    fn test_router() -> Router {
        router(test_state()).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
    }

    #[test]
    fn test_origin_matching_is_exact() {
        let allowed = vec![ALLOWED.to_string()];
        assert!(origin_is_allowed(Some(ALLOWED), &allowed));
        assert!(!origin_is_allowed(Some("http://allowed.example/"), &allowed));
        assert!(!origin_is_allowed(Some("http://ALLOWED.example"), &allowed));
        assert!(!origin_is_allowed(Some(""), &allowed));
        assert!(!origin_is_allowed(None, &allowed));
        assert!(!origin_is_allowed(Some(ALLOWED), &[]));
    }

    #[tokio::test]
    async fn test_unknown_origin_is_forbidden() {
        let request = Request::builder()
            .uri("/")
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_origin_is_forbidden() {
        let request = Request::builder().uri("/any/path").body(Body::empty()).unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_plain_http_from_allowed_origin_is_not_found() {
        let request = Request::builder()
            .uri("/")
            .header(header::ORIGIN, ALLOWED)
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    async fn spawn_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(test_state()).into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn handshake(addr: SocketAddr, origin: &str) -> (TcpStream, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /ws HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Protocol: echo-protocol\r\n\
             Origin: {origin}\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        // Byte at a time so no frame data is swallowed with the head
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            let mut byte = [0u8; 1];
            if stream.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }
        (stream, String::from_utf8_lossy(&head).to_lowercase())
    }

    async fn send_masked(stream: &mut TcpStream, opcode: u8, payload: &[u8]) {
        let mask = [0x12u8, 0x34, 0x56, 0x78];
        let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        stream.write_all(&frame).await.unwrap();
    }

    async fn read_text(stream: &mut TcpStream) -> String {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x81, "expected a final text frame");
        let mut payload = vec![0u8; (header[1] & 0x7f) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        String::from_utf8(payload).unwrap()
    }

    #[tokio::test]
    async fn test_websocket_session_answers_in_order() {
        let addr = spawn_server().await;
        let (mut stream, head) = handshake(addr, ALLOWED).await;

        assert!(head.starts_with("http/1.1 101"), "unexpected head: {}", head);
        assert!(head.contains("sec-websocket-protocol: echo-protocol"));
        assert!(head.contains("sec-websocket-accept: s3pplmbitxaq9kygzzhzrbk+xoo="));

        send_masked(&mut stream, 0x1, b"example.com").await;
        send_masked(&mut stream, 0x1, b"ab").await;
        // UTF-8 binary frames count as text
        send_masked(&mut stream, 0x2, b"free-name.com").await;

        assert_eq!(read_text(&mut stream).await, "example.com:UNAVAILABLE");
        assert_eq!(read_text(&mut stream).await, "ab:INVALID");
        assert_eq!(read_text(&mut stream).await, "free-name.com:AVAILABLE");
    }

    #[tokio::test]
    async fn test_websocket_handshake_rejected_for_unknown_origin() {
        let addr = spawn_server().await;
        let (_stream, head) = handshake(addr, "http://evil.example").await;

        assert!(head.starts_with("http/1.1 403"), "unexpected head: {}", head);
    }

    #[tokio::test]
    async fn test_non_utf8_binary_frame_is_answered_invalid() {
        let addr = spawn_server().await;
        let (mut stream, _head) = handshake(addr, ALLOWED).await;

        send_masked(&mut stream, 0x2, &[b'a', 0xff, b'b']).await;
        send_masked(&mut stream, 0x1, b"example.com").await;

        assert_eq!(read_text(&mut stream).await, "a\u{fffd}b:INVALID");
        assert_eq!(read_text(&mut stream).await, "example.com:UNAVAILABLE");
    }
}
