//! WebSocket gateway
//!
//! Accepts TCP connections, vets each HTTP request (WebSocket upgrade
//! required, then the API key check), completes the upgrade handshake and
//! runs one task per connected client: console output flows out, commands
//! flow in to the game server's stdin.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use fxbridge_protocol::{ClientMessage, ServerMessage};

use crate::auth;
use crate::process::ProcessSupervisor;
use crate::registry::ClientRegistry;

/// Greeting sent to every client right after the handshake
const WELCOME_MESSAGE: &str = "Connected to FiveM server console";

/// Body of the response to plain HTTP requests
const UPGRADE_REQUIRED_BODY: &str = "Use WebSocket protocol";

/// Body of the response to failed authentication
const UNAUTHORIZED_BODY: &str = "Unauthorized: Invalid or missing API key";

/// Shared state handed to every connection task
pub struct GatewayState {
    pub registry: Arc<ClientRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    /// When unset, all connections are accepted
    pub api_key: Option<String>,
}

/// Run the accept loop until the shutdown notification arrives
pub async fn run_accept_loop(
    listener: TcpListener,
    state: Arc<GatewayState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("WebSocket console bridge listening on {}", addr);
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("New connection from {}", peer_addr);
                        let state_clone = Arc::clone(&state);
                        tokio::spawn(serve_connection(stream, peer_addr, state_clone));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown in progress, no longer accepting connections");
                break;
            }
        }
    }
}

/// Drive one HTTP/1 connection, allowing it to upgrade to WebSocket
async fn serve_connection(stream: TcpStream, peer_addr: SocketAddr, state: Arc<GatewayState>) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { handle_request(req, peer_addr, state).await }
    });

    let conn = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades();
    if let Err(e) = conn.await {
        debug!("Connection from {} ended with error: {}", peer_addr, e);
    }
}

/// Vet the request and, when it passes, complete the WebSocket upgrade
async fn handle_request(
    mut req: Request<Incoming>,
    peer_addr: SocketAddr,
    state: Arc<GatewayState>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let Some(ws_key) = websocket_key(&req) else {
        debug!("Plain HTTP request from {}, upgrade required", peer_addr);
        return Ok(plain_response(
            StatusCode::UPGRADE_REQUIRED,
            UPGRADE_REQUIRED_BODY,
        ));
    };

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let api_key_param = query_api_key(req.uri().query());

    if !auth::validate(
        state.api_key.as_deref(),
        auth_header,
        api_key_param.as_deref(),
    ) {
        warn!("Rejected connection from {}: invalid or missing API key", peer_addr);
        return Ok(plain_response(StatusCode::UNAUTHORIZED, UNAUTHORIZED_BODY));
    }

    let accept_key = derive_accept_key(ws_key.as_bytes());

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(
                    TokioIo::new(upgraded),
                    Role::Server,
                    None,
                )
                .await;
                handle_client(ws, peer_addr, state).await;
            }
            Err(e) => {
                warn!("Upgrade from {} failed: {}", peer_addr, e);
            }
        }
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(value) = HeaderValue::from_str(&accept_key) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    }
    Ok(response)
}

/// Extract the Sec-WebSocket-Key when the request is a WebSocket upgrade
fn websocket_key(req: &Request<Incoming>) -> Option<String> {
    let connection_has_upgrade = req
        .headers()
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);
    let upgrade_is_websocket = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !connection_has_upgrade || !upgrade_is_websocket {
        return None;
    }

    req.headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Pull the `api_key` parameter out of the query string, if any
fn query_api_key(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "api_key")
        .map(|(_, value)| value.into_owned())
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Run one connected client until it disconnects.
///
/// Registered with the broadcast registry for console output; inbound
/// frames are forwarded to the game server's stdin, either as structured
/// command messages or as raw console text.
async fn handle_client<S>(ws: WebSocketStream<S>, peer_addr: SocketAddr, state: Arc<GatewayState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client_id = state.registry.register(tx);
    info!(
        client = %client_id,
        peer = %peer_addr,
        clients = state.registry.count(),
        "Client connected"
    );

    let welcome = ServerMessage::Connection {
        message: WELCOME_MESSAGE.to_string(),
    };
    if let Err(e) = send_message(&mut sink, &welcome).await {
        debug!(client = %client_id, "Failed to send welcome: {}", e);
        state.registry.remove(client_id);
        return;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                // None means we were removed from the registry
                let Some(msg) = outbound else { break };
                if let Err(e) = send_message(&mut sink, &msg).await {
                    debug!(client = %client_id, "Send failed: {}", e);
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        forward_input(&state.supervisor, &text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let text = String::from_utf8_lossy(&bytes);
                        forward_input(&state.supervisor, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(client = %client_id, "Receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    state.registry.remove(client_id);
    info!(
        client = %client_id,
        clients = state.registry.count(),
        "Client disconnected"
    );
}

async fn send_message<S>(
    sink: &mut futures::stream::SplitSink<WebSocketStream<S>, Message>,
    msg: &ServerMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            warn!("Failed to serialize {} message: {}", msg.type_name(), e);
            Ok(())
        }
    }
}

/// Decode one inbound frame and pass it to the game server console.
///
/// Structured `command` messages carry the command field; anything that
/// does not parse is treated as raw console text for older clients.
async fn forward_input(supervisor: &ProcessSupervisor, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Command { command }) => {
            debug!(command = %command, "Forwarding client command");
            supervisor.write_input(&command).await;
        }
        Err(_) => {
            debug!(input = %text, "Forwarding raw console input");
            supervisor.write_input(text).await;
        }
    }
}
