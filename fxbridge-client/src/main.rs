//! Command-line console client for fxbridge
//!
//! Attaches to a running bridge and behaves like a local game server
//! console: output is printed as it arrives, and every line typed is sent
//! as a command. Exits when the game server does.

use std::io::Write as _;

use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use fxbridge_protocol::{ClientMessage, ServerMessage, DEFAULT_PORT};
use fxbridge_utils::{BridgeError, Result};

#[derive(Parser, Debug)]
#[command(name = "fxbridge", about = "Interactive console for a bridged FiveM server", version)]
struct ClientArgs {
    /// WebSocket URL of the bridge
    #[arg(default_value_t = format!("ws://127.0.0.1:{}/", DEFAULT_PORT))]
    url: String,

    /// API key, sent as a Bearer token
    #[arg(long, env = "WEBSOCKET_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = fxbridge_utils::init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let args = ClientArgs::parse();
    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("fxbridge: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: ClientArgs) -> Result<i32> {
    let mut request = args
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| BridgeError::connection(format!("invalid url {}: {}", args.url, e)))?;
    if let Some(key) = &args.api_key {
        let value = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|_| BridgeError::config("api key contains characters not allowed in a header"))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (ws, _) = connect_async(request)
        .await
        .map_err(|e| BridgeError::websocket(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(code) = print_server_message(&text) {
                            return Ok(code);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        eprintln!("Connection closed by server");
                        return Ok(0);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(BridgeError::websocket(e.to_string())),
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(command)) => {
                        let msg = ClientMessage::Command { command };
                        let json = serde_json::to_string(&msg)
                            .map_err(|e| BridgeError::internal(e.to_string()))?;
                        sink.send(Message::Text(json))
                            .await
                            .map_err(|e| BridgeError::websocket(e.to_string()))?;
                    }
                    Ok(None) => {
                        // stdin closed; keep mirroring output
                        stdin_open = false;
                    }
                    Err(e) => return Err(BridgeError::Io(e)),
                }
            }
        }
    }
}

/// Print one bridge message. Returns a process exit code once the game
/// server is gone.
fn print_server_message(text: &str) -> Option<i32> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::Connection { message }) => {
            eprintln!("{}", message);
            None
        }
        Ok(ServerMessage::Stdout { data }) => {
            print!("{}", data);
            let _ = std::io::stdout().flush();
            None
        }
        Ok(ServerMessage::Stderr { data }) => {
            eprint!("{}", data);
            None
        }
        Ok(ServerMessage::ServerExit { code }) => {
            match code {
                Some(code) => eprintln!("Server exited with code {}", code),
                None => eprintln!("Server terminated by signal"),
            }
            Some(code.unwrap_or(0))
        }
        Err(e) => {
            debug!("Ignoring unrecognized frame: {}", e);
            None
        }
    }
}
