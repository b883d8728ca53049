//! Client-server message types
//!
//! The wire format is JSON with an externally visible `type` tag, e.g.
//! `{"type":"stdout","data":"..."}`. Clients that predate the JSON command
//! envelope send plain text frames; the server treats any frame that fails
//! to parse as a raw console command, so only well-formed messages are
//! modeled here.

use serde::{Deserialize, Serialize};

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One-time acknowledgement sent when a connection is accepted
    Connection { message: String },

    /// A chunk of the game server's standard output
    Stdout { data: String },

    /// A chunk of the game server's standard error
    Stderr { data: String },

    /// The game server process exited
    ///
    /// `code` is `None` when the process was terminated by a signal.
    ServerExit { code: Option<i32> },
}

impl ServerMessage {
    /// Return the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Connection { .. } => "connection",
            ServerMessage::Stdout { .. } => "stdout",
            ServerMessage::Stderr { .. } => "stderr",
            ServerMessage::ServerExit { .. } => "server_exit",
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A console command to forward to the game server's stdin
    Command { command: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_serializes_with_type_tag() {
        let msg = ServerMessage::Connection {
            message: "Connected to FiveM server console".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"connection","message":"Connected to FiveM server console"}"#
        );
    }

    #[test]
    fn test_stdout_round_trip() {
        let msg = ServerMessage::Stdout {
            data: "ready\n".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"stdout","data":"ready\n"}"#);

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_stderr_distinct_from_stdout() {
        let out = ServerMessage::Stdout {
            data: "x".to_string(),
        };
        let err = ServerMessage::Stderr {
            data: "x".to_string(),
        };
        assert_ne!(out, err);
        assert!(serde_json::to_string(&err).unwrap().contains(r#""type":"stderr""#));
    }

    #[test]
    fn test_server_exit_code_null_when_signaled() {
        let msg = ServerMessage::ServerExit { code: None };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"server_exit","code":null}"#);
    }

    #[test]
    fn test_server_exit_with_code() {
        let msg = ServerMessage::ServerExit { code: Some(0) };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"server_exit","code":0}"#);
    }

    #[test]
    fn test_type_names() {
        let msgs = [
            ServerMessage::Connection { message: String::new() },
            ServerMessage::Stdout { data: String::new() },
            ServerMessage::Stderr { data: String::new() },
            ServerMessage::ServerExit { code: Some(1) },
        ];
        let names: Vec<_> = msgs.iter().map(|m| m.type_name()).collect();
        assert_eq!(names, ["connection", "stdout", "stderr", "server_exit"]);
    }

    #[test]
    fn test_client_command_parses() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"command","command":"quit"}"#).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::Command {
                command: "quit".to_string()
            }
        );
    }

    #[test]
    fn test_client_unknown_type_rejected() {
        // Unknown payloads fall back to raw-text forwarding on the server;
        // the parse itself must fail cleanly.
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"resize","cols":80}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("restart").is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"command":"quit"}"#).is_err());
    }
}
