//! Bridge configuration
//!
//! Everything is driven by CLI flags with env-var fallbacks, matching how
//! the bridge is deployed: a Docker entrypoint sets `WEBSOCKET_API_KEY`
//! and appends extra FXServer arguments after the binary name.

use std::path::PathBuf;

use clap::Parser;

/// Default executable: FXServer is linked against musl, so it is started
/// through the bundled dynamic linker.
pub const DEFAULT_LINKER: &str = "/opt/cfx-server/ld-musl-x86_64.so.1";
pub const DEFAULT_LIBRARY_PATH: &str = "/usr/lib/v8/:/lib/:/usr/lib/";
pub const DEFAULT_SERVER_BINARY: &str = "/opt/cfx-server/FXServer";
pub const DEFAULT_CITIZEN_DIR: &str = "/opt/cfx-server/citizen/";
pub const DEFAULT_WORKING_DIR: &str = "/config";

/// WebSocket console bridge for a supervised FXServer
#[derive(Debug, Clone, Parser)]
#[command(name = "fxbridge-server", version, about)]
pub struct ServerConfig {
    /// Port to listen on for WebSocket upgrades
    #[arg(long, env = "FXBRIDGE_PORT", default_value_t = fxbridge_protocol::DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind the listener to
    #[arg(long, env = "FXBRIDGE_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Shared API key; connections are unauthenticated when unset
    #[arg(long, env = "WEBSOCKET_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Dynamic linker used to start the server binary
    #[arg(long, env = "FXBRIDGE_LINKER", default_value = DEFAULT_LINKER)]
    pub linker: PathBuf,

    /// Library path passed to the dynamic linker
    #[arg(long, env = "FXBRIDGE_LIBRARY_PATH", default_value = DEFAULT_LIBRARY_PATH)]
    pub library_path: String,

    /// The FXServer binary to supervise
    #[arg(long, env = "FXBRIDGE_SERVER_BINARY", default_value = DEFAULT_SERVER_BINARY)]
    pub server_binary: PathBuf,

    /// FXServer citizen resource directory
    #[arg(long, env = "FXBRIDGE_CITIZEN_DIR", default_value = DEFAULT_CITIZEN_DIR)]
    pub citizen_dir: String,

    /// Working directory for the child process
    #[arg(long, env = "FXBRIDGE_WORKING_DIR", default_value = DEFAULT_WORKING_DIR)]
    pub working_dir: PathBuf,

    /// Additional arguments passed through to FXServer
    #[arg(trailing_var_arg = true)]
    pub extra_args: Vec<String>,
}

impl ServerConfig {
    /// Full argument vector for the child process (linker arguments,
    /// server binary, fixed leading arguments, then pass-through args).
    pub fn child_args(&self) -> Vec<String> {
        let mut args = vec![
            "--library-path".to_string(),
            self.library_path.clone(),
            "--".to_string(),
            self.server_binary.display().to_string(),
            "+set".to_string(),
            "citizen_dir".to_string(),
            self.citizen_dir.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Socket address string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
