//! Game server process supervision
//!
//! Owns the single child process for the lifetime of the bridge: spawns it
//! with captured pipes, pumps stdout/stderr chunks into the client
//! broadcast path, forwards console commands to its stdin, and observes
//! its exit. The child is started exactly once and never restarted.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use fxbridge_protocol::ServerMessage;
use fxbridge_utils::{BridgeError, Result};

use crate::registry::ClientRegistry;

/// Read buffer size for the output pumps
const READ_BUFFER_SIZE: usize = 4096;

/// Which of the child's output streams a pump is reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Supervises the single game server child process
pub struct ProcessSupervisor {
    /// Registry used to fan output and exit notices out to clients
    registry: Arc<ClientRegistry>,
    /// Child stdin while the child is alive and writable; shared with the
    /// exit observer so it can be dropped once the child is gone
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    /// One-shot trigger for forced termination
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Flipped to true once the child's exit has been observed
    exit_tx: watch::Sender<bool>,
    /// Guards against a second start
    started: AtomicBool,
}

impl ProcessSupervisor {
    /// Create a supervisor with no child yet
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        let (exit_tx, _) = watch::channel(false);
        Self {
            registry,
            stdin: Arc::new(Mutex::new(None)),
            kill_tx: Mutex::new(None),
            exit_tx,
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the child process and start its output pumps.
    ///
    /// Fails if the executable cannot be launched; callers treat that as
    /// fatal since there is nothing left to supervise.
    pub async fn start(&self, program: &Path, args: &[String], working_dir: &Path) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::internal("child process already started"));
        }

        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BridgeError::spawn(format!("{}: {}", program.display(), e)))?;

        info!(
            program = %program.display(),
            pid = ?child.id(),
            "Game server started"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::internal("child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::internal("child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::internal("child stderr not captured"))?;

        *self.stdin.lock().await = Some(stdin);

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.kill_tx.lock().await = Some(kill_tx);

        let out_pump = tokio::spawn(pump_output(
            stdout,
            OutputStream::Stdout,
            self.registry.clone(),
        ));
        let err_pump = tokio::spawn(pump_output(
            stderr,
            OutputStream::Stderr,
            self.registry.clone(),
        ));

        tokio::spawn(observe_exit(
            child,
            kill_rx,
            out_pump,
            err_pump,
            Arc::clone(&self.stdin),
            Arc::clone(&self.registry),
            self.exit_tx.clone(),
        ));

        Ok(())
    }

    /// Write one line of console input to the child's stdin.
    ///
    /// Appends a newline. Silently drops the input when no child is running
    /// or its stdin has closed; clients may legitimately send commands
    /// outside the child's lifetime.
    pub async fn write_input(&self, text: &str) {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            trace!(input = text, "No child stdin, dropping input");
            return;
        };

        let line = format!("{}\n", text);
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!(error = %e, "Child stdin closed, dropping input");
            *guard = None;
            return;
        }
        if let Err(e) = stdin.flush().await {
            debug!(error = %e, "Child stdin flush failed");
            *guard = None;
        }
    }

    /// Request forced termination of the child.
    ///
    /// No-op when the child has already exited or was already killed.
    pub async fn kill(&self) {
        if let Some(tx) = self.kill_tx.lock().await.take() {
            // Receiver may be gone if the exit path won the race; that is
            // exactly the no-op we want.
            let _ = tx.send(());
        }
    }

    /// Subscribe to the child's exit observation
    pub fn subscribe_exit(&self) -> watch::Receiver<bool> {
        self.exit_tx.subscribe()
    }

    /// Whether the child's exit has been observed
    pub fn has_exited(&self) -> bool {
        *self.exit_tx.subscribe().borrow()
    }
}

/// Waits for the child to terminate (naturally or via kill), drains the
/// output pumps, then broadcasts the exit notice so `server_exit` is the
/// last message clients receive for this process.
async fn observe_exit(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    out_pump: JoinHandle<()>,
    err_pump: JoinHandle<()>,
    stdin_slot: Arc<Mutex<Option<ChildStdin>>>,
    registry: Arc<ClientRegistry>,
    exit_tx: watch::Sender<bool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        res = &mut kill_rx => {
            // An Err means the supervisor is gone without requesting a
            // kill; fall through to a plain wait.
            if res.is_ok() {
                warn!("Killing game server");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to signal game server");
                }
            }
            child.wait().await
        }
    };

    // Drain remaining output before announcing the exit
    let _ = out_pump.await;
    let _ = err_pump.await;

    *stdin_slot.lock().await = None;

    let code = match status {
        Ok(status) => {
            info!(code = ?status.code(), "Game server exited");
            status.code()
        }
        Err(e) => {
            warn!(error = %e, "Failed to observe game server exit");
            None
        }
    };

    registry.broadcast(&ServerMessage::ServerExit { code });
    let _ = exit_tx.send(true);
}

/// Read chunks from one child output stream and broadcast them until EOF.
///
/// Each chunk is decoded lossily and sent as one `stdout`/`stderr` message;
/// no buffering or line-splitting beyond what the pipe delivers.
async fn pump_output<R>(mut reader: R, stream: OutputStream, registry: Arc<ClientRegistry>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(stream = ?stream, "Child output stream closed");
                break;
            }
            Ok(n) => {
                let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                match stream {
                    OutputStream::Stdout => {
                        info!(target: "fxserver", "{}", data.trim_end_matches('\n'));
                        registry.broadcast(&ServerMessage::Stdout { data });
                    }
                    OutputStream::Stderr => {
                        warn!(target: "fxserver", "{}", data.trim_end_matches('\n'));
                        registry.broadcast(&ServerMessage::Stderr { data });
                    }
                }
            }
            Err(e) => {
                warn!(stream = ?stream, error = %e, "Child output read error");
                break;
            }
        }
    }
}
