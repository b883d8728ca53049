//! Graceful shutdown coordination
//!
//! First SIGINT/SIGTERM puts the bridge into shutdown: the game server is
//! asked to stop via a console directive and given a grace window to exit
//! on its own. If the window lapses the child is killed. Either way the
//! child's exit notice reaches clients before the bridge itself exits.
//! Repeat signals while a shutdown is in progress are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::process::ProcessSupervisor;

/// Grace window between the shutdown directive and a forced kill
pub const DEFAULT_GRACE: Duration = Duration::from_secs(45);

/// Which OS signal initiated the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT, an operator at the console
    Interrupt,
    /// SIGTERM, the container runtime stopping us
    Terminate,
}

impl ShutdownSignal {
    /// Source field of the console shutdown directive
    pub fn source(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "console",
            ShutdownSignal::Terminate => "docker",
        }
    }

    /// Reason field of the console shutdown directive
    pub fn reason(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "manual",
            ShutdownSignal::Terminate => "container_stop",
        }
    }
}

/// How the grace window resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceOutcome {
    /// Child exited before the window lapsed
    ChildExited,
    /// Window lapsed and the child was killed
    TimerExpired,
}

/// Single-entry shutdown state machine
pub struct ShutdownCoordinator {
    supervisor: Arc<ProcessSupervisor>,
    triggered: AtomicBool,
    notify_tx: broadcast::Sender<()>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self::with_grace(supervisor, DEFAULT_GRACE)
    }

    pub fn with_grace(supervisor: Arc<ProcessSupervisor>, grace: Duration) -> Self {
        let (notify_tx, _) = broadcast::channel(1);
        Self {
            supervisor,
            triggered: AtomicBool::new(false),
            notify_tx,
            grace,
        }
    }

    /// Subscribe to the shutdown notification, used to stop accepting
    /// connections
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Enter shutdown for the given signal.
    ///
    /// Returns true when this call initiated the shutdown. A shutdown
    /// already in progress is left untouched; the directive is not
    /// re-sent and the grace window is not restarted.
    pub async fn trigger(&self, signal: ShutdownSignal) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!(?signal, "Shutdown already in progress, ignoring signal");
            return false;
        }

        info!(
            source = signal.source(),
            reason = signal.reason(),
            grace_secs = self.grace.as_secs(),
            "Shutting down"
        );

        let directive = format!(
            "trigger_shutdown {} {} {}",
            signal.source(),
            signal.reason(),
            self.grace.as_secs()
        );
        self.supervisor.write_input(&directive).await;

        // Stop accepting new connections; receivers may already be gone
        let _ = self.notify_tx.send(());
        true
    }

    /// Wait out the grace window.
    ///
    /// Resolves as soon as the child exits. If the window lapses first the
    /// child is killed, and we still wait for the exit to be observed so
    /// the `server_exit` broadcast has gone out before the caller exits
    /// the process.
    pub async fn await_grace(&self) -> GraceOutcome {
        let mut exit_rx = self.supervisor.subscribe_exit();

        let outcome = tokio::select! {
            res = exit_rx.wait_for(|exited| *exited) => {
                if res.is_err() {
                    warn!("Exit watch closed before child exit was observed");
                }
                info!("Game server stopped within the grace window");
                GraceOutcome::ChildExited
            }
            _ = tokio::time::sleep(self.grace) => {
                warn!(
                    grace_secs = self.grace.as_secs(),
                    "Grace window lapsed, killing game server"
                );
                GraceOutcome::TimerExpired
            }
        };

        if outcome == GraceOutcome::TimerExpired {
            self.supervisor.kill().await;
            let _ = exit_rx.wait_for(|exited| *exited).await;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRegistry;
    use fxbridge_protocol::ServerMessage;
    use std::path::Path;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn setup(grace: Duration) -> (Arc<ClientRegistry>, Arc<ProcessSupervisor>, ShutdownCoordinator) {
        let registry = Arc::new(ClientRegistry::new());
        let supervisor = Arc::new(ProcessSupervisor::new(registry.clone()));
        let coordinator = ShutdownCoordinator::with_grace(supervisor.clone(), grace);
        (registry, supervisor, coordinator)
    }

    #[test]
    fn test_signal_directive_fields() {
        assert_eq!(ShutdownSignal::Interrupt.source(), "console");
        assert_eq!(ShutdownSignal::Interrupt.reason(), "manual");
        assert_eq!(ShutdownSignal::Terminate.source(), "docker");
        assert_eq!(ShutdownSignal::Terminate.reason(), "container_stop");
    }

    #[tokio::test]
    async fn test_trigger_is_single_entry() {
        let (_registry, _supervisor, coordinator) = setup(DEFAULT_GRACE);
        assert!(!coordinator.is_shutting_down());

        assert!(coordinator.trigger(ShutdownSignal::Interrupt).await);
        assert!(coordinator.is_shutting_down());

        // Later signals of either kind are ignored
        assert!(!coordinator.trigger(ShutdownSignal::Interrupt).await);
        assert!(!coordinator.trigger(ShutdownSignal::Terminate).await);
    }

    #[tokio::test]
    async fn test_trigger_notifies_subscribers() {
        let (_registry, _supervisor, coordinator) = setup(DEFAULT_GRACE);
        let mut rx = coordinator.subscribe();

        coordinator.trigger(ShutdownSignal::Terminate).await;
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no shutdown notification")
            .expect("channel closed");
    }

    #[tokio::test]
    async fn test_directive_written_to_child_console() {
        let (registry, supervisor, coordinator) = setup(DEFAULT_GRACE);
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(tx);

        // cat echoes its stdin back, so the broadcast shows what the child
        // console received
        supervisor
            .start(Path::new("/bin/cat"), &[], Path::new("/"))
            .await
            .unwrap();

        coordinator.trigger(ShutdownSignal::Interrupt).await;

        let msg = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(
            msg,
            ServerMessage::Stdout {
                data: "trigger_shutdown console manual 45\n".to_string()
            }
        );

        supervisor.kill().await;
    }

    #[tokio::test]
    async fn test_child_exit_within_grace() {
        let (_registry, supervisor, coordinator) = setup(Duration::from_secs(30));

        supervisor
            .start(
                Path::new("/bin/sh"),
                &["-c".into(), "exit 0".into()],
                Path::new("/"),
            )
            .await
            .unwrap();

        coordinator.trigger(ShutdownSignal::Interrupt).await;
        let outcome = timeout(Duration::from_secs(5), coordinator.await_grace())
            .await
            .expect("grace wait hung");
        assert_eq!(outcome, GraceOutcome::ChildExited);
    }

    #[tokio::test]
    async fn test_grace_timer_kills_lingering_child() {
        let (_registry, supervisor, coordinator) = setup(Duration::from_millis(200));

        // cat ignores the shutdown directive and never exits on its own
        supervisor
            .start(Path::new("/bin/cat"), &[], Path::new("/"))
            .await
            .unwrap();

        coordinator.trigger(ShutdownSignal::Terminate).await;
        let outcome = timeout(Duration::from_secs(5), coordinator.await_grace())
            .await
            .expect("grace wait hung");
        assert_eq!(outcome, GraceOutcome::TimerExpired);
        assert!(supervisor.has_exited());
    }

    #[tokio::test]
    async fn test_grace_resolves_for_already_exited_child() {
        let (_registry, supervisor, coordinator) = setup(Duration::from_secs(30));

        supervisor
            .start(
                Path::new("/bin/sh"),
                &["-c".into(), "exit 0".into()],
                Path::new("/"),
            )
            .await
            .unwrap();
        supervisor
            .subscribe_exit()
            .wait_for(|exited| *exited)
            .await
            .unwrap();

        coordinator.trigger(ShutdownSignal::Interrupt).await;
        let outcome = coordinator.await_grace().await;
        assert_eq!(outcome, GraceOutcome::ChildExited);
    }
}
