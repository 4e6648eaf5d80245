//! Stopping a backup from the terminal or a service manager.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the run token. The engine
//! checks it between files, so the file in flight finishes, its requests are
//! counted and the state is saved before the run reports `interrupted`. A
//! second signal exits immediately; whatever that file spent is then lost
//! from the quota counters.

use tokio_util::sync::CancellationToken;

use crate::upload::StopReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    Terminate,
    Hangup,
}

impl Signal {
    fn name(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
        }
    }
}

#[cfg(unix)]
struct Listeners {
    terminate: Option<tokio::signal::unix::Signal>,
    hangup: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl Listeners {
    fn register() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let listen = |kind: SignalKind, signal_name: &str| match signal(kind) {
            Ok(listener) => Some(listener),
            Err(e) => {
                tracing::warn!("Cannot listen for {}: {}", signal_name, e);
                None
            }
        };
        Self {
            terminate: listen(SignalKind::terminate(), "SIGTERM"),
            hangup: listen(SignalKind::hangup(), "SIGHUP"),
        }
    }

    async fn next(&mut self) -> Signal {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => Signal::Interrupt,
            Some(()) = recv(&mut self.terminate) => Signal::Terminate,
            Some(()) = recv(&mut self.hangup) => Signal::Hangup,
            else => std::future::pending().await,
        }
    }
}

/// Next delivery of an optional listener; never resolves without one.
#[cfg(unix)]
async fn recv(listener: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
struct Listeners;

#[cfg(not(unix))]
impl Listeners {
    fn register() -> Self {
        Listeners
    }

    async fn next(&mut self) -> Signal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        Signal::Interrupt
    }
}

/// Spawn the signal watcher and return the token the engine polls.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let run_token = token.clone();

    tokio::spawn(async move {
        let mut listeners = Listeners::register();

        let first = listeners.next().await;
        tracing::info!(
            "Received {}, stopping after the current file; press Ctrl+C again to quit now",
            first.name()
        );
        run_token.cancel();

        let second = listeners.next().await;
        tracing::warn!(
            "Received {} while stopping; exiting now, the file in flight and its requests are not recorded",
            second.name()
        );
        std::process::exit(StopReason::Interrupted.exit_code());
    });

    token
}
