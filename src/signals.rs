/// Termination signal handling.
///
/// SIGINT, SIGTERM, and SIGQUIT are caught by tokio's signal driver and
/// forwarded as [`TerminationSignal`] events over a channel, so the supervisor
/// handles them as ordinary events between liveness polls instead of running
/// code in interrupt context.
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Pending signals buffered while the supervisor is busy.
const SIGNAL_QUEUE: usize = 8;

/// The termination-class signals the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
    Quit,
}

impl TerminationSignal {
    pub fn name(self) -> &'static str {
        match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Quit => "SIGQUIT",
        }
    }
}

impl std::fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Register handlers for all three signals and return the event stream.
///
/// Registration happens before this returns; from then on the signals no
/// longer terminate the process and are only observable on the receiver.
/// Must be called from within a tokio runtime.
pub fn install() -> std::io::Result<mpsc::Receiver<TerminationSignal>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let (tx, rx) = mpsc::channel(SIGNAL_QUEUE);

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = sigint.recv() => TerminationSignal::Interrupt,
                Some(()) = sigterm.recv() => TerminationSignal::Terminate,
                Some(()) = sigquit.recv() => TerminationSignal::Quit,
                else => break,
            };
            tracing::debug!(signal = received.name(), "termination signal caught");
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
