/// Graceful-then-forceful termination of the child.
///
/// SIGTERM first, then up to `grace` for the child to exit on its own, then
/// SIGKILL and an unbounded wait for the reap.
use crate::child::{ChildError, ChildExit, ChildProcess};
use crate::log_sink::LogSink;
use crate::signals::TerminationSignal;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How the escalation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The child was gone before any signal was sent.
    AlreadyExited(ChildExit),
    /// The child exited within the grace period after SIGTERM.
    Graceful(ChildExit),
    /// The grace period elapsed; the child was SIGKILLed and reaped.
    Killed(ChildExit),
}

impl ShutdownOutcome {
    pub fn child_exit(&self) -> ChildExit {
        match *self {
            ShutdownOutcome::AlreadyExited(exit)
            | ShutdownOutcome::Graceful(exit)
            | ShutdownOutcome::Killed(exit) => exit,
        }
    }
}

/// Stop the child, escalating to SIGKILL after `grace`.
///
/// Termination signals arriving on `signals` while this runs are logged and
/// dropped; they never start a second escalation.
pub async fn stop_child(
    child: &mut ChildProcess,
    sink: &mut LogSink,
    grace: Duration,
    signals: &mut mpsc::Receiver<TerminationSignal>,
) -> Result<ShutdownOutcome, ChildError> {
    if let Some(exit) = child.try_exit()? {
        tracing::debug!(pid = child.pid(), ?exit, "child already exited, skipping termination");
        return Ok(ShutdownOutcome::AlreadyExited(exit));
    }

    sink.log(&format!("Sending SIGTERM to child {}", child.pid()));
    child.terminate()?;

    let deadline = Instant::now() + grace;
    let exited = loop {
        tokio::select! {
            exit = child.wait() => break Some(exit?),
            _ = tokio::time::sleep_until(deadline) => break None,
            Some(sig) = signals.recv() => {
                sink.log(&format!("Received {sig}, shutdown already in progress"));
            }
        }
    };

    match exited {
        Some(exit) => {
            sink.log("Child exited gracefully");
            Ok(ShutdownOutcome::Graceful(exit))
        }
        None => {
            sink.log("Child didn't exit, sending SIGKILL");
            tracing::warn!(
                pid = child.pid(),
                grace_ms = grace.as_millis() as u64,
                "grace period elapsed, killing child"
            );
            let exit = child.kill().await?;
            Ok(ShutdownOutcome::Killed(exit))
        }
    }
}
