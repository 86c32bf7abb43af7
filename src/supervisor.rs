/// Supervisor state machine: start the child, poll it, and turn termination
/// signals into a bounded shutdown.
///
/// ```text
/// Starting -> Running -> NaturallyExited(code)          -> report code
///                     -> SignalReceived -> stop_child   -> report 0
/// ```
use crate::child::{signal_name, ChildError, ChildExit, ChildProcess};
use crate::config::SupervisorConfig;
use crate::log_sink::LogSink;
use crate::shutdown::{self, ShutdownOutcome};
use crate::signals::TerminationSignal;
use std::ffi::OsString;
use tokio::sync::mpsc;

pub const USAGE: &str = "Usage: procwrap <program> [args...]";

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child exited on its own.
    Exited(ChildExit),
    /// A termination signal stopped the run.
    Shutdown {
        signal: TerminationSignal,
        outcome: ShutdownOutcome,
    },
}

impl Termination {
    /// The supervisor's own exit status.
    ///
    /// A natural exit mirrors the child. A signal-driven shutdown always
    /// reports 0: delivering the signal and reaping the child is the job,
    /// whatever code the child itself ended with.
    pub fn exit_code(&self) -> u8 {
        match self {
            Termination::Exited(exit) => exit.exit_code(),
            Termination::Shutdown { .. } => 0,
        }
    }
}

/// Errors that end a run before or while the child is supervised.
#[derive(Debug)]
pub enum SupervisorError {
    /// No program was given.
    Usage,
    /// The sink could not be duplicated for the child's stdout/stderr.
    Redirect { source: std::io::Error },
    /// Spawning, polling, or signalling the child failed.
    Child(ChildError),
}

impl SupervisorError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SupervisorError::Usage | SupervisorError::Redirect { .. } => 1,
            SupervisorError::Child(e) => e.exit_code(),
        }
    }
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::Usage => f.write_str(USAGE),
            SupervisorError::Redirect { source } => {
                write!(f, "Failed to redirect child output to log: {}", source)
            }
            SupervisorError::Child(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Usage => None,
            SupervisorError::Redirect { source } => Some(source),
            SupervisorError::Child(e) => Some(e),
        }
    }
}

impl From<ChildError> for SupervisorError {
    fn from(e: ChildError) -> Self {
        SupervisorError::Child(e)
    }
}

/// Run `argv` under supervision and return the supervisor's exit status.
///
/// Owns `sink` for the whole run: every path, success or error, funnels
/// through the single `close` at the end.
pub async fn supervise(
    argv: Vec<OsString>,
    mut sink: LogSink,
    config: &SupervisorConfig,
    mut signals: mpsc::Receiver<TerminationSignal>,
) -> u8 {
    let code = match run(&argv, &mut sink, config, &mut signals).await {
        Ok(termination) => {
            match &termination {
                Termination::Exited(exit) => tracing::info!(?exit, "child exited on its own"),
                Termination::Shutdown { signal, outcome } => tracing::info!(
                    signal = signal.name(),
                    child_exit = ?outcome.child_exit(),
                    "shutdown complete"
                ),
            }
            termination.exit_code()
        }
        Err(err) => {
            sink.log(&err.to_string());
            tracing::error!(error = %err, "supervision failed");
            err.exit_code()
        }
    };
    sink.close();
    code
}

async fn run(
    argv: &[OsString],
    sink: &mut LogSink,
    config: &SupervisorConfig,
    signals: &mut mpsc::Receiver<TerminationSignal>,
) -> Result<Termination, SupervisorError> {
    let (program, args) = argv.split_first().ok_or(SupervisorError::Usage)?;
    tracing::debug!(log = %sink.path().display(), "supervising");

    sink.log(&starting_line(program, args));

    let (stdout, stderr) = sink
        .child_stdio()
        .map_err(|e| SupervisorError::Redirect { source: e })?;
    let mut child = ChildProcess::spawn(program, args, stdout, stderr)?;
    sink.log(&format!("Child PID: {}", child.pid()));

    loop {
        if let Some(exit) = child.try_exit()? {
            sink.log(&exit_line(exit));
            return Ok(Termination::Exited(exit));
        }

        tokio::select! {
            biased;
            Some(signal) = signals.recv() => {
                sink.log(&format!("Received {signal}, shutting down..."));
                let outcome =
                    shutdown::stop_child(&mut child, sink, config.grace_period, signals).await?;
                sink.log("Exiting");
                return Ok(Termination::Shutdown { signal, outcome });
            }
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}

fn starting_line(program: &OsString, args: &[OsString]) -> String {
    let mut line = format!("Starting: {}", program.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

fn exit_line(exit: ChildExit) -> String {
    match exit {
        ChildExit::Code(code) => format!("Child exited with code: {code}"),
        ChildExit::Signaled(sig) => format!("Child terminated by signal {}", signal_name(sig)),
        ChildExit::Unknown => "Child exited with unknown status".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn test_config(dir: &TempDir) -> SupervisorConfig {
        SupervisorConfig {
            log_path: dir.path().join("procwrap.log"),
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
        }
    }

    fn argv(parts: &[&str]) -> Vec<OsString> {
        parts.iter().map(OsString::from).collect()
    }

    async fn supervise_with(
        config: &SupervisorConfig,
        parts: &[&str],
        signals: mpsc::Receiver<TerminationSignal>,
    ) -> (u8, String) {
        let sink = LogSink::open(&config.log_path).unwrap();
        let code = supervise(argv(parts), sink, config, signals).await;
        let log = std::fs::read_to_string(&config.log_path).unwrap();
        (code, log)
    }

    /// Channel that delivers `signal` after `delay`.
    fn signal_after(delay: Duration, signal: TerminationSignal) -> mpsc::Receiver<TerminationSignal> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(signal).await;
        });
        rx
    }

    fn no_signals() -> (mpsc::Sender<TerminationSignal>, mpsc::Receiver<TerminationSignal>) {
        mpsc::channel(1)
    }

    #[tokio::test]
    async fn test_natural_exit_code_is_propagated() {
        for n in [0, 1, 42, 137] {
            let dir = tempdir().unwrap();
            let config = test_config(&dir);
            let (_tx, rx) = no_signals();

            let script = format!("exit {n}");
            let (code, log) = supervise_with(&config, &["sh", "-c", &script], rx).await;

            assert_eq!(code, n, "exit {n}");
            assert!(log.contains(&format!("Child exited with code: {n}")));
            assert!(!log.contains("Exiting"));
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_usage_error() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let (_tx, rx) = no_signals();

        let (code, log) = supervise_with(&config, &[], rx).await;

        assert_eq!(code, 1);
        assert!(log.contains("] Usage: procwrap <program> [args...]"));
        assert!(!log.contains("Child PID"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_logged() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let (_tx, rx) = no_signals();

        let (code, log) = supervise_with(&config, &["nonexistent-binary-xyz", "-v"], rx).await;

        assert_eq!(code, 127);
        assert!(log.contains("Starting: nonexistent-binary-xyz -v"));
        assert!(log.contains("Failed to start nonexistent-binary-xyz"));
        assert!(!log.contains("Child PID"));
    }

    #[tokio::test]
    async fn test_child_output_and_arguments_reach_log() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let (_tx, rx) = no_signals();

        let (code, log) = supervise_with(
            &config,
            &["sh", "-c", "printf '%s|' \"$@\"; echo oops >&2", "argv0", "a", "--b", "c d"],
            rx,
        )
        .await;

        assert_eq!(code, 0);
        // stdout and stderr land in the same file, in write order
        assert!(log.contains("a|--b|c d|oops\n"));
    }

    #[tokio::test]
    async fn test_child_pid_is_logged() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let (_tx, rx) = no_signals();

        let (_, log) = supervise_with(&config, &["true"], rx).await;

        let pid_line = log
            .lines()
            .find(|l| l.contains("Child PID: "))
            .expect("pid line");
        let pid: u32 = pid_line.rsplit(' ').next().unwrap().parse().unwrap();
        assert!(pid > 0);
    }

    #[tokio::test]
    async fn test_signal_stops_responsive_child() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let rx = signal_after(Duration::from_millis(200), TerminationSignal::Terminate);

        let (code, log) = supervise_with(&config, &["sleep", "30"], rx).await;

        assert_eq!(code, 0);
        assert!(log.contains("Received SIGTERM, shutting down..."));
        assert!(log.contains("Sending SIGTERM to child"));
        assert!(log.contains("Child exited gracefully"));
        assert!(log.trim_end().ends_with("] Exiting"));
    }

    #[tokio::test]
    async fn test_signal_escalates_to_kill() {
        let dir = tempdir().unwrap();
        let config = SupervisorConfig {
            grace_period: Duration::from_millis(300),
            ..test_config(&dir)
        };
        let rx = signal_after(Duration::from_millis(300), TerminationSignal::Quit);

        let (code, log) =
            supervise_with(&config, &["sh", "-c", "trap '' TERM; exec sleep 30"], rx).await;

        assert_eq!(code, 0);
        assert!(log.contains("Received SIGQUIT, shutting down..."));
        assert!(log.contains("Child didn't exit, sending SIGKILL"));
        assert!(!log.contains("Child exited gracefully"));
        assert!(log.contains("] Exiting"));
    }

    #[tokio::test]
    async fn test_signal_after_child_exit_skips_termination() {
        let dir = tempdir().unwrap();
        let config = SupervisorConfig {
            // Keep the loop asleep so the signal lands after the child is gone
            poll_interval: Duration::from_secs(5),
            ..test_config(&dir)
        };
        let rx = signal_after(Duration::from_millis(600), TerminationSignal::Interrupt);

        let (code, log) = supervise_with(&config, &["sh", "-c", "sleep 0.1; exit 3"], rx).await;

        // Shutdown path reports 0 regardless of the child's code
        assert_eq!(code, 0);
        assert!(log.contains("Received SIGINT, shutting down..."));
        assert!(!log.contains("Sending SIGTERM"));
        assert!(!log.contains("SIGKILL"));
        assert!(log.contains("] Exiting"));
    }

    #[tokio::test]
    async fn test_child_killed_by_signal_reports_128_plus_signal() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let (_tx, rx) = no_signals();

        let (code, log) = supervise_with(&config, &["sh", "-c", "kill -9 $$"], rx).await;

        assert_eq!(code, 137);
        assert!(log.contains("Child terminated by signal SIGKILL"));
        assert!(!log.contains("Exiting"));
    }

    #[tokio::test]
    async fn test_runs_append_to_same_log() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);

        let (_tx, rx) = no_signals();
        supervise_with(&config, &["sh", "-c", "echo first-run"], rx).await;
        let (_tx, rx) = no_signals();
        let (_, log) = supervise_with(&config, &["sh", "-c", "echo second-run"], rx).await;

        assert!(log.contains("first-run"));
        assert!(log.contains("second-run"));
        assert_eq!(log.matches("Child PID").count(), 2);
    }

    #[test]
    fn test_starting_line() {
        // No trailing space when the program has no arguments
        assert_eq!(starting_line(&OsString::from("prog"), &[]), "Starting: prog");
        assert_eq!(
            starting_line(&OsString::from("prog"), &argv(&["-x", "y"])),
            "Starting: prog -x y"
        );
    }

    #[test]
    fn test_exit_line() {
        assert_eq!(exit_line(ChildExit::Code(42)), "Child exited with code: 42");
        assert_eq!(
            exit_line(ChildExit::Signaled(9)),
            "Child terminated by signal SIGKILL"
        );
    }

    #[test]
    fn test_shutdown_always_reports_success() {
        let graceful = Termination::Shutdown {
            signal: TerminationSignal::Terminate,
            outcome: ShutdownOutcome::Graceful(ChildExit::Code(3)),
        };
        let killed = Termination::Shutdown {
            signal: TerminationSignal::Interrupt,
            outcome: ShutdownOutcome::Killed(ChildExit::Signaled(9)),
        };
        assert_eq!(graceful.exit_code(), 0);
        assert_eq!(killed.exit_code(), 0);
        assert_eq!(Termination::Exited(ChildExit::Code(3)).exit_code(), 3);
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(SupervisorError::Usage.exit_code(), 1);
        assert_eq!(SupervisorError::Usage.to_string(), USAGE);
        let redirect = SupervisorError::Redirect {
            source: std::io::Error::other("boom"),
        };
        assert_eq!(redirect.exit_code(), 1);
    }
}
