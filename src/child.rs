/// The one supervised child: spawn it with output redirected to the log sink,
/// poll its liveness, and deliver SIGTERM/SIGKILL.
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::ffi::{OsStr, OsString};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Normal exit with this code.
    Code(i32),
    /// Killed by this signal number.
    Signaled(i32),
    /// Neither a code nor a signal could be observed.
    Unknown,
}

impl ChildExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ChildExit::Code(code),
            (None, Some(sig)) => ChildExit::Signaled(sig),
            (None, None) => ChildExit::Unknown,
        }
    }

    /// Status the supervisor reports for this exit on the natural-exit path.
    ///
    /// Signal deaths follow the shell convention (128 + signal); an unknown
    /// status falls back to 0.
    pub fn exit_code(&self) -> u8 {
        match *self {
            ChildExit::Code(code) => u8::try_from(code).unwrap_or(u8::MAX),
            ChildExit::Signaled(sig) => u8::try_from(128 + sig).unwrap_or(u8::MAX),
            ChildExit::Unknown => 0,
        }
    }
}

/// Name for a raw signal number, e.g. `SIGKILL`, or the number if unknown.
pub fn signal_name(sig: i32) -> String {
    Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {sig}"))
}

/// Errors that can occur while managing the child.
#[derive(Debug)]
pub enum ChildError {
    /// The program could not be launched.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Polling or reaping the child failed.
    Wait { pid: u32, source: std::io::Error },
    /// A signal could not be delivered to the child.
    Signal {
        pid: u32,
        signal: &'static str,
        source: std::io::Error,
    },
}

impl ChildError {
    /// Process exit status for this failure. Spawn errors follow the shell
    /// convention: 127 for a missing program, 126 for one that can't be run.
    pub fn exit_code(&self) -> u8 {
        match self {
            ChildError::Spawn { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => 127,
                std::io::ErrorKind::PermissionDenied => 126,
                _ => 1,
            },
            ChildError::Wait { .. } | ChildError::Signal { .. } => 1,
        }
    }
}

impl std::fmt::Display for ChildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildError::Spawn { program, source } => {
                write!(f, "Failed to start {}: {}", program, source)
            }
            ChildError::Wait { pid, source } => {
                write!(f, "Failed to wait for child {}: {}", pid, source)
            }
            ChildError::Signal {
                pid,
                signal,
                source,
            } => {
                write!(f, "Failed to send {} to child {}: {}", signal, pid, source)
            }
        }
    }
}

impl std::error::Error for ChildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChildError::Spawn { source, .. } => Some(source),
            ChildError::Wait { source, .. } => Some(source),
            ChildError::Signal { source, .. } => Some(source),
        }
    }
}

#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: u32,
}

impl ChildProcess {
    /// Spawn `program` with `args`; argv[0] is `program` itself.
    pub fn spawn(
        program: &OsStr,
        args: &[OsString],
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<Self, ChildError> {
        let spawn_err = |source: std::io::Error| ChildError::Spawn {
            program: program.to_string_lossy().into_owned(),
            source,
        };

        let child = Command::new(program)
            .args(args)
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(spawn_err)?;

        let pid = child
            .id()
            .ok_or_else(|| spawn_err(std::io::Error::other("child exited before its pid was read")))?;

        tracing::info!(pid, program = %program.to_string_lossy(), "child spawned");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking liveness check. `None` while the child is still running.
    pub fn try_exit(&mut self) -> Result<Option<ChildExit>, ChildError> {
        let status = self.child.try_wait().map_err(|e| ChildError::Wait {
            pid: self.pid,
            source: e,
        })?;
        Ok(status.map(ChildExit::from_status))
    }

    /// Block until the child exits. Cancel-safe.
    pub async fn wait(&mut self) -> Result<ChildExit, ChildError> {
        let status = self.child.wait().await.map_err(|e| ChildError::Wait {
            pid: self.pid,
            source: e,
        })?;
        Ok(ChildExit::from_status(status))
    }

    /// Ask the child to exit with SIGTERM.
    pub fn terminate(&self) -> Result<(), ChildError> {
        let target = Pid::from_raw(self.pid as i32);
        match signal::kill(target, Signal::SIGTERM) {
            Ok(()) => Ok(()),
            // Gone between the liveness check and the kill
            Err(nix::errno::Errno::ESRCH) => {
                tracing::debug!(pid = self.pid, "SIGTERM target already gone");
                Ok(())
            }
            Err(errno) => Err(ChildError::Signal {
                pid: self.pid,
                signal: Signal::SIGTERM.as_str(),
                source: errno.into(),
            }),
        }
    }

    /// SIGKILL the child and wait, without a timeout, until it is reaped.
    pub async fn kill(&mut self) -> Result<ChildExit, ChildError> {
        if let Err(e) = self.child.start_kill() {
            // An already-reaped child rejects the kill; its status is still cached
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(ChildError::Signal {
                    pid: self.pid,
                    signal: Signal::SIGKILL.as_str(),
                    source: e,
                });
            }
        }
        self.wait().await
    }
}
