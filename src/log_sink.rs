/// Append-only log shared by the supervisor and its child.
///
/// Supervisor lines are timestamped and mirrored to stdout; the child writes
/// raw stdout/stderr into the same file through inherited descriptors.
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Timestamp layout for supervisor-authored lines.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug)]
pub struct LogSink {
    file: File,
    path: PathBuf,
}

impl LogSink {
    /// Open (or create) the sink in append mode.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!(path = %path.display(), "log sink opened");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one timestamped line to the sink and to stdout, flushing both.
    ///
    /// Write failures are reported through tracing and never abort the caller:
    /// losing a log line must not leave the child unsupervised.
    pub fn log(&mut self, message: &str) {
        let line = format_line(Local::now(), message);

        if let Err(e) = self
            .file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
        {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to write log line");
        }

        let mut stdout = std::io::stdout().lock();
        let _ = stdout
            .write_all(line.as_bytes())
            .and_then(|()| stdout.flush());
    }

    /// Handles for the child's stdout and stderr, both pointing at the sink.
    ///
    /// The duplicated descriptors keep `O_APPEND`, so child writes land at the
    /// end of the file even when interleaved with supervisor lines.
    pub fn child_stdio(&self) -> std::io::Result<(Stdio, Stdio)> {
        let stdout = self.file.try_clone()?;
        let stderr = self.file.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    /// Sync and release the sink. Consumes `self`, so it runs at most once.
    pub fn close(self) {
        if let Err(e) = self.file.sync_all() {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to sync log sink");
        }
        tracing::debug!(path = %self.path.display(), "log sink closed");
    }
}

/// Render a supervisor line as `[YYYY-MM-DD HH:MM:SS] message\n`.
fn format_line(at: DateTime<Local>, message: &str) -> String {
    format!("[{}] {}\n", at.format(TIMESTAMP_FORMAT), message)
}
