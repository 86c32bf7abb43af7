mod child;
mod config;
mod log_sink;
mod shutdown;
mod signals;
mod supervisor;

use clap::Parser;
use std::ffi::OsString;
use std::process::ExitCode;

/// A minimal process supervisor: run one program with its output appended to
/// a log, forward SIGINT/SIGTERM/SIGQUIT to it as a graceful-then-forceful
/// shutdown, and exit with its exit code.
#[derive(Parser, Debug)]
#[command(
    name = "procwrap",
    version,
    about,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// Program to run followed by its arguments, passed through verbatim
    #[arg(
        value_name = "PROGRAM",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<OsString>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let argv = match Cli::try_parse() {
        Ok(cli) => cli.command,
        Err(e) => {
            tracing::debug!(error = %e, "argument parsing failed, treating as missing program");
            Vec::new()
        }
    };
    tracing::debug!(?argv, "parsed CLI arguments");

    let config = config::SupervisorConfig::from_env();

    let sink = match log_sink::LogSink::open(&config.log_path) {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!(
                error = %e,
                path = %config.log_path.display(),
                "failed to open log file"
            );
            return ExitCode::FAILURE;
        }
    };

    let signals = match signals::install() {
        Ok(rx) => rx,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            sink.close();
            return ExitCode::FAILURE;
        }
    };

    let code = supervisor::supervise(argv, sink, &config, signals).await;
    ExitCode::from(code)
}
