//! Dev logging for rfbterm.
//!
//! Enabled by setting the `RFBTERM_LOG` environment variable to any
//! non-empty value before launching:
//!
//! ```sh
//! RFBTERM_LOG=1 rfbterm
//! ```
//!
//! When active, all `tracing` events are written to `~/rfbterm.log` with
//! timestamps and levels; `RFBTERM_LOG` also doubles as an `EnvFilter`
//! directive (`RFBTERM_LOG=rfbterm=trace` for the firehose). A panic hook
//! records panics to the log file before the default handler runs.
//!
//! When `RFBTERM_LOG` is not set the function is a no-op and returns
//! `None`; stdout/stderr stay untouched either way.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialise file-based logging if `RFBTERM_LOG` is set.
///
/// Returns an `Option<WorkerGuard>` that **must be kept alive** for the
/// duration of the process; dropping it flushes and closes the log file.
/// Store the returned guard in a local binding in `main()`.
pub fn init() -> Option<WorkerGuard> {
    let directive = std::env::var("RFBTERM_LOG").unwrap_or_default();
    if directive.is_empty() {
        return None;
    }

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("rfbterm: failed to open log file");

    // Wrap in a non-blocking writer. The returned guard must be kept alive.
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    // "1" means everything at info and up; anything else is a filter spec.
    let filter = if directive == "1" {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false),
    );

    tracing::subscriber::set_global_default(subscriber)
        .expect("rfbterm: failed to set global tracing subscriber");

    // Install the panic hook *after* the subscriber is live so the error
    // event actually reaches the file writer.
    install_panic_hook();

    tracing::info!("rfbterm logging initialised — writing to {}", log_path.display());

    Some(guard)
}

/// Return the absolute path for the log file: `~/rfbterm.log`.
fn log_file_path() -> PathBuf {
    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    home.join("rfbterm.log")
}

/// Install a panic hook that logs the panic as a `tracing::error!` event
/// before delegating to the previously-installed handler.
fn install_panic_hook() {
    let prev_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "<unknown location>".to_string());

        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };

        tracing::error!(location = %location, "PANIC: {}", message);

        prev_hook(info);
    }));
}
