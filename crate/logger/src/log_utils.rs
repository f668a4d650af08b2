use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: Once = Once::new();

const DEFAULT_FILTER: &str = "info";

/// Initialize the tracing subscriber for tests and tools.
///
/// `RUST_LOG` wins when it is set; otherwise `default_value` (or `info`) is used.
/// Calling this function more than once is a no-op.
///
/// # Panics
///
/// Will panic if another global tracing subscriber has already been set
pub fn log_init(default_value: Option<&str>) {
    LOG_INIT.call_once(|| {
        if std::env::var("RUST_BACKTRACE").is_err() {
            unsafe {
                std::env::set_var("RUST_BACKTRACE", "1");
            }
        }

        if std::env::var("RUST_LOG").is_err() {
            unsafe {
                std::env::set_var("RUST_LOG", default_value.unwrap_or(DEFAULT_FILTER));
            }
        }

        tracing_setup(true);
    });
}

/// Initialize the tracing subscriber of the server.
///
/// When `rust_log` is provided it overrides the `RUST_LOG` environment variable.
/// A `quiet` server installs the filter only, nothing is written to stdout.
///
/// # Panics
///
/// Will panic if another global tracing subscriber has already been set
pub fn tracing_init(rust_log: Option<&str>, quiet: bool) {
    LOG_INIT.call_once(|| {
        if let Some(rust_log) = rust_log {
            unsafe {
                std::env::set_var("RUST_LOG", rust_log);
            }
        } else if std::env::var("RUST_LOG").is_err() {
            unsafe {
                std::env::set_var("RUST_LOG", DEFAULT_FILTER);
            }
        }

        tracing_setup(!quiet);
    });
}

fn tracing_setup(to_stdout: bool) {
    let (filter, _reload_handle) =
        tracing_subscriber::reload::Layer::new(EnvFilter::from_default_env());

    let format = to_stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
