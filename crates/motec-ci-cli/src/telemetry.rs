//! Log setup for the `motec-ci` binary.
//!
//! Everything is written to stderr: stdout belongs to the run summary, or to
//! the JSON report when `--report -` is given.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter for `level`, overridden by `RUST_LOG` when that is set.
///
/// Dependencies are held at `warn` unless `RUST_LOG` says otherwise, so that
/// `--verbose` shows step commands and not git or tokio internals.
fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,motec_ci={level},motec_ci_cli={level}",
            level = level.as_str().to_lowercase()
        ))
    })
}

/// Install the global subscriber.
///
/// * `json`: one JSON object per line, with the current span's fields, for
///   collecting run logs from CI machines.
/// * `level`: verbosity of motec-ci's own modules.
///
/// A second call leaves the first subscriber in place.
pub fn init_tracing(json: bool, level: Level) {
    let registry = Registry::default().with(log_filter(level));

    let installed = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(level == Level::DEBUG)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    installed.ok();
}
