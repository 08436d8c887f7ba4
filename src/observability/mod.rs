use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Initialize the tracing subscriber with the configured log level and format.
///
/// Called once from `main`; library code only emits through `tracing` macros.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, WARN, ERROR)
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().with_current_span(true).init(),
    }
}

fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Per-request counters reported when a chat request finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStats {
    pub fragments: u64,
    pub content_bytes: u64,
}

impl CompletionStats {
    pub fn record_fragment(&mut self, fragment: &str) {
        self.fragments += 1;
        self.content_bytes += fragment.len() as u64;
    }
}

/// Log a finished chat request, computing duration from start time.
pub fn log_request_complete(
    model: &str,
    stream: bool,
    outcome: &'static str,
    stats: CompletionStats,
    start_time: Instant,
) {
    let elapsed_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        model,
        stream,
        outcome,
        fragments = stats.fragments,
        content_bytes = stats.content_bytes,
        elapsed_ms,
        "chat request finished"
    );
}
