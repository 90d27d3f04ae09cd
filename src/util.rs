use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

const LOG_ENV: &str = "STATUSLINE_TAIL_LOG";

/// Logs go to stderr; stdout is reserved for the metrics payload.
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

/// Drops leading byte-order marks (either endianness) and stray NULs left
/// behind by editors and shells that write UTF-16 or BOM-prefixed UTF-8.
pub fn strip_bom(input: &str) -> &str {
    input.trim_start_matches(|ch: char| matches!(ch, '\u{feff}' | '\u{fffe}' | '\0'))
}

pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
