//! Small per-session files derived from the context length: a compaction
//! counter kept next to the session cache, and a plain-text context
//! percentage that hook scripts poll.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheStore, read_json, sanitize_session_id, write_atomic};

const COMPACTION_PREFIX: &str = "compact";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CompactionState {
    pub count: u64,
    pub last_context_length: u64,
}

impl CompactionState {
    /// Counts a compaction when the context shrinks below `drop_ratio` of its
    /// previous size. Returns the next state and whether it must be written.
    pub fn advance(&self, context_length: u64, drop_ratio: f64) -> (CompactionState, bool) {
        let mut next = self.clone();
        let previous = self.last_context_length;
        if context_length > 0
            && previous > 0
            && (context_length as f64) < previous as f64 * drop_ratio
        {
            next.count = next.count.saturating_add(1);
        }
        next.last_context_length = context_length;
        let dirty = next != *self;
        (next, dirty)
    }
}

/// Updates the compaction counter for a session and returns the current count.
pub fn track_compactions(
    store: &CacheStore,
    session_id: &str,
    context_length: u64,
    drop_ratio: f64,
) -> u64 {
    let path = store.sidecar_path(COMPACTION_PREFIX, session_id);
    let (next, dirty) = match read_json::<CompactionState>(&path) {
        Ok(Some(state)) => state.advance(context_length, drop_ratio),
        Ok(None) => (fresh_state(context_length), true),
        Err(err) => {
            debug!(session_id, error = %err, "resetting unreadable compaction state");
            (fresh_state(context_length), true)
        }
    };

    if dirty {
        match serde_json::to_vec(&next) {
            Ok(payload) => {
                if let Err(err) = write_atomic(&path, &payload) {
                    debug!(session_id, error = %err, "failed to persist compaction state");
                }
            }
            Err(err) => debug!(session_id, error = %err, "failed to encode compaction state"),
        }
    }
    next.count
}

fn fresh_state(context_length: u64) -> CompactionState {
    CompactionState {
        count: 0,
        last_context_length: context_length,
    }
}

/// Context occupancy in percent, rounded to one decimal place.
pub fn context_percent(context_length: u64, context_limit: u64) -> f64 {
    if context_length == 0 || context_limit == 0 {
        return 0.0;
    }
    let raw = context_length as f64 / context_limit as f64 * 100.0;
    (raw * 10.0).round() / 10.0
}

pub fn context_percent_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!(
        "claude-context-pct-{}.txt",
        sanitize_session_id(session_id)
    ))
}

/// Writes the whole-number percentage only when it differs from what the file
/// already holds. Returns whether a write happened.
pub fn publish_context_percent(dir: &Path, session_id: &str, percent: f64) -> bool {
    let path = context_percent_path(dir, session_id);
    let rounded = percent.round() as i64;
    let previous = fs::read_to_string(&path)
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok());
    if previous == Some(rounded) {
        return false;
    }

    match write_atomic(&path, rounded.to_string().as_bytes()) {
        Ok(()) => true,
        Err(err) => {
            debug!(session_id, error = %err, "failed to publish context percentage");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn large_context_drop_counts_as_compaction() {
        let state = CompactionState {
            count: 1,
            last_context_length: 100_000,
        };

        let (next, dirty) = state.advance(30_000, 0.9);
        assert!(dirty);
        assert_eq!(next.count, 2);
        assert_eq!(next.last_context_length, 30_000);
    }

    #[test]
    fn small_drop_or_growth_is_not_a_compaction() {
        let state = CompactionState {
            count: 0,
            last_context_length: 100_000,
        };
        assert_eq!(state.advance(95_000, 0.9).0.count, 0);
        assert_eq!(state.advance(120_000, 0.9).0.count, 0);
        assert_eq!(state.advance(0, 0.9).0.count, 0);

        let (_, dirty) = state.advance(100_000, 0.9);
        assert!(!dirty);
    }

    #[test]
    fn compaction_counter_persists_between_calls() {
        let tmp = TempDir::new().expect("temp dir");
        let store = CacheStore::new(tmp.path());

        assert_eq!(track_compactions(&store, "s1", 80_000, 0.9), 0);
        assert_eq!(track_compactions(&store, "s1", 90_000, 0.9), 0);
        assert_eq!(track_compactions(&store, "s1", 20_000, 0.9), 1);
        assert_eq!(track_compactions(&store, "s1", 20_000, 0.9), 1);
        assert!(store.sidecar_path("compact", "s1").exists());
    }

    #[test]
    fn context_percent_rounds_to_one_decimal() {
        assert_eq!(context_percent(0, 160_000), 0.0);
        assert_eq!(context_percent(80_000, 160_000), 50.0);
        assert_eq!(context_percent(12_345, 160_000), 7.7);
        assert_eq!(context_percent(10, 0), 0.0);
    }

    #[test]
    fn context_percent_file_is_rewritten_only_on_change() {
        let tmp = TempDir::new().expect("temp dir");

        assert!(publish_context_percent(tmp.path(), "s1", 42.4));
        assert!(!publish_context_percent(tmp.path(), "s1", 41.6));
        assert!(publish_context_percent(tmp.path(), "s1", 43.0));

        let raw = std::fs::read_to_string(context_percent_path(tmp.path(), "s1"))
            .expect("read percent");
        assert_eq!(raw, "43");
    }
}
