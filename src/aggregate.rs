use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::{SessionCache, TokenUsage};
use crate::classify::LineSignals;

/// Folds line signals into a session record for one scan.
#[derive(Debug)]
pub struct Aggregator {
    record: SessionCache,
    latest_usage: Option<TokenUsage>,
}

impl Aggregator {
    pub fn resume(record: SessionCache) -> Self {
        Self {
            record,
            latest_usage: None,
        }
    }

    pub fn observe(&mut self, signals: LineSignals) {
        if let Some(ts) = signals.timestamp {
            if self.record.first_timestamp.is_none() {
                self.record.first_timestamp = Some(ts.clone());
            }
            self.record.last_timestamp = Some(ts);
        }

        if signals.is_turn {
            self.record.turns = self.record.turns.saturating_add(1);
        }

        if signals.agent_contribution > 0 {
            self.record.agent_contribution = self
                .record
                .agent_contribution
                .saturating_add(signals.agent_contribution);
        }

        if let Some(usage) = signals.usage {
            self.latest_usage = Some(usage);
        }
    }

    /// Closes the scan. The newest usage seen replaces the cached snapshot;
    /// without one the previous snapshot and context length stand.
    pub fn finish(mut self, end_offset: u64, transcript_size: u64) -> SessionCache {
        self.record.last_offset = end_offset;
        self.record.transcript_size = transcript_size;
        if let Some(usage) = self.latest_usage.take() {
            self.record.context_length = usage.context_tokens();
            self.record.last_usage = Some(usage);
        }
        self.record
    }
}

/// Elapsed time between the first and last observed timestamps, never negative.
pub fn session_duration(record: &SessionCache) -> Duration {
    let (Some(first), Some(last)) = (
        record.first_timestamp.as_deref().and_then(parse_utc_timestamp),
        record.last_timestamp.as_deref().and_then(parse_utc_timestamp),
    ) else {
        return Duration::ZERO;
    };
    last.signed_duration_since(first)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

pub fn parse_utc_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
