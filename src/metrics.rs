use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{parse_utc_timestamp, session_duration};
use crate::cache::SessionCache;
use crate::sidecar::context_percent;
use crate::totals::UserTotals;

/// Counters handed to the rendering stage after a refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetrics {
    pub session_id: String,
    pub model: Option<String>,
    pub turns: u64,
    pub agent_contribution: u64,
    pub context_length: u64,
    pub context_limit: u64,
    pub context_percent: f64,
    pub compactions: u64,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub session_cost_usd: Option<f64>,
    /// Cross-device totals for the current user, when enabled.
    pub user_totals: Option<UserTotals>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsContext {
    pub model: Option<String>,
    pub session_cost_usd: Option<f64>,
    pub context_limit: u64,
    pub compactions: u64,
    pub user_totals: Option<UserTotals>,
}

impl SessionMetrics {
    pub fn from_record(session_id: &str, record: &SessionCache, ctx: MetricsContext) -> Self {
        Self {
            session_id: session_id.to_string(),
            model: ctx.model,
            turns: record.turns,
            agent_contribution: record.agent_contribution,
            context_length: record.context_length,
            context_limit: ctx.context_limit,
            context_percent: context_percent(record.context_length, ctx.context_limit),
            compactions: ctx.compactions,
            first_timestamp: record
                .first_timestamp
                .as_deref()
                .and_then(parse_utc_timestamp),
            last_timestamp: record
                .last_timestamp
                .as_deref()
                .and_then(parse_utc_timestamp),
            duration_seconds: session_duration(record).as_secs(),
            session_cost_usd: ctx.session_cost_usd,
            user_totals: ctx.user_totals,
        }
    }
}
