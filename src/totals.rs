//! Per-user totals aggregated across devices by an external stats collector.
//!
//! The collector drops one `user-<name>.json` per user into a shared stats
//! directory. The user is taken from the environment unless the collector's
//! `users.json` names a `defaultUser`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::{lenient_u64, read_json};

/// Typing speed used to turn typed characters into time at the keyboard.
const CHARS_PER_TYPING_MINUTE: f64 = 285.0;
const UNKNOWN_USER: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UserTotals {
    pub user: String,
    pub chars_user: u64,
    pub chars_ai: u64,
    pub user_prompts: u64,
    pub cost_usd: f64,
    pub typing_minutes: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct UsersConfig {
    default_user: Option<String>,
}

pub fn default_stats_dir() -> PathBuf {
    home().join(".claude-history").join("stats")
}

pub fn default_users_config_path() -> PathBuf {
    home().join(".config").join("kfg-stats").join("users.json")
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `USERNAME`, then `USER`, then `unknown`; a `defaultUser` in the users
/// config wins over all of them.
pub fn resolve_user_name<F>(lookup: F, users_config: &Path) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let configured = match read_json::<UsersConfig>(users_config) {
        Ok(cfg) => cfg.and_then(|cfg| cfg.default_user),
        Err(err) => {
            debug!(error = %err, "ignoring unreadable users config");
            None
        }
    };

    configured
        .filter(|name| !name.is_empty())
        .or_else(|| lookup("USERNAME").filter(|name| !name.is_empty()))
        .or_else(|| lookup("USER").filter(|name| !name.is_empty()))
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

pub fn user_stats_path(stats_dir: &Path, user: &str) -> PathBuf {
    stats_dir.join(format!("user-{user}.json"))
}

/// Never fails: a missing, unreadable or unsafe entry yields zero totals.
pub fn load_user_totals(stats_dir: &Path, user: &str) -> UserTotals {
    let mut totals = UserTotals {
        user: user.to_string(),
        ..UserTotals::default()
    };
    if user.contains(|ch: char| ch == '/' || ch == '\\') || user.starts_with('.') {
        debug!(user, "refusing user name that leaves the stats directory");
        return totals;
    }

    let stats = match read_json::<Value>(&user_stats_path(stats_dir, user)) {
        Ok(Some(stats)) => stats,
        Ok(None) => return totals,
        Err(err) => {
            debug!(user, error = %err, "ignoring unreadable user stats");
            return totals;
        }
    };

    totals.chars_user = stats.get("chars_user").map(lenient_u64).unwrap_or(0);
    totals.chars_ai = stats.get("chars_ai").map(lenient_u64).unwrap_or(0);
    totals.user_prompts = stats.get("user_prompts").map(lenient_u64).unwrap_or(0);
    totals.cost_usd = stats
        .get("cost")
        .and_then(Value::as_f64)
        .filter(|cost| cost.is_finite() && *cost > 0.0)
        .unwrap_or(0.0);
    totals.typing_minutes = typing_minutes(totals.chars_user);
    totals
}

pub fn typing_minutes(chars_user: u64) -> f64 {
    chars_user as f64 / CHARS_PER_TYPING_MINUTE
}
