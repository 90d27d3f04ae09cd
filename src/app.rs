use std::env;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::cache::{CacheStore, write_atomic};
use crate::config::{self, TailConfig};
use crate::metrics::{MetricsContext, SessionMetrics};
use crate::payload::{StatuslinePayload, parse_payload};
use crate::pipeline::TranscriptTailer;
use crate::sidecar::{publish_context_percent, track_compactions};
use crate::totals::{UserTotals, load_user_totals, resolve_user_name};
use crate::util::human_duration;

/// Default command: one refresh cycle for the session described on stdin,
/// with the resulting metrics printed as JSON.
pub fn run_statusline(config: &TailConfig) -> Result<()> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read statusline payload from stdin")?;
    let Some(payload) = parse_payload(&raw)? else {
        return Ok(());
    };

    let metrics = refresh_session(config, &payload, &env::temp_dir());
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, &metrics)?;
    writeln!(stdout)?;
    Ok(())
}

pub fn refresh_session(
    config: &TailConfig,
    payload: &StatuslinePayload,
    sidecar_dir: &Path,
) -> SessionMetrics {
    let session_id = payload.resolved_session_id(std::process::id());
    let tailer = TranscriptTailer::new(
        CacheStore::new(config.resolved_cache_dir()),
        config.scan_limits(),
    );

    let outcome = tailer.refresh(&session_id, payload.transcript_path.as_deref());
    debug!(
        session_id = %session_id,
        persisted = outcome.persisted,
        lines = outcome.lines_processed,
        deferred = outcome.deferred,
        "session refreshed"
    );

    let record = outcome.record;
    let compactions = track_compactions(
        tailer.store(),
        &session_id,
        record.context_length,
        config.compaction_drop_ratio,
    );
    let metrics = SessionMetrics::from_record(
        &session_id,
        &record,
        MetricsContext {
            model: payload.model_id().map(ToString::to_string),
            session_cost_usd: payload.total_cost_usd(),
            context_limit: config.context_limit,
            compactions,
            user_totals: cross_device_totals(config),
        },
    );

    if config.write_context_percent {
        publish_context_percent(sidecar_dir, &session_id, metrics.context_percent);
    }
    metrics
}

fn cross_device_totals(config: &TailConfig) -> Option<UserTotals> {
    if !config.cross_device_totals {
        return None;
    }
    let user = resolve_user_name(|name| env::var(name).ok(), &config.resolved_users_config());
    Some(load_user_totals(&config.resolved_stats_dir(), &user))
}

pub fn inspect(config: &TailConfig, session_id: &str) -> Result<u8> {
    let store = CacheStore::new(config.resolved_cache_dir());
    let path = store.path_for(session_id);
    let Some(record) = store.try_load(session_id)? else {
        println!("no cache for session {session_id} ({})", path.display());
        return Ok(1);
    };

    let metrics = SessionMetrics::from_record(
        session_id,
        &record,
        MetricsContext {
            context_limit: config.context_limit,
            ..MetricsContext::default()
        },
    );

    println!("statusline-tail inspect");
    println!("cache: {}", path.display());
    println!("last_offset: {}", record.last_offset);
    println!("transcript_size: {}", record.transcript_size);
    println!("turns: {}", record.turns);
    println!("agent_contribution: {}", record.agent_contribution);
    println!(
        "context_length: {} ({}%)",
        record.context_length, metrics.context_percent
    );
    println!(
        "first_timestamp: {}",
        record.first_timestamp.as_deref().unwrap_or("n/a")
    );
    println!(
        "last_timestamp: {}",
        record.last_timestamp.as_deref().unwrap_or("n/a")
    );
    println!(
        "duration: {}",
        human_duration(std::time::Duration::from_secs(metrics.duration_seconds))
    );
    Ok(0)
}

pub fn doctor(loaded: Result<TailConfig>) -> Result<u8> {
    let mut issues = 0u8;

    println!("statusline-tail doctor");
    println!("config_path: {}", config::config_path().display());

    let config = match loaded {
        Ok(cfg) => {
            println!("[OK] Configuration loaded.");
            cfg
        }
        Err(err) => {
            issues += 1;
            println!("[WARN] Configuration unreadable, defaults in use: {err:#}");
            TailConfig::default()
        }
    };

    let cache_dir = config.resolved_cache_dir();
    println!("cache_dir: {}", cache_dir.display());
    let probe = cache_dir.join(".doctor-probe");
    match write_atomic(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            println!("[OK] Cache directory is writable.");
        }
        Err(err) => {
            issues += 1;
            println!("[WARN] Cache directory is not writable: {err}");
        }
    }

    println!(
        "limits: {} bytes / {} lines per refresh",
        config.max_read_bytes, config.max_lines
    );

    if issues == 0 {
        println!("Doctor: healthy");
        Ok(0)
    } else {
        println!("Doctor: {issues} issue(s) found");
        Ok(1)
    }
}
