use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scanner::{DEFAULT_MAX_LINES, DEFAULT_MAX_READ_BYTES, ScanLimits};
use crate::totals;
use crate::util::strip_bom;

const DEFAULT_CONTEXT_LIMIT: u64 = 160_000;
const DEFAULT_COMPACTION_DROP_RATIO: f64 = 0.9;
const CONFIG_FILE_NAME: &str = "statusline-tail.json";
const CACHE_DIR_NAME: &str = "statusline-cache";

pub const ENV_CACHE_DIR: &str = "STATUSLINE_TAIL_CACHE_DIR";
pub const ENV_MAX_BYTES: &str = "STATUSLINE_TAIL_MAX_BYTES";
pub const ENV_MAX_LINES: &str = "STATUSLINE_TAIL_MAX_LINES";
pub const ENV_CONTEXT_LIMIT: &str = "STATUSLINE_TAIL_CONTEXT_LIMIT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TailConfig {
    pub cache_dir: Option<PathBuf>,
    pub max_read_bytes: u64,
    pub max_lines: usize,
    pub context_limit: u64,
    pub compaction_drop_ratio: f64,
    pub write_context_percent: bool,
    pub cross_device_totals: bool,
    pub stats_dir: Option<PathBuf>,
    pub users_config: Option<PathBuf>,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_lines: DEFAULT_MAX_LINES,
            context_limit: DEFAULT_CONTEXT_LIMIT,
            compaction_drop_ratio: DEFAULT_COMPACTION_DROP_RATIO,
            write_context_percent: true,
            cross_device_totals: true,
            stats_dir: None,
            users_config: None,
        }
    }
}

impl TailConfig {
    /// Reads the optional config file and applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_from(&config_path())?;
        cfg.apply_overrides(|name| env::var(name).ok());
        cfg.normalize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut parsed: TailConfig = serde_json::from_str(strip_bom(&raw))
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        parsed.normalize();
        Ok(parsed)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = positive_u64(lookup(ENV_MAX_BYTES)) {
            self.max_read_bytes = value;
        }
        if let Some(value) = positive_u64(lookup(ENV_MAX_LINES)) {
            self.max_lines = usize::try_from(value).unwrap_or(DEFAULT_MAX_LINES);
        }
        if let Some(value) = positive_u64(lookup(ENV_CONTEXT_LIMIT)) {
            self.context_limit = value;
        }
    }

    fn normalize(&mut self) -> bool {
        let mut changed = false;

        if self.max_read_bytes == 0 {
            self.max_read_bytes = DEFAULT_MAX_READ_BYTES;
            changed = true;
        }
        if self.max_lines == 0 {
            self.max_lines = DEFAULT_MAX_LINES;
            changed = true;
        }
        if self.context_limit == 0 {
            self.context_limit = DEFAULT_CONTEXT_LIMIT;
            changed = true;
        }
        if !self.compaction_drop_ratio.is_finite()
            || self.compaction_drop_ratio <= 0.0
            || self.compaction_drop_ratio >= 1.0
        {
            self.compaction_drop_ratio = DEFAULT_COMPACTION_DROP_RATIO;
            changed = true;
        }
        for path in [&mut self.cache_dir, &mut self.stats_dir, &mut self.users_config] {
            if path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                *path = None;
                changed = true;
            }
        }

        changed
    }

    pub fn scan_limits(&self) -> ScanLimits {
        ScanLimits {
            max_read_bytes: self.max_read_bytes,
            max_lines: self.max_lines,
        }
    }

    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    pub fn resolved_stats_dir(&self) -> PathBuf {
        self.stats_dir.clone().unwrap_or_else(totals::default_stats_dir)
    }

    pub fn resolved_users_config(&self) -> PathBuf {
        self.users_config
            .clone()
            .unwrap_or_else(totals::default_users_config_path)
    }
}

pub fn claude_home() -> PathBuf {
    if let Ok(custom) = env::var("CLAUDE_CONFIG_DIR") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

pub fn config_path() -> PathBuf {
    claude_home().join(CONFIG_FILE_NAME)
}

pub fn default_cache_dir() -> PathBuf {
    claude_home().join(CACHE_DIR_NAME)
}

fn positive_u64(value: Option<String>) -> Option<u64> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = TempDir::new().expect("temp dir");
        let cfg = TailConfig::load_from(&tmp.path().join("absent.json")).expect("load");
        assert_eq!(cfg, TailConfig::default());
        assert_eq!(cfg.scan_limits(), ScanLimits::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("cfg.json");
        std::fs::write(&path, r#"{"max_lines": 200, "context_limit": 0}"#).expect("write");

        let cfg = TailConfig::load_from(&path).expect("load");
        assert_eq!(cfg.max_lines, 200);
        assert_eq!(cfg.context_limit, DEFAULT_CONTEXT_LIMIT);
        assert_eq!(cfg.max_read_bytes, DEFAULT_MAX_READ_BYTES);
        assert!(cfg.write_context_percent);
        assert!(cfg.cross_device_totals);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("cfg.json");
        std::fs::write(&path, "{ nope").expect("write");
        assert!(TailConfig::load_from(&path).is_err());
    }

    #[test]
    fn normalization_repairs_out_of_range_values() {
        let mut cfg = TailConfig {
            max_read_bytes: 0,
            compaction_drop_ratio: 1.5,
            cache_dir: Some(PathBuf::new()),
            stats_dir: Some(PathBuf::new()),
            ..TailConfig::default()
        };

        assert!(cfg.normalize());
        assert_eq!(cfg.max_read_bytes, DEFAULT_MAX_READ_BYTES);
        assert_eq!(cfg.compaction_drop_ratio, DEFAULT_COMPACTION_DROP_RATIO);
        assert_eq!(cfg.cache_dir, None);
        assert_eq!(cfg.stats_dir, None);
        assert!(!cfg.normalize());
    }

    #[test]
    fn environment_overrides_take_precedence() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_CACHE_DIR, " /tmp/statusline "),
            (ENV_MAX_BYTES, "4096"),
            (ENV_MAX_LINES, "0"),
            (ENV_CONTEXT_LIMIT, "not-a-number"),
        ]);
        let mut cfg = TailConfig::default();
        cfg.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.resolved_cache_dir(), PathBuf::from("/tmp/statusline"));
        assert_eq!(cfg.max_read_bytes, 4096);
        assert_eq!(cfg.max_lines, DEFAULT_MAX_LINES);
        assert_eq!(cfg.context_limit, DEFAULT_CONTEXT_LIMIT);
    }
}
