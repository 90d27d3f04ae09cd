use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::{Builder as TempFileBuilder, NamedTempFile};
use tracing::debug;

use crate::error::{TailError, TailResult};
use crate::util::strip_bom;

/// Token counts reported by a usage block. Unknown keys are kept verbatim so
/// the persisted snapshot stays faithful to the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenUsage {
    /// Lenient extraction from a decoded usage object: non-numeric or negative
    /// counters read as zero instead of rejecting the whole block.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut usage = TokenUsage::default();
        for (key, item) in object {
            match key.as_str() {
                "input_tokens" => usage.input_tokens = lenient_u64(item),
                "output_tokens" => usage.output_tokens = lenient_u64(item),
                "cache_creation_input_tokens" => {
                    usage.cache_creation_input_tokens = lenient_u64(item)
                }
                "cache_read_input_tokens" => usage.cache_read_input_tokens = lenient_u64(item),
                _ => {
                    usage.extra.insert(key.clone(), item.clone());
                }
            }
        }
        Some(usage)
    }

    /// Tokens occupying the context window for this snapshot.
    pub fn context_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.cache_read_input_tokens)
            .saturating_add(self.cache_creation_input_tokens)
    }
}

pub(crate) fn lenient_u64(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|v| v.is_finite() && *v > 0.0)
                .map(|v| v as u64)
        })
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
        .unwrap_or(0)
}

/// Derived per-session state persisted between invocations.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SessionCache {
    pub last_offset: u64,
    pub transcript_size: u64,
    pub turns: u64,
    pub agent_contribution: u64,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    pub context_length: u64,
    pub last_usage: Option<TokenUsage>,
}

impl SessionCache {
    /// Fields whose change makes the persisted record stale.
    pub fn is_stale_against(&self, persisted: &SessionCache) -> bool {
        self.last_offset != persisted.last_offset
            || self.turns != persisted.turns
            || self.agent_contribution != persisted.agent_contribution
            || self.context_length != persisted.context_length
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_session_id(session_id)))
    }

    pub fn sidecar_path(&self, prefix: &str, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{prefix}-{}.json", sanitize_session_id(session_id)))
    }

    /// Never fails: a missing or unreadable record yields defaults.
    pub fn load(&self, session_id: &str) -> SessionCache {
        match self.try_load(session_id) {
            Ok(Some(record)) => record,
            Ok(None) => SessionCache::default(),
            Err(err) => {
                debug!(session_id, error = %err, "discarding unreadable session cache");
                SessionCache::default()
            }
        }
    }

    pub fn try_load(&self, session_id: &str) -> TailResult<Option<SessionCache>> {
        read_json(&self.path_for(session_id))
    }

    pub fn save(&self, session_id: &str, record: &SessionCache) -> TailResult<()> {
        let payload = serde_json::to_vec(record)?;
        write_atomic(&self.path_for(session_id), &payload)
    }
}

/// Restricts an identifier to `[A-Za-z0-9_-]` so it is safe as a file name.
pub fn sanitize_session_id(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

pub(crate) fn read_json<T>(path: &Path) -> TailResult<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(TailError::io(path, err)),
    };
    let parsed = serde_json::from_str(strip_bom(&raw)).map_err(|source| TailError::CacheDecode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(parsed))
}

/// Writes through a temp file in the destination directory and renames it into
/// place. If the rename is refused, the destination is removed and the rename
/// retried; as a last resort the destination is written directly.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> TailResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).map_err(|err| TailError::io(&parent, err))?;

    match stage_temp_file(&parent, path, bytes) {
        Ok(temp) => match temp.persist(path) {
            Ok(_) => return Ok(()),
            Err(first) => {
                debug!(path = %path.display(), error = %first.error, "rename over destination refused");
                if let Err(err) = fs::remove_file(path)
                    && err.kind() != ErrorKind::NotFound
                {
                    debug!(path = %path.display(), error = %err, "failed to remove destination before rename");
                }
                match first.file.persist(path) {
                    Ok(_) => return Ok(()),
                    Err(second) => {
                        debug!(path = %path.display(), error = %second.error, "rename retry failed; writing directly");
                        if let Err(err) = second.file.close() {
                            debug!(error = %err, "failed to remove leftover temp file");
                        }
                    }
                }
            }
        },
        Err(err) => {
            debug!(path = %path.display(), error = %err, "failed to stage temp file; writing directly");
        }
    }

    fs::write(path, bytes).map_err(|source| TailError::Persist {
        path: path.to_path_buf(),
        source,
    })
}

fn stage_temp_file(dir: &Path, destination: &Path, bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let stem = destination
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("cache");
    let mut temp = TempFileBuilder::new()
        .prefix(&format!(".{stem}."))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    temp.as_file_mut().write_all(bytes)?;
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;
    Ok(temp)
}
