use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use crate::aggregate::Aggregator;
use crate::cache::{CacheStore, SessionCache};
use crate::classify::LineClassifier;
use crate::error::{TailError, TailResult};
use crate::offset::{ResumePlan, ScanReason, plan_resume, reset_position};
use crate::scanner::{ScanLimits, read_chunk, scan_lines};

/// Result of one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub record: SessionCache,
    /// The cache file was rewritten during this cycle.
    pub persisted: bool,
    pub lines_processed: usize,
    pub malformed_lines: usize,
    /// Part of the transcript was left for a later cycle because a read cap
    /// was reached.
    pub deferred: bool,
}

impl RefreshOutcome {
    fn unchanged(record: SessionCache) -> Self {
        Self {
            record,
            persisted: false,
            lines_processed: 0,
            malformed_lines: 0,
            deferred: false,
        }
    }
}

#[derive(Debug)]
struct ScanResult {
    record: SessionCache,
    lines_processed: usize,
    malformed_lines: usize,
    deferred: bool,
}

/// Keeps a session's derived counters in sync with its transcript across
/// short-lived invocations.
pub struct TranscriptTailer {
    store: CacheStore,
    limits: ScanLimits,
    classifier: LineClassifier,
}

impl TranscriptTailer {
    pub fn new(store: CacheStore, limits: ScanLimits) -> Self {
        Self {
            store,
            limits,
            classifier: LineClassifier::new(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Runs one load, scan, aggregate and conditional save cycle. Never fails:
    /// any problem with the transcript leaves the last persisted counters in
    /// place, and a failed save only costs durability.
    pub fn refresh(&self, session_id: &str, transcript: Option<&Path>) -> RefreshOutcome {
        let persisted = self.store.load(session_id);
        let Some(transcript) = transcript else {
            return RefreshOutcome::unchanged(persisted);
        };

        let scan = match self.scan(session_id, transcript, &persisted) {
            Ok(scan) => scan,
            Err(err) => {
                debug!(session_id, error = %err, "transcript scan failed; keeping cached counters");
                return RefreshOutcome::unchanged(persisted);
            }
        };

        let mut saved = false;
        if scan.record.is_stale_against(&persisted) {
            match self.store.save(session_id, &scan.record) {
                Ok(()) => saved = true,
                Err(err) => {
                    warn!(session_id, error = %err, "failed to persist session cache");
                }
            }
        }

        RefreshOutcome {
            record: scan.record,
            persisted: saved,
            lines_processed: scan.lines_processed,
            malformed_lines: scan.malformed_lines,
            deferred: scan.deferred,
        }
    }

    fn scan(
        &self,
        session_id: &str,
        transcript: &Path,
        cached: &SessionCache,
    ) -> TailResult<ScanResult> {
        let current_size = transcript_size(transcript)?;
        let mut base = cached.clone();

        let start_offset = match plan_resume(&base, current_size) {
            ResumePlan::UpToDate => {
                debug!(session_id, size = current_size, "transcript unchanged");
                return Ok(ScanResult::idle(base));
            }
            ResumePlan::Scan {
                start_offset,
                reason,
            } => {
                match reason {
                    ScanReason::Rewind { previous_size } => {
                        warn!(
                            session_id,
                            previous_size,
                            current_size,
                            "transcript shrank; rescanning from start and keeping counters"
                        );
                        reset_position(&mut base);
                    }
                    ScanReason::InvalidOffset { offset } => {
                        warn!(
                            session_id,
                            offset, current_size, "cached offset out of range; rescanning from start"
                        );
                        base.last_offset = 0;
                    }
                    ScanReason::FromStart | ScanReason::Append => {}
                }
                start_offset
            }
        };

        if start_offset >= current_size {
            base.transcript_size = current_size;
            return Ok(ScanResult::idle(base));
        }

        let chunk = read_chunk(transcript, start_offset, current_size, &self.limits)?;
        let reached_eof = start_offset + chunk.bytes.len() as u64 >= current_size;

        let mut aggregator = Aggregator::resume(base);
        let mut malformed_lines = 0usize;
        let outcome = scan_lines(&chunk, self.limits.max_lines, |line| {
            let signals = self.classifier.classify(line);
            if signals.malformed {
                malformed_lines += 1;
            }
            aggregator.observe(signals);
        });

        let deferred = outcome.hit_line_cap || !reached_eof;
        // A partial scan must not record the full size, or the unchanged-size
        // fast path would hide the unread remainder.
        let recorded_size = if deferred {
            outcome.end_offset
        } else {
            current_size
        };
        let record = aggregator.finish(outcome.end_offset, recorded_size);

        debug!(
            session_id,
            start_offset,
            end_offset = outcome.end_offset,
            lines = outcome.lines_processed,
            malformed = malformed_lines,
            deferred,
            "transcript scanned"
        );

        Ok(ScanResult {
            record,
            lines_processed: outcome.lines_processed,
            malformed_lines,
            deferred,
        })
    }
}

impl ScanResult {
    fn idle(record: SessionCache) -> Self {
        Self {
            record,
            lines_processed: 0,
            malformed_lines: 0,
            deferred: false,
        }
    }
}

fn transcript_size(path: &Path) -> TailResult<u64> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(TailError::TranscriptUnavailable {
            path: path.to_path_buf(),
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(TailError::TranscriptUnavailable {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(TailError::io(path, err)),
    }
}
