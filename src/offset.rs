use crate::cache::SessionCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanReason {
    /// No usable offset yet; read the transcript from its first byte.
    FromStart,
    /// Continue after the last fully consumed record.
    Append,
    /// The transcript shrank below its recorded size.
    Rewind { previous_size: u64 },
    /// The recorded offset lies beyond the end of the transcript.
    InvalidOffset { offset: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    /// Size unchanged since the last completed scan.
    UpToDate,
    Scan { start_offset: u64, reason: ScanReason },
}

impl ResumePlan {
    pub fn start_offset(&self) -> Option<u64> {
        match self {
            Self::UpToDate => None,
            Self::Scan { start_offset, .. } => Some(*start_offset),
        }
    }
}

/// Decides where the next scan starts given the cached record and the
/// transcript's current size.
pub fn plan_resume(cache: &SessionCache, current_size: u64) -> ResumePlan {
    if cache.transcript_size > current_size {
        return ResumePlan::Scan {
            start_offset: 0,
            reason: ScanReason::Rewind {
                previous_size: cache.transcript_size,
            },
        };
    }

    if current_size == cache.transcript_size
        && cache.last_offset > 0
        && cache.last_offset <= current_size
    {
        return ResumePlan::UpToDate;
    }

    match cache.last_offset {
        0 => ResumePlan::Scan {
            start_offset: 0,
            reason: ScanReason::FromStart,
        },
        offset if offset <= current_size => ResumePlan::Scan {
            start_offset: offset,
            reason: ScanReason::Append,
        },
        offset => ResumePlan::Scan {
            start_offset: 0,
            reason: ScanReason::InvalidOffset { offset },
        },
    }
}

/// Forgets the read position after a rewind while keeping every accumulated
/// counter and timestamp, which a shrunk file can no longer reproduce.
pub fn reset_position(cache: &mut SessionCache) {
    cache.last_offset = 0;
    cache.transcript_size = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_at(last_offset: u64, transcript_size: u64) -> SessionCache {
        SessionCache {
            last_offset,
            transcript_size,
            turns: 7,
            agent_contribution: 900,
            ..SessionCache::default()
        }
    }

    #[test]
    fn fresh_session_scans_from_start() {
        let plan = plan_resume(&SessionCache::default(), 1024);
        assert_eq!(
            plan,
            ResumePlan::Scan {
                start_offset: 0,
                reason: ScanReason::FromStart
            }
        );
    }

    #[test]
    fn unchanged_size_short_circuits() {
        assert_eq!(plan_resume(&cache_at(500, 512), 512), ResumePlan::UpToDate);
        assert_eq!(plan_resume(&cache_at(500, 512), 512).start_offset(), None);
    }

    #[test]
    fn growth_resumes_from_cached_offset() {
        let plan = plan_resume(&cache_at(500, 512), 900);
        assert_eq!(
            plan,
            ResumePlan::Scan {
                start_offset: 500,
                reason: ScanReason::Append
            }
        );
    }

    #[test]
    fn shrink_is_a_rewind_from_zero() {
        let plan = plan_resume(&cache_at(500, 512), 100);
        assert_eq!(
            plan,
            ResumePlan::Scan {
                start_offset: 0,
                reason: ScanReason::Rewind { previous_size: 512 }
            }
        );
    }

    #[test]
    fn offset_past_end_restarts_from_zero() {
        let plan = plan_resume(&cache_at(4096, 100), 200);
        assert_eq!(
            plan,
            ResumePlan::Scan {
                start_offset: 0,
                reason: ScanReason::InvalidOffset { offset: 4096 }
            }
        );
    }

    #[test]
    fn offset_past_end_with_matching_size_is_not_up_to_date() {
        let plan = plan_resume(&cache_at(4096, 200), 200);
        assert_eq!(
            plan,
            ResumePlan::Scan {
                start_offset: 0,
                reason: ScanReason::InvalidOffset { offset: 4096 }
            }
        );
    }

    #[test]
    fn offset_at_end_with_stale_size_resumes_there() {
        let plan = plan_resume(&cache_at(300, 0), 300);
        assert_eq!(plan.start_offset(), Some(300));
    }

    #[test]
    fn reset_position_keeps_counters() {
        let mut cache = cache_at(500, 512);
        cache.first_timestamp = Some("2026-02-09T16:34:13Z".to_string());
        reset_position(&mut cache);

        assert_eq!(cache.last_offset, 0);
        assert_eq!(cache.transcript_size, 0);
        assert_eq!(cache.turns, 7);
        assert_eq!(cache.agent_contribution, 900);
        assert!(cache.first_timestamp.is_some());
    }
}
