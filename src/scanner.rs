use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{TailError, TailResult};

pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_LINES: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub max_read_bytes: u64,
    pub max_lines: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

/// Raw bytes read from the transcript starting at `start_offset`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub start_offset: u64,
    pub bytes: Vec<u8>,
    /// The byte before `start_offset` is not a newline, so the first line of
    /// the chunk is the tail of a record that began earlier.
    pub starts_mid_record: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanOutcome {
    /// Offset just past the last line that was fully handled.
    pub end_offset: u64,
    pub lines_processed: usize,
    pub hit_line_cap: bool,
}

pub fn read_chunk(
    path: &Path,
    start_offset: u64,
    current_size: u64,
    limits: &ScanLimits,
) -> TailResult<Chunk> {
    let mut file = File::open(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => TailError::TranscriptUnavailable {
            path: path.to_path_buf(),
        },
        _ => TailError::io(path, err),
    })?;

    let mut starts_mid_record = false;
    if start_offset > 0 {
        file.seek(SeekFrom::Start(start_offset - 1))
            .map_err(|err| TailError::io(path, err))?;
        let mut previous = [0u8; 1];
        match file.read_exact(&mut previous) {
            Ok(()) => starts_mid_record = previous[0] != b'\n',
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                return Ok(Chunk {
                    start_offset,
                    bytes: Vec::new(),
                    starts_mid_record: false,
                });
            }
            Err(err) => return Err(TailError::io(path, err)),
        }
    }

    let to_read = current_size
        .saturating_sub(start_offset)
        .min(limits.max_read_bytes);
    let mut bytes = Vec::with_capacity(usize::try_from(to_read).unwrap_or(0));
    file.take(to_read)
        .read_to_end(&mut bytes)
        .map_err(|err| TailError::io(path, err))?;

    Ok(Chunk {
        start_offset,
        bytes,
        starts_mid_record,
    })
}

/// Feeds every complete, non-blank line of `chunk` to `on_line` and reports how
/// far the read position may safely advance.
///
/// The bytes after the last newline are a possibly unfinished record and are
/// never consumed. A leading partial record is consumed without being handed
/// out. Blank lines advance the offset without counting toward `max_lines`.
/// Once `max_lines` lines were handed out, the remaining lines are left for
/// the next scan.
pub fn scan_lines<F>(chunk: &Chunk, max_lines: usize, mut on_line: F) -> ScanOutcome
where
    F: FnMut(&[u8]),
{
    let mut outcome = ScanOutcome {
        end_offset: chunk.start_offset,
        ..ScanOutcome::default()
    };
    let mut line_start = 0usize;
    let mut skip_first = chunk.starts_mid_record;

    for newline in memchr::memchr_iter(b'\n', &chunk.bytes) {
        let line = &chunk.bytes[line_start..newline];
        let consumed = (newline + 1 - line_start) as u64;
        line_start = newline + 1;

        if skip_first {
            skip_first = false;
            outcome.end_offset += consumed;
            continue;
        }

        if line.iter().all(u8::is_ascii_whitespace) {
            outcome.end_offset += consumed;
            continue;
        }

        if outcome.lines_processed >= max_lines {
            outcome.hit_line_cap = true;
            break;
        }

        on_line(line);
        outcome.lines_processed += 1;
        outcome.end_offset += consumed;
    }

    outcome
}
