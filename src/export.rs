//! Filtering of the device export before it is written to the repository.
//!
//! RouterOS prints a banner with the export time and software build at the
//! top of every export. Those lines change on each run even when nothing
//! else did, so they are dropped; otherwise every run would produce a commit.

use regex::bytes::RegexSet;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Set of line-exclusion patterns.
#[derive(Debug, Clone)]
pub struct LineFilter {
    set: RegexSet,
}

impl LineFilter {
    /// `# software id = XXXX-XXXX` and `# <date> by RouterOS 7.x`.
    pub const DEFAULT_PATTERNS: [&'static str; 2] = [r"^# software id", r"by RouterOS"];

    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let set = RegexSet::new(patterns.iter().map(|p| p.as_ref()))
            .map_err(|e| Error::ConfigInvalid(format!("export.exclude: {}", e)))?;
        Ok(Self { set })
    }

    /// Returns `true` if `line` (with or without its terminator) must be dropped.
    pub fn is_excluded(&self, line: &[u8]) -> bool {
        self.set.is_match(line)
    }
}

impl Default for LineFilter {
    fn default() -> Self {
        Self {
            set: RegexSet::new(Self::DEFAULT_PATTERNS).expect("default patterns compile"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub bytes: u64,
    pub kept: usize,
    pub dropped: usize,
}

/// Copy `source` into `sink` line by line, skipping excluded lines.
///
/// Lines are written back byte-for-byte including their terminator, so input
/// without excluded lines comes out identical. `dest` is only used in error
/// messages.
///
/// # Errors
/// - `ExportRead` if reading the source fails (including a non-zero remote exit).
/// - `Write` if writing or flushing the sink fails.
pub fn copy_filtered<R: Read, W: Write>(
    source: R,
    sink: W,
    filter: &LineFilter,
    dest: &Path,
) -> Result<CopyStats> {
    let write_err = |source| Error::Write {
        path: dest.to_path_buf(),
        source,
    };

    let mut reader = BufReader::new(source);
    let mut writer = BufWriter::new(sink);
    let mut stats = CopyStats::default();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).map_err(Error::ExportRead)?;
        if n == 0 {
            break;
        }
        if filter.is_excluded(&line) {
            stats.dropped += 1;
            continue;
        }
        writer.write_all(&line).map_err(write_err)?;
        stats.bytes += n as u64;
        stats.kept += 1;
    }
    writer.flush().map_err(write_err)?;
    Ok(stats)
}
