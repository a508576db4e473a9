//! Archive listing via the archiver's `l` command.
//!
//! The table printed by `l` is fixed-width. Column positions are taken from
//! the first dashed separator line rather than hard-coded, so wider size
//! columns still line up.

use crate::command;
use crate::config::ArchiverConfig;
use crate::error::ArchiverError;
use crate::types::{ArchiveEntry, ArchiveListing};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

const SEPARATOR: &str = "-----------";

/// Byte ranges of each column, derived from a separator line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    date_end: usize,
    attr: (usize, usize),
    size: (usize, usize),
    compressed: (usize, usize),
    name_start: usize,
}

impl Columns {
    /// Each dashed run ends at the next space; the name column follows two spaces.
    fn from_separator(line: &str) -> Option<Self> {
        let date_end = line.find(' ')?;
        let attr = run_after(line, date_end)?;
        let size = run_after(line, attr.1)?;
        let compressed = run_after(line, size.1)?;
        Some(Self {
            date_end,
            attr,
            size,
            compressed,
            name_start: compressed.1 + 2,
        })
    }

    fn entry(&self, line: &str) -> Option<ArchiveEntry> {
        let path = line.get(self.name_start..).unwrap_or("").trim();
        if path.is_empty() {
            return None;
        }

        let attributes = cell(line, self.attr).to_string();
        let is_directory = attributes.contains('D');
        let (size, compressed_size) = if is_directory {
            (None, None)
        } else {
            (
                cell(line, self.size).parse().ok(),
                cell(line, self.compressed).parse().ok(),
            )
        };

        Some(ArchiveEntry {
            path: path.to_string(),
            is_directory,
            size,
            compressed_size,
            modified: cell(line, (0, self.date_end)).to_string(),
            attributes,
        })
    }
}

/// Range of the dashed run starting one past `end_of_previous`.
fn run_after(line: &str, end_of_previous: usize) -> Option<(usize, usize)> {
    let start = end_of_previous + 1;
    let rest = line.get(start..)?;
    let len = rest.find(' ')?;
    Some((start, start + len))
}

fn cell(line: &str, (start, end): (usize, usize)) -> &str {
    let end = end.min(line.len());
    line.get(start..end).unwrap_or("").trim()
}

/// Parse the output of `7z l` into entries.
///
/// Rows sit between the first two separator lines. A missing closing
/// separator takes every remaining line as a row.
///
/// # Errors
///
/// Returns [`ArchiverError::ListingFormat`] when no separator line is present.
pub fn parse_listing(output: &str) -> Result<ArchiveListing, ArchiverError> {
    let lines: Vec<&str> = output.lines().map(|l| l.trim_end_matches('\r')).collect();

    let start = lines
        .iter()
        .position(|l| l.contains(SEPARATOR))
        .ok_or_else(|| ArchiverError::ListingFormat("no table separator found".into()))?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.contains(SEPARATOR))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    let columns = Columns::from_separator(lines[start]).ok_or_else(|| {
        ArchiverError::ListingFormat(format!("malformed separator line: {}", lines[start]))
    })?;

    let entries = lines[start + 1..end]
        .iter()
        .filter_map(|line| columns.entry(line))
        .collect();

    Ok(ArchiveListing { entries })
}

/// Run `l` on `archive` and parse the result.
///
/// The child gets no input, so an encrypted listing without `password` fails
/// instead of blocking on a prompt.
///
/// # Errors
///
/// Returns an error if the archiver cannot be launched, writes to its error
/// channel, exits unsuccessfully, or prints something that is not a listing.
pub async fn list_archive(
    config: &ArchiverConfig,
    archive: &Path,
    password: Option<&str>,
) -> Result<ArchiveListing, ArchiverError> {
    let args = command::list_args(archive, password);
    debug!(
        binary = %config.binary.display(),
        args = %command::redacted(&args),
        "listing archive"
    );

    let output = Command::new(&config.binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ArchiverError::Spawn {
            binary: config.binary.clone(),
            source,
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        warn!(archive = %archive.display(), error = %stderr, "listing failed");
        return Err(ArchiverError::ToolFailure(stderr.to_string()));
    }
    if !output.status.success() {
        return Err(ArchiverError::ToolFailure(format!(
            "archiver exited with {}",
            output.status
        )));
    }

    let listing = parse_listing(&String::from_utf8_lossy(&output.stdout))?;
    debug!(archive = %archive.display(), entries = listing.entries.len(), "listing parsed");
    Ok(listing)
}
