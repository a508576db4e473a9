//! Type definitions for archiver operations.

use crate::error::ArchiverError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The kind of work a single archiver invocation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    /// Extract with full paths (`x`)
    Extract,
    /// Extract without paths (`e`), used to open a single entry
    ExtractOne,
    /// Create a new archive from source files (`a -t<type>`)
    Archive,
    /// Add files to an existing archive (`a`), optionally into a subdirectory
    Add,
    /// Delete an entry (`d`)
    Delete,
    /// Rename an entry (`rn`)
    Rename,
    /// Test archive integrity (`t`)
    Test,
}

impl OperationKind {
    /// Label shown in front of progress messages.
    pub fn progress_label(&self) -> &'static str {
        match self {
            OperationKind::Extract | OperationKind::ExtractOne => "Extracting...",
            OperationKind::Archive => "Archiving...",
            OperationKind::Add => "Adding files...",
            OperationKind::Delete => "Deleting...",
            OperationKind::Rename => "Renaming...",
            OperationKind::Test => "Testing...",
        }
    }
}

/// Archive container formats that can be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    #[default]
    #[serde(rename = "7z")]
    SevenZ,
    Zip,
    Tar,
    Gzip,
    Bzip2,
    Xz,
    Wim,
}

impl ArchiveType {
    /// Value passed to the `-t` switch.
    pub fn as_flag(&self) -> &'static str {
        match self {
            ArchiveType::SevenZ => "7z",
            ArchiveType::Zip => "zip",
            ArchiveType::Tar => "tar",
            ArchiveType::Gzip => "gzip",
            ArchiveType::Bzip2 => "bzip2",
            ArchiveType::Xz => "xz",
            ArchiveType::Wim => "wim",
        }
    }

    /// Conventional file extension for archives of this type.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveType::SevenZ => "7z",
            ArchiveType::Zip => "zip",
            ArchiveType::Tar => "tar",
            ArchiveType::Gzip => "gz",
            ArchiveType::Bzip2 => "bz2",
            ArchiveType::Xz => "xz",
            ArchiveType::Wim => "wim",
        }
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_flag())
    }
}

impl FromStr for ArchiveType {
    type Err = ArchiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "7z" => Ok(ArchiveType::SevenZ),
            "zip" => Ok(ArchiveType::Zip),
            "tar" => Ok(ArchiveType::Tar),
            "gzip" | "gz" => Ok(ArchiveType::Gzip),
            "bzip2" | "bz2" => Ok(ArchiveType::Bzip2),
            "xz" => Ok(ArchiveType::Xz),
            "wim" => Ok(ArchiveType::Wim),
            other => Err(ArchiverError::InvalidRequest(format!(
                "unknown archive type '{other}'"
            ))),
        }
    }
}

/// Compression level passed as `-mx=<level>`, 0 (store) to 9 (ultra).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub const STORE: CompressionLevel = CompressionLevel(0);
    pub const NORMAL: CompressionLevel = CompressionLevel(5);
    pub const ULTRA: CompressionLevel = CompressionLevel(9);

    pub fn new(level: u8) -> Result<Self, ArchiverError> {
        if level > 9 {
            return Err(ArchiverError::InvalidRequest(format!(
                "compression level {level} is out of range 0-9"
            )));
        }
        Ok(CompressionLevel(level))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel::NORMAL
    }
}

impl TryFrom<u8> for CompressionLevel {
    type Error = ArchiverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        CompressionLevel::new(value)
    }
}

impl From<CompressionLevel> for u8 {
    fn from(level: CompressionLevel) -> Self {
        level.0
    }
}

/// A single archiver operation, immutable once submitted.
///
/// For [`OperationKind::Archive`] the `archive` field is the archive being
/// created and `items` are the source files.
#[derive(Clone)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub archive: PathBuf,
    pub items: Vec<String>,
    pub destination: Option<PathBuf>,
    pub password: Option<String>,
    pub compression: Option<CompressionLevel>,
    pub archive_type: Option<ArchiveType>,
    pub subdir: Option<String>,
    pub new_name: Option<String>,
}

impl OperationRequest {
    fn base(kind: OperationKind, archive: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            archive: archive.into(),
            items: Vec::new(),
            destination: None,
            password: None,
            compression: None,
            archive_type: None,
            subdir: None,
            new_name: None,
        }
    }

    /// Extract `items` (everything when empty) keeping their paths.
    pub fn extract(
        archive: impl Into<PathBuf>,
        items: Vec<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            items,
            destination: Some(destination.into()),
            ..Self::base(OperationKind::Extract, archive)
        }
    }

    /// Extract `items` flat into `destination`.
    pub fn extract_one(
        archive: impl Into<PathBuf>,
        items: Vec<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            items,
            destination: Some(destination.into()),
            ..Self::base(OperationKind::ExtractOne, archive)
        }
    }

    /// Create `destination` from `sources`.
    pub fn archive(
        sources: Vec<String>,
        destination: impl Into<PathBuf>,
        archive_type: ArchiveType,
    ) -> Self {
        Self {
            items: sources,
            archive_type: Some(archive_type),
            ..Self::base(OperationKind::Archive, destination)
        }
    }

    /// Add `files` to an existing archive, optionally under `subdir`.
    pub fn add(archive: impl Into<PathBuf>, files: Vec<String>, subdir: Option<String>) -> Self {
        Self {
            items: files,
            subdir: subdir.filter(|s| !s.trim_matches('/').is_empty()),
            ..Self::base(OperationKind::Add, archive)
        }
    }

    pub fn delete(archive: impl Into<PathBuf>, item: impl Into<String>) -> Self {
        Self {
            items: vec![item.into()],
            ..Self::base(OperationKind::Delete, archive)
        }
    }

    pub fn rename(
        archive: impl Into<PathBuf>,
        old_path: impl Into<String>,
        new_path: impl Into<String>,
    ) -> Self {
        Self {
            items: vec![old_path.into()],
            new_name: Some(new_path.into()),
            ..Self::base(OperationKind::Rename, archive)
        }
    }

    pub fn test(archive: impl Into<PathBuf>) -> Self {
        Self::base(OperationKind::Test, archive)
    }

    /// Supply a password up front. Empty passwords are ignored.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = Some(level);
        self
    }
}

impl fmt::Debug for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRequest")
            .field("kind", &self.kind)
            .field("archive", &self.archive)
            .field("items", &self.items)
            .field("destination", &self.destination)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("compression", &self.compression)
            .field("archive_type", &self.archive_type)
            .field("subdir", &self.subdir)
            .field("new_name", &self.new_name)
            .finish()
    }
}

/// Answer to an overwrite prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictDecision {
    Yes,
    No,
    Always,
    SkipAll,
    AutoRenameAll,
    Quit,
}

impl ConflictDecision {
    pub const ALL: [ConflictDecision; 6] = [
        ConflictDecision::Yes,
        ConflictDecision::No,
        ConflictDecision::Always,
        ConflictDecision::SkipAll,
        ConflictDecision::AutoRenameAll,
        ConflictDecision::Quit,
    ];

    /// Character the archiver expects on its input for this answer.
    pub fn token(&self) -> char {
        match self {
            ConflictDecision::Yes => 'Y',
            ConflictDecision::No => 'N',
            ConflictDecision::Always => 'A',
            ConflictDecision::SkipAll => 'S',
            ConflictDecision::AutoRenameAll => 'U',
            ConflictDecision::Quit => 'Q',
        }
    }

    /// Parse the same letters the archiver accepts, case-insensitively.
    pub fn from_token(token: char) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.token().eq_ignore_ascii_case(&token))
    }
}

/// An overwrite prompt raised by the archiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPrompt {
    /// Everything printed after the "Would you like to replace" line, prompt included
    pub raw: String,

    /// Description lines of the file already on disk
    pub existing: Vec<String>,

    /// Description lines of the file coming from the archive
    pub incoming: Vec<String>,
}

impl ConflictPrompt {
    /// Split the raw block into its two three-line descriptions.
    ///
    /// Lines 0..3 describe the existing file, line 3 separates, lines 4..7
    /// describe the incoming file.
    pub fn from_raw(raw: String) -> Self {
        let lines: Vec<String> = raw
            .split('\n')
            .map(|l| l.trim_end_matches('\r').trim().to_string())
            .collect();
        let existing = lines.iter().take(3).cloned().collect();
        let incoming = lines.iter().skip(4).take(3).cloned().collect();
        Self {
            raw,
            existing,
            incoming,
        }
    }
}

/// Final state of an operation; exactly one per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum Outcome {
    Finished,
    Aborted,
    Failed(String),
}

/// Events emitted by a running operation, in the order the archiver produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationEvent {
    Progress { percent: u8, message: String },
    Conflict(ConflictPrompt),
    PasswordRequired,
    Message { line: String },
    Terminated(Outcome),
}

/// Individual entry within an archive listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    /// Path of the entry within the archive
    pub path: String,

    /// Whether this entry is a directory
    pub is_directory: bool,

    /// Uncompressed size in bytes (absent for directories)
    pub size: Option<u64>,

    /// Compressed size in bytes (if reported)
    pub compressed_size: Option<u64>,

    /// Modification time as printed by the archiver
    pub modified: String,

    /// Attribute column, e.g. `D....` or `....A`
    pub attributes: String,
}

/// Parsed `l` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveListing {
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveListing {
    pub fn files(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|e| !e.is_directory)
    }

    pub fn total_size(&self) -> u64 {
        self.files().filter_map(|e| e.size).sum()
    }
}
