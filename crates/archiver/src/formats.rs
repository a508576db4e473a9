//! File-name level knowledge about archive formats.

use crate::error::ArchiverError;
use std::io;
use std::path::{Path, PathBuf};

/// Extensions the archiver is expected to open, lowercase without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "7z", "apfs", "img", "apm", "ar", "a", "deb", "udeb", "lib", "arj", "b64", "obj", "cab",
    "chm", "chi", "chq", "chw", "msi", "msp", "doc", "xls", "ppt", "cpio", "cramfs", "dmg",
    "elf", "ext", "ext2", "ext3", "ext4", "fat", "flv", "gpt", "mbr", "hfs", "hfsx", "hxs",
    "hxi", "hxr", "hxq", "hxw", "lit", "ihex", "iso", "lpimg", "lzh", "lha", "macho", "mslz",
    "mub", "ntfs", "nsis", "exe", "dll", "sys", "pmd", "qcow", "qcow2", "qcow2c", "rar", "r00",
    "rpm", "swf", "simg", "001", "squashfs", "te", "scap", "uefif", "udf", "vdi", "vhd", "vhdx",
    "avhdx", "vmdk", "xar", "pkg", "xip", "z", "taz", "zip", "bz2", "bzip2", "tbz2", "tbz", "gz",
    "gzip", "tgz", "tpz", "apk", "lzma", "lzma86", "tar", "ova", "wim", "swm", "esd", "ppkg",
    "xz", "txz",
];

/// Formats whose entries can be added, deleted or renamed in place.
pub const MODIFIABLE_EXTENSIONS: &[&str] = &["7z", "zip"];

/// Number of `name (n)` candidates tried before giving up.
const MAX_RENAME_ATTEMPTS: u32 = 1000;

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether `path` has an extension the archiver can open.
pub fn is_supported_archive(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether entries of `path` can be modified in place.
pub fn supports_modification(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| MODIFIABLE_EXTENSIONS.contains(&ext.as_str()))
}

/// First path of the form `stem (n).ext` that does not exist yet.
///
/// Returns `path` unchanged when nothing is there.
pub fn unique_output_path(path: &Path) -> Result<PathBuf, ArchiverError> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let parent = path.parent().unwrap_or(Path::new(""));
    let file_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let extension = path.extension().map(|s| s.to_string_lossy().into_owned());

    for i in 1..MAX_RENAME_ATTEMPTS {
        let new_name = match &extension {
            Some(ext) => format!("{} ({}).{}", file_stem, i, ext),
            None => format!("{} ({})", file_stem, i),
        };
        let candidate = parent.join(new_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(ArchiverError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name next to {}", path.display()),
    )))
}

/// Human-readable size with two decimals, e.g. `1.50 KiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KiB", "MiB", "GiB", "TiB"];

    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} TiB", size * 1024.0)
}

/// The interesting part of `t` output, starting at the scan summary.
pub fn test_report(output: &str) -> &str {
    const START: &str = "Scanning the drive for archives:";
    match output.find(START) {
        Some(index) => &output[index..],
        None => output,
    }
}
