//! Command-line construction for the archiver executable.

use crate::error::ArchiverError;
use crate::types::{OperationKind, OperationRequest};
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Forces progress output onto standard output.
pub const PROGRESS_SWITCH: &str = "-bsp1";

/// Build the argument list for every step of `request`.
///
/// Most operations are a single invocation. Adding into a subdirectory is
/// followed by one `rn` per added file that moves it under the subdirectory.
pub fn plan(request: &OperationRequest) -> Result<Vec<Vec<OsString>>, ArchiverError> {
    let mut steps = vec![build_args(request)?];
    steps.extend(subdir_renames(request));
    Ok(steps)
}

/// Build the argument list for the primary invocation of `request`.
pub fn build_args(request: &OperationRequest) -> Result<Vec<OsString>, ArchiverError> {
    let mut args: Vec<OsString> = Vec::new();

    match request.kind {
        OperationKind::Extract | OperationKind::ExtractOne => {
            let destination = request.destination.as_deref().ok_or_else(|| {
                ArchiverError::InvalidRequest("extraction needs a destination".into())
            })?;
            if request.kind == OperationKind::ExtractOne && request.items.is_empty() {
                return Err(ArchiverError::InvalidRequest(
                    "extracting a single entry needs an item".into(),
                ));
            }
            let verb = if request.kind == OperationKind::Extract { "x" } else { "e" };
            args.push(verb.into());
            args.push(request.archive.clone().into());
            args.extend(request.items.iter().map(OsString::from));
            args.push(prefixed("-o", destination.as_os_str()));
            args.push(PROGRESS_SWITCH.into());
            push_password(&mut args, request);
        }
        OperationKind::Archive => {
            if request.items.is_empty() {
                return Err(ArchiverError::InvalidRequest(
                    "nothing to archive".into(),
                ));
            }
            let archive_type = request.archive_type.unwrap_or_default();
            args.push("a".into());
            args.push(format!("-t{}", archive_type.as_flag()).into());
            args.push(request.archive.clone().into());
            args.extend(request.items.iter().map(OsString::from));
            args.push(PROGRESS_SWITCH.into());
            push_password(&mut args, request);
            if let Some(level) = request.compression {
                args.push(format!("-mx={}", level.get()).into());
            }
        }
        OperationKind::Add => {
            if request.items.is_empty() {
                return Err(ArchiverError::InvalidRequest("no files to add".into()));
            }
            args.push("a".into());
            args.push(request.archive.clone().into());
            args.extend(request.items.iter().map(OsString::from));
            args.push(PROGRESS_SWITCH.into());
        }
        OperationKind::Delete => {
            let item = single_item(request, "delete")?;
            args.push("d".into());
            args.push(request.archive.clone().into());
            args.push(item.into());
            args.push(PROGRESS_SWITCH.into());
        }
        OperationKind::Rename => {
            let old = single_item(request, "rename")?;
            let new = request
                .new_name
                .as_deref()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ArchiverError::InvalidRequest("rename needs a new name".into()))?;
            args.push("rn".into());
            args.push(request.archive.clone().into());
            args.push(old.into());
            args.push(new.into());
            args.push(PROGRESS_SWITCH.into());
        }
        OperationKind::Test => {
            args.push("t".into());
            args.push(request.archive.clone().into());
            args.push(PROGRESS_SWITCH.into());
            push_password(&mut args, request);
        }
    }

    Ok(args)
}

/// Arguments for a plain `l` listing.
pub fn list_args(archive: &Path, password: Option<&str>) -> Vec<OsString> {
    let mut args = vec![OsString::from("l"), archive.as_os_str().to_os_string()];
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        args.push(format!("-p{password}").into());
    }
    args
}

/// `rn` steps that move freshly added files under the request's subdirectory.
fn subdir_renames(request: &OperationRequest) -> Vec<Vec<OsString>> {
    let Some(subdir) = request.subdir.as_deref() else {
        return Vec::new();
    };
    if request.kind != OperationKind::Add {
        return Vec::new();
    }
    let subdir = subdir.trim_end_matches('/');

    request
        .items
        .iter()
        .filter_map(|file| Path::new(file).file_name())
        .map(|name| {
            let name = name.to_string_lossy();
            vec![
                OsString::from("rn"),
                request.archive.clone().into(),
                OsString::from(name.as_ref()),
                OsString::from(format!("{subdir}/{name}")),
                OsString::from(PROGRESS_SWITCH),
            ]
        })
        .collect()
}

/// Render arguments for logging with any password hidden.
pub fn redacted(args: &[OsString]) -> String {
    args.iter()
        .map(|a| {
            let a = a.to_string_lossy();
            if a.starts_with("-p") && a.len() > 2 {
                "-p***".to_string()
            } else {
                a.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_password(args: &mut Vec<OsString>, request: &OperationRequest) {
    if let Some(password) = request.password.as_deref().filter(|p| !p.is_empty()) {
        args.push(format!("-p{password}").into());
    }
}

fn single_item<'a>(request: &'a OperationRequest, verb: &str) -> Result<&'a str, ArchiverError> {
    match request.items.as_slice() {
        [item] if !item.is_empty() => Ok(item.as_str()),
        _ => Err(ArchiverError::InvalidRequest(format!(
            "{verb} needs exactly one entry"
        ))),
    }
}

fn prefixed(prefix: &str, value: &OsStr) -> OsString {
    let mut arg = OsString::from(prefix);
    arg.push(value);
    arg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArchiveType, CompressionLevel};

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_extract_args() {
        let request = OperationRequest::extract("/tmp/a.7z", vec!["dir/x.txt".into()], "/tmp/out");
        assert_eq!(
            strings(build_args(&request).unwrap()),
            vec!["x", "/tmp/a.7z", "dir/x.txt", "-o/tmp/out", "-bsp1"]
        );
    }

    #[test]
    fn test_extract_one_uses_flat_verb_and_password() {
        let request = OperationRequest::extract_one("a.zip", vec!["x.txt".into()], "tmp")
            .with_password(Some("secret".into()));
        assert_eq!(
            strings(build_args(&request).unwrap()),
            vec!["e", "a.zip", "x.txt", "-otmp", "-bsp1", "-psecret"]
        );
    }

    #[test]
    fn test_extract_one_requires_item() {
        let request = OperationRequest::extract_one("a.zip", vec![], "tmp");
        assert!(matches!(
            build_args(&request),
            Err(ArchiverError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_archive_args() {
        let request = OperationRequest::archive(
            vec!["a.txt".into(), "b".into()],
            "out.zip",
            ArchiveType::Zip,
        )
        .with_password(Some("pw".into()))
        .with_compression(CompressionLevel::new(7).unwrap());
        assert_eq!(
            strings(build_args(&request).unwrap()),
            vec!["a", "-tzip", "out.zip", "a.txt", "b", "-bsp1", "-ppw", "-mx=7"]
        );
    }

    #[test]
    fn test_empty_password_not_passed() {
        let mut request = OperationRequest::test("a.7z");
        request.password = Some(String::new());
        assert_eq!(
            strings(build_args(&request).unwrap()),
            vec!["t", "a.7z", "-bsp1"]
        );
    }

    #[test]
    fn test_add_into_subdir_plans_renames() {
        let request = OperationRequest::add(
            "a.7z",
            vec!["/home/u/one.txt".into(), "two.txt".into()],
            Some("docs/".into()),
        );
        let steps: Vec<Vec<String>> = plan(&request).unwrap().into_iter().map(strings).collect();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], vec!["a", "a.7z", "/home/u/one.txt", "two.txt", "-bsp1"]);
        assert_eq!(steps[1], vec!["rn", "a.7z", "one.txt", "docs/one.txt", "-bsp1"]);
        assert_eq!(steps[2], vec!["rn", "a.7z", "two.txt", "docs/two.txt", "-bsp1"]);
    }

    #[test]
    fn test_add_without_subdir_is_single_step() {
        let request = OperationRequest::add("a.7z", vec!["x".into()], Some("/".into()));
        assert_eq!(plan(&request).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_and_rename_args() {
        let delete = OperationRequest::delete("a.7z", "dir/x.txt");
        assert_eq!(
            strings(build_args(&delete).unwrap()),
            vec!["d", "a.7z", "dir/x.txt", "-bsp1"]
        );

        let rename = OperationRequest::rename("a.7z", "old.txt", "dir/new.txt");
        assert_eq!(
            strings(build_args(&rename).unwrap()),
            vec!["rn", "a.7z", "old.txt", "dir/new.txt", "-bsp1"]
        );

        let bad = OperationRequest::rename("a.7z", "old.txt", "");
        assert!(build_args(&bad).is_err());
    }

    #[test]
    fn test_redacted_hides_password() {
        let request = OperationRequest::test("a.7z").with_password(Some("hunter2".into()));
        let printed = redacted(&build_args(&request).unwrap());
        assert_eq!(printed, "t a.7z -bsp1 -p***");
    }
}
