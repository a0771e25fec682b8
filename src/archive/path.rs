use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Convert an archive entry path to a relative PathBuf, rejecting empty,
/// absolute or traversal paths.
pub(crate) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_windows_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        return None;
    }

    Some(relative)
}

/// Canonicalize the longest existing prefix of a path, appending any remaining components.
fn canonicalize_longest_prefix(path: &Path) -> Result<PathBuf> {
    let mut current = path.to_path_buf();
    let mut suffix_parts: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match current.canonicalize() {
            Ok(mut canonical) => {
                for part in suffix_parts.into_iter().rev() {
                    canonical.push(part);
                }
                return Ok(canonical);
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                let name = current.file_name().map(ToOwned::to_owned).ok_or_else(|| {
                    AppError::io(format!(
                        "failed to canonicalize path {path:?}: reached filesystem root"
                    ))
                })?;
                suffix_parts.push(name);
                current.pop();
            }
            Err(error) => {
                return Err(AppError::io(format!(
                    "failed to canonicalize path {current:?}: {error}"
                )));
            }
        }
    }
}

/// Verify that `path` resolves to a location within `base_dir`, returning the canonical path.
pub(super) fn resolve_within_dir(base_dir: &Path, path: &Path) -> Result<PathBuf> {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(AppError::io(format!("archive path {path:?} is not normalized")));
    }

    let canonical_base = base_dir
        .canonicalize()
        .map_err(|e| AppError::io(format!("failed to canonicalize base dir: {e}")))?;
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        canonical_base.join(path)
    };
    let canonical_candidate = canonicalize_longest_prefix(&candidate)?;

    if !canonical_candidate.starts_with(&canonical_base) {
        return Err(AppError::io(
            "archive contains path escaping destination, refusing to extract",
        ));
    }

    Ok(canonical_candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_paths_reject_traversal_and_absolute() {
        assert_eq!(
            parse_entry_rel_path("./world/level.dat"),
            Some(PathBuf::from("world/level.dat"))
        );
        assert_eq!(
            parse_entry_rel_path("world\\region\\r.0.0.mca"),
            Some(PathBuf::from("world/region/r.0.0.mca"))
        );
        assert_eq!(parse_entry_rel_path("../etc/passwd"), None);
        assert_eq!(parse_entry_rel_path("/etc/passwd"), None);
        assert_eq!(parse_entry_rel_path("C:/x"), None);
        assert_eq!(parse_entry_rel_path("./"), None);
    }

    #[test]
    fn resolve_rejects_escape_through_symlinked_dir() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        std::fs::create_dir_all(&base).unwrap();
        assert!(resolve_within_dir(&base, Path::new("world/new/file")).is_ok());

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(dir.path(), base.join("link")).unwrap();
            assert!(resolve_within_dir(&base, Path::new("link/escape")).is_err());
        }
    }
}
