use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read as _};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use walkdir::WalkDir;

use super::path::{parse_entry_rel_path, resolve_within_dir};
use crate::error::{AppError, Result};

type TarGzBuilder = tar::Builder<GzEncoder<fs::File>>;

fn open_archive(archive_path: &Path) -> Result<tar::Archive<GzDecoder<fs::File>>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::io(format!("failed to open archive {archive_path:?}: {e}")))?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

fn dir_header(archive_path: &str) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header
        .set_path(archive_path)
        .map_err(|error| AppError::io(error.to_string()))?;
    header.set_size(0);
    header.set_mode(0o755);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_entry_type(tar::EntryType::Directory);
    header.set_cksum();
    Ok(header)
}

/// Append `dir` recursively under `prefix`, including the (possibly empty) directory itself.
///
/// Symlinks are skipped; level data never needs them.
pub(crate) fn append_dir_to_tar<W: io::Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    prefix: &str,
) -> Result<()> {
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(dir)
            .map_err(|error| AppError::io(error.to_string()))?;
        let archive_path = if relative.as_os_str().is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}/{}", relative.to_string_lossy().replace('\\', "/"))
        };

        let file_type = entry.file_type();
        if file_type.is_file() {
            builder
                .append_path_with_name(path, &archive_path)
                .map_err(|error| AppError::io(format!("failed to archive {path:?}: {error}")))?;
        } else if file_type.is_dir() {
            let header = dir_header(&archive_path)?;
            builder
                .append(&header, io::empty())
                .map_err(|error| AppError::io(error.to_string()))?;
        } else {
            log::warn!("Not archiving non-regular file {:?}", path);
        }
    }

    Ok(())
}

/// Append an in-memory file at the archive root.
pub(crate) fn append_bytes_to_tar<W: io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_entry_type(tar::EntryType::Regular);
    builder
        .append_data(&mut header, name, bytes)
        .map_err(|error| AppError::io(error.to_string()))
}

/// Create a tar.gz archive at `archive_path` and let the caller append entries.
pub(crate) fn create_tar_gz_archive<F>(archive_path: &Path, fill_entries: F) -> Result<()>
where
    F: FnOnce(&mut TarGzBuilder) -> Result<()>,
{
    let file = fs::File::create(archive_path)
        .map_err(|error| AppError::io(format!("failed to create {archive_path:?}: {error}")))?;
    let encoder = GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    fill_entries(&mut builder)?;

    let encoder = builder
        .into_inner()
        .map_err(|error| AppError::io(error.to_string()))?;
    let file = encoder
        .finish()
        .map_err(|error| AppError::io(error.to_string()))?;
    file.sync_all()
        .map_err(|error| AppError::io(error.to_string()))
}

/// Extract tar.gz entries using a caller-provided destination resolver.
///
/// The resolver receives the sanitized relative entry path; returning `None`
/// skips the entry. Link and device entries are refused.
pub(crate) fn extract_tar_gz_mapped<F>(
    archive_path: &Path,
    dest_dir: &Path,
    mut destination_for: F,
) -> Result<()>
where
    F: FnMut(&Path) -> Option<PathBuf>,
{
    fs::create_dir_all(dest_dir).map_err(|e| AppError::io(e.to_string()))?;
    let mut archive = open_archive(archive_path)?;

    for entry in archive
        .entries()
        .map_err(|error| AppError::io(error.to_string()))?
    {
        let mut entry = entry.map_err(|error| AppError::io(error.to_string()))?;

        let raw_path = entry
            .path()
            .map_err(|error| AppError::io(error.to_string()))?
            .to_string_lossy()
            .into_owned();

        let relative = parse_entry_rel_path(&raw_path).ok_or_else(|| {
            AppError::io(format!("archive contains unsafe entry path: {raw_path:?}"))
        })?;

        let Some(out_path) = destination_for(&relative) else {
            continue;
        };
        let resolved_out_path = resolve_within_dir(dest_dir, &out_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&resolved_out_path).map_err(|e| {
                AppError::io(format!("failed to create directory {resolved_out_path:?}: {e}"))
            })?;
        } else if entry_type.is_file() {
            if let Some(parent) = resolved_out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::io(format!("failed to create directory {parent:?}: {e}"))
                })?;
            }
            entry.unpack(&resolved_out_path).map_err(|e| {
                AppError::io(format!("failed to extract {raw_path:?}: {e}"))
            })?;
        } else {
            return Err(AppError::io(format!(
                "unsupported tar entry type at {raw_path:?}: {entry_type:?}"
            )));
        }
    }

    Ok(())
}

/// Read a small text entry (such as embedded metadata) by its relative path.
pub(crate) fn read_tar_gz_entry(archive_path: &Path, name: &str) -> Result<Option<String>> {
    let mut archive = open_archive(archive_path)?;
    let wanted = Path::new(name);

    for entry in archive
        .entries()
        .map_err(|error| AppError::io(error.to_string()))?
    {
        let mut entry = entry.map_err(|error| AppError::io(error.to_string()))?;
        let raw_path = entry
            .path()
            .map_err(|error| AppError::io(error.to_string()))?
            .to_string_lossy()
            .into_owned();
        if parse_entry_rel_path(&raw_path).as_deref() == Some(wanted) {
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|error| AppError::io(error.to_string()))?;
            return Ok(Some(content));
        }
    }

    Ok(None)
}

/// Distinct first path components of every entry, sorted.
pub(crate) fn top_level_entries(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(archive_path)?;
    let mut names = BTreeSet::new();

    for entry in archive
        .entries()
        .map_err(|error| AppError::io(error.to_string()))?
    {
        let entry = entry.map_err(|error| AppError::io(error.to_string()))?;
        let raw_path = entry
            .path()
            .map_err(|error| AppError::io(error.to_string()))?
            .to_string_lossy()
            .into_owned();
        if let Some(first) = parse_entry_rel_path(&raw_path)
            .and_then(|p| p.iter().next().map(|c| c.to_string_lossy().into_owned()))
        {
            names.insert(first);
        }
    }

    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_round_trip_keeps_empty_dirs_and_skips_mapped_out_entries() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("world/region")).unwrap();
        fs::create_dir_all(src.join("world/empty")).unwrap();
        fs::write(src.join("world/level.dat"), b"lvl").unwrap();

        let archive = dir.path().join("a.tgz");
        create_tar_gz_archive(&archive, |builder| {
            append_bytes_to_tar(builder, "meta.toml", b"k = 1\n")?;
            append_dir_to_tar(builder, &src.join("world"), "world")
        })
        .unwrap();

        assert_eq!(top_level_entries(&archive).unwrap(), ["meta.toml", "world"]);
        assert_eq!(
            read_tar_gz_entry(&archive, "meta.toml").unwrap().as_deref(),
            Some("k = 1\n")
        );

        let out = dir.path().join("out");
        extract_tar_gz_mapped(&archive, &out, |rel| {
            (rel != Path::new("meta.toml")).then(|| out.join(rel))
        })
        .unwrap();
        assert_eq!(fs::read(out.join("world/level.dat")).unwrap(), b"lvl");
        assert!(out.join("world/empty").is_dir());
        assert!(!out.join("meta.toml").exists());
    }
}
