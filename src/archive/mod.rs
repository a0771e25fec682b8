//! tar.gz helpers for backup archives.

mod path;
mod tar_gz;

pub(crate) use path::parse_entry_rel_path;
pub(crate) use tar_gz::{
    append_bytes_to_tar, append_dir_to_tar, create_tar_gz_archive, extract_tar_gz_mapped,
    read_tar_gz_entry, top_level_entries,
};
