//! Instance ("pak") metadata store.
//!
//! Each instance lives under `paks/{id}/`: `pak.json` holds the record, `data/`
//! is mounted into the runtime and holds one directory per save slot.

mod extensions;
mod slots;
mod store;
mod types;

pub use store::{CreatePak, PakStore};
pub use types::{Engine, Extension, PakMetadata, Saves, ServerType, SlotEntry};

pub(crate) use slots::{copy_dir_all, level_dirs, validate_level_slot};

/// Slot used when nothing else has been activated.
pub const DEFAULT_SLOT: &str = "world";
