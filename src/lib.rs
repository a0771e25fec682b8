//! Supervision of game-server instances ("paks"): metadata, save slots,
//! extension sync, backups and the runtime providers that host them.
//!
//! The crate logs through the `log` facade and installs no logger itself.

mod archive;
pub mod config;
mod error;
pub mod extension;
pub mod pak;
pub mod paths;
pub mod provider;
pub mod supervisor;
pub mod validation;

pub use config::{ProviderKind, Settings};
pub use error::{AppError, ErrorCategory, ErrorKind, Result};
pub use extension::ExtensionCache;
pub use pak::{CreatePak, Extension, PakMetadata, PakStore, ServerType};
pub use paths::DataLayout;
pub use provider::{Provider, StopOutcome};
pub use supervisor::{runtime_name, StartOverrides, Supervisor};
