//! Application error types.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Supervisor error carrying a kind and the context needed to render it.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instance metadata missing
    PakNotFound,
    /// Slot directory missing
    SlotNotFound,
    /// Extension not declared on the instance
    ExtensionNotFound,
    /// Backup archive missing
    BackupNotFound,
    /// Instance id already taken
    PakExists,
    /// Runtime unit already running
    AlreadyRunning,
    /// Backup archive name already taken
    BackupExists,
    /// Missing or malformed caller input
    InvalidInput,
    /// Declared extension artifact absent from the cache
    ExtensionMissing,
    /// Runtime provider call failed
    Backend,
    /// No level directories to archive
    NoLevelData,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// General error
    Other,
}

/// Coarse grouping of error kinds, for callers that only care about the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    InvalidInput,
    DependencyMissing,
    BackendUnavailable,
    DataIntegrity,
    Io,
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::PakNotFound => 1001,
            Self::SlotNotFound => 1002,
            Self::ExtensionNotFound => 1003,
            Self::BackupNotFound => 1004,
            Self::PakExists => 1101,
            Self::AlreadyRunning => 1102,
            Self::BackupExists => 1103,
            Self::InvalidInput => 2001,
            Self::Config => 2002,
            Self::Io => 2003,
            Self::ExtensionMissing => 3001,
            Self::Backend => 3002,
            Self::NoLevelData => 4001,
            Self::Other => 9999,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PakNotFound
            | Self::SlotNotFound
            | Self::ExtensionNotFound
            | Self::BackupNotFound => ErrorCategory::NotFound,
            Self::PakExists | Self::AlreadyRunning | Self::BackupExists => ErrorCategory::Conflict,
            Self::InvalidInput | Self::Config => ErrorCategory::InvalidInput,
            Self::ExtensionMissing => ErrorCategory::DependencyMissing,
            Self::Backend => ErrorCategory::BackendUnavailable,
            Self::NoLevelData => ErrorCategory::DataIntegrity,
            Self::Io => ErrorCategory::Io,
            Self::Other => ErrorCategory::Other,
        }
    }
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn pak_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::PakNotFound,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn slot_not_found(id: &str, slot: &str) -> Self {
        Self::new(
            ErrorKind::SlotNotFound,
            HashMap::from([
                ("id".to_string(), id.to_string()),
                ("slot".to_string(), slot.to_string()),
            ]),
        )
    }

    pub fn extension_not_found(id: &str, store: &str, project_id: &str) -> Self {
        Self::new(
            ErrorKind::ExtensionNotFound,
            HashMap::from([
                ("id".to_string(), id.to_string()),
                ("store".to_string(), store.to_string()),
                ("project_id".to_string(), project_id.to_string()),
            ]),
        )
    }

    pub fn backup_not_found(path: &Path) -> Self {
        Self::new(
            ErrorKind::BackupNotFound,
            HashMap::from([("path".to_string(), path_string(path))]),
        )
    }

    pub fn pak_exists(id: &str) -> Self {
        Self::new(
            ErrorKind::PakExists,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn already_running(id: &str) -> Self {
        Self::new(
            ErrorKind::AlreadyRunning,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn backup_exists(path: &Path) -> Self {
        Self::new(
            ErrorKind::BackupExists,
            HashMap::from([("path".to_string(), path_string(path))]),
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::InvalidInput, message)
    }

    pub fn extension_missing(expected: &Path) -> Self {
        Self::new(
            ErrorKind::ExtensionMissing,
            HashMap::from([("expected".to_string(), path_string(expected))]),
        )
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Backend, message)
    }

    pub fn no_level_data(id: &str, slot: &str) -> Self {
        Self::new(
            ErrorKind::NoLevelData,
            HashMap::from([
                ("id".to_string(), id.to_string()),
                ("slot".to_string(), slot.to_string()),
            ]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Look up a context value such as `id`, `slot` or `expected`.
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_payload_sorted() {
        let err = AppError::slot_not_found("alpha", "snap1");
        assert_eq!(err.to_string(), "SlotNotFound: id=alpha, slot=snap1");
        assert_eq!(err.detail("slot"), Some("snap1"));
    }

    #[test]
    fn kinds_map_to_categories() {
        assert_eq!(
            AppError::already_running("a").category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            AppError::extension_missing(Path::new("/x")).category(),
            ErrorCategory::DependencyMissing
        );
        assert_eq!(
            AppError::no_level_data("a", "world").category(),
            ErrorCategory::DataIntegrity
        );
        assert_eq!(AppError::backend("down").category(), ErrorCategory::BackendUnavailable);
    }

    #[test]
    fn serializes_code_and_payload() {
        let json = serde_json::to_value(AppError::pak_exists("alpha")).unwrap();
        assert_eq!(json["code"], 1101);
        assert_eq!(json["payload"]["id"], "alpha");
    }
}
