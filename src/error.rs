//! Error types for backup operations

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::types::Timestamp;

/// Main error type for sync and restore operations
#[derive(Debug)]
pub enum BackupError {
	/// Origin directory does not exist (aborts the whole operation)
	OriginMissing { path: PathBuf },

	/// Configuration lists no destination at all
	NoDestinations,

	/// None of the configured destinations exists on disk
	NoBackupFound,

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Operation aborted through the cancellation flag
	Aborted,

	/// I/O error
	Io(io::Error),

	/// Content store error (nested)
	Store(StoreError),

	/// Directory tree error (nested)
	Tree(TreeError),

	/// Configuration persistence error (nested)
	Config(ConfigError),
}

impl fmt::Display for BackupError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BackupError::OriginMissing { path } => {
				write!(f, "Origin directory does not exist: {}", path.display())
			}
			BackupError::NoDestinations => write!(f, "No backup destination configured"),
			BackupError::NoBackupFound => write!(f, "No backup found"),
			BackupError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			BackupError::Aborted => write!(f, "Operation aborted"),
			BackupError::Io(e) => write!(f, "I/O error: {}", e),
			BackupError::Store(e) => write!(f, "Storage error: {}", e),
			BackupError::Tree(e) => write!(f, "Tree error: {}", e),
			BackupError::Config(e) => write!(f, "Config error: {}", e),
		}
	}
}

impl Error for BackupError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			BackupError::Io(e) => Some(e),
			BackupError::Store(e) => Some(e),
			BackupError::Tree(e) => Some(e),
			BackupError::Config(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for BackupError {
	fn from(e: io::Error) -> Self {
		BackupError::Io(e)
	}
}

impl From<StoreError> for BackupError {
	fn from(e: StoreError) -> Self {
		BackupError::Store(e)
	}
}

impl From<TreeError> for BackupError {
	fn from(e: TreeError) -> Self {
		BackupError::Tree(e)
	}
}

impl From<ConfigError> for BackupError {
	fn from(e: ConfigError) -> Self {
		BackupError::Config(e)
	}
}

/// Content store errors
#[derive(Debug)]
pub enum StoreError {
	/// Blob could not be written (version must not be recorded)
	WriteFailed { path: PathBuf, source: io::Error },

	/// Blob or source file could not be read
	ReadFailed { path: PathBuf, source: io::Error },

	/// Source content changed between hashing and storing
	HashMismatch { path: PathBuf, expected: String, actual: String },

	/// String is not a valid lowercase SHA-256 hex digest
	InvalidHash { value: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::WriteFailed { path, source } => {
				write!(f, "Failed to write blob {}: {}", path.display(), source)
			}
			StoreError::ReadFailed { path, source } => {
				write!(f, "Failed to read {}: {}", path.display(), source)
			}
			StoreError::HashMismatch { path, expected, actual } => write!(
				f,
				"Content of {} changed while storing: expected {}, got {}",
				path.display(),
				expected,
				actual
			),
			StoreError::InvalidHash { value } => write!(f, "Invalid content hash: {:?}", value),
		}
	}
}

impl Error for StoreError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			StoreError::WriteFailed { source, .. } | StoreError::ReadFailed { source, .. } => {
				Some(source)
			}
			StoreError::HashMismatch { .. } | StoreError::InvalidHash { .. } => None,
		}
	}
}

impl StoreError {
	/// True when the source file disappeared between listing and reading
	pub fn is_vanished(&self) -> bool {
		matches!(self, StoreError::ReadFailed { source, .. } if source.kind() == io::ErrorKind::NotFound)
	}

	/// True for failures caused by the origin changing under us; the next run reconciles them
	pub fn is_transient(&self) -> bool {
		self.is_vanished() || matches!(self, StoreError::HashMismatch { .. })
	}
}

/// Directory tree errors
#[derive(Debug)]
pub enum TreeError {
	/// Soft delete requested on a node that is already deleted
	AlreadyDeleted { path: String, deleted_at: Timestamp },

	/// Path does not resolve to a node of the expected kind
	NotFound { path: String },

	/// Failed to load a persisted document
	LoadFailed { path: PathBuf, source: io::Error },

	/// Failed to save a persisted document
	SaveFailed { path: PathBuf, source: io::Error },

	/// Persisted document is not valid
	Corrupted { path: PathBuf, message: String },
}

impl fmt::Display for TreeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TreeError::AlreadyDeleted { path, deleted_at } => {
				write!(f, "Cannot delete an already deleted file: {} (deleted {})", path, deleted_at)
			}
			TreeError::NotFound { path } => write!(f, "No such node: {}", path),
			TreeError::LoadFailed { path, source } => {
				write!(f, "Failed to load {}: {}", path.display(), source)
			}
			TreeError::SaveFailed { path, source } => {
				write!(f, "Failed to save {}: {}", path.display(), source)
			}
			TreeError::Corrupted { path, message } => {
				write!(f, "Corrupted document {}: {}", path.display(), message)
			}
		}
	}
}

impl Error for TreeError {}

/// Configuration persistence errors
#[derive(Debug)]
pub enum ConfigError {
	/// Config file could not be read
	LoadFailed { path: PathBuf, source: io::Error },

	/// Config file could not be written
	SaveFailed { path: PathBuf, source: io::Error },

	/// Config file is not a valid document
	Parse { path: PathBuf, message: String },

	/// Config content violates an invariant
	Invalid { message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::LoadFailed { path, source } => {
				write!(f, "Failed to load config {}: {}", path.display(), source)
			}
			ConfigError::SaveFailed { path, source } => {
				write!(f, "Failed to save config {}: {}", path.display(), source)
			}
			ConfigError::Parse { path, message } => {
				write!(f, "Failed to parse config {}: {}", path.display(), message)
			}
			ConfigError::Invalid { message } => write!(f, "Invalid config: {}", message),
		}
	}
}

impl Error for ConfigError {}


// vim: ts=4
