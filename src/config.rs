//! Backup configuration: one origin, its destinations and exclusion rules
//!
//! The configuration lives next to the data it describes, as
//! `backup_config.json` in the origin directory. It is read with `json5`
//! so hand-edited files may carry comments and trailing commas, and written
//! back as plain pretty-printed JSON.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::fs as afs;

use crate::error::ConfigError;
use crate::logging::*;
use crate::store::STORAGE_DIR;
use crate::util;

/// File name of the configuration document inside the origin
pub const CONFIG_FILE: &str = "backup_config.json";

// ============================================================================
// CONFIGURATION STRUCT
// ============================================================================

/// Origin, destinations and the five exclusion-rule lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
	/// Live directory being backed up
	#[serde(alias = "originInfo", alias = "OriginInfo", alias = "OriginDirectory")]
	pub origin_directory: PathBuf,

	/// Destination roots, in configuration order
	#[serde(
		default,
		alias = "backupInfos",
		alias = "BackupInfos",
		alias = "BackupDirectories"
	)]
	pub backup_directories: Vec<PathBuf>,

	/// Full paths excluded verbatim
	#[serde(default, alias = "IgnoredPaths")]
	pub ignored_paths: Vec<PathBuf>,

	/// File extensions including the leading dot (`.tmp`)
	#[serde(default, alias = "IgnoredFileExtensions")]
	pub ignored_file_extensions: Vec<String>,

	/// Name prefixes excluding both files and directories
	#[serde(default, alias = "IgnoredPrefixes")]
	pub ignored_prefixes: Vec<String>,

	/// Exact directory names
	#[serde(default, alias = "IgnoredFolderNames")]
	pub ignored_folder_names: Vec<String>,

	/// Exact file names
	#[serde(default, alias = "IgnoredFileNames")]
	pub ignored_file_names: Vec<String>,
}

impl BackupConfig {
	/// Bare configuration without any exclusion rule
	pub fn new(origin: impl Into<PathBuf>) -> Self {
		BackupConfig {
			origin_directory: origin.into(),
			backup_directories: Vec::new(),
			ignored_paths: Vec::new(),
			ignored_file_extensions: Vec::new(),
			ignored_prefixes: Vec::new(),
			ignored_folder_names: Vec::new(),
			ignored_file_names: Vec::new(),
		}
	}

	/// Configuration for a fresh backup with the default rule set
	pub fn create(origin: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
		BackupConfig::new(origin)
			.ignore_folders(["System Volume Information", ".git"])
			.ignore_extensions([".blend1", ".deleted", ".old", ".tmp"])
			.ignore_files(["desktop.ini"])
			.ignore_prefixes(["$"])
			.add_backup_location(backup)
	}

	// ========================================================================
	// BUILDER-STYLE MUTATORS
	// ========================================================================

	pub fn ignore_folders<I, S>(mut self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		push_unique(&mut self.ignored_folder_names, names.into_iter().map(Into::into));
		self
	}

	pub fn ignore_paths<I, P>(mut self, paths: I) -> Self
	where
		I: IntoIterator<Item = P>,
		P: Into<PathBuf>,
	{
		push_unique(&mut self.ignored_paths, paths.into_iter().map(Into::into));
		self
	}

	/// Extensions are stored with a leading dot whether or not one was given
	pub fn ignore_extensions<I, S>(mut self, extensions: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let normalized = extensions.into_iter().map(Into::into).map(|ext: String| {
			if ext.starts_with('.') {
				ext
			} else {
				format!(".{}", ext)
			}
		});
		push_unique(&mut self.ignored_file_extensions, normalized);
		self
	}

	pub fn ignore_files<I, S>(mut self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		push_unique(&mut self.ignored_file_names, names.into_iter().map(Into::into));
		self
	}

	pub fn ignore_prefixes<I, S>(mut self, prefixes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		push_unique(&mut self.ignored_prefixes, prefixes.into_iter().map(Into::into));
		self
	}

	/// Append a destination; a path pointing at `_Storage` means its parent
	pub fn add_backup_location(mut self, backup: impl Into<PathBuf>) -> Self {
		let backup = normalize_destination(backup.into());
		push_unique(&mut self.backup_directories, std::iter::once(backup));
		self
	}

	// ========================================================================
	// PREDICATES
	// ========================================================================

	/// Whether the origin entry at `path` matches any exclusion rule
	pub fn should_exclude(&self, path: &Path, is_dir: bool) -> bool {
		if self.ignored_paths.iter().any(|p| p == path) {
			return true;
		}

		let name = match path.file_name().and_then(OsStr::to_str) {
			Some(name) => name,
			None => return false,
		};

		if is_dir {
			if self.ignored_folder_names.iter().any(|n| n == name) {
				return true;
			}
		} else {
			let extension = util::extension_of(name);
			if !extension.is_empty() && self.ignored_file_extensions.iter().any(|e| *e == extension) {
				return true;
			}
			if self.ignored_file_names.iter().any(|n| n == name) {
				return true;
			}
		}

		self.ignored_prefixes.iter().any(|p| !p.is_empty() && name.starts_with(p.as_str()))
	}

	/// Check the invariants a sync relies on
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.origin_directory.as_os_str().is_empty() {
			return Err(ConfigError::Invalid { message: "origin directory is empty".to_string() });
		}
		if self.backup_directories.is_empty() {
			return Err(ConfigError::Invalid {
				message: "at least one backup destination is required".to_string(),
			});
		}
		if let Some(dest) = self.backup_directories.iter().find(|d| **d == self.origin_directory) {
			return Err(ConfigError::Invalid {
				message: format!("destination {} is the origin itself", dest.display()),
			});
		}
		Ok(())
	}

	// ========================================================================
	// PERSISTENCE
	// ========================================================================

	/// Location of the config document for `origin`
	pub fn path_in(origin: &Path) -> PathBuf {
		origin.join(CONFIG_FILE)
	}

	/// Load `backup_config.json` from the origin directory
	pub async fn load_from_origin(origin: &Path) -> Result<Self, ConfigError> {
		Self::load(&Self::path_in(origin)).await
	}

	/// Load a config document, normalizing legacy `_Storage` destinations
	pub async fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = afs::read_to_string(path)
			.await
			.map_err(|source| ConfigError::LoadFailed { path: path.to_path_buf(), source })?;
		let mut config = Self::parse(&text)
			.map_err(|message| ConfigError::Parse { path: path.to_path_buf(), message })?;
		config.normalize();
		debug!("Loaded config {} ({} destinations)", path.display(), config.backup_directories.len());
		Ok(config)
	}

	fn parse(text: &str) -> Result<Self, String> {
		json5::from_str(text).map_err(|e| e.to_string())
	}

	/// Write the config next to the origin data
	pub async fn save(&self) -> Result<PathBuf, ConfigError> {
		let path = Self::path_in(&self.origin_directory);
		self.save_to(&path).await?;
		Ok(path)
	}

	pub async fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
		let save_err = |source| ConfigError::SaveFailed { path: path.to_path_buf(), source };
		let json = serde_json::to_vec_pretty(self).map_err(|e| {
			save_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
		})?;
		util::write_atomic(path, &json).await.map_err(save_err)?;
		info!("Saved config {}", path.display());
		Ok(())
	}

	fn normalize(&mut self) {
		let mut destinations = Vec::with_capacity(self.backup_directories.len());
		for dest in self.backup_directories.drain(..) {
			let dest = normalize_destination(dest);
			if !destinations.contains(&dest) {
				destinations.push(dest);
			}
		}
		self.backup_directories = destinations;
	}
}

/// Older configs pointed at `<destination>/_Storage` directly
fn normalize_destination(path: PathBuf) -> PathBuf {
	if path.file_name() == Some(OsStr::new(STORAGE_DIR)) {
		if let Some(parent) = path.parent() {
			return parent.to_path_buf();
		}
	}
	path
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, items: impl Iterator<Item = T>) {
	for item in items {
		if !list.contains(&item) {
			list.push(item);
		}
	}
}


// vim: ts=4
