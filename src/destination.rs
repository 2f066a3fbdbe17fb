//! One backup destination: blob store, directory tree and metadata
//!
//! On-disk layout, relative to the destination root:
//!
//! ```text
//! _Storage/d-<prefix>/f-<hash><ext>   blobs
//! metadata.json                       { version, lastWriteTime }
//! tree.json                           recursive directory document
//! ```
//!
//! Tree and metadata are loaded once, mutated in memory and written back
//! with [`Destination::save`]. Nothing is persisted before that call, so a
//! run abandoned half way leaves the previous state on disk untouched.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs as afs;

use crate::error::{BackupError, StoreError, TreeError};
use crate::logging::*;
use crate::store::ContentStore;
use crate::tree::{fold, join, DirectoryTree, FileNode};
use crate::types::{ContentHash, Timestamp};
use crate::util::{self, extension_of};

pub const METADATA_FILE: &str = "metadata.json";
pub const TREE_FILE: &str = "tree.json";

/// Current on-disk format
pub const FORMAT_VERSION: u32 = 2;

fn default_version() -> u32 {
	FORMAT_VERSION
}

/// Per-destination record of the format and the last completed sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetaData {
	#[serde(default = "default_version")]
	pub version: u32,
	/// `None` until the first sync completes
	#[serde(default)]
	pub last_write_time: Option<Timestamp>,
}

impl Default for BackupMetaData {
	fn default() -> Self {
		BackupMetaData { version: FORMAT_VERSION, last_write_time: None }
	}
}

/// What happened to one origin file in one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
	/// Hash matches the latest version; nothing written
	Unchanged,
	/// Same content reappeared after a deletion; marker cleared
	Undeleted,
	/// Hash matched but the blob was missing and has been written again;
	/// `undeleted` when a deletion marker was cleared as well
	Repaired { undeleted: bool },
	/// New or changed content; a version was appended
	NewVersion { blob_written: bool },
}

/// Problem found by [`Destination::verify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyProblem {
	MissingBlob { path: String, hash: ContentHash },
	CorruptBlob { path: String, hash: ContentHash, actual: ContentHash },
	NoVersions { path: String },
}

/// Loaded state of one destination directory
#[derive(Debug)]
pub struct Destination {
	root: PathBuf,
	store: ContentStore,
	tree: DirectoryTree,
	metadata: BackupMetaData,
}

impl Destination {
	/// Empty destination state rooted at `root`
	pub fn new(root: &Path) -> Self {
		Destination {
			root: root.to_path_buf(),
			store: ContentStore::new(root),
			tree: DirectoryTree::new(),
			metadata: BackupMetaData::default(),
		}
	}

	/// Load tree and metadata, starting empty when no prior state exists
	pub async fn open(root: &Path) -> Result<Self, BackupError> {
		let mut destination = Destination::new(root);
		if let Some(metadata) = read_document(&root.join(METADATA_FILE)).await? {
			destination.metadata = metadata;
		}
		if let Some(tree) = read_document(&root.join(TREE_FILE)).await? {
			destination.tree = tree;
		}
		let (dirs, files) = destination.tree.count();
		debug!("Opened {} ({} directories, {} files)", root.display(), dirs, files);
		Ok(destination)
	}

	pub async fn exists(root: &Path) -> bool {
		afs::metadata(root).await.map(|m| m.is_dir()).unwrap_or(false)
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn store(&self) -> &ContentStore {
		&self.store
	}

	pub fn tree(&self) -> &DirectoryTree {
		&self.tree
	}

	pub fn metadata(&self) -> &BackupMetaData {
		&self.metadata
	}

	/// Stamp the completion time and persist metadata and tree
	pub async fn finish(&mut self, now: Timestamp) -> Result<(), TreeError> {
		self.metadata.last_write_time = Some(now);
		self.save().await
	}

	/// Overwrite `metadata.json` and `tree.json` atomically
	pub async fn save(&self) -> Result<(), TreeError> {
		write_document(&self.root.join(METADATA_FILE), &self.metadata).await?;
		write_document(&self.root.join(TREE_FILE), &self.tree).await
	}

	/// Reconcile one origin file whose content hashes to `hash`.
	///
	/// The blob is stored before the version is recorded; if storing fails
	/// the tree is left as it was.
	pub async fn backup_file(
		&mut self,
		rel_path: &str,
		source: &Path,
		hash: &ContentHash,
		now: Timestamp,
	) -> Result<FileOutcome, BackupError> {
		let extension = extension_of(rel_path);

		let unchanged = self.tree.get_file(rel_path).and_then(FileNode::latest_hash) == Some(hash);
		if unchanged {
			let repaired = if self.store.contains(hash).await {
				false
			} else {
				warn!("Blob {} for {} missing from {}, storing again", hash, rel_path, self.root.display());
				self.store.put(hash, &extension, source).await?;
				true
			};
			let undeleted = self.tree.get_file_mut(rel_path).map(FileNode::undelete).unwrap_or(false);
			return Ok(match (repaired, undeleted) {
				(true, undeleted) => FileOutcome::Repaired { undeleted },
				(false, true) => FileOutcome::Undeleted,
				(false, false) => FileOutcome::Unchanged,
			});
		}

		let blob_written = self.store.put(hash, &extension, source).await?;
		self.tree.get_or_create_file(rel_path)?.record_version(hash.clone(), now);
		debug!("New version of {} in {}: {}", rel_path, self.root.display(), hash);
		Ok(FileOutcome::NewVersion { blob_written })
	}

	/// Soft-delete live files directly in `dir` whose folded name is not in `seen`
	pub fn delete_unseen_files(
		&mut self,
		dir: &str,
		seen: &HashSet<String>,
		now: Timestamp,
	) -> Vec<String> {
		let mut deleted = Vec::new();
		if let Some(node) = self.tree.get_directory_mut(dir) {
			for (name, file) in node.files.iter_mut() {
				if seen.contains(&fold(name)) || file.is_soft_deleted() {
					continue;
				}
				if file.soft_delete(now).is_ok() {
					deleted.push(join(dir, name));
				}
			}
		}
		deleted
	}

	/// Soft-delete everything beneath subdirectories of `dir` not in `seen`
	pub fn delete_unseen_directories(
		&mut self,
		dir: &str,
		seen: &HashSet<String>,
		now: Timestamp,
	) -> Vec<String> {
		let mut deleted = Vec::new();
		if let Some(node) = self.tree.get_directory_mut(dir) {
			for (name, child) in node.directories.iter_mut() {
				if !seen.contains(&fold(name)) {
					child.soft_delete_all(&join(dir, name), now, &mut deleted);
				}
			}
		}
		deleted
	}

	/// Path of the blob holding the latest version of `rel_path`
	pub async fn latest_blob(&self, rel_path: &str, file: &FileNode) -> Option<PathBuf> {
		let hash = file.latest_hash()?;
		self.store.locate(hash, &extension_of(rel_path)).await
	}

	/// Re-hash the latest blob of every live file
	pub async fn verify(&self) -> Result<Vec<VerifyProblem>, StoreError> {
		let mut problems = Vec::new();
		for (path, file) in self.tree.live_files() {
			let Some(hash) = file.latest_hash() else {
				problems.push(VerifyProblem::NoVersions { path });
				continue;
			};
			let Some(blob) = self.store.locate(hash, &extension_of(&path)).await else {
				problems.push(VerifyProblem::MissingBlob { path, hash: hash.clone() });
				continue;
			};
			let actual = util::hash_file(&blob).await?;
			if &actual != hash {
				problems.push(VerifyProblem::CorruptBlob { path, hash: hash.clone(), actual });
			}
		}
		Ok(problems)
	}
}

async fn read_document<T>(path: &Path) -> Result<Option<T>, TreeError>
where
	T: for<'de> Deserialize<'de>,
{
	let bytes = match afs::read(path).await {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
		Err(source) => return Err(TreeError::LoadFailed { path: path.to_path_buf(), source }),
	};
	serde_json::from_slice(&bytes)
		.map(Some)
		.map_err(|e| TreeError::Corrupted { path: path.to_path_buf(), message: e.to_string() })
}

async fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), TreeError> {
	let json = serde_json::to_vec_pretty(value).map_err(|e| TreeError::SaveFailed {
		path: path.to_path_buf(),
		source: io::Error::new(io::ErrorKind::InvalidData, e),
	})?;
	util::write_atomic(path, &json)
		.await
		.map_err(|source| TreeError::SaveFailed { path: path.to_path_buf(), source })
}


// vim: ts=4
