//! In-memory directory tree of one destination
//!
//! The tree mirrors the logical layout of the origin as it was last seen.
//! Directories own their children outright (no parent links), files carry
//! their full version history plus an optional deletion timestamp.
//! Directory nodes are never removed: the tree is a permanent index of
//! every path ever backed up, and deletion only ever marks files.
//!
//! Names are compared case-insensitively so a tree written on one platform
//! resolves the same paths on another; the spelling first seen is the one
//! persisted.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

use crate::error::TreeError;
use crate::types::{ContentHash, Timestamp};

/// Children keyed by name with case-insensitive lookup
#[derive(Debug, Clone, PartialEq)]
pub struct NameMap<V> {
	entries: BTreeMap<String, V>,
	folded: HashMap<String, String>,
}

/// Key under which names that differ only in case collide
pub(crate) fn fold(name: &str) -> String {
	name.to_lowercase()
}

impl<V> NameMap<V> {
	pub fn new() -> Self {
		NameMap { entries: BTreeMap::new(), folded: HashMap::new() }
	}

	pub fn get(&self, name: &str) -> Option<&V> {
		let key = self.folded.get(&fold(name))?;
		self.entries.get(key)
	}

	pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
		let key = self.folded.get(&fold(name))?;
		self.entries.get_mut(key)
	}

	pub fn get_or_insert_with<F: FnOnce() -> V>(&mut self, name: &str, f: F) -> &mut V {
		let key = self.folded.entry(fold(name)).or_insert_with(|| name.to_string()).clone();
		self.entries.entry(key).or_insert_with(f)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut V)> {
		self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}
}

impl<V> Default for NameMap<V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<V> From<BTreeMap<String, V>> for NameMap<V> {
	fn from(entries: BTreeMap<String, V>) -> Self {
		let mut folded = HashMap::with_capacity(entries.len());
		for key in entries.keys() {
			folded.entry(fold(key)).or_insert_with(|| key.clone());
		}
		NameMap { entries, folded }
	}
}

impl<V: Serialize> Serialize for NameMap<V> {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		self.entries.serialize(serializer)
	}
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for NameMap<V> {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		BTreeMap::<String, V>::deserialize(deserializer).map(NameMap::from)
	}
}

/// One stored state of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
	pub saved_at: Timestamp,
	pub hash: ContentHash,
}

/// Leaf node: version history and deletion marker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
	#[serde(default)]
	pub versions: Vec<Version>,
	#[serde(default)]
	pub deleted_at: Option<Timestamp>,
}

impl FileNode {
	/// Version with the greatest `saved_at`; the later entry wins ties
	pub fn latest(&self) -> Option<&Version> {
		self.versions.iter().max_by_key(|v| v.saved_at)
	}

	pub fn latest_hash(&self) -> Option<&ContentHash> {
		self.latest().map(|v| &v.hash)
	}

	/// Append a version; a file that changes or reappears is live again
	pub fn record_version(&mut self, hash: ContentHash, now: Timestamp) {
		self.versions.push(Version { saved_at: now, hash });
		self.deleted_at = None;
	}

	/// Mark the file deleted, keeping its history.
	///
	/// Fails with the existing deletion time if the file is already deleted.
	pub fn soft_delete(&mut self, now: Timestamp) -> Result<(), Timestamp> {
		if let Some(deleted_at) = self.deleted_at {
			return Err(deleted_at);
		}
		self.deleted_at = Some(now);
		Ok(())
	}

	pub fn is_soft_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}

	/// Clear the deletion marker; returns whether the file was deleted
	pub fn undelete(&mut self) -> bool {
		self.deleted_at.take().is_some()
	}
}

/// Interior node: child directories and child files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryNode {
	#[serde(default)]
	pub directories: NameMap<DirectoryNode>,
	#[serde(default)]
	pub files: NameMap<FileNode>,
}

impl DirectoryNode {
	/// Soft-delete every live file beneath this directory.
	///
	/// `prefix` is the relative path of this directory; the relative paths
	/// of the files marked are appended to `deleted`.
	pub fn soft_delete_all(&mut self, prefix: &str, now: Timestamp, deleted: &mut Vec<String>) {
		for (name, file) in self.files.iter_mut() {
			if file.soft_delete(now).is_ok() {
				deleted.push(join(prefix, name));
			}
		}
		for (name, dir) in self.directories.iter_mut() {
			dir.soft_delete_all(&join(prefix, name), now, deleted);
		}
	}

	/// Every file beneath this directory with its relative path, depth first
	pub fn walk_files<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a FileNode)>) {
		for (name, file) in self.files.iter() {
			out.push((join(prefix, name), file));
		}
		for (name, dir) in self.directories.iter() {
			dir.walk_files(&join(prefix, name), out);
		}
	}

	fn count(&self) -> (usize, usize) {
		self.directories.iter().fold((0, self.files.len()), |(dirs, files), (_, d)| {
			let (sub_dirs, sub_files) = d.count();
			(dirs + 1 + sub_dirs, files + sub_files)
		})
	}
}

/// Join a relative directory path and a child name with `/`
pub fn join(prefix: &str, name: &str) -> String {
	if prefix.is_empty() {
		name.to_string()
	} else {
		format!("{}/{}", prefix, name)
	}
}

/// `/` everywhere, plus the backslash on Windows. Elsewhere a backslash is
/// an ordinary name character.
fn is_separator(c: char) -> bool {
	c == '/' || (cfg!(windows) && c == '\\')
}

/// Split a relative path into names, ignoring empty and `.` segments
pub(crate) fn segments(path: &str) -> Vec<&str> {
	path.split(is_separator).filter(|s| !s.is_empty() && *s != ".").collect()
}

/// Whole tree of one destination, persisted as `tree.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryTree {
	root: DirectoryNode,
}

impl DirectoryTree {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn root(&self) -> &DirectoryNode {
		&self.root
	}

	pub fn get_directory(&self, path: &str) -> Option<&DirectoryNode> {
		let mut node = &self.root;
		for segment in segments(path) {
			node = node.directories.get(segment)?;
		}
		Some(node)
	}

	pub fn get_directory_mut(&mut self, path: &str) -> Option<&mut DirectoryNode> {
		let mut node = &mut self.root;
		for segment in segments(path) {
			node = node.directories.get_mut(segment)?;
		}
		Some(node)
	}

	pub fn get_or_create_directory(&mut self, path: &str) -> &mut DirectoryNode {
		let mut node = &mut self.root;
		for segment in segments(path) {
			node = node.directories.get_or_insert_with(segment, DirectoryNode::default);
		}
		node
	}

	pub fn get_file(&self, path: &str) -> Option<&FileNode> {
		let mut parts = segments(path);
		let name = parts.pop()?;
		let mut node = &self.root;
		for segment in parts {
			node = node.directories.get(segment)?;
		}
		node.files.get(name)
	}

	pub fn get_file_mut(&mut self, path: &str) -> Option<&mut FileNode> {
		let mut parts = segments(path);
		let name = parts.pop()?;
		let mut node = &mut self.root;
		for segment in parts {
			node = node.directories.get_mut(segment)?;
		}
		node.files.get_mut(name)
	}

	/// Resolve a file, creating missing directories and an empty file node
	pub fn get_or_create_file(&mut self, path: &str) -> Result<&mut FileNode, TreeError> {
		let mut parts = segments(path);
		let name = parts.pop().ok_or_else(|| TreeError::NotFound { path: path.to_string() })?;
		let mut node = &mut self.root;
		for segment in parts {
			node = node.directories.get_or_insert_with(segment, DirectoryNode::default);
		}
		Ok(node.files.get_or_insert_with(name, FileNode::default))
	}

	/// Files directly inside `path`; empty if `path` is not a directory
	pub fn list_files(&self, path: &str) -> Vec<(&str, &FileNode)> {
		self.get_directory(path).map(|d| d.files.iter().collect()).unwrap_or_default()
	}

	/// Directories directly inside `path`; empty if `path` is not a directory
	pub fn list_directories(&self, path: &str) -> Vec<(&str, &DirectoryNode)> {
		self.get_directory(path).map(|d| d.directories.iter().collect()).unwrap_or_default()
	}

	/// Soft-delete the file at `path`
	pub fn soft_delete(&mut self, path: &str, now: Timestamp) -> Result<(), TreeError> {
		let file =
			self.get_file_mut(path).ok_or_else(|| TreeError::NotFound { path: path.to_string() })?;
		file.soft_delete(now)
			.map_err(|deleted_at| TreeError::AlreadyDeleted { path: path.to_string(), deleted_at })
	}

	pub fn is_soft_deleted(&self, path: &str) -> bool {
		self.get_file(path).map(FileNode::is_soft_deleted).unwrap_or(false)
	}

	/// Files not marked deleted, with their relative paths
	pub fn live_files(&self) -> Vec<(String, &FileNode)> {
		let mut all = Vec::new();
		self.root.walk_files("", &mut all);
		all.retain(|(_, f)| !f.is_soft_deleted());
		all
	}

	/// Number of directory and file nodes in the tree
	pub fn count(&self) -> (usize, usize) {
		self.root.count()
	}
}


// vim: ts=4
