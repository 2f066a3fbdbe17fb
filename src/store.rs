//! Content-addressed blob store
//!
//! Every destination keeps its blobs under `<destination>/_Storage`. A blob
//! is named after the SHA-256 of its content and sharded by the first three
//! hex digits of the digest:
//!
//! ```text
//! _Storage/d-e3b/f-e3b0c442...b855.txt
//! ```
//!
//! The original file extension is appended for human inspection only; the
//! store treats a hash as present no matter which extension it was first
//! written with, so identical content is kept once.
//!
//! Blobs are write-once. Writers stream into a uniquely named temporary file
//! in the shard directory and publish it with a rename, so two writers racing
//! on the same hash both produce a complete file and a crash never leaves a
//! truncated blob behind.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs as afs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::StoreError;
use crate::logging::*;
use crate::types::ContentHash;
use crate::util;

/// Name of the blob directory inside a destination
pub const STORAGE_DIR: &str = "_Storage";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Hash-addressed blob repository of one destination
#[derive(Debug, Clone)]
pub struct ContentStore {
	root: PathBuf,
}

impl ContentStore {
	/// Store rooted at `<destination>/_Storage`
	pub fn new(destination: &Path) -> Self {
		ContentStore { root: destination.join(STORAGE_DIR) }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Deterministic blob location: `d-<prefix>/f-<hash><extension>`
	pub fn path_for(&self, hash: &ContentHash, extension: &str) -> PathBuf {
		self.root
			.join(format!("d-{}", hash.prefix()))
			.join(format!("f-{}{}", hash, extension))
	}

	/// Locate the blob for `hash`, preferring the path derived from `extension`
	pub async fn locate(&self, hash: &ContentHash, extension: &str) -> Option<PathBuf> {
		let preferred = self.path_for(hash, extension);
		if afs::metadata(&preferred).await.map(|m| m.is_file()).unwrap_or(false) {
			return Some(preferred);
		}

		// Same content may have been stored first under another extension
		let shard = self.root.join(format!("d-{}", hash.prefix()));
		let stem = format!("f-{}", hash);
		let mut entries = afs::read_dir(&shard).await.ok()?;
		while let Ok(Some(entry)) = entries.next_entry().await {
			let name = entry.file_name();
			let name = name.to_string_lossy();
			if blob_name_matches(&name, &stem) {
				return Some(entry.path());
			}
		}
		None
	}

	/// Whether a blob for `hash` exists
	pub async fn contains(&self, hash: &ContentHash) -> bool {
		self.locate(hash, "").await.is_some()
	}

	/// Copy `source` into the store unless the hash is already present.
	///
	/// The content is re-hashed while copying; if it no longer matches `hash`
	/// the copy is discarded with [`StoreError::HashMismatch`]. Returns `true`
	/// when a new blob was published.
	pub async fn put(
		&self,
		hash: &ContentHash,
		extension: &str,
		source: &Path,
	) -> Result<bool, StoreError> {
		if self.contains(hash).await {
			return Ok(false);
		}

		let target = self.path_for(hash, extension);
		let write_err = |source: io::Error| StoreError::WriteFailed { path: target.clone(), source };

		if let Some(shard) = target.parent() {
			afs::create_dir_all(shard).await.map_err(write_err)?;
		}

		let temp = util::temp_path_for(&target);
		let copied = copy_hashing(source, &temp).await;
		let actual = match copied {
			Ok(actual) => actual,
			Err(e) => {
				let _ = afs::remove_file(&temp).await;
				return Err(e);
			}
		};

		if &actual != hash {
			let _ = afs::remove_file(&temp).await;
			return Err(StoreError::HashMismatch {
				path: source.to_path_buf(),
				expected: hash.to_string(),
				actual: actual.to_string(),
			});
		}

		// Another writer won the race: its blob has identical content
		if self.contains(hash).await {
			let _ = afs::remove_file(&temp).await;
			debug!("Blob {} published concurrently, discarding copy", hash);
			return Ok(false);
		}

		if let Err(e) = afs::rename(&temp, &target).await {
			let _ = afs::remove_file(&temp).await;
			return Err(write_err(e));
		}
		debug!("Stored blob {}", target.display());
		Ok(true)
	}

	/// All blobs currently in the store with the hash parsed from their name
	pub async fn blobs(&self) -> Result<Vec<(ContentHash, PathBuf)>, StoreError> {
		let mut blobs = Vec::new();
		let mut shards = match afs::read_dir(&self.root).await {
			Ok(shards) => shards,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(blobs),
			Err(e) => return Err(read_failed(&self.root, e)),
		};

		while let Some(shard) = shards.next_entry().await.map_err(|e| read_failed(&self.root, e))? {
			if !shard.file_name().to_string_lossy().starts_with("d-") {
				continue;
			}
			let shard_path = shard.path();
			if !afs::metadata(&shard_path).await.map(|m| m.is_dir()).unwrap_or(false) {
				continue;
			}
			let mut files = afs::read_dir(&shard_path).await.map_err(|e| read_failed(&shard_path, e))?;
			while let Some(file) = files.next_entry().await.map_err(|e| read_failed(&shard_path, e))? {
				let name = file.file_name().to_string_lossy().into_owned();
				if let Some(hash) = hash_from_blob_name(&name) {
					blobs.push((hash, file.path()));
				}
			}
		}
		blobs.sort();
		Ok(blobs)
	}
}

/// `f-<hash>` optionally followed by an extension
fn blob_name_matches(name: &str, stem: &str) -> bool {
	match name.strip_prefix(stem) {
		Some(rest) => rest.is_empty() || rest.starts_with('.'),
		None => false,
	}
}

fn hash_from_blob_name(name: &str) -> Option<ContentHash> {
	let rest = name.strip_prefix("f-")?;
	let digest = rest.get(..64)?;
	let ext = &rest[64..];
	if !ext.is_empty() && !ext.starts_with('.') {
		return None;
	}
	digest.parse().ok()
}

fn read_failed(path: &Path, source: io::Error) -> StoreError {
	StoreError::ReadFailed { path: path.to_path_buf(), source }
}

/// Stream `source` into `dest` and return the digest of what was copied
async fn copy_hashing(source: &Path, dest: &Path) -> Result<ContentHash, StoreError> {
	let read_err = |e| StoreError::ReadFailed { path: source.to_path_buf(), source: e };
	let write_err = |e| StoreError::WriteFailed { path: dest.to_path_buf(), source: e };

	let mut input = afs::File::open(source).await.map_err(read_err)?;
	let mut output = afs::File::create(dest).await.map_err(write_err)?;
	let mut hasher = Sha256::new();
	let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

	loop {
		let n = input.read(&mut buffer).await.map_err(read_err)?;
		if n == 0 {
			break;
		}
		hasher.update(&buffer[..n]);
		output.write_all(&buffer[..n]).await.map_err(write_err)?;
	}
	output.sync_all().await.map_err(write_err)?;

	Ok(ContentHash::from_digest(hasher.finalize().into()))
}


// vim: ts=4
