//! Hashing and atomic file publishing helpers

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs as afs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::StoreError;
use crate::types::ContentHash;

/// Size of the read buffer for streaming file hashing
const HASH_BUFFER_SIZE: usize = 64 * 1024;

pub fn hash(buf: &[u8]) -> ContentHash {
	ContentHash::from_digest(Sha256::digest(buf).into())
}

/// Stream a file through SHA-256 without loading it into memory
pub async fn hash_file(path: &Path) -> Result<ContentHash, StoreError> {
	let read_err = |source| StoreError::ReadFailed { path: path.to_path_buf(), source };

	let mut file = afs::File::open(path).await.map_err(read_err)?;
	let mut hasher = Sha256::new();
	let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
	loop {
		let n = file.read(&mut buffer).await.map_err(read_err)?;
		if n == 0 {
			break;
		}
		hasher.update(&buffer[..n]);
	}
	Ok(ContentHash::from_digest(hasher.finalize().into()))
}

/// Extension including the leading dot, or empty
pub fn extension_of(name: &str) -> String {
	Path::new(name)
		.extension()
		.map(|ext| format!(".{}", ext.to_string_lossy()))
		.unwrap_or_default()
}

/// Sibling path used as the staging file for an atomic publish
pub fn temp_path_for(target: &Path) -> PathBuf {
	let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	target.with_file_name(format!(".tmp-{}-{}", uuid::Uuid::new_v4().simple(), name))
}

/// Write `data` next to `target` and rename it into place
pub async fn write_atomic(target: &Path, data: &[u8]) -> std::io::Result<()> {
	let temp = temp_path_for(target);
	let result = async {
		let mut file = afs::File::create(&temp).await?;
		file.write_all(data).await?;
		file.sync_all().await?;
		Ok::<(), std::io::Error>(())
	}
	.await;

	if let Err(e) = result {
		let _ = afs::remove_file(&temp).await;
		return Err(e);
	}

	if let Err(e) = afs::rename(&temp, target).await {
		let _ = afs::remove_file(&temp).await;
		return Err(e);
	}
	Ok(())
}

/// Stream `source` next to `target` and rename it into place
pub async fn copy_atomic(source: &Path, target: &Path) -> std::io::Result<u64> {
	let temp = temp_path_for(target);
	let copied = match afs::copy(source, &temp).await {
		Ok(copied) => copied,
		Err(e) => {
			let _ = afs::remove_file(&temp).await;
			return Err(e);
		}
	};

	if let Err(e) = afs::rename(&temp, target).await {
		let _ = afs::remove_file(&temp).await;
		return Err(e);
	}
	Ok(copied)
}


// vim: ts=4
