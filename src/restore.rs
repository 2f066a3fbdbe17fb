//! Restore the latest live state of a backup into a target directory
//!
//! The most recently synced destination is chosen and every live file of its
//! tree is copied from the blob holding its latest version. Restoring is
//! additive: files already present in the target are never overwritten.

use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs as afs;

use crate::callbacks::{ProgressStats, SyncCallbacks};
use crate::config::BackupConfig;
use crate::destination::Destination;
use crate::error::BackupError;
use crate::logging::*;
use crate::tree::segments;
use crate::util;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
	/// Restore only live files at or beneath this relative path
	pub subpath: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
	/// Destination the files were restored from
	pub source: PathBuf,
	pub restored: usize,
	/// Files skipped because the target already had them
	pub already_present: usize,
	pub bytes_restored: u64,
	/// Live files whose latest blob was not found in the store
	pub missing_blobs: Vec<String>,
	/// Files that could not be written, with the error
	pub failed: Vec<(String, String)>,
}

/// Pick the existing destination with the most recent completed sync
pub async fn select_destination(config: &BackupConfig) -> Result<Destination, BackupError> {
	let mut best: Option<Destination> = None;
	for root in &config.backup_directories {
		if !Destination::exists(root).await {
			debug!("Destination {} does not exist", root.display());
			continue;
		}
		let candidate = match Destination::open(root).await {
			Ok(destination) => destination,
			Err(e) => {
				warn!("Cannot open destination {}: {}", root.display(), e);
				continue;
			}
		};
		let newer = match &best {
			None => true,
			Some(current) => {
				candidate.metadata().last_write_time > current.metadata().last_write_time
			}
		};
		if newer {
			best = Some(candidate);
		}
	}
	best.ok_or(BackupError::NoBackupFound)
}

/// Restore the backup described by `config` into `target`
pub async fn restore(
	config: &BackupConfig,
	target: &Path,
	callbacks: &dyn SyncCallbacks,
	options: RestoreOptions,
) -> Result<RestoreReport, BackupError> {
	let destination = select_destination(config).await?;
	info!("Restoring from {} into {}", destination.root().display(), target.display());

	let started = Instant::now();
	let mut report = RestoreReport { source: destination.root().to_path_buf(), ..Default::default() };
	let prefix = options.subpath.as_deref().map(normalize_subpath);

	for (rel_path, file) in destination.tree().live_files() {
		if let Some(prefix) = &prefix {
			if !is_under(&rel_path, prefix) {
				continue;
			}
		}

		let dest_path = target_path(target, &rel_path);
		callbacks.on_working_on(&dest_path);

		if afs::symlink_metadata(&dest_path).await.is_ok() {
			debug!("{} already present", dest_path.display());
			report.already_present += 1;
			continue;
		}

		let Some(blob) = destination.latest_blob(&rel_path, file).await else {
			warn!("No blob for {} in {}", rel_path, destination.root().display());
			report.missing_blobs.push(rel_path);
			continue;
		};

		let copied = match restore_file(&blob, &dest_path).await {
			Ok(copied) => copied,
			Err(e) => {
				warn!("Cannot restore {}: {}", dest_path.display(), e);
				report.failed.push((rel_path, e.to_string()));
				continue;
			}
		};

		report.restored += 1;
		report.bytes_restored += copied;
		callbacks.on_progress(ProgressStats {
			files_processed: report.restored,
			bytes_processed: report.bytes_restored,
			elapsed: started.elapsed(),
		});
	}

	info!(
		"Restored {} files ({} already present, {} missing blobs, {} failed)",
		report.restored,
		report.already_present,
		report.missing_blobs.len(),
		report.failed.len()
	);
	Ok(report)
}

async fn restore_file(blob: &Path, dest_path: &Path) -> std::io::Result<u64> {
	if let Some(parent) = dest_path.parent() {
		afs::create_dir_all(parent).await?;
	}
	util::copy_atomic(blob, dest_path).await
}

fn normalize_subpath(subpath: &str) -> String {
	segments(subpath).join("/")
}

/// Whether tree path `path` equals `prefix` or lies beneath it, ignoring case
fn is_under(path: &str, prefix: &str) -> bool {
	if prefix.is_empty() {
		return true;
	}
	let path = path.to_lowercase();
	let prefix = prefix.to_lowercase();
	path == prefix || path.strip_prefix(&prefix).map(|rest| rest.starts_with('/')).unwrap_or(false)
}

fn target_path(target: &Path, rel_path: &str) -> PathBuf {
	rel_path.split('/').fold(target.to_path_buf(), |path, segment| path.join(segment))
}


// vim: ts=4
