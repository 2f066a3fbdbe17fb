//! Sync engine: reconcile the origin tree against every destination
//!
//! The origin is walked once, directory by directory. Each directory is
//! enumerated a single time and that listing drives all destinations:
//!
//! 1. every included file is hashed and reconciled in each destination,
//!    the destinations running concurrently;
//! 2. tree files not seen in the listing are soft-deleted;
//! 3. included subdirectories are processed recursively;
//! 4. tree directories not seen in the listing have every live file beneath
//!    them soft-deleted.
//!
//! All mutation happens on the in-memory trees. Only once the whole origin
//! has been walked is each destination stamped and saved, so a cancelled or
//! crashed run leaves the previous state on disk.

use chrono::Utc;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs as afs;

use crate::callbacks::{NoCallbacks, ProgressStats, SyncCallbacks};
use crate::config::BackupConfig;
use crate::destination::{Destination, FileOutcome};
use crate::error::BackupError;
use crate::logging::*;
use crate::tree::{fold, join};
use crate::types::{ContentHash, Timestamp};
use crate::util;

/// Shared flag that aborts a run between file-level units of work
pub type CancelFlag = Arc<AtomicBool>;

/// Run-time options for [`sync_with_callbacks`]
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
	pub cancel: Option<CancelFlag>,
}

impl SyncOptions {
	pub fn with_cancel(cancel: CancelFlag) -> Self {
		SyncOptions { cancel: Some(cancel) }
	}
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
	/// File vanished or changed while being read; retried next run
	TransientSkip,
	/// File could not be stored in one destination
	FileFailed,
	/// Origin subdirectory could not be listed; its subtree was left alone
	DirectoryUnreadable,
	/// Destination root did not exist
	DestinationSkipped,
	/// Destination could not be loaded or saved
	DestinationFailed,
	/// Origin entry differs only in case from one already processed; skipped
	NameCollision,
}

/// Non-fatal problem collected during a run
#[derive(Debug, Clone)]
pub struct SyncIssue {
	pub kind: IssueKind,
	/// Destination the issue applies to, `None` for origin-side issues
	pub destination: Option<PathBuf>,
	/// Relative path inside the origin, if file or directory specific
	pub path: Option<String>,
	pub message: String,
}

impl fmt::Display for SyncIssue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self.kind)?;
		if let Some(destination) = &self.destination {
			write!(f, " [{}]", destination.display())?;
		}
		if let Some(path) = &self.path {
			write!(f, " {}", path)?;
		}
		write!(f, ": {}", self.message)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationOutcome {
	Synced,
	/// Root did not exist; nothing was read or written
	Skipped,
	Failed(String),
}

#[derive(Debug, Clone)]
pub struct DestinationReport {
	pub root: PathBuf,
	pub outcome: DestinationOutcome,
}

/// Counters over the whole run, summed across destinations where relevant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
	/// Origin files hashed and reconciled
	pub files_processed: usize,
	/// Origin files skipped because of a transient error
	pub files_skipped: usize,
	pub versions_recorded: usize,
	pub blobs_written: usize,
	pub files_deleted: usize,
	pub files_undeleted: usize,
	pub bytes_hashed: u64,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct SyncReport {
	pub destinations: Vec<DestinationReport>,
	pub stats: SyncStats,
	pub issues: Vec<SyncIssue>,
	pub duration: Duration,
}

impl SyncReport {
	fn count(&self, pred: impl Fn(&DestinationOutcome) -> bool) -> usize {
		self.destinations.iter().filter(|d| pred(&d.outcome)).count()
	}

	pub fn synced_count(&self) -> usize {
		self.count(|o| *o == DestinationOutcome::Synced)
	}

	pub fn failed_count(&self) -> usize {
		self.count(|o| matches!(o, DestinationOutcome::Failed(_)))
	}

	fn has_file_failures(&self) -> bool {
		self.issues.iter().any(|i| i.kind == IssueKind::FileFailed)
	}

	/// Every reachable destination synced without a hard failure
	pub fn is_success(&self) -> bool {
		self.synced_count() > 0 && self.failed_count() == 0 && !self.has_file_failures()
	}

	/// Some destination synced, but something else failed
	pub fn is_partial(&self) -> bool {
		self.synced_count() > 0 && (self.failed_count() > 0 || self.has_file_failures())
	}

	/// No destination synced at all
	pub fn is_total_failure(&self) -> bool {
		self.synced_count() == 0
	}
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Sync without callbacks or cancellation
pub async fn sync(config: &BackupConfig) -> Result<SyncReport, BackupError> {
	sync_with_callbacks(config, &NoCallbacks, SyncOptions::default()).await
}

/// Sync the origin of `config` into all of its existing destinations.
///
/// Returns `Err` only for run-level failures (origin missing, invalid config,
/// cancellation). Per-file and per-destination problems are collected in the
/// report.
pub async fn sync_with_callbacks(
	config: &BackupConfig,
	callbacks: &dyn SyncCallbacks,
	options: SyncOptions,
) -> Result<SyncReport, BackupError> {
	if config.backup_directories.is_empty() {
		return Err(BackupError::NoDestinations);
	}
	config.validate().map_err(|e| BackupError::InvalidConfig { message: e.to_string() })?;

	let origin = config.origin_directory.clone();
	let is_dir = afs::metadata(&origin).await.map(|m| m.is_dir()).unwrap_or(false);
	if !is_dir {
		return Err(BackupError::OriginMissing { path: origin });
	}

	let mut run = SyncRun::new(config, callbacks, options);
	info!("Syncing {} into {} destinations", origin.display(), config.backup_directories.len());
	run.open_destinations().await;

	if run.live.is_empty() {
		warn!("No destination available, nothing synced");
	} else {
		run.sync_directory(origin, String::new()).await?;
		run.finish().await;
	}

	Ok(run.into_report())
}

// ============================================================================
// RUN STATE
// ============================================================================

struct SyncRun<'a> {
	config: &'a BackupConfig,
	callbacks: &'a dyn SyncCallbacks,
	cancel: Option<CancelFlag>,
	now: Timestamp,
	started: Instant,
	/// Destinations participating in this run
	live: Vec<Destination>,
	reports: Vec<DestinationReport>,
	stats: SyncStats,
	issues: Vec<SyncIssue>,
}

/// Included entries of one origin directory, sorted by name
#[derive(Default)]
struct Listing {
	files: Vec<(String, PathBuf, u64)>,
	directories: Vec<(String, PathBuf)>,
}

impl<'a> SyncRun<'a> {
	fn new(config: &'a BackupConfig, callbacks: &'a dyn SyncCallbacks, options: SyncOptions) -> Self {
		SyncRun {
			config,
			callbacks,
			cancel: options.cancel,
			now: Utc::now(),
			started: Instant::now(),
			live: Vec::new(),
			reports: Vec::new(),
			stats: SyncStats::default(),
			issues: Vec::new(),
		}
	}

	fn issue(&mut self, kind: IssueKind, destination: Option<&Path>, path: Option<&str>, message: String) {
		let issue = SyncIssue {
			kind,
			destination: destination.map(Path::to_path_buf),
			path: path.map(str::to_string),
			message,
		};
		self.callbacks.on_issue(&issue);
		self.issues.push(issue);
	}

	fn check_cancelled(&self) -> Result<(), BackupError> {
		match &self.cancel {
			Some(flag) if flag.load(Ordering::SeqCst) => {
				warn!("Sync aborted, destinations left unchanged");
				Err(BackupError::Aborted)
			}
			_ => Ok(()),
		}
	}

	async fn open_destinations(&mut self) {
		let config = self.config;
		for root in &config.backup_directories {
			if !Destination::exists(root).await {
				warn!("Destination {} does not exist, skipping", root.display());
				self.issue(
					IssueKind::DestinationSkipped,
					Some(root.as_path()),
					None,
					"destination root does not exist".to_string(),
				);
				self.reports
					.push(DestinationReport { root: root.clone(), outcome: DestinationOutcome::Skipped });
				continue;
			}
			match Destination::open(root).await {
				Ok(destination) => self.live.push(destination),
				Err(e) => {
					error!("Cannot open destination {}: {}", root.display(), e);
					self.issue(IssueKind::DestinationFailed, Some(root.as_path()), None, e.to_string());
					self.reports.push(DestinationReport {
						root: root.clone(),
						outcome: DestinationOutcome::Failed(e.to_string()),
					});
				}
			}
		}
	}

	/// Whether `path` is the root of a configured destination
	fn is_destination_root(&self, path: &Path) -> bool {
		self.config.backup_directories.iter().any(|d| d == path)
	}

	async fn list_origin(&self, dir: &Path) -> std::io::Result<Listing> {
		let mut listing = Listing::default();
		let mut entries = afs::read_dir(dir).await?;
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			let name = match entry.file_name().into_string() {
				Ok(name) => name,
				Err(raw) => {
					warn!("Skipping non UTF-8 name {:?} in {}", raw, dir.display());
					continue;
				}
			};
			// Symlinks are not followed
			let file_type = entry.file_type().await?;
			if file_type.is_dir() {
				if self.config.should_exclude(&path, true) || self.is_destination_root(&path) {
					debug!("Excluded directory {}", path.display());
					continue;
				}
				listing.directories.push((name, path));
			} else if file_type.is_file() {
				if self.config.should_exclude(&path, false) {
					debug!("Excluded file {}", path.display());
					continue;
				}
				let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
				listing.files.push((name, path, size));
			}
		}
		listing.files.sort_by(|a, b| a.0.cmp(&b.0));
		listing.directories.sort_by(|a, b| a.0.cmp(&b.0));
		Ok(listing)
	}

	/// Process origin directory `dir` whose tree path is `rel`
	fn sync_directory(&mut self, dir: PathBuf, rel: String) -> BoxFuture<'_, Result<(), BackupError>> {
		async move {
			let listing = match self.list_origin(&dir).await {
				Ok(listing) => listing,
				Err(e) => {
					// Nothing under an unreadable directory is considered deleted
					warn!("Cannot read {}: {}", dir.display(), e);
					self.issue(IssueKind::DirectoryUnreadable, None, Some(&rel), e.to_string());
					return Ok(());
				}
			};

			let mut seen_files = HashSet::new();
			for (name, path, size) in &listing.files {
				self.check_cancelled()?;
				let rel_path = join(&rel, name);
				if !seen_files.insert(fold(name)) {
					self.name_collision(&rel_path);
					continue;
				}
				self.sync_file(&rel_path, path, *size).await;
			}

			let now = self.now;
			for destination in self.live.iter_mut() {
				let deleted = destination.delete_unseen_files(&rel, &seen_files, now);
				for path in &deleted {
					debug!("Deleted {} in {}", path, destination.root().display());
				}
				self.stats.files_deleted += deleted.len();
			}

			let mut seen_dirs = HashSet::new();
			for (name, path) in listing.directories {
				self.check_cancelled()?;
				let rel_path = join(&rel, &name);
				if !seen_dirs.insert(fold(&name)) {
					self.name_collision(&rel_path);
					continue;
				}
				self.sync_directory(path, rel_path).await?;
			}

			for destination in self.live.iter_mut() {
				let deleted = destination.delete_unseen_directories(&rel, &seen_dirs, now);
				if !deleted.is_empty() {
					debug!(
						"Deleted {} files under removed directories of '{}' in {}",
						deleted.len(),
						rel,
						destination.root().display()
					);
				}
				self.stats.files_deleted += deleted.len();
			}
			Ok(())
		}
		.boxed()
	}

	fn name_collision(&mut self, rel_path: &str) {
		warn!("Skipping {}: another entry differs only in case", rel_path);
		self.issue(
			IssueKind::NameCollision,
			None,
			Some(rel_path),
			"name differs only in case from an entry already backed up".to_string(),
		);
	}

	/// Hash one origin file and reconcile it in every destination
	async fn sync_file(&mut self, rel_path: &str, path: &Path, size: u64) {
		self.callbacks.on_working_on(path);

		let hash: ContentHash = match util::hash_file(path).await {
			Ok(hash) => hash,
			Err(e) => {
				// Counted as seen so its node is neither updated nor deleted
				warn!("Skipping {}: {}", path.display(), e);
				let kind =
					if e.is_transient() { IssueKind::TransientSkip } else { IssueKind::FileFailed };
				self.stats.files_skipped += 1;
				self.issue(kind, None, Some(rel_path), e.to_string());
				return;
			}
		};

		let now = self.now;
		let outcomes = join_all(
			self.live.iter_mut().map(|destination| destination.backup_file(rel_path, path, &hash, now)),
		)
		.await;

		let roots: Vec<PathBuf> = self.live.iter().map(|d| d.root().to_path_buf()).collect();
		for (root, outcome) in roots.iter().zip(outcomes) {
			match outcome {
				Ok(FileOutcome::Unchanged) => {}
				Ok(FileOutcome::Undeleted) => self.stats.files_undeleted += 1,
				Ok(FileOutcome::Repaired { undeleted }) => {
					self.stats.blobs_written += 1;
					if undeleted {
						self.stats.files_undeleted += 1;
					}
				}
				Ok(FileOutcome::NewVersion { blob_written }) => {
					self.stats.versions_recorded += 1;
					if blob_written {
						self.stats.blobs_written += 1;
					}
				}
				Err(BackupError::Store(e)) if e.is_transient() => {
					warn!("{} changed while copying to {}: {}", rel_path, root.display(), e);
					self.issue(IssueKind::TransientSkip, Some(root.as_path()), Some(rel_path), e.to_string());
				}
				Err(e) => {
					error!("Cannot back up {} to {}: {}", rel_path, root.display(), e);
					self.issue(IssueKind::FileFailed, Some(root.as_path()), Some(rel_path), e.to_string());
				}
			}
		}

		self.stats.files_processed += 1;
		self.stats.bytes_hashed += size;
		self.callbacks.on_progress(ProgressStats {
			files_processed: self.stats.files_processed,
			bytes_processed: self.stats.bytes_hashed,
			elapsed: self.started.elapsed(),
		});
	}

	/// Stamp and persist every destination that took part in the run
	async fn finish(&mut self) {
		let now = self.now;
		let results = join_all(self.live.iter_mut().map(|destination| destination.finish(now))).await;

		let roots: Vec<PathBuf> = self.live.iter().map(|d| d.root().to_path_buf()).collect();
		for (root, result) in roots.into_iter().zip(results) {
			let outcome = match result {
				Ok(()) => {
					info!("Synced {}", root.display());
					DestinationOutcome::Synced
				}
				Err(e) => {
					error!("Cannot save destination {}: {}", root.display(), e);
					self.issue(IssueKind::DestinationFailed, Some(root.as_path()), None, e.to_string());
					DestinationOutcome::Failed(e.to_string())
				}
			};
			self.reports.push(DestinationReport { root, outcome });
		}
	}

	fn into_report(self) -> SyncReport {
		// Report destinations in configuration order
		let mut destinations = self.reports;
		let order = &self.config.backup_directories;
		destinations.sort_by_key(|d| order.iter().position(|p| *p == d.root).unwrap_or(usize::MAX));

		let report = SyncReport {
			destinations,
			stats: self.stats,
			issues: self.issues,
			duration: self.started.elapsed(),
		};
		info!(
			"Sync finished in {:.1?}: {} files, {} new versions, {} blobs, {} deleted, {} issues",
			report.duration,
			report.stats.files_processed,
			report.stats.versions_recorded,
			report.stats.blobs_written,
			report.stats.files_deleted,
			report.issues.len()
		);
		report
	}
}


// vim: ts=4
