/// Sync integration tests - run real syncs against temporary directories
///
/// Tests verify:
/// 1. Re-running a sync without origin changes is a no-op
/// 2. Identical content is stored once
/// 3. Deletions are soft and reversible
/// 4. Content changes, not timestamps, create versions
/// 5. Excluded entries are treated as removed
/// 6. A missing destination does not fail the run
/// 7. Names are taken verbatim, and case-only duplicates are reported
use filetime::FileTime;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use ibs::callbacks::NoCallbacks;
use ibs::destination::{Destination, METADATA_FILE, TREE_FILE};
use ibs::restore::{restore, RestoreOptions};
use ibs::store::ContentStore;
use ibs::sync::{sync, DestinationOutcome, IssueKind};
use ibs::{util, BackupConfig};

fn create_file(dir: &Path, name: &str, content: &str) {
	let path = dir.join(name);
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).unwrap();
	}
	fs::write(&path, content).unwrap();
}

fn setup() -> (TempDir, TempDir, BackupConfig) {
	let origin = TempDir::new().unwrap();
	let dest = TempDir::new().unwrap();
	let config = BackupConfig::new(origin.path()).add_backup_location(dest.path());
	(origin, dest, config)
}

async fn blob_count(dest: &Path) -> usize {
	ContentStore::new(dest).blobs().await.unwrap().len()
}

// ===================================================================
// BASIC SCENARIO
// ===================================================================

#[tokio::test]
async fn test_sync_then_delete_scenario() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a.txt", "hello");
	create_file(origin.path(), "sub/b.txt", "world");

	let report = sync(&config).await.unwrap();
	assert!(report.is_success());
	assert_eq!(report.stats.versions_recorded, 2);
	assert_eq!(report.stats.blobs_written, 2);

	let destination = Destination::open(dest.path()).await.unwrap();
	let a = destination.tree().get_file("a.txt").unwrap();
	let b = destination.tree().get_file("sub/b.txt").unwrap();
	assert_eq!(a.versions.len(), 1);
	assert_eq!(b.versions.len(), 1);
	assert_eq!(a.latest_hash(), Some(&util::hash(b"hello")));
	assert_eq!(b.latest_hash(), Some(&util::hash(b"world")));

	let blob = destination.latest_blob("a.txt", a).await.unwrap();
	assert_eq!(fs::read(blob).unwrap(), b"hello");
	assert!(destination.metadata().last_write_time.is_some());

	fs::remove_file(origin.path().join("a.txt")).unwrap();
	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.files_deleted, 1);

	let destination = Destination::open(dest.path()).await.unwrap();
	let a = destination.tree().get_file("a.txt").unwrap();
	assert!(a.deleted_at.is_some());
	assert_eq!(a.deleted_at, destination.metadata().last_write_time);
	assert_eq!(a.versions.len(), 1);
	let b = destination.tree().get_file("sub/b.txt").unwrap();
	assert!(b.deleted_at.is_none());
}

// ===================================================================
// IDEMPOTENCE AND DEDUP
// ===================================================================

#[tokio::test]
async fn test_resync_is_noop() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a.txt", "hello");
	create_file(origin.path(), "docs/report.md", "quarterly");
	create_file(origin.path(), "docs/deep/nested.bin", "bits");

	sync(&config).await.unwrap();
	let tree_before = fs::read(dest.path().join(TREE_FILE)).unwrap();
	let meta_before = fs::read(dest.path().join(METADATA_FILE)).unwrap();

	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.files_processed, 3);
	assert_eq!(report.stats.blobs_written, 0);
	assert_eq!(report.stats.versions_recorded, 0);
	assert_eq!(report.stats.files_deleted, 0);

	assert_eq!(fs::read(dest.path().join(TREE_FILE)).unwrap(), tree_before);
	assert_ne!(fs::read(dest.path().join(METADATA_FILE)).unwrap(), meta_before);
}

#[tokio::test]
async fn test_identical_files_share_one_blob() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "one.txt", "same bytes");
	create_file(origin.path(), "copies/two.txt", "same bytes");
	create_file(origin.path(), "copies/three.dat", "same bytes");

	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.versions_recorded, 3);
	assert_eq!(report.stats.blobs_written, 1);
	assert_eq!(blob_count(dest.path()).await, 1);
}

// ===================================================================
// VERSIONING
// ===================================================================

#[tokio::test]
async fn test_content_change_adds_one_version() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a.txt", "hello");
	sync(&config).await.unwrap();

	// Same length, different bytes
	create_file(origin.path(), "a.txt", "jello");
	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.versions_recorded, 1);
	assert_eq!(report.stats.blobs_written, 1);

	let destination = Destination::open(dest.path()).await.unwrap();
	let a = destination.tree().get_file("a.txt").unwrap();
	assert_eq!(a.versions.len(), 2);
	assert_eq!(a.latest_hash(), Some(&util::hash(b"jello")));
	assert_eq!(blob_count(dest.path()).await, 2);
}

#[tokio::test]
async fn test_timestamp_only_change_is_ignored() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a.txt", "hello");
	sync(&config).await.unwrap();

	filetime::set_file_mtime(origin.path().join("a.txt"), FileTime::from_unix_time(1_000_000, 0))
		.unwrap();
	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.versions_recorded, 0);
	assert_eq!(report.stats.blobs_written, 0);

	let destination = Destination::open(dest.path()).await.unwrap();
	assert_eq!(destination.tree().get_file("a.txt").unwrap().versions.len(), 1);
}

#[tokio::test]
async fn test_recreated_file_is_undeleted() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a.txt", "hello");
	sync(&config).await.unwrap();
	fs::remove_file(origin.path().join("a.txt")).unwrap();
	sync(&config).await.unwrap();

	create_file(origin.path(), "a.txt", "hello again");
	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.versions_recorded, 1);

	let destination = Destination::open(dest.path()).await.unwrap();
	let a = destination.tree().get_file("a.txt").unwrap();
	assert!(a.deleted_at.is_none());
	assert_eq!(a.versions.len(), 2);
}

#[tokio::test]
async fn test_restored_same_content_clears_deletion_only() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a.txt", "hello");
	sync(&config).await.unwrap();
	fs::remove_file(origin.path().join("a.txt")).unwrap();
	sync(&config).await.unwrap();

	create_file(origin.path(), "a.txt", "hello");
	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.files_undeleted, 1);
	assert_eq!(report.stats.versions_recorded, 0);

	let destination = Destination::open(dest.path()).await.unwrap();
	let a = destination.tree().get_file("a.txt").unwrap();
	assert!(a.deleted_at.is_none());
	assert_eq!(a.versions.len(), 1);
}

#[tokio::test]
async fn test_removed_directory_soft_deletes_subtree() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "keep.txt", "keep");
	create_file(origin.path(), "old/a.txt", "a");
	create_file(origin.path(), "old/inner/b.txt", "b");
	sync(&config).await.unwrap();

	fs::remove_dir_all(origin.path().join("old")).unwrap();
	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.files_deleted, 2);

	let destination = Destination::open(dest.path()).await.unwrap();
	let tree = destination.tree();
	assert!(tree.is_soft_deleted("old/a.txt"));
	assert!(tree.is_soft_deleted("old/inner/b.txt"));
	assert!(!tree.is_soft_deleted("keep.txt"));
	// Directory nodes stay as an index of everything ever seen
	assert!(tree.get_directory("old/inner").is_some());

	// A second run does not delete them again
	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.files_deleted, 0);
}

// ===================================================================
// EXCLUSION
// ===================================================================

#[tokio::test]
async fn test_excluded_entries_are_never_stored() {
	let (origin, dest, config) = setup();
	let config = config.ignore_extensions([".tmp"]).ignore_folders([".git"]).ignore_prefixes(["$"]);
	create_file(origin.path(), "a.txt", "hello");
	create_file(origin.path(), "scratch.tmp", "temp");
	create_file(origin.path(), ".git/HEAD", "ref: main");
	create_file(origin.path(), "$draft.txt", "draft");

	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.files_processed, 1);

	let destination = Destination::open(dest.path()).await.unwrap();
	let tree = destination.tree();
	assert_eq!(tree.count(), (0, 1));
	assert!(tree.get_file("scratch.tmp").is_none());
	assert!(tree.get_directory(".git").is_none());
	assert_eq!(blob_count(dest.path()).await, 1);
}

#[tokio::test]
async fn test_newly_excluded_file_is_soft_deleted() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "notes.txt", "notes");
	create_file(origin.path(), "build/out.o", "object");
	sync(&config).await.unwrap();

	let config = config.ignore_files(["notes.txt"]).ignore_folders(["build"]);
	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.files_processed, 0);
	assert_eq!(report.stats.files_deleted, 2);

	let destination = Destination::open(dest.path()).await.unwrap();
	assert!(destination.tree().is_soft_deleted("notes.txt"));
	assert!(destination.tree().is_soft_deleted("build/out.o"));
}

// ===================================================================
// DESTINATIONS
// ===================================================================

#[tokio::test]
async fn test_missing_destination_is_skipped() {
	let origin = TempDir::new().unwrap();
	let present = TempDir::new().unwrap();
	let absent = present.path().join("unplugged-drive");
	create_file(origin.path(), "a.txt", "hello");
	create_file(origin.path(), "sub/b.txt", "world");

	let config = BackupConfig::new(origin.path())
		.add_backup_location(&absent)
		.add_backup_location(present.path());
	let report = sync(&config).await.unwrap();

	assert!(report.is_success());
	assert!(!report.is_total_failure());
	assert_eq!(report.destinations[0].outcome, DestinationOutcome::Skipped);
	assert_eq!(report.destinations[1].outcome, DestinationOutcome::Synced);
	assert!(report.issues.iter().any(|i| i.kind == IssueKind::DestinationSkipped));
	assert!(!absent.exists());

	let destination = Destination::open(present.path()).await.unwrap();
	assert_eq!(destination.tree().live_files().len(), 2);
}

#[tokio::test]
async fn test_all_destinations_missing_is_total_failure() {
	let origin = TempDir::new().unwrap();
	create_file(origin.path(), "a.txt", "hello");
	let config = BackupConfig::new(origin.path()).add_backup_location(origin.path().join("gone"));

	let report = sync(&config).await.unwrap();
	assert!(report.is_total_failure());
	assert_eq!(report.stats.files_processed, 0);
}

#[tokio::test]
async fn test_two_destinations_receive_same_state() {
	let origin = TempDir::new().unwrap();
	let first = TempDir::new().unwrap();
	let second = TempDir::new().unwrap();
	create_file(origin.path(), "a.txt", "hello");
	create_file(origin.path(), "sub/b.txt", "world");

	let config = BackupConfig::new(origin.path())
		.add_backup_location(first.path())
		.add_backup_location(second.path());
	let report = sync(&config).await.unwrap();
	assert_eq!(report.synced_count(), 2);
	assert_eq!(report.stats.versions_recorded, 4);

	let a = Destination::open(first.path()).await.unwrap();
	let b = Destination::open(second.path()).await.unwrap();
	assert_eq!(a.tree(), b.tree());
	assert_eq!(blob_count(first.path()).await, 2);
	assert_eq!(blob_count(second.path()).await, 2);
}

#[tokio::test]
async fn test_corrupt_destination_fails_alone() {
	let origin = TempDir::new().unwrap();
	let broken = TempDir::new().unwrap();
	let healthy = TempDir::new().unwrap();
	create_file(origin.path(), "a.txt", "hello");
	fs::write(broken.path().join(TREE_FILE), b"{ not json").unwrap();

	let config = BackupConfig::new(origin.path())
		.add_backup_location(broken.path())
		.add_backup_location(healthy.path());
	let report = sync(&config).await.unwrap();

	assert!(matches!(report.destinations[0].outcome, DestinationOutcome::Failed(_)));
	assert_eq!(report.destinations[1].outcome, DestinationOutcome::Synced);
	assert!(report.is_partial());
	assert!(!report.is_success());
	assert!(!report.is_total_failure());
	assert!(report.issues.iter().any(|i| i.kind == IssueKind::DestinationFailed));

	// The broken document is left untouched
	assert_eq!(fs::read(broken.path().join(TREE_FILE)).unwrap(), b"{ not json");
	let destination = Destination::open(healthy.path()).await.unwrap();
	assert_eq!(destination.tree().live_files().len(), 1);
}

#[tokio::test]
async fn test_missing_blob_is_rewritten() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a.txt", "hello");
	sync(&config).await.unwrap();

	let store = ContentStore::new(dest.path());
	let hash = util::hash(b"hello");
	fs::remove_file(store.path_for(&hash, ".txt")).unwrap();

	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.blobs_written, 1);
	assert_eq!(report.stats.versions_recorded, 0);
	assert!(store.contains(&hash).await);
}

// ===================================================================
// NAMES
// ===================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_backslash_in_name_is_stable() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a\\b.txt", "live");

	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.versions_recorded, 1);
	assert_eq!(report.stats.files_deleted, 0);
	let tree_before = fs::read(dest.path().join(TREE_FILE)).unwrap();

	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.files_deleted, 0);
	assert_eq!(report.stats.files_undeleted, 0);
	assert_eq!(report.stats.versions_recorded, 0);
	assert_eq!(fs::read(dest.path().join(TREE_FILE)).unwrap(), tree_before);

	let destination = Destination::open(dest.path()).await.unwrap();
	let file = destination.tree().get_file("a\\b.txt").unwrap();
	assert!(file.deleted_at.is_none());
	assert!(destination.tree().get_directory("a").is_none());

	let target = TempDir::new().unwrap();
	let report =
		restore(&config, target.path(), &NoCallbacks, RestoreOptions::default()).await.unwrap();
	assert_eq!(report.restored, 1);
	assert_eq!(fs::read_to_string(target.path().join("a\\b.txt")).unwrap(), "live");
}

// Needs a case-sensitive origin filesystem
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_case_only_duplicate_is_reported_and_skipped() {
	let (origin, dest, config) = setup();
	create_file(origin.path(), "a.txt", "lower");
	create_file(origin.path(), "A.txt", "upper");

	let report = sync(&config).await.unwrap();
	assert_eq!(report.stats.versions_recorded, 1);
	let tree_before = fs::read(dest.path().join(TREE_FILE)).unwrap();

	let report = sync(&config).await.unwrap();
	assert!(report.is_success());
	assert_eq!(report.stats.versions_recorded, 0);
	assert_eq!(report.stats.files_deleted, 0);
	assert_eq!(fs::read(dest.path().join(TREE_FILE)).unwrap(), tree_before);

	let collisions: Vec<_> =
		report.issues.iter().filter(|i| i.kind == IssueKind::NameCollision).collect();
	assert_eq!(collisions.len(), 1);
	assert_eq!(collisions[0].path.as_deref(), Some("a.txt"));

	let destination = Destination::open(dest.path()).await.unwrap();
	let file = destination.tree().get_file("A.txt").unwrap();
	assert_eq!(file.versions.len(), 1);
	assert_eq!(file.latest_hash(), Some(&util::hash(b"upper")));
}
