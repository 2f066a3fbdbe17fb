/// Config persistence tests - documents written by hand or by older releases
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use ibs::config::CONFIG_FILE;
use ibs::sync::sync;
use ibs::{BackupConfig, ConfigError};

#[tokio::test]
async fn test_init_then_sync_from_saved_config() {
	let origin = TempDir::new().unwrap();
	let dest = TempDir::new().unwrap();
	fs::write(origin.path().join("a.txt"), "hello").unwrap();
	fs::write(origin.path().join("desktop.ini"), "[.ShellClassInfo]").unwrap();

	BackupConfig::create(origin.path(), dest.path()).save().await.unwrap();
	let config = BackupConfig::load_from_origin(origin.path()).await.unwrap();
	let report = sync(&config).await.unwrap();

	// a.txt and the config document itself
	assert_eq!(report.stats.files_processed, 2);
	assert!(report.is_success());
}

#[tokio::test]
async fn test_legacy_storage_destination_is_normalized() {
	let origin = TempDir::new().unwrap();
	let dest = TempDir::new().unwrap();
	let legacy = format!(
		r#"{{
			"originDirectory": {origin:?},
			"backupDirectories": [{storage:?}],
			"ignoredFileExtensions": [".tmp",],
		}}"#,
		origin = origin.path().to_string_lossy(),
		storage = dest.path().join("_Storage").to_string_lossy(),
	);
	fs::write(origin.path().join(CONFIG_FILE), legacy).unwrap();

	let config = BackupConfig::load_from_origin(origin.path()).await.unwrap();
	assert_eq!(config.backup_directories, vec![dest.path().to_path_buf()]);
	assert_eq!(config.ignored_file_extensions, vec![".tmp".to_string()]);

	// Saving writes the normalized destination back
	config.save().await.unwrap();
	let text = fs::read_to_string(origin.path().join(CONFIG_FILE)).unwrap();
	assert!(!text.contains("_Storage"));
}

#[tokio::test]
async fn test_round_trip_preserves_every_rule() {
	let origin = TempDir::new().unwrap();
	let config = BackupConfig::create(origin.path(), "/mnt/a")
		.add_backup_location("/mnt/b")
		.ignore_paths([origin.path().join("cache")])
		.ignore_extensions(["iso"])
		.ignore_files(["Thumbs.db"])
		.ignore_prefixes(["~"])
		.ignore_folders(["node_modules"]);

	config.save().await.unwrap();
	let loaded = BackupConfig::load_from_origin(origin.path()).await.unwrap();
	assert_eq!(loaded, config);
	assert_eq!(loaded.backup_directories, vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")]);
	assert!(loaded.ignored_file_extensions.contains(&".iso".to_string()));
}

#[tokio::test]
async fn test_missing_config() {
	let origin = TempDir::new().unwrap();
	let err = BackupConfig::load_from_origin(origin.path()).await.unwrap_err();
	assert!(matches!(err, ConfigError::LoadFailed { .. }));
}
