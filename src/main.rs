use clap::{Arg, Command};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs as afs;

use ibs::destination::{Destination, VerifyProblem};
use ibs::logging::*;
use ibs::progress::CliProgressCallback;
use ibs::restore::{restore, RestoreOptions};
use ibs::sync::{sync_with_callbacks, CancelFlag, DestinationOutcome, SyncOptions, SyncReport};
use ibs::tree::DirectoryNode;
use ibs::utils::install_cancel_handler;
use ibs::BackupConfig;

///////////////////////
// Command handlers //
///////////////////////

async fn cmd_init(origin: &Path, backup: &Path) -> Result<(), Box<dyn Error>> {
	if !afs::metadata(origin).await.map(|m| m.is_dir()).unwrap_or(false) {
		return Err(format!("{} is not a directory", origin.display()).into());
	}
	afs::create_dir_all(backup)
		.await
		.map_err(|err| format!("Cannot create directory {}: {}", backup.display(), err))?;

	let config = BackupConfig::create(origin, backup);
	let path = config.save().await?;
	println!("Created {}", path.display());
	Ok(())
}

async fn cmd_sync(origin: &Path) -> Result<(), Box<dyn Error>> {
	let config = BackupConfig::load_from_origin(origin).await?;

	let cancel = CancelFlag::default();
	install_cancel_handler(cancel.clone());

	let progress = CliProgressCallback::new("Syncing");
	let result = sync_with_callbacks(&config, &progress, SyncOptions::with_cancel(cancel)).await;
	progress.finish();

	let report = result?;
	print_report(&report);
	if report.is_total_failure() {
		return Err("No destination was synced".into());
	}
	Ok(())
}

fn print_report(report: &SyncReport) {
	for dest in &report.destinations {
		let outcome = match &dest.outcome {
			DestinationOutcome::Synced => "synced".to_string(),
			DestinationOutcome::Skipped => "skipped (not found)".to_string(),
			DestinationOutcome::Failed(reason) => format!("FAILED: {}", reason),
		};
		println!("{}: {}", dest.root.display(), outcome);
	}

	let stats = &report.stats;
	println!(
		"{} files ({:.1} MB) in {:.1?}: {} new versions, {} blobs written, {} deleted, {} undeleted, {} skipped",
		stats.files_processed,
		stats.bytes_hashed as f64 / ibs::progress::BYTES_PER_MB,
		report.duration,
		stats.versions_recorded,
		stats.blobs_written,
		stats.files_deleted,
		stats.files_undeleted,
		stats.files_skipped
	);
	for issue in &report.issues {
		println!("  {}", issue);
	}
}

async fn cmd_restore(
	origin: &Path,
	target: &Path,
	subpath: Option<String>,
) -> Result<(), Box<dyn Error>> {
	let config = BackupConfig::load_from_origin(origin).await?;
	let progress = CliProgressCallback::new("Restoring");
	let result = restore(&config, target, &progress, RestoreOptions { subpath }).await;
	progress.finish();

	let report = result?;
	println!(
		"Restored {} files ({:.1} MB) from {}, {} already present",
		report.restored,
		report.bytes_restored as f64 / ibs::progress::BYTES_PER_MB,
		report.source.display(),
		report.already_present
	);
	for path in &report.missing_blobs {
		println!("  missing blob: {}", path);
	}
	for (path, message) in &report.failed {
		println!("  failed: {}: {}", path, message);
	}
	Ok(())
}

async fn cmd_dump(root: &Path) -> Result<(), Box<dyn Error>> {
	if !Destination::exists(root).await {
		return Err(format!("{} does not exist", root.display()).into());
	}
	let destination = Destination::open(root).await?;
	let meta = destination.metadata();
	println!(
		"format v{}, last sync: {}",
		meta.version,
		meta.last_write_time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
	);
	dump_directory(destination.tree().root(), 0);
	Ok(())
}

fn dump_directory(dir: &DirectoryNode, depth: usize) {
	let indent = "  ".repeat(depth);
	for (name, sub) in dir.directories.iter() {
		println!("{}{}/", indent, name);
		dump_directory(sub, depth + 1);
	}
	for (name, file) in dir.files.iter() {
		let latest = file.latest().map(|v| format!("{:?} @ {}", v.hash, v.saved_at.to_rfc3339()));
		let deleted =
			file.deleted_at.map(|t| format!(" [deleted {}]", t.to_rfc3339())).unwrap_or_default();
		println!(
			"{}{} ({} versions, latest {}){}",
			indent,
			name,
			file.versions.len(),
			latest.unwrap_or_else(|| "none".to_string()),
			deleted
		);
	}
}

async fn cmd_verify(root: &Path) -> Result<(), Box<dyn Error>> {
	if !Destination::exists(root).await {
		return Err(format!("{} does not exist", root.display()).into());
	}
	let destination = Destination::open(root).await?;
	let problems = destination.verify().await?;
	if problems.is_empty() {
		println!("{}: all live files verified", root.display());
		return Ok(());
	}
	for problem in &problems {
		match problem {
			VerifyProblem::MissingBlob { path, hash } => println!("missing blob {:?}: {}", hash, path),
			VerifyProblem::CorruptBlob { path, hash, actual } => {
				println!("corrupt blob {:?} (content {:?}): {}", hash, actual, path)
			}
			VerifyProblem::NoVersions { path } => println!("no versions: {}", path),
		}
	}
	Err(format!("{} problems found", problems.len()).into())
}

fn path_arg(matches: &clap::ArgMatches, name: &str) -> Result<PathBuf, Box<dyn Error>> {
	matches
		.get_one::<String>(name)
		.map(PathBuf::from)
		.ok_or_else(|| format!("{} argument required", name).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	init_tracing();

	let matches = Command::new("ibs")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Incremental, versioned directory backup")
		.subcommand_required(true)
		.subcommand(
			Command::new("init")
				.about("Create backup_config.json in the origin")
				.arg(Arg::new("origin").required(true))
				.arg(Arg::new("backup").required(true)),
		)
		.subcommand(
			Command::new("sync")
				.about("Back up the origin into its destinations")
				.arg(Arg::new("origin").required(true)),
		)
		.subcommand(
			Command::new("restore")
				.about("Restore the latest backup into a directory")
				.arg(Arg::new("origin").required(true))
				.arg(Arg::new("target").required(true))
				.arg(
					Arg::new("subpath")
						.short('s')
						.long("subpath")
						.value_name("PATH")
						.help("Restore only files under this relative path"),
				),
		)
		.subcommand(
			Command::new("dump")
				.about("Print the directory tree of a destination")
				.arg(Arg::new("destination").required(true)),
		)
		.subcommand(
			Command::new("verify")
				.about("Check the blobs of every live file in a destination")
				.arg(Arg::new("destination").required(true)),
		)
		.get_matches();

	match matches.subcommand() {
		Some(("init", sub)) => cmd_init(&path_arg(sub, "origin")?, &path_arg(sub, "backup")?).await,
		Some(("sync", sub)) => cmd_sync(&path_arg(sub, "origin")?).await,
		Some(("restore", sub)) => {
			let subpath = sub.get_one::<String>("subpath").cloned();
			cmd_restore(&path_arg(sub, "origin")?, &path_arg(sub, "target")?, subpath).await
		}
		Some(("dump", sub)) => cmd_dump(&path_arg(sub, "destination")?).await,
		Some(("verify", sub)) => cmd_verify(&path_arg(sub, "destination")?).await,
		_ => Ok(()),
	}
}

// vim: ts=4
