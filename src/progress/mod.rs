//! Progress display callback for the CLI
//!
//! Renders a single, throttled status line on stderr with the running file
//! count, hashed megabytes and the file currently being processed. Issues
//! are not printed here; they are logged by the engine and summarized by the
//! binary after the run.

pub mod constants;

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use crate::callbacks::{ProgressStats, SyncCallbacks};

/// Progress display constants
pub use constants::*;

/// Shared state for progress tracking
#[derive(Debug)]
pub struct ProgressState {
	pub last_update: Mutex<Instant>,
	pub current_path: Mutex<String>,
}

impl ProgressState {
	pub fn new() -> Self {
		Self { last_update: Mutex::new(Instant::now()), current_path: Mutex::new(String::new()) }
	}
}

impl Default for ProgressState {
	fn default() -> Self {
		Self::new()
	}
}

/// CLI progress callback for sync and restore runs
pub struct CliProgressCallback {
	state: ProgressState,
	label: &'static str,
}

impl CliProgressCallback {
	/// `label` prefixes the status line ("Syncing", "Restoring")
	pub fn new(label: &'static str) -> Self {
		Self { state: ProgressState::new(), label }
	}

	/// Clear the status line once the run is over
	pub fn finish(&self) {
		let _ = write!(std::io::stderr(), "\r{}\r", " ".repeat(MAX_PATH_DISPLAY + 40));
		let _ = std::io::stderr().flush();
	}
}

impl SyncCallbacks for CliProgressCallback {
	fn on_working_on(&self, path: &Path) {
		*self.state.current_path.lock().unwrap_or_else(|e| e.into_inner()) =
			shorten(&path.display().to_string(), MAX_PATH_DISPLAY);
	}

	fn on_progress(&self, stats: ProgressStats) {
		// Throttle updates to avoid spamming the terminal
		let mut last = self.state.last_update.lock().unwrap_or_else(|e| e.into_inner());
		if last.elapsed().as_millis() < UPDATE_THROTTLE_MS {
			return;
		}
		*last = Instant::now();
		drop(last);

		let current = self.state.current_path.lock().unwrap_or_else(|e| e.into_inner());
		let _ = write!(
			std::io::stderr(),
			"\r  {}: {} files, {:.1} MB | {:<width$}",
			self.label,
			stats.files_processed,
			stats.bytes_processed as f64 / BYTES_PER_MB,
			current.as_str(),
			width = MAX_PATH_DISPLAY
		);
		let _ = std::io::stderr().flush();
	}
}

/// Keep the tail of `text`, prefixed with an ellipsis when cut
fn shorten(text: &str, max: usize) -> String {
	let count = text.chars().count();
	if count <= max {
		return text.to_string();
	}
	let tail: String = text.chars().skip(count - max + 3).collect();
	format!("...{}", tail)
}


// vim: ts=4
