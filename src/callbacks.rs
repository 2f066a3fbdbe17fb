//! Callback traits for progress reporting and status display
//!
//! Callbacks are a side channel: the engine invokes them synchronously at
//! fixed points but never depends on them for correctness.

use std::path::Path;
use std::time::Duration;

use crate::sync::SyncIssue;

// Type aliases to reduce complexity
type ProgressFn = dyn Fn(ProgressStats) + Send + Sync;
type WorkingOnFn = dyn Fn(&Path) + Send + Sync;
type IssueFn = dyn Fn(&SyncIssue) + Send + Sync;

/// Progress statistics, sent once per processed origin file
#[derive(Debug, Clone)]
pub struct ProgressStats {
	/// Files processed so far (restored files for a restore)
	pub files_processed: usize,

	/// Bytes read from the origin for hashing (copied bytes for a restore)
	pub bytes_processed: u64,

	/// Elapsed time since start
	pub elapsed: Duration,
}

/// Combined callback handler for all events
pub trait SyncCallbacks: Send + Sync {
	/// Called after each origin file has been reconciled
	fn on_progress(&self, _stats: ProgressStats) {}

	/// Called with the full path of the file about to be processed
	fn on_working_on(&self, _path: &Path) {}

	/// Called on non-fatal problems (skipped files, failed destinations)
	fn on_issue(&self, _issue: &SyncIssue) {}
}

/// Default callback implementation that does nothing
pub struct NoCallbacks;

impl SyncCallbacks for NoCallbacks {}

/// Builder for callbacks using function closures
pub struct CallbackBuilder {
	progress: Option<Box<ProgressFn>>,
	working_on: Option<Box<WorkingOnFn>>,
	issue: Option<Box<IssueFn>>,
}

impl CallbackBuilder {
	pub fn new() -> Self {
		CallbackBuilder { progress: None, working_on: None, issue: None }
	}

	/// Set progress callback
	pub fn on_progress<F>(mut self, callback: F) -> Self
	where
		F: Fn(ProgressStats) + Send + Sync + 'static,
	{
		self.progress = Some(Box::new(callback));
		self
	}

	/// Set status callback
	pub fn on_working_on<F>(mut self, callback: F) -> Self
	where
		F: Fn(&Path) + Send + Sync + 'static,
	{
		self.working_on = Some(Box::new(callback));
		self
	}

	/// Set issue callback
	pub fn on_issue<F>(mut self, callback: F) -> Self
	where
		F: Fn(&SyncIssue) + Send + Sync + 'static,
	{
		self.issue = Some(Box::new(callback));
		self
	}

	pub fn build(self) -> Box<dyn SyncCallbacks> {
		Box::new(CompositeCallbacks {
			progress: self.progress,
			working_on: self.working_on,
			issue: self.issue,
		})
	}
}

impl Default for CallbackBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct CompositeCallbacks {
	progress: Option<Box<ProgressFn>>,
	working_on: Option<Box<WorkingOnFn>>,
	issue: Option<Box<IssueFn>>,
}

impl SyncCallbacks for CompositeCallbacks {
	fn on_progress(&self, stats: ProgressStats) {
		if let Some(ref callback) = self.progress {
			callback(stats);
		}
	}

	fn on_working_on(&self, path: &Path) {
		if let Some(ref callback) = self.working_on {
			callback(path);
		}
	}

	fn on_issue(&self, issue: &SyncIssue) {
		if let Some(ref callback) = self.issue {
			callback(issue);
		}
	}
}


// vim: ts=4
