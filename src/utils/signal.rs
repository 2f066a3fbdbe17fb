//! Signal handling: turn SIGINT/SIGTERM into a cancellation request
//!
//! The first signal sets the run's cancel flag so the engine stops between
//! files and leaves every destination as it was. A second signal exits
//! immediately.

use std::sync::atomic::Ordering;
use tokio::signal;

use crate::logging::*;
use crate::sync::CancelFlag;

/// Spawn a task flipping `cancel` on the first termination signal
pub fn install_cancel_handler(cancel: CancelFlag) {
	tokio::spawn(async move {
		wait_for_signal().await;
		warn!("Interrupted, stopping after the current file...");
		cancel.store(true, Ordering::SeqCst);

		wait_for_signal().await;
		warn!("Interrupted again, exiting without saving");
		std::process::exit(130); // 128 + SIGINT(2)
	});
}

#[cfg(unix)]
async fn wait_for_signal() {
	let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
		Ok(stream) => stream,
		Err(e) => {
			warn!("Failed to setup SIGTERM handler: {}. Only Ctrl-C will cancel.", e);
			let _ = signal::ctrl_c().await;
			return;
		}
	};

	tokio::select! {
		_ = sigterm.recv() => debug!("Received SIGTERM"),
		_ = signal::ctrl_c() => debug!("Received SIGINT"),
	}
}

#[cfg(not(unix))]
async fn wait_for_signal() {
	if let Err(e) = signal::ctrl_c().await {
		warn!("Failed to listen for Ctrl-C: {}", e);
		std::future::pending::<()>().await;
	}
}

// vim: ts=4
