//! # IBS - Incremental Backup Store
//!
//! IBS backs up one origin directory into any number of destination
//! directories. Each destination keeps a content-addressed blob store and a
//! versioned directory tree, so changed files keep their history and deleted
//! files are only marked as deleted.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ibs::{sync, BackupConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BackupConfig::create("/home/me/Documents", "/mnt/backup");
//!     config.save().await?;
//!
//!     let report = sync(&config).await?;
//!     println!("{} new versions", report.stats.versions_recorded);
//!     Ok(())
//! }
//! ```
//!
//! ## Progress and Cancellation
//!
//! ```rust,ignore
//! use ibs::callbacks::CallbackBuilder;
//! use ibs::sync::{sync_with_callbacks, CancelFlag, SyncOptions};
//!
//! let cancel = CancelFlag::default();
//! let callbacks = CallbackBuilder::new()
//!     .on_working_on(|path| eprintln!("{}", path.display()))
//!     .build();
//! let report = sync_with_callbacks(&config, callbacks.as_ref(), SyncOptions::with_cancel(cancel)).await?;
//! ```

pub mod callbacks;
pub mod config;
pub mod destination;
pub mod error;
pub mod logging;
pub mod progress;
pub mod restore;
pub mod store;
pub mod sync;
pub mod tree;
pub mod types;
pub mod util;
pub mod utils;

// Re-export commonly used types and functions
pub use config::BackupConfig;
pub use destination::{BackupMetaData, Destination};
pub use error::{BackupError, ConfigError, StoreError, TreeError};
pub use restore::{restore, RestoreOptions, RestoreReport};
pub use store::ContentStore;
pub use sync::{sync, SyncOptions, SyncReport};
pub use tree::{DirectoryNode, DirectoryTree, FileNode, Version};
pub use types::{ContentHash, Timestamp, EMPTY_FILE_HASH};

// vim: ts=4
