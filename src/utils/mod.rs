//! Utility modules for the command line front end

pub mod signal;

pub use signal::install_cancel_handler;

// vim: ts=4
