//! Progress display constants

/// Bytes per megabyte for display conversions
pub const BYTES_PER_MB: f64 = 1_000_000.0;

/// Throttle updates to this many milliseconds
pub const UPDATE_THROTTLE_MS: u128 = 100;

/// Longest path shown on the status line
pub const MAX_PATH_DISPLAY: usize = 60;
