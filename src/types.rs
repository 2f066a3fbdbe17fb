//! Shared value types

use chrono::{DateTime, Utc};
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Wall-clock instant used for versions, deletions and metadata
pub type Timestamp = DateTime<Utc>;

/// SHA-256 digest of an empty file
pub const EMPTY_FILE_HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Length of the shard prefix used for blob directories
pub const SHARD_PREFIX_LEN: usize = 3;

/// Lowercase hex SHA-256 digest addressing a blob
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(String);

impl ContentHash {
	pub fn from_digest(digest: [u8; 32]) -> Self {
		ContentHash(hex::encode(digest))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Short prefix selecting the shard directory
	pub fn prefix(&self) -> &str {
		&self.0[..SHARD_PREFIX_LEN]
	}
}

impl FromStr for ContentHash {
	type Err = StoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let valid = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
		if valid {
			Ok(ContentHash(s.to_string()))
		} else {
			Err(StoreError::InvalidHash { value: s.to_string() })
		}
	}
}

impl fmt::Display for ContentHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for ContentHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ContentHash({})", &self.0[..12])
	}
}

impl Serialize for ContentHash {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for ContentHash {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(de::Error::custom)
	}
}


// vim: ts=4
