//! Adapter-local error type, folded into [`collab_types::error::Error`] at the boundary.

use std::fmt;

#[derive(Debug)]
pub enum Error {
	DbError(String),
	IoError(String),
	SerializationError(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::DbError(msg) => write!(f, "database error: {msg}"),
			Error::IoError(msg) => write!(f, "I/O error: {msg}"),
			Error::SerializationError(msg) => write!(f, "serialization error: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

/// Every adapter failure is `Transient`: redb errors are local-disk failures the provider
/// should retry through the breaker and offline queue rather than treat as a permanent
/// denial (the adapter has no authorization concept of its own to map to `Denied`).
impl From<Error> for collab_types::error::Error {
	fn from(err: Error) -> Self {
		collab_types::error::Error::Transient(err.to_string())
	}
}

// vim: ts=4
