//! Identifiers and scalar types shared across the provider, its adapters, and tests.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Opaque project scope. A topic or an append can never be constructed without one
/// (invariant 1 in the data model).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProjectId(pub Box<str>);

impl ProjectId {
	pub fn new(id: impl Into<Box<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for ProjectId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Opaque document identifier, scoped by a `ProjectId` but not itself carrying one.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DocumentId(pub Box<str>);

impl DocumentId {
	pub fn new(id: impl Into<Box<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for DocumentId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Monotonic sequence number assigned by the append log, per document.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sequence(pub u64);

impl Sequence {
	pub const ZERO: Sequence = Sequence(0);

	pub fn next(self) -> Sequence {
		Sequence(self.0 + 1)
	}
}

impl std::fmt::Display for Sequence {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Unix-seconds timestamp with the manual trait impls this codebase uses for its own
/// `Timestamp` type, so records round-trip through JSON as a plain integer.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let since_epoch =
			SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(since_epoch.as_secs() as i64)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl PartialEq for Timestamp {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Timestamp {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.0.cmp(&other.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

/// The realtime topic name for a `(projectId, documentId)` pair. Invariant 1: this is the
/// only way to produce a topic string, and it always embeds both ids.
pub fn topic_name(project_id: &ProjectId, document_id: &DocumentId) -> String {
	format!("updates:{}:{}", project_id.0, document_id.0)
}
