//! Error taxonomy for the collaboration provider.

pub type CollabResult<T> = std::result::Result<T, Error>;

/// The closed set of failure kinds the breaker and the provider reason about.
///
/// Every adapter-level error (I/O, serialization, transport) is folded into one of
/// these at the boundary so the breaker's counting logic and the provider's state
/// machine never see an open-ended error type.
#[derive(Debug)]
pub enum Error {
	/// Codec rejected bytes (too short, or failed a library-specific structural check).
	InvalidUpdate(String),

	/// `decode` was given a string that isn't valid base64.
	InvalidEncoding(String),

	/// Backing store refused the operation. Not-found and forbidden are indistinguishable
	/// on purpose (see `UpdateLogClient::append`).
	Denied,

	/// Timeout, network failure, or a 5xx-equivalent from an adapter. Retryable.
	Transient(String),

	/// Append was rejected due to a version/sequence conflict. Treated like `Transient`.
	Conflict,

	/// A breaker short-circuited the call before it reached the underlying operation.
	CircuitOpen(&'static str),

	/// A sequence discontinuity was observed on the realtime channel. Internal; triggers
	/// catch-up. Not expected to escape the provider.
	Gap { document_id: String, expected: u64, got: u64 },

	/// A provider was asked to do something that requires a `projectId` without one.
	MissingProjectId,

	Io(String),
	Serde(String),
	Internal(String),
}

impl Error {
	/// A stable short code for status reporting and tests, independent of the `Debug` form.
	pub fn kind(&self) -> &'static str {
		match self {
			Error::InvalidUpdate(_) => "invalid-update",
			Error::InvalidEncoding(_) => "invalid-encoding",
			Error::Denied => "denied",
			Error::Transient(_) => "transient",
			Error::Conflict => "conflict",
			Error::CircuitOpen(_) => "circuit-open",
			Error::Gap { .. } => "gap",
			Error::MissingProjectId => "missing-project-id",
			Error::Io(_) => "io",
			Error::Serde(_) => "serde",
			Error::Internal(_) => "internal",
		}
	}

	/// Whether this error should drive the provider into the queue-and-retry path rather
	/// than a fatal one. `Conflict` and `CircuitOpen` are folded into `Transient` handling
	/// per the spec's error policy table.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::Transient(_) | Error::Conflict | Error::CircuitOpen(_))
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::InvalidUpdate(msg) => write!(f, "invalid update: {msg}"),
			Error::InvalidEncoding(msg) => write!(f, "invalid encoding: {msg}"),
			Error::Denied => write!(f, "denied"),
			Error::Transient(msg) => write!(f, "transient error: {msg}"),
			Error::Conflict => write!(f, "append conflict"),
			Error::CircuitOpen(name) => write!(f, "circuit '{name}' is open"),
			Error::Gap { document_id, expected, got } => {
				write!(f, "sequence gap on {document_id}: expected {expected}, got {got}")
			}
			Error::MissingProjectId => write!(f, "provider requires a projectId"),
			Error::Io(msg) => write!(f, "io error: {msg}"),
			Error::Serde(msg) => write!(f, "serialization error: {msg}"),
			Error::Internal(msg) => write!(f, "internal error: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Io(err.to_string())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serde(err.to_string())
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		Error::Internal(format!("task join failed: {err}"))
	}
}
