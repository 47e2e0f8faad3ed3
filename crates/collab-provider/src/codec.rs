//! Transport-safe encoding and defensive validation for CRDT update bytes.
//!
//! `applyUpdate` on the underlying CRDT library is not total: malformed input can corrupt
//! state. This is the single choke point for bytes crossing a trust boundary (the realtime
//! channel, the update log) before they ever reach the document.

use base64::{engine::general_purpose::STANDARD, Engine};

use collab_types::prelude::*;

#[derive(Clone, Copy, Debug)]
pub struct Codec {
	min_update_bytes: usize,
}

impl Codec {
	pub fn new(min_update_bytes: usize) -> Self {
		Self { min_update_bytes }
	}

	/// Structural check only: length floor plus whatever header sanity the caller's CRDT
	/// binding adds on top (see `crdt::CrdtDocument::looks_like_update`). Used before every
	/// `applyUpdate`, on both the local-emit and remote-apply paths.
	pub fn validate(&self, bytes: &[u8]) -> bool {
		bytes.len() >= self.min_update_bytes
	}

	/// Base64-encode for transport. Rejects anything that wouldn't pass `validate`, so a
	/// caller can't accidentally round-trip a payload too small for the CRDT library to
	/// apply safely.
	pub fn encode(&self, bytes: &[u8]) -> CollabResult<String> {
		if !self.validate(bytes) {
			return Err(Error::InvalidUpdate(format!(
				"update is {} bytes, below the {}-byte floor",
				bytes.len(),
				self.min_update_bytes
			)));
		}
		Ok(STANDARD.encode(bytes))
	}

	/// Inverse of `encode`. A malformed base64 string is `InvalidEncoding`, distinct from an
	/// `InvalidUpdate` (the string decoded fine, but the payload itself fails `validate`).
	pub fn decode(&self, encoded: &str) -> CollabResult<Vec<u8>> {
		STANDARD.decode(encoded).map_err(|err| Error::InvalidEncoding(err.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn codec() -> Codec {
		Codec::new(4)
	}

	#[test]
	fn rejects_payload_below_floor() {
		let err = codec().encode(&[0, 1]).unwrap_err();
		assert_eq!(err.kind(), "invalid-update");
	}

	#[test]
	fn round_trips_valid_payload() {
		let codec = codec();
		let bytes = [0u8, 1, 1, 0, 0, 0, 0, 0];
		let encoded = codec.encode(&bytes).unwrap();
		let decoded = codec.decode(&encoded).unwrap();
		assert_eq!(decoded, bytes);
	}

	#[test]
	fn rejects_malformed_base64() {
		let err = codec().decode("not valid base64!!").unwrap_err();
		assert_eq!(err.kind(), "invalid-encoding");
	}

	#[test]
	fn validate_is_a_pure_length_floor() {
		let codec = codec();
		assert!(!codec.validate(&[0, 1, 2]));
		assert!(codec.validate(&[0, 1, 2, 3]));
	}
}
