//! Append-and-fetch API against the durable backing store.
//!
//! Authorization is enforced by the store itself; this trait's job is to make not-found
//! and forbidden indistinguishable on the wire (`Error::Denied`) so the provider can't be
//! used to enumerate documents it isn't allowed to see.

use async_trait::async_trait;

use collab_types::prelude::*;

/// Result of a successful append: the assigned sequence, plus an opaque version token the
/// backing store may use for optimistic-concurrency bookkeeping. The provider only ever
/// reads `sequence`; `new_version` is threaded through untouched for adapters that want it.
#[derive(Clone, Debug)]
pub struct AppendResult {
	pub sequence: Sequence,
	pub new_version: Option<String>,
}

#[async_trait]
pub trait UpdateLogClient: Send + Sync {
	/// Atomically assigns the next sequence and stores `bytes`. Fails `Denied` (not-found
	/// or forbidden, indistinguishable), `Conflict` (version race, treated like `Transient`
	/// by the caller), or `Transient` (timeout, network, store unavailable).
	async fn append(&self, document_id: &DocumentId, bytes: Vec<u8>) -> CollabResult<AppendResult>;

	/// Updates strictly after `since_seq`, ascending order. Bounded by `page_size`; callers
	/// that need the full tail loop until a short page (or empty page) is returned.
	async fn since(
		&self,
		document_id: &DocumentId,
		since_seq: Sequence,
		page_size: usize,
	) -> CollabResult<Vec<(Sequence, Vec<u8>)>>;
}

/// Loops `since` until a page shorter than `page_size` comes back, draining the full tail.
pub async fn drain_since(
	client: &dyn UpdateLogClient,
	document_id: &DocumentId,
	mut cursor: Sequence,
	page_size: usize,
) -> CollabResult<Vec<(Sequence, Vec<u8>)>> {
	let mut all = Vec::new();
	loop {
		let page = client.since(document_id, cursor, page_size).await?;
		let page_len = page.len();
		if let Some((last_seq, _)) = page.last() {
			cursor = *last_seq;
		}
		all.extend(page);
		if page_len < page_size {
			break;
		}
	}
	Ok(all)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex as StdMutex;

	struct FakeLog {
		pages: StdMutex<Vec<Vec<(Sequence, Vec<u8>)>>>,
	}

	#[async_trait]
	impl UpdateLogClient for FakeLog {
		async fn append(&self, _document_id: &DocumentId, _bytes: Vec<u8>) -> CollabResult<AppendResult> {
			unreachable!("not exercised by these tests")
		}

		async fn since(
			&self,
			_document_id: &DocumentId,
			_since_seq: Sequence,
			_page_size: usize,
		) -> CollabResult<Vec<(Sequence, Vec<u8>)>> {
			let mut pages = self.pages.lock().unwrap();
			Ok(if pages.is_empty() { Vec::new() } else { pages.remove(0) })
		}
	}

	#[tokio::test]
	async fn drains_multiple_pages() {
		let log = FakeLog {
			pages: StdMutex::new(vec![
				vec![(Sequence(1), vec![1]), (Sequence(2), vec![2])],
				vec![(Sequence(3), vec![3])],
			]),
		};

		let result = drain_since(&log, &DocumentId::new("D1"), Sequence::ZERO, 2).await.unwrap();
		assert_eq!(result.len(), 3);
		assert_eq!(result[2].0, Sequence(3));
	}
}
