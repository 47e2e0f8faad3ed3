//! Durable-shaped FIFO for updates produced while `persist` is unavailable.
//!
//! The default `MemoryQueueStore` is process-local (lost on restart, matching the
//! teacher's in-memory adapter caches elsewhere); embedders that need survival across
//! restarts provide their own `QueueStore` backed by disk or a database, the same seam
//! the update log and the realtime channel use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use collab_types::prelude::*;

/// One queued local update, tagged with how many drain attempts have failed so far.
#[derive(Clone, Debug)]
pub struct QueuedOperation {
	pub key: u64,
	pub document_id: DocumentId,
	pub bytes: Vec<u8>,
	pub enqueued_at: Timestamp,
	pub attempts: u32,
}

/// Storage seam for the offline queue, keyed by `documentId` so one store can be shared
/// across providers for several documents without their queues colliding. `MemoryQueueStore`
/// is the default; an embedder can swap in a durable implementation without the provider's
/// drain loop changing.
#[async_trait]
pub trait QueueStore: Send + Sync {
	async fn push(&self, document_id: DocumentId, bytes: Vec<u8>) -> CollabResult<u64>;

	/// Operations for `document_id` in enqueue order, oldest first. Does not remove them.
	async fn peek_all(&self, document_id: &DocumentId) -> CollabResult<Vec<QueuedOperation>>;

	async fn remove(&self, document_id: &DocumentId, key: u64) -> CollabResult<()>;

	async fn record_attempt(&self, document_id: &DocumentId, key: u64) -> CollabResult<u32>;

	async fn len(&self, document_id: &DocumentId) -> CollabResult<usize>;
}

struct MemoryState {
	entries: VecDeque<QueuedOperation>,
	next_key: u64,
}

pub struct MemoryQueueStore {
	state: Mutex<MemoryState>,
}

impl MemoryQueueStore {
	pub fn new() -> Self {
		Self { state: Mutex::new(MemoryState { entries: VecDeque::new(), next_key: 1 }) }
	}
}

impl Default for MemoryQueueStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
	async fn push(&self, document_id: DocumentId, bytes: Vec<u8>) -> CollabResult<u64> {
		let mut state = self.state.lock().await;
		let key = state.next_key;
		state.next_key += 1;
		state.entries.push_back(QueuedOperation {
			key,
			document_id,
			bytes,
			enqueued_at: Timestamp::now(),
			attempts: 0,
		});
		Ok(key)
	}

	async fn peek_all(&self, document_id: &DocumentId) -> CollabResult<Vec<QueuedOperation>> {
		let state = self.state.lock().await;
		Ok(state.entries.iter().filter(|entry| &entry.document_id == document_id).cloned().collect())
	}

	async fn remove(&self, document_id: &DocumentId, key: u64) -> CollabResult<()> {
		let mut state = self.state.lock().await;
		state.entries.retain(|entry| !(entry.key == key && &entry.document_id == document_id));
		Ok(())
	}

	async fn record_attempt(&self, document_id: &DocumentId, key: u64) -> CollabResult<u32> {
		let mut state = self.state.lock().await;
		let entry =
			state.entries.iter_mut().find(|entry| entry.key == key && &entry.document_id == document_id);
		match entry {
			Some(entry) => {
				entry.attempts += 1;
				Ok(entry.attempts)
			}
			None => Err(Error::Internal(format!("queue entry {key} not found"))),
		}
	}

	async fn len(&self, document_id: &DocumentId) -> CollabResult<usize> {
		Ok(self.state.lock().await.entries.iter().filter(|entry| &entry.document_id == document_id).count())
	}
}

/// An operation that exhausted `queue.maxAttempts` and was moved out of the live queue.
#[derive(Clone, Debug)]
pub struct DeadLetter {
	pub operation: QueuedOperation,
	pub last_error: String,
}

/// Wraps a `QueueStore` with the dead-letter side-table the drain loop needs. The DLQ
/// itself is in-memory only: a dead update has already failed `maxAttempts` times against
/// the durable log, so there is no expectation that it is retried after a process restart.
pub struct OfflineQueue {
	store: Arc<dyn QueueStore>,
	document_id: DocumentId,
	max_attempts: u32,
	dead_letters: Mutex<Vec<DeadLetter>>,
	dead_letter_count: AtomicU64,
}

impl OfflineQueue {
	pub fn new(store: Arc<dyn QueueStore>, document_id: DocumentId, max_attempts: u32) -> Self {
		Self {
			store,
			document_id,
			max_attempts,
			dead_letters: Mutex::new(Vec::new()),
			dead_letter_count: AtomicU64::new(0),
		}
	}

	pub async fn enqueue(&self, bytes: Vec<u8>) -> CollabResult<u64> {
		self.store.push(self.document_id.clone(), bytes).await
	}

	pub async fn pending(&self) -> CollabResult<Vec<QueuedOperation>> {
		self.store.peek_all(&self.document_id).await
	}

	pub async fn len(&self) -> CollabResult<usize> {
		self.store.len(&self.document_id).await
	}

	/// Called by the drain loop after a successful persist: the operation leaves the queue.
	pub async fn acknowledge(&self, key: u64) -> CollabResult<()> {
		self.store.remove(&self.document_id, key).await
	}

	/// Called after a failed persist attempt. Once `attempts` reaches `maxAttempts` the
	/// operation moves to the dead-letter set and is removed from the live queue so the
	/// drain loop stops retrying it.
	pub async fn record_failure(&self, operation: &QueuedOperation, error: &Error) -> CollabResult<bool> {
		let attempts = self.store.record_attempt(&self.document_id, operation.key).await?;
		if attempts >= self.max_attempts {
			self.store.remove(&self.document_id, operation.key).await?;
			let mut dead = operation.clone();
			dead.attempts = attempts;
			self.dead_letters.lock().await.push(DeadLetter { operation: dead, last_error: error.to_string() });
			self.dead_letter_count.fetch_add(1, Ordering::Relaxed);
			warn!(
				document_id = %operation.document_id,
				attempts,
				"update moved to dead-letter queue after exhausting retries"
			);
			Ok(true)
		} else {
			Ok(false)
		}
	}

	pub async fn dead_letters(&self) -> Vec<DeadLetter> {
		self.dead_letters.lock().await.clone()
	}

	pub fn dead_letter_count(&self) -> u64 {
		self.dead_letter_count.load(Ordering::Relaxed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn doc() -> DocumentId {
		DocumentId::new("doc-1")
	}

	#[tokio::test]
	async fn fifo_order_is_preserved() {
		let store = MemoryQueueStore::new();
		store.push(doc(), vec![1]).await.unwrap();
		store.push(doc(), vec![2]).await.unwrap();
		let all = store.peek_all(&doc()).await.unwrap();
		assert_eq!(all.len(), 2);
		assert_eq!(all[0].bytes, vec![1]);
		assert_eq!(all[1].bytes, vec![2]);
	}

	#[tokio::test]
	async fn queues_for_different_documents_do_not_collide() {
		let store = Arc::new(MemoryQueueStore::new());
		let other = DocumentId::new("doc-2");
		store.push(doc(), vec![1]).await.unwrap();
		store.push(other.clone(), vec![2]).await.unwrap();

		assert_eq!(store.len(&doc()).await.unwrap(), 1);
		assert_eq!(store.len(&other).await.unwrap(), 1);
		assert_eq!(store.peek_all(&doc()).await.unwrap()[0].bytes, vec![1]);
		assert_eq!(store.peek_all(&other).await.unwrap()[0].bytes, vec![2]);
	}

	#[tokio::test]
	async fn acknowledge_removes_entry() {
		let queue = OfflineQueue::new(Arc::new(MemoryQueueStore::new()), doc(), 5);
		let key = queue.enqueue(vec![9]).await.unwrap();
		queue.acknowledge(key).await.unwrap();
		assert_eq!(queue.len().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn exhausting_attempts_moves_to_dead_letter() {
		let queue = OfflineQueue::new(Arc::new(MemoryQueueStore::new()), doc(), 2);
		let key = queue.enqueue(vec![7]).await.unwrap();
		let pending = queue.pending().await.unwrap();
		let op = pending.into_iter().find(|op| op.key == key).unwrap();

		let moved = queue.record_failure(&op, &Error::Transient("boom".into())).await.unwrap();
		assert!(!moved);
		assert_eq!(queue.len().await.unwrap(), 1);

		let moved = queue.record_failure(&op, &Error::Transient("boom again".into())).await.unwrap();
		assert!(moved);
		assert_eq!(queue.len().await.unwrap(), 0);
		assert_eq!(queue.dead_letter_count(), 1);
	}
}
