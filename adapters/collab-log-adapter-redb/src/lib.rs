//! Redb-based Update Log Client.
//!
//! Implements [`collab_provider::UpdateLogClient`] with redb for persistent storage of
//! binary CRDT updates and per-document metadata.
//!
//! # Storage Layout
//!
//! - `updates` — binary CRDT update bytes indexed by `(doc_id, sequence)`, with `sequence`
//!   zero-padded in the key so byte order matches numeric order.
//! - `metadata` — document metadata as JSON.
//!
//! # Multi-Tenancy
//!
//! Two storage modes, configured at construction:
//!
//! ## Per-Project Files Mode (`per_project_files=true`)
//! Each project has its own redb file: `{storage_path}/project_{projectId}.db`.
//!
//! ## Single File Mode (`per_project_files=false`)
//! All projects share one redb file: `{storage_path}/collab.db`.
//!
//! # Sequence Assignment
//!
//! `append` derives the next sequence by scanning the document's existing keys inside the
//! same write transaction redb uses to insert the new one, rather than from an in-memory
//! counter — sequence numbers must survive a process restart (the provider trusts
//! `lastAppliedSeq` across reconnects), and an in-memory counter would silently reset to
//! zero on restart and violate that.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use redb::{ReadableDatabase, ReadableTable};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use collab_provider::{AppendResult, UpdateLogClient};
use collab_types::prelude::*;

mod error;
pub use error::Error as AdapterError;

/// Tunables for the in-memory side of the adapter (the broadcaster cache). Storage
/// durability itself has no knobs beyond the file layout chosen at construction.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
	pub broadcast_capacity: usize,
}

impl Default for AdapterConfig {
	fn default() -> Self {
		Self { broadcast_capacity: 1000 }
	}
}

mod tables {
	use redb::TableDefinition;

	/// `doc_id:0-padded-sequence` -> update bytes.
	pub const TABLE_UPDATES: TableDefinition<&str, &[u8]> = TableDefinition::new("collab_updates");

	/// `doc_id` -> metadata JSON.
	pub const TABLE_METADATA: TableDefinition<&str, &str> = TableDefinition::new("collab_metadata");
}

use tables::*;

/// Live-tail broadcaster for one document, shared by concurrent `since` callers.
type DocBroadcaster = tokio::sync::broadcast::Sender<(Sequence, Vec<u8>)>;

struct DocumentInstance {
	broadcaster: DocBroadcaster,
	last_accessed: AtomicU64,
}

impl DocumentInstance {
	fn new(broadcaster: DocBroadcaster) -> Self {
		Self { broadcaster, last_accessed: AtomicU64::new(Timestamp::now().0 as u64) }
	}

	fn touch(&self) {
		self.last_accessed.store(Timestamp::now().0 as u64, Ordering::Relaxed);
	}
}

/// Zero-padded so `key1 < key2` in byte order iff `seq1 < seq2` in numeric order — redb's
/// range scans iterate in key byte order, and `since` depends on ascending sequence.
fn make_update_key(doc_id: &str, seq: u64) -> String {
	format!("{doc_id}:{seq:020}")
}

fn key_prefix(doc_id: &str) -> String {
	format!("{doc_id}:")
}

pub struct UpdateLogClientRedb {
	storage_path: PathBuf,
	per_project_files: bool,
	config: AdapterConfig,
	file_databases: Arc<RwLock<HashMap<PathBuf, Arc<redb::Database>>>>,
	doc_instances: Arc<DashMap<String, Arc<DocumentInstance>>>,
}

impl UpdateLogClientRedb {
	pub async fn new(
		storage_path: impl AsRef<Path>,
		per_project_files: bool,
		config: AdapterConfig,
	) -> CollabResult<Self> {
		let storage_path = storage_path.as_ref().to_path_buf();

		std::fs::create_dir_all(&storage_path)
			.map_err(|err| AdapterError::IoError(format!("failed to create storage directory: {err}")))?;

		debug!(?storage_path, per_project_files, "initializing update log adapter");

		Ok(Self {
			storage_path,
			per_project_files,
			config,
			file_databases: Arc::new(RwLock::new(HashMap::new())),
			doc_instances: Arc::new(DashMap::new()),
		})
	}

	async fn get_or_open_db_file(&self, db_path: PathBuf) -> CollabResult<Arc<redb::Database>> {
		{
			let cache = self.file_databases.read().await;
			if let Some(db) = cache.get(&db_path) {
				return Ok(Arc::clone(db));
			}
		}

		let db = redb::Database::create(db_path.clone())
			.map_err(|err| AdapterError::DbError(format!("failed to open database: {err}")))?;

		let tx = db
			.begin_write()
			.map_err(|err| AdapterError::DbError(format!("failed to begin write transaction: {err}")))?;
		let _ = tx.open_table(TABLE_UPDATES);
		let _ = tx.open_table(TABLE_METADATA);
		tx.commit().map_err(|err| AdapterError::DbError(format!("failed to commit table creation: {err}")))?;

		let db = Arc::new(db);
		{
			let mut cache = self.file_databases.write().await;
			cache.insert(db_path, Arc::clone(&db));
		}
		Ok(db)
	}

	fn get_db_path(&self, project_id: &ProjectId) -> PathBuf {
		if self.per_project_files {
			self.storage_path.join(format!("project_{}.db", project_id.as_str()))
		} else {
			self.storage_path.join("collab.db")
		}
	}

	async fn get_or_create_instance(&self, doc_id: &str) -> Arc<DocumentInstance> {
		if let Some(instance) = self.doc_instances.get(doc_id) {
			instance.touch();
			return Arc::clone(&instance);
		}
		let (tx, _rx) = tokio::sync::broadcast::channel(self.config.broadcast_capacity);
		let instance = Arc::new(DocumentInstance::new(tx));
		self.doc_instances.insert(doc_id.to_string(), Arc::clone(&instance));
		instance
	}

	/// Scoped variant of `append`/`since` taking an explicit `ProjectId` for file routing.
	/// The provider's `UpdateLogClient` contract doesn't carry a project id per call, so
	/// callers route through [`ScopedUpdateLogClient::for_project`] to bind one.
	async fn append_scoped(
		&self,
		project_id: &ProjectId,
		document_id: &DocumentId,
		bytes: Vec<u8>,
	) -> CollabResult<AppendResult> {
		let doc_id = document_id.as_str();
		let db_path = self.get_db_path(project_id);
		let db = self.get_or_open_db_file(db_path).await?;
		let instance = self.get_or_create_instance(doc_id).await;

		let tx = db
			.begin_write()
			.map_err(|err| AdapterError::DbError(format!("failed to begin write transaction: {err}")))?;

		let next_seq;
		{
			let mut updates_table = tx
				.open_table(TABLE_UPDATES)
				.map_err(|err| AdapterError::DbError(format!("failed to open updates table: {err}")))?;

			let prefix = key_prefix(doc_id);
			let mut max_seq: u64 = 0;
			{
				let range = updates_table
					.range(prefix.as_str()..)
					.map_err(|err| AdapterError::DbError(format!("failed to scan updates: {err}")))?;
				for item in range {
					let (key, _) =
						item.map_err(|err| AdapterError::DbError(format!("failed to iterate updates: {err}")))?;
					let key_str = key.value();
					if !key_str.starts_with(&prefix) {
						break;
					}
					if let Some(seq_str) = key_str.rsplit(':').next() {
						if let Ok(seq) = seq_str.parse::<u64>() {
							max_seq = max_seq.max(seq);
						}
					}
				}
			}
			next_seq = max_seq + 1;

			let key = make_update_key(doc_id, next_seq);
			updates_table
				.insert(key.as_str(), bytes.as_slice())
				.map_err(|err| AdapterError::DbError(format!("failed to insert update: {err}")))?;
		}

		tx.commit().map_err(|err| AdapterError::DbError(format!("failed to commit update: {err}")))?;

		let sequence = Sequence(next_seq);
		let _ = instance.broadcaster.send((sequence, bytes));

		trace!(document_id = %document_id, sequence = next_seq, "appended update");
		Ok(AppendResult { sequence, new_version: None })
	}

	async fn since_scoped(
		&self,
		project_id: &ProjectId,
		document_id: &DocumentId,
		since_seq: Sequence,
		page_size: usize,
	) -> CollabResult<Vec<(Sequence, Vec<u8>)>> {
		let doc_id = document_id.as_str();
		let db_path = self.get_db_path(project_id);
		let db = self.get_or_open_db_file(db_path).await?;

		let tx = db
			.begin_read()
			.map_err(|err| AdapterError::DbError(format!("failed to begin read transaction: {err}")))?;
		let updates_table = tx
			.open_table(TABLE_UPDATES)
			.map_err(|err| AdapterError::DbError(format!("failed to open updates table: {err}")))?;

		let mut results = Vec::new();
		let prefix = key_prefix(doc_id);
		let range = updates_table
			.range(prefix.as_str()..)
			.map_err(|err| AdapterError::DbError(format!("failed to scan updates: {err}")))?;

		for item in range {
			let (key, value) =
				item.map_err(|err| AdapterError::DbError(format!("failed to iterate updates: {err}")))?;
			let key_str = key.value();
			if !key_str.starts_with(&prefix) {
				break;
			}
			let Some(seq_str) = key_str.rsplit(':').next() else { continue };
			let Ok(seq) = seq_str.parse::<u64>() else { continue };
			if seq <= since_seq.0 {
				continue;
			}
			results.push((Sequence(seq), value.value().to_vec()));
			if results.len() >= page_size {
				break;
			}
		}

		trace!(document_id = %document_id, since = since_seq.0, found = results.len(), "read updates");
		Ok(results)
	}
}

/// Binds a `ProjectId` to an `UpdateLogClientRedb` so it can implement the project-agnostic
/// `UpdateLogClient` trait the provider depends on. Invariant 1 (no topic/append without a
/// `projectId`) is enforced at construction: this type cannot exist without one.
pub struct ScopedUpdateLogClient {
	inner: Arc<UpdateLogClientRedb>,
	project_id: ProjectId,
}

impl ScopedUpdateLogClient {
	pub fn for_project(inner: Arc<UpdateLogClientRedb>, project_id: ProjectId) -> Self {
		Self { inner, project_id }
	}
}

#[async_trait]
impl UpdateLogClient for ScopedUpdateLogClient {
	async fn append(&self, document_id: &DocumentId, bytes: Vec<u8>) -> CollabResult<AppendResult> {
		self.inner.append_scoped(&self.project_id, document_id, bytes).await
	}

	async fn since(
		&self,
		document_id: &DocumentId,
		since_seq: Sequence,
		page_size: usize,
	) -> CollabResult<Vec<(Sequence, Vec<u8>)>> {
		self.inner.since_scoped(&self.project_id, document_id, since_seq, page_size).await
	}
}

// vim: ts=4
