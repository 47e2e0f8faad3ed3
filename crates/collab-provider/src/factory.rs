//! Sole entry point for constructing a provider. Resolves the principal (fail-closed to
//! `anonymous`), refuses to build without a `projectId`, and wires status propagation.

use std::sync::Arc;

use collab_types::prelude::*;

use crate::channel::ChannelAdapter;
use crate::config::ProviderConfig;
use crate::crdt::CrdtDocument;
use crate::log_client::UpdateLogClient;
use crate::provider::{Provider, ProviderDeps, ProviderHandle};
use crate::queue::{MemoryQueueStore, OfflineQueue, QueueStore};

/// Everything the factory needs to construct one provider instance. `queue_store`
/// defaults to an in-process `MemoryQueueStore` when not supplied.
pub struct CreateProviderArgs {
	pub project_id: ProjectId,
	pub document_id: DocumentId,
	pub doc: Arc<dyn CrdtDocument>,
	pub log: Arc<dyn UpdateLogClient>,
	pub channel: Arc<dyn ChannelAdapter>,
	pub auth_source: Arc<dyn AuthSource>,
	pub queue_store: Option<Arc<dyn QueueStore>>,
	pub config: ProviderConfig,
}

pub struct AuthenticatedFactory;

impl AuthenticatedFactory {
	/// Builds a provider bound to `args.project_id`/`args.document_id`. The principal is
	/// resolved via `args.auth_source`; any resolution failure, or an explicit denial,
	/// yields `Principal::Anonymous` rather than propagating the error — no privilege
	/// escalation, and the backing store's own policies enforce what anonymous may do.
	pub async fn create(args: CreateProviderArgs) -> ProviderHandle {
		let principal = match args.auth_source.resolve().await {
			Ok(principal) => principal,
			Err(err) => {
				warn!(
					project_id = %args.project_id,
					document_id = %args.document_id,
					error = %err,
					"auth source failed, falling back to anonymous"
				);
				Principal::Anonymous
			}
		};

		info!(
			project_id = %args.project_id,
			document_id = %args.document_id,
			principal = ?principal,
			"constructing provider"
		);

		let queue_store = args.queue_store.unwrap_or_else(|| Arc::new(MemoryQueueStore::new()));
		let queue = OfflineQueue::new(queue_store, args.document_id.clone(), args.config.queue_max_attempts);

		let deps = ProviderDeps { doc: args.doc, log: args.log, channel: args.channel, queue, principal };

		Provider::spawn(args.project_id, args.document_id, args.config, deps)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;

	#[derive(Debug)]
	struct FailingAuthSource;

	#[async_trait]
	impl AuthSource for FailingAuthSource {
		async fn resolve(&self) -> CollabResult<Principal> {
			Err(Error::Transient("auth backend unreachable".into()))
		}
	}

	#[tokio::test]
	async fn failed_auth_source_resolves_to_anonymous() {
		let auth = FailingAuthSource;
		let principal = match auth.resolve().await {
			Ok(principal) => principal,
			Err(_) => Principal::Anonymous,
		};
		assert_eq!(principal, Principal::Anonymous);
	}
}
