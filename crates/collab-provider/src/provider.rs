//! The CRDT provider: a single-owner task that binds a `CrdtDocument` to an
//! `UpdateLogClient` and a `ChannelAdapter`, driving the INIT → LOADING → SUBSCRIBING →
//! LIVE ⇄ DEGRADED → CLOSED state machine.
//!
//! All mutable provider state lives inside the task spawned by `Provider::spawn`; nothing
//! outside that task ever locks a mutex around the state machine itself. Callers interact
//! through a thin handle that sends commands and reads the latest status.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};

use collab_types::prelude::*;

use crate::breaker::BreakerSet;
use crate::channel::{ChannelAdapter, ChannelEvent};
use crate::codec::Codec;
use crate::crdt::{CrdtDocument, UpdateOrigin};
use crate::log_client::{drain_since, UpdateLogClient};
use crate::queue::OfflineQueue;
use crate::status::StatusEvent;

/// Commands the handle can send into the provider's event loop.
enum Command {
	Shutdown,
}

/// Cheap, cloneable handle to a running provider. Dropping all handles does not stop the
/// task; call `destroy` explicitly (idempotent, matching the design notes).
pub struct ProviderHandle {
	commands: mpsc::Sender<Command>,
	status: watch::Receiver<StatusEvent>,
	/// Rust translation of the `onError` callback in §4.7: fatal errors (currently just
	/// `Denied`) are pushed here once, at the same moment the provider transitions to
	/// `Closed`, rather than invoked as a callback.
	errors: mpsc::Receiver<Error>,
	destroyed: Arc<AtomicBool>,
	destroy_notify: Arc<Notify>,
}

impl ProviderHandle {
	pub fn status(&self) -> StatusEvent {
		*self.status.borrow()
	}

	pub async fn status_changes(&mut self) -> Option<StatusEvent> {
		self.status.changed().await.ok()?;
		Some(*self.status.borrow())
	}

	/// Resolves with the fatal error that closed the provider, if any. Resolves to `None`
	/// once the provider is gone and no fatal error was ever raised.
	pub async fn next_error(&mut self) -> Option<Error> {
		self.errors.recv().await
	}

	/// Idempotent: a second call while shutdown is in flight (or already finished) is a
	/// no-op, guarded by the same `AtomicBool` + `Notify` pair used elsewhere in this
	/// codebase for shutdown signalling.
	pub async fn destroy(&self) {
		if self.destroyed.swap(true, Ordering::SeqCst) {
			self.destroy_notify.notified().await;
			return;
		}
		let _ = self.commands.send(Command::Shutdown).await;
		self.destroy_notify.notified().await;
	}
}

struct PendingDocument {
	last_applied_seq: Sequence,
	out_of_order: BTreeMap<Sequence, Vec<u8>>,
}

impl PendingDocument {
	fn new() -> Self {
		Self { last_applied_seq: Sequence::ZERO, out_of_order: BTreeMap::new() }
	}
}

/// Owns the provider's mutable state. Lives entirely inside the spawned task.
struct ProviderTask {
	project_id: ProjectId,
	document_id: DocumentId,
	principal: Principal,
	config: crate::config::ProviderConfig,

	doc: Arc<dyn CrdtDocument>,
	log: Arc<dyn UpdateLogClient>,
	channel: Arc<dyn ChannelAdapter>,
	breakers: BreakerSet,
	queue: OfflineQueue,
	codec: Codec,

	pending: PendingDocument,
	state: ProviderState,
	status_tx: watch::Sender<StatusEvent>,
	error_tx: mpsc::Sender<Error>,
}

use crate::status::ProviderState;

impl ProviderTask {
	fn set_state(&mut self, state: ProviderState) {
		if self.state != state {
			info!(
				document_id = %self.document_id,
				principal = ?self.principal,
				from = %self.state,
				to = %state,
				"provider transition"
			);
		}
		self.state = state;
		let _ = self.status_tx.send(StatusEvent::Provider(state));
	}

	/// LOADING phase: fetch everything since the last applied sequence and apply in order.
	async fn load_initial(&mut self) -> CollabResult<()> {
		let since_seq = self.pending.last_applied_seq;
		let log = Arc::clone(&self.log);
		let document_id = self.document_id.clone();
		let page_size = self.config.channel_catchup_page_size;

		let updates = self
			.breakers
			.load_initial
			.call(|| async move { drain_since(log.as_ref(), &document_id, since_seq, page_size).await })
			.await?;

		for (seq, bytes) in updates {
			self.apply_in_order(seq, bytes).await;
		}
		Ok(())
	}

	/// SUBSCRIBING phase: establish the realtime subscription. Returns the event receiver
	/// for the caller's select loop to poll.
	async fn subscribe(&mut self) -> CollabResult<(crate::channel::ChannelHandle, mpsc::Receiver<ChannelEvent>)> {
		let channel = Arc::clone(&self.channel);
		let project_id = self.project_id.clone();
		let document_id = self.document_id.clone();
		self.breakers.subscribe.call(|| async move { channel.connect(&project_id, &document_id).await }).await
	}

	/// Applies `bytes` at `seq` if it is exactly the next expected sequence; drops it if
	/// stale; buffers it (and reports a gap) if it is ahead of the gap horizon.
	async fn apply_in_order(&mut self, seq: Sequence, bytes: Vec<u8>) {
		if seq <= self.pending.last_applied_seq {
			trace!(document_id = %self.document_id, seq = seq.0, "dropping stale/duplicate update");
			return;
		}

		if !self.codec.validate(&bytes) || !self.doc.looks_like_update(&bytes) {
			warn!(document_id = %self.document_id, seq = seq.0, "remote update failed validation, dropping");
			self.breakers.subscribe.record_external_failure().await;
			return;
		}

		if seq.0 == self.pending.last_applied_seq.0 + 1 {
			if let Err(err) = self.doc.apply_update(&bytes, UpdateOrigin::Remote).await {
				warn!(document_id = %self.document_id, seq = seq.0, error = %err, "apply failed, dropping");
				return;
			}
			self.pending.last_applied_seq = seq;
			self.drain_out_of_order().await;
		} else {
			debug!(document_id = %self.document_id, expected = self.pending.last_applied_seq.0 + 1, got = seq.0, "gap detected, buffering and scheduling catch-up");
			self.pending.out_of_order.insert(seq, bytes);
			if let Err(err) = self.load_initial().await {
				warn!(document_id = %self.document_id, error = %err, "gap catch-up failed, degrading until recovery tick retries");
				self.set_state(ProviderState::Degraded);
			}
		}
	}

	/// Applies any buffered out-of-order updates that are now contiguous with
	/// `last_applied_seq`, in ascending order.
	async fn drain_out_of_order(&mut self) {
		loop {
			let next = Sequence(self.pending.last_applied_seq.0 + 1);
			let Some(bytes) = self.pending.out_of_order.remove(&next) else { break };
			match self.doc.apply_update(&bytes, UpdateOrigin::Remote).await {
				Ok(()) => self.pending.last_applied_seq = next,
				Err(err) => {
					warn!(document_id = %self.document_id, seq = next.0, error = %err, "buffered apply failed");
					break;
				}
			}
		}
	}

	/// Handles a locally-emitted update: validate, attempt persist, queue on transient
	/// failure, escalate to fatal on `Denied`.
	async fn handle_local_update(&mut self, bytes: Vec<u8>) {
		if !self.codec.validate(&bytes) || !self.doc.looks_like_update(&bytes) {
			warn!(document_id = %self.document_id, "local update failed validation, not propagating");
			self.set_state(ProviderState::Degraded);
			return;
		}

		let log = Arc::clone(&self.log);
		let document_id = self.document_id.clone();
		let to_persist = bytes.clone();
		let result =
			self.breakers.persist.call(|| async move { log.append(&document_id, to_persist).await }).await;

		match result {
			Ok(appended) => {
				// `last_applied_seq` tracks remote application progress, not local append
				// progress - left untouched here so a later echo of this same update at
				// `appended.sequence` still goes through `apply_in_order` and relies on the
				// CRDT's idempotent merge (property 3) rather than being dropped as stale.
				trace!(document_id = %self.document_id, sequence = appended.sequence.0, "local update persisted");
			}
			Err(Error::Denied) => {
				error!(document_id = %self.document_id, "append denied, closing provider");
				let _ = self.error_tx.send(Error::Denied).await;
				self.set_state(ProviderState::Closed);
			}
			Err(err) if err.is_retryable() => {
				if let Err(queue_err) = self.queue.enqueue(bytes).await {
					error!(document_id = %self.document_id, error = %queue_err, "failed to enqueue update");
				} else {
					self.set_state(ProviderState::Degraded);
				}
			}
			Err(err) => {
				error!(document_id = %self.document_id, error = %err, "unexpected persist failure, closing");
				let _ = self.error_tx.send(err).await;
				self.set_state(ProviderState::Closed);
			}
		}
	}

	/// Drains the offline queue FIFO, re-enqueuing at the front on failure per the design
	/// notes (implemented here as "stop draining on first failure", which preserves FIFO
	/// order without needing an explicit front-reinsert).
	async fn drain_queue(&mut self) {
		loop {
			let pending = match self.queue.pending().await {
				Ok(pending) => pending,
				Err(err) => {
					warn!(document_id = %self.document_id, error = %err, "failed to read queue");
					return;
				}
			};
			let Some(op) = pending.into_iter().next() else { return };

			let log = Arc::clone(&self.log);
			let document_id = op.document_id.clone();
			let bytes = op.bytes.clone();
			let result = self.breakers.persist.call(|| async move { log.append(&document_id, bytes).await }).await;

			match result {
				Ok(_) => {
					if let Err(err) = self.queue.acknowledge(op.key).await {
						warn!(document_id = %self.document_id, error = %err, "failed to acknowledge drained update");
					}
				}
				Err(err) => {
					let _ = self.queue.record_failure(&op, &err).await;
					return;
				}
			}
		}
	}
}

/// Dependencies required to construct a provider. Assembled by the factory (§4.7); kept
/// separate from `ProviderConfig` because these are trait objects, not tunables.
pub struct ProviderDeps {
	pub doc: Arc<dyn CrdtDocument>,
	pub log: Arc<dyn UpdateLogClient>,
	pub channel: Arc<dyn ChannelAdapter>,
	pub queue: OfflineQueue,
	pub principal: Principal,
}

pub struct Provider;

impl Provider {
	/// Spawns the event-loop task and returns a handle. The task runs until `destroy` is
	/// called on the handle or the process exits.
	pub fn spawn(
		project_id: ProjectId,
		document_id: DocumentId,
		config: crate::config::ProviderConfig,
		deps: ProviderDeps,
	) -> ProviderHandle {
		let (command_tx, mut command_rx) = mpsc::channel(8);
		let (status_tx, status_rx) = watch::channel(StatusEvent::Provider(ProviderState::Init));
		let (error_tx, error_rx) = mpsc::channel(4);
		let destroyed = Arc::new(AtomicBool::new(false));
		let destroy_notify = Arc::new(Notify::new());

		let breakers = BreakerSet::new(config.load_initial, config.subscribe, config.persist, status_tx.clone());
		let codec = Codec::new(config.codec_min_update_bytes);

		let mut task = ProviderTask {
			project_id,
			document_id,
			principal: deps.principal,
			config,
			doc: deps.doc,
			log: deps.log,
			channel: deps.channel,
			breakers,
			queue: deps.queue,
			codec,
			pending: PendingDocument::new(),
			state: ProviderState::Init,
			status_tx,
			error_tx,
		};

		let destroy_notify_task = Arc::clone(&destroy_notify);

		tokio::spawn(async move {
			task.set_state(ProviderState::Loading);
			let mut local_updates = task.doc.subscribe();

			let mut channel_events: Option<mpsc::Receiver<ChannelEvent>> = None;
			let mut channel_handle = None;

			if task.load_initial().await.is_ok() {
				task.set_state(ProviderState::Subscribing);
				match task.subscribe().await {
					Ok((handle, events)) => {
						channel_handle = Some(handle);
						channel_events = Some(events);
						task.set_state(ProviderState::Live);
						task.drain_queue().await;
					}
					Err(_) => task.set_state(ProviderState::Degraded),
				}
			} else {
				task.set_state(ProviderState::Degraded);
			}

			let mut drain_tick = tokio::time::interval(task.config.queue_drain_interval);
			let mut recovery_tick = tokio::time::interval(task.config.subscribe.reset_timeout);

			loop {
				tokio::select! {
					cmd = command_rx.recv() => {
						match cmd {
							Some(Command::Shutdown) | None => break,
						}
					}
					local = local_updates.recv() => {
						if let Ok(update) = local {
							if update.origin == UpdateOrigin::Local {
								task.handle_local_update(update.bytes).await;
							}
						}
					}
					event = async {
						match channel_events.as_mut() {
							Some(rx) => rx.recv().await,
							None => std::future::pending().await,
						}
					} => {
						match event {
							Some(event) => task.apply_in_order(event.sequence, event.bytes).await,
							None => {
								warn!(document_id = %task.document_id, "channel closed unexpectedly");
								channel_events = None;
								task.set_state(ProviderState::Degraded);
							}
						}
					}
					_ = drain_tick.tick() => {
						if task.state == ProviderState::Live {
							task.drain_queue().await;
						}
					}
					_ = recovery_tick.tick() => {
						if task.state == ProviderState::Degraded {
							if let Ok((handle, events)) = task.subscribe().await {
								if let Some(mut old) = channel_handle.replace(handle) {
									old.close().await;
								}
								channel_events = Some(events);
								if task.load_initial().await.is_ok() {
									task.set_state(ProviderState::Live);
									task.drain_queue().await;
								}
							}
						}
					}
				}

				if task.state == ProviderState::Closed {
					break;
				}
			}

			if let Some(mut handle) = channel_handle.take() {
				handle.close().await;
			}
			task.set_state(ProviderState::Closed);
			destroy_notify_task.notify_waiters();
		});

		ProviderHandle { commands: command_tx, status: status_rx, errors: error_rx, destroyed, destroy_notify }
	}
}
