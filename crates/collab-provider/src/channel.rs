//! Realtime channel adapter: subscribes to `updates:{projectId}:{documentId}` and forwards
//! remote update events to the provider's event loop.
//!
//! The default implementation is a WebSocket client (the provider dials out, unlike this
//! codebase's server-side realtime handlers which accept inbound connections), but the
//! per-connection task shape is the same: a receive task and a heartbeat task coordinated
//! with `tokio::select!`, forwarding into an mpsc channel the caller owns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use collab_types::prelude::*;

/// A single remote update as delivered by the bus. Ordering is best-effort; the provider
/// is responsible for gap detection.
#[derive(Clone, Debug)]
pub struct ChannelEvent {
	pub sequence: Sequence,
	pub bytes: Vec<u8>,
}

/// Handle to a live subscription. `close` is idempotent: dropping the handle or calling
/// `close` more than once has no additional effect.
pub struct ChannelHandle {
	closed: Arc<AtomicBool>,
	task: Option<tokio::task::JoinHandle<()>>,
}

impl ChannelHandle {
	/// Constructs a handle around a connection-owning task, for adapters implemented
	/// outside this crate. `task` is aborted on `close`; pass `None` for adapters with no
	/// background task of their own to cancel.
	pub fn new(task: Option<tokio::task::JoinHandle<()>>) -> Self {
		Self { closed: Arc::new(AtomicBool::new(false)), task }
	}

	pub async fn close(&mut self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
	/// Resolves once the subscription is acknowledged by the bus. Events arrive on the
	/// returned receiver, filtered to `document_id` even if the transport's framing is
	/// coarser than that.
	async fn connect(
		&self,
		project_id: &ProjectId,
		document_id: &DocumentId,
	) -> CollabResult<(ChannelHandle, mpsc::Receiver<ChannelEvent>)>;
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket-backed adapter. One connection task per `connect` call, matching this
/// codebase's one-task-per-connection realtime handlers.
pub struct WebSocketChannelAdapter {
	endpoint: String,
}

impl WebSocketChannelAdapter {
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self { endpoint: endpoint.into() }
	}
}

#[async_trait]
impl ChannelAdapter for WebSocketChannelAdapter {
	async fn connect(
		&self,
		project_id: &ProjectId,
		document_id: &DocumentId,
	) -> CollabResult<(ChannelHandle, mpsc::Receiver<ChannelEvent>)> {
		let topic = topic_name(project_id, document_id);
		let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.endpoint)
			.await
			.map_err(|err| Error::Transient(format!("connect to {}: {err}", self.endpoint)))?;

		let (mut sink, mut stream) = ws_stream.split();

		let subscribe_frame = format!("{{\"type\":\"subscribe\",\"topic\":\"{topic}\"}}");
		sink.send(WsMessage::Text(subscribe_frame.into()))
			.await
			.map_err(|err| Error::Transient(format!("subscribe handshake failed: {err}")))?;

		let (event_tx, event_rx) = mpsc::channel(64);
		let document_filter = document_id.clone();

		let task = tokio::spawn(async move {
			let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
			heartbeat.tick().await;

			loop {
				tokio::select! {
					_ = heartbeat.tick() => {
						if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
							debug!(topic = %topic, "heartbeat ping failed, connection likely dead");
							break;
						}
					}
					frame = stream.next() => {
						match frame {
							Some(Ok(WsMessage::Text(text))) => {
								match parse_event(&text, &document_filter) {
									Some(event) => {
										if event_tx.send(event).await.is_err() {
											break;
										}
									}
									None => trace!(topic = %topic, "dropped frame not matching document filter"),
								}
							}
							Some(Ok(WsMessage::Close(_))) | None => {
								debug!(topic = %topic, "channel closed by peer");
								break;
							}
							Some(Ok(_)) => {}
							Some(Err(err)) => {
								warn!(topic = %topic, error = %err, "channel read error");
								break;
							}
						}
					}
				}
			}
		});

		Ok((ChannelHandle::new(Some(task)), event_rx))
	}
}

/// Parses one frame into a `ChannelEvent`, filtering to the expected document. Frame shape
/// is `{"documentId":"...","sequence":N,"bytes":"<base64>"}`; malformed or mismatched
/// frames are dropped rather than propagated, matching the adapter's best-effort contract.
fn parse_event(text: &str, expected_document: &DocumentId) -> Option<ChannelEvent> {
	#[derive(serde::Deserialize)]
	struct RawFrame {
		#[serde(rename = "documentId")]
		document_id: String,
		sequence: u64,
		bytes: String,
	}

	let frame: RawFrame = serde_json::from_str(text).ok()?;
	if frame.document_id != expected_document.as_str() {
		return None;
	}
	let bytes = base64::engine::general_purpose::STANDARD.decode(frame.bytes).ok()?;
	Some(ChannelEvent { sequence: Sequence(frame.sequence), bytes })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn filters_frames_by_document_id() {
		let bytes = base64::engine::general_purpose::STANDARD.encode([1, 2, 3, 4]);
		let matching = format!(r#"{{"documentId":"D1","sequence":7,"bytes":"{bytes}"}}"#);
		let other = format!(r#"{{"documentId":"D2","sequence":7,"bytes":"{bytes}"}}"#);

		let doc = DocumentId::new("D1");
		let event = parse_event(&matching, &doc).unwrap();
		assert_eq!(event.sequence, Sequence(7));
		assert_eq!(event.bytes, vec![1, 2, 3, 4]);

		assert!(parse_event(&other, &doc).is_none());
	}

	#[test]
	fn malformed_frame_is_dropped() {
		let doc = DocumentId::new("D1");
		assert!(parse_event("not json", &doc).is_none());
	}
}
