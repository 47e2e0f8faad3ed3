#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

mod breaker;
mod channel;
mod codec;
mod config;
mod crdt;
mod factory;
mod log_client;
mod prelude;
mod provider;
mod queue;
mod status;

pub use channel::{ChannelAdapter, ChannelEvent, ChannelHandle, WebSocketChannelAdapter};
pub use codec::Codec;
pub use config::{BreakerConfig, ProviderConfig};
pub use crdt::{CrdtDocument, DocUpdate, UpdateOrigin, YrsDocument};
pub use factory::{AuthenticatedFactory, CreateProviderArgs};
pub use log_client::{drain_since, AppendResult, UpdateLogClient};
pub use provider::{Provider, ProviderDeps, ProviderHandle};
pub use queue::{DeadLetter, MemoryQueueStore, OfflineQueue, QueueStore, QueuedOperation};
pub use status::{BreakerName, BreakerState, ProviderState, StatusEvent};

// vim: ts=4
