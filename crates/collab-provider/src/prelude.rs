pub use collab_types::prelude::*;

pub use crate::config::{BreakerConfig, ProviderConfig};
pub use crate::status::{BreakerName, BreakerState, ProviderState};
