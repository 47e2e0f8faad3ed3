//! Tunables for the breaker set, the offline queue, and the provider's own timers.
//!
//! Every field here has the default named in the external-interfaces section of the design
//! notes; embedding applications override field-by-field rather than reaching for a
//! file-based config format (this is a library crate, not a standalone service).

use std::time::Duration;

/// Configuration for one of the three breaker instances (`loadInitial`, `subscribe`, `persist`).
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
	pub timeout: Duration,
	pub error_threshold_pct: u8,
	pub volume_threshold: u32,
	pub reset_timeout: Duration,
	pub rolling_window: Duration,
}

impl Default for BreakerConfig {
	fn default() -> Self {
		Self {
			timeout: Duration::from_millis(5000),
			error_threshold_pct: 30,
			volume_threshold: 10,
			reset_timeout: Duration::from_millis(20_000),
			rolling_window: Duration::from_millis(120_000),
		}
	}
}

#[derive(Clone, Copy, Debug)]
pub struct ProviderConfig {
	pub persist: BreakerConfig,
	pub subscribe: BreakerConfig,
	pub load_initial: BreakerConfig,

	pub queue_max_attempts: u32,
	pub queue_drain_interval: Duration,

	pub channel_catchup_page_size: usize,

	pub codec_min_update_bytes: usize,
}

impl Default for ProviderConfig {
	fn default() -> Self {
		Self {
			persist: BreakerConfig::default(),
			subscribe: BreakerConfig::default(),
			load_initial: BreakerConfig {
				timeout: Duration::from_millis(10_000),
				..BreakerConfig::default()
			},
			queue_max_attempts: 5,
			queue_drain_interval: Duration::from_millis(5000),
			channel_catchup_page_size: 256,
			codec_min_update_bytes: 4,
		}
	}
}
