//! Observable state published via `onStatus`: provider lifecycle and breaker transitions.

/// The provider's own lifecycle state, per the state diagram in the design notes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderState {
	Init,
	Loading,
	Subscribing,
	Live,
	Degraded,
	Closed,
}

impl ProviderState {
	/// The three user-visible states the owner actually cares about.
	pub fn user_visible(self) -> &'static str {
		match self {
			ProviderState::Live | ProviderState::Init | ProviderState::Loading | ProviderState::Subscribing => {
				"synced"
			}
			ProviderState::Degraded => "working offline",
			ProviderState::Closed => "connection lost",
		}
	}
}

impl std::fmt::Display for ProviderState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			ProviderState::Init => "INIT",
			ProviderState::Loading => "LOADING",
			ProviderState::Subscribing => "SUBSCRIBING",
			ProviderState::Live => "LIVE",
			ProviderState::Degraded => "DEGRADED",
			ProviderState::Closed => "CLOSED",
		};
		write!(f, "{s}")
	}
}

/// Identifies which of the three independent breakers an event belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BreakerName {
	LoadInitial,
	Subscribe,
	Persist,
}

impl BreakerName {
	pub fn as_str(self) -> &'static str {
		match self {
			BreakerName::LoadInitial => "loadInitial",
			BreakerName::Subscribe => "subscribe",
			BreakerName::Persist => "persist",
		}
	}
}

impl std::fmt::Display for BreakerName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

impl std::fmt::Display for BreakerState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			BreakerState::Closed => "CLOSED",
			BreakerState::Open => "OPEN",
			BreakerState::HalfOpen => "HALF_OPEN",
		};
		write!(f, "{s}")
	}
}

/// A single observable event passed to the factory's `onStatus` callback.
#[derive(Clone, Copy, Debug)]
pub enum StatusEvent {
	Provider(ProviderState),
	Breaker(BreakerName, BreakerState),
}
