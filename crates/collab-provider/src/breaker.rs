//! Three-state circuit breaker, and the set of three independent instances guarding
//! `loadInitial`, `subscribe`, and `persist`.
//!
//! Counters are plain fields behind a single `tokio::sync::Mutex` rather than atomics: the
//! provider drives all three breakers from its own single-owner task, so there is no
//! contention to optimize for, and a `Mutex` keeps the rolling-window bookkeeping (which
//! needs to look at several fields together) simpler than juggling independent atomics the
//! way the rate limiter does for a much higher-contention workload.

use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::time::timeout as tokio_timeout;

use collab_types::prelude::*;

use crate::config::BreakerConfig;
use crate::status::{BreakerName, BreakerState, StatusEvent};

struct Window {
	successes: u32,
	failures: u32,
	opened_at: Option<Instant>,
}

impl Window {
	fn fresh() -> Self {
		Self { successes: 0, failures: 0, opened_at: None }
	}

	fn total(&self) -> u32 {
		self.successes + self.failures
	}

	fn failure_pct(&self) -> u32 {
		if self.total() == 0 {
			0
		} else {
			self.failures * 100 / self.total()
		}
	}
}

struct Inner {
	state: BreakerState,
	window: Window,
	half_open_probe_in_flight: bool,
}

/// One breaker instance. Cheap to clone (wraps an `Arc`-free `Mutex` owned by the caller);
/// callers hold one per guarded operation.
pub struct Breaker {
	name: BreakerName,
	config: BreakerConfig,
	inner: Mutex<Inner>,
	status_tx: watch::Sender<StatusEvent>,
}

impl Breaker {
	pub fn new(name: BreakerName, config: BreakerConfig, status_tx: watch::Sender<StatusEvent>) -> Self {
		Self {
			name,
			config,
			inner: Mutex::new(Inner {
				state: BreakerState::Closed,
				window: Window::fresh(),
				half_open_probe_in_flight: false,
			}),
			status_tx,
		}
	}

	pub fn name(&self) -> BreakerName {
		self.name
	}

	pub async fn state(&self) -> BreakerState {
		self.inner.lock().await.state
	}

	/// Run `op` through the breaker. Fails fast with `CircuitOpen` when the breaker is open
	/// (property 6: the underlying operation is never invoked in that case) or when the
	/// breaker is half-open and a probe is already in flight.
	pub async fn call<F, Fut, T>(&self, op: F) -> CollabResult<T>
	where
		F: FnOnce() -> Fut,
		Fut: std::future::Future<Output = CollabResult<T>>,
	{
		let should_probe = {
			let mut guard = self.inner.lock().await;
			self.maybe_reset(&mut guard);
			match guard.state {
				BreakerState::Closed => true,
				BreakerState::Open => false,
				BreakerState::HalfOpen => {
					if guard.half_open_probe_in_flight {
						false
					} else {
						guard.half_open_probe_in_flight = true;
						true
					}
				}
			}
		};

		if !should_probe {
			return Err(Error::CircuitOpen(self.name.as_str()));
		}

		let result = tokio_timeout(self.config.timeout, op()).await;

		let mut guard = self.inner.lock().await;
		guard.half_open_probe_in_flight = false;
		match result {
			Ok(Ok(value)) => {
				self.record_success(&mut guard);
				Ok(value)
			}
			Ok(Err(err)) => {
				self.record_failure(&mut guard);
				Err(err)
			}
			Err(_elapsed) => {
				self.record_failure(&mut guard);
				Err(Error::Transient(format!("{} timed out after {:?}", self.name, self.config.timeout)))
			}
		}
	}

	/// Records a failure against this breaker without running a guarded operation through
	/// `call()`, for failures detected by the caller before the operation would even be
	/// attempted (e.g. a frame that fails validation before `subscribe` is asked to apply it).
	pub async fn record_external_failure(&self) {
		let mut guard = self.inner.lock().await;
		self.maybe_reset(&mut guard);
		self.record_failure(&mut guard);
	}

	fn emit(&self, state: BreakerState) {
		let _ = self.status_tx.send(StatusEvent::Breaker(self.name, state));
	}

	fn maybe_reset(&self, guard: &mut Inner) {
		if guard.state == BreakerState::Open {
			if let Some(opened_at) = guard.window.opened_at {
				if opened_at.elapsed() >= self.config.reset_timeout {
					guard.state = BreakerState::HalfOpen;
					info!(breaker = %self.name, "reset timer elapsed, probing");
					self.emit(BreakerState::HalfOpen);
				}
			}
		}
	}

	fn record_success(&self, guard: &mut Inner) {
		match guard.state {
			BreakerState::HalfOpen => {
				info!(breaker = %self.name, "probe succeeded, closing");
				guard.state = BreakerState::Closed;
				guard.window = Window::fresh();
				self.emit(BreakerState::Closed);
			}
			BreakerState::Closed => {
				guard.window.successes += 1;
				self.evaluate_threshold(guard);
			}
			BreakerState::Open => {}
		}
	}

	fn record_failure(&self, guard: &mut Inner) {
		match guard.state {
			BreakerState::HalfOpen => {
				warn!(breaker = %self.name, "probe failed, reopening");
				self.open(guard);
			}
			BreakerState::Closed => {
				guard.window.failures += 1;
				self.evaluate_threshold(guard);
			}
			BreakerState::Open => {}
		}
	}

	fn evaluate_threshold(&self, guard: &mut Inner) {
		if guard.window.total() >= self.config.volume_threshold
			&& guard.window.failure_pct() >= u32::from(self.config.error_threshold_pct)
		{
			warn!(
				breaker = %self.name,
				failure_pct = guard.window.failure_pct(),
				"error threshold exceeded, opening"
			);
			self.open(guard);
		}
	}

	fn open(&self, guard: &mut Inner) {
		guard.state = BreakerState::Open;
		guard.window.opened_at = Some(Instant::now());
		self.emit(BreakerState::Open);
	}
}

/// The three independent breakers named in §4.3.
pub struct BreakerSet {
	pub load_initial: Breaker,
	pub subscribe: Breaker,
	pub persist: Breaker,
}

impl BreakerSet {
	pub fn new(
		load_initial: BreakerConfig,
		subscribe: BreakerConfig,
		persist: BreakerConfig,
		status_tx: watch::Sender<StatusEvent>,
	) -> Self {
		Self {
			load_initial: Breaker::new(BreakerName::LoadInitial, load_initial, status_tx.clone()),
			subscribe: Breaker::new(BreakerName::Subscribe, subscribe, status_tx.clone()),
			persist: Breaker::new(BreakerName::Persist, persist, status_tx),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fast_config() -> BreakerConfig {
		BreakerConfig {
			timeout: Duration::from_millis(50),
			error_threshold_pct: 50,
			volume_threshold: 2,
			reset_timeout: Duration::from_millis(20),
			rolling_window: Duration::from_millis(1000),
		}
	}

	fn test_status_tx() -> watch::Sender<StatusEvent> {
		watch::channel(StatusEvent::Provider(crate::status::ProviderState::Init)).0
	}

	#[tokio::test]
	async fn opens_after_volume_and_threshold_exceeded() {
		let breaker = Breaker::new(BreakerName::Persist, fast_config(), test_status_tx());

		for _ in 0..2 {
			let _: CollabResult<()> = breaker.call(|| async { Err(Error::Transient("boom".into())) }).await;
		}

		assert_eq!(breaker.state().await, BreakerState::Open);

		let result: CollabResult<()> = breaker.call(|| async { Ok(()) }).await;
		match result {
			Err(Error::CircuitOpen(name)) => assert_eq!(name, "persist"),
			other => panic!("expected CircuitOpen, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn half_open_probe_success_closes_and_resets() {
		let breaker = Breaker::new(BreakerName::Subscribe, fast_config(), test_status_tx());

		for _ in 0..2 {
			let _: CollabResult<()> = breaker.call(|| async { Err(Error::Transient("boom".into())) }).await;
		}
		assert_eq!(breaker.state().await, BreakerState::Open);

		tokio::time::sleep(Duration::from_millis(30)).await;

		let result: CollabResult<()> = breaker.call(|| async { Ok(()) }).await;
		assert!(result.is_ok());
		assert_eq!(breaker.state().await, BreakerState::Closed);
	}

	#[tokio::test]
	async fn external_failure_opens_breaker_without_calling_op() {
		let (status_tx, mut status_rx) = watch::channel(StatusEvent::Provider(crate::status::ProviderState::Init));
		let breaker = Breaker::new(BreakerName::Subscribe, fast_config(), status_tx);

		breaker.record_external_failure().await;
		breaker.record_external_failure().await;

		assert_eq!(breaker.state().await, BreakerState::Open);

		status_rx.changed().await.unwrap();
		match *status_rx.borrow() {
			StatusEvent::Breaker(BreakerName::Subscribe, BreakerState::Open) => {}
			other => panic!("expected Breaker(Subscribe, Open), got {other:?}"),
		}
	}

	#[tokio::test]
	async fn timeout_counts_as_a_failure() {
		let breaker = Breaker::new(BreakerName::LoadInitial, fast_config(), test_status_tx());

		for _ in 0..2 {
			let result: CollabResult<()> = breaker
				.call(|| async {
					tokio::time::sleep(Duration::from_millis(200)).await;
					Ok(())
				})
				.await;
			assert!(result.is_err());
		}

		assert_eq!(breaker.state().await, BreakerState::Open);
	}
}
