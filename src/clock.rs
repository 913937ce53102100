//! Injectable clock and sleep abstractions used by the cache and retry loops.
//!
//! The broker never reads wall-clock time or sleeps directly; it goes through
//! [`Clock`] and [`Sleeper`] so tests can drive freshness transitions and retry
//! backoff without real delays.

// self
use crate::_prelude::*;

/// Wall-clock source consulted for every freshness decision.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current instant.
	fn now(&self) -> OffsetDateTime;
}

/// Default [`Clock`] backed by the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Boxed future returned by [`Sleeper::sleep`].
pub type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Async sleep source used between retry attempts.
pub trait Sleeper
where
	Self: Send + Sync,
{
	/// Suspends for the provided duration. Non-positive durations return immediately.
	fn sleep(&self, duration: Duration) -> SleepFuture;
}

/// Default [`Sleeper`] backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;
impl Sleeper for TokioSleeper {
	fn sleep(&self, duration: Duration) -> SleepFuture {
		// Negative durations fail the conversion and collapse to zero.
		let duration = std::time::Duration::try_from(duration).unwrap_or_default();

		Box::pin(tokio::time::sleep(duration))
	}
}

/// Manually advanced [`Clock`] for tests.
#[cfg(any(test, feature = "test"))]
#[derive(Debug)]
pub struct ManualClock(Mutex<OffsetDateTime>);
#[cfg(any(test, feature = "test"))]
impl ManualClock {
	/// Creates a clock frozen at the provided instant.
	pub fn new(start: OffsetDateTime) -> Self {
		Self(Mutex::new(start))
	}

	/// Moves the clock forward by the provided delta.
	pub fn advance(&self, delta: Duration) {
		*self.0.lock() += delta;
	}

	/// Jumps the clock to the provided instant.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}
}
#[cfg(any(test, feature = "test"))]
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}

/// [`Sleeper`] that records requested delays and returns immediately, for tests.
#[cfg(any(test, feature = "test"))]
#[derive(Debug, Default)]
pub struct RecordingSleeper(Mutex<Vec<Duration>>);
#[cfg(any(test, feature = "test"))]
impl RecordingSleeper {
	/// Returns every delay requested so far, in order.
	pub fn slept(&self) -> Vec<Duration> {
		self.0.lock().clone()
	}
}
#[cfg(any(test, feature = "test"))]
impl Sleeper for RecordingSleeper {
	fn sleep(&self, duration: Duration) -> SleepFuture {
		self.0.lock().push(duration);

		Box::pin(async {})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn manual_clock_advances_deterministically() {
		let clock = ManualClock::new(datetime!(2026-01-01 00:00 UTC));

		clock.advance(Duration::seconds(90));

		assert_eq!(clock.now(), datetime!(2026-01-01 00:01:30 UTC));
	}

	#[tokio::test]
	async fn recording_sleeper_captures_delays_without_waiting() {
		let sleeper = RecordingSleeper::default();

		sleeper.sleep(Duration::milliseconds(500)).await;
		sleeper.sleep(Duration::seconds(1)).await;

		assert_eq!(sleeper.slept(), vec![Duration::milliseconds(500), Duration::seconds(1)]);
	}
}
