//! Bounded exponential backoff for transient exchange failures.
//!
//! Retries are an explicit attempt loop with an injectable [`Sleeper`], so
//! tests exercise the full schedule without real delays. Only
//! [`Error::Transient`] values are retried; permanent rejections and
//! configuration failures surface on the first attempt.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	clock::Sleeper,
	conn::Connection,
	exchange::{ExchangeFuture, GrantParams, TokenExchanger},
	token::SecretString,
};

/// Retry schedule for transient exchange failures.
///
/// Delay before attempt `n + 1` is `base_delay * factor^(n - 1)` plus a
/// uniform jitter of up to one `base_delay`, so concurrent brokers do not
/// hammer a recovering endpoint in lockstep.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
	/// Delay before the first retry.
	pub base_delay: Duration,
	/// Multiplier applied per subsequent attempt.
	pub factor: u32,
	/// Total attempt cap, including the initial call.
	pub max_attempts: u32,
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { base_delay: Duration::milliseconds(500), factor: 2, max_attempts: 3 }
	}
}
impl RetryPolicy {
	/// Computes the jittered delay after the provided 1-based failed attempt.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(16);
		let scale = self.factor.max(1).saturating_pow(exponent);
		let scaled = self.base_delay * i32::try_from(scale).unwrap_or(i32::MAX);

		scaled + self.jitter()
	}

	fn jitter(&self) -> Duration {
		let cap = self.base_delay.whole_milliseconds();

		if cap <= 0 {
			return Duration::ZERO;
		}

		let cap = u64::try_from(cap).unwrap_or(u64::MAX);
		let jitter_ms = rand::rng().random_range(0..cap);

		Duration::milliseconds(i64::try_from(jitter_ms).unwrap_or(i64::MAX))
	}
}

/// Decorator that retries transient failures from an inner [`TokenExchanger`].
pub struct RetryingExchanger {
	inner: Arc<dyn TokenExchanger>,
	policy: RetryPolicy,
	sleeper: Arc<dyn Sleeper>,
}
impl RetryingExchanger {
	/// Wraps the provided exchanger with the retry schedule.
	pub fn new(inner: Arc<dyn TokenExchanger>, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
		Self { inner, policy, sleeper }
	}
}
impl TokenExchanger for RetryingExchanger {
	fn exchange<'a>(
		&'a self,
		connection: &'a Connection,
		client_secret: &'a SecretString,
		grant: &'a GrantParams,
	) -> ExchangeFuture<'a> {
		Box::pin(async move {
			let max_attempts = self.policy.max_attempts.max(1);
			let mut attempt = 0;

			loop {
				attempt += 1;

				match self.inner.exchange(connection, client_secret, grant).await {
					Ok(token) => return Ok(token),
					Err(Error::Transient(err)) if attempt < max_attempts => {
						#[cfg(feature = "tracing")]
						tracing::warn!(
							connection = %connection.id,
							attempt,
							error = %err,
							"Transient exchange failure; retrying.",
						);
						#[cfg(not(feature = "tracing"))]
						let _ = err;

						self.sleeper.sleep(self.policy.delay_for(attempt)).await;
					},
					Err(err) => return Err(err),
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;
	use crate::{
		_preludet::test_connection,
		clock::{ManualClock, RecordingSleeper},
		conn::Environment,
		exchange::MockExchanger,
	};

	fn harness() -> (RetryingExchanger, Arc<MockExchanger>, Arc<RecordingSleeper>) {
		let clock = Arc::new(ManualClock::new(datetime!(2026-01-01 00:00 UTC)));
		let mock = Arc::new(MockExchanger::new(clock));
		let sleeper = Arc::new(RecordingSleeper::default());
		let policy = RetryPolicy {
			base_delay: Duration::milliseconds(1),
			factor: 2,
			max_attempts: 3,
		};

		(RetryingExchanger::new(mock.clone(), policy, sleeper.clone()), mock, sleeper)
	}

	#[tokio::test]
	async fn transient_failures_retry_to_the_attempt_cap() {
		let (retrying, mock, sleeper) = harness();
		let connection = test_connection(Environment::Staging);
		let secret = SecretString::new("client-secret");

		for _ in 0..3 {
			mock.push_transient();
		}

		let err = retrying
			.exchange(&connection, &secret, &GrantParams::new())
			.await
			.expect_err("Exhausted retries should surface the transient failure.");

		assert!(matches!(err, Error::Transient(_)));
		assert_eq!(mock.calls(), 3);
		assert_eq!(sleeper.slept().len(), 2);
	}

	#[tokio::test]
	async fn permanent_failures_are_never_retried() {
		let (retrying, mock, sleeper) = harness();
		let connection = test_connection(Environment::Staging);
		let secret = SecretString::new("client-secret");

		mock.push_permanent(401);

		let err = retrying
			.exchange(&connection, &secret, &GrantParams::new())
			.await
			.expect_err("Permanent rejections should propagate immediately.");

		assert!(matches!(err, Error::PermanentAuth { status: Some(401), .. }));
		assert_eq!(mock.calls(), 1);
		assert!(sleeper.slept().is_empty());
	}

	#[tokio::test]
	async fn success_after_a_transient_failure_stops_the_loop() {
		let (retrying, mock, sleeper) = harness();
		let connection = test_connection(Environment::Staging);
		let secret = SecretString::new("client-secret");

		mock.push_transient();
		mock.push_token("token-after-retry", Duration::hours(1));

		let token = retrying
			.exchange(&connection, &secret, &GrantParams::new())
			.await
			.expect("Second attempt should succeed.");

		assert_eq!(token.access_token.expose(), "token-after-retry");
		assert_eq!(mock.calls(), 2);
		assert_eq!(sleeper.slept().len(), 1);
	}

	#[test]
	fn delays_grow_exponentially_with_bounded_jitter() {
		let policy = RetryPolicy {
			base_delay: Duration::milliseconds(500),
			factor: 2,
			max_attempts: 3,
		};

		for (attempt, floor) in [(1, 500), (2, 1_000), (3, 2_000)] {
			let delay = policy.delay_for(attempt);

			assert!(delay >= Duration::milliseconds(floor));
			assert!(delay < Duration::milliseconds(floor + 500));
		}
	}
}
