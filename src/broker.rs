//! Broker facade: serve cached tokens, refresh with singleflight guards, and
//! fall back to stale values while the exchange endpoint misbehaves.
//!
//! [`Broker::get_access_token`] is the one call request handlers make. It reads
//! the per-connection cache [`Disposition`](crate::cache) and either serves the
//! cached token, serves it stale while a background refresh runs, performs an
//! inline exchange, or fails fast on a permanently rejected connection. Each
//! connection's refresh guard keeps at most one exchange in flight no matter
//! how many callers arrive at once.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	cache::{AccessToken, CacheEntry, Disposition, Freshness, TokenCache},
	clock::{Clock, Sleeper},
	config::BrokerConfig,
	conn::{Connection, ConnectionId, Environment},
	error::ConfigError,
	exchange::{GrantParams, RetryingExchanger, TokenExchanger},
	obs::{self, OpKind, OpOutcome, OpSpan},
	secrets::{CachedSecretStore, SecretStore},
	token::Token,
};

/// Environment-scoped credential broker.
///
/// Holds the immutable connection set, the secret value cache, the retrying
/// exchange client, and the per-connection token cache. Cheap to share behind
/// an [`Arc`]; every method takes `&self`.
pub struct Broker {
	environment: Environment,
	connections: HashMap<ConnectionId, Connection>,
	safety_margin: Duration,
	secrets: CachedSecretStore,
	exchanger: Arc<dyn TokenExchanger>,
	cache: TokenCache,
	clock: Arc<dyn Clock>,
	refresh_metrics: Arc<RefreshMetrics>,
}
impl Broker {
	/// Constructs a broker with the default HTTP transport, system clock, and
	/// tokio timer.
	#[cfg(feature = "reqwest")]
	pub fn new(
		config: BrokerConfig,
		secret_store: Arc<dyn SecretStore>,
	) -> Result<Self, ConfigError> {
		let exchanger = Arc::new(crate::exchange::HttpExchanger::new(config.http_timeout)?);

		Ok(Self::with_exchanger(
			config,
			secret_store,
			exchanger,
			Arc::new(crate::clock::SystemClock),
			Arc::new(crate::clock::TokioSleeper),
		))
	}

	/// Constructs a broker around injected transport, clock, and sleeper
	/// implementations. The exchanger is wrapped with the configured retry
	/// schedule.
	pub fn with_exchanger(
		config: BrokerConfig,
		secret_store: Arc<dyn SecretStore>,
		exchanger: Arc<dyn TokenExchanger>,
		clock: Arc<dyn Clock>,
		sleeper: Arc<dyn Sleeper>,
	) -> Self {
		let exchanger = Arc::new(RetryingExchanger::new(exchanger, config.retry, sleeper));
		let secrets = CachedSecretStore::new(secret_store, clock.clone(), config.secret_ttl);
		let connections = config
			.connections
			.into_iter()
			.map(|connection| (connection.id.clone(), connection))
			.collect();

		Self {
			environment: config.environment,
			connections,
			safety_margin: config.safety_margin,
			secrets,
			exchanger,
			cache: TokenCache::default(),
			clock,
			refresh_metrics: Default::default(),
		}
	}

	/// Environment this broker serves.
	pub fn environment(&self) -> Environment {
		self.environment
	}

	/// Refresh activity counters.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.refresh_metrics
	}

	/// Returns a usable access token for the connection, refreshing as needed.
	///
	/// Valid tokens are served from cache. Tokens inside the safety margin are
	/// served immediately with `stale` set while a background refresh runs.
	/// Missing or hard-expired tokens are refreshed inline before responding.
	pub async fn get_access_token(&self, id: &ConnectionId) -> Result<AccessToken> {
		const KIND: OpKind = OpKind::Serve;

		let span = OpSpan::new(KIND, "get_access_token");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let connection = self.connection(id)?;
				let entry = self.cache.entry(id);

				match entry.disposition(self.clock.now(), self.safety_margin) {
					Disposition::Serve(token) => Ok(access_token(token, false)),
					Disposition::ServeStale(token) => {
						self.spawn_refresh(connection.clone(), entry);

						Ok(access_token(token, true))
					},
					Disposition::Refresh => self.refresh_inline(connection, &entry).await,
					Disposition::Fail(reason) => Err(Error::CredentialUnavailable {
						connection: id.clone(),
						environment: self.environment,
						reason,
					}),
				}
			})
			.await;

		match &result {
			Ok(token) if token.stale => {
				self.refresh_metrics.record_stale_serve();

				obs::record_op_outcome(KIND, OpOutcome::Stale);
			},
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// Seeds or replaces the connection's grant material and exchanges it for a
	/// token immediately.
	///
	/// Clears any cached token and failure state first, so a permanently failed
	/// connection recovers once fresh grant material arrives.
	pub async fn authorize(&self, id: &ConnectionId, grant: GrantParams) -> Result<AccessToken> {
		const KIND: OpKind = OpKind::Authorize;

		let span = OpSpan::new(KIND, "authorize");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let connection = self.connection(id)?;
				let entry = self.cache.entry(id);
				let _singleflight = entry.refresh_guard.lock().await;

				entry.reset_with_grant(grant);
				entry.set_refreshing(true);

				match exchange_token(
					&self.secrets,
					self.exchanger.as_ref(),
					&self.refresh_metrics,
					connection,
					&entry,
				)
				.await
				{
					Ok(token) => {
						entry.store_token(token.clone());

						Ok(access_token(token, false))
					},
					Err(err) => {
						match &err {
							Error::PermanentAuth { reason, .. } =>
								entry.fail_permanently(reason.clone()),
							Error::Transient(transient) =>
								entry.note_transient_failure(transient.to_string()),
							_ => entry.set_refreshing(false),
						}

						Err(err)
					},
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// Drops the connection's cached token and failure state while keeping its
	/// grant material, and evicts the cached client secret value.
	///
	/// The next request performs a fresh exchange, picking up rotated secrets.
	pub fn invalidate(&self, id: &ConnectionId) {
		if let Some(connection) = self.connections.get(id) {
			self.secrets.evict(&connection.client_secret);
		}
		if let Some(entry) = self.cache.peek(id) {
			let grant = entry.grant();

			entry.reset_with_grant(grant);
		}
	}

	/// Reports the lifecycle phase of the connection's cached credential.
	pub fn freshness(&self, id: &ConnectionId) -> Freshness {
		match self.cache.peek(id) {
			Some(entry) => entry.freshness(self.clock.now(), self.safety_margin),
			None => Freshness::Empty,
		}
	}

	fn connection(&self, id: &ConnectionId) -> Result<&Connection> {
		let connection = self
			.connections
			.get(id)
			.ok_or_else(|| ConfigError::UnknownConnection { connection: id.clone() })?;

		if connection.environment != self.environment {
			return Err(ConfigError::EnvironmentMismatch {
				connection: id.clone(),
				tagged: connection.environment,
				running: self.environment,
			}
			.into());
		}

		Ok(connection)
	}

	/// Performs an exchange while holding the connection's refresh guard.
	///
	/// Waiters queue on the guard; whoever acquires it re-reads the disposition
	/// first, so requests that piled up behind one refresh reuse its token
	/// instead of exchanging again.
	async fn refresh_inline(
		&self,
		connection: &Connection,
		entry: &Arc<CacheEntry>,
	) -> Result<AccessToken> {
		let _singleflight = entry.refresh_guard.lock().await;

		match entry.disposition(self.clock.now(), self.safety_margin) {
			Disposition::Serve(token) => return Ok(access_token(token, false)),
			Disposition::ServeStale(token) => return Ok(access_token(token, true)),
			Disposition::Fail(reason) =>
				return Err(Error::CredentialUnavailable {
					connection: connection.id.clone(),
					environment: self.environment,
					reason,
				}),
			Disposition::Refresh => {},
		}

		entry.set_refreshing(true);

		match exchange_token(
			&self.secrets,
			self.exchanger.as_ref(),
			&self.refresh_metrics,
			connection,
			entry,
		)
		.await
		{
			Ok(token) => {
				entry.store_token(token.clone());

				let stale = token.is_expiring_at(self.clock.now(), self.safety_margin);

				Ok(access_token(token, stale))
			},
			Err(Error::PermanentAuth { connection: id, environment, reason, status }) => {
				entry.fail_permanently(reason.clone());

				Err(Error::PermanentAuth { connection: id, environment, reason, status })
			},
			Err(Error::Transient(transient)) => {
				let reason = transient.to_string();

				entry.note_transient_failure(reason.clone());

				match entry.stale_fallback(self.clock.now()) {
					Some(token) => Ok(access_token(token, true)),
					None => Err(Error::CredentialUnavailable {
						connection: connection.id.clone(),
						environment: self.environment,
						reason,
					}),
				}
			},
			Err(err) => {
				entry.set_refreshing(false);

				Err(err)
			},
		}
	}

	/// Kicks off a background refresh unless one is already in flight.
	fn spawn_refresh(&self, connection: Connection, entry: Arc<CacheEntry>) {
		let Some(guard) = entry.refresh_guard.try_lock_arc() else {
			return;
		};

		entry.set_refreshing(true);

		let secrets = self.secrets.clone();
		let exchanger = self.exchanger.clone();
		let refresh_metrics = self.refresh_metrics.clone();

		tokio::spawn(async move {
			let _singleflight = guard;
			let result = exchange_token(
				&secrets,
				exchanger.as_ref(),
				&refresh_metrics,
				&connection,
				&entry,
			)
			.await;

			match result {
				Ok(token) => entry.store_token(token),
				Err(Error::PermanentAuth { reason, .. }) => entry.fail_permanently(reason),
				Err(Error::Transient(transient)) =>
					entry.note_transient_failure(transient.to_string()),
				Err(_err) => {
					entry.set_refreshing(false);

					#[cfg(feature = "tracing")]
					tracing::warn!(
						connection = %connection.id,
						error = %_err,
						"Background token refresh failed.",
					);
				},
			}
		});
	}
}
impl Debug for Broker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("environment", &self.environment)
			.field("connections", &self.connections.keys().collect::<Vec<_>>())
			.field("safety_margin", &self.safety_margin)
			.field("cache", &self.cache)
			.finish()
	}
}

fn access_token(token: Token, stale: bool) -> AccessToken {
	AccessToken { value: token.access_token, expires_at: token.expires_at, stale }
}

/// One guarded exchange attempt: resolve the client secret, call the retrying
/// exchanger with the entry's grant material, and record counters.
async fn exchange_token(
	secrets: &CachedSecretStore,
	exchanger: &dyn TokenExchanger,
	refresh_metrics: &RefreshMetrics,
	connection: &Connection,
	entry: &CacheEntry,
) -> Result<Token> {
	refresh_metrics.record_attempt();
	obs::record_op_outcome(OpKind::Refresh, OpOutcome::Attempt);

	let secret = match secrets.resolve(&connection.client_secret).await {
		Ok(secret) => secret,
		Err(err) => {
			refresh_metrics.record_failure();
			obs::record_op_outcome(OpKind::Refresh, OpOutcome::Failure);

			return Err(err.into());
		},
	};
	let grant = entry.grant();
	let result = exchanger.exchange(connection, &secret, &grant).await;

	match &result {
		Ok(_) => {
			refresh_metrics.record_success();
			obs::record_op_outcome(OpKind::Refresh, OpOutcome::Success);
		},
		Err(_) => {
			refresh_metrics.record_failure();
			obs::record_op_outcome(OpKind::Refresh, OpOutcome::Failure);
		},
	}

	result
}
