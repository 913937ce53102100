//! Broker configuration, assembled explicitly or from environment variables.

// self
use crate::{
	_prelude::*,
	cache::DEFAULT_SAFETY_MARGIN,
	conn::{Connection, ConnectionId, Environment, ProviderId, SecretRef},
	error::ConfigError,
	exchange::RetryPolicy,
	secrets::DEFAULT_SECRET_TTL,
};

/// Default per-request timeout for the HTTP exchange transport.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::seconds(30);

/// Everything a [`Broker`](crate::broker::Broker) needs at construction time.
///
/// Configuration is an explicit value handed to the constructor; nothing in the
/// broker reads process state on its own. [`BrokerConfig::from_env`] exists for
/// deployments that inject settings through environment variables.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
	/// Environment this broker instance serves.
	pub environment: Environment,
	/// Connections the broker may issue tokens for.
	pub connections: Vec<Connection>,
	/// Margin before expiry at which tokens count as expiring.
	pub safety_margin: Duration,
	/// Reuse window for resolved secret values.
	pub secret_ttl: Duration,
	/// Per-request timeout for the HTTP exchange transport.
	pub http_timeout: Duration,
	/// Backoff schedule for transient exchange failures.
	pub retry: RetryPolicy,
}
impl BrokerConfig {
	/// Creates a configuration with default timings and no connections.
	pub fn new(environment: Environment) -> Self {
		Self {
			environment,
			connections: Vec::new(),
			safety_margin: DEFAULT_SAFETY_MARGIN,
			secret_ttl: DEFAULT_SECRET_TTL,
			http_timeout: DEFAULT_HTTP_TIMEOUT,
			retry: RetryPolicy::default(),
		}
	}

	/// Adds a connection, builder style.
	pub fn with_connection(mut self, connection: Connection) -> Self {
		self.connections.push(connection);

		self
	}

	/// Overrides the expiry safety margin.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = margin;

		self
	}

	/// Overrides the secret value reuse window.
	pub fn with_secret_ttl(mut self, ttl: Duration) -> Self {
		self.secret_ttl = ttl;

		self
	}

	/// Overrides the HTTP request timeout.
	pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
		self.http_timeout = timeout;

		self
	}

	/// Overrides the retry schedule.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Loads the aggregator connection from process environment variables.
	///
	/// Reads `ENV`, `AGAVE_CLIENT_ID`, and `AGAVE_TOKEN_EXCHANGE_URL`
	/// (required), plus `AGAVE_API_VERSION` and `AGAVE_CLIENT_SECRET_NAME`
	/// (optional; the secret name defaults to `AGAVE_{ENV}_CLIENT_SECRET`).
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// [`from_env`](Self::from_env) with an injectable variable lookup, so
	/// tests avoid mutating process state.
	pub fn from_lookup(
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<Self, ConfigError> {
		let environment = required(&lookup, "ENV")?
			.parse::<Environment>()
			.map_err(|err| ConfigError::invalid_variable("ENV", err))?;
		let client_id = required(&lookup, "AGAVE_CLIENT_ID")?;
		let url = required(&lookup, "AGAVE_TOKEN_EXCHANGE_URL")?
			.parse::<Url>()
			.map_err(|err| ConfigError::invalid_variable("AGAVE_TOKEN_EXCHANGE_URL", err))?;
		let secret_name = optional(&lookup, "AGAVE_CLIENT_SECRET_NAME").unwrap_or_else(|| {
			format!("AGAVE_{}_CLIENT_SECRET", environment.as_str().to_ascii_uppercase())
		});
		let id = ConnectionId::new(format!("agave-{environment}"))?;
		let provider = ProviderId::new("agave")?;
		let secret = SecretRef::new(secret_name)?;
		let mut connection = Connection::new(id, environment, provider, client_id, secret, url);

		if let Some(version) = optional(&lookup, "AGAVE_API_VERSION") {
			connection = connection.with_api_version(version);
		}

		Ok(Self::new(environment).with_connection(connection))
	}
}

fn optional(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
	lookup(name).map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}

fn required(
	lookup: impl Fn(&str) -> Option<String>,
	name: &str,
) -> Result<String, ConfigError> {
	optional(lookup, name).ok_or_else(|| ConfigError::MissingVariable { name: name.to_owned() })
}
