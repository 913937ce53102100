//! Connection model: environments, identifiers, and immutable integration instances.

pub mod id;

pub use id::*;

// self
use crate::_prelude::*;

/// Deployment environment tag scoping a connection and its secrets.
///
/// A broker runs in exactly one environment; configuration tagged with another
/// environment never satisfies its requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
	/// Local or shared development deployment.
	Development,
	/// Pre-production staging deployment.
	Staging,
	/// Production deployment.
	Production,
}
impl Environment {
	/// Returns a stable label suitable for identifiers, spans, and metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Environment::Development => "development",
			Environment::Staging => "staging",
			Environment::Production => "production",
		}
	}
}
impl Display for Environment {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Environment {
	type Err = UnknownEnvironment;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"development" | "dev" => Ok(Environment::Development),
			"staging" => Ok(Environment::Staging),
			"production" | "prod" => Ok(Environment::Production),
			other => Err(UnknownEnvironment(other.to_owned())),
		}
	}
}

/// Error returned when an environment label fails to parse.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Unrecognized environment `{0}`.")]
pub struct UnknownEnvironment(pub String);

/// Immutable configuration for one external integration instance.
///
/// Loaded once at process start and never mutated afterwards; the client secret
/// is referenced by an opaque [`SecretRef`] and resolved through the secret
/// store at exchange time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
	/// Logical identifier callers use to request tokens.
	pub id: ConnectionId,
	/// Environment this connection belongs to.
	pub environment: Environment,
	/// Provider behind the connection.
	pub provider: ProviderId,
	/// OAuth-style client identifier sent with every exchange.
	pub client_id: String,
	/// Handle naming the client secret in the backing secret manager.
	pub client_secret: SecretRef,
	/// Endpoint that trades grant data for tokens.
	pub token_exchange_url: Url,
	/// Provider API version header value, when the provider requires one.
	pub api_version: Option<String>,
}
impl Connection {
	/// Creates a connection without an API version pin.
	pub fn new(
		id: ConnectionId,
		environment: Environment,
		provider: ProviderId,
		client_id: impl Into<String>,
		client_secret: SecretRef,
		token_exchange_url: Url,
	) -> Self {
		Self {
			id,
			environment,
			provider,
			client_id: client_id.into(),
			client_secret,
			token_exchange_url,
			api_version: None,
		}
	}

	/// Sets or replaces the provider API version header value.
	pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
		self.api_version = Some(version.into());

		self
	}
}
