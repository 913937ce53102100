//! Broker-level error taxonomy shared by the secret store, exchange client, and cache.

// self
use crate::{
	_prelude::*,
	conn::{ConnectionId, Environment, IdentifierError},
	token::TokenBuilderError,
};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
///
/// Messages carry connection and environment context but never secret values;
/// anything sensitive stays behind [`SecretString`](crate::token::SecretString).
#[derive(Debug, ThisError)]
pub enum Error {
	/// Secret-manager failure while resolving a connection's client secret.
	#[error(transparent)]
	Secret(#[from] crate::secrets::SecretError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retried with backoff before surfacing.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Exchange endpoint rejected the credentials or the grant; never retried.
	#[error("Provider rejected the credentials for `{connection}` ({environment}): {reason}.")]
	PermanentAuth {
		/// Connection whose credentials were rejected.
		connection: ConnectionId,
		/// Environment tag of the rejected connection.
		environment: Environment,
		/// Provider- or broker-supplied reason string.
		reason: String,
		/// HTTP status code returned by the exchange endpoint, when available.
		status: Option<u16>,
	},
	/// No usable token exists and refresh attempts are exhausted.
	#[error("No usable token for `{connection}` ({environment}): {reason}.")]
	CredentialUnavailable {
		/// Connection the caller requested a token for.
		connection: ConnectionId,
		/// Environment tag of the connection.
		environment: Environment,
		/// Summary of the failure that exhausted the refresh.
		reason: String,
	},
}

/// Configuration and validation failures raised by the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Required environment variable is absent or blank.
	#[error("Environment variable `{name}` is missing or empty.")]
	MissingVariable {
		/// Variable name.
		name: String,
	},
	/// Environment variable holds a value that fails to parse.
	#[error("Environment variable `{name}` contains an invalid value.")]
	InvalidVariable {
		/// Variable name.
		name: String,
		/// Underlying parsing failure.
		#[source]
		source: BoxError,
	},
	/// Identifier validation failed while assembling configuration.
	#[error("Invalid identifier in configuration.")]
	InvalidIdentifier(#[from] IdentifierError),
	/// No connection is configured under the requested identifier.
	#[error("Unknown connection `{connection}`.")]
	UnknownConnection {
		/// Identifier the caller supplied.
		connection: ConnectionId,
	},
	/// Connection belongs to a different environment than the running broker.
	#[error("Connection `{connection}` is tagged `{tagged}` but the broker runs in `{running}`.")]
	EnvironmentMismatch {
		/// Connection whose tag conflicts.
		connection: ConnectionId,
		/// Environment the connection is tagged with.
		tagged: Environment,
		/// Environment the broker was constructed for.
		running: Environment,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned a non-positive lifetime.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] TokenBuilderError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	/// Wraps a parse failure for the named environment variable.
	pub fn invalid_variable(
		name: impl Into<String>,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::InvalidVariable { name: name.into(), source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Exchange endpoint answered with a retryable status (5xx, 408, 429).
	#[error("Token endpoint returned a retryable response: {message}.")]
	TokenEndpoint {
		/// Provider- or broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Request exceeded the configured HTTP timeout.
	#[error("Request to the token endpoint timed out.")]
	Timeout,
	/// Underlying transport reported a network failure (DNS, TCP, TLS).
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Exchange endpoint responded with malformed JSON.
	#[error("Token endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}
impl TransientError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
