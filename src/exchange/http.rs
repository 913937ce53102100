//! Reqwest-backed exchange transport with HTTP failure classification.
//!
//! The transport posts the grant parameters as JSON to the connection's token
//! exchange URL and authenticates with `Client-Id`/`Client-Secret` headers
//! (plus `API-Version` when the connection pins one), matching the
//! aggregator's wire shape. Timeouts, 5xx, 408, and 429 classify as transient;
//! every other 4xx is a permanent credential rejection.

// crates.io
use reqwest::{StatusCode, header::ACCEPT, redirect::Policy};
// self
use crate::{
	_prelude::*,
	conn::Connection,
	error::{ConfigError, TransientError},
	exchange::{ExchangeFuture, GrantParams, TokenExchanger},
	token::{SecretString, Token},
};

/// Reqwest-backed [`TokenExchanger`].
///
/// Token requests never follow redirects; exchange endpoints return results
/// directly instead of delegating to another URI.
#[derive(Clone)]
pub struct HttpExchanger {
	client: ReqwestClient,
}
impl HttpExchanger {
	/// Builds a transport whose requests abort after the provided timeout.
	pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
		let timeout =
			std::time::Duration::try_from(timeout).map_err(ConfigError::http_client_build)?;
		let client =
			ReqwestClient::builder().timeout(timeout).redirect(Policy::none()).build()?;

		Ok(Self { client })
	}

	/// Wraps an existing [`ReqwestClient`]. The client should disable redirect
	/// following and carry a request timeout.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client }
	}
}
impl TokenExchanger for HttpExchanger {
	fn exchange<'a>(
		&'a self,
		connection: &'a Connection,
		client_secret: &'a SecretString,
		grant: &'a GrantParams,
	) -> ExchangeFuture<'a> {
		Box::pin(async move {
			let mut request = self
				.client
				.post(connection.token_exchange_url.clone())
				.header(ACCEPT, "application/json")
				.header("Client-Id", connection.client_id.as_str())
				.header("Client-Secret", client_secret.expose())
				.json(grant.as_map());

			if let Some(version) = &connection.api_version {
				request = request.header("API-Version", version.as_str());
			}

			let response = request.send().await.map_err(map_send_error)?;
			let status = response.status();
			let body = response.bytes().await.map_err(map_send_error)?;

			if status.is_success() {
				parse_token_response(&body, status.as_u16())
			} else {
				Err(classify_error_status(connection, status, &body))
			}
		})
	}
}

/// Successful token endpoint payload. `account_token` is accepted as an alias
/// for aggregators that name the credential after the linked account.
#[derive(Deserialize)]
struct TokenEndpointResponse {
	#[serde(alias = "account_token")]
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	scope: Option<String>,
}

/// Error payload shapes seen across aggregator endpoints.
#[derive(Deserialize)]
struct ErrorBody {
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
	#[serde(default)]
	message: Option<String>,
}

fn map_send_error(err: ReqwestError) -> Error {
	if err.is_timeout() {
		return TransientError::Timeout.into();
	}

	TransientError::network(err).into()
}

fn parse_token_response(body: &[u8], status: u16) -> Result<Token> {
	let mut deserializer = serde_json::Deserializer::from_slice(body);
	let payload: TokenEndpointResponse = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| TransientError::ResponseParse { source, status: Some(status) })?;
	let expires_in = payload.expires_in.ok_or(ConfigError::MissingExpiresIn)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let mut builder = Token::builder()
		.access_token(payload.access_token)
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(Duration::seconds(expires_in));

	if let Some(refresh) = payload.refresh_token {
		builder = builder.refresh_token(refresh);
	}
	if let Some(scope) = payload.scope {
		builder = builder.scope(scope);
	}

	builder.build().map_err(|err| ConfigError::from(err).into())
}

fn classify_error_status(connection: &Connection, status: StatusCode, body: &[u8]) -> Error {
	let reason = extract_error_message(body)
		.unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_owned());

	if status.is_server_error()
		|| status == StatusCode::REQUEST_TIMEOUT
		|| status == StatusCode::TOO_MANY_REQUESTS
	{
		return TransientError::TokenEndpoint {
			message: format!("Token endpoint returned {status}: {reason}"),
			status: Some(status.as_u16()),
		}
		.into();
	}

	Error::PermanentAuth {
		connection: connection.id.clone(),
		environment: connection.environment,
		reason,
		status: Some(status.as_u16()),
	}
}

fn extract_error_message(body: &[u8]) -> Option<String> {
	let payload: ErrorBody = serde_json::from_slice(body).ok()?;

	payload.error_description.or(payload.message).or(payload.error)
}
