//! Token exchange contracts, grant parameters, and retry orchestration.

#[cfg(feature = "reqwest")] pub mod http;
pub mod retry;

#[cfg(feature = "reqwest")] pub use http::HttpExchanger;
pub use retry::{RetryPolicy, RetryingExchanger};

// self
use crate::{
	_prelude::*,
	conn::Connection,
	token::{SecretString, Token},
};
#[cfg(any(test, feature = "test"))]
use crate::{clock::Clock, error::TransientError};

/// Boxed future returned by [`TokenExchanger`] implementations.
pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Result<Token>> + 'a + Send>>;

/// Transport contract for trading client credentials plus grant data for a token.
///
/// The trait is the broker's only dependency on an HTTP stack; tests drive the
/// cache and facade with scripted implementations instead of a live endpoint.
/// Implementations classify HTTP-level failures into
/// [`TransientError`](crate::error::TransientError) versus
/// [`Error::PermanentAuth`] and must never log the secret value they receive.
pub trait TokenExchanger
where
	Self: Send + Sync,
{
	/// Performs one exchange call against the connection's token endpoint.
	fn exchange<'a>(
		&'a self,
		connection: &'a Connection,
		client_secret: &'a SecretString,
		grant: &'a GrantParams,
	) -> ExchangeFuture<'a>;
}

/// Ordered grant parameters submitted with an exchange call.
///
/// The grant flow stays abstract: callers supply whatever fields their
/// aggregator expects (a one-time `public_token`, a
/// `grant_type=refresh_token` pair, or nothing for pure client-credential
/// exchanges). Values may be secret material, so `Debug` lists keys only.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrantParams(BTreeMap<String, String>);
impl GrantParams {
	/// Creates an empty parameter set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds the standard refresh-token grant for a previously issued secret.
	pub fn refresh(refresh_token: &SecretString) -> Self {
		Self::new()
			.with("grant_type", "refresh_token")
			.with("refresh_token", refresh_token.expose())
	}

	/// Adds or replaces a parameter, builder style.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.insert(key, value);

		self
	}

	/// Adds or replaces a parameter in place.
	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.0.insert(key.into(), value.into());
	}

	/// Returns `true` when no parameters are set.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Iterates parameter keys in order; values stay private to the wire layer.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	pub(crate) fn as_map(&self) -> &BTreeMap<String, String> {
		&self.0
	}
}
impl Debug for GrantParams {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_list().entries(self.keys()).finish()
	}
}

/// Scripted response consumed by [`MockExchanger`], front to back.
#[cfg(any(test, feature = "test"))]
#[derive(Clone, Debug)]
pub enum MockResponse {
	/// Successful exchange producing the provided token value.
	Token {
		/// Access token value to mint.
		value: String,
		/// Refresh token value, when the script issues one.
		refresh: Option<String>,
		/// Relative expiry stamped from the mock clock.
		expires_in: Duration,
	},
	/// Retryable failure (HTTP 503 shaped).
	Transient,
	/// Non-retryable credential rejection with the provided status.
	Permanent(u16),
}

/// Scripted [`TokenExchanger`] with a call counter, for tests.
///
/// An empty script mints `mock-token-{n}` values with one-hour expiries.
#[cfg(any(test, feature = "test"))]
pub struct MockExchanger {
	clock: Arc<dyn Clock>,
	script: Mutex<std::collections::VecDeque<MockResponse>>,
	calls: std::sync::atomic::AtomicUsize,
}
#[cfg(any(test, feature = "test"))]
impl MockExchanger {
	/// Creates an exchanger stamping issued-at instants from the provided clock.
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self { clock, script: Default::default(), calls: Default::default() }
	}

	/// Queues a successful exchange response.
	pub fn push_token(&self, value: impl Into<String>, expires_in: Duration) {
		self.push(MockResponse::Token { value: value.into(), refresh: None, expires_in });
	}

	/// Queues a successful exchange response carrying a refresh token.
	pub fn push_token_with_refresh(
		&self,
		value: impl Into<String>,
		refresh: impl Into<String>,
		expires_in: Duration,
	) {
		self.push(MockResponse::Token {
			value: value.into(),
			refresh: Some(refresh.into()),
			expires_in,
		});
	}

	/// Queues a retryable failure.
	pub fn push_transient(&self) {
		self.push(MockResponse::Transient);
	}

	/// Queues a non-retryable credential rejection.
	pub fn push_permanent(&self, status: u16) {
		self.push(MockResponse::Permanent(status));
	}

	/// Queues an arbitrary scripted response.
	pub fn push(&self, response: MockResponse) {
		self.script.lock().push_back(response);
	}

	/// Returns how many exchange calls have been made.
	pub fn calls(&self) -> usize {
		self.calls.load(std::sync::atomic::Ordering::SeqCst)
	}
}
#[cfg(any(test, feature = "test"))]
impl TokenExchanger for MockExchanger {
	fn exchange<'a>(
		&'a self,
		connection: &'a Connection,
		_client_secret: &'a SecretString,
		_grant: &'a GrantParams,
	) -> ExchangeFuture<'a> {
		Box::pin(async move {
			let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
			let scripted = self.script.lock().pop_front();
			let response = scripted.unwrap_or(MockResponse::Token {
				value: format!("mock-token-{call}"),
				refresh: None,
				expires_in: Duration::hours(1),
			});

			match response {
				MockResponse::Token { value, refresh, expires_in } => {
					let mut builder = Token::builder()
						.access_token(value)
						.issued_at(self.clock.now())
						.expires_in(expires_in);

					if let Some(refresh) = refresh {
						builder = builder.refresh_token(refresh);
					}

					builder.build().map_err(|err| crate::error::ConfigError::from(err).into())
				},
				MockResponse::Transient => Err(TransientError::TokenEndpoint {
					message: "Scripted retryable failure".into(),
					status: Some(503),
				}
				.into()),
				MockResponse::Permanent(status) => Err(Error::PermanentAuth {
					connection: connection.id.clone(),
					environment: connection.environment,
					reason: "Scripted credential rejection".into(),
					status: Some(status),
				}),
			}
		})
	}
}
