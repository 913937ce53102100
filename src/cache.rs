//! Per-connection token cache and refresh lifecycle state.
//!
//! Each connection owns one [`CacheEntry`]. The entry's state moves through
//! empty, valid, expiring, refreshing, and failed phases; the broker reads a
//! [`Disposition`] to decide whether to serve, serve stale while refreshing in
//! the background, refresh inline, or fail fast. The per-entry refresh guard
//! keeps at most one exchange call in flight per connection.

// self
use crate::{
	_prelude::*,
	conn::ConnectionId,
	exchange::GrantParams,
	token::{SecretString, Token},
};

/// Default margin before expiry at which a token counts as expiring and a
/// refresh is scheduled.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(60);

/// Lifecycle phase of a connection's cached credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
	/// No token has been obtained yet.
	Empty,
	/// A token is cached and outside the safety margin.
	Valid,
	/// The cached token is inside the safety margin but still usable.
	Expiring,
	/// A refresh exchange is currently in flight.
	Refreshing,
	/// The last exchange was rejected permanently; manual intervention is
	/// required before tokens are served again.
	Failed,
}
impl Freshness {
	/// Lower-case label, used in log fields and metrics.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Empty => "empty",
			Self::Valid => "valid",
			Self::Expiring => "expiring",
			Self::Refreshing => "refreshing",
			Self::Failed => "failed",
		}
	}
}
impl Display for Freshness {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Token handed to callers, with its expiry and a staleness marker.
#[derive(Clone, Debug)]
pub struct AccessToken {
	/// The credential value.
	pub value: SecretString,
	/// Instant after which the value is no longer accepted upstream.
	pub expires_at: OffsetDateTime,
	/// `true` when the value was served inside the safety margin or as a
	/// fallback while a refresh attempt failed transiently.
	pub stale: bool,
}

/// What the broker should do for a request arriving now.
#[derive(Clone, Debug)]
pub(crate) enum Disposition {
	/// Serve the cached token as-is.
	Serve(Token),
	/// Serve the cached token and refresh in the background.
	ServeStale(Token),
	/// No usable token; refresh inline before responding.
	Refresh,
	/// The entry is permanently failed with the recorded reason.
	Fail(String),
}

#[derive(Default)]
pub(crate) struct EntryState {
	token: Option<Token>,
	grant: GrantParams,
	permanent_failure: Option<String>,
	last_transient_failure: Option<String>,
	refreshing: bool,
}

/// Mutable cache state for one connection.
pub struct CacheEntry {
	state: Mutex<EntryState>,
	// Serializes refresh attempts for this connection. Held across the
	// exchange await, which the sync state mutex must never be.
	pub(crate) refresh_guard: Arc<AsyncMutex<()>>,
}
impl Default for CacheEntry {
	fn default() -> Self {
		Self { state: Default::default(), refresh_guard: Arc::new(AsyncMutex::new(())) }
	}
}
impl CacheEntry {
	pub(crate) fn disposition(&self, now: OffsetDateTime, margin: Duration) -> Disposition {
		let state = self.state.lock();

		if let Some(reason) = &state.permanent_failure {
			return Disposition::Fail(reason.clone());
		}

		match &state.token {
			None => Disposition::Refresh,
			Some(token) if token.is_expired_at(now) => Disposition::Refresh,
			Some(token) if token.is_expiring_at(now, margin) => Disposition::ServeStale(token.clone()),
			Some(token) => Disposition::Serve(token.clone()),
		}
	}

	/// Reports the entry's lifecycle phase at the provided instant.
	pub fn freshness(&self, now: OffsetDateTime, margin: Duration) -> Freshness {
		let state = self.state.lock();

		if state.permanent_failure.is_some() {
			return Freshness::Failed;
		}
		if state.refreshing {
			return Freshness::Refreshing;
		}

		match &state.token {
			None => Freshness::Empty,
			Some(token) if token.is_expiring_at(now, margin) => Freshness::Expiring,
			Some(_) => Freshness::Valid,
		}
	}

	pub(crate) fn store_token(&self, token: Token) {
		let mut state = self.state.lock();

		if let Some(refresh) = &token.refresh_token {
			state.grant = GrantParams::refresh(refresh);
		}

		state.token = Some(token);
		state.permanent_failure = None;
		state.last_transient_failure = None;
		state.refreshing = false;
	}

	pub(crate) fn note_transient_failure(&self, reason: String) {
		let mut state = self.state.lock();

		state.last_transient_failure = Some(reason);
		state.refreshing = false;
	}

	pub(crate) fn fail_permanently(&self, reason: String) {
		let mut state = self.state.lock();

		state.token = None;
		state.permanent_failure = Some(reason);
		state.refreshing = false;
	}

	pub(crate) fn set_refreshing(&self, refreshing: bool) {
		self.state.lock().refreshing = refreshing;
	}

	pub(crate) fn grant(&self) -> GrantParams {
		self.state.lock().grant.clone()
	}

	/// Replaces the grant material and clears any cached token or failure
	/// state, so the next request performs a fresh exchange.
	pub(crate) fn reset_with_grant(&self, grant: GrantParams) {
		let mut state = self.state.lock();

		state.token = None;
		state.grant = grant;
		state.permanent_failure = None;
		state.last_transient_failure = None;
		state.refreshing = false;
	}

	/// Returns the cached token when it is still accepted upstream, for use as
	/// a stale fallback after a transient refresh failure.
	pub(crate) fn stale_fallback(&self, now: OffsetDateTime) -> Option<Token> {
		let state = self.state.lock();

		state.token.as_ref().filter(|token| !token.is_expired_at(now)).cloned()
	}
}

/// All per-connection [`CacheEntry`] values, keyed by connection id.
#[derive(Default)]
pub struct TokenCache {
	entries: RwLock<HashMap<ConnectionId, Arc<CacheEntry>>>,
}
impl TokenCache {
	/// Returns the entry for a connection, creating it on first use.
	pub fn entry(&self, id: &ConnectionId) -> Arc<CacheEntry> {
		if let Some(entry) = self.entries.read().get(id) {
			return entry.clone();
		}

		self.entries.write().entry(id.clone()).or_default().clone()
	}

	/// Returns the entry for a connection without creating one.
	pub fn peek(&self, id: &ConnectionId) -> Option<Arc<CacheEntry>> {
		self.entries.read().get(id).cloned()
	}

	/// Drops a connection's entry entirely, including its grant material.
	pub fn remove(&self, id: &ConnectionId) {
		self.entries.write().remove(id);
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache").field("entries", &self.entries.read().len()).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	const MARGIN: Duration = DEFAULT_SAFETY_MARGIN;

	fn base() -> OffsetDateTime {
		datetime!(2026-01-01 00:00 UTC)
	}

	fn token_expiring_in(expires_in: Duration) -> Token {
		Token::builder()
			.access_token("cached-token")
			.issued_at(base())
			.expires_in(expires_in)
			.build()
			.expect("Token fixture should build.")
	}

	#[test]
	fn empty_entries_ask_for_an_inline_refresh() {
		let entry = CacheEntry::default();

		assert!(matches!(entry.disposition(base(), MARGIN), Disposition::Refresh));
		assert_eq!(entry.freshness(base(), MARGIN), Freshness::Empty);
	}

	#[test]
	fn valid_tokens_are_served_directly() {
		let entry = CacheEntry::default();

		entry.store_token(token_expiring_in(Duration::hours(1)));

		assert!(matches!(entry.disposition(base(), MARGIN), Disposition::Serve(_)));
		assert_eq!(entry.freshness(base(), MARGIN), Freshness::Valid);
	}

	#[test]
	fn tokens_inside_the_margin_serve_stale() {
		let entry = CacheEntry::default();

		entry.store_token(token_expiring_in(Duration::seconds(30)));

		assert!(matches!(entry.disposition(base(), MARGIN), Disposition::ServeStale(_)));
		assert_eq!(entry.freshness(base(), MARGIN), Freshness::Expiring);
	}

	#[test]
	fn hard_expired_tokens_force_an_inline_refresh() {
		let entry = CacheEntry::default();

		entry.store_token(token_expiring_in(Duration::seconds(30)));

		let later = base() + Duration::seconds(31);

		assert!(matches!(entry.disposition(later, MARGIN), Disposition::Refresh));
		assert!(entry.stale_fallback(later).is_none());
	}

	#[test]
	fn permanent_failures_are_sticky_and_drop_the_token() {
		let entry = CacheEntry::default();

		entry.store_token(token_expiring_in(Duration::hours(1)));
		entry.fail_permanently("invalid_client".into());

		assert!(matches!(entry.disposition(base(), MARGIN), Disposition::Fail(_)));
		assert_eq!(entry.freshness(base(), MARGIN), Freshness::Failed);
		assert!(entry.stale_fallback(base()).is_none());
	}

	#[test]
	fn transient_failures_keep_the_stale_fallback() {
		let entry = CacheEntry::default();

		entry.store_token(token_expiring_in(Duration::seconds(30)));
		entry.note_transient_failure("endpoint unavailable".into());

		let fallback =
			entry.stale_fallback(base()).expect("Unexpired token should remain as fallback.");

		assert_eq!(fallback.access_token.expose(), "cached-token");
	}

	#[test]
	fn storing_a_token_clears_failure_state_and_adopts_its_refresh_grant() {
		let entry = CacheEntry::default();

		entry.fail_permanently("invalid_client".into());

		let token = Token::builder()
			.access_token("fresh-token")
			.refresh_token("refresh-secret")
			.issued_at(base())
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token fixture should build.");

		entry.store_token(token);

		assert!(matches!(entry.disposition(base(), MARGIN), Disposition::Serve(_)));
		assert_eq!(
			entry.grant().keys().collect::<Vec<_>>(),
			["grant_type", "refresh_token"],
		);
	}

	#[test]
	fn reset_with_grant_clears_everything_but_the_new_grant() {
		let entry = CacheEntry::default();

		entry.store_token(token_expiring_in(Duration::hours(1)));
		entry.fail_permanently("invalid_client".into());
		entry.reset_with_grant(GrantParams::new().with("public_token", "pt-1"));

		assert!(matches!(entry.disposition(base(), MARGIN), Disposition::Refresh));
		assert_eq!(entry.grant().keys().collect::<Vec<_>>(), ["public_token"]);
	}

	#[test]
	fn refreshing_flag_drives_the_freshness_report() {
		let entry = CacheEntry::default();

		entry.store_token(token_expiring_in(Duration::seconds(30)));
		entry.set_refreshing(true);

		assert_eq!(entry.freshness(base(), MARGIN), Freshness::Refreshing);

		entry.set_refreshing(false);

		assert_eq!(entry.freshness(base(), MARGIN), Freshness::Expiring);
	}

	#[test]
	fn cache_hands_out_one_shared_entry_per_connection() {
		let cache = TokenCache::default();
		let id = ConnectionId::new("agave-staging").expect("Id fixture should be valid.");
		let first = cache.entry(&id);
		let second = cache.entry(&id);

		assert!(Arc::ptr_eq(&first, &second));

		cache.remove(&id);

		assert!(cache.peek(&id).is_none());
	}
}
