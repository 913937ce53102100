//! Secret-manager contracts, the bounded-TTL value cache, and built-in fakes.

pub mod memory;

pub use memory::MemorySecretStore;

// self
use crate::{_prelude::*, clock::Clock, conn::SecretRef, token::SecretString};

/// Default window during which a resolved secret value may be reused without a
/// new secret-manager request.
pub const DEFAULT_SECRET_TTL: Duration = Duration::seconds(300);

/// Boxed future returned by [`SecretStore`] implementations.
pub type SecretFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SecretError>> + 'a + Send>>;

/// Capability contract over the backing secret manager.
///
/// The broker only ever asks for a value by its opaque reference; creation,
/// rotation, and replication of secrets belong to the deployment tooling.
pub trait SecretStore
where
	Self: Send + Sync,
{
	/// Resolves the value stored under the provided reference.
	fn resolve_secret<'a>(&'a self, secret: &'a SecretRef) -> SecretFuture<'a, SecretString>;
}

/// Error type produced by [`SecretStore`] implementations.
///
/// Both variants carry the secret *reference* only; values never appear in
/// error output.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SecretError {
	/// The backing secret manager has no entry under the reference.
	#[error("Secret `{secret}` is not present in the backing secret manager.")]
	Unavailable {
		/// Reference that failed to resolve.
		secret: SecretRef,
	},
	/// The caller lacks permission to read the entry.
	#[error("Access to secret `{secret}` was denied.")]
	AccessDenied {
		/// Reference that was denied.
		secret: SecretRef,
	},
}

struct CachedValue {
	value: SecretString,
	fetched_at: OffsetDateTime,
}

/// Bounded-TTL cache of secret values in front of a [`SecretStore`].
///
/// Bounds secret-manager request volume: a resolved value is reused for the
/// configured TTL and re-fetched afterwards. Failures are never cached.
#[derive(Clone)]
pub struct CachedSecretStore {
	inner: Arc<dyn SecretStore>,
	clock: Arc<dyn Clock>,
	ttl: Duration,
	values: Arc<RwLock<HashMap<SecretRef, CachedValue>>>,
}
impl CachedSecretStore {
	/// Wraps the provided store with a value cache bounded by `ttl`.
	pub fn new(inner: Arc<dyn SecretStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
		Self { inner, clock, ttl, values: Default::default() }
	}

	/// Resolves a secret, serving a cached value while it remains inside the TTL.
	pub async fn resolve(&self, secret: &SecretRef) -> Result<SecretString, SecretError> {
		let now = self.clock.now();

		if let Some(hit) = self.values.read().get(secret)
			&& now - hit.fetched_at < self.ttl
		{
			return Ok(hit.value.clone());
		}

		let value = self.inner.resolve_secret(secret).await?;

		self.values
			.write()
			.insert(secret.clone(), CachedValue { value: value.clone(), fetched_at: now });

		Ok(value)
	}

	/// Drops the cached value for a reference, forcing the next resolve through.
	pub fn evict(&self, secret: &SecretRef) {
		self.values.write().remove(secret);
	}
}
impl Debug for CachedSecretStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CachedSecretStore")
			.field("ttl", &self.ttl)
			.field("cached", &self.values.read().len())
			.finish()
	}
}
