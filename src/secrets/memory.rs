//! Thread-safe in-memory [`SecretStore`] implementation for local development and tests.

// std
use std::collections::HashSet;
// self
use crate::{
	_prelude::*,
	conn::SecretRef,
	secrets::{SecretError, SecretFuture, SecretStore},
	token::SecretString,
};

/// In-process secret store fake with a deny-list for permission failures.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
	values: RwLock<HashMap<SecretRef, SecretString>>,
	denied: RwLock<HashSet<SecretRef>>,
}
impl MemorySecretStore {
	/// Stores or replaces a secret value under the provided reference.
	pub fn insert(&self, secret: SecretRef, value: impl Into<String>) {
		self.values.write().insert(secret, SecretString::new(value));
	}

	/// Removes the value under the provided reference, if present.
	pub fn remove(&self, secret: &SecretRef) {
		self.values.write().remove(secret);
	}

	/// Marks a reference as permission-denied regardless of stored values.
	pub fn deny(&self, secret: SecretRef) {
		self.denied.write().insert(secret);
	}

	/// Clears a previous [`deny`](Self::deny) mark.
	pub fn allow(&self, secret: &SecretRef) {
		self.denied.write().remove(secret);
	}
}
impl SecretStore for MemorySecretStore {
	fn resolve_secret<'a>(&'a self, secret: &'a SecretRef) -> SecretFuture<'a, SecretString> {
		Box::pin(async move {
			if self.denied.read().contains(secret) {
				return Err(SecretError::AccessDenied { secret: secret.clone() });
			}

			self.values
				.read()
				.get(secret)
				.cloned()
				.ok_or_else(|| SecretError::Unavailable { secret: secret.clone() })
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn secret_ref(name: &str) -> SecretRef {
		SecretRef::new(name).expect("Secret fixture should be valid.")
	}

	#[tokio::test]
	async fn resolves_stored_values() {
		let store = MemorySecretStore::default();

		store.insert(secret_ref("AGAVE_DEV_CLIENT_SECRET"), "dev-secret");

		let value = store
			.resolve_secret(&secret_ref("AGAVE_DEV_CLIENT_SECRET"))
			.await
			.expect("Stored secret should resolve.");

		assert_eq!(value.expose(), "dev-secret");
	}

	#[tokio::test]
	async fn missing_entries_surface_unavailable() {
		let store = MemorySecretStore::default();
		let result = store.resolve_secret(&secret_ref("NOPE")).await;

		assert_eq!(result, Err(SecretError::Unavailable { secret: secret_ref("NOPE") }));
	}

	#[tokio::test]
	async fn deny_list_wins_over_stored_values() {
		let store = MemorySecretStore::default();
		let name = secret_ref("AGAVE_PROD_CLIENT_SECRET");

		store.insert(name.clone(), "prod-secret");
		store.deny(name.clone());

		let result = store.resolve_secret(&name).await;

		assert_eq!(result, Err(SecretError::AccessDenied { secret: name.clone() }));

		store.allow(&name);

		assert!(store.resolve_secret(&name).await.is_ok());
	}
}
