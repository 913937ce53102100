#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use credential_broker::{
	broker::Broker,
	cache::Freshness,
	config::BrokerConfig,
	conn::{Connection, ConnectionId, Environment, ProviderId, SecretRef},
	error::Error,
	exchange::{GrantParams, RetryPolicy},
	secrets::MemorySecretStore,
	url::Url,
};
// std
use std::{sync::Arc, time::Duration as StdDuration};

const CLIENT_ID: &str = "client-it";
const CLIENT_SECRET: &str = "secret-it";
const SECRET_NAME: &str = "AGAVE_STAGING_CLIENT_SECRET";
const EXCHANGE_PATH: &str = "/link/token/exchange";

fn connection_id() -> ConnectionId {
	ConnectionId::new("agave-staging").expect("Connection identifier should be valid.")
}

fn build_connection(server: &MockServer) -> Connection {
	Connection::new(
		connection_id(),
		Environment::Staging,
		ProviderId::new("agave").expect("Provider identifier should be valid."),
		CLIENT_ID,
		SecretRef::new(SECRET_NAME).expect("Secret reference should be valid."),
		Url::parse(&server.url(EXCHANGE_PATH)).expect("Mock exchange endpoint should parse."),
	)
	.with_api_version("2021-11-21")
}

fn build_broker(server: &MockServer) -> Broker {
	let secrets = Arc::new(MemorySecretStore::default());

	secrets.insert(
		SecretRef::new(SECRET_NAME).expect("Secret reference should be valid."),
		CLIENT_SECRET,
	);

	let config = BrokerConfig::new(Environment::Staging)
		.with_connection(build_connection(server))
		.with_retry(RetryPolicy {
			base_delay: time::Duration::milliseconds(1),
			factor: 2,
			max_attempts: 3,
		});

	Broker::new(config, secrets).expect("Broker should construct with the default transport.")
}

#[tokio::test]
async fn authorize_posts_grant_json_with_credential_headers() {
	let server = MockServer::start_async().await;
	let broker = build_broker(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(EXCHANGE_PATH)
				.header("Client-Id", CLIENT_ID)
				.header("Client-Secret", CLIENT_SECRET)
				.header("API-Version", "2021-11-21")
				.json_body(json!({ "public_token": "pt-link-1" }));
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"account_token":"acct-token-1","expires_in":3600}"#);
		})
		.await;
	let token = broker
		.authorize(&connection_id(), GrantParams::new().with("public_token", "pt-link-1"))
		.await
		.expect("Authorization exchange should succeed.");

	mock.assert_async().await;

	assert_eq!(token.value.expose(), "acct-token-1");
	assert!(!token.stale);
	assert_eq!(broker.freshness(&connection_id()), Freshness::Valid);

	// The cached token answers subsequent requests without another exchange.
	let cached = broker
		.get_access_token(&connection_id())
		.await
		.expect("Cached token should be served.");

	assert_eq!(cached.value.expose(), "acct-token-1");
	assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn concurrent_cold_requests_hit_the_endpoint_once() {
	let server = MockServer::start_async().await;
	let broker = Arc::new(build_broker(&server));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"shared-token","expires_in":3600}"#);
		})
		.await;
	let id = connection_id();
	let (a, b, c) = tokio::join!(
		broker.get_access_token(&id),
		broker.get_access_token(&id),
		broker.get_access_token(&id),
	);

	for token in [a, b, c] {
		let token = token.expect("Every concurrent waiter should receive a token.");

		assert_eq!(token.value.expose(), "shared-token");
	}

	assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn rejected_credentials_fail_permanently_until_invalidated() {
	let server = MockServer::start_async().await;
	let broker = build_broker(&server);
	let rejection = server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH);
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"error":"invalid_client"}"#);
		})
		.await;
	let err = broker
		.get_access_token(&connection_id())
		.await
		.expect_err("Rejected credentials should error.");

	assert!(
		matches!(err, Error::PermanentAuth { status: Some(401), ref reason, .. } if reason == "invalid_client"),
	);
	assert_eq!(rejection.hits_async().await, 1);
	assert_eq!(broker.freshness(&connection_id()), Freshness::Failed);

	// The failed entry does not retry on its own.
	let err = broker
		.get_access_token(&connection_id())
		.await
		.expect_err("Failed entries should not retry on their own.");

	assert!(matches!(err, Error::CredentialUnavailable { .. }));
	assert_eq!(rejection.hits_async().await, 1);

	rejection.delete_async().await;
	server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"recovered-token","expires_in":3600}"#);
		})
		.await;
	broker.invalidate(&connection_id());

	let token = broker
		.get_access_token(&connection_id())
		.await
		.expect("Invalidation should allow a fresh exchange.");

	assert_eq!(token.value.expose(), "recovered-token");
}

#[tokio::test]
async fn server_errors_retry_with_backoff_before_surfacing() {
	let server = MockServer::start_async().await;
	let broker = build_broker(&server);
	let outage = server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH);
			then.status(503)
				.header("content-type", "application/json")
				.body(r#"{"message":"exchange temporarily unavailable"}"#);
		})
		.await;
	let err = broker
		.get_access_token(&connection_id())
		.await
		.expect_err("Persistent outage should exhaust retries.");

	assert!(matches!(err, Error::CredentialUnavailable { .. }));
	assert_eq!(outage.hits_async().await, 3);

	// The outage is not sticky; a recovered endpoint serves the next request.
	outage.delete_async().await;
	server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"post-outage-token","expires_in":3600}"#);
		})
		.await;

	let token = broker
		.get_access_token(&connection_id())
		.await
		.expect("Recovered endpoint should mint a token.");

	assert_eq!(token.value.expose(), "post-outage-token");
}

#[tokio::test]
async fn malformed_success_bodies_classify_as_transient() {
	let server = MockServer::start_async().await;
	let broker = build_broker(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH);
			then.status(200).header("content-type", "application/json").body("not-json");
		})
		.await;
	let err = broker
		.get_access_token(&connection_id())
		.await
		.expect_err("Malformed payloads should exhaust retries.");

	assert!(matches!(err, Error::CredentialUnavailable { .. }));
	assert_eq!(mock.hits_async().await, 3);
}

#[tokio::test]
async fn request_timeouts_classify_as_transient() {
	let server = MockServer::start_async().await;
	let secrets = Arc::new(MemorySecretStore::default());

	secrets.insert(
		SecretRef::new(SECRET_NAME).expect("Secret reference should be valid."),
		CLIENT_SECRET,
	);

	let config = BrokerConfig::new(Environment::Staging)
		.with_connection(build_connection(&server))
		.with_http_timeout(time::Duration::milliseconds(50))
		.with_retry(RetryPolicy {
			base_delay: time::Duration::milliseconds(1),
			factor: 2,
			max_attempts: 2,
		});
	let broker =
		Broker::new(config, secrets).expect("Broker should construct with the default transport.");
	let slow = server
		.mock_async(|when, then| {
			when.method(POST).path(EXCHANGE_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"too-late","expires_in":3600}"#)
				.delay(StdDuration::from_millis(500));
		})
		.await;
	let err = broker
		.get_access_token(&connection_id())
		.await
		.expect_err("Slow endpoint should exhaust retries.");

	assert!(matches!(err, Error::CredentialUnavailable { .. }));
	assert_eq!(slow.hits_async().await, 2);
}
