//! Async credential broker—exchange, cache, and refresh third-party aggregator
//! tokens with singleflight guards, environment-scoped secrets, and bounded retries.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod broker;
pub mod cache;
pub mod clock;
pub mod config;
pub mod conn;
pub mod error;
pub mod exchange;
pub mod obs;
pub mod secrets;
pub mod token;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for unit and integration tests; enabled via
	//! `cfg(test)` or the `test` crate feature.

	pub use crate::_prelude::*;

	// crates.io
	use time::macros::datetime;
	// self
	use crate::{
		broker::Broker,
		clock::{ManualClock, RecordingSleeper},
		config::BrokerConfig,
		conn::{Connection, ConnectionId, Environment, ProviderId, SecretRef},
		exchange::{MockExchanger, RetryPolicy},
		secrets::MemorySecretStore,
	};

	/// Secret reference used by every test connection.
	pub const TEST_SECRET_REF: &str = "AGAVE_STAGING_CLIENT_SECRET";
	/// Client secret value seeded into the in-memory secret store.
	pub const TEST_SECRET_VALUE: &str = "shhh-client-secret";

	/// Broker plus the injected fakes, so tests can drive the clock and inspect calls.
	pub struct TestBroker {
		/// Broker under test.
		pub broker: Broker,
		/// Scripted exchanger with a call counter.
		pub exchanger: Arc<MockExchanger>,
		/// Manually advanced clock shared by the broker and the exchanger.
		pub clock: Arc<ManualClock>,
		/// Sleeper that records requested delays instead of waiting.
		pub sleeper: Arc<RecordingSleeper>,
		/// Backing secret store fake.
		pub secrets: Arc<MemorySecretStore>,
	}

	/// Builds a test connection for the provided environment pointing at a placeholder
	/// exchange URL.
	pub fn test_connection(environment: Environment) -> Connection {
		let id = ConnectionId::new(format!("agave-{environment}"))
			.expect("Connection identifier fixture should be valid.");
		let provider = ProviderId::new("agave").expect("Provider fixture should be valid.");
		let secret = SecretRef::new(TEST_SECRET_REF).expect("Secret reference should be valid.");
		let url = Url::parse("https://api.agaveapi.test/link/token/exchange")
			.expect("Exchange URL fixture should parse.");

		Connection::new(id, environment, provider, "client-id-123", secret, url)
			.with_api_version("2021-11-21")
	}

	/// Constructs a [`Broker`] wired to a scripted exchanger, manual clock, and an
	/// in-memory secret store.
	pub fn build_test_broker(environment: Environment) -> TestBroker {
		let clock = Arc::new(ManualClock::new(datetime!(2026-01-01 00:00 UTC)));
		let sleeper = Arc::new(RecordingSleeper::default());
		let exchanger = Arc::new(MockExchanger::new(clock.clone()));
		let secrets = Arc::new(MemorySecretStore::default());

		secrets.insert(
			SecretRef::new(TEST_SECRET_REF).expect("Secret reference should be valid."),
			TEST_SECRET_VALUE,
		);

		let config = BrokerConfig::new(environment)
			.with_connection(test_connection(environment))
			.with_retry(RetryPolicy {
				base_delay: Duration::milliseconds(1),
				factor: 2,
				max_attempts: 3,
			});
		let broker = Broker::with_exchanger(
			config,
			secrets.clone(),
			exchanger.clone(),
			clock.clone(),
			sleeper.clone(),
		);

		TestBroker { broker, exchanger, clock, sleeper, secrets }
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
