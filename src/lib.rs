//! Client for a multi-tenant object/key-value/stream data service exposed over
//! HTTP — sync and async operation surfaces over the same endpoint, plus a
//! stream consumer-group coordinator built on top of the data plane.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod codec;
pub mod consumer_group;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod obs;
pub mod ops;
pub mod response;
pub mod session;
pub mod uri;

#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		dispatcher::Dispatcher,
		http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
		session::{AuthMethod, Session},
	};

	/// Dispatcher type alias used by reqwest-backed integration tests.
	pub type ReqwestTestDispatcher = Dispatcher<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Constructs a [`Dispatcher`] backed by the reqwest transport used across integration
	/// tests, addressed at the given base URL with an access-key session.
	pub fn build_reqwest_test_dispatcher(url: &str, access_key: &str) -> ReqwestTestDispatcher {
		let session = Session::new(url, AuthMethod::AccessKey(access_key.to_string()))
			.expect("Session fixture should be valid.");
		let http_client = test_reqwest_http_client();
		let mapper = Arc::new(ReqwestTransportErrorMapper);

		Dispatcher::with_http_client(session, http_client, mapper)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
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
#[cfg(all(test, feature = "reqwest"))] use httpmock as _;
