//! HTTP transport adapter: a pluggable interface to perform a single HTTP round-trip with
//! a per-call timeout. The dispatcher and operation layer depend only on
//! [`HttpTransport`]; [`ReqwestHttpClient`] is the default implementation.

// self
use crate::{_prelude::*, error::TransportError};

/// A single outbound HTTP request, already fully assembled by the operation layer.
#[derive(Clone, Debug)]
pub struct HttpRequestSpec {
	/// HTTP method (`GET`, `PUT`, `POST`, `DELETE`, `HEAD`).
	pub method: Method,
	/// Absolute request URI.
	pub url: Url,
	/// Request headers, including any `X-v3io-function` discriminator.
	pub headers: Vec<(String, String)>,
	/// Optional request body.
	pub body: Option<bytes::Bytes>,
	/// Per-call timeout; bounds the transport round-trip only.
	pub timeout: Duration,
}
impl HttpRequestSpec {
	/// Creates a new request spec with no headers, no body, and the crate's default
	/// per-call timeout.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: Vec::new(), body: None, timeout: Duration::seconds(30) }
	}

	/// Appends a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Sets the request body.
	pub fn with_body(mut self, body: impl Into<bytes::Bytes>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Overrides the per-call timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}
}

/// HTTP methods the operation layer needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
	/// `GET`.
	Get,
	/// `PUT`.
	Put,
	/// `POST`.
	Post,
	/// `DELETE`.
	Delete,
	/// `HEAD`.
	Head,
}

/// Raw HTTP response returned by the transport: status + headers + body.
#[derive(Clone, Debug)]
pub struct HttpResponseRaw {
	/// HTTP status code.
	pub status: u16,
	/// Response headers.
	pub headers: Vec<(String, String)>,
	/// Response body.
	pub body: bytes::Bytes,
}
impl HttpResponseRaw {
	/// Looks up a header by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// Boxed future returned by [`HttpTransport::call`].
pub type HttpFuture<'a, E> = Pin<Box<dyn Future<Output = std::result::Result<HttpResponseRaw, E>> + 'a + Send>>;

/// Pluggable HTTP transport: a single round-trip, nothing more. Connection pooling, TLS,
/// and per-call timeout enforcement live inside the implementation, out of scope
/// for this crate beyond the interface named here.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Executes a single request, honoring [`HttpRequestSpec::timeout`].
	fn call(&self, request: HttpRequestSpec) -> HttpFuture<'_, Self::TransportError>;
}

/// Converts a transport-specific error into the crate's [`Error`] taxonomy.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Maps a raw transport error into [`TransportError`].
	fn map_transport_error(&self, error: E) -> TransportError;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestHttpClient {
	type TransportError = ReqwestError;

	fn call(&self, request: HttpRequestSpec) -> HttpFuture<'_, Self::TransportError> {
		let client = self.0.clone();

		Box::pin(async move {
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Put => reqwest::Method::PUT,
				Method::Post => reqwest::Method::POST,
				Method::Delete => reqwest::Method::DELETE,
				Method::Head => reqwest::Method::HEAD,
			};
			let mut builder = client
				.request(method, request.url)
				.timeout(request.timeout.unsigned_abs());

			for (name, value) in &request.headers {
				builder = builder.header(name, value);
			}
			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
				})
				.collect();
			let body = response.bytes().await?;

			Ok(HttpResponseRaw { status, headers, body })
		})
	}
}

/// Default mapper for the reqwest-backed transport.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(&self, error: ReqwestError) -> TransportError {
		TransportError::from(error)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn request_spec_builder_sets_fields() {
		let url = Url::parse("https://h/c/a").unwrap();
		let spec = HttpRequestSpec::new(Method::Put, url.clone())
			.with_header("X-v3io-function", "PutItem")
			.with_body(bytes::Bytes::from_static(b"{}"))
			.with_timeout(Duration::seconds(5));

		assert_eq!(spec.method, Method::Put);
		assert_eq!(spec.url, url);
		assert_eq!(spec.headers, vec![("X-v3io-function".to_string(), "PutItem".to_string())]);
		assert_eq!(spec.body.as_deref(), Some(&b"{}"[..]));
		assert_eq!(spec.timeout, Duration::seconds(5));
	}

	#[test]
	fn response_header_lookup_is_case_insensitive() {
		let response = HttpResponseRaw {
			status: 200,
			headers: vec![("Content-Type".to_string(), "application/json".to_string())],
			body: bytes::Bytes::new(),
		};

		assert_eq!(response.header("content-type"), Some("application/json"));
	}
}
