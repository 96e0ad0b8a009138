//! Error taxonomy shared across the dispatcher, operation layer, and consumer-group
//! coordinator.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Header whose value must never appear in a log line or error message.
pub const SESSION_KEY_HEADER: &str = "X-V3io-Session-Key";

/// Canonical client error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Input failed validation before any network I/O was attempted.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// Transport-level failure (network, timeout, or the retried connection-closed class).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Non-2xx HTTP response.
	#[error(transparent)]
	Status(#[from] StatusError),
	/// JSON or binary-frame decode failure.
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// Consumer-group coordinator failure.
	#[error(transparent)]
	Coordinator(#[from] CoordinatorError),
}
impl Error {
	/// Returns the response buffer carried by a [`StatusError`] or [`DecodeError`], if the
	/// input requested that the response be attached to the error on failure.
	pub fn take_response_body(&mut self) -> Option<bytes::Bytes> {
		match self {
			Error::Status(e) => e.body.take(),
			Error::Decode(DecodeError::Frame { body, .. }) => body.take(),
			_ => None,
		}
	}

	/// Returns true when the server rejected a conditional expression.
	pub fn is_precondition_failure(&self) -> bool {
		matches!(self, Error::Status(e) if e.is_precondition_failure())
	}
}

/// Input validation failures, surfaced before any I/O.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ValidationError {
	/// `DataPlaneInput::container` was empty.
	#[error("Container name must not be empty.")]
	EmptyContainer,
	/// An attribute value could not be represented in one of the six supported kinds.
	#[error("Attribute `{name}` has an unsupported or malformed value: {reason}.")]
	MalformedAttribute {
		/// Attribute name.
		name: String,
		/// Human-readable reason.
		reason: String,
	},
	/// A request path was empty or otherwise unusable.
	#[error("Path must not be empty.")]
	EmptyPath,
	/// The cancellation token passed to an operation was already cancelled.
	#[error("Operation was cancelled before it was enqueued.")]
	AlreadyCancelled,
}

/// Transport-level failures (network, IO, and the dispatcher's one retried class).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// The peer closed the connection between requests; the dispatcher retries this class
	/// in-place up to 8 attempts.
	#[error("Connection closed by peer between requests.")]
	ConnectionClosed,
	/// The per-call timeout elapsed before the round-trip completed.
	#[error("Request timed out.")]
	Timeout,
	/// The operation's cancellation token was signalled while the round-trip was
	/// in flight.
	#[error("Operation was cancelled while in flight.")]
	Cancelled,
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the data plane.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the data plane.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Returns true for the single class of error the dispatcher retries in-place.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::ConnectionClosed)
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() {
			return Self::Timeout;
		}
		if is_connection_closed(&e) {
			return Self::ConnectionClosed;
		}

		Self::network(e)
	}
}

#[cfg(feature = "reqwest")]
fn is_connection_closed(e: &ReqwestError) -> bool {
	let mut source: Option<&(dyn std::error::Error + 'static)> = e.source();

	while let Some(err) = source {
		let text = err.to_string();

		if text.contains("connection closed")
			|| text.contains("broken pipe")
			|| text.contains("connection reset")
		{
			return true;
		}

		source = err.source();
	}

	false
}

/// Non-2xx HTTP response.
#[derive(Debug, ThisError)]
#[error("Data plane returned HTTP status {status}: {message}")]
pub struct StatusError {
	/// HTTP status code returned by the server.
	pub status: u16,
	/// Redacted, human-readable message describing the failure.
	pub message: String,
	/// Response body, present only when the caller requested response-in-error.
	pub body: Option<bytes::Bytes>,
}
impl StatusError {
	/// Builds a status error from a status code and a set of request headers, redacting
	/// the session-key header value out of the message.
	pub fn new(status: u16, context: impl AsRef<str>, headers: &HeaderRedactor) -> Self {
		let message = headers.redact(context.as_ref());

		Self { status, message, body: None }
	}

	/// Attaches a response body, transferring ownership into the error.
	pub fn with_body(mut self, body: bytes::Bytes) -> Self {
		self.body = Some(body);

		self
	}

	/// Returns true when the status code denotes a rejected conditional expression.
	pub fn is_precondition_failure(&self) -> bool {
		matches!(self.status, 403 | 409 | 412)
	}
}

/// Redacts sensitive header values (session key, bearer tokens) out of any string that
/// may end up in a log line or error message.
#[derive(Clone, Debug, Default)]
pub struct HeaderRedactor {
	secrets: Vec<String>,
}
impl HeaderRedactor {
	/// Creates a redactor that will scrub the given secret values wherever they occur.
	pub fn new(secrets: impl IntoIterator<Item = String>) -> Self {
		Self { secrets: secrets.into_iter().filter(|s| !s.is_empty()).collect() }
	}

	/// Returns `text` with every known secret value replaced by `***`.
	pub fn redact(&self, text: &str) -> String {
		let mut out = text.to_owned();

		for secret in &self.secrets {
			out = out.replace(secret.as_str(), "***");
		}

		out
	}
}

/// JSON or binary-frame decode failures.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// JSON envelope could not be parsed into an item or typed attribute.
	#[error("Failed to decode JSON response body.")]
	Json(#[from] serde_path_to_error::Error<serde_json::Error>),
	/// The framed binary envelope used by `GetItems` was malformed.
	#[error("Failed to decode binary frame: {message}.")]
	Frame {
		/// Human-readable reason.
		message: String,
		/// Raw response body, retained only when the caller requested response-in-error.
		body: Option<bytes::Bytes>,
	},
	/// The `__mtime_secs==<n> and __mtime_nsecs==<n>` header did not match the expected shape.
	#[error("Modification-time header `{raw}` does not match the expected shape.")]
	Mtime {
		/// Raw header value that failed to parse.
		raw: String,
	},
}
impl DecodeError {
	/// Builds a framing error, optionally retaining the body for response-in-error callers.
	pub fn frame(message: impl Into<String>, body: Option<bytes::Bytes>) -> Self {
		Self::Frame { message: message.into(), body }
	}
}

/// Consumer-group coordinator failures.
#[derive(Debug, ThisError)]
pub enum CoordinatorError {
	/// The compare-and-swap loop exhausted its retry budget; fatal for the session.
	#[error("Compare-and-swap on the consumer-group state exhausted {attempts} attempts.")]
	CasExhausted {
		/// Number of attempts made before giving up.
		attempts: u32,
	},
	/// The persisted shared state could not be parsed.
	#[error("Consumer-group state document is malformed: {reason}.")]
	MalformedState {
		/// Human-readable reason.
		reason: String,
	},
	/// The session lost its heartbeat and all claims were torn down.
	#[error("Consumer-group session lost: {reason}.")]
	SessionLost {
		/// Human-readable reason.
		reason: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn redaction_scrubs_secret_values() {
		let redactor = HeaderRedactor::new(["super-secret-key".to_string()]);
		let message = redactor.redact("request failed: X-V3io-Session-Key: super-secret-key");

		assert!(!message.contains("super-secret-key"));
		assert!(message.contains("***"));
	}

	#[test]
	fn status_error_classifies_precondition_failures() {
		let redactor = HeaderRedactor::default();
		let err = StatusError::new(403, "condition failed", &redactor);

		assert!(err.is_precondition_failure());

		let err = StatusError::new(500, "internal error", &redactor);

		assert!(!err.is_precondition_failure());
	}

	#[test]
	fn transport_error_retry_classification() {
		assert!(TransportError::ConnectionClosed.is_retryable());
		assert!(!TransportError::Timeout.is_retryable());
	}
}
