//! Typed synchronous operations against containers, objects, items, and streams.
//!
//! Every operation accepts a [`DataPlaneInput`] plus operation-specific fields and either
//! returns a typed output alongside the [`Response`] buffer the caller must release, or an
//! error. The HTTP method, path, headers, and body shape are fixed per operation and
//! summarised in the external-interfaces table; this module is where that table becomes
//! code.

pub mod container;
pub mod item;
pub mod object;
pub mod stream;

// self
use crate::{
	_prelude::*,
	codec::ModificationTime,
	error::ValidationError,
	http::HttpRequestSpec,
	session::AuthMethod,
};

/// Cross-cutting parameters attached to every data-plane operation.
#[derive(Clone, Debug)]
pub struct DataPlaneInput {
	/// Tenant container name; must not be empty.
	pub container: String,
	/// Cooperative cancellation signal, checked before the request is enqueued and honored
	/// by the transport round-trip.
	pub cancellation: CancellationToken,
	/// Per-call auth override; defaults to the dispatcher's session auth when `None`.
	pub auth_override: Option<AuthMethod>,
	/// Optional precondition modification time, sent as a conditional-mtime header.
	pub precondition_mtime: Option<ModificationTime>,
	/// Per-call timeout; bounds the transport round-trip only, independent of cancellation.
	pub timeout: Option<Duration>,
	/// When true, a failed call attaches the response body to the returned error instead of
	/// releasing it in-place.
	pub response_in_error: bool,
}
impl DataPlaneInput {
	/// Creates a new input for the given container, with no precondition, no auth override,
	/// the dispatcher's default timeout, and response-in-error disabled.
	pub fn new(container: impl Into<String>) -> Self {
		Self {
			container: container.into(),
			cancellation: CancellationToken::new(),
			auth_override: None,
			precondition_mtime: None,
			timeout: None,
			response_in_error: false,
		}
	}

	/// Attaches a precondition modification time.
	pub fn with_precondition_mtime(mut self, mtime: ModificationTime) -> Self {
		self.precondition_mtime = Some(mtime);

		self
	}

	/// Overrides the per-call timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Requests that a failed call attach the response body to the error.
	pub fn with_response_in_error(mut self, response_in_error: bool) -> Self {
		self.response_in_error = response_in_error;

		self
	}

	/// Validates the cross-cutting fields every operation shares.
	pub fn validate(&self) -> Result<()> {
		if self.container.is_empty() {
			return Err(ValidationError::EmptyContainer.into());
		}
		if self.cancellation.is_cancelled() {
			return Err(ValidationError::AlreadyCancelled.into());
		}

		Ok(())
	}

	pub(crate) fn apply_to(&self, mut spec: HttpRequestSpec) -> HttpRequestSpec {
		if let Some(timeout) = self.timeout {
			spec = spec.with_timeout(timeout);
		}
		if let Some(mtime) = &self.precondition_mtime {
			spec = spec.with_header("X-v3io-conditional-mtime", mtime.render());
		}

		spec
	}
}

/// A cooperative cancellation signal shared between a caller and the operation it started.
/// Cloning shares the same underlying flag.
///
/// Unlike a plain `AtomicBool`, this also exposes an async [`CancellationToken::cancelled`]
/// future so the transport round-trip can race against cancellation instead of only
/// observing it at the pre-enqueue check (spec requires the operation layer to propagate
/// cancellation into the transport, not just reject an already-cancelled token).
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
	cancelled: Arc<std::sync::atomic::AtomicBool>,
	notify: Arc<tokio::sync::Notify>,
}
impl CancellationToken {
	/// Creates a fresh, not-yet-cancelled token.
	pub fn new() -> Self {
		Self::default()
	}

	/// Signals cancellation to every clone of this token and wakes any in-flight
	/// [`CancellationToken::cancelled`] waiters.
	pub fn cancel(&self) {
		self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
		self.notify.notify_waiters();
	}

	/// Returns true once [`CancellationToken::cancel`] has been called on any clone.
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
	}

	/// Resolves once this token is cancelled; already-cancelled tokens resolve
	/// immediately. Intended to be raced against the transport round-trip via
	/// `tokio::select!`.
	pub async fn cancelled(&self) {
		loop {
			if self.is_cancelled() {
				return;
			}

			let notified = self.notify.notified();

			if self.is_cancelled() {
				return;
			}

			notified.await;
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn validate_rejects_empty_container() {
		let input = DataPlaneInput::new("");

		assert!(input.validate().is_err());
	}

	#[test]
	fn validate_rejects_an_already_cancelled_token() {
		let input = DataPlaneInput::new("c");

		input.cancellation.cancel();

		assert!(input.validate().is_err());
	}

	#[test]
	fn cancellation_token_clones_share_state() {
		let token = CancellationToken::new();
		let clone = token.clone();

		clone.cancel();

		assert!(token.is_cancelled());
	}

	#[tokio::test]
	async fn cancelled_future_resolves_immediately_for_an_already_cancelled_token() {
		let token = CancellationToken::new();

		token.cancel();

		tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled())
			.await
			.expect("Already-cancelled token must resolve without waiting.");
	}

	#[tokio::test]
	async fn cancelled_future_resolves_once_a_clone_cancels() {
		let token = CancellationToken::new();
		let clone = token.clone();

		tokio::spawn(async move {
			tokio::time::sleep(std::time::Duration::from_millis(10)).await;
			clone.cancel();
		});

		tokio::time::timeout(std::time::Duration::from_millis(200), token.cancelled())
			.await
			.expect("Token must resolve once cancelled from another clone.");
	}
}
