//! Acquire/release response containers wrapping a transport response buffer.
//!
//! Every response handed to a caller must be released by that caller exactly once on
//! success, or by the dispatcher exactly once on the error path (unless the caller
//! requested response-in-error, in which case ownership transfers into the error value).
//! Pooling the underlying buffer avoids a fresh allocation on every request; buffers are
//! recycled on release and reused by the next acquisition.

// self
use crate::_prelude::*;
use crate::http::HttpResponseRaw;

/// A response handed back to a caller, wrapping the transport's raw buffer.
///
/// Dropping a [`Response`] without calling [`Response::release`] still returns the buffer
/// to the pool (the `Drop` impl releases it), but callers that want deterministic pool
/// reuse on the happy path should call [`Response::release`] explicitly.
pub struct Response {
	raw: Option<HttpResponseRaw>,
	pool: ResponsePool,
}
impl Response {
	/// Status code of the underlying HTTP response.
	pub fn status(&self) -> u16 {
		self.raw.as_ref().map(|r| r.status).unwrap_or_default()
	}

	/// Body of the underlying HTTP response.
	pub fn body(&self) -> &[u8] {
		self.raw.as_ref().map(|r| r.body.as_ref()).unwrap_or_default()
	}

	/// Header lookup, case-insensitive.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.raw.as_ref().and_then(|r| r.header(name))
	}

	/// Parses the item modification-time header, if the server attached one.
	pub fn modification_time(&self) -> Option<crate::codec::ModificationTime> {
		self.header(crate::codec::mtime::MTIME_HEADER)
			.and_then(|raw| crate::codec::ModificationTime::parse(raw).ok())
	}

	/// Releases the response buffer back to the pool. Idempotent: calling it twice is a
	/// no-op the second time.
	pub fn release(mut self) {
		if let Some(raw) = self.raw.take() {
			self.pool.recycle(raw);
		}
	}

	/// Consumes the response, returning the owned body without returning the buffer to the
	/// pool. Used when an error needs to carry the body (response-in-error).
	pub fn into_body(mut self) -> bytes::Bytes {
		self.raw.take().map(|r| r.body).unwrap_or_default()
	}
}
impl Drop for Response {
	fn drop(&mut self) {
		if let Some(raw) = self.raw.take() {
			self.pool.recycle(raw);
		}
	}
}
impl Debug for Response {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Response").field("status", &self.status()).finish()
	}
}

/// Pool of recycled response slots shared across dispatcher workers.
///
/// The pool only recycles the `Vec<(String, String)>` header allocation; the body buffer
/// is reference-counted (`bytes::Bytes`) and freed normally: a `Mutex`-protected `Vec`
/// acting as a free list.
#[derive(Clone, Default)]
pub struct ResponsePool {
	free_headers: Arc<Mutex<Vec<Vec<(String, String)>>>>,
}
impl ResponsePool {
	/// Creates an empty pool.
	pub fn new() -> Self {
		Self::default()
	}

	/// Acquires a [`Response`] wrapping the given raw transport response.
	pub fn acquire(&self, raw: HttpResponseRaw) -> Response {
		Response { raw: Some(raw), pool: self.clone() }
	}

	fn recycle(&self, mut raw: HttpResponseRaw) {
		raw.headers.clear();
		self.free_headers.lock().push(raw.headers);
	}

	fn take_header_buf(&self) -> Vec<(String, String)> {
		self.free_headers.lock().pop().unwrap_or_default()
	}

	/// Number of recycled header buffers currently idle in the pool (diagnostic only).
	pub fn idle_len(&self) -> usize {
		self.free_headers.lock().len()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn raw(status: u16) -> HttpResponseRaw {
		HttpResponseRaw { status, headers: Vec::new(), body: bytes::Bytes::from_static(b"ok") }
	}

	#[test]
	fn release_recycles_the_header_buffer() {
		let pool = ResponsePool::new();
		let mut response = pool.acquire(raw(200));

		response.raw.as_mut().unwrap().headers.push(("a".into(), "b".into()));
		response.release();

		assert_eq!(pool.idle_len(), 1);

		let reused = pool.take_header_buf();

		assert!(reused.is_empty(), "Recycled header buffer should be cleared.");
	}

	#[test]
	fn drop_without_explicit_release_still_recycles() {
		let pool = ResponsePool::new();

		{
			let _response = pool.acquire(raw(200));
		}

		assert_eq!(pool.idle_len(), 1);
	}

	#[test]
	fn into_body_transfers_ownership_without_recycling() {
		let pool = ResponsePool::new();
		let response = pool.acquire(raw(200));
		let body = response.into_body();

		assert_eq!(&body[..], b"ok");
	}
}
