//! Bounded worker pool that serialises user-initiated operations onto the HTTP transport,
//! enforces a connection cap, retries the one transient error class, and routes typed
//! responses back to callers.
//!
//! Callers get two families of calls for every operation: `<op>_sync` runs on the
//! caller's own task; `<op>` enqueues the input onto the shared queue and returns a
//! [`RequestHandle`] immediately, with the outcome delivered on the caller-provided
//! response channel. Workers discriminate on the concrete request by invoking a boxed
//! closure captured at enqueue time — the idiomatic stand-in for a type-switch dispatch —
//! rather than matching on a manually maintained tag.

// std
use std::any::Any;
// crates.io
use tokio::sync::{
	Semaphore,
	mpsc::{self, UnboundedSender},
};
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	error::{HeaderRedactor, StatusError, TransportError, ValidationError},
	http::{HttpRequestSpec, HttpTransport, TransportErrorMapper},
	obs,
	ops::DataPlaneInput,
	response::{Response, ResponsePool},
	session::{AuthMethod, Session},
};

/// Maximum attempts made against the same request before a retryable transport error is
/// surfaced.
pub const MAX_RETRY_ATTEMPTS: u8 = 8;

/// Type-erased outcome of a dispatched operation: the typed output (erased behind `Any`)
/// plus the response buffer the caller owns on success.
pub type DispatchOutcome = Result<(Box<dyn Any + Send>, Response)>;

type Job<C, M> = Box<dyn FnOnce(Dispatcher<C, M>) -> JobFuture + Send>;
type JobFuture = Pin<Box<dyn Future<Output = DispatchOutcome> + Send>>;

/// Envelope carried on the internal request queue.
struct Request<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	id: u64,
	context: Box<dyn Any + Send>,
	job: Job<C, M>,
	response_tx: UnboundedSender<DispatchResponse>,
	#[allow(dead_code)]
	submitted_at: OffsetDateTime,
}

/// Outcome delivered on the caller-provided response channel.
pub struct DispatchResponse {
	/// Monotonically increasing request ID assigned at submission.
	pub id: u64,
	/// Caller-supplied opaque context, handed back unchanged.
	pub context: Box<dyn Any + Send>,
	/// The operation's outcome: typed output + response buffer, or an error.
	pub outcome: DispatchOutcome,
}
impl DispatchResponse {
	/// Downcasts the typed output, consuming the outcome. Returns `None` if the caller asks
	/// for the wrong type or the operation failed.
	pub fn downcast<T: 'static>(self) -> Option<(T, Response)> {
		let (output, response) = self.outcome.ok()?;
		let output = output.downcast::<T>().ok()?;

		Some((*output, response))
	}
}

/// A handle returned by an async `<op>` call; currently only carries the request ID, since
/// completion is observed on the caller's response channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHandle {
	/// The ID assigned to the enqueued request.
	pub id: u64,
}

/// Tuning knobs accepted by [`Dispatcher::new`].
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
	/// Capacity of the bounded request queue. Default 1024.
	pub queue_capacity: usize,
	/// Number of long-lived worker tasks. Default 8.
	pub worker_count: usize,
	/// Optional cap on concurrent in-flight HTTP connections.
	pub max_connections: Option<usize>,
}
impl Default for DispatcherConfig {
	fn default() -> Self {
		Self { queue_capacity: 1024, worker_count: 8, max_connections: None }
	}
}
impl DispatcherConfig {
	/// Overrides the queue capacity.
	pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
		self.queue_capacity = capacity;

		self
	}

	/// Overrides the worker count.
	pub fn with_worker_count(mut self, count: usize) -> Self {
		self.worker_count = count.max(1);

		self
	}

	/// Caps concurrent in-flight connections, independent of the transport's own per-host
	/// cap.
	pub fn with_max_connections(mut self, max: usize) -> Self {
		self.max_connections = Some(max);

		self
	}
}

struct Inner<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	session: Session,
	http: Arc<C>,
	mapper: Arc<M>,
	response_pool: ResponsePool,
	conn_semaphore: Option<Arc<Semaphore>>,
	queue_tx: mpsc::Sender<Request<C, M>>,
	next_id: std::sync::atomic::AtomicU64,
}

/// The request dispatcher. Cheaply cloneable; every clone shares the same
/// worker pool, queue, and connection semaphore.
pub struct Dispatcher<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	inner: Arc<Inner<C, M>>,
}
impl<C, M> Clone for Dispatcher<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<C, M> Dispatcher<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Creates a dispatcher with the given session, transport, mapper, and tuning.
	/// Spawns `config.worker_count` long-lived worker tasks immediately.
	pub fn new(session: Session, http: C, mapper: M, config: DispatcherConfig) -> Self {
		let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
		let inner = Arc::new(Inner {
			session,
			http: Arc::new(http),
			mapper: Arc::new(mapper),
			response_pool: ResponsePool::new(),
			conn_semaphore: config.max_connections.map(|n| Arc::new(Semaphore::new(n))),
			queue_tx,
			next_id: std::sync::atomic::AtomicU64::new(1),
		});
		let dispatcher = Self { inner };

		dispatcher.spawn_workers(queue_rx, config.worker_count);

		dispatcher
	}

	/// Creates a dispatcher using default tuning (capacity 1024,
	/// 8 workers, no connection cap).
	pub fn with_http_client(session: Session, http: C, mapper: impl Into<Arc<M>>) -> Self
	where
		M: Sized,
	{
		let (queue_tx, queue_rx) = mpsc::channel(DispatcherConfig::default().queue_capacity);
		let inner = Arc::new(Inner {
			session,
			http: Arc::new(http),
			mapper: mapper.into(),
			response_pool: ResponsePool::new(),
			conn_semaphore: None,
			queue_tx,
			next_id: std::sync::atomic::AtomicU64::new(1),
		});
		let dispatcher = Self { inner };

		dispatcher.spawn_workers(queue_rx, DispatcherConfig::default().worker_count);

		dispatcher
	}

	fn spawn_workers(&self, queue_rx: mpsc::Receiver<Request<C, M>>, worker_count: usize) {
		let queue_rx = Arc::new(AsyncMutex::new(queue_rx));

		for worker_id in 0..worker_count {
			let dispatcher = self.clone();
			let queue_rx = queue_rx.clone();

			tokio::spawn(async move {
				loop {
					let next = queue_rx.lock().await.recv().await;

					let Some(request) = next else {
						tracing_disabled_or(|| {
							tracing::debug!(worker_id, "dispatcher queue closed, worker exiting")
						});

						break;
					};

					let Request { id, context, job, response_tx, submitted_at: _ } = request;
					let outcome = job(dispatcher.clone()).await;

					obs::record_dispatch_outcome(outcome.is_ok());

					let _ = response_tx.send(DispatchResponse { id, context, outcome });
				}
			});
		}
	}

	/// Session this dispatcher was constructed with.
	pub fn session(&self) -> &Session {
		&self.inner.session
	}

	/// Shared HTTP transport.
	pub fn transport(&self) -> &C {
		&self.inner.http
	}

	/// Shared response pool.
	pub fn response_pool(&self) -> &ResponsePool {
		&self.inner.response_pool
	}

	/// Allocates the next monotonically increasing request ID.
	pub fn next_request_id(&self) -> u64 {
		self.inner.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
	}

	/// Enqueues a boxed job and returns a handle immediately; completion arrives on
	/// `response_tx`.
	pub(crate) async fn enqueue(
		&self,
		context: Box<dyn Any + Send>,
		response_tx: UnboundedSender<DispatchResponse>,
		job: Job<C, M>,
	) -> Result<RequestHandle> {
		let id = self.next_request_id();
		let request = Request { id, context, job, response_tx, submitted_at: OffsetDateTime::now_utc() };

		self.inner
			.queue_tx
			.send(request)
			.await
			.map_err(|_| TransportError::network(QueueClosed))?;

		Ok(RequestHandle { id })
	}

	/// Enqueues a typed operation future, type-erasing its output so it can travel through
	/// the shared job queue. Every `<op>` async entry point in [`crate::ops`] is a thin
	/// wrapper around this.
	pub(crate) async fn enqueue_op<F, Fut, T>(
		&self,
		context: Box<dyn Any + Send>,
		response_tx: UnboundedSender<DispatchResponse>,
		f: F,
	) -> Result<RequestHandle>
	where
		F: FnOnce(Dispatcher<C, M>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(T, Response)>> + Send + 'static,
		T: Send + 'static,
	{
		let job: Job<C, M> = Box::new(move |dispatcher| {
			Box::pin(async move {
				f(dispatcher).await.map(|(output, response)| (Box::new(output) as Box<dyn Any + Send>, response))
			})
		});

		self.enqueue(context, response_tx, job).await
	}

	/// Executes a single HTTP round-trip, retrying the connection-closed transient class
	/// up to [`MAX_RETRY_ATTEMPTS`] times, honoring the
	/// optional connection semaphore.
	pub async fn execute(
		&self,
		request: crate::http::HttpRequestSpec,
	) -> Result<crate::http::HttpResponseRaw> {
		self.execute_cancellable(request, None).await
	}

	/// Like [`Dispatcher::execute`] but also races the round-trip against `cancellation`,
	/// the cancellation token is the spec's cross-cutting propagation path: the per-call
	/// `Timeout` bounds the transport call itself, while this bounds it externally.
	pub(crate) async fn execute_cancellable(
		&self,
		request: crate::http::HttpRequestSpec,
		cancellation: Option<&crate::ops::CancellationToken>,
	) -> Result<crate::http::HttpResponseRaw> {
		for attempt in 1..=MAX_RETRY_ATTEMPTS {
			let _permit = match &self.inner.conn_semaphore {
				Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore never closes")),
				None => None,
			};
			let result = match cancellation {
				Some(token) => {
					tokio::select! {
						biased;
						_ = token.cancelled() => Err(TransportError::Cancelled),
						result = self.inner.http.call(request.clone()) => result.map_err(|e| self.inner.mapper.map_transport_error(e)),
					}
				},
				None => self.inner.http.call(request.clone()).await.map_err(|e| self.inner.mapper.map_transport_error(e)),
			};

			drop(_permit);

			match result {
				Ok(response) => return Ok(response),
				Err(mapped) => {
					if mapped.is_retryable() && attempt < MAX_RETRY_ATTEMPTS {
						tracing_disabled_or(|| {
							tracing::debug!(attempt, "retrying after connection-closed error")
						});

						continue;
					}

					return Err(mapped.into());
				},
			}
		}

		unreachable!("loop always returns by the final attempt")
	}

	/// Validates the cross-cutting fields every data operation shares.
	pub fn validate_container(container: &str) -> Result<()> {
		if container.is_empty() {
			return Err(ValidationError::EmptyContainer.into());
		}

		Ok(())
	}

	/// Runs one data-plane operation end to end: validates `input`, applies the
	/// precondition/timeout/auth headers, executes with retry, and maps a non-2xx status
	/// into a [`crate::error::StatusError`].
	pub async fn execute_operation(&self, input: &DataPlaneInput, spec: HttpRequestSpec) -> Result<Response> {
		let (status, response) = self.execute_operation_raw(input, spec).await?;

		self.classify_status(input, status, response)
	}

	/// Like [`Dispatcher::execute_operation`] but returns the raw status alongside the
	/// response instead of turning a non-2xx status into an error. Used by operations that
	/// treat a particular non-2xx status as a normal outcome (`CheckPathExists`'s 404).
	pub(crate) async fn execute_operation_raw(
		&self,
		input: &DataPlaneInput,
		spec: HttpRequestSpec,
	) -> Result<(u16, Response)> {
		input.validate()?;

		let spec = input.apply_to(spec);
		let spec = self.apply_auth(input, spec);
		let raw = self.execute_cancellable(spec, Some(&input.cancellation)).await?;
		let status = raw.status;
		let response = self.inner.response_pool.acquire(raw);

		Ok((status, response))
	}

	fn apply_auth(&self, input: &DataPlaneInput, spec: HttpRequestSpec) -> HttpRequestSpec {
		match input.auth_override.as_ref().unwrap_or(&self.inner.session.auth) {
			AuthMethod::AccessKey(key) => spec.with_header(crate::error::SESSION_KEY_HEADER, key.clone()),
			AuthMethod::Basic { username, password } => {
				let token = STANDARD.encode(format!("{username}:{password}"));

				spec.with_header("Authorization", format!("Basic {token}"))
			},
		}
	}

	fn classify_status(&self, input: &DataPlaneInput, status: u16, response: Response) -> Result<Response> {
		if (200..300).contains(&status) {
			return Ok(response);
		}

		let redactor = HeaderRedactor::new(self.inner.session.secrets());
		let message = String::from_utf8_lossy(response.body()).into_owned();
		let mut err = StatusError::new(status, message, &redactor);

		if input.response_in_error {
			err = err.with_body(response.into_body());
		} else {
			response.release();
		}

		Err(err.into())
	}
}

#[derive(Debug, ThisError)]
#[error("dispatcher queue is closed")]
struct QueueClosed;

fn tracing_disabled_or(f: impl FnOnce()) {
	#[cfg(feature = "tracing")]
	f();
	#[cfg(not(feature = "tracing"))]
	let _ = f;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		http::{HttpFuture, HttpRequestSpec, HttpResponseRaw, Method},
		session::AuthMethod,
	};
	use std::sync::atomic::{AtomicU32, Ordering};

	#[derive(Clone, Default)]
	struct CountingTransport {
		calls: Arc<AtomicU32>,
		fail_times: u32,
	}
	impl HttpTransport for CountingTransport {
		type TransportError = std::io::Error;

		fn call(&self, _request: HttpRequestSpec) -> HttpFuture<'_, Self::TransportError> {
			let calls = self.calls.clone();
			let fail_times = self.fail_times;

			Box::pin(async move {
				let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;

				if attempt <= fail_times {
					return Err(std::io::Error::new(std::io::ErrorKind::Other, "connection closed"));
				}

				Ok(HttpResponseRaw { status: 200, headers: Vec::new(), body: bytes::Bytes::new() })
			})
		}
	}

	#[derive(Clone, Default)]
	struct CountingMapper;
	impl TransportErrorMapper<std::io::Error> for CountingMapper {
		fn map_transport_error(&self, _error: std::io::Error) -> TransportError {
			TransportError::ConnectionClosed
		}
	}

	fn test_session() -> Session {
		Session::new("https://h/", AuthMethod::AccessKey("key".into())).unwrap()
	}

	#[tokio::test]
	async fn retries_seven_times_then_succeeds() {
		let transport = CountingTransport { calls: Arc::new(AtomicU32::new(0)), fail_times: 7 };
		let calls = transport.calls.clone();
		let dispatcher =
			Dispatcher::new(test_session(), transport, CountingMapper, DispatcherConfig::default());
		let request = HttpRequestSpec::new(Method::Get, Url::parse("https://h/c").unwrap());
		let result = dispatcher.execute(request).await;

		assert!(result.is_ok());
		assert_eq!(calls.load(Ordering::SeqCst), 8);
	}

	#[tokio::test]
	async fn surfaces_error_after_eight_failures() {
		let transport = CountingTransport { calls: Arc::new(AtomicU32::new(0)), fail_times: 8 };
		let dispatcher =
			Dispatcher::new(test_session(), transport, CountingMapper, DispatcherConfig::default());
		let request = HttpRequestSpec::new(Method::Get, Url::parse("https://h/c").unwrap());
		let result = dispatcher.execute(request).await;

		assert!(result.is_err());
	}

	#[derive(Clone, Default)]
	struct SlowTransport;
	impl HttpTransport for SlowTransport {
		type TransportError = std::io::Error;

		fn call(&self, _request: HttpRequestSpec) -> HttpFuture<'_, Self::TransportError> {
			Box::pin(async move {
				tokio::time::sleep(std::time::Duration::from_secs(60)).await;

				Ok(HttpResponseRaw { status: 200, headers: Vec::new(), body: bytes::Bytes::new() })
			})
		}
	}

	#[tokio::test]
	async fn cancellation_mid_flight_aborts_the_round_trip() {
		let dispatcher =
			Dispatcher::new(test_session(), SlowTransport, CountingMapper, DispatcherConfig::default());
		let input = crate::ops::DataPlaneInput::new("c");
		let cancellation = input.cancellation.clone();
		let spec = HttpRequestSpec::new(Method::Get, Url::parse("https://h/c").unwrap());
		let call = dispatcher.execute_operation_raw(&input, spec);

		tokio::spawn(async move {
			tokio::time::sleep(std::time::Duration::from_millis(10)).await;
			cancellation.cancel();
		});

		let result = tokio::time::timeout(std::time::Duration::from_secs(5), call)
			.await
			.expect("Cancellation should abort the round-trip well before the 60s transport sleep.");

		assert!(matches!(result, Err(Error::Transport(TransportError::Cancelled))));
	}

	#[tokio::test]
	async fn enqueue_delivers_outcome_on_response_channel() {
		let transport = CountingTransport::default();
		let dispatcher =
			Dispatcher::new(test_session(), transport, CountingMapper, DispatcherConfig::default());
		let (tx, mut rx) = mpsc::unbounded_channel();
		let job: Job<CountingTransport, CountingMapper> =
			Box::new(|_d| Box::pin(async move { Ok((Box::new(42_i32) as Box<dyn Any + Send>, unsafe_test_response())) }));

		dispatcher.enqueue(Box::new(()), tx, job).await.expect("Enqueue should succeed.");

		let response = rx.recv().await.expect("Response should be delivered.");
		let (value, resp) = response.downcast::<i32>().expect("Output should downcast to i32.");

		assert_eq!(value, 42);
		resp.release();
	}

	fn unsafe_test_response() -> Response {
		ResponsePool::new().acquire(HttpResponseRaw {
			status: 200,
			headers: Vec::new(),
			body: bytes::Bytes::new(),
		})
	}
}
