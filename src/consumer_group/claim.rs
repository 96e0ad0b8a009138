//! Per-shard claim: once a member owns a shard, a dedicated task fetches record batches
//! and hands them to the consumer over a bounded channel, tracking the highest in-flight
//! and acknowledged sequence numbers.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	dispatcher::Dispatcher,
	error::CoordinatorError,
	http::{HttpTransport, TransportErrorMapper},
	ops::{
		CancellationToken, DataPlaneInput,
		stream::{GetRecordsInput, Record, SeekShardInput, SeekType},
	},
};

/// Lifecycle of a shard under this member's ownership:
/// `unowned → owned-starting → owned-streaming → owned-draining → released`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardState {
	/// No claim task is running for this shard.
	Unowned,
	/// The claim task is resolving its starting location.
	OwnedStarting,
	/// The claim task is fetching and delivering record batches.
	OwnedStreaming,
	/// The claim is being torn down; no further batches will be delivered.
	OwnedDraining,
	/// The claim task has exited.
	Released,
}

/// One batch of records fetched from a shard, delivered to the consumer.
#[derive(Clone, Debug)]
pub struct RecordBatch {
	/// Shard this batch was fetched from.
	pub shard_id: u32,
	/// Records in shard order.
	pub records: Vec<Record>,
	/// Approximate lag behind the shard's latest record, in milliseconds.
	pub msec_behind_latest: u64,
}

/// Handle the consumer uses to receive batches from, and acknowledge progress on, one
/// shard.
pub struct ShardConsumer {
	/// Shard this consumer reads from.
	pub shard_id: u32,
	batches: tokio::sync::mpsc::Receiver<Result<RecordBatch>>,
	highest_acked: Arc<AtomicU64>,
	highest_in_flight: Arc<AtomicU64>,
}
impl ShardConsumer {
	/// Awaits the next batch, or `None` once the claim has ended.
	pub async fn recv(&mut self) -> Option<Result<RecordBatch>> {
		self.batches.recv().await
	}

	/// Acknowledges that every record up to and including `sequence_number` has been
	/// processed. The offset-commit task flushes the highest acknowledged value it
	/// observes; unacknowledged batches are never committed.
	pub fn ack(&self, sequence_number: u64) {
		self.highest_acked.fetch_max(sequence_number, Ordering::SeqCst);
	}

	/// Highest sequence number handed to this consumer so far, whether or not it has
	/// been acknowledged yet.
	pub fn highest_in_flight(&self) -> u64 {
		self.highest_in_flight.load(Ordering::SeqCst)
	}
}

/// Coordinator-side handle for a running claim task.
pub(crate) struct ShardClaimHandle {
	pub(crate) state: Arc<RwLock<ShardState>>,
	pub(crate) highest_acked: Arc<AtomicU64>,
	pub(crate) highest_in_flight: Arc<AtomicU64>,
	pub(crate) last_committed: Arc<AtomicU64>,
	task: tokio::task::JoinHandle<()>,
}
impl ShardClaimHandle {
	/// Tears down the claim task immediately.
	pub(crate) fn release(self) {
		*self.state.write() = ShardState::Released;

		self.task.abort();
	}
}

/// Spawns a claim task for `shard_id`, starting at `starting_seek` (or the prior
/// committed sequence number, resolved by the caller), and returns the coordinator-side
/// handle plus the consumer-facing receiver.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_claim<C, M>(
	dispatcher: Dispatcher<C, M>,
	data_plane_template: DataPlaneInput,
	shard_path: String,
	shard_id: u32,
	starting_seek: SeekType,
	fetch_interval: Duration,
	fetch_limit: u32,
	fetch_max_consecutive_errors: u32,
	channel_capacity: usize,
) -> (ShardClaimHandle, ShardConsumer)
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	let (tx, rx) = tokio::sync::mpsc::channel(channel_capacity.max(1));
	let state = Arc::new(RwLock::new(ShardState::OwnedStarting));
	let highest_acked = Arc::new(AtomicU64::new(0));
	let highest_in_flight = Arc::new(AtomicU64::new(0));
	let last_committed = Arc::new(AtomicU64::new(0));
	let cancel = CancellationToken::new();
	let task_state = state.clone();
	let task_cancel = cancel.clone();
	let task_highest_in_flight = highest_in_flight.clone();

	let task = tokio::spawn(async move {
		run_claim(
			dispatcher,
			data_plane_template,
			shard_path,
			shard_id,
			starting_seek,
			fetch_interval,
			fetch_limit,
			fetch_max_consecutive_errors,
			tx,
			task_state,
			task_cancel,
			task_highest_in_flight,
		)
		.await;
	});

	(
		ShardClaimHandle {
			state,
			highest_acked: highest_acked.clone(),
			highest_in_flight: highest_in_flight.clone(),
			last_committed,
			task,
		},
		ShardConsumer { shard_id, batches: rx, highest_acked, highest_in_flight },
	)
}

#[allow(clippy::too_many_arguments)]
async fn run_claim<C, M>(
	dispatcher: Dispatcher<C, M>,
	data_plane_template: DataPlaneInput,
	shard_path: String,
	shard_id: u32,
	starting_seek: SeekType,
	fetch_interval: Duration,
	fetch_limit: u32,
	fetch_max_consecutive_errors: u32,
	tx: tokio::sync::mpsc::Sender<Result<RecordBatch>>,
	state: Arc<RwLock<ShardState>>,
	cancel: CancellationToken,
	highest_in_flight: Arc<AtomicU64>,
) where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	let seek_input =
		SeekShardInput { data_plane: data_plane_template.clone(), path: shard_path.clone(), seek: starting_seek };

	let mut location = match dispatcher.seek_shard_sync(seek_input).await {
		Ok((location, response)) => {
			response.release();

			location
		},
		Err(e) => {
			*state.write() = ShardState::Released;
			let _ = tx.send(Err(e)).await;

			return;
		},
	};

	*state.write() = ShardState::OwnedStreaming;

	let mut consecutive_errors = 0u32;

	while !cancel.is_cancelled() {
		let get_input = GetRecordsInput {
			data_plane: data_plane_template.clone(),
			path: shard_path.clone(),
			location: location.clone(),
			limit: fetch_limit,
		};

		match dispatcher.get_records_sync(get_input).await {
			Ok((output, response)) => {
				response.release();

				consecutive_errors = 0;
				location = output.next_location;

				if let Some(max_sequence) = output.records.iter().map(|r| r.sequence_number).max() {
					highest_in_flight.fetch_max(max_sequence, Ordering::SeqCst);
				}

				let batch = RecordBatch {
					shard_id,
					records: output.records,
					msec_behind_latest: output.msec_behind_latest,
				};

				if tx.send(Ok(batch)).await.is_err() {
					break;
				}
			},
			Err(e) => {
				consecutive_errors += 1;

				// Fetch errors are retried inside the claim task and do not propagate
				// until the fetch retry policy is exhausted.
				if consecutive_errors >= fetch_max_consecutive_errors {
					let fatal = CoordinatorError::SessionLost {
						reason: format!("shard {shard_id} fetch failed {consecutive_errors} times in a row: {e}"),
					};

					let _ = tx.send(Err(fatal.into())).await;

					break;
				}
			},
		}

		tokio::time::sleep(fetch_interval.unsigned_abs()).await;
	}

	*state.write() = ShardState::OwnedDraining;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn ack_records_the_highest_sequence_number_even_out_of_order() {
		let (_tx, rx) = tokio::sync::mpsc::channel(1);
		let highest_acked = Arc::new(AtomicU64::new(0));
		let highest_in_flight = Arc::new(AtomicU64::new(0));
		let consumer =
			ShardConsumer { shard_id: 0, batches: rx, highest_acked: highest_acked.clone(), highest_in_flight };

		consumer.ack(5);
		consumer.ack(3);

		assert_eq!(highest_acked.load(Ordering::SeqCst), 5);
	}

	#[tokio::test]
	async fn highest_in_flight_tracks_the_max_sequence_number_seen_so_far() {
		let (_tx, rx) = tokio::sync::mpsc::channel(1);
		let highest_acked = Arc::new(AtomicU64::new(0));
		let highest_in_flight = Arc::new(AtomicU64::new(0));
		let consumer =
			ShardConsumer { shard_id: 0, batches: rx, highest_acked, highest_in_flight: highest_in_flight.clone() };

		highest_in_flight.fetch_max(7, Ordering::SeqCst);

		assert_eq!(consumer.highest_in_flight(), 7);
	}
}
