//! Session lifecycle: join, heartbeat, leave, seizure, and the per-shard claim tasks that
//! sit on top of them.

// std
use std::sync::atomic::Ordering;
// crates.io
use exponential_backoff::Backoff;
use uuid::Uuid;
// self
use super::{
	claim::{self, ShardClaimHandle, ShardConsumer},
	rebalance::rebalance,
	state::GroupState,
};
use crate::{
	_prelude::*,
	codec::attribute::{AttributeValue, Item},
	dispatcher::Dispatcher,
	error::CoordinatorError,
	http::{HttpTransport, TransportErrorMapper},
	obs,
	ops::{
		DataPlaneInput,
		item::{GetItemInput, PutItemInput},
		stream::SeekType,
	},
};

fn tracing_disabled_or(f: impl FnOnce()) {
	#[cfg(feature = "tracing")]
	f();
	#[cfg(not(feature = "tracing"))]
	let _ = f;
}

/// Adds up to 20% random jitter to a backoff delay so that members contending on the
/// same CAS loop don't retry in lockstep.
fn jittered(delay: std::time::Duration) -> std::time::Duration {
	let jitter_ms = (delay.as_millis() as f64 * 0.2 * rand::random::<f64>()) as u64;

	delay + std::time::Duration::from_millis(jitter_ms)
}

fn state_attr_name(group_name: &str) -> String {
	format!("__cg_state_{group_name}")
}

fn committed_attr_name(group_name: &str, shard_id: u32) -> String {
	format!("__cg_committed_{group_name}_{shard_id}")
}

fn shard_path(stream_path: &str, shard_id: u32) -> String {
	format!("{}/{shard_id}", stream_path.trim_end_matches('/'))
}

/// Tuning knobs for a [`ConsumerGroupSession`].
#[derive(Clone, Debug)]
pub struct ConsumerGroupConfig {
	/// Path to the stream directory whose shards this group consumes.
	pub stream_path: String,
	/// Group name; scopes the persisted state and committed-offset attribute names, so
	/// multiple groups can share one stream.
	pub group_name: String,
	/// Number of shards in the stream, used to compute the deterministic partition.
	pub shard_count: u32,
	/// A member whose heartbeat is older than this is no longer considered live
	/// Conventionally three times `heartbeat_interval`.
	pub session_timeout: Duration,
	/// How often a member refreshes its heartbeat and reconciles shard ownership.
	pub heartbeat_interval: Duration,
	/// How often the highest acknowledged sequence number per owned shard is flushed to
	/// the persisted state.
	pub commit_interval: Duration,
	/// Delay between successive `GetRecords` calls inside a claim task.
	pub fetch_interval: Duration,
	/// Maximum records requested per `GetRecords` call.
	pub fetch_limit: u32,
	/// Consecutive fetch failures inside one claim task before it surfaces a fatal error
	/// and stops.
	pub fetch_max_consecutive_errors: u32,
	/// Capacity of the bounded channel each claim task delivers batches on
	/// (`RecordBatchChanSize`).
	pub record_batch_chan_size: usize,
	/// Starting point for a shard with no prior committed offset.
	pub initial_location: SeekType,
	/// Maximum attempts for the CAS retry loop before surfacing
	/// [`CoordinatorError::CasExhausted`].
	pub cas_max_attempts: u32,
	/// Minimum CAS backoff delay.
	pub cas_min_backoff: Duration,
	/// Maximum CAS backoff delay.
	pub cas_max_backoff: Duration,
}
impl ConsumerGroupConfig {
	/// Creates a config with conservative defaults: a 30s session timeout (three
	/// 10s heartbeats), a 30s commit interval, a 1s fetch interval, and an 8-attempt CAS
	/// retry budget.
	pub fn new(stream_path: impl Into<String>, group_name: impl Into<String>, shard_count: u32) -> Self {
		Self {
			stream_path: stream_path.into(),
			group_name: group_name.into(),
			shard_count,
			session_timeout: Duration::seconds(30),
			heartbeat_interval: Duration::seconds(10),
			commit_interval: Duration::seconds(30),
			fetch_interval: Duration::seconds(1),
			fetch_limit: 100,
			fetch_max_consecutive_errors: 5,
			record_batch_chan_size: 100,
			initial_location: SeekType::Latest,
			cas_max_attempts: 8,
			cas_min_backoff: Duration::milliseconds(50),
			cas_max_backoff: Duration::seconds(2),
		}
	}

	/// Overrides the session timeout.
	pub fn with_session_timeout(mut self, d: Duration) -> Self {
		self.session_timeout = d;

		self
	}

	/// Overrides the heartbeat interval.
	pub fn with_heartbeat_interval(mut self, d: Duration) -> Self {
		self.heartbeat_interval = d;

		self
	}

	/// Overrides the commit interval.
	pub fn with_commit_interval(mut self, d: Duration) -> Self {
		self.commit_interval = d;

		self
	}

	/// Overrides the inter-fetch interval.
	pub fn with_fetch_interval(mut self, d: Duration) -> Self {
		self.fetch_interval = d;

		self
	}

	/// Overrides the per-shard record-batch channel capacity.
	pub fn with_record_batch_chan_size(mut self, size: usize) -> Self {
		self.record_batch_chan_size = size;

		self
	}

	/// Overrides the starting point used for shards with no prior committed offset.
	pub fn with_initial_location(mut self, seek: SeekType) -> Self {
		self.initial_location = seek;

		self
	}
}

/// Coordinates one member's participation in a stream consumer group: join/leave,
/// periodic heartbeat and rebalance, and the per-shard claim tasks that stream records to
/// the caller.
///
/// Cloning shares the same member identity, in-memory state snapshot, and claim tasks —
/// clone only to hand a reference to a background task, the way [`Dispatcher`] is cloned.
pub struct ConsumerGroupSession<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	dispatcher: Dispatcher<C, M>,
	data_plane_template: DataPlaneInput,
	config: ConsumerGroupConfig,
	member_id: String,
	state: Arc<RwLock<GroupState>>,
	claims: Arc<AsyncMutex<HashMap<u32, ShardClaimHandle>>>,
	pending: Arc<AsyncMutex<HashMap<u32, ShardConsumer>>>,
	shutdown: crate::ops::CancellationToken,
	background: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}
impl<C, M> Clone for ConsumerGroupSession<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			dispatcher: self.dispatcher.clone(),
			data_plane_template: self.data_plane_template.clone(),
			config: self.config.clone(),
			member_id: self.member_id.clone(),
			state: self.state.clone(),
			claims: self.claims.clone(),
			pending: self.pending.clone(),
			shutdown: self.shutdown.clone(),
			background: self.background.clone(),
		}
	}
}
impl<C, M> ConsumerGroupSession<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Joins the group: appends this member to the persisted state, triggers a rebalance,
	/// reconciles local claim tasks against the result, and starts the heartbeat/rebalance
	/// and offset-commit background tasks.
	pub async fn join(
		dispatcher: Dispatcher<C, M>,
		data_plane_template: DataPlaneInput,
		config: ConsumerGroupConfig,
	) -> Result<Self> {
		data_plane_template.validate()?;

		let member_id = Uuid::new_v4().to_string();
		let now = OffsetDateTime::now_utc();
		let shard_count = config.shard_count;
		let session_timeout = config.session_timeout;
		let joining_id = member_id.clone();

		let state = cas_mutate(&dispatcher, &data_plane_template, &config, |s| {
			s.touch_member(&joining_id, now);

			let live = s.live_member_ids(now, session_timeout);

			s.set_assignments(rebalance(shard_count, &live));
		})
		.await?;

		let session = Self {
			dispatcher,
			data_plane_template,
			config,
			member_id,
			state: Arc::new(RwLock::new(state)),
			claims: Arc::new(AsyncMutex::new(HashMap::new())),
			pending: Arc::new(AsyncMutex::new(HashMap::new())),
			shutdown: crate::ops::CancellationToken::new(),
			background: Arc::new(Mutex::new(Vec::new())),
		};

		session.reconcile_claims().await;
		session.spawn_background_tasks();

		Ok(session)
	}

	/// This member's unique ID, assigned at [`ConsumerGroupSession::join`].
	pub fn member_id(&self) -> &str {
		&self.member_id
	}

	/// A snapshot of the persisted state as last observed by this member.
	pub fn state_snapshot(&self) -> GroupState {
		self.state.read().clone()
	}

	/// Shard IDs currently assigned to this member, per the last observed rebalance.
	pub fn shard_ids_owned(&self) -> Vec<u32> {
		self.state
			.read()
			.shard_assignments
			.iter()
			.filter(|a| a.member_id == self.member_id)
			.map(|a| a.shard_id)
			.collect()
	}

	/// Takes ownership of the consumer-facing handle for `shard_id`, if this member owns
	/// it and it has not already been taken. Each claim's handle can be taken exactly
	/// once.
	pub async fn take_claim(&self, shard_id: u32) -> Option<ShardConsumer> {
		self.pending.lock().await.remove(&shard_id)
	}

	/// How far behind acknowledgement the claim task for `shard_id` has fetched: the
	/// highest sequence number handed to the consumer minus the highest one it has
	/// acknowledged. `None` if this member holds no running claim for that shard.
	pub async fn shard_lag(&self, shard_id: u32) -> Option<u64> {
		let claims = self.claims.lock().await;
		let handle = claims.get(&shard_id)?;

		Some(
			handle
				.highest_in_flight
				.load(Ordering::SeqCst)
				.saturating_sub(handle.highest_acked.load(Ordering::SeqCst)),
		)
	}

	/// Removes this member from the group, releases every local claim, stops the
	/// background tasks, and triggers a final rebalance so its shards can be picked up by
	/// the remaining members.
	pub async fn leave(self) -> Result<()> {
		self.shutdown.cancel();

		{
			let mut claims = self.claims.lock().await;

			for (_, handle) in claims.drain() {
				handle.release();
			}
		}

		for task in self.background.lock().drain(..) {
			task.abort();
		}

		let member_id = self.member_id.clone();
		let shard_count = self.config.shard_count;
		let session_timeout = self.config.session_timeout;

		cas_mutate(&self.dispatcher, &self.data_plane_template, &self.config, |s| {
			s.remove_member(&member_id);

			let live = s.live_member_ids(OffsetDateTime::now_utc(), session_timeout);

			s.set_assignments(rebalance(shard_count, &live));
		})
		.await?;

		Ok(())
	}

	/// Observes whether `member_id` is stale per this member's last-read state and, if so,
	/// deletes it and forces a rebalance. A no-op if
	/// the member is unknown or still live.
	pub async fn seize(&self, member_id: &str) -> Result<()> {
		let now = OffsetDateTime::now_utc();
		let session_timeout = self.config.session_timeout;
		let is_stale = self
			.state
			.read()
			.members
			.iter()
			.find(|m| m.id == member_id)
			.map(|m| !m.is_live(now, session_timeout))
			.unwrap_or(false);

		if !is_stale {
			return Ok(());
		}

		let shard_count = self.config.shard_count;
		let target = member_id.to_owned();

		let new_state = cas_mutate(&self.dispatcher, &self.data_plane_template, &self.config, |s| {
			if s.members.iter().any(|m| m.id == target && m.is_live(now, session_timeout)) {
				return;
			}

			s.remove_member(&target);

			let live = s.live_member_ids(now, session_timeout);

			s.set_assignments(rebalance(shard_count, &live));
		})
		.await?;

		*self.state.write() = new_state;

		self.reconcile_claims().await;

		Ok(())
	}

	fn spawn_background_tasks(&self) {
		let maintenance = self.clone();
		let commit = self.clone();

		let maintenance_task = tokio::spawn(run_maintenance_loop(maintenance));
		let commit_task = tokio::spawn(run_commit_loop(commit));

		self.background.lock().extend([maintenance_task, commit_task]);
	}

	async fn maintain_once(&self) {
		let now = OffsetDateTime::now_utc();
		let member_id = self.member_id.clone();
		let shard_count = self.config.shard_count;
		let session_timeout = self.config.session_timeout;

		let result = cas_mutate(&self.dispatcher, &self.data_plane_template, &self.config, |s| {
			s.touch_member(&member_id, now);

			let live = s.live_member_ids(now, session_timeout);
			let desired = rebalance(shard_count, &live);

			if desired != s.shard_assignments {
				s.set_assignments(desired);
			}
		})
		.await;

		if let Ok(new_state) = result {
			*self.state.write() = new_state;

			self.reconcile_claims().await;
		}
	}

	async fn commit_once(&self) {
		let claims = self.claims.lock().await;
		let mut flushes = Vec::new();

		for (&shard_id, handle) in claims.iter() {
			let acked = handle.highest_acked.load(Ordering::SeqCst);
			let last = handle.last_committed.load(Ordering::SeqCst);

			if acked > last {
				flushes.push((shard_id, acked, handle.last_committed.clone()));
			}
		}

		drop(claims);

		for (shard_id, acked, last_committed) in flushes {
			let attr = committed_attr_name(&self.config.group_name, shard_id);

			if self.cas_commit_offset(&attr, acked).await.is_ok() {
				last_committed.store(acked, Ordering::SeqCst);
			}
		}
	}

	async fn cas_commit_offset(&self, attr: &str, sequence_number: u64) -> Result<()> {
		let backoff = Backoff::new(
			self.config.cas_max_attempts,
			self.config.cas_min_backoff.unsigned_abs(),
			self.config.cas_max_backoff.unsigned_abs(),
		);
		let mut attempts = 0u32;

		for wait in &backoff {
			attempts += 1;

			let get_input =
				GetItemInput::new(self.data_plane_template.clone(), self.config.stream_path.as_str(), vec![attr.to_string()]);
			let (got, response) = self.dispatcher.get_item_sync(get_input).await?;

			response.release();

			let current = match got.item.get(attr) {
				Some(AttributeValue::Int(n)) if *n >= 0 => *n as u64,
				_ => 0,
			};

			// Invariant I5: a committed sequence number never decreases for a given
			// (group, shard) pair.
			if sequence_number <= current {
				return Ok(());
			}

			let mut item = Item::new();

			item.insert(attr.to_owned(), AttributeValue::Int(sequence_number as i64));

			let mut put_dp = self.data_plane_template.clone();

			if let Some(mtime) = got.modification_time {
				put_dp = put_dp.with_precondition_mtime(mtime);
			}

			match self.dispatcher.put_item_sync(PutItemInput::new(put_dp, self.config.stream_path.as_str(), item)).await {
				Ok((_, response)) => {
					response.release();

					return Ok(());
				},
				Err(e) if e.is_precondition_failure() => {
					tracing_disabled_or(|| tracing::debug!(attempts, attr, "offset commit CAS lost a race, retrying"));

					if let Some(delay) = wait {
						tokio::time::sleep(jittered(delay)).await;
					}

					continue;
				},
				Err(e) => return Err(e),
			}
		}

		tracing_disabled_or(|| tracing::error!(attempts, attr, "offset commit CAS exhausted its retry budget"));

		Err(CoordinatorError::CasExhausted { attempts }.into())
	}

	async fn read_committed(&self, shard_id: u32) -> Option<u64> {
		let attr = committed_attr_name(&self.config.group_name, shard_id);
		let input =
			GetItemInput::new(self.data_plane_template.clone(), self.config.stream_path.as_str(), vec![attr.clone()]);
		let (output, response) = self.dispatcher.get_item_sync(input).await.ok()?;

		response.release();

		match output.item.get(&attr) {
			Some(AttributeValue::Int(n)) if *n >= 0 => Some(*n as u64),
			_ => None,
		}
	}

	async fn reconcile_claims(&self) {
		let owned: Vec<u32> = {
			let state = self.state.read();

			state.shard_assignments.iter().filter(|a| a.member_id == self.member_id).map(|a| a.shard_id).collect()
		};

		let mut claims = self.claims.lock().await;
		let to_release: Vec<u32> = claims.keys().copied().filter(|id| !owned.contains(id)).collect();

		for shard_id in to_release {
			if let Some(handle) = claims.remove(&shard_id) {
				handle.release();
			}

			self.pending.lock().await.remove(&shard_id);
		}

		for shard_id in owned {
			if claims.contains_key(&shard_id) {
				continue;
			}

			let starting_seek = match self.read_committed(shard_id).await {
				Some(seq) => SeekType::Sequence(seq + 1),
				None => self.config.initial_location.clone(),
			};

			let (handle, consumer) = claim::spawn_claim(
				self.dispatcher.clone(),
				self.data_plane_template.clone(),
				shard_path(&self.config.stream_path, shard_id),
				shard_id,
				starting_seek,
				self.config.fetch_interval,
				self.config.fetch_limit,
				self.config.fetch_max_consecutive_errors,
				self.config.record_batch_chan_size,
			);

			claims.insert(shard_id, handle);
			self.pending.lock().await.insert(shard_id, consumer);
		}
	}
}

async fn run_maintenance_loop<C, M>(session: ConsumerGroupSession<C, M>)
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	let mut ticker = tokio::time::interval(session.config.heartbeat_interval.unsigned_abs());

	loop {
		ticker.tick().await;

		if session.shutdown.is_cancelled() {
			break;
		}

		session.maintain_once().await;
	}
}

async fn run_commit_loop<C, M>(session: ConsumerGroupSession<C, M>)
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	let mut ticker = tokio::time::interval(session.config.commit_interval.unsigned_abs());

	loop {
		ticker.tick().await;

		if session.shutdown.is_cancelled() {
			break;
		}

		session.commit_once().await;
	}
}

/// Reads the group-state item, applies `mutate`, and writes it back guarded by the
/// modification time observed on the read.
/// Retries under exponential backoff on a precondition (CAS) failure; surfaces
/// [`CoordinatorError::CasExhausted`] once the retry budget runs out.
async fn cas_mutate<C, M>(
	dispatcher: &Dispatcher<C, M>,
	data_plane: &DataPlaneInput,
	config: &ConsumerGroupConfig,
	mut mutate: impl FnMut(&mut GroupState),
) -> Result<GroupState>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	let attr = state_attr_name(&config.group_name);
	let backoff =
		Backoff::new(config.cas_max_attempts, config.cas_min_backoff.unsigned_abs(), config.cas_max_backoff.unsigned_abs());
	let mut attempts = 0u32;

	for wait in &backoff {
		attempts += 1;

		let get_input = GetItemInput::new(data_plane.clone(), config.stream_path.as_str(), vec![attr.clone()]);
		let (got, response) = dispatcher.get_item_sync(get_input).await?;

		response.release();

		let mut state = match got.item.get(&attr) {
			Some(AttributeValue::Str(raw)) => GroupState::parse(raw)?,
			_ => GroupState::empty(),
		};

		mutate(&mut state);

		let mut item = Item::new();

		item.insert(attr.clone(), AttributeValue::Str(state.render()));

		let mut put_dp = data_plane.clone();

		if let Some(mtime) = got.modification_time {
			put_dp = put_dp.with_precondition_mtime(mtime);
		}

		match dispatcher.put_item_sync(PutItemInput::new(put_dp, config.stream_path.as_str(), item)).await {
			Ok((_, response)) => {
				response.release();

				obs::record_operation_outcome("coordinator_cas", obs::Outcome::Success);

				return Ok(state);
			},
			Err(e) if e.is_precondition_failure() => {
				tracing_disabled_or(|| tracing::debug!(attempts, group = %config.group_name, "state CAS lost a race, retrying"));

				if let Some(delay) = wait {
					tokio::time::sleep(jittered(delay)).await;
				}

				continue;
			},
			Err(e) => return Err(e),
		}
	}

	tracing_disabled_or(|| tracing::error!(attempts, group = %config.group_name, "state CAS exhausted its retry budget"));
	obs::record_operation_outcome("coordinator_cas", obs::Outcome::Failure);

	Err(CoordinatorError::CasExhausted { attempts }.into())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn attribute_names_are_scoped_by_group_and_shard() {
		assert_eq!(state_attr_name("g1"), "__cg_state_g1");
		assert_eq!(committed_attr_name("g1", 3), "__cg_committed_g1_3");
	}

	#[test]
	fn shard_path_appends_the_shard_index() {
		assert_eq!(shard_path("/s", 2), "/s/2");
		assert_eq!(shard_path("/s/", 2), "/s/2");
	}

	#[test]
	fn config_defaults_match_the_documented_three_missed_heartbeats_rule() {
		let config = ConsumerGroupConfig::new("/s", "g", 4);

		assert_eq!(config.heartbeat_interval, Duration::seconds(10));
		assert_eq!(config.session_timeout, Duration::seconds(30));
	}
}
