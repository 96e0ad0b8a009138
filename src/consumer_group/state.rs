//! The persisted consumer-group shared state: schema version, member list, and
//! shard-to-member assignments, JSON-encoded into a single item attribute on the stream
//! root.

// self
use crate::_prelude::*;

/// Schema version written by this crate. Bumped only on a breaking change to the wire
/// shape below.
pub const SCHEMA_VERSION: u32 = 1;

/// A live or recently-live consumer-group member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
	/// Unique member ID, assigned at join time.
	pub id: String,
	/// Unix-epoch milliseconds of this member's last heartbeat.
	#[serde(rename = "lastHeartbeat")]
	pub last_heartbeat_millis: i64,
}
impl Member {
	/// True when this member's heartbeat is no older than `session_timeout` as of `now`.
	pub fn is_live(&self, now: OffsetDateTime, session_timeout: Duration) -> bool {
		let last_heartbeat = OffsetDateTime::from_unix_timestamp(self.last_heartbeat_millis / 1000)
			.unwrap_or(OffsetDateTime::UNIX_EPOCH);

		now - last_heartbeat <= session_timeout
	}
}

/// One shard's current owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardAssignment {
	/// Shard index within the stream.
	#[serde(rename = "shardID")]
	pub shard_id: u32,
	/// Owning member's ID.
	#[serde(rename = "memberID")]
	pub member_id: String,
}

/// The full persisted document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
	/// Schema version of this document.
	#[serde(rename = "schemaVersion")]
	pub schema_version: u32,
	/// Current members, live or recently dead.
	pub members: Vec<Member>,
	/// Current shard-to-member ownership: at most one owner per shard.
	#[serde(rename = "shardAssignments")]
	pub shard_assignments: Vec<ShardAssignment>,
}
impl GroupState {
	/// An empty document at the current schema version, as seen by the first member to
	/// join a group.
	pub fn empty() -> Self {
		Self { schema_version: SCHEMA_VERSION, members: Vec::new(), shard_assignments: Vec::new() }
	}

	/// Parses the document from its JSON-encoded attribute value.
	pub fn parse(raw: &str) -> Result<Self, crate::error::CoordinatorError> {
		serde_json::from_str(raw).map_err(|e| crate::error::CoordinatorError::MalformedState {
			reason: e.to_string(),
		})
	}

	/// Renders the document back to its JSON attribute value.
	pub fn render(&self) -> String {
		serde_json::to_string(self).expect("GroupState serialization is infallible.")
	}

	/// IDs of members whose heartbeat is not older than `session_timeout` as of `now`,
	/// sorted lexicographically (the order the deterministic partitioner requires).
	pub fn live_member_ids(&self, now: OffsetDateTime, session_timeout: Duration) -> Vec<String> {
		let mut ids: Vec<String> =
			self.members.iter().filter(|m| m.is_live(now, session_timeout)).map(|m| m.id.clone()).collect();

		ids.sort();

		ids
	}

	/// Upserts a member's heartbeat, appending it if it is not already present.
	pub fn touch_member(&mut self, member_id: &str, now: OffsetDateTime) {
		let millis = now.unix_timestamp() * 1000;

		match self.members.iter_mut().find(|m| m.id == member_id) {
			Some(m) => m.last_heartbeat_millis = millis,
			None => self.members.push(Member { id: member_id.to_owned(), last_heartbeat_millis: millis }),
		}
	}

	/// Removes a member from the document.
	pub fn remove_member(&mut self, member_id: &str) {
		self.members.retain(|m| m.id != member_id);
	}

	/// Returns the current owner of `shard_id`, if any.
	pub fn owner_of(&self, shard_id: u32) -> Option<&str> {
		self.shard_assignments.iter().find(|a| a.shard_id == shard_id).map(|a| a.member_id.as_str())
	}

	/// Replaces the shard assignment table outright; callers recompute it via
	/// [`crate::consumer_group::rebalance::rebalance`] before calling this.
	pub fn set_assignments(&mut self, assignments: Vec<ShardAssignment>) {
		self.shard_assignments = assignments;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn round_trips_through_json() {
		let mut state = GroupState::empty();

		state.touch_member("m1", OffsetDateTime::UNIX_EPOCH);
		state.set_assignments(vec![ShardAssignment { shard_id: 0, member_id: "m1".into() }]);

		let rendered = state.render();
		let parsed = GroupState::parse(&rendered).expect("Rendered state should parse.");

		assert_eq!(parsed, state);
	}

	#[test]
	fn wire_shape_matches_the_documented_camel_case_keys() {
		let mut state = GroupState::empty();

		state.touch_member("m1", OffsetDateTime::UNIX_EPOCH);
		state.set_assignments(vec![ShardAssignment { shard_id: 2, member_id: "m1".into() }]);

		let value: serde_json::Value = serde_json::from_str(&state.render()).unwrap();

		assert!(value.get("schemaVersion").is_some());
		assert!(value["members"][0].get("lastHeartbeat").is_some());
		assert!(value["shardAssignments"][0].get("shardID").is_some());
		assert!(value["shardAssignments"][0].get("memberID").is_some());
	}

	#[test]
	fn liveness_is_judged_against_the_session_timeout() {
		let member = Member { id: "m1".into(), last_heartbeat_millis: 0 };
		let now = OffsetDateTime::UNIX_EPOCH + Duration::seconds(10);

		assert!(member.is_live(now, Duration::seconds(30)));
		assert!(!member.is_live(now, Duration::seconds(5)));
	}

	#[test]
	fn malformed_state_is_a_coordinator_error() {
		let err = GroupState::parse("not json").expect_err("Garbage should not parse.");

		assert!(matches!(err, crate::error::CoordinatorError::MalformedState { .. }));
	}

	#[test]
	fn touch_member_upserts_rather_than_duplicates() {
		let mut state = GroupState::empty();

		state.touch_member("m1", OffsetDateTime::UNIX_EPOCH);
		state.touch_member("m1", OffsetDateTime::UNIX_EPOCH + Duration::seconds(5));

		assert_eq!(state.members.len(), 1);
		assert_eq!(state.members[0].last_heartbeat_millis, 5000);
	}

	#[test]
	fn remove_member_drops_its_entry_only() {
		let mut state = GroupState::empty();

		state.touch_member("m1", OffsetDateTime::UNIX_EPOCH);
		state.touch_member("m2", OffsetDateTime::UNIX_EPOCH);
		state.remove_member("m1");

		assert_eq!(state.members.len(), 1);
		assert_eq!(state.members[0].id, "m2");
	}
}
