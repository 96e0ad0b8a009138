//! Lets multiple processes cooperatively consume a stream's shards with exactly one
//! active owner per shard and resumable offsets.
//!
//! The coordinator is a thin layer on top of [`crate::ops`]: membership and shard
//! ownership live in one JSON document, persisted as a single item attribute on the
//! stream root and mutated only through the item layer's compare-and-swap on
//! modification time. A
//! [`session::ConsumerGroupSession`] is the entry point: [`session::ConsumerGroupSession::join`]
//! registers the member, computes the initial assignment, and starts the background
//! heartbeat/rebalance and offset-commit tasks; [`session::ConsumerGroupSession::take_claim`]
//! hands the caller a [`claim::ShardConsumer`] for each shard it currently owns.

pub mod claim;
pub mod rebalance;
pub mod session;
pub mod state;

pub use claim::{RecordBatch, ShardConsumer, ShardState};
pub use rebalance::rebalance;
pub use session::{ConsumerGroupConfig, ConsumerGroupSession};
pub use state::{GroupState, Member, ShardAssignment};
