//! Optional observability helpers shared by the dispatcher, operation layer, and
//! consumer-group coordinator.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `v3io_client.op` with the `operation`
//!   and `stage` fields.
//! - Enable `metrics` to increment the `v3io_client_op_total` counter for every
//!   attempt/success/failure, labeled by `operation` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to a dispatcher or coordinator call.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
		}
	}

	fn from_result(ok: bool) -> Self {
		if ok { Outcome::Success } else { Outcome::Failure }
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records the outcome of a dispatcher round-trip under the `"dispatch"` operation label.
pub fn record_dispatch_outcome(ok: bool) {
	record_operation_outcome("dispatch", Outcome::from_result(ok));
}

// self
use crate::_prelude::*;

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn outcome_labels_are_stable() {
		assert_eq!(Outcome::Attempt.as_str(), "attempt");
		assert_eq!(Outcome::Success.as_str(), "success");
		assert_eq!(Outcome::Failure.as_str(), "failure");
	}
}
