// self
use crate::obs::Outcome;

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_operation_outcome(operation: &'static str, outcome: Outcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"v3io_client_op_total",
			"operation" => operation,
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (operation, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_operation_outcome_noop_without_metrics() {
		record_operation_outcome("dispatch", Outcome::Failure);
	}
}
