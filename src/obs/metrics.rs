// self
use crate::obs::{FlowKind, FlowOutcome};

#[cfg(feature = "metrics")] const FLOW_TOTAL: &str = "credential_coordinator_flow_total";
#[cfg(feature = "metrics")] const COALESCED_TOTAL: &str = "credential_coordinator_coalesced_total";

/// Counts one flow outcome, labeled by flow and outcome.
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(FLOW_TOTAL, "flow" => kind.as_str(), "outcome" => outcome.as_str())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Counts one caller parked behind the refresh in flight.
pub fn record_coalesced() {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(COALESCED_TOTAL).increment(1);
	}
}
