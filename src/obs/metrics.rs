// self
use crate::obs::GateStage;

/// Records that a request entered `stage` via the global metrics recorder (when enabled).
pub fn record_stage(stage: GateStage) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("widget_proxy_gate_total", "stage" => stage.as_str()).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = stage;
	}
}
