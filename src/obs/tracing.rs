// crates.io
use tracing::{Span, field::Empty, instrument::Instrumented};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
// self
use crate::{_prelude::*, auth::Identity, obs::GateStage};

/// Span wrapper used by the request gate.
#[derive(Clone, Debug)]
pub struct GateSpan {
	span: Span,
}
impl GateSpan {
	/// Creates a new span for an inbound request.
	pub fn new(method: &str, path: &str) -> Self {
		let span = tracing::info_span!(
			"widget_proxy.gate",
			method,
			path,
			identity = Empty,
			stage = GateStage::Received.as_str(),
		);

		super::record_stage(GateStage::Received);

		Self { span }
	}

	/// Records the stage the request just entered.
	pub fn stage(&self, stage: GateStage) {
		self.span.record("stage", stage.as_str());
		super::record_stage(stage);
	}

	/// Records the resolved caller identity.
	pub fn identity(&self, identity: &Identity) {
		self.span.record("identity", identity.as_str());
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

/// Installs the process-wide `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn install_subscriber() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let fmt_layer = fmt::layer().with_target(true).with_level(true);

	let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}
