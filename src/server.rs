//! HTTP surface: the `/openai/*` proxy route, a health check, and the serve loop.

// std
use std::time::Duration as StdDuration;
// crates.io
use axum::{
	Json, Router,
	extract::{Request, State},
	response::Response,
	routing::{any, get},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
// self
use crate::{
	_prelude::*,
	config::GateConfig,
	error::ConfigError,
	gate::{PROXY_PREFIX, RequestGate},
	quota::QuotaLimiter,
};

/// Builds the router serving `gate`.
pub fn router(gate: Arc<RequestGate>) -> Router {
	Router::new()
		.route("/healthz", get(healthz))
		.route(&format!("{PROXY_PREFIX}{{*path}}"), any(proxy))
		.layer(TraceLayer::new_for_http())
		.with_state(gate)
}

/// Binds `config.listen` and serves until `shutdown` resolves.
///
/// A background task purges idle quota windows every `config.sweep_interval`.
pub async fn serve<F>(config: &GateConfig, gate: Arc<RequestGate>, shutdown: F) -> Result<()>
where
	F: 'static + Send + Future<Output = ()>,
{
	let listener = TcpListener::bind(config.listen).await.map_err(ConfigError::from)?;
	let local = listener.local_addr().map_err(ConfigError::from)?;
	let sweeper = tokio::spawn(sweep(Arc::clone(gate.limiter()), config.sweep_interval));

	tracing::info!(
		target: "api",
		listen = %local,
		upstream = %config.upstream,
		rate = %config.quota.rate,
		"Widget proxy listening."
	);

	let served = axum::serve(listener, router(gate)).with_graceful_shutdown(shutdown).await;

	sweeper.abort();
	served.map_err(ConfigError::from)?;

	tracing::info!(target: "api", "Widget proxy stopped.");

	Ok(())
}

/// Resolves when the process receives Ctrl-C.
pub async fn ctrl_c() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(target: "api", error = %e, "Failed to listen for Ctrl-C; shutting down.");
	}
}

async fn proxy(State(gate): State<Arc<RequestGate>>, request: Request) -> Response {
	gate.handle(request).await
}

async fn healthz() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok" }))
}

async fn sweep(limiter: Arc<QuotaLimiter>, every: StdDuration) {
	let mut ticker = tokio::time::interval(every);

	// The first tick completes immediately.
	ticker.tick().await;

	loop {
		ticker.tick().await;
		limiter.purge_idle();
	}
}
