//! Widget proxy server.
//!
//! Configuration comes from `WIDGET_PROXY_*` environment variables (see
//! [`widget_proxy::config::GateConfig`]); `WIDGET_PROXY_UPSTREAM` is required and `RUST_LOG`
//! controls log filtering (default `info`).

// std
use std::sync::Arc;
// crates.io
use widget_proxy::{
	config::{GateConfig, SystemEnv},
	gate::RequestGate,
	obs, server,
};

#[tokio::main]
async fn main() -> widget_proxy::error::Result<()> {
	obs::install_subscriber();

	let config = GateConfig::from_env(&SystemEnv)?;
	let store = config.open_store()?;
	let gate = Arc::new(RequestGate::from_config(&config, store)?);

	server::serve(&config, gate, server::ctrl_c()).await
}
