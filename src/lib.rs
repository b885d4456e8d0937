//! Token-gated reverse proxy for OpenAI-compatible APIs.
//!
//! Callers are resolved from sessions or published access tokens and charged against a
//! per-identity fixed-window quota. Upstream responses stream back without ever being
//! buffered whole.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod forward;
pub mod gate;
pub mod obs;
pub mod quota;
pub mod resolver;
pub mod server;
pub mod store;
#[cfg(test)]
mod _preludet {
	//! Convenience re-exports and fixtures shared by unit tests.

	pub use crate::_prelude::*;

	// self
	use crate::{
		audit::{AuditEvent, AuditSink},
		auth::{AccessToken, Identity},
		store::{AccessRecord, MemoryStore},
	};

	/// Audit sink that keeps every event in memory for assertions.
	#[derive(Clone, Debug, Default)]
	pub struct RecordingAuditSink(pub Arc<Mutex<Vec<AuditEvent>>>);
	impl RecordingAuditSink {
		/// Returns a snapshot of the recorded events.
		pub fn events(&self) -> Vec<AuditEvent> {
			self.0.lock().clone()
		}
	}
	impl AuditSink for RecordingAuditSink {
		fn record(&self, event: AuditEvent) {
			self.0.lock().push(event);
		}
	}

	/// Builds an access record for `owner`, optionally published.
	pub fn access_record(owner: &str, name: &str, is_public: bool) -> AccessRecord {
		let owner = Identity::new(owner).expect("Owner fixture should be a valid identity.");

		AccessRecord::new(AccessToken::generate(), owner, name).with_public(is_public)
	}

	/// Returns a memory store seeded with the provided records.
	pub fn seeded_store(records: impl IntoIterator<Item = AccessRecord>) -> Arc<MemoryStore> {
		let store = MemoryStore::default();

		for record in records {
			store.insert_now(record);
		}

		Arc::new(store)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use axum;
pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tower as _};
