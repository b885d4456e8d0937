//! Chunked relay of an upstream body under the request deadline.

// std
use std::time::Duration as StdDuration;
// crates.io
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use tokio::time::Instant;
// self
use crate::{_prelude::*, error::ProxyError};

/// How a relay stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
	/// The upstream body was relayed in full.
	Completed {
		/// Bytes handed to the caller.
		bytes: u64,
	},
	/// The relay stopped early and the caller's body is truncated.
	Truncated {
		/// Bytes handed to the caller before the failure.
		bytes: u64,
		/// Why the relay stopped.
		reason: String,
	},
	/// The caller went away before the body finished.
	Cancelled {
		/// Bytes handed to the caller before the stream was dropped.
		bytes: u64,
	},
}

/// Callback invoked exactly once when a relay stream ends.
pub type RelayObserver = Box<dyn FnOnce(RelayOutcome) + Send>;

struct Finish {
	observer: Option<RelayObserver>,
	bytes: u64,
}
impl Finish {
	fn report(&mut self, outcome: RelayOutcome) {
		if let Some(observer) = self.observer.take() {
			observer(outcome);
		}
	}
}
impl Drop for Finish {
	fn drop(&mut self) {
		let bytes = self.bytes;

		self.report(RelayOutcome::Cancelled { bytes });
	}
}

struct Relay {
	upstream: BoxStream<'static, reqwest::Result<Bytes>>,
	pending: Bytes,
	chunk_size: usize,
	deadline: Instant,
	timeout: StdDuration,
	finish: Finish,
	done: bool,
}
impl Relay {
	fn fail(&mut self, err: ProxyError) -> ProxyError {
		let bytes = self.finish.bytes;

		tracing::warn!(target: "api", bytes, error = %err, "Upstream relay truncated.");

		self.done = true;
		self.finish.report(RelayOutcome::Truncated { bytes, reason: err.to_string() });

		err
	}
}

/// Re-chunks `upstream` into pieces of at most `chunk_size` bytes.
///
/// The stream yields [`ProxyError::Timeout`] once `deadline` passes and
/// [`ProxyError::StreamInterrupted`] when the upstream read fails; either ends the stream.
pub fn relay<S>(
	upstream: S,
	chunk_size: usize,
	deadline: Instant,
	timeout: StdDuration,
	observer: Option<RelayObserver>,
) -> impl Stream<Item = Result<Bytes, ProxyError>> + Send + 'static
where
	S: 'static + Send + Stream<Item = reqwest::Result<Bytes>>,
{
	let state = Relay {
		upstream: upstream.boxed(),
		pending: Bytes::new(),
		chunk_size: chunk_size.max(1),
		deadline,
		timeout,
		finish: Finish { observer, bytes: 0 },
		done: false,
	};

	futures_util::stream::unfold(state, |mut relay| async move {
		if relay.done {
			return None;
		}

		while relay.pending.is_empty() {
			match tokio::time::timeout_at(relay.deadline, relay.upstream.next()).await {
				Ok(Some(Ok(bytes))) => relay.pending = bytes,
				Ok(Some(Err(e))) => {
					let err = relay.fail(ProxyError::interrupted(e));

					return Some((Err(err), relay));
				},
				Ok(None) => {
					let bytes = relay.finish.bytes;

					relay.finish.report(RelayOutcome::Completed { bytes });

					return None;
				},
				Err(_) => {
					let err = relay.fail(ProxyError::Timeout { after: relay.timeout });

					return Some((Err(err), relay));
				},
			}
		}

		let take = relay.pending.len().min(relay.chunk_size);
		let chunk = relay.pending.split_to(take);

		relay.finish.bytes += chunk.len() as u64;

		Some((Ok(chunk), relay))
	})
}

#[cfg(test)]
mod tests {
	// crates.io
	use futures_util::stream;
	// self
	use super::*;

	fn recorder() -> (Arc<Mutex<Vec<RelayOutcome>>>, RelayObserver) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);

		(seen, Box::new(move |outcome: RelayOutcome| sink.lock().push(outcome)))
	}

	fn far_deadline() -> Instant {
		Instant::now() + StdDuration::from_secs(60)
	}

	#[tokio::test]
	async fn rechunks_without_losing_bytes() {
		let (seen, observer) = recorder();
		let upstream = stream::iter(vec![
			Ok(Bytes::from_static(b"abcdefghij")),
			Ok(Bytes::new()),
			Ok(Bytes::from_static(b"kl")),
		]);
		let chunks = relay(upstream, 4, far_deadline(), StdDuration::from_secs(60), Some(observer))
			.map(|chunk| chunk.expect("Relay chunk should be Ok."))
			.collect::<Vec<_>>()
			.await;

		assert_eq!(chunks, [&b"abcd"[..], b"efgh", b"ij", b"kl"]);
		assert_eq!(*seen.lock(), [RelayOutcome::Completed { bytes: 12 }]);
	}

	#[tokio::test]
	async fn deadline_truncates_the_body() {
		let (seen, observer) = recorder();
		let upstream = stream::iter(vec![Ok(Bytes::from_static(b"head"))]).chain(stream::pending());
		let deadline = Instant::now() + StdDuration::from_millis(50);
		let mut relayed =
			Box::pin(relay(upstream, 64, deadline, StdDuration::from_millis(50), Some(observer)));

		assert_eq!(
			relayed.next().await.map(|chunk| chunk.expect("First chunk should be Ok.")),
			Some(Bytes::from_static(b"head"))
		);
		assert!(matches!(relayed.next().await, Some(Err(ProxyError::Timeout { .. }))));
		assert!(relayed.next().await.is_none());
		assert!(matches!(seen.lock().as_slice(), [RelayOutcome::Truncated { bytes: 4, .. }]));
	}

	#[tokio::test]
	async fn dropping_the_stream_reports_cancellation() {
		let (seen, observer) = recorder();
		let upstream = stream::iter(vec![Ok(Bytes::from_static(b"partial"))]).chain(stream::pending());
		let mut relayed =
			Box::pin(relay(upstream, 64, far_deadline(), StdDuration::from_secs(60), Some(observer)));

		relayed.next().await;
		drop(relayed);

		assert_eq!(*seen.lock(), [RelayOutcome::Cancelled { bytes: 7 }]);
	}
}
