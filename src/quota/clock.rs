//! Clock abstraction so quota windows can be driven deterministically in tests.
//!
//! Windows are measured on a monotonic instant; the wall clock is read only to report
//! `earliest_retry_at`, so a stepped system clock never stretches or shortens a window.
//!
//! - [`SystemClock`] reads [`Instant::now`] and the UTC wall clock.
//! - [`ManualClock`] returns controllable readings that only move when told to.

// std
use std::time::{Duration as StdDuration, Instant};
// self
use crate::_prelude::*;

/// Source of time for the quota limiter.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Monotonic reading used to open and expire windows.
	fn instant(&self) -> Instant;

	/// Wall-clock reading used for reporting.
	fn now(&self) -> OffsetDateTime;
}

/// Live clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn instant(&self) -> Instant {
		Instant::now()
	}

	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

#[derive(Debug)]
struct ManualReadings {
	origin: Instant,
	elapsed: StdDuration,
	wall: OffsetDateTime,
}

/// Clock frozen at a fixed reading until moved explicitly.
#[derive(Clone, Debug)]
pub struct ManualClock(Arc<Mutex<ManualReadings>>);
impl ManualClock {
	/// Creates a clock whose wall reading starts at `start`.
	pub fn starting_at(start: OffsetDateTime) -> Self {
		Self(Arc::new(Mutex::new(ManualReadings {
			origin: Instant::now(),
			elapsed: StdDuration::ZERO,
			wall: start,
		})))
	}

	/// Lets `by` pass on both readings.
	pub fn advance(&self, by: Duration) {
		let mut readings = self.0.lock();

		readings.elapsed += by.unsigned_abs();
		readings.wall += by.abs();
	}

	/// Steps only the wall reading by `by`, which may be negative, as an NTP correction would.
	pub fn step_wall(&self, by: Duration) {
		self.0.lock().wall += by;
	}
}
impl Default for ManualClock {
	fn default() -> Self {
		Self::starting_at(OffsetDateTime::now_utc())
	}
}
impl Clock for ManualClock {
	fn instant(&self) -> Instant {
		let readings = self.0.lock();

		readings.origin + readings.elapsed
	}

	fn now(&self) -> OffsetDateTime {
		self.0.lock().wall
	}
}
