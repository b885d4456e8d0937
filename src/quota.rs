//! Quota Limiter: fixed-window request counting per caller identity.
//!
//! Each identity owns one [`QuotaWindow`] guarded by its own mutex. The identity index is a
//! read-mostly map: lookups share a read lock, so callers with different identities never
//! wait on each other; the write lock is taken only to create a window for a new identity or
//! to purge idle ones. Rollover, check, and increment happen inside the per-identity critical
//! section, which keeps `count <= limit` for every window under concurrent calls.

pub mod clock;

pub use clock::*;

// std
use std::time::{Duration as StdDuration, Instant};
// self
use crate::{_prelude::*, error::ConfigError};

/// Capacity and length of a quota window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaPolicy {
	limit: u32,
	period: Duration,
}
impl QuotaPolicy {
	/// Creates a policy admitting `limit` requests per `period`.
	pub fn new(limit: u32, period: Duration) -> Result<Self, ConfigError> {
		if limit == 0 {
			return Err(ConfigError::NonPositive { field: "quota.limit" });
		}
		if !period.is_positive() {
			return Err(ConfigError::NonPositive { field: "quota.period" });
		}

		Ok(Self { limit, period })
	}

	/// Requests admitted per window.
	pub fn limit(&self) -> u32 {
		self.limit
	}

	/// Window length.
	pub fn period(&self) -> Duration {
		self.period
	}

	fn span(&self) -> StdDuration {
		self.period.unsigned_abs()
	}
}
impl Default for QuotaPolicy {
	fn default() -> Self {
		Self { limit: 60, period: Duration::MINUTE }
	}
}
/// Parses `<count>/<period>` rates such as `60/m`, `1/60s`, or `100/h`.
impl FromStr for QuotaPolicy {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = |reason| ConfigError::InvalidRate { rate: s.to_owned(), reason };
		let (count, period) = s.trim().split_once('/').ok_or_else(|| invalid("missing `/`"))?;
		let limit: u32 = count.trim().parse().map_err(|_| invalid("count is not a number"))?;
		let period = period.trim();
		let unit_at = period
			.find(|c: char| !c.is_ascii_digit())
			.ok_or_else(|| invalid("missing period unit"))?;
		let (multiplier, unit) = period.split_at(unit_at);
		let multiplier: i32 = if multiplier.is_empty() {
			1
		} else {
			multiplier.parse().map_err(|_| invalid("period multiplier is not a number"))?
		};
		let unit = match unit {
			"s" | "sec" => Duration::SECOND,
			"m" | "min" => Duration::MINUTE,
			"h" | "hour" => Duration::HOUR,
			"d" | "day" => Duration::DAY,
			_ => return Err(invalid("unknown period unit")),
		};
		let period = unit.checked_mul(multiplier).ok_or_else(|| invalid("period overflows"))?;

		Self::new(limit, period)
	}
}

/// Result emitted by [`QuotaLimiter::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuotaDecision {
	/// The request is admitted and counted.
	Admit {
		/// Requests left in the current window after this one.
		remaining: u32,
	},
	/// The window is full; the request was not counted.
	Reject(RetryDirective),
}
impl QuotaDecision {
	/// Returns `true` for [`QuotaDecision::Admit`].
	pub fn is_admitted(&self) -> bool {
		matches!(self, Self::Admit { .. })
	}
}

/// Advises callers when to retry after a [`QuotaDecision::Reject`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Wall-clock estimate of when the current window ends.
	pub earliest_retry_at: OffsetDateTime,
	/// Time remaining until the window ends.
	pub recommended_backoff: StdDuration,
	/// Policy that rejected the request, e.g. `1 request(s) per 60s`.
	pub reason: Option<String>,
}
impl RetryDirective {
	/// Creates a new directive with the provided timing metadata.
	pub fn new(earliest_retry_at: OffsetDateTime, recommended_backoff: StdDuration) -> Self {
		Self { earliest_retry_at, recommended_backoff, reason: None }
	}

	/// Adds a human-readable reason.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}

	/// Backoff rounded up to whole seconds (at least one) for `Retry-After`.
	pub fn retry_after_secs(&self) -> u64 {
		let secs = self.recommended_backoff.as_secs_f64().ceil();

		if secs < 1. { 1 } else { secs as u64 }
	}
}

/// Counter for one identity within `[window_start, window_start + period)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaWindow {
	/// Monotonic start of the current window.
	pub window_start: Instant,
	/// Requests admitted in the current window.
	pub count: u32,
}
impl QuotaWindow {
	fn fresh(at: Instant) -> Self {
		Self { window_start: at, count: 0 }
	}

	fn is_expired(&self, policy: &QuotaPolicy, at: Instant) -> bool {
		at >= self.window_start + policy.span()
	}

	fn evaluate(&mut self, policy: &QuotaPolicy, at: Instant, wall: OffsetDateTime) -> QuotaDecision {
		if self.is_expired(policy, at) {
			*self = Self::fresh(at);
		}
		if self.count < policy.limit {
			self.count += 1;

			return QuotaDecision::Admit { remaining: policy.limit - self.count };
		}

		let backoff = (self.window_start + policy.span()).saturating_duration_since(at);

		QuotaDecision::Reject(
			RetryDirective::new(wall + backoff, backoff)
				.with_reason(format!("{} request(s) per {}", policy.limit, policy.period)),
		)
	}
}

/// Per-identity fixed-window limiter shared by every request task.
pub struct QuotaLimiter {
	policy: QuotaPolicy,
	clock: Arc<dyn Clock>,
	windows: RwLock<HashMap<String, Mutex<QuotaWindow>>>,
}
impl QuotaLimiter {
	/// Creates a limiter that reads time from the system clock.
	pub fn new(policy: QuotaPolicy) -> Self {
		Self::with_clock(policy, Arc::new(SystemClock))
	}

	/// Creates a limiter that reads time from `clock`.
	pub fn with_clock(policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
		Self { policy, clock, windows: Default::default() }
	}

	/// Active policy.
	pub fn policy(&self) -> &QuotaPolicy {
		&self.policy
	}

	/// Counts one request for `identity_key`; returns `false` when the window is full.
	pub fn admit(&self, identity_key: &str) -> bool {
		self.check(identity_key).is_admitted()
	}

	/// Counts one request for `identity_key` and reports when to retry on rejection.
	pub fn check(&self, identity_key: &str) -> QuotaDecision {
		let (at, wall) = (self.clock.instant(), self.clock.now());

		{
			let windows = self.windows.read();

			if let Some(window) = windows.get(identity_key) {
				return window.lock().evaluate(&self.policy, at, wall);
			}
		}

		let mut windows = self.windows.write();
		let window = windows
			.entry(identity_key.to_owned())
			.or_insert_with(|| Mutex::new(QuotaWindow::fresh(at)));

		window.get_mut().evaluate(&self.policy, at, wall)
	}

	/// Snapshot of the window tracked for `identity_key`, if any.
	pub fn window(&self, identity_key: &str) -> Option<QuotaWindow> {
		self.windows.read().get(identity_key).map(|window| *window.lock())
	}

	/// Number of identities currently tracked.
	pub fn tracked(&self) -> usize {
		self.windows.read().len()
	}

	/// Drops windows whose period has fully elapsed; returns how many were removed.
	///
	/// An expired window behaves exactly like a missing one, so purging never changes a
	/// future decision.
	pub fn purge_idle(&self) -> usize {
		let at = self.clock.instant();
		let mut windows = self.windows.write();
		let before = windows.len();

		windows.retain(|_, window| !window.get_mut().is_expired(&self.policy, at));

		let purged = before - windows.len();

		if purged > 0 {
			tracing::debug!(target: "api", purged, remaining = windows.len(), "Purged idle quota windows.");
		}

		purged
	}
}
impl Debug for QuotaLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("QuotaLimiter")
			.field("policy", &self.policy)
			.field("tracked", &self.tracked())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::thread;
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn limiter(limit: u32, period: Duration) -> (QuotaLimiter, ManualClock) {
		let clock = ManualClock::starting_at(macros::datetime!(2025-11-10 12:00 UTC));
		let policy = QuotaPolicy::new(limit, period).expect("Policy fixture should be valid.");

		(QuotaLimiter::with_clock(policy, Arc::new(clock.clone())), clock)
	}

	#[test]
	fn admits_up_to_limit_within_one_window() {
		let (limiter, clock) = limiter(3, Duration::MINUTE);

		assert!(limiter.admit("alice"));
		assert!(limiter.admit("alice"));

		clock.advance(Duration::seconds(59));

		assert!(limiter.admit("alice"));
		assert!(!limiter.admit("alice"), "The (limit+1)-th request must be rejected.");
		assert_eq!(
			limiter.window("alice").map(|w| w.count),
			Some(3),
			"Rejections must not mutate the window."
		);
	}

	#[test]
	fn reset_is_exact_after_period() {
		let (limiter, clock) = limiter(2, Duration::MINUTE);

		assert!(limiter.admit("alice"));
		assert!(limiter.admit("alice"));
		assert!(!limiter.admit("alice"));

		clock.advance(Duration::MINUTE);

		assert!(limiter.admit("alice"));
		assert!(limiter.admit("alice"));
		assert!(!limiter.admit("alice"), "Exactly `limit` admits follow a reset.");
	}

	#[test]
	fn rejection_reports_time_until_window_end() {
		let (limiter, clock) = limiter(1, Duration::MINUTE);

		assert!(limiter.admit("alice"));

		clock.advance(Duration::seconds(20));

		let QuotaDecision::Reject(directive) = limiter.check("alice") else {
			panic!("Second request should be rejected.");
		};

		assert_eq!(directive.recommended_backoff, StdDuration::from_secs(40));
		assert_eq!(directive.retry_after_secs(), 40);
		assert_eq!(directive.earliest_retry_at, clock.now() + Duration::seconds(40));
		assert!(
			directive.reason.as_deref().is_some_and(|r| r.starts_with("1 request(s) per")),
			"Reason should name the policy: {:?}.",
			directive.reason
		);
	}

	#[test]
	fn wall_clock_steps_do_not_move_windows() {
		let (limiter, clock) = limiter(1, Duration::MINUTE);

		assert!(limiter.admit("alice"));

		clock.step_wall(-Duration::HOUR);

		let QuotaDecision::Reject(directive) = limiter.check("alice") else {
			panic!("The window is still full.");
		};

		assert_eq!(directive.retry_after_secs(), 60, "A backwards step must not grow Retry-After.");

		clock.step_wall(Duration::DAY);

		assert!(!limiter.admit("alice"), "A forwards step must not end the window early.");

		clock.advance(Duration::MINUTE);

		assert!(limiter.admit("alice"));
	}

	#[test]
	fn identities_are_counted_independently() {
		let (limiter, _clock) = limiter(1, Duration::MINUTE);

		assert!(limiter.admit("alice"));
		assert!(limiter.admit("bob"));
		assert!(!limiter.admit("alice"));
		assert_eq!(limiter.tracked(), 2);
	}

	#[test]
	fn concurrent_admits_never_exceed_limit() {
		let (limiter, _clock) = limiter(25, Duration::MINUTE);
		let limiter = Arc::new(limiter);
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let limiter = limiter.clone();

				thread::spawn(move || (0..20).filter(|_| limiter.admit("shared")).count())
			})
			.collect();
		let admitted: usize = handles
			.into_iter()
			.map(|h| h.join().expect("Worker thread should not panic."))
			.sum();

		assert_eq!(admitted, 25);
	}

	#[test]
	fn purge_drops_only_expired_windows() {
		let (limiter, clock) = limiter(1, Duration::MINUTE);

		assert!(limiter.admit("alice"));

		clock.advance(Duration::seconds(30));

		assert!(limiter.admit("bob"));

		clock.advance(Duration::seconds(30));

		assert_eq!(limiter.purge_idle(), 1);
		assert!(limiter.window("alice").is_none());
		assert!(!limiter.admit("bob"), "Live windows must survive a purge.");
	}

	#[test]
	fn parses_rate_strings() {
		let policy: QuotaPolicy = "60/m".parse().expect("`60/m` should parse.");

		assert_eq!((policy.limit(), policy.period()), (60, Duration::MINUTE));

		let policy: QuotaPolicy = "1/60s".parse().expect("`1/60s` should parse.");

		assert_eq!((policy.limit(), policy.period()), (1, Duration::MINUTE));

		let policy: QuotaPolicy = "10/5m".parse().expect("`10/5m` should parse.");

		assert_eq!(policy.period(), Duration::minutes(5));

		for bad in ["60", "x/m", "5/", "5/w", "0/m", "5/0m"] {
			assert!(bad.parse::<QuotaPolicy>().is_err(), "`{bad}` should be rejected.");
		}
	}
}
