//! Process-health circuit breaker.
//!
//! Every handler reports externally-backed outcomes into one shared
//! counter: a success resets it, consecutive failures accumulate across
//! unrelated endpoints. All failures are assumed to point at the same
//! underlying dependency (the TEE device/service), so there is deliberately
//! no per-endpoint isolation; splitting the counter would mask a systemic
//! outage. Crossing the threshold schedules a delayed non-zero process exit
//! and leaves recovery to the supervisor that restarts the service.

use std::{
	fmt::Display,
	sync::atomic::{AtomicU32, Ordering},
	time::Duration,
};

/// Default consecutive-failure threshold. `FAILURE_THRESHOLD` in the
/// environment overrides it at process start; it is immutable afterwards.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Grace period between crossing the threshold and exiting. Long enough to
/// let the in-flight response flush to the client.
pub const EXIT_GRACE_PERIOD: Duration = Duration::from_millis(50);

/// Invoked by [`HealthBreaker`] once the process is considered beyond
/// recovery. Production wiring exits the process; tests substitute a
/// capturing stub so crossings can be asserted without killing the test
/// runner.
///
/// Implementations must tolerate repeated invocation: once the threshold is
/// crossed, every further failure schedules another termination.
pub trait FatalHandler: Send + Sync {
	fn fatal(&self);
}

/// [`FatalHandler`] that exits with a non-zero status after
/// [`EXIT_GRACE_PERIOD`]. Each invocation independently sleeps then exits;
/// exit is terminal, so races between multiple scheduled exits are
/// harmless.
#[derive(Debug)]
pub struct ExitProcess;

impl FatalHandler for ExitProcess {
	fn fatal(&self) {
		std::thread::spawn(|| {
			std::thread::sleep(EXIT_GRACE_PERIOD);
			std::process::exit(1);
		});
	}
}

/// Shared consecutive-failure counter with a fixed threshold.
///
/// One instance is constructed at process start and handed to every request
/// task; tests construct their own with a stub handler.
pub struct HealthBreaker {
	threshold: u32,
	failures: AtomicU32,
	on_fatal: Box<dyn FatalHandler>,
}

impl HealthBreaker {
	/// Create a breaker. A `threshold` of zero is bumped to one so a
	/// success can always hold off termination.
	#[must_use]
	pub fn new(threshold: u32, on_fatal: Box<dyn FatalHandler>) -> Self {
		Self {
			threshold: threshold.max(1),
			failures: AtomicU32::new(0),
			on_fatal,
		}
	}

	/// Unconditionally reset the failure streak.
	pub fn record_success(&self) {
		self.failures.store(0, Ordering::Relaxed);
	}

	/// Count a failure and return the post-increment streak length. At or
	/// past the threshold the fatal handler is invoked.
	///
	/// `context` names the failing operation; both it and `err` are logged
	/// so no failure disappears silently.
	pub fn record_failure(&self, context: &str, err: &dyn Display) -> u32 {
		let count = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
		eprintln!("{context} failed ({count}/{}): {err}", self.threshold);

		if count >= self.threshold {
			eprintln!("failure threshold reached, exiting to trigger restart");
			self.on_fatal.fatal();
		}
		count
	}

	/// Current streak length.
	#[must_use]
	pub fn consecutive_failures(&self) -> u32 {
		self.failures.load(Ordering::Relaxed)
	}
}
