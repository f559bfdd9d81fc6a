//! This module contains the type definitions necessary to support the
//! monitoring functionality for the state manager.
//!
//! # Best-Effort Monitoring
//!
//! Note that the monitoring provided by the watchdog is a best-effort approach.
//! The scheduler only polls between batches of steps, so a single interpreter
//! step or oracle query that hangs cannot be interrupted by it. Oracle queries
//! are instead bounded by the oracle's own timeout.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;

/// A dynamically dispatched [`Watchdog`] instance that can be shared with the
/// scheduler's worker threads.
pub type DynWatchdog = Arc<dyn Watchdog>;

/// The interface to an object that can be polled to see if exploration needs
/// to stop.
///
/// The interface is simple, but it can encapsulate arbitrary logic as far as
/// the state manager is concerned, allowing the client to implement complex
/// stop logic.
pub trait Watchdog
where
    Self: Debug + Send + Sync,
{
    /// Checks if the state manager should halt exploration.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of scheduling rounds the state manager should wait
    /// before polling the watchdog.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// An implementation of the [`Watchdog`] trait that does not place any
/// restrictions on exploration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Arc`].
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        // Something ridiculously huge so it basically never gets checked.
        1_000_000_000_000
    }
}

/// A watchdog that tells the state manager when to stop based on a flag in the
/// form of an atomic boolean.
///
/// By default, it requests that the scheduler poll for watchdog status every
/// [`DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS`] rounds. This is configurable by
/// calling [`Self::polling_every`].
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    /// The flag that should be mutated externally to stop exploration.
    flag: Arc<AtomicBool>,

    /// The number of scheduling rounds to wait before polling the watchdog.
    poll_loop_iterations: usize,
}

impl FlagWatchdog {
    /// Constructs a new `FlagWatchdog` wrapping the provided `flag`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            flag,
            poll_loop_iterations,
        }
    }

    /// Specifies the number of scheduling rounds that the state manager should
    /// wait before polling the watchdog for status.
    ///
    /// A value of zero is treated as one.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations.max(1);
        self
    }

    /// Wraps the watchdog into an [`Arc`].
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use crate::watchdog::{FlagWatchdog, LazyWatchdog, Watchdog};

    #[test]
    fn lazy_watchdog_never_stops() {
        assert!(!LazyWatchdog.should_stop());
    }

    #[test]
    fn flag_watchdog_follows_its_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let watchdog = FlagWatchdog::new(flag.clone()).polling_every(0);

        assert!(!watchdog.should_stop());
        assert_eq!(watchdog.poll_every(), 1);

        flag.store(true, Ordering::Relaxed);
        assert!(watchdog.should_stop());
    }
}
