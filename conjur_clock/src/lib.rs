//! Utilities for messing with time
//!
//! Token deadlines are measured against a monotonic [`Instant`], while
//! request signing needs the wall-clock [`SystemTime`]. Both come from a
//! [`Clock`], so tests can swap in a [`TestClock`] and move time forward
//! without sleeping.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current monotonic time according to this clock
    fn now(&self) -> Instant;

    /// Gets the current wall-clock time according to this clock
    fn system_time(&self) -> SystemTime;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now(&self) -> Instant {
        (**self).now()
    }

    #[inline]
    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// The system clock as provided by `std::time`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A test clock which only moves when told to
///
/// Clones share the same notion of elapsed time, so a clone handed to a
/// component under test can be advanced from the test body.
#[derive(Clone, Debug)]
pub struct TestClock {
    origin: Instant,
    wall_origin: SystemTime,
    elapsed_nanos: Arc<AtomicU64>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl TestClock {
    /// Creates a new test clock whose wall-clock time starts at `wall_origin`
    pub fn new(wall_origin: SystemTime) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            elapsed_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Moves the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Total time the clock has been advanced
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::Acquire))
    }
}

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    #[inline]
    fn system_time(&self) -> SystemTime {
        self.wall_origin + self.elapsed()
    }
}
