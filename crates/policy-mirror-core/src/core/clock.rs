// crates/policy-mirror-core/src/core/clock.rs
// ============================================================================
// Module: Policy Mirror Clocks
// Description: Clock abstraction for store-assigned timestamps.
// Purpose: Let stores stamp objects from wall time or a controlled clock.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Stores assign creation and deletion timestamps. They read time through the
//! [`Clock`] trait so that replays and tests can control ordering with a
//! [`ManualClock`] instead of racing the wall clock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use time::Duration;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Clock Trait
// ============================================================================

/// Source of timestamps for store writes.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> OffsetDateTime;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Clock that only moves when told to.
///
/// # Invariants
/// - Time is tracked in whole unix milliseconds.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current time in unix milliseconds.
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock fixed at `unix_millis`.
    #[must_use]
    pub const fn new(unix_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(unix_millis),
        }
    }

    /// Moves the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to `unix_millis`.
    pub fn set(&self, unix_millis: i64) {
        self.millis.store(unix_millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        let millis = self.millis.load(Ordering::SeqCst);
        OffsetDateTime::UNIX_EPOCH + Duration::milliseconds(millis)
    }
}
