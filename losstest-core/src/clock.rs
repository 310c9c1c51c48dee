//! Monotonic time source used by every wait in the engine.

use core::ops::Add;
use core::time::Duration;

pub use crate::telemetry::TelemetryInstant;

/// Instants the engine can compare and offset.
pub trait EngineInstant: TelemetryInstant + Ord + Add<Duration, Output = Self> {}

impl<T> EngineInstant for T where T: TelemetryInstant + Ord + Add<Duration, Output = T> {}

/// Platform clock.
///
/// `pause` is where a wait yields between polls: a firmware port sleeps the
/// task, a host port sleeps the thread, a test clock just advances.
pub trait Clock {
    type Instant: EngineInstant;

    fn now(&self) -> Self::Instant;

    fn pause(&mut self, duration: Duration);
}

/// A point in time a wait runs until, advanced in fixed steps.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Barrier<I> {
    at: I,
}

impl<I> Barrier<I>
where
    I: EngineInstant,
{
    #[must_use]
    pub const fn at(at: I) -> Self {
        Self { at }
    }

    /// Moves the barrier forward by `step` from its previous position.
    pub fn advance(&mut self, step: Duration) -> I {
        self.at = self.at + step;
        self.at
    }

    #[must_use]
    pub const fn instant(&self) -> I {
        self.at
    }
}
