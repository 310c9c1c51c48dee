//! Virtual time shared by every simulated node.
//!
//! Each node thread pauses through [`NodeClock`]. Time only moves once every
//! node is paused, and then jumps straight to the earliest wake-up, never past
//! the limit the console granted with [`SimTime::run_for`]. The result is a
//! discrete-event simulation that runs as fast as the host allows.

use std::ops::Add;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use losstest_core::clock::{Clock, TelemetryInstant};

/// Virtual time since the session started.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(pub Duration);

impl SimInstant {
    pub fn as_millis(self) -> u128 {
        self.0.as_millis()
    }
}

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = SimInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        SimInstant(self.0 + rhs)
    }
}

struct TimeState {
    now: Duration,
    limit: Duration,
    /// Wake-up per node; `None` while the node is running.
    wakes: Vec<Option<Duration>>,
    /// Set on shutdown: pauses return at once and time follows them.
    free_running: bool,
}

impl TimeState {
    /// Moves time to the earliest wake-up once every node is paused.
    fn advance(&mut self) -> bool {
        let mut next = Duration::MAX;
        for wake in &self.wakes {
            match wake {
                Some(at) => next = next.min(*at),
                None => return false,
            }
        }
        if next <= self.now {
            return false;
        }
        let target = next.min(self.limit);
        if target > self.now && target != Duration::MAX {
            self.now = target;
            true
        } else {
            false
        }
    }

    fn quiescent(&self) -> bool {
        self.now >= self.limit
            && self
                .wakes
                .iter()
                .all(|wake| wake.is_some_and(|at| at > self.now))
    }
}

pub struct SimTime {
    state: Mutex<TimeState>,
    changed: Condvar,
}

impl SimTime {
    pub fn new(nodes: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimeState {
                now: Duration::ZERO,
                limit: Duration::ZERO,
                wakes: vec![None; nodes],
                free_running: false,
            }),
            changed: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> SimInstant {
        SimInstant(self.lock().now)
    }

    /// Lets the nodes run for `span` of virtual time and returns once they
    /// have all paused at or past the new limit.
    pub fn run_for(&self, span: Duration) {
        let mut state = self.lock();
        state.limit = state.now + span;
        if state.advance() {
            self.changed.notify_all();
        }
        while !state.quiescent() && !state.free_running {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Releases every paused node for good; used when the session closes.
    pub fn release_all(&self) {
        let mut state = self.lock();
        state.free_running = true;
        state.limit = Duration::MAX;
        self.changed.notify_all();
    }

    fn pause(&self, node: usize, duration: Duration) {
        let mut state = self.lock();
        let wake = state.now + duration;
        if state.free_running {
            state.now = state.now.max(wake);
            return;
        }
        state.wakes[node] = Some(wake);
        state.advance();
        self.changed.notify_all();
        while state.now < wake && !state.free_running {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.wakes[node] = None;
    }

    fn retire(&self, node: usize) {
        let mut state = self.lock();
        state.wakes[node] = Some(Duration::MAX);
        state.advance();
        self.changed.notify_all();
    }
}

/// Clock handed to one node's engine. Dropping it retires the node so the
/// others keep advancing.
pub struct NodeClock {
    time: Arc<SimTime>,
    node: usize,
}

impl NodeClock {
    pub fn new(time: Arc<SimTime>, node: usize) -> Self {
        Self { time, node }
    }
}

impl Clock for NodeClock {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        self.time.now()
    }

    fn pause(&mut self, duration: Duration) {
        self.time.pause(self.node, duration);
    }
}

impl Drop for NodeClock {
    fn drop(&mut self) {
        self.time.retire(self.node);
    }
}
