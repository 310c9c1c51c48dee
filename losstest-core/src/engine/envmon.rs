//! Environment monitor: counts every advertisement heard per channel and keeps
//! a rolling RSSI summary of each.

use core::time::Duration;

use super::{LossTest, StepResult};
use crate::clock::{Clock, EngineInstant};
use crate::config::AbortPredicate;
use crate::phy::{CHANNEL_COUNT, Channel};
use crate::radio::{Radio, RadioError, ScanMethod};
use crate::stats::{CappedCounter, ChannelCounters, RssiSummary, RssiWindow};
use crate::telemetry::{LogLevel, LogSink, TelemetryEvent};
use crate::trigger::Mode;

const ENV_WINDOW: usize = 256;

pub(super) struct EnvMonState<I> {
    windows: [RssiWindow<I, ENV_WINDOW>; CHANNEL_COUNT],
    counters: ChannelCounters,
    summaries: [RssiSummary; CHANNEL_COUNT],
}

impl<I> EnvMonState<I>
where
    I: EngineInstant,
{
    pub(super) fn new(sample_lifetime: Duration) -> Self {
        Self {
            windows: core::array::from_fn(|_| RssiWindow::new(sample_lifetime)),
            counters: [CappedCounter::default(); CHANNEL_COUNT],
            summaries: [RssiSummary::default(); CHANNEL_COUNT],
        }
    }

    pub(super) fn record(&mut self, channel: Channel, now: I, rssi: i8) {
        let index = channel.index();
        self.windows[index].push(now, rssi);
        self.counters[index].increment();
    }

    fn summarize(&mut self, now: I) {
        for (summary, window) in self.summaries.iter_mut().zip(&self.windows) {
            *summary = window.summary(now);
        }
    }
}

impl<R, C, A, L> LossTest<R, C, A, L>
where
    R: Radio,
    C: Clock,
    A: AbortPredicate,
    L: LogSink,
{
    /// RSSI summary of `channel` as of the last monitor step.
    #[must_use]
    pub fn env_summary(&self, channel: Channel) -> RssiSummary {
        self.envmon.summaries[channel.index()]
    }

    /// Advertisements heard on `channel` since boot, capped.
    #[must_use]
    pub fn env_counter(&self, channel: Channel) -> u32 {
        self.envmon.counters[channel.index()].get()
    }

    pub(super) fn envmon_setup(&mut self) -> Result<(), RadioError> {
        self.stop_all_targets();
        self.scan_or_warn(ScanMethod::AllPhys);
        self.log(
            LogLevel::Info,
            TelemetryEvent::ModeStarted(Mode::EnvMon),
            format_args!("Environment monitor setup complete"),
        );
        Ok(())
    }

    pub(super) fn envmon_step(&mut self) -> StepResult {
        let now = self.clock.now();
        self.envmon.summarize(now);
        if self.abort_requested(Mode::EnvMon) {
            StepResult::Done
        } else {
            StepResult::Continue
        }
    }
}
