//! Number-cast mode: broadcast a 64-bit value on every enabled channel and
//! track what other nodes broadcast.

use core::time::Duration;

use super::{LossTest, StepResult};
use crate::clock::{Clock, EngineInstant};
use crate::codec::NumcastInfo;
use crate::codec::ad::NumcastSighting;
use crate::codec::payload::numcast_payload;
use crate::config::{AbortPredicate, StartParams};
use crate::phy::{CHANNEL_COUNT, Channel};
use crate::radio::{Radio, RadioError, ScanMethod, TargetId};
use crate::stats::{RssiSummary, RssiWindow};
use crate::telemetry::{LogLevel, LogSink, TelemetryEvent};
use crate::trigger::Mode;

/// Samples kept for the received-RSSI summary.
const NUMCAST_WINDOW: usize = 32;

/// How long a channel counts as live after its last sighting.
const SIGHTING_LIFETIME: Duration = Duration::from_secs(5);

/// What the host sees of number-cast.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NumcastSnapshot {
    /// Value being broadcast.
    pub broadcasting: u64,
    pub auto: bool,
    /// Last value heard, if any.
    pub received: Option<u64>,
    /// Low 16 bits of the identifier of the node last heard.
    pub source: Option<u16>,
    pub rssi: RssiSummary,
    /// Channels heard within the last few seconds.
    pub live: [bool; CHANNEL_COUNT],
}

pub(super) struct NumcastState<I> {
    /// Host-requested value and mode.
    local: NumcastInfo,
    auto: bool,
    /// What is on air right now.
    broadcasting: u64,
    broadcasting_auto: bool,
    received: Option<u64>,
    source: Option<u16>,
    seen_until: [Option<I>; CHANNEL_COUNT],
    window: RssiWindow<I, NUMCAST_WINDOW>,
    summary: RssiSummary,
    summarized_at: Option<I>,
}

impl<I> NumcastState<I>
where
    I: EngineInstant,
{
    pub(super) fn new(sample_lifetime: Duration) -> Self {
        Self {
            local: NumcastInfo::from_values([0; 4]),
            auto: false,
            broadcasting: 0,
            broadcasting_auto: false,
            received: None,
            source: None,
            seen_until: [None; CHANNEL_COUNT],
            window: RssiWindow::new(sample_lifetime),
            summary: RssiSummary::default(),
            summarized_at: None,
        }
    }

    pub(super) fn reset_local(&mut self, address: &[u8; 8]) {
        self.local = NumcastInfo::from_address(address);
    }

    pub(super) fn record(
        &mut self,
        channel: Channel,
        now: I,
        sighting: &NumcastSighting,
        rssi: i8,
    ) {
        self.received = Some(sighting.value);
        self.source = Some(sighting.info.node_id());
        self.seen_until[channel.index()] = Some(now + SIGHTING_LIFETIME);
        self.window.push(now, rssi);
    }

    /// Recomputes the summary unless it was refreshed within `period`.
    fn summarize(&mut self, now: I, period: Duration) {
        let fresh = self
            .summarized_at
            .is_some_and(|at| now.saturating_duration_since(at) < period);
        if !fresh {
            self.summarized_at = Some(now);
            self.summary = self.window.summary(now);
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
    /// Sets the value to broadcast; takes effect on the next number-cast step.
    pub fn set_numcast_value(&mut self, value: u64) {
        self.numcast.local = NumcastInfo::from_value(value);
    }

    /// Continuous broadcast when set, a short burst per change otherwise.
    pub fn set_numcast_auto(&mut self, auto: bool) {
        self.numcast.auto = auto;
    }

    #[must_use]
    pub fn numcast(&self) -> NumcastSnapshot {
        let state = &self.numcast;
        let now = self.clock.now();
        let mut live = [false; CHANNEL_COUNT];
        for (slot, until) in live.iter_mut().zip(state.seen_until) {
            *slot = until.is_some_and(|until| now < until);
        }
        NumcastSnapshot {
            broadcasting: state.broadcasting,
            auto: state.broadcasting_auto,
            received: state.received,
            source: state.source,
            rssi: state.summary,
            live,
        }
    }

    pub(super) fn numcast_setup(&mut self) -> Result<(), RadioError> {
        self.numcast.broadcasting = self.numcast.local.value();
        self.set_tx_power()?;
        self.apply_channel_map(self.config.channels);
        self.stop_all_targets();

        let channels = self.config.channels;
        let coded = channels.contains(Channel::CodedS8);
        let others = channels.iter().any(|channel| channel != Channel::CodedS8);
        let method = match (coded, others) {
            (true, true) => ScanMethod::AllPhys,
            (true, false) => ScanMethod::Coded,
            (false, _) => ScanMethod::OneM,
        };
        self.scan_or_warn(method);

        let state = &mut self.numcast;
        state.received = None;
        state.source = None;
        state.auto = false;
        state.broadcasting_auto = false;
        self.log(
            LogLevel::Info,
            TelemetryEvent::ModeStarted(Mode::Numcast),
            format_args!("Number cast setup complete (scan method: {method:?})"),
        );
        Ok(())
    }

    pub(super) fn numcast_step(&mut self) -> StepResult {
        if self.abort_requested(Mode::Numcast) {
            self.numcast.broadcasting_auto = false;
            self.numcast.received = None;
            self.stop_channel_targets();
            self.scan_or_warn(ScanMethod::AllPhys);
            return StepResult::Done;
        }

        let wanted = self.numcast.local.value();
        if wanted != self.numcast.broadcasting || self.numcast.auto != self.numcast.broadcasting_auto
        {
            self.numcast.broadcasting = wanted;
            self.numcast.broadcasting_auto = self.numcast.auto;
            self.broadcast_numcast();
        }

        let now = self.clock.now();
        let period = self.timing.numcast_recalc_period;
        self.numcast.summarize(now, period);
        StepResult::Continue
    }

    fn broadcast_numcast(&mut self) {
        let start = if self.numcast.broadcasting_auto {
            StartParams::CONTINUOUS
        } else {
            StartParams::events(self.timing.numcast_manual_events)
        };
        let value = NumcastInfo::from_value(self.numcast.broadcasting);
        for channel in Channel::ALL {
            let target = TargetId::channel(channel);
            self.stop_target(target);
            if !self.config.channels.contains(channel) {
                continue;
            }
            let record = self.forms[channel.index()];
            match numcast_payload(channel, &record, &value) {
                Ok(data) => {
                    let params = self.config.burst_params(channel);
                    self.push_data(target, params, &data, Some(start));
                }
                Err(error) => self.log(
                    LogLevel::Warn,
                    TelemetryEvent::Note,
                    format_args!("{channel} number-cast payload: {error}"),
                ),
            }
        }
        self.apply_channel_map(self.config.channels);
        let broadcasting = self.numcast.broadcasting;
        let broadcasting_auto = self.numcast.broadcasting_auto;
        self.log(
            LogLevel::Info,
            TelemetryEvent::Note,
            format_args!(
                "Number cast {} ({})",
                broadcasting,
                if broadcasting_auto {
                    "auto"
                } else {
                    "manual"
                }
            ),
        );
    }
}
