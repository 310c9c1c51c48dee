//! Scanner rounds.
//!
//! The scanner follows the phase tags it has heard. Between rounds it listens
//! on every PHY; once a countdown or burst tag shows up on an enabled channel
//! it narrows the scan to that channel's primary PHY and opens a listen window
//! long enough for the countdown plus a full burst. Inside the window it
//! echoes each report record back to the sender. Reception counts and RSSI are
//! tracked by the receive path while the window is open.

use core::time::Duration;

use super::{ChannelPhase, LossTest, StepResult, WaitOutcome};
use crate::clock::Clock;
use crate::codec::payload::response_payload;
use crate::codec::{DeviceInfo, Phase};
use crate::config::{AbortPredicate, ChannelSet, StartParams};
use crate::phy::{CHANNEL_COUNT, Channel};
use crate::radio::{Radio, RadioError, ScanMethod, TargetId};
use crate::stats::{ChannelCounters, ReceptionRecord, RollingRssi, RssiTriple, TX_POWER_UNKNOWN};
use crate::telemetry::{LogLevel, LogSink, TelemetryEvent, TelemetryInstant};
use crate::trigger::Mode;

/// Start bound for an echoed report record.
const ECHO_BROADCAST: Duration = Duration::from_secs(1);

/// Slack added to the listen period when scanning every PHY.
const ALL_PHY_SLACK: Duration = Duration::from_secs(3);

/// Listen periods allowed without activity during the first round.
const FIRST_ROUND_PERIODS: u32 = 5;

pub(super) struct ScannerState<I> {
    /// Counters and sessions are cleared on the next step.
    pub(super) pending_reset: bool,
    round_method: ScanMethod,
    first_round: bool,
    heartbeat: Option<I>,
    complete_since: Option<I>,
    /// Last phase tag heard per channel.
    pub(super) tags: [i16; CHANNEL_COUNT],
    pub(super) sessions: [RollingRssi; CHANNEL_COUNT],
    /// Snapshot shown on the board and in the RCV lines.
    pub(super) summaries: [ReceptionRecord; CHANNEL_COUNT],
    pub(super) received: [u16; CHANNEL_COUNT],
    pub(super) echoes: [Option<DeviceInfo>; CHANNEL_COUNT],
    pub(super) rssi: [RssiTriple; CHANNEL_COUNT],
    pub(super) remote_tx_power: [i8; CHANNEL_COUNT],
    pub(super) counters: ChannelCounters,
    phases: [ChannelPhase; CHANNEL_COUNT],
}

impl<I> ScannerState<I> {
    pub(super) fn new() -> Self {
        Self {
            pending_reset: false,
            round_method: ScanMethod::AllPhys,
            first_round: true,
            heartbeat: None,
            complete_since: None,
            tags: [0; CHANNEL_COUNT],
            sessions: [RollingRssi::default(); CHANNEL_COUNT],
            summaries: [ReceptionRecord::default(); CHANNEL_COUNT],
            received: [0; CHANNEL_COUNT],
            echoes: [None; CHANNEL_COUNT],
            rssi: [RssiTriple::default(); CHANNEL_COUNT],
            remote_tx_power: [TX_POWER_UNKNOWN; CHANNEL_COUNT],
            counters: ChannelCounters::default(),
            phases: [ChannelPhase::Idle; CHANNEL_COUNT],
        }
    }
}

/// What the heard tags ask the scanner to do next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum NextListen {
    /// Open a window on `method`, extended by the countdown still to run.
    Window { method: ScanMethod, lead: Duration },
    /// A tag is present but calls for no window yet.
    Hold,
    /// No countdown or burst tag on any enabled channel.
    Quiet,
}

/// Filter that hears `channel`'s primary PHY.
const fn method_for(channel: Channel) -> ScanMethod {
    match channel {
        Channel::CodedS8 => ScanMethod::Coded,
        Channel::Le2M | Channel::Le1M | Channel::Legacy => ScanMethod::OneM,
    }
}

/// Channels a window on `method` tracks.
fn window_channels(method: ScanMethod) -> ChannelSet {
    match method {
        ScanMethod::Coded => ChannelSet::only(Channel::CodedS8),
        ScanMethod::OneM => ChannelSet::ALL.with(Channel::CodedS8, false),
        ScanMethod::AllPhys | ScanMethod::Relaxed => ChannelSet::ALL,
    }
}

impl<R, C, A, L> LossTest<R, C, A, L>
where
    R: Radio,
    C: Clock,
    A: AbortPredicate,
    L: LogSink,
{
    #[must_use]
    pub fn scanner_phase(&self, channel: Channel) -> ChannelPhase {
        self.scanner.phases[channel.index()]
    }

    /// Session snapshot for `channel` as shown on the board.
    #[must_use]
    pub fn reception(&self, channel: Channel) -> &ReceptionRecord {
        &self.scanner.summaries[channel.index()]
    }

    /// Test packets counted on `channel` during the current round.
    #[must_use]
    pub fn received(&self, channel: Channel) -> u16 {
        self.scanner.received[channel.index()]
    }

    /// Raw reports heard on `channel` while scanning.
    #[must_use]
    pub fn receive_counter(&self, channel: Channel) -> u32 {
        self.scanner.counters[channel.index()].get()
    }

    /// Last phase tag heard on `channel`.
    #[must_use]
    pub fn heard_tag(&self, channel: Channel) -> i16 {
        self.scanner.tags[channel.index()]
    }

    pub(super) fn scanner_setup(&mut self) -> Result<(), RadioError> {
        let channels = self.config.channels;
        let state = &mut self.scanner;
        state.counters = ChannelCounters::default();
        state.summaries = [ReceptionRecord::default(); CHANNEL_COUNT];
        state.received = [0; CHANNEL_COUNT];
        state.tags = [0; CHANNEL_COUNT];
        state.echoes = [None; CHANNEL_COUNT];
        state.phases = [ChannelPhase::Idle; CHANNEL_COUNT];
        state.heartbeat = None;
        state.complete_since = None;
        state.pending_reset = true;

        let node = self.node();
        self.log(
            LogLevel::Info,
            TelemetryEvent::ModeStarted(Mode::Scanner),
            format_args!("Packet Loss Test (node {node:03}) **** RCV SIDE ****"),
        );
        self.refresh_scanner_board();

        self.set_tx_power()?;
        self.apply_channel_map(channels);
        self.set_scan(ScanMethod::AllPhys).inspect_err(|error| {
            let error = *error;
            self.log(
                LogLevel::Warn,
                TelemetryEvent::RadioFault(error),
                format_args!("scan start failed: {error}"),
            );
        })?;

        self.log(
            LogLevel::Info,
            TelemetryEvent::Note,
            format_args!("Scanner setup complete"),
        );
        Ok(())
    }

    /// First step after setup: clear the sessions and pick the round's filter.
    fn begin_listening(&mut self) {
        let channels = self.config.channels;
        let state = &mut self.scanner;
        state.pending_reset = false;
        state.sessions = [RollingRssi::default(); CHANNEL_COUNT];
        state.rssi = [RssiTriple::default(); CHANNEL_COUNT];
        state.remote_tx_power = [TX_POWER_UNKNOWN; CHANNEL_COUNT];
        state.counters = ChannelCounters::default();
        let coded = channels.contains(Channel::CodedS8);
        let others = channels.iter().any(|channel| channel != Channel::CodedS8);
        state.round_method = match (coded, others) {
            (true, true) => ScanMethod::AllPhys,
            (true, false) => ScanMethod::Coded,
            (false, _) => ScanMethod::OneM,
        };
        state.first_round = true;
    }

    /// Longest a listen window lasts, not counting the countdown.
    fn listen_period(&self) -> Duration {
        let burst = self.config.burst_period();
        if self.scanner.round_method == ScanMethod::AllPhys {
            burst + ALL_PHY_SLACK
        } else {
            burst * 2
        }
    }

    /// Filter used between windows.
    fn idle_method(&self) -> ScanMethod {
        match self.scanner.round_method {
            ScanMethod::Coded => ScanMethod::AllPhys,
            method => method,
        }
    }

    pub(super) fn scanner_step(&mut self) -> StepResult {
        if self.scanner.pending_reset {
            self.begin_listening();
        }
        let idle = self.idle_method();
        self.scan_or_warn(idle);
        let period = self.listen_period();

        if self.heartbeat_expired(period) {
            self.scanner.heartbeat = None;
            self.stop_scan();
            return StepResult::Aborted;
        }

        self.stop_channel_targets();

        let (method, lead) = match self.next_listen() {
            NextListen::Window { method, lead } => (method, lead),
            NextListen::Hold => return StepResult::Continue,
            NextListen::Quiet => {
                return if self.sessions_complete() {
                    self.scanner.heartbeat = None;
                    self.stop_scan();
                    StepResult::Done
                } else {
                    StepResult::Continue
                };
            }
        };
        self.scanner.first_round = false;

        if self.scanner.tags.iter().all(|tag| *tag == Phase::COMPLETE_TAG) {
            let now = self.clock.now();
            match self.scanner.complete_since {
                None => self.scanner.complete_since = Some(now),
                Some(since) if now.saturating_duration_since(since) > self.timing.completion_hold => {
                    self.log(
                        LogLevel::Info,
                        TelemetryEvent::Note,
                        format_args!("RCV_Task completed"),
                    );
                    self.stop_scan();
                    return StepResult::Done;
                }
                Some(_) => {}
            }
        } else {
            self.scanner.complete_since = None;
        }

        self.stop_target(TargetId::STATUS);
        let deadline = self.clock.now() + period + lead;
        self.scan_or_warn(method);

        let aborted = self.listen_window(method, deadline);
        let result = if aborted {
            StepResult::Aborted
        } else {
            StepResult::Continue
        };

        self.refresh_scanner_board();
        self.push_status(Some(StartParams::CONTINUOUS));
        let resume = if result == StepResult::Continue {
            idle
        } else {
            ScanMethod::AllPhys
        };
        self.scan_or_warn(resume);
        result
    }

    /// `true` once the scanner heard nothing worth a window for too long, or
    /// an abort was requested. The first call only arms the stamp.
    fn heartbeat_expired(&mut self, period: Duration) -> bool {
        let now = self.clock.now();
        let Some(stamp) = self.scanner.heartbeat else {
            self.scanner.heartbeat = Some(now);
            return false;
        };
        if self.abort_requested(Mode::Scanner) {
            return true;
        }
        let silent = now.saturating_duration_since(stamp);
        let limit = if self.scanner.round_method == ScanMethod::AllPhys {
            self.timing.heartbeat
        } else {
            self.timing.heartbeat_restricted
        };
        let periods = if self.scanner.first_round {
            FIRST_ROUND_PERIODS
        } else {
            1
        };
        silent > limit || silent > period * periods
    }

    /// Picks the next window from the heard tags. Countdown tags win over
    /// burst tags; within each kind the first enabled channel in channel order
    /// decides, even when its tag calls for no window.
    fn next_listen(&self) -> NextListen {
        let enabled = self.config.channels;
        let tags = &self.scanner.tags;

        let countdown = Channel::ALL
            .into_iter()
            .find(|channel| enabled.contains(*channel) && tags[channel.index()] < 0);
        if let Some(channel) = countdown {
            let tag = tags[channel.index()];
            if tag == Phase::ARMED_TAG {
                return NextListen::Hold;
            }
            let seconds = u64::from(tag.unsigned_abs());
            return NextListen::Window {
                method: method_for(channel),
                lead: Duration::from_secs(seconds),
            };
        }

        let burst = Channel::ALL
            .into_iter()
            .find(|channel| enabled.contains(*channel) && tags[channel.index()] > 0);
        match burst {
            Some(channel) if tags[channel.index()] == Phase::COMPLETE_TAG => NextListen::Hold,
            Some(channel) => NextListen::Window {
                method: method_for(channel),
                lead: Duration::ZERO,
            },
            None => NextListen::Quiet,
        }
    }

    /// `true` when some session has a flow and every session with a flow is complete.
    fn sessions_complete(&self) -> bool {
        let summaries = &self.scanner.summaries;
        summaries.iter().any(|record| record.flow != 0)
            && summaries
                .iter()
                .all(|record| record.complete || record.flow == 0)
    }

    /// Tracks the channels `method` hears until `deadline`, echoing report
    /// records as they arrive. Returns `true` when the window ended on an
    /// abort or on a completed session.
    fn listen_window(&mut self, method: ScanMethod, deadline: C::Instant) -> bool {
        let tracked = window_channels(method);
        let mut marked = [false; CHANNEL_COUNT];
        let mut quiet_until: Option<C::Instant> = None;
        let mut finished = false;

        let outcome = self.wait_until(deadline, Some(Mode::Scanner), |engine| {
            for channel in Channel::ALL {
                let index = channel.index();
                if !tracked.contains(channel) {
                    engine.scanner.phases[index] = ChannelPhase::Idle;
                    continue;
                }
                let tag = engine.scanner.tags[index];
                if tag < 0 && tag != Phase::ARMED_TAG {
                    marked[index] = true;
                    engine.scanner.phases[index] = ChannelPhase::Countdown;
                } else if tag > 0 {
                    marked[index] = true;
                    engine.scanner.phases[index] = ChannelPhase::Burst;
                } else if tag == Phase::REPORT_TAG && marked[index] {
                    engine.scanner.phases[index] = ChannelPhase::Report;
                }
            }

            for channel in Channel::ALL {
                let index = channel.index();
                if !marked[index] {
                    continue;
                }
                if engine.scanner.summaries[index].complete {
                    finished = true;
                    return true;
                }
                if engine.scanner.tags[index] == Phase::REPORT_TAG {
                    if !engine.config.ignore_response {
                        engine.echo_report(channel);
                    }
                    engine.scanner.phases[index] = ChannelPhase::Idle;
                    marked[index] = false;
                }
            }

            if marked.iter().any(|mark| *mark) {
                return false;
            }
            let now = engine.clock.now();
            match quiet_until {
                None => {
                    quiet_until = Some(now + engine.timing.idle_exit);
                    false
                }
                Some(until) => now > until,
            }
        });

        for (tag, mark) in self.scanner.tags.iter_mut().zip(marked) {
            if mark {
                *tag = Phase::REPORT_TAG;
            }
        }
        self.scanner.phases = [ChannelPhase::Idle; CHANNEL_COUNT];
        self.scanner.heartbeat = None;
        finished || outcome == WaitOutcome::Aborted
    }

    /// Re-broadcasts the last report record heard on `channel` for a second.
    fn echo_report(&mut self, channel: Channel) {
        let Some(echo) = self.scanner.echoes[channel.index()] else {
            return;
        };
        match response_payload(&echo) {
            Ok(data) => {
                let params = self.config.control_params(channel);
                let start = StartParams::timed(ECHO_BROADCAST);
                self.push_data(TargetId::channel(channel), params, &data, Some(start));
            }
            Err(error) => self.log(
                LogLevel::Warn,
                TelemetryEvent::Note,
                format_args!("{channel} echo payload: {error}"),
            ),
        }
    }

    fn refresh_scanner_board(&mut self) {
        for channel in Channel::ALL {
            let line = self.session_line(channel);
            self.board.set_session(channel, &line);
        }
    }
}
