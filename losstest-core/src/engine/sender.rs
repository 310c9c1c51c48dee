//! Sender rounds.
//!
//! Each step runs one round on a group of channels: a countdown broadcast, a
//! burst of [`BURST_COUNT`] events, a report broadcast that waits for the
//! receivers' echoes, then a short hold. Channels that reached the target are
//! marked complete. Once every channel is complete the step finalizes and
//! reports done.

use core::time::Duration;

use super::{ChannelPhase, Interrupted, LossTest, StepResult};
use crate::adv::TargetStatus;
use crate::clock::{Barrier, Clock};
use crate::codec::Phase;
use crate::config::{AbortPredicate, BURST_COUNT, ChannelSet, StartParams};
use crate::phy::{CHANNEL_COUNT, Channel};
use crate::radio::{Radio, RadioError, ScanMethod, TargetId};
use crate::status::{PhyLabel, SenderLine};
use crate::telemetry::{LogLevel, LogSink, TelemetryEvent};
use crate::trigger::Mode;

const ONE_SECOND: Duration = Duration::from_secs(1);

/// Gap between the countdown and the first burst event.
const BURST_LEAD: Duration = Duration::from_millis(100);

/// Each half of the hold that ends a round; only the second half checks for abort.
const ROUND_HOLD: Duration = Duration::from_millis(500);

/// Channels that burst together: the 1M-primary group or the coded channel.
const PRIMARY_GROUP: [Channel; 3] = [Channel::Le2M, Channel::Le1M, Channel::Legacy];

#[derive(Clone, Debug, Default)]
pub(super) struct SenderState {
    sent: [u16; CHANNEL_COUNT],
    target: u16,
    acked: [bool; CHANNEL_COUNT],
    finalizing: [bool; CHANNEL_COUNT],
    phases: [ChannelPhase; CHANNEL_COUNT],
}

impl SenderState {
    /// Clears the finalize mark of `channel`, returning whether it was set.
    pub(super) fn take_finalizing(&mut self, channel: Channel) -> bool {
        core::mem::take(&mut self.finalizing[channel.index()])
    }

    fn set_phase(&mut self, channels: ChannelSet, phase: ChannelPhase) {
        for channel in channels.iter() {
            self.phases[channel.index()] = phase;
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
    /// Packets sent so far on `channel` and the per-channel target.
    #[must_use]
    pub fn sender_progress(&self, channel: Channel) -> (u16, u16) {
        (self.sender.sent[channel.index()], self.sender.target)
    }

    #[must_use]
    pub fn sender_phase(&self, channel: Channel) -> ChannelPhase {
        self.sender.phases[channel.index()]
    }

    /// `true` when a receiver echoed the last report on `channel`.
    #[must_use]
    pub fn sender_acked(&self, channel: Channel) -> bool {
        self.sender.acked[channel.index()]
    }

    /// Marks the echo of `channel`'s outgoing record as received.
    pub(super) fn record_ack(&mut self, channel: Channel) {
        let acked = &mut self.sender.acked[channel.index()];
        if !*acked {
            *acked = true;
            self.log(
                LogLevel::Info,
                TelemetryEvent::AckReceived(channel),
                format_args!("{channel} report acknowledged"),
            );
        }
    }

    pub(super) fn sender_setup(&mut self) -> Result<(), RadioError> {
        let config = self.config;
        for form in &mut self.forms {
            form.pre_count = Phase::ARMED_TAG;
            form.flow_count = 0;
        }
        self.sender = SenderState {
            target: config.target_count(),
            ..SenderState::default()
        };

        let node = self.node();
        self.log(
            LogLevel::Info,
            TelemetryEvent::ModeStarted(Mode::Sender),
            format_args!("Packet Loss Test (node {node:03}) **** SND SIDE ****"),
        );
        self.refresh_sender_board();

        let applied = self.set_tx_power()?;
        for channel in config.channels.iter() {
            self.push_channel(channel, config.burst_params(channel), None);
        }
        self.apply_channel_map(config.channels);
        self.scan_or_warn(ScanMethod::AllPhys);

        self.log(
            LogLevel::Info,
            TelemetryEvent::Note,
            format_args!("Sender setup complete (TX power: {applied} dBm)"),
        );
        Ok(())
    }

    pub(super) fn sender_step(&mut self) -> StepResult {
        let selection = self.burst_selection();
        let target = self.sender.target;
        if !selection
            .iter()
            .any(|channel| self.sender.sent[channel.index()] < target)
        {
            self.sender_finalize();
            return StepResult::Done;
        }

        match self.sender_round(selection) {
            Ok(()) => StepResult::Continue,
            Err(Interrupted) => {
                self.sender.set_phase(ChannelSet::ALL, ChannelPhase::Idle);
                self.sender_finalize();
                StepResult::Aborted
            }
        }
    }

    /// Channels that burst next: the 1M-primary group while it is not ahead of
    /// the coded channel, the coded channel otherwise.
    fn burst_selection(&self) -> ChannelSet {
        let enabled = self.config.channels;
        let progress = |channel: Channel| {
            if enabled.contains(channel) {
                self.sender.sent[channel.index()]
            } else {
                self.sender.target
            }
        };
        let primary = progress(Channel::Le2M).min(progress(Channel::Le1M));
        let group: &[Channel] = if primary <= progress(Channel::CodedS8) {
            &PRIMARY_GROUP
        } else {
            &[Channel::CodedS8]
        };

        let mut selection = ChannelSet::NONE;
        for &channel in group {
            selection.set(channel, enabled.contains(channel));
        }
        selection
    }

    fn sender_round(&mut self, selection: ChannelSet) -> Result<(), Interrupted> {
        let mut barrier = Barrier::at(self.clock.now());
        self.countdown(selection, &mut barrier)?;
        self.burst(selection, &mut barrier)?;
        self.report(selection, &mut barrier)?;
        self.complete_channels(selection);

        let hold = self.clock.now() + ROUND_HOLD;
        self.sleep_until(hold, None);
        self.sleep_until(hold + ROUND_HOLD, Some(Mode::Sender))
            .checked()?;
        Ok(())
    }

    fn set_pre_count(&mut self, selection: ChannelSet, tag: i16) {
        for channel in selection.iter() {
            self.forms[channel.index()].pre_count = tag;
        }
    }

    /// Broadcasts the seconds left before the burst, once per second.
    fn countdown(
        &mut self,
        selection: ChannelSet,
        barrier: &mut Barrier<C::Instant>,
    ) -> Result<(), Interrupted> {
        let mut remaining = i16::from(self.timing.countdown_secs);
        for channel in selection.iter() {
            self.forms[channel.index()].next_flow();
        }
        self.set_pre_count(selection, -remaining);
        self.sender.set_phase(selection, ChannelPhase::Countdown);

        while remaining > 0 {
            for channel in selection.iter() {
                let params = self.config.control_params(channel);
                self.push_channel(channel, params, Some(StartParams::CONTINUOUS));
            }
            let deadline = barrier.advance(ONE_SECOND);
            self.sleep_until(deadline, Some(Mode::Sender)).checked()?;
            remaining -= 1;
            self.set_pre_count(selection, -remaining);
        }
        Ok(())
    }

    /// Starts the bounded burst and waits until every selected target ran out
    /// of events or the burst period elapsed. The tag carries the seconds left.
    fn burst(
        &mut self,
        selection: ChannelSet,
        barrier: &mut Barrier<C::Instant>,
    ) -> Result<(), Interrupted> {
        self.stop_channel_targets();

        let period = self.config.burst_period();
        let mut seconds_left = i16::try_from(period.as_secs() + 1).unwrap_or(i16::MAX);
        self.set_pre_count(selection, seconds_left);

        let lead = barrier.advance(BURST_LEAD);
        self.sleep_until(lead, Some(Mode::Sender)).checked()?;

        for channel in selection.iter() {
            let params = self.config.burst_params(channel);
            self.push_channel(channel, params, Some(StartParams::BURST));
        }
        self.sender.set_phase(selection, ChannelPhase::Burst);
        let flow = selection
            .iter()
            .next()
            .map_or(0, |channel| self.forms[channel.index()].flow_count);
        self.log(
            LogLevel::Info,
            TelemetryEvent::BurstStarted,
            format_args!("Burst {flow} started ({} ms max)", period.as_millis()),
        );

        let deadline = barrier.advance(period);
        let mut next_tick = self.clock.now() + ONE_SECOND;
        self.wait_until(deadline, Some(Mode::Sender), |engine| {
            let finished = selection.iter().all(|channel| {
                engine.targets.status(TargetId::channel(channel)) != TargetStatus::Running
            });
            if finished {
                return true;
            }
            if engine.clock.now() >= next_tick {
                next_tick = next_tick + ONE_SECOND;
                seconds_left = seconds_left.saturating_sub(1).max(1);
                engine.set_pre_count(selection, seconds_left);
                for channel in selection.iter() {
                    engine.refresh_channel(channel);
                }
            }
            false
        })
        .checked()?;
        Ok(())
    }

    /// Publishes the report tag and the sender board, then waits for the
    /// receivers to echo the record back.
    fn report(
        &mut self,
        selection: ChannelSet,
        barrier: &mut Barrier<C::Instant>,
    ) -> Result<(), Interrupted> {
        self.sender.acked = [false; CHANNEL_COUNT];
        for channel in selection.iter() {
            let index = channel.index();
            self.forms[index].pre_count = Phase::REPORT_TAG;
            let params = self.config.control_params(channel);
            self.push_channel(channel, params, Some(StartParams::CONTINUOUS));
            self.sender.sent[index] = self.sender.sent[index].saturating_add(BURST_COUNT);
        }
        self.sender.set_phase(selection, ChannelPhase::Report);

        self.refresh_sender_board();
        self.push_status(None);
        for channel in selection.iter() {
            let line = self.sender_line(channel);
            self.log(
                LogLevel::Info,
                TelemetryEvent::ReportSent(channel),
                format_args!("{line}"),
            );
        }

        if !self.config.ignore_response {
            // Counted from the burst deadline, not from now.
            let deadline = barrier.advance(self.timing.report_window);
            let outcome = self.wait_until(deadline, Some(Mode::Sender), |engine| {
                selection
                    .iter()
                    .all(|channel| engine.sender.acked[channel.index()])
            });
            outcome.checked()?;
        }
        self.sender.set_phase(selection, ChannelPhase::Idle);
        Ok(())
    }

    fn complete_channels(&mut self, selection: ChannelSet) {
        let node = self.node();
        for channel in selection.iter() {
            let index = channel.index();
            if self.sender.sent[index] < self.sender.target {
                continue;
            }
            self.log(
                LogLevel::Info,
                TelemetryEvent::ChannelComplete(channel),
                format_args!("SND:{node} P:{} Complete", PhyLabel::of(channel)),
            );
            self.forms[index].pre_count = Phase::COMPLETE_TAG;
            self.push_channel(channel, None, Some(StartParams::CONTINUOUS));
        }
    }

    /// Broadcasts the complete tag on every enabled channel for a bounded time
    /// and republishes the board. Every abort ends here.
    pub(super) fn sender_finalize(&mut self) {
        let channels = self.config.channels;
        let start = StartParams::timed(self.timing.finalize_broadcast);
        for channel in channels.iter() {
            let index = channel.index();
            self.sender.finalizing[index] = true;
            self.forms[index].pre_count = Phase::COMPLETE_TAG;
            let params = self.config.control_params(channel);
            self.push_channel(channel, params, Some(start));
        }
        self.apply_channel_map(channels);
        self.push_status(None);
        self.log(
            LogLevel::Info,
            TelemetryEvent::Note,
            format_args!("Sender finalized"),
        );
    }

    fn sender_line(&self, channel: Channel) -> SenderLine {
        SenderLine {
            node: self.node(),
            channel,
            sent: self.sender.sent[channel.index()],
            target: if self.config.channels.contains(channel) {
                self.sender.target
            } else {
                0
            },
            tx_power: self.config.tx_power_dbm,
        }
    }

    fn refresh_sender_board(&mut self) {
        for channel in Channel::ALL {
            let line = self.sender_line(channel);
            self.board.set_sender(&line);
        }
    }
}
