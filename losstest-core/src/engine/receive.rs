//! Scan report dispatch and per-channel session tracking.
//!
//! Every report is classified into a logical channel first. What happens next
//! depends on the mode that owns the token: the scanner counts and tracks
//! sessions, the sender only looks for echoes of its own record, the monitors
//! feed their RSSI windows.

use super::LossTest;
use crate::clock::Clock;
use crate::codec::ad::{Verdict, parse_numcast_packet, parse_test_packet};
use crate::codec::{DeviceInfo, MAX_FLOW, Phase};
use crate::config::AbortPredicate;
use crate::phy::{Channel, classify};
use crate::radio::{Radio, ScanReport};
use crate::stats::{
    ReceptionRecord, RollingRssi, RssiTriple, SessionKey, RSSI_CEILING, sanitize_rssi,
};
use crate::status::SessionLine;
use crate::telemetry::{LogLevel, LogSink, TelemetryEvent};
use crate::trigger::Mode;

/// Flow counters above this belong to a finalize broadcast, not a round.
const FLOW_LIMIT: u16 = MAX_FLOW + 1;

/// Line the receive path logs after updating a channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SessionNote {
    /// Summary of the session in `summaries`, tagged with the event.
    Summary(TelemetryEvent),
    /// A sender appeared; carries the session as first seen.
    Sender(ReceptionRecord),
}

impl<R, C, A, L> LossTest<R, C, A, L>
where
    R: Radio,
    C: Clock,
    A: AbortPredicate,
    L: LogSink,
{
    /// Feeds one received advertisement to whichever mode owns the token.
    pub fn on_scan_report(&mut self, report: &ScanReport) {
        let Some(channel) = classify(report.primary, report.secondary) else {
            return;
        };
        let index = channel.index();
        let now = self.clock.now();

        if self.trigger.is_held_by(Mode::Scanner) {
            self.scanner.counters[index].increment();
        }
        if self.trigger.is_held_by(Mode::EnvMon) {
            self.envmon
                .record(channel, now, report.rssi.min(RSSI_CEILING));
        }
        if self.trigger.is_held_by(Mode::Numcast) {
            if let Ok(Verdict::Accepted(sighting)) =
                parse_numcast_packet(&report.payload, channel)
            {
                let rssi = sanitize_rssi(report.rssi);
                self.numcast.record(channel, now, &sighting, rssi);
                return;
            }
        }
        if self.trigger.is_held_by(Mode::Sender) || self.trigger.is_held_by(Mode::Scanner) {
            if let Ok(Verdict::Accepted(record)) = parse_test_packet(&report.payload) {
                self.receive_record(channel, report, &record);
            }
        }
    }

    /// Session tracking for one accepted test record.
    fn receive_record(&mut self, channel: Channel, report: &ScanReport, record: &DeviceInfo) {
        let index = channel.index();

        if self.trigger.is_held_by(Mode::Sender) {
            if self.forms[index] == *record {
                self.record_ack(channel);
            }
            return;
        }
        if !self.trigger.is_held_by(Mode::Scanner)
            || self.scanner.pending_reset
            || !self.config.channels.contains(channel)
        {
            return;
        }

        let rssi = sanitize_rssi(report.rssi);
        let key = SessionKey {
            node: record.node_id(),
            primary: report.primary,
            secondary: report.secondary,
            tx_power: report.tx_power,
        };
        let flow = record.flow_count;
        if flow > FLOW_LIMIT {
            return;
        }

        let mut fresh = RollingRssi::new(ReceptionRecord::for_session(key, flow));
        let mut note = None;
        let state = &mut self.scanner;

        let subtotal = match record.phase() {
            Phase::Armed => {
                fresh.record.detected_sender = true;
                if state.sessions[index].record.same_session(&key, flow) {
                    fresh.update(rssi);
                } else {
                    fresh.restart(rssi);
                    note = Some(SessionNote::Sender(fresh.record));
                }
                state.sessions[index] = fresh;
                state.summaries[index] = fresh.record;
                state.received[index] = 0;
                0
            }
            Phase::Burst(_) => {
                state.received[index] = state.received[index].saturating_add(1);
                state.tags[index] = record.pre_count;
                state.received[index]
            }
            Phase::Countdown(_) | Phase::Report | Phase::Complete => state.received[index],
        };

        if flow != 0 {
            let stored = state.sessions[index];
            if stored.record.key != key {
                fresh.restart(rssi);
                state.sessions[index] = fresh;
                note = Some(SessionNote::Sender(fresh.record));
            } else if stored.record.flow == flow {
                let mut current = stored;
                current.record.subtotal = subtotal;
                current.update(rssi);
                match record.phase() {
                    Phase::Complete if !current.record.complete => {
                        current.record.complete = true;
                        state.summaries[index] = current.record;
                    }
                    Phase::Report => {
                        state.tags[index] = Phase::REPORT_TAG;
                        state.echoes[index] = Some(*record);
                        if !current.record.dumped {
                            current.record.dumped = true;
                            note = Some(SessionNote::Summary(TelemetryEvent::SessionSummary(
                                channel,
                            )));
                        }
                        state.summaries[index] = current.record;
                    }
                    Phase::Countdown(_) => state.tags[index] = record.pre_count,
                    _ => {}
                }
                state.sessions[index] = current;
                state.rssi[index] = current.display();
            } else {
                // A new flow from the same sender closes the previous session.
                let mut closing = stored;
                closing.record.rssi = closing.mean();
                state.rssi[index] = closing.display();
                state.remote_tx_power[index] = closing.record.key.tx_power;
                if !closing.record.dumped {
                    closing.record.dumped = true;
                    state.summaries[index] = closing.record;
                    note = Some(SessionNote::Summary(TelemetryEvent::NewFlow(channel)));
                }
                fresh.restart(rssi);
                state.sessions[index] = fresh;
            }
        }

        match note {
            Some(SessionNote::Summary(event)) => self.log_session_summary(channel, event),
            Some(SessionNote::Sender(first)) => {
                let line = SessionLine::from_record(
                    &first,
                    subtotal,
                    RssiTriple {
                        current: first.rssi,
                        min: first.rssi_lower,
                        max: first.rssi_upper,
                    },
                );
                self.log(
                    LogLevel::Info,
                    TelemetryEvent::NewSender(channel),
                    format_args!("{}", line.labeled("SENDER")),
                );
            }
            None => {}
        }
    }

    pub(super) fn session_line(&self, channel: Channel) -> SessionLine {
        let index = channel.index();
        let state = &self.scanner;
        let mut line = SessionLine::from_record(
            &state.summaries[index],
            state.received[index],
            state.rssi[index],
        );
        line.tx_power = state.remote_tx_power[index];
        line
    }

    fn log_session_summary(&mut self, channel: Channel, event: TelemetryEvent) {
        let line = self.session_line(channel);
        self.log(
            LogLevel::Info,
            event,
            format_args!("{}", line.labeled("RCV")),
        );
    }
}
