//! Engine log catalog and the bounded ring the engine records into.
//!
//! The engine never prints. Every banner, session summary and warning becomes a
//! [`TelemetryRecord`] carrying a typed [`TelemetryEvent`] and the rendered
//! text line. Hosts drain the ring with [`TelemetryRecorder::since`] or attach a
//! [`LogSink`] to see lines as they are produced. With the `defmt` feature every
//! record is mirrored through `defmt` as well.

use core::fmt::{self, Write as _};
use core::time::Duration;

use heapless::{HistoryBuf, OldestOrdered, String};

use crate::phy::Channel;
use crate::radio::RadioError;
use crate::trigger::Mode;

/// Identifier assigned to each record. Wraps.
pub type EventId = u32;

/// Capacity of a rendered line.
pub const MAX_LINE_LEN: usize = 96;

/// Records retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

pub type LogLine = String<MAX_LINE_LEN>;

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogLevel {
    Info,
    Warn,
}

/// What a record is about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEvent {
    ModeStarted(Mode),
    ModeFinished(Mode),
    BurstStarted,
    /// Post-burst status lines published.
    ReportSent(Channel),
    AckReceived(Channel),
    ChannelComplete(Channel),
    NewSender(Channel),
    NewFlow(Channel),
    SessionSummary(Channel),
    ChannelMapFallback,
    RadioFault(RadioError),
    Note,
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::ModeStarted(mode) => write!(f, "mode-started {mode}"),
            TelemetryEvent::ModeFinished(mode) => write!(f, "mode-finished {mode}"),
            TelemetryEvent::BurstStarted => f.write_str("burst-started"),
            TelemetryEvent::ReportSent(channel) => write!(f, "report-sent {channel}"),
            TelemetryEvent::AckReceived(channel) => write!(f, "ack-received {channel}"),
            TelemetryEvent::ChannelComplete(channel) => write!(f, "channel-complete {channel}"),
            TelemetryEvent::NewSender(channel) => write!(f, "new-sender {channel}"),
            TelemetryEvent::NewFlow(channel) => write!(f, "new-flow {channel}"),
            TelemetryEvent::SessionSummary(channel) => write!(f, "session-summary {channel}"),
            TelemetryEvent::ChannelMapFallback => f.write_str("channel-map-fallback"),
            TelemetryEvent::RadioFault(error) => write!(f, "radio-fault {error}"),
            TelemetryEvent::Note => f.write_str("note"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub level: LogLevel,
    pub event: TelemetryEvent,
    pub line: LogLine,
}

/// Receives every record as it is produced.
pub trait LogSink {
    fn emit(&mut self, level: LogLevel, event: TelemetryEvent, line: &str);
}

/// Sink that drops everything; the ring still keeps the history.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn emit(&mut self, _: LogLevel, _: TelemetryEvent, _: &str) {}
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records engine log lines into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Records newer than `after`, oldest first.
    pub fn since(&self, after: EventId) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered().filter(move |record| {
            let ahead = record.id.wrapping_sub(after);
            ahead != 0 && ahead < EventId::MAX / 2
        })
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Renders `args` and records it. A fragment that would overflow
    /// [`MAX_LINE_LEN`] is dropped.
    pub fn record(
        &mut self,
        level: LogLevel,
        event: TelemetryEvent,
        args: fmt::Arguments<'_>,
        timestamp: TInstant,
    ) -> EventId {
        let mut line = LogLine::new();
        let _ = line.write_fmt(args);

        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        #[cfg(feature = "defmt")]
        match level {
            LogLevel::Info => defmt::info!("{=str}", line.as_str()),
            LogLevel::Warn => defmt::warn!("{=str}", line.as_str()),
        }

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            level,
            event,
            line,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
