//! Status ("peek") board.
//!
//! Four per-channel lines broadcast together on the status target. Each line is
//! stored with the `0xFF 0xFF` manufacturer prefix so it can be dropped into a
//! manufacturer-data element unchanged. [`SenderLine`] and [`SessionLine`]
//! keep the textual rendering consistent between the board and the log.

use core::fmt;

use heapless::Vec;

use crate::config::BURST_COUNT;
use crate::phy::{CHANNEL_COUNT, Channel, primary_phy_name, secondary_phy_name};
use crate::stats::{ReceptionRecord, RssiTriple, TX_POWER_UNKNOWN};

/// Manufacturer prefix carried by every status line.
pub const STATUS_PREFIX: [u8; 2] = [0xFF, 0xFF];

pub const STATUS_LINE_CAPACITY: usize = 64;

pub type StatusLine = Vec<u8, STATUS_LINE_CAPACITY>;

/// RSSI that renders empty outside `(-128, 127)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RssiText(pub i16);

impl fmt::Display for RssiText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= i16::from(i8::MAX) || self.0 <= i16::from(i8::MIN) {
            Ok(())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// TX power that renders empty when unknown.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxPowerText(pub i8);

impl fmt::Display for TxPowerText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == TX_POWER_UNKNOWN {
            Ok(())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// PHY pair as printed after `P:`; the legacy pair prints as `BLEv4`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhyLabel {
    pub primary: u8,
    pub secondary: u8,
}

impl PhyLabel {
    #[must_use]
    pub const fn of(channel: Channel) -> Self {
        let (primary, secondary) = channel.phy_pair();
        Self { primary, secondary }
    }
}

impl fmt::Display for PhyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if crate::phy::classify(self.primary, self.secondary) == Some(Channel::Legacy) {
            f.write_str("BLEv4")
        } else {
            write!(
                f,
                "{}/{}",
                primary_phy_name(self.primary),
                secondary_phy_name(self.secondary)
            )
        }
    }
}

/// Sender progress for one channel (e.g. `SND:007 P:1M/2M R:250/500 T:0`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SenderLine {
    pub node: u8,
    pub channel: Channel,
    pub sent: u16,
    /// Zero for a disabled channel.
    pub target: u16,
    pub tx_power: i8,
}

impl SenderLine {
    pub fn write_line<W: fmt::Write + ?Sized>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "SND:{:03} P:{} R:{}/{} T:{}",
            self.node,
            PhyLabel::of(self.channel),
            self.sent,
            self.target,
            self.tx_power
        )
    }
}

impl fmt::Display for SenderLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_line(f)
    }
}

/// Reception summary for one channel session.
///
/// Rendered with the `RCV` label on the board and in session summaries, and
/// with `SENDER` when a new sender shows up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionLine {
    pub node: u16,
    pub primary: u8,
    pub secondary: u8,
    pub received: u16,
    pub flow: u16,
    pub rssi: RssiTriple,
    pub tx_power: i8,
}

impl SessionLine {
    #[must_use]
    pub fn from_record(record: &ReceptionRecord, received: u16, rssi: RssiTriple) -> Self {
        Self {
            node: record.key.node,
            primary: record.key.primary,
            secondary: record.key.secondary,
            received,
            flow: record.flow,
            rssi,
            tx_power: record.key.tx_power,
        }
    }

    /// Packets the sender has announced so far: one burst per flow.
    #[must_use]
    pub fn expected(&self) -> u32 {
        u32::from(self.flow) * u32::from(BURST_COUNT)
    }

    pub fn write_line<W: fmt::Write + ?Sized>(&self, writer: &mut W, label: &str) -> fmt::Result {
        let [node, _] = self.node.to_le_bytes();
        let phys = PhyLabel {
            primary: self.primary,
            secondary: self.secondary,
        };
        write!(
            writer,
            "{label}:{node:03} P:{phys} R:{}/{} S:{}({}..{}) T:{}",
            self.received,
            self.expected(),
            RssiText(self.rssi.current),
            RssiText(self.rssi.min),
            RssiText(self.rssi.max),
            TxPowerText(self.tx_power)
        )
    }

    /// Display adapter that renders the line under `label`.
    #[must_use]
    pub fn labeled<'a>(&'a self, label: &'a str) -> impl fmt::Display + 'a {
        Labeled { line: self, label }
    }
}

struct Labeled<'a> {
    line: &'a SessionLine,
    label: &'a str,
}

impl fmt::Display for Labeled<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.write_line(f, self.label)
    }
}

struct LineWriter<'a>(&'a mut StatusLine);

impl fmt::Write for LineWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0
            .extend_from_slice(s.as_bytes())
            .map_err(|_| fmt::Error)
    }
}

/// The four status lines, one per logical channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusBoard {
    lines: [StatusLine; CHANNEL_COUNT],
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        let mut blank = StatusLine::new();
        let _ = blank.extend_from_slice(&STATUS_PREFIX);
        Self {
            lines: [blank.clone(), blank.clone(), blank.clone(), blank],
        }
    }

    /// Replaces the line for `channel` with whatever `render` writes.
    ///
    /// A line that does not fit keeps the part that did.
    pub fn set<F>(&mut self, channel: Channel, render: F)
    where
        F: FnOnce(&mut dyn fmt::Write) -> fmt::Result,
    {
        let line = &mut self.lines[channel.index()];
        line.clear();
        let _ = line.extend_from_slice(&STATUS_PREFIX);
        let _ = render(&mut LineWriter(line));
    }

    pub fn set_sender(&mut self, line: &SenderLine) {
        self.set(line.channel, |writer| line.write_line(writer));
    }

    pub fn set_session(&mut self, channel: Channel, line: &SessionLine) {
        self.set(channel, |writer| line.write_line(writer, "RCV"));
    }

    /// Line text without the prefix.
    #[must_use]
    pub fn text(&self, channel: Channel) -> &str {
        let raw = &self.lines[channel.index()];
        core::str::from_utf8(&raw[STATUS_PREFIX.len()..]).unwrap_or("")
    }

    /// Line bytes including the prefix.
    #[must_use]
    pub fn raw(&self, channel: Channel) -> &[u8] {
        &self.lines[channel.index()]
    }

    /// Every line with its prefix, in channel order.
    pub fn raw_lines(&self) -> impl Iterator<Item = &[u8]> {
        self.lines.iter().map(|line| line.as_slice())
    }
}
