//! Wire records carried inside manufacturer-specific advertising data.
//!
//! Three fixed layouts share the `0xFFFF` manufacturer id and form id `0`:
//!
//! * [`DeviceInfo`] (16 bytes): the per-channel test record. Little-endian
//!   except for the node identifier, which is big-endian on air.
//! * [`Bt4Record`] (26 bytes): the device-info record plus a 10-byte tail for
//!   legacy advertising, holding either name bytes or a number-cast value.
//! * [`NumcastInfo`] (12 bytes): four small values derived from the node
//!   address, broadcast by the number-cast mode.
//!
//! Decoding goes through `winnow` binary parsers; encoding writes fixed arrays.

pub mod ad;
pub mod payload;

use core::fmt;

use winnow::binary::{be_u64, le_i16, le_u16, le_u64};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

/// Manufacturer id stamped on every test record.
pub const MANUFACTURER_ID: u16 = 0xFFFF;
/// Form id stamped on every test record.
pub const FORM_ID: u16 = 0x0000;
/// Encoded size of [`DeviceInfo`].
pub const DEVICE_INFO_LEN: usize = 16;
/// Size of the legacy tail appended to a device-info record.
pub const BT4_TAIL_LEN: usize = 10;
/// Encoded size of [`Bt4Record`].
pub const BT4_RECORD_LEN: usize = DEVICE_INFO_LEN + BT4_TAIL_LEN;
/// Encoded size of [`NumcastInfo`].
pub const NUMCAST_INFO_LEN: usize = 12;
/// Leading tail bytes marking a number-cast value instead of a name.
pub const NUMCAST_SENTINEL: u16 = 0xFFFF;

/// Highest flow counter a sender uses before wrapping back to 1.
pub const MAX_FLOW: u16 = 200;

type DecodeResult<T> = Result<T, ErrMode<ContextError>>;

/// Errors raised while encoding or decoding wire records.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Input shorter than the fixed record layout.
    Truncated { needed: usize, found: usize },
    /// Output buffer has no room for the element.
    Overflow,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated { needed, found } => {
                write!(f, "record needs {needed} bytes, found {found}")
            }
            CodecError::Overflow => f.write_str("advertising payload overflow"),
        }
    }
}

/// Decoded view of a phase tag (`pre_cnt`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Record published, burst not yet started.
    Armed,
    /// Seconds left before the burst starts.
    Countdown(u16),
    /// Burst just completed, report window open.
    Report,
    /// In-burst progress counter.
    Burst(u16),
    /// Round fully complete.
    Complete,
}

impl Phase {
    pub const ARMED_TAG: i16 = i16::MIN;
    pub const REPORT_TAG: i16 = 0;
    pub const COMPLETE_TAG: i16 = i16::MAX;

    #[must_use]
    pub const fn from_tag(tag: i16) -> Self {
        match tag {
            i16::MIN => Phase::Armed,
            i16::MAX => Phase::Complete,
            0 => Phase::Report,
            t if t < 0 => Phase::Countdown(t.unsigned_abs()),
            t => Phase::Burst(t.unsigned_abs()),
        }
    }
}

/// Per-channel test record (`device_info`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    pub manufacturer_id: u16,
    pub form_id: u16,
    pub pre_count: i16,
    pub flow_count: u16,
    pub eui64: u64,
}

impl DeviceInfo {
    /// Armed record for the given node identifier.
    #[must_use]
    pub const fn new(eui64: u64) -> Self {
        Self {
            manufacturer_id: MANUFACTURER_ID,
            form_id: FORM_ID,
            pre_count: Phase::ARMED_TAG,
            flow_count: 0,
            eui64,
        }
    }

    /// `true` when both fixed ids match the test form.
    #[must_use]
    pub const fn has_test_ids(&self) -> bool {
        self.manufacturer_id == MANUFACTURER_ID && self.form_id == FORM_ID
    }

    /// Low 16 bits of the node identifier, used to tell senders apart.
    #[must_use]
    pub const fn node_id(&self) -> u16 {
        let bytes = self.eui64.to_be_bytes();
        u16::from_be_bytes([bytes[6], bytes[7]])
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        Phase::from_tag(self.pre_count)
    }

    /// Advances the flow counter for a new round, wrapping after [`MAX_FLOW`].
    pub fn next_flow(&mut self) {
        self.flow_count = if self.flow_count >= MAX_FLOW {
            1
        } else {
            self.flow_count + 1
        };
    }

    #[must_use]
    pub fn encode(&self) -> [u8; DEVICE_INFO_LEN] {
        let mut out = [0u8; DEVICE_INFO_LEN];
        out[0..2].copy_from_slice(&self.manufacturer_id.to_le_bytes());
        out[2..4].copy_from_slice(&self.form_id.to_le_bytes());
        out[4..6].copy_from_slice(&self.pre_count.to_le_bytes());
        out[6..8].copy_from_slice(&self.flow_count.to_le_bytes());
        out[8..16].copy_from_slice(&self.eui64.to_be_bytes());
        out
    }

    /// Decodes the first [`DEVICE_INFO_LEN`] bytes; trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] when fewer than 16 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut input = bytes;
        device_info
            .parse_next(&mut input)
            .map_err(|_| truncated(DEVICE_INFO_LEN, bytes.len()))
    }
}

/// Tail of a legacy record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bt4Tail {
    /// Leading bytes of the device name.
    Name([u8; BT4_TAIL_LEN]),
    /// Number-cast value behind the `0xFFFF` sentinel.
    Number(u64),
}

/// Legacy (BT4) record: device info plus a 10-byte tail.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bt4Record {
    pub info: DeviceInfo,
    pub tail: Bt4Tail,
}

impl Bt4Record {
    /// Builds a legacy record whose tail carries the first bytes of `name`.
    #[must_use]
    pub fn with_name(info: DeviceInfo, name: &str) -> Self {
        let mut tail = [0u8; BT4_TAIL_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(BT4_TAIL_LEN);
        tail[..len].copy_from_slice(&bytes[..len]);
        Self {
            info,
            tail: Bt4Tail::Name(tail),
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; BT4_RECORD_LEN] {
        let mut out = [0u8; BT4_RECORD_LEN];
        out[..DEVICE_INFO_LEN].copy_from_slice(&self.info.encode());
        match self.tail {
            Bt4Tail::Name(name) => out[DEVICE_INFO_LEN..].copy_from_slice(&name),
            Bt4Tail::Number(value) => {
                out[DEVICE_INFO_LEN..DEVICE_INFO_LEN + 2]
                    .copy_from_slice(&NUMCAST_SENTINEL.to_le_bytes());
                out[DEVICE_INFO_LEN + 2..].copy_from_slice(&value.to_le_bytes());
            }
        }
        out
    }

    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] when fewer than 26 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut input = bytes;
        bt4_record
            .parse_next(&mut input)
            .map_err(|_| truncated(BT4_RECORD_LEN, bytes.len()))
    }
}

/// Number-cast record: four values derived from the node address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NumcastInfo {
    pub manufacturer_id: u16,
    pub form_id: u16,
    pub values: [u16; 4],
}

impl NumcastInfo {
    /// Derives the local form from the address: byte pairs read little-endian, mod 1000.
    #[must_use]
    pub fn from_address(address: &[u8; 8]) -> Self {
        let mut values = [0u16; 4];
        for (slot, pair) in values.iter_mut().zip(address.chunks_exact(2)) {
            *slot = u16::from_le_bytes([pair[0], pair[1]]) % 1000;
        }
        Self::from_values(values)
    }

    #[must_use]
    pub const fn from_values(values: [u16; 4]) -> Self {
        Self {
            manufacturer_id: MANUFACTURER_ID,
            form_id: FORM_ID,
            values,
        }
    }

    /// Unpacks a broadcast value into its four 16-bit parts.
    #[must_use]
    pub const fn from_value(value: u64) -> Self {
        let b = value.to_le_bytes();
        Self::from_values([
            u16::from_le_bytes([b[0], b[1]]),
            u16::from_le_bytes([b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
        ])
    }

    /// Packs the four values little-endian into the broadcast value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.values
            .iter()
            .rev()
            .fold(0u64, |acc, part| (acc << 16) | u64::from(*part))
    }

    #[must_use]
    pub fn encode(&self) -> [u8; NUMCAST_INFO_LEN] {
        let mut out = [0u8; NUMCAST_INFO_LEN];
        out[0..2].copy_from_slice(&self.manufacturer_id.to_le_bytes());
        out[2..4].copy_from_slice(&self.form_id.to_le_bytes());
        out[4..].copy_from_slice(&self.value().to_le_bytes());
        out
    }

    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] when fewer than 12 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut input = bytes;
        numcast_info
            .parse_next(&mut input)
            .map_err(|_| truncated(NUMCAST_INFO_LEN, bytes.len()))
    }
}

fn truncated(needed: usize, found: usize) -> CodecError {
    CodecError::Truncated { needed, found }
}

fn device_info(input: &mut &[u8]) -> DecodeResult<DeviceInfo> {
    (le_u16, le_u16, le_i16, le_u16, be_u64)
        .map(
            |(manufacturer_id, form_id, pre_count, flow_count, eui64)| DeviceInfo {
                manufacturer_id,
                form_id,
                pre_count,
                flow_count,
                eui64,
            },
        )
        .parse_next(input)
}

fn bt4_record(input: &mut &[u8]) -> DecodeResult<Bt4Record> {
    (device_info, take(BT4_TAIL_LEN))
        .map(|(info, tail): (DeviceInfo, &[u8])| Bt4Record {
            info,
            tail: bt4_tail(tail),
        })
        .parse_next(input)
}

fn bt4_tail(bytes: &[u8]) -> Bt4Tail {
    let mut raw = [0u8; BT4_TAIL_LEN];
    raw.copy_from_slice(bytes);
    if u16::from_le_bytes([raw[0], raw[1]]) == NUMCAST_SENTINEL {
        let mut value = [0u8; 8];
        value.copy_from_slice(&raw[2..]);
        Bt4Tail::Number(u64::from_le_bytes(value))
    } else {
        Bt4Tail::Name(raw)
    }
}

fn numcast_info(input: &mut &[u8]) -> DecodeResult<NumcastInfo> {
    (le_u16, le_u16, le_u64)
        .map(|(manufacturer_id, form_id, value)| {
            let mut info = NumcastInfo::from_value(value);
            info.manufacturer_id = manufacturer_id;
            info.form_id = form_id;
            info
        })
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_layout_matches_wire_format() {
        let info = DeviceInfo {
            manufacturer_id: MANUFACTURER_ID,
            form_id: FORM_ID,
            pre_count: -3,
            flow_count: 7,
            eui64: 0x0102_0304_0506_0708,
        };
        let bytes = info.encode();
        assert_eq!(
            bytes,
            [
                0xFF, 0xFF, 0x00, 0x00, 0xFD, 0xFF, 0x07, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05,
                0x06, 0x07, 0x08
            ]
        );
        assert_eq!(DeviceInfo::decode(&bytes), Ok(info));
    }

    #[test]
    fn device_info_rejects_short_input() {
        assert_eq!(
            DeviceInfo::decode(&[0xFF; 13]),
            Err(CodecError::Truncated {
                needed: DEVICE_INFO_LEN,
                found: 13
            })
        );
    }

    #[test]
    fn node_id_uses_low_bits_of_identifier() {
        let info = DeviceInfo::new(0xAABB_CCDD_EEFF_1234);
        assert_eq!(info.node_id(), 0x1234);
        assert_eq!(info.phase(), Phase::Armed);
    }

    #[test]
    fn phase_tags_decode() {
        assert_eq!(Phase::from_tag(i16::MIN), Phase::Armed);
        assert_eq!(Phase::from_tag(-3), Phase::Countdown(3));
        assert_eq!(Phase::from_tag(0), Phase::Report);
        assert_eq!(Phase::from_tag(12), Phase::Burst(12));
        assert_eq!(Phase::from_tag(i16::MAX), Phase::Complete);
    }

    #[test]
    fn flow_counter_wraps_after_limit() {
        let mut info = DeviceInfo::new(1);
        info.next_flow();
        assert_eq!(info.flow_count, 1);
        info.flow_count = MAX_FLOW;
        info.next_flow();
        assert_eq!(info.flow_count, 1);
    }

    #[test]
    fn bt4_tail_distinguishes_name_and_number() {
        let info = DeviceInfo::new(0x42);
        let named = Bt4Record::with_name(info, "LossTst066-extra");
        let decoded = Bt4Record::decode(&named.encode()).expect("named record");
        assert_eq!(decoded.tail, Bt4Tail::Name(*b"LossTst066"));

        let numbered = Bt4Record {
            info,
            tail: Bt4Tail::Number(0x0123_4567_89AB_CDEF),
        };
        let bytes = numbered.encode();
        assert_eq!(&bytes[DEVICE_INFO_LEN..DEVICE_INFO_LEN + 2], &[0xFF, 0xFF]);
        assert_eq!(Bt4Record::decode(&bytes), Ok(numbered));
    }

    #[test]
    fn numcast_values_come_from_address_pairs() {
        let address = [0xE8, 0x03, 0xE9, 0x03, 0x10, 0x00, 0xFF, 0xFF];
        let info = NumcastInfo::from_address(&address);
        assert_eq!(info.values, [0, 1, 16, 535]);
        assert_eq!(NumcastInfo::from_value(info.value()).values, info.values);

        let bytes = info.encode();
        assert_eq!(&bytes[4..6], &0u16.to_le_bytes());
        assert_eq!(&bytes[10..12], &535u16.to_le_bytes());
        assert_eq!(NumcastInfo::decode(&bytes), Ok(info));
    }
}
