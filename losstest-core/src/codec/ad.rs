//! Length-prefixed advertising data elements.
//!
//! Each element on air is `[length][type][value...]` where `length` counts the
//! type byte plus the value. A zero length ends the payload early. Received
//! payloads are untrusted: a length running past the buffer is reported as
//! [`AdError::Truncated`], which callers treat differently from a well-formed
//! payload that simply is not ours ([`Verdict::Rejected`]).

use core::fmt;

use heapless::Vec;
use winnow::prelude::*;
use winnow::token::{any, take};

use super::{
    BT4_RECORD_LEN, Bt4Record, Bt4Tail, CodecError, DEVICE_INFO_LEN, DecodeResult, DeviceInfo,
    NUMCAST_INFO_LEN, NumcastInfo,
};
use crate::phy::Channel;

/// Advertising data element types used by the test.
pub mod ad_type {
    pub const FLAGS: u8 = 0x01;
    pub const NAME_COMPLETE: u8 = 0x09;
    pub const MANUFACTURER_DATA: u8 = 0xFF;
}

/// Flags value advertised by every payload: LE only, no BR/EDR.
pub const FLAGS_NO_BREDR: u8 = 0x04;

/// Largest payload the builders produce. Extended advertising data allows more.
pub const MAX_PAYLOAD_LEN: usize = 320;

/// Longest value a single element can carry.
pub const MAX_ELEMENT_LEN: usize = 254;

/// Owned advertising or scan payload.
pub type AdPayload = Vec<u8, MAX_PAYLOAD_LEN>;

/// A single element borrowed from a payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AdElement<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Malformed payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdError {
    /// Element length field runs past the end of the buffer.
    Truncated {
        offset: usize,
        declared: usize,
        remaining: usize,
    },
}

impl fmt::Display for AdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdError::Truncated {
                offset,
                declared,
                remaining,
            } => write!(
                f,
                "element at {offset} declares {declared} bytes, {remaining} remain"
            ),
        }
    }
}

/// Iterator over the elements of a payload.
///
/// Yields one `Err` and then stops when an element is malformed.
#[derive(Clone, Debug)]
pub struct AdElements<'a> {
    rest: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> AdElements<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self {
            rest: bytes,
            offset: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for AdElements<'a> {
    type Item = Result<AdElement<'a>, AdError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.rest.is_empty() {
            return None;
        }

        let mut input = self.rest;
        match element.parse_next(&mut input) {
            Ok(Some(parsed)) => {
                self.offset += self.rest.len() - input.len();
                self.rest = input;
                Some(Ok(parsed))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(_) => {
                self.done = true;
                let (declared, tail) = self.rest.split_first().map_or((0, 0), |(length, tail)| {
                    (usize::from(*length), tail.len())
                });
                Some(Err(AdError::Truncated {
                    offset: self.offset,
                    declared,
                    remaining: tail,
                }))
            }
        }
    }
}

fn byte(input: &mut &[u8]) -> DecodeResult<u8> {
    any.parse_next(input)
}

/// One `[length][type][value...]` element; `None` for the zero-length end marker.
fn element<'a>(input: &mut &'a [u8]) -> DecodeResult<Option<AdElement<'a>>> {
    let declared = byte(input)?;
    if declared == 0 {
        return Ok(None);
    }
    (byte, take(usize::from(declared) - 1))
        .map(|(ad_type, data): (u8, &'a [u8])| Some(AdElement { ad_type, data }))
        .parse_next(input)
}

/// Walks `bytes`, handing each element to `visit` until it returns `false`.
///
/// Returns the number of elements visited.
///
/// # Errors
///
/// Returns [`AdError::Truncated`] when an element overruns the buffer before
/// `visit` asked to stop.
pub fn parse_ad<'a, F>(bytes: &'a [u8], mut visit: F) -> Result<usize, AdError>
where
    F: FnMut(AdElement<'a>) -> bool,
{
    let mut count = 0;
    for element in AdElements::new(bytes) {
        let element = element?;
        count += 1;
        if !visit(element) {
            break;
        }
    }
    Ok(count)
}

/// Outcome of checking a well-formed payload against a test format.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict<T> {
    Accepted(T),
    Rejected,
}

impl<T> Verdict<T> {
    #[must_use]
    pub fn accepted(self) -> Option<T> {
        match self {
            Verdict::Accepted(value) => Some(value),
            Verdict::Rejected => None,
        }
    }
}

enum FormStep<T> {
    Start,
    Flagged,
    Done(Verdict<T>),
}

impl<T> FormStep<T> {
    fn is_done(&self) -> bool {
        matches!(self, FormStep::Done(_))
    }

    fn finish(self, walk: Result<usize, AdError>) -> Result<Verdict<T>, AdError> {
        match self {
            FormStep::Done(verdict) => Ok(verdict),
            FormStep::Start | FormStep::Flagged => walk.map(|_| Verdict::Rejected),
        }
    }
}

/// Checks a payload for the test-data layout: a flags element first, then a
/// manufacturer element carrying a device-info record with the test ids.
///
/// # Errors
///
/// Returns [`AdError`] when the payload is malformed before a verdict is reached.
pub fn parse_test_packet(payload: &[u8]) -> Result<Verdict<DeviceInfo>, AdError> {
    let mut step = FormStep::Start;
    let walk = parse_ad(payload, |element| {
        let next = match (&step, element.ad_type) {
            (FormStep::Start, ad_type::FLAGS) => FormStep::Flagged,
            (FormStep::Flagged, ad_type::MANUFACTURER_DATA) => {
                match DeviceInfo::decode(element.data) {
                    Ok(info) if info.has_test_ids() => FormStep::Done(Verdict::Accepted(info)),
                    _ => FormStep::Done(Verdict::Rejected),
                }
            }
            _ => FormStep::Done(Verdict::Rejected),
        };
        step = next;
        !step.is_done()
    });
    step.finish(walk)
}

/// A number-cast broadcast seen on air.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NumcastSighting {
    pub info: DeviceInfo,
    pub value: u64,
}

/// Checks a payload for the number-cast layout of `channel`.
///
/// Legacy payloads carry a BT4 record whose tail holds the `0xFFFF` sentinel.
/// Extended payloads carry a device-info element followed by a number-cast
/// element of exactly [`NUMCAST_INFO_LEN`] bytes.
///
/// # Errors
///
/// Returns [`AdError`] when the payload is malformed before a verdict is reached.
pub fn parse_numcast_packet(
    payload: &[u8],
    channel: Channel,
) -> Result<Verdict<NumcastSighting>, AdError> {
    let mut step = FormStep::Start;
    let mut info: Option<DeviceInfo> = None;
    let walk = parse_ad(payload, |element| {
        let next = match (&step, element.ad_type) {
            (FormStep::Start, ad_type::FLAGS) => FormStep::Flagged,
            (FormStep::Flagged, ad_type::MANUFACTURER_DATA) if channel.is_extended() => {
                extended_numcast(&mut info, element.data)
            }
            (FormStep::Flagged, ad_type::MANUFACTURER_DATA) => {
                FormStep::Done(legacy_numcast(element.data))
            }
            _ => FormStep::Done(Verdict::Rejected),
        };
        step = next;
        !step.is_done()
    });
    step.finish(walk)
}

fn extended_numcast(info: &mut Option<DeviceInfo>, data: &[u8]) -> FormStep<NumcastSighting> {
    match *info {
        None if data.len() == DEVICE_INFO_LEN => match DeviceInfo::decode(data) {
            Ok(decoded) if decoded.has_test_ids() => {
                *info = Some(decoded);
                FormStep::Flagged
            }
            _ => FormStep::Done(Verdict::Rejected),
        },
        Some(decoded) if data.len() == NUMCAST_INFO_LEN => match NumcastInfo::decode(data) {
            Ok(numcast) => FormStep::Done(Verdict::Accepted(NumcastSighting {
                info: decoded,
                value: numcast.value(),
            })),
            Err(_) => FormStep::Done(Verdict::Rejected),
        },
        _ => FormStep::Done(Verdict::Rejected),
    }
}

fn legacy_numcast(data: &[u8]) -> Verdict<NumcastSighting> {
    if data.len() < BT4_RECORD_LEN {
        return Verdict::Rejected;
    }
    match Bt4Record::decode(data) {
        Ok(Bt4Record {
            info,
            tail: Bt4Tail::Number(value),
        }) if info.has_test_ids() => Verdict::Accepted(NumcastSighting { info, value }),
        _ => Verdict::Rejected,
    }
}

/// Appends elements to an [`AdPayload`].
#[derive(Clone, Debug, Default)]
pub struct AdBuilder {
    buf: AdPayload,
}

impl AdBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Starts a payload with the standard flags element.
    ///
    /// # Errors
    ///
    /// Never fails in practice; kept fallible for symmetry with [`AdBuilder::push`].
    pub fn with_flags() -> Result<Self, CodecError> {
        let mut builder = Self::new();
        builder.push(ad_type::FLAGS, &[FLAGS_NO_BREDR])?;
        Ok(builder)
    }

    /// Appends one element.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Overflow`] when the value is longer than an element
    /// allows or the payload is full.
    pub fn push(&mut self, ad_type: u8, data: &[u8]) -> Result<(), CodecError> {
        if data.len() > MAX_ELEMENT_LEN {
            return Err(CodecError::Overflow);
        }
        let length = u8::try_from(data.len() + 1).map_err(|_| CodecError::Overflow)?;
        self.buf.push(length).map_err(|_| CodecError::Overflow)?;
        self.buf.push(ad_type).map_err(|_| CodecError::Overflow)?;
        self.buf
            .extend_from_slice(data)
            .map_err(|_| CodecError::Overflow)
    }

    #[must_use]
    pub fn finish(self) -> AdPayload {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(parts: &[(u8, &[u8])]) -> AdPayload {
        let mut builder = AdBuilder::new();
        for (ad_type, data) in parts {
            builder.push(*ad_type, data).expect("element fits");
        }
        builder.finish()
    }

    #[test]
    fn walks_elements_in_order() {
        let bytes = payload(&[(ad_type::FLAGS, &[0x04]), (ad_type::NAME_COMPLETE, b"abc")]);
        let mut seen = [0u8; 2];
        let count = parse_ad(&bytes, |element| {
            seen[usize::from(element.ad_type == ad_type::NAME_COMPLETE)] = element.ad_type;
            true
        })
        .expect("well formed");
        assert_eq!(count, 2);
        assert_eq!(seen, [ad_type::FLAGS, ad_type::NAME_COMPLETE]);
    }

    #[test]
    fn zero_length_ends_the_walk() {
        let bytes = [0x02, ad_type::FLAGS, 0x04, 0x00, 0x05, 0xFF];
        assert_eq!(parse_ad(&bytes, |_| true), Ok(1));
    }

    #[test]
    fn stops_when_visitor_declines() {
        let bytes = payload(&[(ad_type::FLAGS, &[0x04]), (ad_type::FLAGS, &[0x04])]);
        assert_eq!(parse_ad(&bytes, |_| false), Ok(1));
    }

    #[test]
    fn overrunning_length_is_an_error() {
        let bytes = [0x02, ad_type::FLAGS, 0x04, 0x09, ad_type::MANUFACTURER_DATA, 0x01];
        assert_eq!(
            parse_ad(&bytes, |_| true),
            Err(AdError::Truncated {
                offset: 3,
                declared: 9,
                remaining: 2
            })
        );
    }

    #[test]
    fn length_one_is_a_type_without_value() {
        let bytes = [0x01, ad_type::NAME_COMPLETE, 0x01];
        let mut elements = AdElements::new(&bytes);
        assert_eq!(
            elements.next(),
            Some(Ok(AdElement {
                ad_type: ad_type::NAME_COMPLETE,
                data: &[],
            }))
        );
        assert_eq!(
            elements.next(),
            Some(Err(AdError::Truncated {
                offset: 2,
                declared: 1,
                remaining: 0
            }))
        );
        assert_eq!(elements.next(), None);
    }

    #[test]
    fn test_packet_accepts_flags_then_record() {
        let info = DeviceInfo::new(0x0102_0304_0506_0708);
        let bytes = payload(&[
            (ad_type::FLAGS, &[FLAGS_NO_BREDR]),
            (ad_type::MANUFACTURER_DATA, &info.encode()),
            (ad_type::NAME_COMPLETE, b"LossTst(008)"),
        ]);
        assert_eq!(parse_test_packet(&bytes), Ok(Verdict::Accepted(info)));
    }

    #[test]
    fn test_packet_rejects_wrong_ids_and_order() {
        let mut info = DeviceInfo::new(7);
        info.form_id = 1;
        let wrong_ids = payload(&[
            (ad_type::FLAGS, &[FLAGS_NO_BREDR]),
            (ad_type::MANUFACTURER_DATA, &info.encode()),
        ]);
        assert_eq!(parse_test_packet(&wrong_ids), Ok(Verdict::Rejected));

        let no_flags = payload(&[(
            ad_type::MANUFACTURER_DATA,
            &DeviceInfo::new(7).encode(),
        )]);
        assert_eq!(parse_test_packet(&no_flags), Ok(Verdict::Rejected));
    }

    #[test]
    fn malformed_payload_is_distinct_from_mismatch() {
        let bytes = [0x02, ad_type::FLAGS, 0x04, 0x20, ad_type::MANUFACTURER_DATA, 0xFF];
        assert!(matches!(
            parse_test_packet(&bytes),
            Err(AdError::Truncated { .. })
        ));
    }

    #[test]
    fn numcast_extended_needs_both_records() {
        let info = DeviceInfo::new(0x1234);
        let numcast = NumcastInfo::from_values([1, 2, 3, 4]);
        let bytes = payload(&[
            (ad_type::FLAGS, &[FLAGS_NO_BREDR]),
            (ad_type::MANUFACTURER_DATA, &info.encode()),
            (ad_type::MANUFACTURER_DATA, &numcast.encode()),
        ]);
        let sighting = parse_numcast_packet(&bytes, Channel::Le1M)
            .expect("well formed")
            .accepted()
            .expect("numcast accepted");
        assert_eq!(sighting.value, numcast.value());
        assert_eq!(sighting.info, info);

        let short = payload(&[
            (ad_type::FLAGS, &[FLAGS_NO_BREDR]),
            (ad_type::MANUFACTURER_DATA, &info.encode()),
            (ad_type::MANUFACTURER_DATA, &numcast.encode()[..10]),
        ]);
        assert_eq!(
            parse_numcast_packet(&short, Channel::Le1M),
            Ok(Verdict::Rejected)
        );
    }

    #[test]
    fn numcast_legacy_needs_sentinel() {
        let info = DeviceInfo::new(0x1234);
        let record = Bt4Record {
            info,
            tail: Bt4Tail::Number(99),
        };
        let bytes = payload(&[
            (ad_type::FLAGS, &[FLAGS_NO_BREDR]),
            (ad_type::MANUFACTURER_DATA, &record.encode()),
        ]);
        assert_eq!(
            parse_numcast_packet(&bytes, Channel::Legacy),
            Ok(Verdict::Accepted(NumcastSighting { info, value: 99 }))
        );

        let named = Bt4Record::with_name(info, "LossTst052");
        let bytes = payload(&[
            (ad_type::FLAGS, &[FLAGS_NO_BREDR]),
            (ad_type::MANUFACTURER_DATA, &named.encode()),
        ]);
        assert_eq!(
            parse_numcast_packet(&bytes, Channel::Legacy),
            Ok(Verdict::Rejected)
        );
    }

    #[test]
    fn builder_rejects_oversized_elements() {
        let mut builder = AdBuilder::new();
        assert_eq!(
            builder.push(ad_type::MANUFACTURER_DATA, &[0u8; MAX_ELEMENT_LEN + 1]),
            Err(CodecError::Overflow)
        );
    }
}
