//! Outgoing payload builders and device names.

use core::fmt::Write as _;

use heapless::String;

use super::ad::{AdBuilder, AdPayload, ad_type};
use super::{Bt4Record, Bt4Tail, CodecError, DeviceInfo, NumcastInfo};
use crate::phy::Channel;

/// Default base name for the status target.
pub const DEFAULT_STATUS_NAME: &str = "Turnkey LossTest";

/// Capacity of generated device names.
pub const NAME_CAPACITY: usize = 32;

pub type DeviceName = String<NAME_CAPACITY>;

/// Name broadcast by an extended test channel: `LossTst(NNN)`.
///
/// # Errors
///
/// Returns [`CodecError::Overflow`] if the name does not fit.
pub fn channel_name(node: u8) -> Result<DeviceName, CodecError> {
    let mut name = DeviceName::new();
    write!(name, "LossTst({node:03})").map_err(|_| CodecError::Overflow)?;
    Ok(name)
}

/// Name stored in the legacy tail: `LossTstNNN`.
///
/// # Errors
///
/// Returns [`CodecError::Overflow`] if the name does not fit.
pub fn legacy_name(node: u8) -> Result<DeviceName, CodecError> {
    let mut name = DeviceName::new();
    write!(name, "LossTst{node:03}").map_err(|_| CodecError::Overflow)?;
    Ok(name)
}

/// Name broadcast by the status target: up to 19 characters of `base` then `(PEEK NNN)`.
///
/// # Errors
///
/// Returns [`CodecError::Overflow`] if the name does not fit.
pub fn status_name(base: &str, node: u8) -> Result<DeviceName, CodecError> {
    let cut = base.char_indices().nth(19).map_or(base.len(), |(at, _)| at);
    let mut name = DeviceName::new();
    write!(name, "{}(PEEK {node:03})", &base[..cut]).map_err(|_| CodecError::Overflow)?;
    Ok(name)
}

/// Test payload for `channel`.
///
/// Extended channels carry the record and the channel name; the legacy channel
/// packs the leading name bytes into the record tail.
///
/// # Errors
///
/// Returns [`CodecError::Overflow`] if the payload does not fit.
pub fn test_payload(
    channel: Channel,
    info: &DeviceInfo,
    node: u8,
) -> Result<AdPayload, CodecError> {
    let mut builder = AdBuilder::with_flags()?;
    if channel.is_extended() {
        builder.push(ad_type::MANUFACTURER_DATA, &info.encode())?;
        builder.push(ad_type::NAME_COMPLETE, channel_name(node)?.as_bytes())?;
    } else {
        let record = Bt4Record::with_name(*info, &legacy_name(node)?);
        builder.push(ad_type::MANUFACTURER_DATA, &record.encode())?;
    }
    Ok(builder.finish())
}

/// Number-cast payload for `channel`.
///
/// # Errors
///
/// Returns [`CodecError::Overflow`] if the payload does not fit.
pub fn numcast_payload(
    channel: Channel,
    info: &DeviceInfo,
    numcast: &NumcastInfo,
) -> Result<AdPayload, CodecError> {
    let mut builder = AdBuilder::with_flags()?;
    if channel.is_extended() {
        builder.push(ad_type::MANUFACTURER_DATA, &info.encode())?;
        builder.push(ad_type::MANUFACTURER_DATA, &numcast.encode())?;
    } else {
        let record = Bt4Record {
            info: *info,
            tail: Bt4Tail::Number(numcast.value()),
        };
        builder.push(ad_type::MANUFACTURER_DATA, &record.encode())?;
    }
    Ok(builder.finish())
}

/// Acknowledgment echo: the received record, unmodified.
///
/// # Errors
///
/// Returns [`CodecError::Overflow`] if the payload does not fit.
pub fn response_payload(echo: &DeviceInfo) -> Result<AdPayload, CodecError> {
    let mut builder = AdBuilder::with_flags()?;
    builder.push(ad_type::MANUFACTURER_DATA, &echo.encode())?;
    Ok(builder.finish())
}

/// Status payload: one manufacturer element per status line plus the status name.
///
/// # Errors
///
/// Returns [`CodecError::Overflow`] if the payload does not fit.
pub fn status_payload<'a, I>(lines: I, name: &str) -> Result<AdPayload, CodecError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut builder = AdBuilder::with_flags()?;
    for line in lines {
        builder.push(ad_type::MANUFACTURER_DATA, line)?;
    }
    builder.push(ad_type::NAME_COMPLETE, name.as_bytes())?;
    Ok(builder.finish())
}
