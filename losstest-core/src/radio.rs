//! Seam between the engine and the platform's advertiser and scanner.
//!
//! The engine never blocks on the radio. Completion of a bounded advertising
//! start and every received packet arrive as [`RadioEvent`]s that the engine
//! drains on each poll.

use core::fmt;

use crate::codec::ad::AdPayload;
use crate::config::{AdvParams, StartParams};
use crate::phy::{Channel, ChannelMap, code};
use crate::stats::TX_POWER_UNKNOWN;

/// Number of advertising targets: one per channel plus the status target.
pub const TARGET_COUNT: usize = 5;

/// Index of an advertising target.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TargetId(u8);

impl TargetId {
    /// Target that carries the status strings.
    pub const STATUS: TargetId = TargetId(4);

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn channel(channel: Channel) -> Self {
        TargetId(channel.index() as u8)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Channel this target transmits, `None` for the status target.
    #[must_use]
    pub const fn as_channel(self) -> Option<Channel> {
        Channel::from_index(self.index())
    }

    /// Every target, channels first.
    pub fn all() -> impl Iterator<Item = TargetId> {
        (0u8..5).map(TargetId)
    }
}

impl TryFrom<u8> for TargetId {
    type Error = RadioError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        if usize::from(index) < TARGET_COUNT {
            Ok(TargetId(index))
        } else {
            Err(RadioError::InvalidIndex(index))
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_channel() {
            Some(channel) => write!(f, "{channel}"),
            None => f.write_str("status"),
        }
    }
}

/// Setup and update failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// The engine has no node identity yet.
    NotInitialized,
    InvalidIndex(u8),
    /// The controller rejected or failed the request.
    Io,
    Unsupported,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::NotInitialized => f.write_str("not initialized"),
            RadioError::InvalidIndex(index) => write!(f, "invalid target index {index}"),
            RadioError::Io => f.write_str("radio i/o failure"),
            RadioError::Unsupported => f.write_str("unsupported"),
        }
    }
}

/// PHYs a scan listens on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanPhys {
    OneM,
    Coded,
    OneMAndCoded,
}

impl ScanPhys {
    /// `true` when a packet whose primary PHY is `primary` can be heard.
    #[must_use]
    pub const fn hears(self, primary: u8) -> bool {
        match self {
            ScanPhys::OneM => primary == code::LE_1M,
            ScanPhys::Coded => primary == code::LE_CODED,
            ScanPhys::OneMAndCoded => primary == code::LE_1M || primary == code::LE_CODED,
        }
    }
}

/// Passive scan settings. Interval and window are in 0.625 ms units.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanParams {
    pub phys: ScanPhys,
    pub interval: u16,
    pub window: u16,
}

/// Scan filter presets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanMethod {
    /// 1M and coded, 60 ms window every 60 ms.
    AllPhys,
    OneM,
    Coded,
    /// 1M and coded with a 90 ms window every 180 ms.
    Relaxed,
}

impl ScanMethod {
    #[must_use]
    pub const fn params(self) -> ScanParams {
        match self {
            ScanMethod::AllPhys => ScanParams {
                phys: ScanPhys::OneMAndCoded,
                interval: 96,
                window: 96,
            },
            ScanMethod::OneM => ScanParams {
                phys: ScanPhys::OneM,
                interval: 96,
                window: 96,
            },
            ScanMethod::Coded => ScanParams {
                phys: ScanPhys::Coded,
                interval: 96,
                window: 96,
            },
            ScanMethod::Relaxed => ScanParams {
                phys: ScanPhys::OneMAndCoded,
                interval: 288,
                window: 144,
            },
        }
    }
}

/// A packet heard by the scanner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanReport {
    pub primary: u8,
    pub secondary: u8,
    pub rssi: i8,
    pub tx_power: i8,
    pub payload: AdPayload,
}

impl ScanReport {
    /// Report for a legacy advertisement, which carries no secondary PHY or TX power.
    #[must_use]
    pub fn legacy(rssi: i8, payload: AdPayload) -> Self {
        Self {
            primary: code::LE_1M,
            secondary: code::NONE,
            rssi,
            tx_power: TX_POWER_UNKNOWN,
            payload,
        }
    }
}

/// Asynchronous notifications from the radio.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RadioEvent {
    /// A bounded start on `TargetId` ran out of events or time.
    AdvSent(TargetId),
    Report(ScanReport),
}

/// Advertiser and scanner primitives the engine drives.
pub trait Radio {
    /// Creates the advertising set behind `target`.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError`] when the controller cannot allocate the set.
    fn create(&mut self, target: TargetId, params: &AdvParams) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when the parameters are rejected.
    fn update_params(&mut self, target: TargetId, params: &AdvParams) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when the payload is rejected.
    fn set_data(&mut self, target: TargetId, payload: &[u8]) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when advertising cannot start.
    fn start(&mut self, target: TargetId, start: StartParams) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when advertising cannot be stopped.
    fn stop(&mut self, target: TargetId) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when the map cannot be applied.
    fn set_channel_map(&mut self, target: TargetId, map: ChannelMap) -> Result<(), RadioError>;

    /// Sets the default TX power and returns the level actually applied.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError`] when the level is rejected.
    fn set_tx_power(&mut self, dbm: i8) -> Result<i8, RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when scanning cannot start.
    fn start_scan(&mut self, params: ScanParams) -> Result<(), RadioError>;

    /// # Errors
    ///
    /// Returns [`RadioError`] when scanning cannot stop.
    fn stop_scan(&mut self) -> Result<(), RadioError>;

    /// Next pending notification, if any.
    fn poll_event(&mut self) -> Option<RadioEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_index_is_bounded() {
        assert_eq!(TargetId::try_from(4), Ok(TargetId::STATUS));
        assert_eq!(TargetId::try_from(5), Err(RadioError::InvalidIndex(5)));
        assert_eq!(TargetId::channel(Channel::Legacy).index(), 3);
        assert_eq!(TargetId::STATUS.as_channel(), None);
        assert_eq!(TargetId::all().count(), TARGET_COUNT);
    }

    #[test]
    fn scan_filters_match_primary_phy() {
        assert!(ScanMethod::AllPhys.params().phys.hears(code::LE_CODED));
        assert!(ScanMethod::OneM.params().phys.hears(code::LE_1M));
        assert!(!ScanMethod::OneM.params().phys.hears(code::LE_CODED));
        assert!(!ScanMethod::Coded.params().phys.hears(code::LE_1M));
        assert_eq!(ScanMethod::Relaxed.params().window, 144);
    }
}
