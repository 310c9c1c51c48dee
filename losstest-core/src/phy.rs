//! Logical test channels and the PHY pairs that identify them on air.
//!
//! A received report only carries the `(primary, secondary)` PHY codes the
//! controller observed; [`classify`] is the single place that turns that pair
//! into a [`Channel`]. Everything else in the crate matches on the channel.

use core::fmt;

/// Controller PHY codes as reported alongside scan results.
pub mod code {
    pub const NONE: u8 = 0;
    pub const LE_1M: u8 = 1;
    pub const LE_2M: u8 = 2;
    pub const LE_CODED: u8 = 3;
    pub const LE_CODED_S2: u8 = 4;
}

/// Number of logical test channels.
pub const CHANNEL_COUNT: usize = 4;

/// One of the four test transmission paths.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Extended advertising, 1M primary / 2M secondary.
    Le2M,
    /// Extended advertising, 1M primary / 1M secondary.
    Le1M,
    /// Extended advertising on the coded PHY (S8).
    CodedS8,
    /// Legacy advertising, readable by BLE 4.x scanners.
    Legacy,
}

impl Channel {
    /// Channels in their fixed issue order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Le2M,
        Channel::Le1M,
        Channel::CodedS8,
        Channel::Legacy,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Channel::Le2M => 0,
            Channel::Le1M => 1,
            Channel::CodedS8 => 2,
            Channel::Legacy => 3,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Channel::Le2M),
            1 => Some(Channel::Le1M),
            2 => Some(Channel::CodedS8),
            3 => Some(Channel::Legacy),
            _ => None,
        }
    }

    /// PHY pair a scanner reports for packets sent on this channel.
    #[must_use]
    pub const fn phy_pair(self) -> (u8, u8) {
        match self {
            Channel::Le2M => (code::LE_1M, code::LE_2M),
            Channel::Le1M => (code::LE_1M, code::LE_1M),
            Channel::CodedS8 => (code::LE_CODED, code::LE_CODED),
            Channel::Legacy => (code::LE_1M, code::NONE),
        }
    }

    /// Channels that use extended advertising and carry a device name element.
    #[must_use]
    pub const fn is_extended(self) -> bool {
        !matches!(self, Channel::Legacy)
    }

    /// Short `<primary>/<secondary>` label used by sender status lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Channel::Le2M => "1M/2M",
            Channel::Le1M => "1M/1M",
            Channel::CodedS8 => "S8/S8",
            Channel::Legacy => "BLEv4",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Le2M => "2M",
            Channel::Le1M => "1M",
            Channel::CodedS8 => "coded",
            Channel::Legacy => "legacy",
        };
        f.write_str(name)
    }
}

/// Maps a reported PHY pair onto a logical channel.
///
/// Returns `None` for every pair outside the four the test transmits on.
#[must_use]
pub const fn classify(primary: u8, secondary: u8) -> Option<Channel> {
    match (primary, secondary) {
        (code::LE_1M, code::LE_2M) => Some(Channel::Le2M),
        (code::LE_1M, code::LE_1M) => Some(Channel::Le1M),
        (code::LE_CODED, code::LE_CODED) => Some(Channel::CodedS8),
        (code::LE_1M, code::NONE) => Some(Channel::Legacy),
        _ => None,
    }
}

/// Display name for a primary PHY code.
#[must_use]
pub const fn primary_phy_name(phy: u8) -> &'static str {
    match phy {
        code::LE_1M => "1M",
        code::LE_CODED => "S8",
        code::LE_CODED_S2 => "S2",
        _ => "NA",
    }
}

/// Display name for a secondary PHY code.
#[must_use]
pub const fn secondary_phy_name(phy: u8) -> &'static str {
    match phy {
        code::LE_1M => "1M",
        code::LE_2M => "2M",
        code::LE_CODED => "S8",
        code::LE_CODED_S2 => "S2",
        _ => "NA",
    }
}

/// Per-frequency inhibit switches for the three primary advertising channels.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvChannelInhibit {
    pub ch37: bool,
    pub ch38: bool,
    pub ch39: bool,
}

/// Primary advertising channel bitmap (bit 0 = 37, bit 1 = 38, bit 2 = 39).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMap {
    bits: u8,
    fallback: bool,
}

impl ChannelMap {
    /// All three primary advertising channels.
    pub const ALL: ChannelMap = ChannelMap {
        bits: 0x07,
        fallback: false,
    };

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.bits
    }

    /// `true` when every channel was inhibited and the map fell back to all.
    #[must_use]
    pub const fn is_fallback(self) -> bool {
        self.fallback
    }
}

/// Computes the advertising channel bitmap for the inhibit switches.
///
/// Never returns an empty map: inhibiting every channel yields [`ChannelMap::ALL`]
/// flagged as a fallback so the caller can warn.
#[must_use]
pub const fn channel_bitmap(inhibit: AdvChannelInhibit) -> ChannelMap {
    let mut bits = ChannelMap::ALL.bits;
    if inhibit.ch37 {
        bits &= !0x01;
    }
    if inhibit.ch38 {
        bits &= !0x02;
    }
    if inhibit.ch39 {
        bits &= !0x04;
    }

    if bits == 0 {
        ChannelMap {
            bits: ChannelMap::ALL.bits,
            fallback: true,
        }
    } else {
        ChannelMap {
            bits,
            fallback: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_the_four_known_pairs() {
        for channel in Channel::ALL {
            let (primary, secondary) = channel.phy_pair();
            assert_eq!(classify(primary, secondary), Some(channel));
        }
    }

    #[test]
    fn every_other_pair_is_unknown() {
        let mut known = 0;
        for primary in 0..=u8::MAX {
            for secondary in 0..=u8::MAX {
                if let Some(channel) = classify(primary, secondary) {
                    known += 1;
                    assert_eq!(channel.phy_pair(), (primary, secondary));
                }
            }
        }
        assert_eq!(known, CHANNEL_COUNT);
    }

    #[test]
    fn channel_index_round_trips() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_index(channel.index()), Some(channel));
        }
        assert_eq!(Channel::from_index(4), None);
    }

    #[test]
    fn bitmap_clears_inhibited_channels() {
        let map = channel_bitmap(AdvChannelInhibit {
            ch37: true,
            ch38: false,
            ch39: true,
        });
        assert_eq!(map.bits(), 0x02);
        assert!(!map.is_fallback());
    }

    #[test]
    fn bitmap_is_never_empty() {
        for mask in 0u8..8 {
            let map = channel_bitmap(AdvChannelInhibit {
                ch37: mask & 1 != 0,
                ch38: mask & 2 != 0,
                ch39: mask & 4 != 0,
            });
            assert_ne!(map.bits(), 0);
            assert_eq!(map.is_fallback(), mask == 7);
        }
    }

    #[test]
    fn phy_names_follow_controller_codes() {
        assert_eq!(primary_phy_name(code::LE_2M), "NA");
        assert_eq!(primary_phy_name(code::LE_CODED), "S8");
        assert_eq!(secondary_phy_name(code::LE_2M), "2M");
        assert_eq!(secondary_phy_name(9), "NA");
    }
}
