//! Reception records, the rolling RSSI mean and timed RSSI windows.

use core::time::Duration;

use heapless::HistoryBuf;

use crate::clock::EngineInstant;
use crate::phy::CHANNEL_COUNT;

/// Receive counters stop here.
pub const COUNTER_CAP: u32 = 9_999_999;

/// Highest RSSI a receiver reports as valid.
pub const RSSI_CEILING: i8 = 20;

/// RSSI placeholder for "no reading".
pub const RSSI_INVALID: i8 = -128;

/// TX power placeholder for "not reported".
pub const TX_POWER_UNKNOWN: i8 = 127;

/// Readings above [`RSSI_CEILING`] are controller placeholders, not measurements.
#[must_use]
pub const fn sanitize_rssi(rssi: i8) -> i8 {
    if rssi > RSSI_CEILING {
        RSSI_INVALID
    } else {
        rssi
    }
}

/// Identifies a sender session on one channel.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionKey {
    pub node: u16,
    pub primary: u8,
    pub secondary: u8,
    pub tx_power: i8,
}

/// Per-channel reception record kept by the scanner.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceptionRecord {
    pub key: SessionKey,
    pub flow: u16,
    pub subtotal: u16,
    pub rssi: i16,
    pub rssi_upper: i16,
    pub rssi_lower: i16,
    pub detected_sender: bool,
    pub dumped: bool,
    pub complete: bool,
    pub notified: bool,
}

impl Default for ReceptionRecord {
    fn default() -> Self {
        Self {
            key: SessionKey::default(),
            flow: 0,
            subtotal: 0,
            rssi: 0,
            rssi_upper: i16::MIN,
            rssi_lower: i16::MAX,
            detected_sender: false,
            dumped: false,
            complete: false,
            notified: false,
        }
    }
}

impl ReceptionRecord {
    /// Blank record for a session.
    #[must_use]
    pub fn for_session(key: SessionKey, flow: u16) -> Self {
        Self {
            key,
            flow,
            ..Self::default()
        }
    }

    /// `true` when `key` and `flow` name this record's session.
    #[must_use]
    pub fn same_session(&self, key: &SessionKey, flow: u16) -> bool {
        self.key == *key && self.flow == flow
    }
}

/// Current, lowest and highest RSSI as shown on the status board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RssiTriple {
    pub current: i16,
    pub min: i16,
    pub max: i16,
}

impl Default for RssiTriple {
    fn default() -> Self {
        Self {
            current: i16::from(TX_POWER_UNKNOWN),
            min: i16::from(TX_POWER_UNKNOWN),
            max: i16::from(TX_POWER_UNKNOWN),
        }
    }
}

/// Reception record plus the running RSSI sum behind its mean.
///
/// The mean is an integer division of the sum by the sample count, truncated
/// toward zero.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RollingRssi {
    pub record: ReceptionRecord,
    sum: i32,
    samples: i32,
}

impl RollingRssi {
    #[must_use]
    pub fn new(record: ReceptionRecord) -> Self {
        Self {
            record,
            sum: 0,
            samples: 0,
        }
    }

    /// Drops every sample and starts over from `rssi`.
    pub fn restart(&mut self, rssi: i8) {
        self.sum = 0;
        self.samples = 0;
        self.record.rssi_upper = i16::MIN;
        self.record.rssi_lower = i16::MAX;
        self.update(rssi);
    }

    /// Adds one sample.
    pub fn update(&mut self, rssi: i8) {
        let value = i16::from(rssi);
        self.record.rssi_upper = self.record.rssi_upper.max(value);
        self.record.rssi_lower = self.record.rssi_lower.min(value);
        self.sum += i32::from(value);
        self.samples += 1;
        self.record.rssi = self.mean();
    }

    /// Truncated mean of the samples so far, `0` when empty.
    #[must_use]
    pub fn mean(&self) -> i16 {
        if self.samples == 0 {
            return 0;
        }
        i16::try_from(self.sum / self.samples).unwrap_or(i16::MIN)
    }

    #[must_use]
    pub const fn samples(&self) -> i32 {
        self.samples
    }

    /// Status board view; bounds show the current value until two samples exist.
    #[must_use]
    pub fn display(&self) -> RssiTriple {
        let current = self.record.rssi;
        if self.samples <= 1 {
            RssiTriple {
                current,
                min: current,
                max: current,
            }
        } else {
            RssiTriple {
                current,
                min: self.record.rssi_lower,
                max: self.record.rssi_upper,
            }
        }
    }
}

/// Counter that saturates at [`COUNTER_CAP`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CappedCounter(u32);

impl CappedCounter {
    pub fn increment(&mut self) {
        if self.0 < COUNTER_CAP {
            self.0 += 1;
        }
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

/// One capped counter per logical channel.
pub type ChannelCounters = [CappedCounter; CHANNEL_COUNT];

/// Mean, lowest and highest RSSI over the live samples of a window.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RssiSummary {
    pub average: i8,
    pub min: i8,
    pub max: i8,
    pub samples: usize,
}

#[derive(Copy, Clone, Debug)]
struct WindowSample<I> {
    expires_at: I,
    rssi: i8,
}

/// Ring of timestamped RSSI samples that expire after a fixed lifetime.
#[derive(Clone, Debug)]
pub struct RssiWindow<I, const N: usize> {
    samples: HistoryBuf<WindowSample<I>, N>,
    lifetime: Duration,
}

impl<I, const N: usize> RssiWindow<I, N>
where
    I: EngineInstant,
{
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self {
            samples: HistoryBuf::new(),
            lifetime,
        }
    }

    /// Records `rssi` seen at `now`; the oldest sample is overwritten when full.
    pub fn push(&mut self, now: I, rssi: i8) {
        self.samples.write(WindowSample {
            expires_at: now + self.lifetime,
            rssi,
        });
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Summarizes the samples still alive at `now`. Empty windows report zeros.
    #[must_use]
    pub fn summary(&self, now: I) -> RssiSummary {
        let mut sum: i32 = 0;
        let mut count: usize = 0;
        let mut lower = RSSI_CEILING;
        let mut upper = i8::MIN;
        for sample in self
            .samples
            .oldest_ordered()
            .filter(|sample| sample.expires_at > now)
        {
            sum += i32::from(sample.rssi);
            count += 1;
            lower = lower.min(sample.rssi);
            upper = upper.max(sample.rssi);
        }

        if count == 0 {
            return RssiSummary::default();
        }

        let divisor = i32::try_from(count).unwrap_or(i32::MAX);
        RssiSummary {
            average: i8::try_from(sum / divisor).unwrap_or(RSSI_INVALID),
            min: lower,
            max: upper,
            samples: count,
        }
    }
}
