//! Test configuration, preset tables and advertising parameter presets.

use core::fmt;
use core::time::Duration;

use crate::phy::{AdvChannelInhibit, CHANNEL_COUNT, Channel, code};
use crate::trigger::Mode;

/// Events sent per channel in one burst.
pub const BURST_COUNT: u16 = 250;

/// Selectable TX power levels in dBm.
pub const TX_POWER_PRESETS: [i8; 12] = [-40, -30, -20, -16, -12, -8, -4, 0, 2, 4, 8, 10];

/// Advertising interval presets as `(min, max)` milliseconds.
pub const INTERVAL_PRESETS_MS: [(u16, u16); 11] = [
    (30, 60),
    (60, 120),
    (90, 180),
    (100, 150),
    (200, 300),
    (300, 450),
    (500, 650),
    (750, 950),
    (1000, 1200),
    (2000, 2400),
    (3000, 3600),
];

/// Packets per channel a round must deliver.
pub const COUNT_PRESETS: [u16; 7] = [500, 1000, 2000, 5000, 10000, 20000, 50000];

/// Interval preset used while counting down, reporting and finalizing.
pub const CONTROL_INTERVAL_GROUP: usize = 3;

/// Advertising option bits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvOptions(u16);

impl AdvOptions {
    pub const NONE: AdvOptions = AdvOptions(0);
    pub const USE_TX_POWER: AdvOptions = AdvOptions(1);
    pub const ANONYMOUS: AdvOptions = AdvOptions(2);
    pub const EXT_ADV: AdvOptions = AdvOptions(4);
    pub const NO_2M: AdvOptions = AdvOptions(8);
    pub const CODED: AdvOptions = AdvOptions(16);
    pub const USE_IDENTITY: AdvOptions = AdvOptions(32);
    pub const CONNECTABLE: AdvOptions = AdvOptions(64);

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: AdvOptions) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: AdvOptions) -> AdvOptions {
        AdvOptions(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: AdvOptions) -> AdvOptions {
        AdvOptions(self.0 & !other.0)
    }

    /// Clears anonymous advertising and advertises with the identity address.
    #[must_use]
    pub const fn with_identity(self) -> AdvOptions {
        self.without(AdvOptions::ANONYMOUS)
            .union(AdvOptions::USE_IDENTITY)
    }

    /// `(primary, secondary)` PHY codes these options transmit on.
    #[must_use]
    pub const fn phys(self) -> (u8, u8) {
        if !self.contains(AdvOptions::EXT_ADV) {
            (code::LE_1M, code::NONE)
        } else if self.contains(AdvOptions::CODED) {
            (code::LE_CODED, code::LE_CODED)
        } else if self.contains(AdvOptions::NO_2M) {
            (code::LE_1M, code::LE_1M)
        } else {
            (code::LE_1M, code::LE_2M)
        }
    }

    /// Options for a test channel.
    #[must_use]
    pub const fn for_channel(channel: Channel) -> AdvOptions {
        let extended = AdvOptions::USE_TX_POWER
            .union(AdvOptions::ANONYMOUS)
            .union(AdvOptions::EXT_ADV);
        match channel {
            Channel::Le2M => extended,
            Channel::Le1M => extended.union(AdvOptions::NO_2M),
            Channel::CodedS8 => extended
                .union(AdvOptions::NO_2M)
                .union(AdvOptions::CODED),
            Channel::Legacy => AdvOptions::USE_IDENTITY,
        }
    }
}

/// Parameters for one advertising set.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvParams {
    pub id: u8,
    pub options: AdvOptions,
    /// Minimum interval in 0.625 ms units.
    pub interval_min: u16,
    /// Maximum interval in 0.625 ms units.
    pub interval_max: u16,
}

impl AdvParams {
    /// Parameters a set is created with before its first explicit update.
    pub const DEFAULT: AdvParams = AdvParams {
        id: 0,
        options: AdvOptions::EXT_ADV,
        interval_min: ms_to_units(INTERVAL_PRESETS_MS[CONTROL_INTERVAL_GROUP].0),
        interval_max: ms_to_units(INTERVAL_PRESETS_MS[CONTROL_INTERVAL_GROUP].1),
    };

    /// Preset parameters for `channel` in interval `group`.
    #[must_use]
    pub fn for_channel(group: usize, channel: Channel, non_anonymous: bool) -> Option<Self> {
        let (min_ms, max_ms) = *INTERVAL_PRESETS_MS.get(group)?;
        let options = AdvOptions::for_channel(channel);
        let id = u8::try_from(channel.index() + 1).ok()?;
        Some(Self {
            id,
            options: if non_anonymous {
                options.with_identity()
            } else {
                options
            },
            interval_min: ms_to_units(min_ms),
            interval_max: ms_to_units(max_ms),
        })
    }

    #[must_use]
    pub const fn phys(&self) -> (u8, u8) {
        self.options.phys()
    }

    /// Midpoint of the interval range.
    #[must_use]
    pub fn nominal_interval(&self) -> Duration {
        let units = (u64::from(self.interval_min) + u64::from(self.interval_max)) / 2;
        Duration::from_micros(units * 625)
    }
}

/// Converts milliseconds to 0.625 ms radio units.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn ms_to_units(ms: u16) -> u16 {
    (ms as u32 * 16 / 10) as u16
}

/// Bounds on a started advertising set. Zero means unbounded.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartParams {
    /// Timeout in 10 ms units.
    pub timeout: u16,
    pub max_events: u8,
}

impl StartParams {
    pub const CONTINUOUS: StartParams = StartParams {
        timeout: 0,
        max_events: 0,
    };
    /// One full burst.
    #[allow(clippy::cast_possible_truncation)]
    pub const BURST: StartParams = StartParams {
        timeout: 0,
        max_events: BURST_COUNT as u8,
    };

    /// Start bounded by `duration`.
    #[must_use]
    pub fn timed(duration: Duration) -> Self {
        Self {
            timeout: u16::try_from(duration.as_millis() / 10).unwrap_or(u16::MAX),
            max_events: 0,
        }
    }

    /// Start bounded by an event count.
    #[must_use]
    pub const fn events(count: u8) -> Self {
        Self {
            timeout: 0,
            max_events: count,
        }
    }

    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.timeout != 0 || self.max_events != 0
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        (self.timeout != 0).then(|| Duration::from_millis(u64::from(self.timeout) * 10))
    }
}

/// Set of enabled logical channels.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelSet([bool; CHANNEL_COUNT]);

impl ChannelSet {
    pub const NONE: ChannelSet = ChannelSet([false; CHANNEL_COUNT]);
    pub const ALL: ChannelSet = ChannelSet([true; CHANNEL_COUNT]);

    #[must_use]
    pub const fn only(channel: Channel) -> Self {
        let mut set = [false; CHANNEL_COUNT];
        set[channel.index()] = true;
        ChannelSet(set)
    }

    #[must_use]
    pub const fn contains(&self, channel: Channel) -> bool {
        self.0[channel.index()]
    }

    pub fn set(&mut self, channel: Channel, enabled: bool) {
        self.0[channel.index()] = enabled;
    }

    #[must_use]
    pub fn with(mut self, channel: Channel, enabled: bool) -> Self {
        self.set(channel, enabled);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|enabled| *enabled)
    }

    /// Enabled channels in issue order.
    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL
            .into_iter()
            .filter(move |channel| self.contains(*channel))
    }
}

/// Rejected configuration values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    IntervalIndex(u8),
    CountIndex(u8),
    TxPower(i8),
    NoChannels,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IntervalIndex(index) => {
                write!(f, "interval preset {index} out of range (0-10)")
            }
            ConfigError::CountIndex(index) => write!(f, "count preset {index} out of range (0-6)"),
            ConfigError::TxPower(dbm) => write!(f, "tx power {dbm} dBm is not a preset level"),
            ConfigError::NoChannels => f.write_str("no test channel enabled"),
        }
    }
}

/// Snapshot of the operator's settings, fixed for the duration of a round.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TestConfig {
    pub tx_power_dbm: i8,
    pub interval_index: u8,
    pub count_index: u8,
    pub channels: ChannelSet,
    pub inhibit: AdvChannelInhibit,
    pub non_anonymous: bool,
    pub ignore_response: bool,
    /// Sender waits [`EngineTiming::delayed_start`] before its first burst.
    pub delayed_start: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm: 0,
            interval_index: 0,
            count_index: 0,
            channels: ChannelSet::ALL,
            inhibit: AdvChannelInhibit::default(),
            non_anonymous: false,
            ignore_response: false,
            delayed_start: false,
        }
    }
}

impl TestConfig {
    /// # Errors
    ///
    /// Returns the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if usize::from(self.interval_index) >= INTERVAL_PRESETS_MS.len() {
            return Err(ConfigError::IntervalIndex(self.interval_index));
        }
        if usize::from(self.count_index) >= COUNT_PRESETS.len() {
            return Err(ConfigError::CountIndex(self.count_index));
        }
        if !TX_POWER_PRESETS.contains(&self.tx_power_dbm) {
            return Err(ConfigError::TxPower(self.tx_power_dbm));
        }
        Ok(())
    }

    /// Configured `(min, max)` interval in milliseconds.
    #[must_use]
    pub fn interval_ms(&self) -> (u16, u16) {
        INTERVAL_PRESETS_MS
            .get(usize::from(self.interval_index))
            .copied()
            .unwrap_or(INTERVAL_PRESETS_MS[0])
    }

    /// Packets per channel the sender must deliver.
    #[must_use]
    pub fn target_count(&self) -> u16 {
        COUNT_PRESETS
            .get(usize::from(self.count_index))
            .copied()
            .unwrap_or(COUNT_PRESETS[0])
    }

    /// Longest a burst can take at the configured interval.
    #[must_use]
    pub fn burst_period(&self) -> Duration {
        let (_, max_ms) = self.interval_ms();
        Duration::from_millis(u64::from(BURST_COUNT) * u64::from(max_ms))
    }

    /// Burst parameters for `channel` at the configured interval.
    #[must_use]
    pub fn burst_params(&self, channel: Channel) -> Option<AdvParams> {
        AdvParams::for_channel(usize::from(self.interval_index), channel, self.non_anonymous)
    }

    /// Countdown/report parameters for `channel`.
    #[must_use]
    pub fn control_params(&self, channel: Channel) -> Option<AdvParams> {
        AdvParams::for_channel(CONTROL_INTERVAL_GROUP, channel, self.non_anonymous)
    }
}

/// Operational tuning constants. The defaults match deployed behavior.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineTiming {
    /// Scanner inactivity limit while listening on every PHY.
    pub heartbeat: Duration,
    /// Scanner inactivity limit while listening on a single PHY.
    pub heartbeat_restricted: Duration,
    /// Seconds counted down before each burst.
    pub countdown_secs: u8,
    /// Window after a burst for receivers to echo the record.
    pub report_window: Duration,
    /// Time every channel must stay complete before the scanner stops.
    pub completion_hold: Duration,
    /// Scanner leaves a listen window when no channel has been active this long.
    pub idle_exit: Duration,
    /// Bounded broadcast of the complete tag on finalize.
    pub finalize_broadcast: Duration,
    /// Broadcast of the scaled flow counter once finalize ends.
    pub post_finalize_broadcast: Duration,
    /// Events per channel in manual number-cast mode.
    pub numcast_manual_events: u8,
    /// Lifetime of an environment monitor sample.
    pub env_sample_lifetime: Duration,
    /// Lifetime of a number-cast sample.
    pub numcast_sample_lifetime: Duration,
    /// Minimum spacing between number-cast RSSI recalculations.
    pub numcast_recalc_period: Duration,
    /// Settle time after a sender or scanner is activated.
    pub settle: Duration,
    /// Delay before the first scanner step.
    pub scanner_pre_delay: Duration,
    /// Delay before the first sender step.
    pub sender_pre_delay: Duration,
    /// Sender pre-delay when a delayed start is requested.
    pub delayed_start: Duration,
    /// Sleep between polls inside a wait.
    pub poll_tick: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(10),
            heartbeat_restricted: Duration::from_secs(30),
            countdown_secs: 3,
            report_window: Duration::from_millis(100),
            completion_hold: Duration::from_secs(10),
            idle_exit: Duration::from_millis(800),
            finalize_broadcast: Duration::from_secs(3),
            post_finalize_broadcast: Duration::from_secs(5),
            numcast_manual_events: 10,
            env_sample_lifetime: Duration::from_secs(60),
            numcast_sample_lifetime: Duration::from_secs(5),
            numcast_recalc_period: Duration::from_millis(50),
            settle: Duration::from_secs(1),
            scanner_pre_delay: Duration::from_secs(1),
            sender_pre_delay: Duration::from_secs(3),
            delayed_start: Duration::from_secs(20),
            poll_tick: Duration::from_millis(10),
        }
    }
}

/// Cooperative cancellation, polled on every wait iteration of the running mode.
pub trait AbortPredicate {
    fn should_abort(&mut self, mode: Mode) -> bool;
}

/// Predicate that never aborts; the token release is then the only way out.
#[derive(Copy, Clone, Debug, Default)]
pub struct NeverAbort;

impl AbortPredicate for NeverAbort {
    fn should_abort(&mut self, _mode: Mode) -> bool {
        false
    }
}

impl<F> AbortPredicate for F
where
    F: FnMut(Mode) -> bool,
{
    fn should_abort(&mut self, mode: Mode) -> bool {
        self(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_units_follow_radio_resolution() {
        let params = AdvParams::for_channel(3, Channel::Le1M, false).expect("group 3");
        assert_eq!(params.interval_min, 160);
        assert_eq!(params.interval_max, 240);
        assert_eq!(params.id, 2);
        assert_eq!(params.nominal_interval(), Duration::from_millis(125));
        assert!(AdvParams::for_channel(11, Channel::Le1M, false).is_none());
    }

    #[test]
    fn channel_options_map_to_their_phys() {
        for channel in Channel::ALL {
            assert_eq!(AdvOptions::for_channel(channel).phys(), channel.phy_pair());
        }
    }

    #[test]
    fn identity_option_replaces_anonymous() {
        let options = AdvOptions::for_channel(Channel::Le2M).with_identity();
        assert!(!options.contains(AdvOptions::ANONYMOUS));
        assert!(options.contains(AdvOptions::USE_IDENTITY));
        assert!(options.contains(AdvOptions::EXT_ADV));
    }

    #[test]
    fn start_params_bounds() {
        assert!(!StartParams::CONTINUOUS.is_bounded());
        assert_eq!(StartParams::BURST.max_events, 250);
        let finalize = StartParams::timed(Duration::from_secs(3));
        assert_eq!(finalize.timeout, 300);
        assert_eq!(finalize.duration(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn validate_checks_preset_ranges() {
        let mut config = TestConfig::default();
        assert_eq!(config.validate(), Ok(()));
        config.interval_index = 11;
        assert_eq!(config.validate(), Err(ConfigError::IntervalIndex(11)));
        config.interval_index = 10;
        config.count_index = 7;
        assert_eq!(config.validate(), Err(ConfigError::CountIndex(7)));
        config.count_index = 6;
        config.tx_power_dbm = 12;
        assert_eq!(config.validate(), Err(ConfigError::TxPower(12)));
        config.tx_power_dbm = 5;
        assert_eq!(config.validate(), Err(ConfigError::TxPower(5)));
        config.tx_power_dbm = -16;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn burst_period_scales_with_interval() {
        let config = TestConfig {
            interval_index: 3,
            ..TestConfig::default()
        };
        assert_eq!(config.burst_period(), Duration::from_millis(250 * 150));
        assert_eq!(config.target_count(), 500);
    }

    #[test]
    fn channel_set_iterates_in_issue_order() {
        let set = ChannelSet::NONE
            .with(Channel::Legacy, true)
            .with(Channel::Le2M, true);
        let mut order = set.iter();
        assert_eq!(order.next(), Some(Channel::Le2M));
        assert_eq!(order.next(), Some(Channel::Legacy));
        assert_eq!(order.next(), None);
        assert!(ChannelSet::NONE.is_empty());
    }

    #[test]
    fn closures_act_as_abort_predicates() {
        let mut calls = 0;
        let mut predicate = |mode: Mode| {
            calls += 1;
            mode == Mode::Scanner
        };
        assert!(!predicate.should_abort(Mode::Sender));
        assert!(predicate.should_abort(Mode::Scanner));
        assert_eq!(calls, 2);
    }
}
