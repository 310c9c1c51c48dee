//! Operator console shared by front-ends.
//!
//! [`grammar`] turns a line into a [`grammar::Command`]; this module applies
//! the commands that only touch a [`TestConfig`] and renders help and
//! settings text. Driving the engine itself is left to the front-end.

pub mod catalog;
pub mod grammar;

use core::fmt;

use self::grammar::{Setting, SettingKey};
use crate::config::{ConfigError, INTERVAL_PRESETS_MS, TestConfig};
use crate::phy::Channel;

/// A `set` command the configuration cannot take.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SettingError {
    /// Value outside what the key's field can hold.
    OutOfRange { key: SettingKey, value: i64 },
    /// Value fits the field but the resulting configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::OutOfRange { key, value } => {
                write!(f, "{value} is not a valid {key}")
            }
            SettingError::Config(error) => error.fmt(f),
        }
    }
}

impl From<ConfigError> for SettingError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

/// Applies `setting` to `config`. On error `config` is left unchanged.
///
/// Channel and flag keys take `0` or `1`.
///
/// # Errors
///
/// Returns [`SettingError`] when the value does not fit or the updated
/// configuration fails [`TestConfig::validate`]. An empty channel set is
/// accepted here; starting a mode rejects it.
pub fn apply_setting(config: &mut TestConfig, setting: Setting) -> Result<(), SettingError> {
    let Setting { key, value } = setting;
    let out_of_range = SettingError::OutOfRange { key, value };
    let flag = || match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(out_of_range),
    };

    let mut updated = *config;
    match key {
        SettingKey::TxPower => {
            updated.tx_power_dbm = i8::try_from(value).map_err(|_| out_of_range)?;
        }
        SettingKey::Interval => {
            updated.interval_index = u8::try_from(value).map_err(|_| out_of_range)?;
        }
        SettingKey::Count => {
            updated.count_index = u8::try_from(value).map_err(|_| out_of_range)?;
        }
        SettingKey::Le2M => updated.channels.set(Channel::Le2M, flag()?),
        SettingKey::Le1M => updated.channels.set(Channel::Le1M, flag()?),
        SettingKey::Coded => updated.channels.set(Channel::CodedS8, flag()?),
        SettingKey::Legacy => updated.channels.set(Channel::Legacy, flag()?),
        SettingKey::Ch37 => updated.inhibit.ch37 = flag()?,
        SettingKey::Ch38 => updated.inhibit.ch38 = flag()?,
        SettingKey::Ch39 => updated.inhibit.ch39 = flag()?,
        SettingKey::Identity => updated.non_anonymous = flag()?,
        SettingKey::Ignore => updated.ignore_response = flag()?,
        SettingKey::Delayed => updated.delayed_start = flag()?,
    }

    match updated.validate() {
        Ok(()) | Err(ConfigError::NoChannels) => {
            *config = updated;
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Writes the command list, or the usage of `topic` when given.
///
/// # Errors
///
/// Propagates errors from `out`.
pub fn write_help<W>(out: &mut W, topic: Option<&str>) -> fmt::Result
where
    W: fmt::Write + ?Sized,
{
    match topic {
        None => {
            for spec in catalog::commands() {
                writeln!(out, "  {:<44} {}", spec.usage, spec.summary)?;
            }
            Ok(())
        }
        Some(name) => match catalog::find(name) {
            Some(spec) => writeln!(out, "usage: {}\n  {}", spec.usage, spec.summary),
            None => writeln!(out, "no such command: {name}"),
        },
    }
}

/// Writes one `key=value` pair per line, in the same keys `set` accepts.
///
/// # Errors
///
/// Propagates errors from `out`.
pub fn write_settings<W>(out: &mut W, config: &TestConfig) -> fmt::Result
where
    W: fmt::Write + ?Sized,
{
    let (min_ms, max_ms) = config.interval_ms();
    writeln!(out, "txpower={} dBm", config.tx_power_dbm)?;
    writeln!(
        out,
        "interval={} ({min_ms}-{max_ms} ms of {} presets)",
        config.interval_index,
        INTERVAL_PRESETS_MS.len()
    )?;
    writeln!(
        out,
        "count={} ({} packets per channel)",
        config.count_index,
        config.target_count()
    )?;
    for (key, channel) in [
        (SettingKey::Le2M, Channel::Le2M),
        (SettingKey::Le1M, Channel::Le1M),
        (SettingKey::Coded, Channel::CodedS8),
        (SettingKey::Legacy, Channel::Legacy),
    ] {
        writeln!(out, "{key}={}", u8::from(config.channels.contains(channel)))?;
    }
    for (key, inhibited) in [
        (SettingKey::Ch37, config.inhibit.ch37),
        (SettingKey::Ch38, config.inhibit.ch38),
        (SettingKey::Ch39, config.inhibit.ch39),
    ] {
        writeln!(out, "{key}={}", u8::from(inhibited))?;
    }
    writeln!(out, "identity={}", u8::from(config.non_anonymous))?;
    writeln!(out, "ignore={}", u8::from(config.ignore_response))?;
    writeln!(out, "delayed={}", u8::from(config.delayed_start))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use heapless::String;

    use super::*;

    fn set(config: &mut TestConfig, key: SettingKey, value: i64) -> Result<(), SettingError> {
        apply_setting(config, Setting { key, value })
    }

    #[test]
    fn applies_channel_and_flag_keys() {
        let mut config = TestConfig::default();
        set(&mut config, SettingKey::Coded, 0).expect("coded off");
        set(&mut config, SettingKey::Ch38, 1).expect("inhibit 38");
        set(&mut config, SettingKey::Ignore, 1).expect("ignore responses");

        assert!(!config.channels.contains(Channel::CodedS8));
        assert!(config.channels.contains(Channel::Le1M));
        assert!(config.inhibit.ch38);
        assert!(config.ignore_response);
    }

    #[test]
    fn rejects_out_of_range_values_without_changes() {
        let mut config = TestConfig::default();
        let before = config;

        assert_eq!(
            set(&mut config, SettingKey::Le1M, 2),
            Err(SettingError::OutOfRange {
                key: SettingKey::Le1M,
                value: 2,
            })
        );
        assert_eq!(
            set(&mut config, SettingKey::TxPower, 300),
            Err(SettingError::OutOfRange {
                key: SettingKey::TxPower,
                value: 300,
            })
        );
        assert_eq!(
            set(&mut config, SettingKey::TxPower, 20),
            Err(SettingError::Config(ConfigError::TxPower(20)))
        );
        assert_eq!(
            set(&mut config, SettingKey::TxPower, -35),
            Err(SettingError::Config(ConfigError::TxPower(-35)))
        );
        assert_eq!(
            set(&mut config, SettingKey::Interval, 11),
            Err(SettingError::Config(ConfigError::IntervalIndex(11)))
        );
        assert_eq!(config, before);
    }

    #[test]
    fn disabling_every_channel_is_allowed() {
        let mut config = TestConfig::default();
        for key in [
            SettingKey::Le2M,
            SettingKey::Le1M,
            SettingKey::Coded,
            SettingKey::Legacy,
        ] {
            set(&mut config, key, 0).expect("channel off");
        }
        assert!(config.channels.is_empty());
    }

    #[test]
    fn help_lists_every_command() {
        let mut text: String<2048> = String::new();
        write_help(&mut text, None).expect("write");
        for spec in catalog::commands() {
            assert!(text.contains(spec.usage), "missing {}", spec.name);
        }

        let mut text: String<2048> = String::new();
        write_help(&mut text, Some("bogus")).expect("write");
        assert_eq!(text.as_str(), "no such command: bogus\n");
    }

    #[test]
    fn settings_round_trip_through_set_keys() {
        let mut config = TestConfig::default();
        set(&mut config, SettingKey::Legacy, 0).expect("legacy off");
        let mut text: String<2048> = String::new();
        write_settings(&mut text, &config).expect("write");
        assert!(text.contains("legacy=0\n"));
        assert!(text.contains("le1m=1\n"));
        assert!(text.contains("count=0 (500 packets per channel)\n"));
    }
}
