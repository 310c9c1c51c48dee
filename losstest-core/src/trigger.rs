//! Single-owner activation token shared by the four test modes.

use core::fmt;

/// A test mode that can own the radio.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Sender,
    Scanner,
    Numcast,
    EnvMon,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Sender, Mode::Scanner, Mode::Numcast, Mode::EnvMon];

    /// Numeric identifier used by the token protocol.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Mode::Sender => 1,
            Mode::Scanner => 2,
            Mode::Numcast => 3,
            Mode::EnvMon => 4,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Sender => "sender",
            Mode::Scanner => "scanner",
            Mode::Numcast => "numcast",
            Mode::EnvMon => "envmon",
        })
    }
}

/// What a caller wants from the token.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TriggerRequest {
    /// Take the token if it is free.
    Acquire,
    /// Give the token back if held.
    Release,
    /// Read only.
    Query,
}

impl TriggerRequest {
    /// Maps the signed request convention: positive acquires, negative releases.
    #[must_use]
    pub const fn from_signed(request: i8) -> Self {
        match request {
            r if r > 0 => TriggerRequest::Acquire,
            r if r < 0 => TriggerRequest::Release,
            _ => TriggerRequest::Query,
        }
    }
}

/// How a mode relates to the token.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskStatus {
    Idle,
    Running,
    /// Another mode owns the token.
    Blocked,
}

/// The token itself. At most one mode owns it at any time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskTrigger {
    owner: Option<Mode>,
}

impl TaskTrigger {
    #[must_use]
    pub const fn new() -> Self {
        Self { owner: None }
    }

    #[must_use]
    pub const fn owner(&self) -> Option<Mode> {
        self.owner
    }

    #[must_use]
    pub fn is_held_by(&self, mode: Mode) -> bool {
        self.owner == Some(mode)
    }

    /// Applies `request` on behalf of `mode` and returns the resulting owner.
    ///
    /// Acquire succeeds only when the token is free. Release only clears the
    /// token when `mode` holds it.
    pub fn trigger(&mut self, mode: Mode, request: TriggerRequest) -> Option<Mode> {
        match request {
            TriggerRequest::Acquire if self.owner.is_none() => self.owner = Some(mode),
            TriggerRequest::Release if self.owner == Some(mode) => self.owner = None,
            _ => {}
        }
        self.owner
    }

    /// `true` when `mode` now owns the token.
    pub fn acquire(&mut self, mode: Mode) -> bool {
        self.trigger(mode, TriggerRequest::Acquire) == Some(mode)
    }

    /// `true` when `mode` owned the token and gave it back.
    pub fn release(&mut self, mode: Mode) -> bool {
        let held = self.is_held_by(mode);
        self.trigger(mode, TriggerRequest::Release);
        held
    }

    #[must_use]
    pub fn status(&self, mode: Mode) -> TaskStatus {
        match self.owner {
            None => TaskStatus::Idle,
            Some(owner) if owner == mode => TaskStatus::Running,
            Some(_) => TaskStatus::Blocked,
        }
    }
}
