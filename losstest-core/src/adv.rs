//! Lifecycle of the five advertising targets.

use crate::config::{AdvParams, StartParams};
use crate::radio::{Radio, RadioError, TARGET_COUNT, TargetId};

/// Where an advertising set is in its lifecycle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetStatus {
    /// Not created on the controller yet.
    #[default]
    Uninitialized,
    /// Created, never started.
    Configured,
    Running,
    Stopped,
}

#[derive(Copy, Clone, Debug)]
struct TargetState {
    status: TargetStatus,
    /// Parameters or data written but not yet accepted by the radio.
    dirty: bool,
    params: AdvParams,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            status: TargetStatus::Uninitialized,
            dirty: false,
            params: AdvParams::DEFAULT,
        }
    }
}

/// Tracks every target's status and pushes updates to the radio.
#[derive(Clone, Debug, Default)]
pub struct AdvTargets {
    targets: [TargetState; TARGET_COUNT],
}

impl AdvTargets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self, target: TargetId) -> TargetStatus {
        self.targets[target.index()].status
    }

    #[must_use]
    pub fn is_dirty(&self, target: TargetId) -> bool {
        self.targets[target.index()].dirty
    }

    #[must_use]
    pub fn params(&self, target: TargetId) -> AdvParams {
        self.targets[target.index()].params
    }

    #[must_use]
    pub fn is_initialized(&self, target: TargetId) -> bool {
        self.status(target) != TargetStatus::Uninitialized
    }

    /// Creates the target on first use, applies `params` when given, writes
    /// `data` and starts the target unless it is already running without new
    /// start parameters.
    ///
    /// Every step is attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`RadioError`] raised by the radio.
    pub fn update<R: Radio>(
        &mut self,
        radio: &mut R,
        target: TargetId,
        params: Option<&AdvParams>,
        data: &[u8],
        start: Option<StartParams>,
    ) -> Result<(), RadioError> {
        let state = &mut self.targets[target.index()];

        if state.status == TargetStatus::Uninitialized {
            radio.create(target, &state.params)?;
            state.status = TargetStatus::Configured;
        }

        let mut first_error = None;
        let push_params = match params {
            Some(params) => {
                state.params = *params;
                true
            }
            None => state.dirty,
        };

        if push_params {
            if state.status == TargetStatus::Running {
                // Parameters can only change while stopped.
                if let Err(error) = radio.stop(target) {
                    first_error.get_or_insert(error);
                }
                state.status = TargetStatus::Stopped;
            }
            if let Err(error) = radio.update_params(target, &state.params) {
                first_error.get_or_insert(error);
            }
        }

        if let Err(error) = radio.set_data(target, data) {
            first_error.get_or_insert(error);
        }

        if state.status != TargetStatus::Running || start.is_some() {
            match radio.start(target, start.unwrap_or(StartParams::CONTINUOUS)) {
                Ok(()) => state.status = TargetStatus::Running,
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        state.dirty = first_error.is_some();
        first_error.map_or(Ok(()), Err)
    }

    /// Writes `data` without starting the target.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::NotInitialized`] for a target that was never created.
    pub fn refresh_data<R: Radio>(
        &mut self,
        radio: &mut R,
        target: TargetId,
        data: &[u8],
    ) -> Result<(), RadioError> {
        let state = &mut self.targets[target.index()];
        if state.status == TargetStatus::Uninitialized {
            return Err(RadioError::NotInitialized);
        }
        let result = radio.set_data(target, data);
        state.dirty |= result.is_err();
        result
    }

    /// Stops `target` if it was ever created and marks it stopped, even when
    /// the radio refuses.
    ///
    /// # Errors
    ///
    /// Returns the radio's error from stopping the set.
    pub fn stop<R: Radio>(&mut self, radio: &mut R, target: TargetId) -> Result<(), RadioError> {
        let state = &mut self.targets[target.index()];
        if state.status == TargetStatus::Uninitialized {
            return Ok(());
        }
        state.status = TargetStatus::Stopped;
        radio.stop(target)
    }

    /// Stops every running target.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the remaining targets are still stopped.
    pub fn stop_all<R: Radio>(&mut self, radio: &mut R) -> Result<(), RadioError> {
        let mut first_error = None;
        for target in TargetId::all() {
            if self.status(target) != TargetStatus::Running {
                continue;
            }
            if let Err(error) = self.stop(radio, target) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Radio reported that a bounded start finished.
    pub fn on_sent(&mut self, target: TargetId) {
        let state = &mut self.targets[target.index()];
        if state.status == TargetStatus::Running {
            state.status = TargetStatus::Stopped;
        }
    }

    /// Applies a channel map to an initialized target.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::NotInitialized`] for a target that was never created.
    pub fn set_channel_map<R: Radio>(
        &self,
        radio: &mut R,
        target: TargetId,
        map: crate::phy::ChannelMap,
    ) -> Result<(), RadioError> {
        if !self.is_initialized(target) {
            return Err(RadioError::NotInitialized);
        }
        radio.set_channel_map(target, map)
    }
}
