//! Round engines and the poller that drives them.
//!
//! [`LossTest`] owns the radio, the clock and the state of all four modes. A
//! host hands the trigger token to a mode with [`LossTest::start`] and then
//! calls [`LossTest::poll`] until the mode reports that it is done. Each poll
//! drains pending radio events and runs one step of the active mode; a step
//! waits on the [`Clock`] internally, draining events on every tick, so a
//! single sender or scanner step can span several seconds.
//!
//! Releasing the token from outside (see [`LossTest::trigger`]) counts as an
//! abort: the next poll runs the mode's cleanup and reports
//! [`StepResult::Aborted`].

mod envmon;
mod numcast;
mod receive;
mod scanner;
mod sender;

use core::fmt;
use core::time::Duration;

pub use self::numcast::NumcastSnapshot;

use crate::adv::{AdvTargets, TargetStatus};
use crate::clock::Clock;
use crate::codec::DeviceInfo;
use crate::codec::payload::{self, DEFAULT_STATUS_NAME, DeviceName};
use crate::config::{
    AbortPredicate, AdvParams, ChannelSet, ConfigError, EngineTiming, NeverAbort, StartParams,
    TestConfig,
};
use crate::phy::{CHANNEL_COUNT, Channel, channel_bitmap};
use crate::radio::{Radio, RadioError, RadioEvent, ScanMethod, TargetId};
use crate::status::StatusBoard;
use crate::telemetry::{
    LogLevel, LogSink, NoopLogSink, TelemetryEvent, TelemetryInstant, TelemetryRecorder,
};
use crate::trigger::{Mode, TaskStatus, TaskTrigger, TriggerRequest};

/// Outcome of one step of a mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepResult {
    /// Call again.
    Continue,
    /// The mode finished on its own.
    Done,
    /// The mode was interrupted.
    Aborted,
}

impl StepResult {
    /// Signed convention used on the wire to hosts: `1`, `0`, `-1`.
    #[must_use]
    pub const fn code(self) -> i8 {
        match self {
            StepResult::Continue => 1,
            StepResult::Done => 0,
            StepResult::Aborted => -1,
        }
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepResult::Continue => "continue",
            StepResult::Done => "done",
            StepResult::Aborted => "aborted",
        })
    }
}

/// Where a channel is within a round, as seen by the sender or the scanner.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelPhase {
    #[default]
    Idle,
    Countdown,
    Burst,
    Report,
}

/// Why a mode could not be started.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartError {
    /// Another mode holds the token or is still winding down.
    Busy(Mode),
    Config(ConfigError),
    Radio(RadioError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Busy(mode) => write!(f, "{mode} is running"),
            StartError::Config(error) => write!(f, "invalid configuration: {error}"),
            StartError::Radio(error) => write!(f, "setup failed: {error}"),
        }
    }
}

impl From<ConfigError> for StartError {
    fn from(error: ConfigError) -> Self {
        StartError::Config(error)
    }
}

impl From<RadioError> for StartError {
    fn from(error: RadioError) -> Self {
        StartError::Radio(error)
    }
}

/// How a wait ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum WaitOutcome {
    Elapsed,
    Satisfied,
    Aborted,
}

/// A wait was cut short by an abort.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Interrupted;

impl WaitOutcome {
    fn checked(self) -> Result<Self, Interrupted> {
        match self {
            WaitOutcome::Aborted => Err(Interrupted),
            outcome => Ok(outcome),
        }
    }
}

/// The node's 8-byte device address and what is derived from it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeIdentity {
    address: [u8; 8],
}

impl NodeIdentity {
    #[must_use]
    pub const fn new(address: [u8; 8]) -> Self {
        Self { address }
    }

    #[must_use]
    pub const fn address(&self) -> [u8; 8] {
        self.address
    }

    /// Node number printed in names and log lines.
    #[must_use]
    pub const fn node(&self) -> u8 {
        self.address[0]
    }

    /// Identifier carried in every record; its low 16 bits tell senders apart.
    #[must_use]
    pub const fn eui64(&self) -> u64 {
        u64::from_le_bytes(self.address)
    }
}

/// The packet-loss test engine for one node.
pub struct LossTest<R, C, A = NeverAbort, L = NoopLogSink>
where
    C: Clock,
{
    radio: R,
    clock: C,
    sink: L,
    timing: EngineTiming,
    abort: Option<A>,
    trigger: TaskTrigger,
    active: Option<Mode>,
    resume_at: Option<C::Instant>,
    config: TestConfig,
    identity: Option<NodeIdentity>,
    status_name: DeviceName,
    targets: AdvTargets,
    scan: Option<ScanMethod>,
    forms: [DeviceInfo; CHANNEL_COUNT],
    board: StatusBoard,
    telemetry: TelemetryRecorder<C::Instant>,
    sender: sender::SenderState,
    scanner: scanner::ScannerState<C::Instant>,
    numcast: numcast::NumcastState<C::Instant>,
    envmon: envmon::EnvMonState<C::Instant>,
}

impl<R, C, A, L> LossTest<R, C, A, L>
where
    R: Radio,
    C: Clock,
    A: AbortPredicate,
    L: LogSink,
{
    pub fn new(radio: R, clock: C, timing: EngineTiming, sink: L) -> Self {
        Self {
            radio,
            clock,
            sink,
            timing,
            abort: None,
            trigger: TaskTrigger::new(),
            active: None,
            resume_at: None,
            config: TestConfig::default(),
            identity: None,
            status_name: DeviceName::new(),
            targets: AdvTargets::new(),
            scan: None,
            forms: [DeviceInfo::new(0); CHANNEL_COUNT],
            board: StatusBoard::new(),
            telemetry: TelemetryRecorder::new(),
            sender: sender::SenderState::default(),
            scanner: scanner::ScannerState::new(),
            numcast: numcast::NumcastState::new(timing.numcast_sample_lifetime),
            envmon: envmon::EnvMonState::new(timing.env_sample_lifetime),
        }
    }

    /// Records the node identity and derives the records, names and local
    /// number-cast form from it. Later calls are ignored.
    pub fn init(&mut self, address: [u8; 8]) {
        if self.identity.is_some() {
            return;
        }
        let identity = NodeIdentity::new(address);
        self.status_name =
            payload::status_name(DEFAULT_STATUS_NAME, identity.node()).unwrap_or_default();
        self.forms = [DeviceInfo::new(identity.eui64()); CHANNEL_COUNT];
        self.numcast.reset_local(&address);
        self.identity = Some(identity);
    }

    #[must_use]
    pub fn identity(&self) -> Option<NodeIdentity> {
        self.identity
    }

    /// Acquires the token for `mode`, stops the channel targets and runs the
    /// mode's setup. The token is released again when setup fails.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::Busy`] when another mode holds the token,
    /// [`StartError::Config`] for an invalid configuration and
    /// [`StartError::Radio`] when the engine is not initialized or setup fails.
    pub fn start(&mut self, mode: Mode, config: TestConfig, abort: A) -> Result<(), StartError> {
        if self.identity.is_none() {
            return Err(RadioError::NotInitialized.into());
        }
        config.validate()?;
        if matches!(mode, Mode::Sender | Mode::Scanner) && config.channels.is_empty() {
            return Err(ConfigError::NoChannels.into());
        }
        if let Some(active) = self.active {
            return Err(StartError::Busy(active));
        }
        if !self.trigger.acquire(mode) {
            return Err(StartError::Busy(self.trigger.owner().unwrap_or(mode)));
        }

        self.config = config;
        self.abort = Some(abort);
        self.stop_channel_targets();

        let setup = match mode {
            Mode::Sender => self.sender_setup(),
            Mode::Scanner => self.scanner_setup(),
            Mode::Numcast => self.numcast_setup(),
            Mode::EnvMon => self.envmon_setup(),
        };
        if let Err(error) = setup {
            self.trigger.release(mode);
            self.abort = None;
            return Err(error.into());
        }

        self.active = Some(mode);
        self.resume_at = self.start_delay(mode).map(|delay| self.clock.now() + delay);
        Ok(())
    }

    fn start_delay(&self, mode: Mode) -> Option<Duration> {
        let timing = &self.timing;
        match mode {
            Mode::Sender if self.config.delayed_start => Some(timing.settle + timing.delayed_start),
            Mode::Sender => Some(timing.settle + timing.sender_pre_delay),
            Mode::Scanner => Some(timing.settle + timing.scanner_pre_delay),
            Mode::Numcast | Mode::EnvMon => None,
        }
    }

    /// Drains radio events and runs one step of the active mode.
    ///
    /// Returns `None` when no mode is active. The token is released once the
    /// step reports [`StepResult::Done`] or [`StepResult::Aborted`].
    pub fn poll(&mut self) -> Option<(Mode, StepResult)> {
        self.pump_events();
        let mode = self.active?;

        if let Some(resume_at) = self.resume_at.take() {
            if self.sleep_until(resume_at, Some(mode)) == WaitOutcome::Aborted {
                if mode == Mode::Sender {
                    self.sender_finalize();
                } else {
                    self.stop_scan();
                }
                self.finish(mode, StepResult::Aborted);
                return Some((mode, StepResult::Aborted));
            }
        }

        let result = match mode {
            Mode::Sender => self.sender_step(),
            Mode::Scanner => self.scanner_step(),
            Mode::Numcast => self.numcast_step(),
            Mode::EnvMon => self.envmon_step(),
        };

        if result == StepResult::Continue {
            let tick = self.timing.poll_tick;
            self.clock.pause(tick);
        } else {
            self.finish(mode, result);
        }
        Some((mode, result))
    }

    fn finish(&mut self, mode: Mode, result: StepResult) {
        self.active = None;
        self.resume_at = None;
        self.abort = None;
        self.trigger.release(mode);
        self.log(
            LogLevel::Info,
            TelemetryEvent::ModeFinished(mode),
            format_args!("{mode} {result}"),
        );
    }

    /// Raw token access. Releasing the active mode's token aborts it on the
    /// next poll.
    pub fn trigger(&mut self, mode: Mode, request: TriggerRequest) -> Option<Mode> {
        self.trigger.trigger(mode, request)
    }

    #[must_use]
    pub fn task_status(&self, mode: Mode) -> TaskStatus {
        self.trigger.status(mode)
    }

    /// Mode that was started and has not finished yet.
    #[must_use]
    pub fn active_mode(&self) -> Option<Mode> {
        self.active
    }

    #[must_use]
    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    #[must_use]
    pub fn timing(&self) -> &EngineTiming {
        &self.timing
    }

    /// Outgoing record for `channel`.
    #[must_use]
    pub fn form(&self, channel: Channel) -> &DeviceInfo {
        &self.forms[channel.index()]
    }

    /// Status line for `channel` without its manufacturer prefix.
    #[must_use]
    pub fn status_text(&self, channel: Channel) -> &str {
        self.board.text(channel)
    }

    #[must_use]
    pub fn status_name(&self) -> &str {
        &self.status_name
    }

    #[must_use]
    pub fn target_status(&self, target: TargetId) -> TargetStatus {
        self.targets.status(target)
    }

    /// Scan filter currently applied, `None` while stopped.
    #[must_use]
    pub fn scan_method(&self) -> Option<ScanMethod> {
        self.scan
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder<C::Instant> {
        &self.telemetry
    }

    #[must_use]
    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn sink_mut(&mut self) -> &mut L {
        &mut self.sink
    }

    /// Handles every event the radio has queued.
    pub fn pump_events(&mut self) {
        while let Some(event) = self.radio.poll_event() {
            match event {
                RadioEvent::AdvSent(target) => self.on_adv_sent(target),
                RadioEvent::Report(report) => self.on_scan_report(&report),
            }
        }
    }

    /// A bounded start on `target` ended.
    ///
    /// A channel that was finalizing re-broadcasts its flow counter, scaled to
    /// the packets sent, for a few more seconds.
    pub fn on_adv_sent(&mut self, target: TargetId) {
        self.targets.on_sent(target);
        let Some(channel) = target.as_channel() else {
            return;
        };
        if !self.sender.take_finalizing(channel) {
            return;
        }
        let form = &mut self.forms[channel.index()];
        form.flow_count = if form.flow_count <= crate::codec::MAX_FLOW {
            form.flow_count.saturating_mul(crate::config::BURST_COUNT)
        } else {
            256
        };
        let start = StartParams::timed(self.timing.post_finalize_broadcast);
        self.push_channel(channel, None, Some(start));
    }

    fn node(&self) -> u8 {
        self.identity.map_or(0, |identity| identity.node())
    }

    fn abort_requested(&mut self, mode: Mode) -> bool {
        if !self.trigger.is_held_by(mode) {
            return true;
        }
        self.abort
            .as_mut()
            .is_some_and(|abort| abort.should_abort(mode))
    }

    /// Pumps events and pauses until `until` holds, `deadline` passes or, when
    /// `watch` names a mode, that mode is asked to abort.
    fn wait_until<F>(
        &mut self,
        deadline: C::Instant,
        watch: Option<Mode>,
        mut until: F,
    ) -> WaitOutcome
    where
        F: FnMut(&mut Self) -> bool,
    {
        loop {
            self.pump_events();
            if until(self) {
                return WaitOutcome::Satisfied;
            }
            let now = self.clock.now();
            if now >= deadline {
                return WaitOutcome::Elapsed;
            }
            if let Some(mode) = watch {
                if self.abort_requested(mode) {
                    return WaitOutcome::Aborted;
                }
            }
            let remaining = deadline.saturating_duration_since(now);
            let tick = self.timing.poll_tick.min(remaining);
            self.clock.pause(tick);
        }
    }

    fn sleep_until(&mut self, deadline: C::Instant, watch: Option<Mode>) -> WaitOutcome {
        self.wait_until(deadline, watch, |_| false)
    }

    fn log(&mut self, level: LogLevel, event: TelemetryEvent, args: fmt::Arguments<'_>) {
        let now = self.clock.now();
        self.telemetry.record(level, event, args, now);
        if let Some(record) = self.telemetry.latest() {
            self.sink.emit(level, event, record.line.as_str());
        }
    }

    fn report_fault(&mut self, target: TargetId, result: Result<(), RadioError>) {
        if let Err(error) = result {
            self.log(
                LogLevel::Warn,
                TelemetryEvent::RadioFault(error),
                format_args!("{target} target: {error}"),
            );
        }
    }

    /// Rebuilds the test payload for `channel` from its record and pushes it.
    fn push_channel(
        &mut self,
        channel: Channel,
        params: Option<AdvParams>,
        start: Option<StartParams>,
    ) {
        let record = self.forms[channel.index()];
        match payload::test_payload(channel, &record, self.node()) {
            Ok(data) => self.push_data(TargetId::channel(channel), params, &data, start),
            Err(error) => self.log(
                LogLevel::Warn,
                TelemetryEvent::Note,
                format_args!("{channel} payload: {error}"),
            ),
        }
    }

    fn push_data(
        &mut self,
        target: TargetId,
        params: Option<AdvParams>,
        data: &[u8],
        start: Option<StartParams>,
    ) {
        let result = self
            .targets
            .update(&mut self.radio, target, params.as_ref(), data, start);
        self.report_fault(target, result);
    }

    /// Rewrites the payload of `channel` without restarting it.
    fn refresh_channel(&mut self, channel: Channel) {
        let record = self.forms[channel.index()];
        if let Ok(data) = payload::test_payload(channel, &record, self.node()) {
            let target = TargetId::channel(channel);
            let result = self.targets.refresh_data(&mut self.radio, target, &data);
            self.report_fault(target, result);
        }
    }

    /// Publishes the status board on the status target.
    fn push_status(&mut self, start: Option<StartParams>) {
        match payload::status_payload(self.board.raw_lines(), &self.status_name) {
            Ok(data) => self.push_data(TargetId::STATUS, None, &data, start),
            Err(error) => self.log(
                LogLevel::Warn,
                TelemetryEvent::Note,
                format_args!("status payload: {error}"),
            ),
        }
    }

    fn stop_target(&mut self, target: TargetId) {
        let result = self.targets.stop(&mut self.radio, target);
        self.report_fault(target, result);
    }

    fn stop_channel_targets(&mut self) {
        for channel in Channel::ALL {
            self.stop_target(TargetId::channel(channel));
        }
    }

    fn stop_all_targets(&mut self) {
        if let Err(error) = self.targets.stop_all(&mut self.radio) {
            self.log(
                LogLevel::Warn,
                TelemetryEvent::RadioFault(error),
                format_args!("stopping targets: {error}"),
            );
        }
    }

    /// Applies the configured channel map to the initialized targets of `channels`.
    fn apply_channel_map(&mut self, channels: ChannelSet) {
        let map = channel_bitmap(self.config.inhibit);
        if map.is_fallback() {
            self.log(
                LogLevel::Warn,
                TelemetryEvent::ChannelMapFallback,
                format_args!("all advertising channels inhibited, using 37/38/39"),
            );
        }
        for channel in channels.iter() {
            let target = TargetId::channel(channel);
            if self.targets.is_initialized(target) {
                let result = self.targets.set_channel_map(&mut self.radio, target, map);
                self.report_fault(target, result);
            }
        }
    }

    /// Switches the scanner to `method`. The radio is only touched when the
    /// method changes.
    fn set_scan(&mut self, method: ScanMethod) -> Result<(), RadioError> {
        if self.scan == Some(method) {
            return Ok(());
        }
        if self.scan.is_some() {
            self.stop_scan();
        }
        self.radio.start_scan(method.params())?;
        self.scan = Some(method);
        Ok(())
    }

    /// [`Self::set_scan`] with failures logged.
    fn scan_or_warn(&mut self, method: ScanMethod) {
        if let Err(error) = self.set_scan(method) {
            self.log(
                LogLevel::Warn,
                TelemetryEvent::RadioFault(error),
                format_args!("scan start failed: {error}"),
            );
        }
    }

    fn stop_scan(&mut self) {
        self.scan = None;
        if let Err(error) = self.radio.stop_scan() {
            self.log(
                LogLevel::Warn,
                TelemetryEvent::RadioFault(error),
                format_args!("scan stop failed: {error}"),
            );
        }
    }

    fn set_tx_power(&mut self) -> Result<i8, RadioError> {
        let requested = self.config.tx_power_dbm;
        self.radio.set_tx_power(requested).inspect_err(|error| {
            let error = *error;
            self.log(
                LogLevel::Warn,
                TelemetryEvent::RadioFault(error),
                format_args!("TX power {requested} dBm rejected: {error}"),
            );
        })
    }
}
