#![allow(dead_code)]

use core::ops::Add;
use core::time::Duration;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::{String, ToString};
use std::vec::Vec;

use losstest_core::clock::Clock;
use losstest_core::codec::DeviceInfo;
use losstest_core::codec::payload::test_payload;
use losstest_core::config::{AbortPredicate, AdvParams, EngineTiming, StartParams};
use losstest_core::engine::{LossTest, StepResult};
use losstest_core::phy::{Channel, ChannelMap, code};
use losstest_core::radio::{
    Radio, RadioError, RadioEvent, ScanParams, ScanReport, TARGET_COUNT, TargetId,
};
use losstest_core::telemetry::{LogLevel, LogSink, TelemetryEvent, TelemetryInstant};
use losstest_core::trigger::Mode;

/// Millisecond instant driven by [`MockClock`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockInstant(pub u64);

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for MockInstant {
    type Output = MockInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        MockInstant(self.0 + millis(rhs))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).expect("duration fits in u64")
}

/// Clock that only moves when the engine pauses.
pub struct MockClock {
    now: Rc<Cell<u64>>,
}

impl Clock for MockClock {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        MockInstant(self.now.get())
    }

    fn pause(&mut self, duration: Duration) {
        self.now.set(self.now.get() + millis(duration));
    }
}

/// Radio that finishes bounded starts on time and replays scripted reports.
pub struct MockRadio {
    now: Rc<Cell<u64>>,
    params: [AdvParams; TARGET_COUNT],
    /// Running targets with the time their bounded start ends.
    running: [Option<Option<u64>>; TARGET_COUNT],
    pub data: [Vec<u8>; TARGET_COUNT],
    pub starts: Vec<(u64, TargetId, StartParams)>,
    pub scan: Option<ScanParams>,
    pub tx_power_error: Option<RadioError>,
    /// Returned by every `stop`; the set is stopped regardless.
    pub stop_error: Option<RadioError>,
    script: VecDeque<(u64, ScanReport)>,
    pending: VecDeque<RadioEvent>,
}

impl MockRadio {
    fn new(now: Rc<Cell<u64>>) -> Self {
        Self {
            now,
            params: [AdvParams::DEFAULT; TARGET_COUNT],
            running: [None; TARGET_COUNT],
            data: Default::default(),
            starts: Vec::new(),
            scan: None,
            tx_power_error: None,
            stop_error: None,
            script: VecDeque::new(),
            pending: VecDeque::new(),
        }
    }

    /// Queues `report` to be heard at `at_ms`, if the scan filter allows it.
    pub fn schedule(&mut self, at_ms: u64, report: ScanReport) {
        let slot = self
            .script
            .iter()
            .position(|(at, _)| *at > at_ms)
            .unwrap_or(self.script.len());
        self.script.insert(slot, (at_ms, report));
    }

    pub fn is_running(&self, target: TargetId) -> bool {
        self.running[target.index()].is_some()
    }

    pub fn starts_on(&self, target: TargetId) -> impl Iterator<Item = &StartParams> {
        self.starts
            .iter()
            .filter(move |(_, started, _)| *started == target)
            .map(|(_, _, start)| start)
    }
}

impl Radio for MockRadio {
    fn create(&mut self, target: TargetId, params: &AdvParams) -> Result<(), RadioError> {
        self.params[target.index()] = *params;
        Ok(())
    }

    fn update_params(&mut self, target: TargetId, params: &AdvParams) -> Result<(), RadioError> {
        self.params[target.index()] = *params;
        Ok(())
    }

    fn set_data(&mut self, target: TargetId, payload: &[u8]) -> Result<(), RadioError> {
        self.data[target.index()] = payload.to_vec();
        Ok(())
    }

    fn start(&mut self, target: TargetId, start: StartParams) -> Result<(), RadioError> {
        let now = self.now.get();
        let bound = match (start.duration(), start.max_events) {
            (Some(duration), _) => Some(duration),
            (None, 0) => None,
            (None, events) => {
                Some(self.params[target.index()].nominal_interval() * u32::from(events))
            }
        };
        self.running[target.index()] = Some(bound.map(|bound| now + millis(bound)));
        self.starts.push((now, target, start));
        Ok(())
    }

    fn stop(&mut self, target: TargetId) -> Result<(), RadioError> {
        self.running[target.index()] = None;
        self.stop_error.map_or(Ok(()), Err)
    }

    fn set_channel_map(&mut self, _: TargetId, _: ChannelMap) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_tx_power(&mut self, dbm: i8) -> Result<i8, RadioError> {
        match self.tx_power_error {
            Some(error) => Err(error),
            None => Ok(dbm),
        }
    }

    fn start_scan(&mut self, params: ScanParams) -> Result<(), RadioError> {
        self.scan = Some(params);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.scan = None;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        let now = self.now.get();
        for target in TargetId::all() {
            let slot = &mut self.running[target.index()];
            if matches!(slot, Some(Some(ends)) if *ends <= now) {
                *slot = None;
                self.pending.push_back(RadioEvent::AdvSent(target));
            }
        }
        while self.script.front().is_some_and(|(at, _)| *at <= now) {
            let Some((_, report)) = self.script.pop_front() else {
                break;
            };
            if self
                .scan
                .is_some_and(|scan| scan.phys.hears(report.primary))
            {
                self.pending.push_back(RadioEvent::Report(report));
            }
        }
        self.pending.pop_front()
    }
}

/// Keeps every emitted line.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub lines: Rc<RefCell<Vec<(LogLevel, TelemetryEvent, String)>>>,
}

impl LogSink for RecordingSink {
    fn emit(&mut self, level: LogLevel, event: TelemetryEvent, line: &str) {
        self.lines
            .borrow_mut()
            .push((level, event, line.to_string()));
    }
}

pub type TestEngine<A> = LossTest<MockRadio, MockClock, A, RecordingSink>;

pub struct Fixture<A: AbortPredicate> {
    pub engine: TestEngine<A>,
    pub now: Rc<Cell<u64>>,
    pub log: Rc<RefCell<Vec<(LogLevel, TelemetryEvent, String)>>>,
}

pub const LOCAL_ADDRESS: [u8; 8] = [0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0xA0, 0x00];

impl<A: AbortPredicate> Fixture<A> {
    pub fn new() -> Self {
        let now = Rc::new(Cell::new(0));
        let sink = RecordingSink::default();
        let log = Rc::clone(&sink.lines);
        let mut engine = LossTest::new(
            MockRadio::new(Rc::clone(&now)),
            MockClock {
                now: Rc::clone(&now),
            },
            EngineTiming::default(),
            sink,
        );
        engine.init(LOCAL_ADDRESS);
        Self { engine, now, log }
    }

    /// Polls until the active mode finishes, failing after `limit` polls.
    pub fn run_to_end(&mut self, limit: usize) -> (Mode, StepResult) {
        for _ in 0..limit {
            match self.engine.poll() {
                Some((_, StepResult::Continue)) => {}
                Some(finished) => return finished,
                None => panic!("no mode active"),
            }
        }
        panic!("mode still running after {limit} polls");
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.log.borrow().iter().map(|(_, event, _)| *event).collect()
    }

    pub fn count(&self, event: TelemetryEvent) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|(_, logged, _)| *logged == event)
            .count()
    }

    pub fn lines_for(&self, event: TelemetryEvent) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter(|(_, logged, _)| *logged == event)
            .map(|(_, _, line)| line.clone())
            .collect()
    }

    /// Moves the clock forward without running a step.
    pub fn advance(&mut self, duration: Duration) {
        self.engine.clock_mut().pause(duration);
        self.engine.pump_events();
    }
}

/// Report a remote sender's `record` on `channel` would produce.
pub fn sender_report(channel: Channel, record: &DeviceInfo, rssi: i8) -> ScanReport {
    let payload = test_payload(channel, record, 2).expect("payload fits");
    let (primary, secondary) = match channel {
        Channel::Le2M => (code::LE_1M, code::LE_2M),
        Channel::Le1M => (code::LE_1M, code::LE_1M),
        Channel::CodedS8 => (code::LE_CODED, code::LE_CODED),
        Channel::Legacy => return ScanReport::legacy(rssi, payload),
    };
    ScanReport {
        primary,
        secondary,
        rssi,
        tx_power: 0,
        payload,
    }
}

/// Asks every mode to abort once the clock reaches `at_ms`.
pub struct AbortAt {
    pub now: Rc<Cell<u64>>,
    pub at_ms: u64,
}

impl AbortPredicate for AbortAt {
    fn should_abort(&mut self, _mode: Mode) -> bool {
        self.now.get() >= self.at_ms
    }
}
