//! One simulated test node: an engine on its own thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use losstest_core::clock::Clock;
use losstest_core::config::{AbortPredicate, EngineTiming, TestConfig};
use losstest_core::engine::{LossTest, NumcastSnapshot, StepResult};
use losstest_core::phy::{CHANNEL_COUNT, Channel};
use losstest_core::telemetry::{LogLevel, LogSink, TelemetryEvent};
use losstest_core::trigger::{Mode, TriggerRequest};

use crate::clock::{NodeClock, SimInstant, SimTime};
use crate::medium::Medium;
use crate::radio::SimRadio;

/// A line a node logged, tagged with its node number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLine {
    pub node: u8,
    pub at: SimInstant,
    pub level: LogLevel,
    pub line: String,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum NodeCommand {
    Start(Mode, TestConfig),
    Stop(Mode),
    NumcastValue(u64),
    NumcastAuto(bool),
    Shutdown,
}

/// What the console shows for `status`, refreshed after every step.
#[derive(Clone, Debug, Default)]
pub struct NodeSnapshot {
    pub at: SimInstant,
    pub active: Option<Mode>,
    pub board: [String; CHANNEL_COUNT],
    pub sender: [(u16, u16); CHANNEL_COUNT],
    pub received: [u16; CHANNEL_COUNT],
    pub numcast: NumcastSnapshot,
    pub env: [u32; CHANNEL_COUNT],
}

/// Aborts the mode named by the console's last `stop`.
struct StopRequest {
    requested: Arc<AtomicU8>,
}

impl AbortPredicate for StopRequest {
    fn should_abort(&mut self, mode: Mode) -> bool {
        self.requested.load(Ordering::Acquire) == mode.id()
    }
}

/// Forwards engine lines to the console.
struct ConsoleSink {
    node: u8,
    time: Arc<SimTime>,
    lines: Sender<NodeLine>,
}

impl LogSink for ConsoleSink {
    fn emit(&mut self, level: LogLevel, _event: TelemetryEvent, line: &str) {
        let _ = self.lines.send(NodeLine {
            node: self.node,
            at: self.time.now(),
            level,
            line: line.to_string(),
        });
    }
}

type NodeEngine = LossTest<SimRadio, NodeClock, StopRequest, ConsoleSink>;

pub struct NodeHandle {
    pub number: u8,
    commands: Sender<NodeCommand>,
    stop: Arc<AtomicU8>,
    snapshot: Arc<Mutex<NodeSnapshot>>,
    thread: Option<JoinHandle<()>>,
}

impl NodeHandle {
    /// Starts node `number` as participant `index` of the simulation.
    pub fn spawn(
        index: usize,
        number: u8,
        time: &Arc<SimTime>,
        medium: &Arc<Medium>,
        lines: Sender<NodeLine>,
    ) -> Self {
        let (commands, inbox) = std::sync::mpsc::channel();
        let stop = Arc::new(AtomicU8::new(0));
        let snapshot = Arc::new(Mutex::new(NodeSnapshot::default()));

        let worker = Worker {
            engine: LossTest::new(
                SimRadio::new(index, Arc::clone(time), Arc::clone(medium)),
                NodeClock::new(Arc::clone(time), index),
                EngineTiming::default(),
                ConsoleSink {
                    node: number,
                    time: Arc::clone(time),
                    lines: lines.clone(),
                },
            ),
            address: node_address(number),
            inbox,
            stop: Arc::clone(&stop),
            snapshot: Arc::clone(&snapshot),
            lines,
            number,
        };
        let thread = thread::Builder::new()
            .name(format!("node-{number:03}"))
            .spawn(move || worker.run())
            .ok();

        Self {
            number,
            commands,
            stop,
            snapshot,
            thread,
        }
    }

    pub fn send(&self, command: NodeCommand) {
        let _ = self.commands.send(command);
    }

    /// Asks `mode` to abort at its next wait. The flag reaches a wait already
    /// in progress; the command keeps the order against queued starts.
    pub fn stop(&self, mode: Mode) {
        self.stop.store(mode.id(), Ordering::Release);
        self.send(NodeCommand::Stop(mode));
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Device address of node `number`; its low byte is the node number.
pub fn node_address(number: u8) -> [u8; 8] {
    [number, 0x00, 0x00, 0x00, 0x00, 0x00, 0xA0, 0x00]
}

struct Worker {
    engine: NodeEngine,
    address: [u8; 8],
    inbox: Receiver<NodeCommand>,
    stop: Arc<AtomicU8>,
    snapshot: Arc<Mutex<NodeSnapshot>>,
    lines: Sender<NodeLine>,
    number: u8,
}

impl Worker {
    fn run(mut self) {
        self.engine.init(self.address);
        loop {
            if !self.apply_commands() {
                break;
            }
            let polled = self.engine.poll();
            self.clear_stale_stop();
            self.publish();
            match polled {
                Some((_, StepResult::Continue)) => {}
                Some(_) | None => {
                    let tick = self.engine.timing().poll_tick;
                    self.engine.clock_mut().pause(tick);
                }
            }
        }
        self.stop_active();
    }

    /// Returns `false` once the node should exit.
    fn apply_commands(&mut self) -> bool {
        loop {
            let command = match self.inbox.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            };
            match command {
                NodeCommand::Start(mode, config) => self.start(mode, config),
                NodeCommand::Stop(mode) => self.stop.store(mode.id(), Ordering::Release),
                NodeCommand::NumcastValue(value) => self.engine.set_numcast_value(value),
                NodeCommand::NumcastAuto(auto) => self.engine.set_numcast_auto(auto),
                NodeCommand::Shutdown => return false,
            }
        }
    }

    fn start(&mut self, mode: Mode, config: TestConfig) {
        self.stop.store(0, Ordering::Release);
        let abort = StopRequest {
            requested: Arc::clone(&self.stop),
        };
        if let Err(error) = self.engine.start(mode, config, abort) {
            self.note(LogLevel::Warn, format!("{mode} not started: {error}"));
        }
    }

    /// A stop aimed at a mode that is no longer running is dropped.
    fn clear_stale_stop(&self) {
        let requested = self.stop.load(Ordering::Acquire);
        let running = self.engine.active_mode().map(Mode::id);
        if requested != 0 && running != Some(requested) {
            self.stop.store(0, Ordering::Release);
        }
    }

    /// Aborts whatever runs, letting waits end through the abort path.
    fn stop_active(&mut self) {
        if let Some(mode) = self.engine.active_mode() {
            self.stop.store(mode.id(), Ordering::Release);
            let _ = self.engine.trigger(mode, TriggerRequest::Release);
            let _ = self.engine.poll();
        }
    }

    fn publish(&self) {
        let engine = &self.engine;
        let snapshot = NodeSnapshot {
            at: engine.clock().now(),
            active: engine.active_mode(),
            board: Channel::ALL.map(|channel| engine.status_text(channel).to_string()),
            sender: Channel::ALL.map(|channel| engine.sender_progress(channel)),
            received: Channel::ALL.map(|channel| engine.received(channel)),
            numcast: engine.numcast(),
            env: Channel::ALL.map(|channel| engine.env_counter(channel)),
        };
        *self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn note(&self, level: LogLevel, line: String) {
        let _ = self.lines.send(NodeLine {
            node: self.number,
            at: self.engine.clock().now(),
            level,
            line,
        });
    }
}
