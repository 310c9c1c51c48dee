use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use losstest_core::config::TestConfig;
use losstest_core::console::grammar::{self, Command, ModeAction, NumcastCommand};
use losstest_core::console::{apply_setting, write_help, write_settings};
use losstest_core::phy::Channel;
use losstest_core::telemetry::LogLevel;

use crate::clock::{SimInstant, SimTime};
use crate::medium::Medium;
use crate::node::{NodeCommand, NodeHandle, NodeLine, NodeSnapshot};

pub const DEFAULT_NODES: u8 = 2;

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub nodes: u8,
    pub transcript: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            nodes: DEFAULT_NODES,
            transcript: None,
        }
    }
}

pub struct Session {
    time: Arc<SimTime>,
    medium: Arc<Medium>,
    nodes: Vec<NodeHandle>,
    configs: Vec<TestConfig>,
    selected: usize,
    lines: Receiver<NodeLine>,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        if options.nodes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "at least one node is required",
            ));
        }
        let transcript = options
            .transcript
            .as_deref()
            .map(|path| TranscriptLogger::new(path, options.nodes))
            .transpose()?;

        let count = usize::from(options.nodes);
        let time = SimTime::new(count);
        let medium = Arc::new(Medium::new(count));
        let (sender, lines) = mpsc::channel();
        let nodes = (1..=options.nodes)
            .enumerate()
            .map(|(index, number)| {
                NodeHandle::spawn(index, number, &time, &medium, sender.clone())
            })
            .collect();

        Ok(Self {
            time,
            medium,
            nodes,
            configs: vec![TestConfig::default(); count],
            selected: 0,
            lines,
            transcript,
        })
    }

    pub fn selected_node(&self) -> u8 {
        self.nodes[self.selected].number
    }

    pub fn now(&self) -> SimInstant {
        self.time.now()
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.now().0;
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let mut responses = match grammar::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(error) => vec![format!("ERR syntax {error}")],
        };
        responses.extend(self.drain_lines());
        self.record_output(&responses)?;
        Ok(responses)
    }

    fn execute(&mut self, command: Command<'_>) -> Vec<String> {
        let node = self.selected_node();
        match command {
            Command::Mode { mode, action } => {
                let handle = &self.nodes[self.selected];
                match action {
                    ModeAction::Start => {
                        handle.send(NodeCommand::Start(mode, self.configs[self.selected]));
                    }
                    ModeAction::Stop => handle.stop(mode),
                }
                let verb = match action {
                    ModeAction::Start => "start",
                    ModeAction::Stop => "stop",
                };
                vec![format!("OK node {node:03} {mode} {verb}")]
            }
            Command::Numcast(request) => {
                let command = match request {
                    NumcastCommand::Auto => NodeCommand::NumcastAuto(true),
                    NumcastCommand::Manual => NodeCommand::NumcastAuto(false),
                    NumcastCommand::Value(value) => NodeCommand::NumcastValue(value),
                };
                self.nodes[self.selected].send(command);
                vec![format!("OK node {node:03} numcast {request:?}")]
            }
            Command::Set(setting) => match apply_setting(&mut self.configs[self.selected], setting)
            {
                Ok(()) => vec![format!(
                    "OK node {node:03} {}={}",
                    setting.key, setting.value
                )],
                Err(error) => vec![format!("ERR set {error}")],
            },
            Command::Run(span) => {
                self.time.run_for(span);
                vec![format!("OK now +{} ms", self.now().as_millis())]
            }
            Command::Status => self.status_lines(),
            Command::Help { topic } => {
                let mut text = String::new();
                if write_help(&mut text, topic).is_err() {
                    return vec!["ERR help".to_string()];
                }
                text.lines().map(str::to_string).collect()
            }
            Command::Node(number) => match self
                .nodes
                .iter()
                .position(|handle| handle.number == number)
            {
                Some(index) => {
                    self.selected = index;
                    vec![format!("OK node {number:03} selected")]
                }
                None => vec![format!(
                    "ERR node {number} (nodes are 1..={})",
                    self.nodes.len()
                )],
            },
            Command::Loss(one_in) => {
                self.medium.set_loss(one_in);
                if one_in == 0 {
                    vec!["OK loss off".to_string()]
                } else {
                    vec![format!("OK loss 1/{one_in}")]
                }
            }
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let handle = &self.nodes[self.selected];
        let snapshot = handle.snapshot();
        let mode = snapshot
            .active
            .map_or_else(|| "idle".to_string(), |mode| mode.to_string());
        let stats = self.medium.stats();
        let mut lines = vec![format!(
            "node {:03} {mode} at +{} ms (medium delivered {} dropped {})",
            handle.number,
            snapshot.at.as_millis(),
            stats.delivered,
            stats.dropped
        )];

        let mut settings = String::new();
        if write_settings(&mut settings, &self.configs[self.selected]).is_ok() {
            lines.extend(settings.lines().map(|line| format!("  {line}")));
        }
        lines.extend(channel_lines(&snapshot));
        lines.push(numcast_line(&snapshot));
        lines
    }

    fn drain_lines(&self) -> Vec<String> {
        self.lines
            .try_iter()
            .map(|line| {
                let level = match line.level {
                    LogLevel::Info => "",
                    LogLevel::Warn => "WARN ",
                };
                format!(
                    "[{:>8} ms] {:03} {level}{}",
                    line.at.as_millis(),
                    line.node,
                    line.line
                )
            })
            .collect()
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let elapsed = self.now().0;
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for handle in &self.nodes {
            handle.send(NodeCommand::Shutdown);
        }
        self.time.release_all();
        for handle in &mut self.nodes {
            handle.join();
        }
    }
}

fn channel_lines(snapshot: &NodeSnapshot) -> Vec<String> {
    Channel::ALL
        .into_iter()
        .map(|channel| {
            let index = channel.index();
            let (sent, target) = snapshot.sender[index];
            let mut line = format!(
                "  {:<6} sent {sent}/{target} rcv {} env {}",
                channel.to_string(),
                snapshot.received[index],
                snapshot.env[index]
            );
            let board = &snapshot.board[index];
            if !board.is_empty() {
                let _ = write!(line, " | {board}");
            }
            line
        })
        .collect()
}

fn numcast_line(snapshot: &NodeSnapshot) -> String {
    let numcast = &snapshot.numcast;
    let received = numcast
        .received
        .map_or_else(|| "-".to_string(), |value| value.to_string());
    let source = numcast
        .source
        .map_or_else(|| "-".to_string(), |node| format!("{node:04x}"));
    format!(
        "  numcast tx={} ({}) rx={received} from={source} rssi {}({}..{}) n={}",
        numcast.broadcasting,
        if numcast.auto { "auto" } else { "manual" },
        numcast.rssi.average,
        numcast.rssi.min,
        numcast.rssi.max,
        numcast.rssi.samples
    )
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, nodes: u8) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(nodes)?;
        Ok(logger)
    }

    fn write_header(&mut self, nodes: u8) -> io::Result<()> {
        writeln!(self.writer, "# LossTest emulator transcript ({nodes} nodes)")?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
