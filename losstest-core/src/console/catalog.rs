//! Command table shared by the parser and the `help` command.

use crate::trigger::Mode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Mode(Mode),
    Set,
    Run,
    Status,
    Help,
    Node,
    Loss,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

const COMMANDS: [CommandSpec; 10] = [
    CommandSpec {
        name: "sender",
        tag: CommandTag::Mode(Mode::Sender),
        usage: "sender start|stop",
        summary: "run packet-loss rounds on the enabled channels",
    },
    CommandSpec {
        name: "scanner",
        tag: CommandTag::Mode(Mode::Scanner),
        usage: "scanner start|stop",
        summary: "count a sender's bursts and echo its reports",
    },
    CommandSpec {
        name: "numcast",
        tag: CommandTag::Mode(Mode::Numcast),
        usage: "numcast start|stop|auto|manual|value=<n>",
        summary: "broadcast a number and show what others broadcast",
    },
    CommandSpec {
        name: "envmon",
        tag: CommandTag::Mode(Mode::EnvMon),
        usage: "envmon start|stop",
        summary: "count every advertisement heard per channel",
    },
    CommandSpec {
        name: "set",
        tag: CommandTag::Set,
        usage: "set <key>=<int>",
        summary: "change a test setting (txpower interval count le2m le1m coded legacy ch37 ch38 ch39 identity ignore delayed)",
    },
    CommandSpec {
        name: "run",
        tag: CommandTag::Run,
        usage: "run <n>ms|<n>s",
        summary: "advance the simulation",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        usage: "status",
        summary: "show the selected node's mode, settings and counters",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        usage: "help [command]",
        summary: "list commands or describe one",
    },
    CommandSpec {
        name: "node",
        tag: CommandTag::Node,
        usage: "node <n>",
        summary: "send later commands to node n",
    },
    CommandSpec {
        name: "loss",
        tag: CommandTag::Loss,
        usage: "loss <n>",
        summary: "drop one in n receptions on the simulated medium, 0 for none",
    },
];

#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}
