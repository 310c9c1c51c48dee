#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the operator console.
//!
//! The lexer uses `regal` to produce a bounded token stream; the parser runs
//! `winnow` combinators over those tokens. Keywords match case-insensitively.

use core::fmt;
use core::ops::Range;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use super::catalog::{self, CommandTag};
use crate::trigger::Mode;

/// Maximum number of tokens in one console line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Duration literal ending in `ms` or `s`.
    #[regex(r"[0-9]+(?:ms|s)", priority = 2)]
    Duration,
    /// Integer literal, optionally negative.
    #[regex(r"-?[0-9]+")]
    Integer,
    /// Keyword or setting name.
    #[regex(r"[A-Za-z][A-Za-z0-9]*")]
    Ident,
    #[token("=")]
    Equals,
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Anything the console does not understand.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// The line produced more tokens than the buffer holds.
    TooManyTokens { processed: usize },
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "line too long after {processed} tokens")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: &'a str,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    InvalidDuration {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected, found, ..
            } => write!(f, "expected {expected}, found `{found}`"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "expected {expected} at end of line")
            }
            GrammarErrorKind::InvalidNumber { span } => {
                write!(f, "number out of range at {span:?}")
            }
            GrammarErrorKind::InvalidDuration { span } => {
                write!(f, "invalid duration at {span:?}")
            }
            GrammarErrorKind::InvalidToken { lexeme, .. } => {
                write!(f, "unsupported input `{lexeme}`")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(token) if token.kind != TokenKind::Eol => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: token.lexeme,
                    span: token.span.clone(),
                },
                _ => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn invalid_number(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidNumber {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_duration(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidDuration {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// A parsed console line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// `sender|scanner|numcast|envmon start|stop`
    Mode { mode: Mode, action: ModeAction },
    /// `numcast auto|manual|value=<n>`
    Numcast(NumcastCommand),
    /// `set <key>=<int>`
    Set(Setting),
    /// `run <duration>`: advance the simulation.
    Run(Duration),
    Status,
    Help { topic: Option<&'a str> },
    /// `node <n>`: select the node later commands go to.
    Node(u8),
    /// `loss <n>`: drop one in `n` receptions; `0` disables loss.
    Loss(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModeAction {
    Start,
    Stop,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NumcastCommand {
    Auto,
    Manual,
    Value(u64),
}

/// Operator setting addressed by `set`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingKey {
    TxPower,
    Interval,
    Count,
    Le2M,
    Le1M,
    Coded,
    Legacy,
    Ch37,
    Ch38,
    Ch39,
    Identity,
    Ignore,
    Delayed,
}

impl SettingKey {
    pub const ALL: [SettingKey; 13] = [
        SettingKey::TxPower,
        SettingKey::Interval,
        SettingKey::Count,
        SettingKey::Le2M,
        SettingKey::Le1M,
        SettingKey::Coded,
        SettingKey::Legacy,
        SettingKey::Ch37,
        SettingKey::Ch38,
        SettingKey::Ch39,
        SettingKey::Identity,
        SettingKey::Ignore,
        SettingKey::Delayed,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SettingKey::TxPower => "txpower",
            SettingKey::Interval => "interval",
            SettingKey::Count => "count",
            SettingKey::Le2M => "le2m",
            SettingKey::Le1M => "le1m",
            SettingKey::Coded => "coded",
            SettingKey::Legacy => "legacy",
            SettingKey::Ch37 => "ch37",
            SettingKey::Ch38 => "ch38",
            SettingKey::Ch39 => "ch39",
            SettingKey::Identity => "identity",
            SettingKey::Ignore => "ignore",
            SettingKey::Delayed => "delayed",
        }
    }

    fn find(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Setting {
    pub key: SettingKey,
    pub value: i64,
}

/// Tokenizes one console line.
///
/// # Errors
///
/// Fails when the line holds more than [`MAX_TOKENS`] tokens.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    let records = cache
        .tokens()
        .filter(|record| !record.skipped)
        .map(|record| (record.token, record.start..record.end));
    let trailing = partial
        .filter(|partial| !partial.fragment.is_empty())
        .map(|partial| {
            (
                TokenKind::Error,
                partial.start..partial.start + partial.fragment.len(),
            )
        });

    for (kind, span) in records.chain(trailing) {
        let lexeme = &line[span.clone()];
        if buffer.push(Token { kind, lexeme, span }).is_err() {
            return Err(LexError::TooManyTokens {
                processed: buffer.len() + 1,
            });
        }
    }

    Ok(buffer)
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parses one console line.
///
/// # Errors
///
/// Returns the lexer or grammar error for the first offending token.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let mut input = tokens.as_slice();
    let command = match command().parse_next(&mut input) {
        Ok(command) => command,
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => {
            return Err(ParseError::Grammar(err));
        }
        Err(ErrMode::Incomplete(_)) => {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "token",
                input.first(),
            )));
        }
    };

    match input.iter().find(|token| token.kind != TokenKind::Eol) {
        Some(token) => Err(ParseError::Grammar(GrammarError::unexpected(
            "end of command",
            Some(token),
        ))),
        None => Ok(command),
    }
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let head = expect_kind(TokenKind::Ident, "command").parse_next(input)?;
        let Some(spec) = catalog::find(head.lexeme) else {
            return Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command",
                Some(&head),
            )));
        };

        match spec.tag {
            CommandTag::Mode(Mode::Numcast) => numcast_command(input),
            CommandTag::Mode(mode) => {
                let action = mode_action(input)?;
                Ok(Command::Mode { mode, action })
            }
            CommandTag::Set => setting(input).map(Command::Set),
            CommandTag::Run => {
                let token = expect_kind(TokenKind::Duration, "duration").parse_next(input)?;
                parse_duration(&token)
                    .map(Command::Run)
                    .map_err(ErrMode::Cut)
            }
            CommandTag::Status => Ok(Command::Status),
            CommandTag::Help => Ok(Command::Help {
                topic: optional_ident(input),
            }),
            CommandTag::Node => {
                let token = expect_kind(TokenKind::Integer, "node number").parse_next(input)?;
                parse_number(&token).map(Command::Node).map_err(ErrMode::Cut)
            }
            CommandTag::Loss => {
                let token = expect_kind(TokenKind::Integer, "loss ratio").parse_next(input)?;
                parse_number(&token).map(Command::Loss).map_err(ErrMode::Cut)
            }
        }
    }
}

fn mode_action<'src>(input: &mut Input<'src, '_>) -> Result<ModeAction, ErrMode<GrammarError<'src>>> {
    let token = expect_kind(TokenKind::Ident, "start or stop").parse_next(input)?;
    if token.lexeme.eq_ignore_ascii_case("start") {
        Ok(ModeAction::Start)
    } else if token.lexeme.eq_ignore_ascii_case("stop") {
        Ok(ModeAction::Stop)
    } else {
        Err(ErrMode::Cut(GrammarError::unexpected(
            "start or stop",
            Some(&token),
        )))
    }
}

fn numcast_command<'src>(
    input: &mut Input<'src, '_>,
) -> Result<Command<'src>, ErrMode<GrammarError<'src>>> {
    const EXPECTED: &str = "start, stop, auto, manual or value=<n>";
    let token = expect_kind(TokenKind::Ident, EXPECTED).parse_next(input)?;
    let word = token.lexeme;
    let numcast = if word.eq_ignore_ascii_case("start") {
        return Ok(Command::Mode {
            mode: Mode::Numcast,
            action: ModeAction::Start,
        });
    } else if word.eq_ignore_ascii_case("stop") {
        return Ok(Command::Mode {
            mode: Mode::Numcast,
            action: ModeAction::Stop,
        });
    } else if word.eq_ignore_ascii_case("auto") {
        NumcastCommand::Auto
    } else if word.eq_ignore_ascii_case("manual") {
        NumcastCommand::Manual
    } else if word.eq_ignore_ascii_case("value") {
        let value = assigned_integer(input)?;
        NumcastCommand::Value(parse_number(&value).map_err(ErrMode::Cut)?)
    } else {
        return Err(ErrMode::Cut(GrammarError::unexpected(EXPECTED, Some(&token))));
    };
    Ok(Command::Numcast(numcast))
}

fn setting<'src>(input: &mut Input<'src, '_>) -> Result<Setting, ErrMode<GrammarError<'src>>> {
    let token = expect_kind(TokenKind::Ident, "setting name").parse_next(input)?;
    let Some(key) = SettingKey::find(token.lexeme) else {
        return Err(ErrMode::Cut(GrammarError::unexpected(
            "setting name",
            Some(&token),
        )));
    };
    let value = assigned_integer(input)?;
    let value = parse_number(&value).map_err(ErrMode::Cut)?;
    Ok(Setting { key, value })
}

/// `=<integer>`
fn assigned_integer<'src>(
    input: &mut Input<'src, '_>,
) -> Result<Token<'src>, ErrMode<GrammarError<'src>>> {
    let _ = expect_kind(TokenKind::Equals, "=").parse_next(input)?;
    expect_kind(TokenKind::Integer, "integer").parse_next(input)
}

fn optional_ident<'src>(input: &mut Input<'src, '_>) -> Option<&'src str> {
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            *input = rest;
            Some(token.lexeme)
        }
        _ => None,
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        other => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            other.map(|(token, _)| token),
        ))),
    }
}

fn parse_number<'a, T: core::str::FromStr>(token: &Token<'a>) -> Result<T, GrammarError<'a>> {
    token
        .lexeme
        .parse::<T>()
        .map_err(|_| GrammarError::invalid_number(token))
}

fn parse_duration<'a>(token: &Token<'a>) -> Result<Duration, GrammarError<'a>> {
    let text = token.lexeme;
    if let Some(rest) = text.strip_suffix("ms") {
        let millis = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_millis(millis.into()))
    } else if let Some(rest) = text.strip_suffix('s') {
        let seconds = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_secs(seconds.into()))
    } else {
        Err(GrammarError::invalid_duration(token))
    }
}
