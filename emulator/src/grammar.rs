//! Command grammar for the bench emulator.
//!
//! Lines are parsed with `winnow` straight from the input string. Keywords are
//! case-insensitive; durations take an optional `ms` or `s` suffix and default
//! to milliseconds.

use std::fmt;

use ignition_core::diagnostics::DiagnosticCommand;
use winnow::ascii::{alpha1, dec_uint, space0, space1};
use winnow::combinator::{alt, eof, fail, opt, preceded};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::stream::Stream;

/// Structured commands produced by the parser.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// Bring the engine up (rebases the controller clock).
    Start,
    /// Set the simulated crank speed; 0 stops the crank.
    Rpm(u32),
    /// Advance simulated time.
    Run { millis: u32 },
    /// Sweep linearly between two speeds while advancing time.
    Ramp { from: u32, to: u32, millis: u32 },
    /// Inject one extra crank edge right now.
    Glitch,
    /// Advance time with the crank signal missing.
    Stall { millis: u32 },
    /// Query the diagnostics interface.
    Get(DiagnosticCommand),
    Status,
    /// Show the most recent telemetry records.
    History(Option<usize>),
    Help,
}

/// Parse failure with the column it was detected at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GrammarError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "unexpected input at column {}", self.offset + 1)
        } else {
            write!(f, "{} at column {}", self.message, self.offset + 1)
        }
    }
}

/// Parse one command line.
pub fn parse(line: &str) -> Result<Command, GrammarError> {
    command.parse(line.trim()).map_err(|err| GrammarError {
        offset: err.offset(),
        message: err.inner().to_string(),
    })
}

fn command(input: &mut &str) -> ModalResult<Command> {
    let start = input.checkpoint();
    let keyword = alpha1
        .context(StrContext::Label("command"))
        .parse_next(input)?;

    let command = match keyword.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "rpm" => Command::Rpm(number(input, "engine speed")?),
        "run" => Command::Run {
            millis: duration(input)?,
        },
        "ramp" => Command::Ramp {
            from: number(input, "start speed")?,
            to: number(input, "end speed")?,
            millis: duration(input)?,
        },
        "glitch" => Command::Glitch,
        "stall" => Command::Stall {
            millis: duration(input)?,
        },
        "get" => Command::Get(diagnostic(input)?),
        "status" => Command::Status,
        "history" => Command::History(opt(preceded(space1, dec_uint)).parse_next(input)?),
        "help" => Command::Help,
        _ => {
            input.reset(&start);
            return fail
                .context(expected("command keyword"))
                .parse_next(input);
        }
    };

    (space0, eof)
        .context(expected("end of command"))
        .parse_next(input)?;
    Ok(command)
}

fn number(input: &mut &str, label: &'static str) -> ModalResult<u32> {
    preceded(space1, dec_uint)
        .context(expected(label))
        .parse_next(input)
}

/// Duration argument in milliseconds.
fn duration(input: &mut &str) -> ModalResult<u32> {
    let (value, scale): (u32, Option<u32>) = preceded(
        space1,
        (dec_uint, opt(alt(("ms".value(1), "s".value(1_000))))),
    )
    .context(expected("duration"))
    .parse_next(input)?;
    Ok(value.saturating_mul(scale.unwrap_or(1)))
}

fn diagnostic(input: &mut &str) -> ModalResult<DiagnosticCommand> {
    let start = input.checkpoint();
    let topic = preceded(space1, alpha1)
        .context(expected("rpm, tick, period, or state"))
        .parse_next(input)?;

    match topic.to_ascii_lowercase().as_str() {
        "rpm" => Ok(DiagnosticCommand::GetRpm),
        "tick" => Ok(DiagnosticCommand::GetTick),
        "period" => Ok(DiagnosticCommand::GetPeriod),
        "state" => Ok(DiagnosticCommand::GetState),
        _ => {
            input.reset(&start);
            fail.context(expected("rpm, tick, period, or state"))
                .parse_next(input)
        }
    }
}

const fn expected(description: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(description))
}
