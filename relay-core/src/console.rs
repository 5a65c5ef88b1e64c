//! Operator console grammar.
//!
//! Protocol requests compile to [`Frame`]s; the remaining commands drive a
//! simulated node. Keywords are case-insensitive.
//!
//! ```text
//! line     := request | control
//! request  := ["ack"] ( "timing" ("get" | "definite" | "inverse")
//!                     | ("raises" | "lowers") ("get" | "reset")
//!                     | "frequency" | "voltage" | "spectrum" )
//! control  := "set" <channel> <volts> | "run" <ticks> | "status" | "events"
//!           | "fail" ("erase" | "program") | "help"
//! ```

use core::fmt;

use winnow::ascii::{Caseless, Uint, dec_uint, digit1, space1};
use winnow::combinator::{alt, opt, preceded, terminated};
use winnow::error::{ContextError, ErrMode, ModalResult};
use winnow::prelude::*;
use winnow::token::literal;

use crate::dispatch::Command;
use crate::frame::Frame;
use crate::sampling::ChannelId;
use crate::storage::StorageFault;

/// Help text listing every console command.
pub const HELP: &str = "\
commands:
  [ack] timing get|definite|inverse
  [ack] raises get|reset
  [ack] lowers get|reset
  [ack] frequency | voltage | spectrum
  set <channel 0-2> <volts>     drive a channel's RMS level
  run <ticks>                   advance the sampling clock
  status                        show relay states and counters
  events                        show recorded relay events
  fail erase|program            inject a storage fault
  help";

/// Parsed console line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConsoleCommand {
    /// Protocol request to send to the node.
    Request(Frame),
    /// Set the simulated amplitude of a channel, in millivolts RMS.
    Set { channel: ChannelId, millivolts: i32 },
    /// Advance the simulation by a number of sampling ticks.
    Run { ticks: u32 },
    Status,
    Events,
    Fail(StorageFault),
    Help,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConsoleError {
    /// The line held only whitespace.
    Empty,
    /// The line did not match the grammar; `offset` is the byte where
    /// parsing stopped.
    Syntax { offset: usize },
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Empty => f.write_str("empty command"),
            ConsoleError::Syntax { offset } => {
                write!(f, "unrecognized input at column {}", offset + 1)
            }
        }
    }
}

/// Parses one console line.
///
/// # Errors
///
/// Returns [`ConsoleError::Empty`] for blank lines and
/// [`ConsoleError::Syntax`] for anything the grammar rejects.
pub fn parse_line(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ConsoleError::Empty);
    }
    alt((request.map(ConsoleCommand::Request), control))
        .parse(trimmed)
        .map_err(|error| ConsoleError::Syntax {
            offset: error.offset(),
        })
}

fn keyword<'i>(word: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    literal(Caseless(word))
}

fn gap(input: &mut &str) -> ModalResult<()> {
    space1.void().parse_next(input)
}

fn number<O: Uint>(input: &mut &str) -> ModalResult<O> {
    dec_uint.parse_next(input)
}

fn digits<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    digit1.parse_next(input)
}

fn request(input: &mut &str) -> ModalResult<Frame> {
    let ack = opt(terminated(keyword("ack"), gap))
        .parse_next(input)?
        .is_some();
    let frame = alt((timing, counter, measurement)).parse_next(input)?;
    Ok(frame.with_ack(ack))
}

fn timing(input: &mut &str) -> ModalResult<Frame> {
    preceded(
        (keyword("timing"), gap),
        alt((
            keyword("get").value(0u8),
            keyword("definite").value(1u8),
            keyword("inverse").value(2u8),
        )),
    )
    .map(|parameter1| Command::TimingMode.frame(parameter1, 0, 0))
    .parse_next(input)
}

fn counter(input: &mut &str) -> ModalResult<Frame> {
    let command = alt((
        keyword("raises").value(Command::Raises),
        keyword("lowers").value(Command::Lowers),
    ))
    .parse_next(input)?;
    gap.parse_next(input)?;
    let parameter1 = alt((keyword("get").value(0u8), keyword("reset").value(1u8)))
        .parse_next(input)?;
    Ok(command.frame(parameter1, 0, 0))
}

fn measurement(input: &mut &str) -> ModalResult<Frame> {
    alt((
        keyword("frequency").value(Command::Frequency),
        keyword("voltage").value(Command::Voltage),
        keyword("spectrum").value(Command::Spectrum),
    ))
    .map(|command| command.frame(0, 0, 0))
    .parse_next(input)
}

fn control(input: &mut &str) -> ModalResult<ConsoleCommand> {
    alt((
        set,
        preceded((keyword("run"), gap), number::<u32>).map(|ticks| ConsoleCommand::Run { ticks }),
        keyword("status").value(ConsoleCommand::Status),
        keyword("events").value(ConsoleCommand::Events),
        preceded(
            (keyword("fail"), gap),
            alt((
                keyword("erase").value(StorageFault::Erase),
                keyword("program").value(StorageFault::Program),
            )),
        )
        .map(ConsoleCommand::Fail),
        keyword("help").value(ConsoleCommand::Help),
    ))
    .parse_next(input)
}

fn set(input: &mut &str) -> ModalResult<ConsoleCommand> {
    (keyword("set"), gap).void().parse_next(input)?;
    let channel = number::<u8>.verify_map(ChannelId::new).parse_next(input)?;
    gap.parse_next(input)?;
    let millivolts = volts.parse_next(input)?;
    Ok(ConsoleCommand::Set {
        channel,
        millivolts,
    })
}

/// Decimal volts with up to three fractional digits, returned in millivolts.
fn volts(input: &mut &str) -> ModalResult<i32> {
    let whole = number::<u16>.parse_next(input)?;
    let fraction = opt(preceded('.', digits)).parse_next(input)?;

    let mut millivolts = i32::from(whole) * 1_000;
    if let Some(fraction) = fraction {
        let mut scale = 100;
        for digit in fraction.bytes().take(3) {
            millivolts += i32::from(digit - b'0') * scale;
            scale /= 10;
        }
    }
    Ok(millivolts)
}
