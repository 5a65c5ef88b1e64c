//! Decodes host commands and produces reply and acknowledgement frames.

use core::fmt;

use heapless::Vec;

use crate::frame::Frame;
use crate::relay::{Direction, TimingMode, TimingModeWriter};
use crate::storage::CounterBank;

/// Maximum frames produced for one request: a reply plus the ack echo.
pub const MAX_REPLIES: usize = 2;

/// Frames queued for transmission in response to one request.
pub type Replies = Vec<Frame, MAX_REPLIES>;

/// Command codes, acknowledgement bit excluded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Command {
    TimingMode = 0x10,
    Raises = 0x11,
    Lowers = 0x12,
    Frequency = 0x17,
    Voltage = 0x18,
    Spectrum = 0x19,
}

impl Command {
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x10 => Some(Command::TimingMode),
            0x11 => Some(Command::Raises),
            0x12 => Some(Command::Lowers),
            0x17 => Some(Command::Frequency),
            0x18 => Some(Command::Voltage),
            0x19 => Some(Command::Spectrum),
            _ => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Request frame for this command with the given parameters.
    #[must_use]
    pub const fn frame(self, parameter1: u8, parameter2: u8, parameter3: u8) -> Frame {
        Frame::new(self.code(), parameter1, parameter2, parameter3)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::TimingMode => f.write_str("timing"),
            Command::Raises => f.write_str("raises"),
            Command::Lowers => f.write_str("lowers"),
            Command::Frequency => f.write_str("frequency"),
            Command::Voltage => f.write_str("voltage"),
            Command::Spectrum => f.write_str("spectrum"),
        }
    }
}

/// `(parameter1, parameter2, parameter3)` of a query.
const GET: (u8, u8, u8) = (0, 0, 0);
const SET_DEFINITE: u8 = 1;
const SET_INVERSE: u8 = 2;
const RESET: u8 = 1;

/// Result of handling one request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dispatch {
    pub command: Option<Command>,
    pub success: bool,
    pub replies: Replies,
}

/// Owns the timing-mode writer and applies host requests.
pub struct CommandDispatcher<'a> {
    mode: TimingModeWriter<'a>,
}

impl<'a> CommandDispatcher<'a> {
    #[must_use]
    pub const fn new(mode: TimingModeWriter<'a>) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn mode(&self) -> TimingMode {
        self.mode.get()
    }

    /// Handles `request`. Replies come first; when the request carried the
    /// acknowledgement bit the original frame is echoed last with the bit set
    /// on success and cleared on failure.
    pub fn handle<C: CounterBank + ?Sized>(&mut self, request: Frame, counters: &mut C) -> Dispatch {
        let command = Command::from_code(request.command_code());
        let mut replies = Replies::new();

        let success = match command {
            Some(Command::TimingMode) => self.handle_timing(request, &mut replies),
            Some(Command::Raises) => {
                Self::handle_counter(Direction::Raise, request, counters, &mut replies)
            }
            Some(Command::Lowers) => {
                Self::handle_counter(Direction::Lower, request, counters, &mut replies)
            }
            Some(Command::Frequency | Command::Voltage | Command::Spectrum) => true,
            None => false,
        };

        if request.ack_requested() {
            // At most one reply precedes the echo, so capacity is never exceeded.
            let _ = replies.push(request.with_ack(success));
        }

        Dispatch {
            command,
            success,
            replies,
        }
    }

    /// Frames announcing the node state after boot: timing mode, raises, lowers.
    #[must_use]
    pub fn startup_frames<C: CounterBank + ?Sized>(&self, counters: &C) -> [Frame; 3] {
        [
            timing_reply(self.mode.get()),
            counter_reply(Command::Raises, counters.count(Direction::Raise)),
            counter_reply(Command::Lowers, counters.count(Direction::Lower)),
        ]
    }

    fn handle_timing(&mut self, request: Frame, replies: &mut Replies) -> bool {
        match request.parameters() {
            GET => replies.push(timing_reply(self.mode.get())).is_ok(),
            (SET_DEFINITE, _, _) => {
                self.mode.set(TimingMode::Definite);
                true
            }
            (SET_INVERSE, _, _) => {
                self.mode.set(TimingMode::Inverse);
                true
            }
            _ => false,
        }
    }

    fn handle_counter<C: CounterBank + ?Sized>(
        direction: Direction,
        request: Frame,
        counters: &mut C,
        replies: &mut Replies,
    ) -> bool {
        let command = match direction {
            Direction::Raise => Command::Raises,
            Direction::Lower => Command::Lowers,
        };
        match request.parameters() {
            GET => replies
                .push(counter_reply(command, counters.count(direction)))
                .is_ok(),
            (RESET, _, _) => counters.reset(direction).is_ok(),
            _ => false,
        }
    }
}

/// `(0x10, 0, mode, 0)` with mode 1 = definite, 2 = inverse.
#[must_use]
pub const fn timing_reply(mode: TimingMode) -> Frame {
    Command::TimingMode.frame(0, mode.to_wire(), 0)
}

/// `(command, count_lo, count_hi, 0)`.
#[must_use]
pub const fn counter_reply(command: Command, count: u16) -> Frame {
    let [lo, hi] = count.to_le_bytes();
    command.frame(lo, hi, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::TimingModeCell;
    use crate::storage::StorageError;

    #[derive(Default)]
    struct FakeCounters {
        raises: u16,
        lowers: u16,
        fail_reset: bool,
    }

    impl CounterBank for FakeCounters {
        fn count(&self, direction: Direction) -> u16 {
            match direction {
                Direction::Raise => self.raises,
                Direction::Lower => self.lowers,
            }
        }

        fn record(&mut self, direction: Direction) -> Result<u16, StorageError> {
            let count = match direction {
                Direction::Raise => &mut self.raises,
                Direction::Lower => &mut self.lowers,
            };
            *count += 1;
            Ok(*count)
        }

        fn reset(&mut self, direction: Direction) -> Result<(), StorageError> {
            if self.fail_reset {
                return Err(StorageError::EraseFailed);
            }
            match direction {
                Direction::Raise => self.raises = 0,
                Direction::Lower => self.lowers = 0,
            }
            Ok(())
        }
    }

    #[test]
    fn timing_get_with_ack_replies_then_echoes() {
        let cell = TimingModeCell::new(TimingMode::Definite);
        let mut dispatcher = CommandDispatcher::new(cell.take_writer().expect("writer"));
        let mut counters = FakeCounters::default();

        let dispatch = dispatcher.handle(Frame::new(0x90, 0, 0, 0), &mut counters);

        assert!(dispatch.success);
        assert_eq!(
            dispatch.replies.as_slice(),
            &[Frame::new(0x10, 0, 1, 0), Frame::new(0x90, 0, 0, 0)]
        );
    }

    #[test]
    fn timing_set_inverse_updates_shared_cell() {
        let cell = TimingModeCell::new(TimingMode::Definite);
        let mut dispatcher = CommandDispatcher::new(cell.take_writer().expect("writer"));

        let dispatch = dispatcher.handle(Frame::new(0x10, 2, 0, 0), &mut FakeCounters::default());

        assert!(dispatch.success);
        assert!(dispatch.replies.is_empty(), "no ack requested");
        assert_eq!(cell.get(), TimingMode::Inverse);
    }

    #[test]
    fn counter_get_encodes_little_endian() {
        let cell = TimingModeCell::default();
        let mut dispatcher = CommandDispatcher::new(cell.take_writer().expect("writer"));
        let mut counters = FakeCounters {
            raises: 0x0102,
            ..FakeCounters::default()
        };

        let dispatch = dispatcher.handle(Frame::new(0x11, 0, 0, 0), &mut counters);

        assert_eq!(dispatch.replies.as_slice(), &[Frame::new(0x11, 0x02, 0x01, 0)]);
    }

    #[test]
    fn failed_reset_clears_ack_bit() {
        let cell = TimingModeCell::default();
        let mut dispatcher = CommandDispatcher::new(cell.take_writer().expect("writer"));
        let mut counters = FakeCounters {
            lowers: 4,
            fail_reset: true,
            ..FakeCounters::default()
        };

        let dispatch = dispatcher.handle(Frame::new(0x92, 1, 0, 0), &mut counters);

        assert!(!dispatch.success);
        assert_eq!(dispatch.replies.as_slice(), &[Frame::new(0x12, 1, 0, 0)]);
    }

    #[test]
    fn unknown_command_fails_and_echoes_when_asked() {
        let cell = TimingModeCell::default();
        let mut dispatcher = CommandDispatcher::new(cell.take_writer().expect("writer"));

        let silent = dispatcher.handle(Frame::new(0x42, 0, 0, 0), &mut FakeCounters::default());
        assert!(!silent.success);
        assert!(silent.replies.is_empty());
        assert_eq!(silent.command, None);

        let acked = dispatcher.handle(Frame::new(0xC2, 0, 0, 0), &mut FakeCounters::default());
        assert_eq!(acked.replies.as_slice(), &[Frame::new(0x42, 0, 0, 0)]);
    }

    #[test]
    fn measurement_commands_are_accepted_no_ops() {
        let cell = TimingModeCell::default();
        let mut dispatcher = CommandDispatcher::new(cell.take_writer().expect("writer"));

        for code in [0x97, 0x98, 0x99] {
            let dispatch = dispatcher.handle(Frame::new(code, 5, 6, 7), &mut FakeCounters::default());
            assert!(dispatch.success);
            assert_eq!(dispatch.replies.as_slice(), &[Frame::new(code, 5, 6, 7)]);
        }
    }

    #[test]
    fn startup_announces_mode_and_counts() {
        let cell = TimingModeCell::new(TimingMode::Inverse);
        let dispatcher = CommandDispatcher::new(cell.take_writer().expect("writer"));
        let counters = FakeCounters {
            raises: 3,
            lowers: 0x0100,
            fail_reset: false,
        };

        assert_eq!(
            dispatcher.startup_frames(&counters),
            [
                Frame::new(0x10, 0, 2, 0),
                Frame::new(0x11, 3, 0, 0),
                Frame::new(0x12, 0, 1, 0),
            ]
        );
    }
}
