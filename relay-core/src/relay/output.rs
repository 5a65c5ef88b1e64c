//! Drives the actuation lines from relay events.

use super::{Direction, RelayEvent, RelayState, millivolts};
use crate::sampling::{AnalogSink, CHANNEL_COUNT, ChannelId};
use crate::storage::{CounterBank, StorageError};

/// Output line commanding the tap changer to lower.
pub const LOWER_LINE: u8 = 0;
/// Output line commanding the tap changer to raise.
pub const RAISE_LINE: u8 = 1;
/// Output line flagging that some channel is out of band.
pub const ALARM_LINE: u8 = 2;

/// Level written to an asserted line (5 V).
pub const LINE_ASSERTED: i16 = millivolts(5_000);
pub const LINE_RELEASED: i16 = 0;

/// Combined line levels across all channels.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LineLevels {
    pub alarm: bool,
    pub raise: bool,
    pub lower: bool,
}

/// Aggregates per-channel relay states onto the shared output lines and
/// counts trips.
pub struct SignalOutput<A: AnalogSink> {
    sink: A,
    states: [RelayState; CHANNEL_COUNT],
    levels: LineLevels,
}

impl<A: AnalogSink> SignalOutput<A> {
    /// Takes ownership of the sink and releases every line.
    pub fn new(sink: A) -> Self {
        let mut output = Self {
            sink,
            states: [RelayState::Normal; CHANNEL_COUNT],
            levels: LineLevels::default(),
        };
        output.drive();
        output
    }

    /// Applies an event from `channel`, updates the lines and, on a trip,
    /// increments the persistent counter for the trip direction.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the counter could not be persisted;
    /// the lines are updated regardless.
    pub fn apply<C: CounterBank + ?Sized>(
        &mut self,
        channel: ChannelId,
        event: RelayEvent,
        counters: &mut C,
    ) -> Result<(), StorageError> {
        self.states[channel.index()] = match event {
            RelayEvent::OutOfRange(_) => RelayState::OutOfRange,
            RelayEvent::Tripped(direction) => RelayState::Tripped(direction),
            RelayEvent::Restored => RelayState::Normal,
        };
        self.drive();

        match event {
            RelayEvent::Tripped(direction) => counters.record(direction).map(|_| ()),
            RelayEvent::OutOfRange(_) | RelayEvent::Restored => Ok(()),
        }
    }

    #[must_use]
    pub const fn levels(&self) -> LineLevels {
        self.levels
    }

    #[must_use]
    pub const fn sink(&self) -> &A {
        &self.sink
    }

    fn drive(&mut self) {
        let levels = LineLevels {
            alarm: self.states.iter().any(|state| *state != RelayState::Normal),
            raise: self
                .states
                .contains(&RelayState::Tripped(Direction::Raise)),
            lower: self
                .states
                .contains(&RelayState::Tripped(Direction::Lower)),
        };
        self.levels = levels;
        self.sink.put(LOWER_LINE, level(levels.lower));
        self.sink.put(RAISE_LINE, level(levels.raise));
        self.sink.put(ALARM_LINE, level(levels.alarm));
    }
}

const fn level(asserted: bool) -> i16 {
    if asserted { LINE_ASSERTED } else { LINE_RELEASED }
}
