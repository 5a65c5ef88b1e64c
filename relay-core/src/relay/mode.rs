//! Timing mode shared by every relay and its single writer handle.

use core::fmt;

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

/// Trip timing curve.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TimingMode {
    /// Fixed delay regardless of how far the voltage strays.
    #[default]
    Definite,
    /// Delay shrinks as the deviation from nominal grows.
    Inverse,
}

impl TimingMode {
    /// Protocol encoding used by the timing-mode command.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            TimingMode::Definite => 1,
            TimingMode::Inverse => 2,
        }
    }

    #[must_use]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(TimingMode::Definite),
            2 => Some(TimingMode::Inverse),
            _ => None,
        }
    }
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingMode::Definite => f.write_str("definite"),
            TimingMode::Inverse => f.write_str("inverse"),
        }
    }
}

/// Lock-free holder of the current [`TimingMode`].
///
/// Any number of readers may call [`TimingModeCell::get`]; writes go through
/// the one [`TimingModeWriter`] handed out by [`TimingModeCell::take_writer`].
pub struct TimingModeCell {
    raw: AtomicU8,
    writer_taken: AtomicBool,
}

impl TimingModeCell {
    #[must_use]
    pub const fn new(mode: TimingMode) -> Self {
        Self {
            raw: AtomicU8::new(mode.to_wire()),
            writer_taken: AtomicBool::new(false),
        }
    }

    /// Current mode. Always a valid variant, possibly one write stale.
    #[must_use]
    pub fn get(&self) -> TimingMode {
        TimingMode::from_wire(self.raw.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Hands out the writer. Returns `None` after the first call.
    pub fn take_writer(&self) -> Option<TimingModeWriter<'_>> {
        if self.writer_taken.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(TimingModeWriter { cell: self })
        }
    }
}

impl Default for TimingModeCell {
    fn default() -> Self {
        Self::new(TimingMode::default())
    }
}

/// Exclusive write access to a [`TimingModeCell`].
pub struct TimingModeWriter<'a> {
    cell: &'a TimingModeCell,
}

impl TimingModeWriter<'_> {
    pub fn set(&mut self, mode: TimingMode) {
        self.cell.raw.store(mode.to_wire(), Ordering::Release);
    }

    #[must_use]
    pub fn get(&self) -> TimingMode {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_writer_updates_readers() {
        let cell = TimingModeCell::new(TimingMode::Definite);
        let mut writer = cell.take_writer().expect("first writer");
        assert!(cell.take_writer().is_none());

        writer.set(TimingMode::Inverse);
        assert_eq!(cell.get(), TimingMode::Inverse);
        assert_eq!(writer.get(), TimingMode::Inverse);
    }

    #[test]
    fn wire_codes() {
        assert_eq!(TimingMode::Definite.to_wire(), 1);
        assert_eq!(TimingMode::from_wire(2), Some(TimingMode::Inverse));
        assert_eq!(TimingMode::from_wire(0), None);
    }
}
