//! Relay event history shared by firmware and host targets.
//!
//! Events are kept in a fixed-size ring so the most recent history survives
//! without allocation. Each event kind maps to a compact numeric code so
//! targets without `core::fmt` support can still log it.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::relay::{Direction, RelayEvent, TimingMode};
use crate::sampling::ChannelId;
use crate::storage::StorageError;

/// Monotonic identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Events worth keeping in the history.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    OutOfRange(Direction),
    Tripped(Direction),
    Restored,
    CounterPersistFailed {
        direction: Direction,
        error: StorageError,
    },
    CounterReset(Direction),
    FrameDesync {
        dropped: u32,
    },
    ModeChanged(TimingMode),
}

impl TelemetryEventKind {
    const OUT_OF_RANGE_CODE: u8 = 0x01;
    const TRIPPED_CODE: u8 = 0x02;
    const RESTORED_CODE: u8 = 0x03;
    const PERSIST_FAILED_CODE: u8 = 0x10;
    const COUNTER_RESET_CODE: u8 = 0x11;
    const FRAME_DESYNC_CODE: u8 = 0x20;
    const MODE_CHANGED_CODE: u8 = 0x30;

    /// Compact discriminant for log transports.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            TelemetryEventKind::OutOfRange(_) => Self::OUT_OF_RANGE_CODE,
            TelemetryEventKind::Tripped(_) => Self::TRIPPED_CODE,
            TelemetryEventKind::Restored => Self::RESTORED_CODE,
            TelemetryEventKind::CounterPersistFailed { .. } => Self::PERSIST_FAILED_CODE,
            TelemetryEventKind::CounterReset(_) => Self::COUNTER_RESET_CODE,
            TelemetryEventKind::FrameDesync { .. } => Self::FRAME_DESYNC_CODE,
            TelemetryEventKind::ModeChanged(_) => Self::MODE_CHANGED_CODE,
        }
    }
}

impl From<RelayEvent> for TelemetryEventKind {
    fn from(event: RelayEvent) -> Self {
        match event {
            RelayEvent::OutOfRange(direction) => TelemetryEventKind::OutOfRange(direction),
            RelayEvent::Tripped(direction) => TelemetryEventKind::Tripped(direction),
            RelayEvent::Restored => TelemetryEventKind::Restored,
        }
    }
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::OutOfRange(direction) => {
                write!(f, "out of range, {direction} needed")
            }
            TelemetryEventKind::Tripped(direction) => write!(f, "tripped, {direction} asserted"),
            TelemetryEventKind::Restored => f.write_str("back in band"),
            TelemetryEventKind::CounterPersistFailed { direction, error } => {
                write!(f, "{direction} counter not persisted: {error}")
            }
            TelemetryEventKind::CounterReset(direction) => write!(f, "{direction} counter reset"),
            TelemetryEventKind::FrameDesync { dropped } => {
                write!(f, "frame desync, {dropped} bytes dropped")
            }
            TelemetryEventKind::ModeChanged(mode) => write!(f, "timing mode now {mode}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    /// Sampling tick at which the event was recorded.
    pub tick: u64,
    pub channel: Option<ChannelId>,
    pub event: TelemetryEventKind,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @{} ", self.id, self.tick)?;
        if let Some(channel) = self.channel {
            write!(f, "{channel} ")?;
        }
        write!(f, "{}", self.event)
    }
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records a state machine transition for `channel`.
    pub fn record_relay(&mut self, tick: u64, channel: ChannelId, event: RelayEvent) -> EventId {
        self.record(tick, Some(channel), event.into())
    }

    /// Records an arbitrary telemetry event.
    pub fn record(
        &mut self,
        tick: u64,
        channel: Option<ChannelId>,
        event: TelemetryEventKind,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            tick,
            channel,
            event,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
