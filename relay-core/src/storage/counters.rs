//! Persistent raise/lower trip counters.

use super::{CounterStore, Slot, SlotWidth, StorageDevice, StorageError};
use crate::relay::Direction;

/// Highest count persisted; `0xFFFF` is the erased pattern and reads as zero.
pub const MAX_TRIP_COUNT: u16 = 0xFFFE;

/// Counter operations the command dispatcher and output stage rely on.
pub trait CounterBank {
    /// Current count for `direction`.
    fn count(&self, direction: Direction) -> u16;

    /// Increments and persists the count, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns the storage error when persisting fails; the in-memory count
    /// is still incremented.
    fn record(&mut self, direction: Direction) -> Result<u16, StorageError>;

    /// Clears and persists the count.
    ///
    /// # Errors
    ///
    /// Returns the storage error when persisting fails.
    fn reset(&mut self, direction: Direction) -> Result<(), StorageError>;
}

/// Raise and lower counters bound to two half-word slots.
///
/// Slots are allocated raise first, then lower, so every boot binds the same
/// offsets and reads back the values written before power was lost.
pub struct TripCounters<D: StorageDevice> {
    store: CounterStore<D>,
    raise_slot: Option<Slot>,
    lower_slot: Option<Slot>,
    raises: u16,
    lowers: u16,
}

impl<D: StorageDevice> TripCounters<D> {
    /// Allocates both slots on `device` and restores their stored values.
    ///
    /// A slot that cannot be allocated stays unbound; its counter then lives
    /// only in memory.
    pub fn bind(device: D) -> Self {
        let mut store = CounterStore::new(device);
        let raise_slot = store.allocate(SlotWidth::U16).ok();
        let lower_slot = store.allocate(SlotWidth::U16).ok();

        let mut counters = Self {
            store,
            raise_slot,
            lower_slot,
            raises: 0,
            lowers: 0,
        };
        counters.raises = counters.restore(raise_slot);
        counters.lowers = counters.restore(lower_slot);
        counters
    }

    fn restore(&mut self, slot: Option<Slot>) -> u16 {
        slot.and_then(|slot| self.store.read(slot).ok())
            .and_then(|raw| u16::try_from(raw).ok())
            .filter(|value| *value <= MAX_TRIP_COUNT)
            .unwrap_or(0)
    }

    #[must_use]
    pub const fn raises(&self) -> u16 {
        self.raises
    }

    #[must_use]
    pub const fn lowers(&self) -> u16 {
        self.lowers
    }

    /// Returns `true` when the counter for `direction` has a storage slot.
    #[must_use]
    pub const fn is_bound(&self, direction: Direction) -> bool {
        match direction {
            Direction::Raise => self.raise_slot.is_some(),
            Direction::Lower => self.lower_slot.is_some(),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &CounterStore<D> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CounterStore<D> {
        &mut self.store
    }

    /// Releases the underlying device, e.g. to simulate a power cycle.
    pub fn into_device(self) -> D {
        self.store.device
    }

    fn persist(&mut self, direction: Direction) -> Result<(), StorageError> {
        let (slot, value) = match direction {
            Direction::Raise => (self.raise_slot, self.raises),
            Direction::Lower => (self.lower_slot, self.lowers),
        };
        let slot = slot.ok_or(StorageError::Exhausted)?;
        self.store.write(slot, u32::from(value))
    }

    fn count_mut(&mut self, direction: Direction) -> &mut u16 {
        match direction {
            Direction::Raise => &mut self.raises,
            Direction::Lower => &mut self.lowers,
        }
    }
}

impl<D: StorageDevice> CounterBank for TripCounters<D> {
    fn count(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Raise => self.raises,
            Direction::Lower => self.lowers,
        }
    }

    fn record(&mut self, direction: Direction) -> Result<u16, StorageError> {
        let count = self.count_mut(direction);
        *count = count.saturating_add(1).min(MAX_TRIP_COUNT);
        let value = *count;
        self.persist(direction)?;
        Ok(value)
    }

    fn reset(&mut self, direction: Direction) -> Result<(), StorageError> {
        *self.count_mut(direction) = 0;
        self.persist(direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageFault};

    type Phrase = MemoryStorage<8, 8>;

    #[test]
    fn fresh_device_reads_zero() {
        let counters = TripCounters::bind(Phrase::new());

        assert_eq!(counters.raises(), 0);
        assert_eq!(counters.lowers(), 0);
        assert!(counters.is_bound(Direction::Raise));
        assert!(counters.is_bound(Direction::Lower));
    }

    #[test]
    fn counts_survive_a_power_cycle() {
        let mut counters = TripCounters::bind(Phrase::new());
        counters.record(Direction::Raise).expect("persist");
        counters.record(Direction::Raise).expect("persist");
        counters.record(Direction::Lower).expect("persist");

        let device = counters.into_device();
        assert_eq!(&device.contents()[..4], &[2, 0, 1, 0]);

        let restored = TripCounters::bind(device);
        assert_eq!(restored.raises(), 2);
        assert_eq!(restored.lowers(), 1);
    }

    #[test]
    fn reset_clears_only_the_requested_counter() {
        let mut counters = TripCounters::bind(Phrase::new());
        counters.record(Direction::Raise).expect("persist");
        counters.record(Direction::Lower).expect("persist");

        counters.reset(Direction::Raise).expect("persist");

        assert_eq!(counters.count(Direction::Raise), 0);
        assert_eq!(counters.count(Direction::Lower), 1);
    }

    #[test]
    fn failed_erase_keeps_in_memory_count() {
        let mut counters = TripCounters::bind(Phrase::new());
        counters.store_mut().device_mut().inject(StorageFault::Erase);

        assert_eq!(
            counters.record(Direction::Lower),
            Err(StorageError::EraseFailed)
        );
        assert_eq!(counters.lowers(), 1);
        assert_eq!(counters.store().device().program_count(), 0);
    }

    #[test]
    fn unbound_counters_report_exhaustion() {
        let mut counters = TripCounters::bind(MemoryStorage::<2, 2>::new());

        assert!(counters.is_bound(Direction::Raise));
        assert!(!counters.is_bound(Direction::Lower));
        assert_eq!(
            counters.record(Direction::Lower),
            Err(StorageError::Exhausted)
        );
        assert_eq!(counters.lowers(), 1);
    }
}
