//! Byte-granular persistent storage for trip counters.
//!
//! Storage devices are erase-then-program: a unit must be erased (all bytes
//! `0xFF`) before it can be programmed, and only whole units can be erased.
//! [`CounterStore`] hides that by reading the unit, merging the new value,
//! erasing, and programming the merged image back.
//!
//! ```text
//! allocate(U16) -> Slot { offset: 0 }
//! allocate(U16) -> Slot { offset: 2 }
//! write_u16(2, 0x0102):
//!   read unit [aa bb ff ff ff ff ff ff]
//!   merge     [aa bb 02 01 ff ff ff ff]
//!   erase     [ff ff ff ff ff ff ff ff]
//!   program   [aa bb 02 01 ff ff ff ff]
//! ```

use core::fmt;

mod counters;
mod memory;

pub use counters::{CounterBank, MAX_TRIP_COUNT, TripCounters};
pub use memory::{MemoryStorage, StorageFault};

/// Largest region the free-space map can track (one bit per byte).
pub const MAX_REGION_SIZE: usize = 64;

/// Largest erase unit the merge buffer supports.
pub const MAX_UNIT_SIZE: usize = 64;

/// Value of an erased byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Errors reported by storage devices and the counter store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageError {
    /// No aligned run of free bytes remains for the requested width.
    Exhausted,
    /// The offset is not a multiple of the value width.
    AlignmentViolation,
    /// The access falls outside the storage region or the value does not fit.
    OutOfRange,
    /// The device failed to erase a unit; programming was skipped.
    EraseFailed,
    /// The device failed to program a unit.
    ProgramFailed,
    /// The device failed to read.
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Exhausted => f.write_str("storage region exhausted"),
            StorageError::AlignmentViolation => f.write_str("misaligned storage access"),
            StorageError::OutOfRange => f.write_str("storage access out of range"),
            StorageError::EraseFailed => f.write_str("storage erase failed"),
            StorageError::ProgramFailed => f.write_str("storage program failed"),
            StorageError::ReadFailed => f.write_str("storage read failed"),
        }
    }
}

/// Erase-then-program non-volatile memory.
pub trait StorageDevice {
    /// Smallest erasable and programmable unit, in bytes.
    const UNIT_SIZE: usize;

    /// Total addressable bytes.
    fn capacity(&self) -> usize;

    /// Copies `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfRange`] or [`StorageError::ReadFailed`].
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Resets the unit starting at `offset` to `0xFF`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EraseFailed`] when the device reports a failure.
    fn erase_unit(&mut self, offset: usize) -> Result<(), StorageError>;

    /// Programs an entire unit. The unit must have been erased.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ProgramFailed`] when the device reports a failure.
    fn program_unit(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Width of an allocated counter slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotWidth {
    U8,
    U16,
    U32,
}

impl SlotWidth {
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            SlotWidth::U8 => 1,
            SlotWidth::U16 => 2,
            SlotWidth::U32 => 4,
        }
    }

    const fn max_value(self) -> u32 {
        match self {
            SlotWidth::U8 => 0xFF,
            SlotWidth::U16 => 0xFFFF,
            SlotWidth::U32 => u32::MAX,
        }
    }
}

/// An allocated, width-aligned byte range inside the storage region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Slot {
    pub offset: usize,
    pub width: SlotWidth,
}

/// One bit per region byte; set bits are allocated.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FreeSpaceMap {
    used: u64,
}

impl FreeSpaceMap {
    #[must_use]
    pub const fn new() -> Self {
        Self { used: 0 }
    }

    const fn mask(offset: usize, len: usize) -> u64 {
        let bits = if len >= 64 {
            u64::MAX
        } else {
            (1u64 << len) - 1
        };
        bits << offset
    }

    #[must_use]
    pub const fn is_free(&self, offset: usize, len: usize) -> bool {
        self.used & Self::mask(offset, len) == 0
    }

    pub fn mark_used(&mut self, offset: usize, len: usize) {
        self.used |= Self::mask(offset, len);
    }

    /// Number of allocated bytes.
    #[must_use]
    pub const fn used_bytes(&self) -> u32 {
        self.used.count_ones()
    }
}

/// Allocator plus read-merge-erase-program writer over a [`StorageDevice`].
pub struct CounterStore<D: StorageDevice> {
    device: D,
    region: usize,
    map: FreeSpaceMap,
}

impl<D: StorageDevice> CounterStore<D> {
    /// Wraps `device`; the tracked region is the first
    /// `min(capacity, MAX_REGION_SIZE)` bytes.
    pub fn new(device: D) -> Self {
        let region = device.capacity().min(MAX_REGION_SIZE);
        Self {
            device,
            region,
            map: FreeSpaceMap::new(),
        }
    }

    /// Reserves the first free, width-aligned range.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Exhausted`] when no aligned range is free.
    pub fn allocate(&mut self, width: SlotWidth) -> Result<Slot, StorageError> {
        let len = width.bytes();
        let mut offset = 0;
        while offset + len <= self.region {
            if self.map.is_free(offset, len) {
                self.map.mark_used(offset, len);
                return Ok(Slot { offset, width });
            }
            offset += len;
        }
        Err(StorageError::Exhausted)
    }

    /// Persists `value` into `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfRange`] when `value` does not fit the slot
    /// width, otherwise any error from the underlying write.
    pub fn write(&mut self, slot: Slot, value: u32) -> Result<(), StorageError> {
        if value > slot.width.max_value() {
            return Err(StorageError::OutOfRange);
        }
        let bytes = value.to_le_bytes();
        self.write_bytes(slot.offset, &bytes[..slot.width.bytes()])
    }

    /// Reads the little-endian value stored in `slot`.
    ///
    /// # Errors
    ///
    /// Propagates device read failures.
    pub fn read(&mut self, slot: Slot) -> Result<u32, StorageError> {
        let mut bytes = [0u8; 4];
        let len = slot.width.bytes();
        self.check_access(slot.offset, len)?;
        self.device.read(slot.offset, &mut bytes[..len])?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// # Errors
    ///
    /// See [`CounterStore::write_bytes`].
    pub fn write_u8(&mut self, offset: usize, value: u8) -> Result<(), StorageError> {
        self.write_bytes(offset, &[value])
    }

    /// # Errors
    ///
    /// See [`CounterStore::write_bytes`].
    pub fn write_u16(&mut self, offset: usize, value: u16) -> Result<(), StorageError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// # Errors
    ///
    /// See [`CounterStore::write_bytes`].
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<(), StorageError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Writes a 1, 2 or 4 byte value at a width-aligned offset, leaving every
    /// other byte of the affected unit untouched.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlignmentViolation`] for misaligned offsets, before
    ///   any device access.
    /// - [`StorageError::OutOfRange`] for accesses past the region.
    /// - [`StorageError::EraseFailed`] when the erase fails; the unit is not
    ///   programmed.
    /// - [`StorageError::ProgramFailed`] when programming fails.
    pub fn write_bytes(&mut self, offset: usize, value: &[u8]) -> Result<(), StorageError> {
        self.check_access(offset, value.len())?;

        let unit = D::UNIT_SIZE;
        if unit == 0 || unit > MAX_UNIT_SIZE {
            return Err(StorageError::OutOfRange);
        }

        let end = offset + value.len();
        let mut unit_start = offset - offset % unit;
        while unit_start < end {
            let mut image = [ERASED_BYTE; MAX_UNIT_SIZE];
            let image = &mut image[..unit];
            self.device.read(unit_start, image)?;

            let copy_from = offset.max(unit_start);
            let copy_to = end.min(unit_start + unit);
            image[copy_from - unit_start..copy_to - unit_start]
                .copy_from_slice(&value[copy_from - offset..copy_to - offset]);

            self.device
                .erase_unit(unit_start)
                .map_err(|_| StorageError::EraseFailed)?;
            self.device.program_unit(unit_start, image)?;

            unit_start += unit;
        }
        Ok(())
    }

    fn check_access(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        if !matches!(len, 1 | 2 | 4) {
            return Err(StorageError::OutOfRange);
        }
        if !offset.is_multiple_of(len) {
            return Err(StorageError::AlignmentViolation);
        }
        if offset + len > self.region {
            return Err(StorageError::OutOfRange);
        }
        Ok(())
    }

    /// Bytes tracked by the free-space map.
    #[must_use]
    pub const fn region_len(&self) -> usize {
        self.region
    }

    #[must_use]
    pub const fn free_space(&self) -> &FreeSpaceMap {
        &self.map
    }

    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Phrase = MemoryStorage<8, 8>;

    #[test]
    fn allocation_is_aligned_and_disjoint() {
        let mut store = CounterStore::new(Phrase::new());

        let byte = store.allocate(SlotWidth::U8).expect("u8 slot");
        let half = store.allocate(SlotWidth::U16).expect("u16 slot");
        let word = store.allocate(SlotWidth::U32).expect("u32 slot");

        assert_eq!(byte.offset, 0);
        assert_eq!(half.offset, 2, "u16 skips the odd byte after the u8");
        assert_eq!(word.offset, 4);
        for slot in [byte, half, word] {
            assert_eq!(slot.offset % slot.width.bytes(), 0);
        }

        let filler = store.allocate(SlotWidth::U8).expect("odd byte remains");
        assert_eq!(filler.offset, 1);
        assert_eq!(store.allocate(SlotWidth::U8), Err(StorageError::Exhausted));
        assert_eq!(store.free_space().used_bytes(), 8);
    }

    #[test]
    fn region_fills_with_half_words_then_reports_exhaustion() {
        let mut store = CounterStore::new(Phrase::new());
        let offsets: [usize; 4] =
            core::array::from_fn(|_| store.allocate(SlotWidth::U16).expect("slot").offset);

        assert_eq!(offsets, [0, 2, 4, 6]);
        assert_eq!(store.allocate(SlotWidth::U16), Err(StorageError::Exhausted));
    }

    #[test]
    fn write_merges_without_disturbing_neighbours() {
        let mut store = CounterStore::new(Phrase::new());
        store.write_u32(4, 0xDEAD_BEEF).expect("seed word");
        store.write_u16(0, 0x1234).expect("seed half");

        store.write_u8(2, 0x7A).expect("byte write");

        let mut image = [0u8; 8];
        store.device_mut().read(0, &mut image).expect("read back");
        assert_eq!(image, [0x34, 0x12, 0x7A, 0xFF, 0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(store.device().erase_count(), 3);
    }

    #[test]
    fn misaligned_write_is_rejected_before_touching_the_device() {
        let mut store = CounterStore::new(Phrase::new());

        assert_eq!(
            store.write_u16(1, 0xAAAA),
            Err(StorageError::AlignmentViolation)
        );
        assert_eq!(store.write_u32(2, 1), Err(StorageError::AlignmentViolation));
        assert_eq!(store.write_u32(8, 1), Err(StorageError::OutOfRange));
        assert_eq!(store.device().erase_count(), 0);
        assert_eq!(store.device().program_count(), 0);
    }

    #[test]
    fn erase_failure_skips_programming() {
        let mut store = CounterStore::new(Phrase::new());
        store.write_u16(0, 5).expect("seed");
        store.device_mut().inject(StorageFault::Erase);

        assert_eq!(store.write_u16(0, 6), Err(StorageError::EraseFailed));
        assert_eq!(store.device().program_count(), 1, "only the seed programmed");
    }

    #[test]
    fn slot_write_checks_value_width() {
        let mut store = CounterStore::new(Phrase::new());
        let slot = store.allocate(SlotWidth::U8).expect("slot");

        assert_eq!(store.write(slot, 0x100), Err(StorageError::OutOfRange));
        store.write(slot, 0xAB).expect("fits");
        assert_eq!(store.read(slot), Ok(0xAB));
    }

    #[test]
    fn values_spanning_small_units_are_merged_per_unit() {
        let mut store = CounterStore::new(MemoryStorage::<8, 2>::new());
        store.write_u32(4, 0x0403_0201).expect("word across two units");

        let mut image = [0u8; 8];
        store.device_mut().read(0, &mut image).expect("read back");
        assert_eq!(image, [0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(store.device().erase_count(), 2);
    }
}
