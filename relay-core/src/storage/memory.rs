//! In-RAM storage device used by tests and the emulator.

use super::{ERASED_BYTE, StorageDevice, StorageError};

/// One-shot fault armed on a [`MemoryStorage`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageFault {
    /// The next erase reports failure and leaves the unit untouched.
    Erase,
    /// The next program reports failure and leaves the unit erased.
    Program,
}

/// `N` bytes of simulated flash with `UNIT`-byte erase units.
///
/// Programming can only clear bits, like real flash, so a missed erase shows
/// up as corrupted data instead of passing silently.
#[derive(Clone, Debug)]
pub struct MemoryStorage<const N: usize, const UNIT: usize> {
    bytes: [u8; N],
    erase_count: u32,
    program_count: u32,
    fail_erase: bool,
    fail_program: bool,
}

impl<const N: usize, const UNIT: usize> MemoryStorage<N, UNIT> {
    /// Creates a fully erased device.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: [ERASED_BYTE; N],
            erase_count: 0,
            program_count: 0,
            fail_erase: false,
            fail_program: false,
        }
    }

    /// Arms a fault for the next matching operation.
    pub fn inject(&mut self, fault: StorageFault) {
        match fault {
            StorageFault::Erase => self.fail_erase = true,
            StorageFault::Program => self.fail_program = true,
        }
    }

    /// Raw device contents.
    #[must_use]
    pub const fn contents(&self) -> &[u8; N] {
        &self.bytes
    }

    #[must_use]
    pub const fn erase_count(&self) -> u32 {
        self.erase_count
    }

    #[must_use]
    pub const fn program_count(&self) -> u32 {
        self.program_count
    }

    fn unit_range(offset: usize) -> Result<core::ops::Range<usize>, StorageError> {
        if UNIT == 0 || !offset.is_multiple_of(UNIT) {
            return Err(StorageError::AlignmentViolation);
        }
        if offset + UNIT > N {
            return Err(StorageError::OutOfRange);
        }
        Ok(offset..offset + UNIT)
    }
}

impl<const N: usize, const UNIT: usize> Default for MemoryStorage<N, UNIT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const UNIT: usize> StorageDevice for MemoryStorage<N, UNIT> {
    const UNIT_SIZE: usize = UNIT;

    fn capacity(&self) -> usize {
        N
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let end = offset
            .checked_add(buf.len())
            .filter(|end| *end <= N)
            .ok_or(StorageError::OutOfRange)?;
        buf.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }

    fn erase_unit(&mut self, offset: usize) -> Result<(), StorageError> {
        let range = Self::unit_range(offset)?;
        if core::mem::take(&mut self.fail_erase) {
            return Err(StorageError::EraseFailed);
        }
        self.bytes[range].fill(ERASED_BYTE);
        self.erase_count += 1;
        Ok(())
    }

    fn program_unit(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        let range = Self::unit_range(offset)?;
        if bytes.len() != UNIT {
            return Err(StorageError::OutOfRange);
        }
        if core::mem::take(&mut self.fail_program) {
            return Err(StorageError::ProgramFailed);
        }
        for (cell, &byte) in self.bytes[range].iter_mut().zip(bytes) {
            *cell &= byte;
        }
        self.program_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programming_without_erase_only_clears_bits() {
        let mut device = MemoryStorage::<4, 4>::new();
        device.program_unit(0, &[0x0F, 0xF0, 0xFF, 0x00]).expect("program");
        device.program_unit(0, &[0xF0, 0xF0, 0x0F, 0xFF]).expect("program");

        assert_eq!(device.contents(), &[0x00, 0xF0, 0x0F, 0x00]);
    }

    #[test]
    fn injected_faults_fire_once() {
        let mut device = MemoryStorage::<8, 8>::new();
        device.inject(StorageFault::Erase);

        assert_eq!(device.erase_unit(0), Err(StorageError::EraseFailed));
        assert_eq!(device.erase_unit(0), Ok(()));
        assert_eq!(device.erase_count(), 1);
    }

    #[test]
    fn unit_operations_require_alignment() {
        let mut device = MemoryStorage::<8, 4>::new();

        assert_eq!(device.erase_unit(2), Err(StorageError::AlignmentViolation));
        assert_eq!(device.erase_unit(8), Err(StorageError::OutOfRange));
        assert_eq!(
            device.program_unit(4, &[0; 2]),
            Err(StorageError::OutOfRange)
        );
    }
}
