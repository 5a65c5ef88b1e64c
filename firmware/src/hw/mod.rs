//! Board adapters: ADC inputs, relay output lines and the counter flash page.

use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::flash::{Blocking, Flash};
use embassy_stm32::gpio::{Level, Output};
use embassy_stm32::peripherals::ADC1;
use relay_core::sampling::{AnalogSink, AnalogSource, CHANNEL_COUNT, ChannelId};
use relay_core::storage::{StorageDevice, StorageError};

/// ADC code of a 0 V input on the bipolar front end.
const ADC_MIDSCALE: i32 = 2_048;
/// Scales a 12-bit code to the signed 16-bit range used by the relay logic.
const ADC_GAIN: i32 = 16;

/// Offset of the last 2 KiB page, relative to the flash base.
const COUNTER_PAGE_OFFSET: u32 = 0x7_F800;
const COUNTER_PAGE_SIZE: u32 = 2_048;
/// One double-word phrase at the start of the page.
const COUNTER_REGION_LEN: usize = 8;

/// Samples the three measurement inputs.
pub struct AdcSource {
    adc: Adc<'static, ADC1>,
    inputs: [AnyAdcChannel<ADC1>; CHANNEL_COUNT],
}

impl AdcSource {
    pub fn new(mut adc: Adc<'static, ADC1>, inputs: [AnyAdcChannel<ADC1>; CHANNEL_COUNT]) -> Self {
        adc.set_sample_time(SampleTime::CYCLES12_5);
        Self { adc, inputs }
    }
}

impl AnalogSource for AdcSource {
    fn sample(&mut self, channel: ChannelId) -> i16 {
        let code = self.adc.blocking_read(&mut self.inputs[channel.index()]);
        let centered = (i32::from(code) - ADC_MIDSCALE) * ADC_GAIN;
        i16::try_from(centered.clamp(i32::from(i16::MIN), i32::from(i16::MAX))).unwrap_or(0)
    }
}

/// Lower, raise and alarm outputs. Any positive magnitude drives a line high.
pub struct RelayLines {
    lines: [Output<'static>; 3],
}

impl RelayLines {
    pub fn new(lower: Output<'static>, raise: Output<'static>, alarm: Output<'static>) -> Self {
        // Indexed by LOWER_LINE, RAISE_LINE and ALARM_LINE.
        Self {
            lines: [lower, raise, alarm],
        }
    }
}

impl AnalogSink for RelayLines {
    fn put(&mut self, line: u8, magnitude: i16) {
        if let Some(output) = self.lines.get_mut(usize::from(line)) {
            output.set_level(Level::from(magnitude > 0));
        }
    }
}

/// Trip-counter region in the last flash page.
///
/// The page holds nothing but the counter phrase, so erasing a unit erases
/// the whole page.
pub struct FlashStorage {
    flash: Flash<'static, Blocking>,
}

impl FlashStorage {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self { flash }
    }

    fn address(offset: usize, len: usize) -> Result<u32, StorageError> {
        let end = offset.checked_add(len).ok_or(StorageError::OutOfRange)?;
        if end > COUNTER_REGION_LEN {
            return Err(StorageError::OutOfRange);
        }
        let offset = u32::try_from(offset).map_err(|_| StorageError::OutOfRange)?;
        Ok(COUNTER_PAGE_OFFSET + offset)
    }
}

impl StorageDevice for FlashStorage {
    const UNIT_SIZE: usize = COUNTER_REGION_LEN;

    fn capacity(&self) -> usize {
        COUNTER_REGION_LEN
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let address = Self::address(offset, buf.len())?;
        self.flash.blocking_read(address, buf).map_err(|_| {
            defmt::warn!("flash: read failed at {=u32:#x}", address);
            StorageError::ReadFailed
        })
    }

    fn erase_unit(&mut self, offset: usize) -> Result<(), StorageError> {
        Self::address(offset, Self::UNIT_SIZE)?;
        self.flash
            .blocking_erase(COUNTER_PAGE_OFFSET, COUNTER_PAGE_OFFSET + COUNTER_PAGE_SIZE)
            .map_err(|_| {
                defmt::warn!("flash: erase failed");
                StorageError::EraseFailed
            })
    }

    fn program_unit(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        let address = Self::address(offset, bytes.len())?;
        self.flash.blocking_write(address, bytes).map_err(|_| {
            defmt::warn!("flash: program failed at {=u32:#x}", address);
            StorageError::ProgramFailed
        })
    }
}
