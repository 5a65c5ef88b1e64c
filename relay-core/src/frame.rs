//! Five-byte checksummed frames and the resynchronizing decoder.
//!
//! Every frame on the wire is `command, parameter1, parameter2, parameter3,
//! checksum` where the checksum is the XOR of the first four bytes. Bit 7 of
//! the command requests an acknowledgement.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::channel::{ChannelFull, Consumer, Producer};

/// Number of bytes in one encoded frame.
pub const FRAME_LEN: usize = 5;

/// Command bit requesting an acknowledgement echo.
pub const ACK_MASK: u8 = 0x80;

/// Decoded protocol frame. The checksum is derived, so a `Frame` is always valid.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub command: u8,
    pub parameter1: u8,
    pub parameter2: u8,
    pub parameter3: u8,
}

impl Frame {
    #[must_use]
    pub const fn new(command: u8, parameter1: u8, parameter2: u8, parameter3: u8) -> Self {
        Self {
            command,
            parameter1,
            parameter2,
            parameter3,
        }
    }

    /// XOR of the command and the three parameters.
    #[must_use]
    pub const fn checksum(&self) -> u8 {
        self.command ^ self.parameter1 ^ self.parameter2 ^ self.parameter3
    }

    /// Validates the trailing checksum and returns the frame it protects.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; FRAME_LEN]) -> Option<Self> {
        let frame = Self::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        if frame.checksum() == bytes[4] {
            Some(frame)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn to_bytes(&self) -> [u8; FRAME_LEN] {
        [
            self.command,
            self.parameter1,
            self.parameter2,
            self.parameter3,
            self.checksum(),
        ]
    }

    /// Returns `true` when the sender asked for an acknowledgement.
    #[must_use]
    pub const fn ack_requested(&self) -> bool {
        self.command & ACK_MASK != 0
    }

    /// Command code with the acknowledgement bit stripped.
    #[must_use]
    pub const fn command_code(&self) -> u8 {
        self.command & !ACK_MASK
    }

    /// Returns a copy with the acknowledgement bit set or cleared.
    #[must_use]
    pub const fn with_ack(mut self, ack: bool) -> Self {
        self.command = if ack {
            self.command | ACK_MASK
        } else {
            self.command & !ACK_MASK
        };
        self
    }

    #[must_use]
    pub const fn parameters(&self) -> (u8, u8, u8) {
        (self.parameter1, self.parameter2, self.parameter3)
    }
}

/// Rolling five-byte window that locks onto frame boundaries.
///
/// When a full window fails its checksum the oldest byte is discarded and the
/// decoder waits for one more byte, so a stream regains lock after at most
/// four misaligned bytes once valid frames resume.
#[derive(Clone, Debug, Default)]
pub struct FrameDecoder {
    window: [u8; FRAME_LEN],
    filled: usize,
    dropped: u32,
}

impl FrameDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            window: [0; FRAME_LEN],
            filled: 0,
            dropped: 0,
        }
    }

    /// Feeds one byte and returns a frame when the window validates.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        self.window[self.filled] = byte;
        self.filled += 1;
        if self.filled < FRAME_LEN {
            return None;
        }

        if let Some(frame) = Frame::from_bytes(self.window) {
            self.filled = 0;
            return Some(frame);
        }

        self.window.copy_within(1.., 0);
        self.filled = FRAME_LEN - 1;
        self.dropped = self.dropped.saturating_add(1);
        None
    }

    /// Bytes discarded while hunting for a frame boundary.
    #[must_use]
    pub const fn dropped_bytes(&self) -> u32 {
        self.dropped
    }

    /// Bytes held in the window waiting for the rest of a frame.
    #[must_use]
    pub const fn buffered(&self) -> usize {
        self.filled
    }
}

/// Pulls bytes from a channel consumer until a frame decodes.
pub struct FrameReader<'a, M: RawMutex, const N: usize> {
    consumer: Consumer<'a, M, N>,
    decoder: FrameDecoder,
}

impl<'a, M: RawMutex, const N: usize> FrameReader<'a, M, N> {
    #[must_use]
    pub const fn new(consumer: Consumer<'a, M, N>) -> Self {
        Self {
            consumer,
            decoder: FrameDecoder::new(),
        }
    }

    /// Waits for the next valid frame; corrupted bytes are skipped silently.
    pub async fn read_frame(&mut self) -> Frame {
        loop {
            let byte = self.consumer.get().await;
            if let Some(frame) = self.decoder.push(byte) {
                return frame;
            }
        }
    }

    /// Decodes from whatever is already buffered without waiting.
    pub fn try_read_frame(&mut self) -> Option<Frame> {
        while let Some(byte) = self.consumer.try_get() {
            if let Some(frame) = self.decoder.push(byte) {
                return Some(frame);
            }
        }
        None
    }

    #[must_use]
    pub const fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

/// Encodes frames into a channel producer, five bytes at a time.
pub struct FrameWriter<'a, M: RawMutex, const N: usize> {
    producer: Producer<'a, M, N>,
}

impl<'a, M: RawMutex, const N: usize> FrameWriter<'a, M, N> {
    #[must_use]
    pub const fn new(producer: Producer<'a, M, N>) -> Self {
        Self { producer }
    }

    /// Enqueues the encoded frame, waiting until all five slots are free.
    ///
    /// On channels narrower than a frame the bytes go out in
    /// capacity-sized chunks as the consumer drains them.
    pub async fn write_frame(&mut self, frame: Frame) {
        self.producer.put_all(&frame.to_bytes()).await;
    }

    /// Enqueues the encoded frame only if all five slots are free now.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelFull`] without writing anything when space is short.
    pub fn try_write_frame(&mut self, frame: Frame) -> Result<(), ChannelFull> {
        self.producer.try_put_all(&frame.to_bytes())
    }
}
