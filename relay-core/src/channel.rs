//! Bounded byte channel bridging interrupt-level I/O with task-level consumers.
//!
//! The channel is a ring of `N` bytes guarded by two counting semaphores:
//! `free_space` starts at `N` and gates producers, `items_available` starts at
//! zero and gates consumers. Each index has exactly one writer: the tail is
//! advanced only through the [`Producer`] endpoint and the head only through
//! the [`Consumer`] endpoint, and each endpoint can be taken once.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::semaphore::{GreedySemaphore, Semaphore};
use portable_atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Default number of bytes buffered per direction.
pub const BYTE_CHANNEL_CAPACITY: usize = 256;

/// Error returned by the non-blocking producer calls when no slot is free.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelFull;

impl fmt::Display for ChannelFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("byte channel full")
    }
}

/// Fixed-capacity byte ring shared between one producer and one consumer.
pub struct ByteChannel<M: RawMutex, const N: usize = BYTE_CHANNEL_CAPACITY> {
    buffer: [AtomicU8; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    occupied: AtomicUsize,
    free_space: GreedySemaphore<M>,
    items_available: GreedySemaphore<M>,
    producer_taken: AtomicBool,
    consumer_taken: AtomicBool,
}

impl<M: RawMutex, const N: usize> ByteChannel<M, N> {
    /// Creates an empty channel with `N` free slots.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [const { AtomicU8::new(0) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            occupied: AtomicUsize::new(0),
            free_space: GreedySemaphore::new(N),
            items_available: GreedySemaphore::new(0),
            producer_taken: AtomicBool::new(false),
            consumer_taken: AtomicBool::new(false),
        }
    }

    /// Hands out the producer endpoint. Returns `None` after the first call.
    pub fn take_producer(&self) -> Option<Producer<'_, M, N>> {
        if self.producer_taken.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Producer { channel: self })
        }
    }

    /// Hands out the consumer endpoint. Returns `None` after the first call.
    pub fn take_consumer(&self) -> Option<Consumer<'_, M, N>> {
        if self.consumer_taken.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Consumer { channel: self })
        }
    }

    /// Number of bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    /// Returns `true` when no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when every slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    /// Total number of slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    fn push_tail(&self, byte: u8) {
        let tail = self.tail.load(Ordering::Relaxed);
        self.buffer[tail].store(byte, Ordering::Relaxed);
        self.tail.store((tail + 1) % N, Ordering::Release);
        self.occupied.fetch_add(1, Ordering::AcqRel);
    }

    fn pop_head(&self) -> u8 {
        let head = self.head.load(Ordering::Relaxed);
        let byte = self.buffer[head].load(Ordering::Relaxed);
        self.head.store((head + 1) % N, Ordering::Release);
        self.occupied.fetch_sub(1, Ordering::AcqRel);
        byte
    }
}

impl<M: RawMutex, const N: usize> Default for ByteChannel<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for `count` permits and keeps them consumed.
async fn acquire_permits<S: Semaphore>(semaphore: &S, count: usize) {
    // The greedy semaphore never reports a wait-queue overflow.
    if let Ok(permit) = semaphore.acquire(count).await {
        permit.disarm();
    }
}

/// Writing endpoint; the only code path that advances the tail index.
pub struct Producer<'a, M: RawMutex, const N: usize = BYTE_CHANNEL_CAPACITY> {
    channel: &'a ByteChannel<M, N>,
}

impl<M: RawMutex, const N: usize> Producer<'_, M, N> {
    /// Appends one byte, waiting for a free slot when the channel is full.
    pub async fn put(&mut self, byte: u8) {
        acquire_permits(&self.channel.free_space, 1).await;
        self.channel.push_tail(byte);
        self.channel.items_available.release(1);
    }

    /// Appends one byte without waiting. Safe to call from interrupt context.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelFull`] when no slot is free; the byte is discarded.
    pub fn try_put(&mut self, byte: u8) -> Result<(), ChannelFull> {
        let permit = self.channel.free_space.try_acquire(1).ok_or(ChannelFull)?;
        permit.disarm();
        self.channel.push_tail(byte);
        self.channel.items_available.release(1);
        Ok(())
    }

    /// Appends `bytes` contiguously, reserving every slot before writing any.
    ///
    /// The consumer never observes a partial sequence interleaved with other
    /// writes because only this endpoint writes to the tail. Sequences longer
    /// than the capacity are written in capacity-sized chunks, each reserved
    /// as a whole.
    pub async fn put_all(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(N.max(1)) {
            acquire_permits(&self.channel.free_space, chunk.len()).await;
            for &byte in chunk {
                self.channel.push_tail(byte);
            }
            self.channel.items_available.release(chunk.len());
        }
    }

    /// Non-blocking variant of [`Producer::put_all`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelFull`] when fewer than `bytes.len()` slots are free;
    /// nothing is written in that case.
    pub fn try_put_all(&mut self, bytes: &[u8]) -> Result<(), ChannelFull> {
        if bytes.is_empty() {
            return Ok(());
        }
        let permit = self
            .channel
            .free_space
            .try_acquire(bytes.len())
            .ok_or(ChannelFull)?;
        permit.disarm();
        for &byte in bytes {
            self.channel.push_tail(byte);
        }
        self.channel.items_available.release(bytes.len());
        Ok(())
    }
}

/// Reading endpoint; the only code path that advances the head index.
pub struct Consumer<'a, M: RawMutex, const N: usize = BYTE_CHANNEL_CAPACITY> {
    channel: &'a ByteChannel<M, N>,
}

impl<M: RawMutex, const N: usize> Consumer<'_, M, N> {
    /// Removes the oldest byte, waiting until one is available.
    pub async fn get(&mut self) -> u8 {
        acquire_permits(&self.channel.items_available, 1).await;
        let byte = self.channel.pop_head();
        self.channel.free_space.release(1);
        byte
    }

    /// Removes the oldest byte if one is buffered.
    pub fn try_get(&mut self) -> Option<u8> {
        let permit = self.channel.items_available.try_acquire(1)?;
        permit.disarm();
        let byte = self.channel.pop_head();
        self.channel.free_space.release(1);
        Some(byte)
    }

    /// Number of bytes waiting to be read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.channel.len()
    }

    /// Waits until at least one byte is buffered, leaving it in place.
    pub async fn wait_pending(&self) {
        // Dropping the permit hands it straight back.
        let _ = self.channel.items_available.acquire(1).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::pin::pin;
    use core::task::Poll;
    use embassy_futures::{block_on, poll_once};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type TestChannel = ByteChannel<CriticalSectionRawMutex, 4>;

    #[test]
    fn endpoints_can_only_be_taken_once() {
        let channel = TestChannel::new();

        assert!(channel.take_producer().is_some());
        assert!(channel.take_producer().is_none());
        assert!(channel.take_consumer().is_some());
        assert!(channel.take_consumer().is_none());
    }

    #[test]
    fn bytes_come_out_in_fifo_order_across_wraparound() {
        let channel = TestChannel::new();
        let mut tx = channel.take_producer().expect("producer");
        let mut rx = channel.take_consumer().expect("consumer");

        for round in 0u8..3 {
            block_on(tx.put_all(&[round, round + 10, round + 20]));
            assert_eq!(block_on(rx.get()), round);
            assert_eq!(block_on(rx.get()), round + 10);
            assert_eq!(block_on(rx.get()), round + 20);
        }
        assert!(channel.is_empty());
    }

    #[test]
    fn put_blocks_when_full_until_consumer_frees_a_slot() {
        let channel = TestChannel::new();
        let mut tx = channel.take_producer().expect("producer");
        let mut rx = channel.take_consumer().expect("consumer");

        for byte in 0..4 {
            block_on(tx.put(byte));
        }
        assert!(channel.is_full());
        assert_eq!(poll_once(tx.put(99)), Poll::Pending);
        assert_eq!(tx.try_put(99), Err(ChannelFull));

        assert_eq!(rx.try_get(), Some(0));
        assert_eq!(poll_once(tx.put(4)), Poll::Ready(()));
        assert_eq!(channel.len(), 4);

        let drained: [u8; 4] = core::array::from_fn(|_| block_on(rx.get()));
        assert_eq!(drained, [1, 2, 3, 4]);
    }

    #[test]
    fn get_blocks_when_empty() {
        let channel = TestChannel::new();
        let mut tx = channel.take_producer().expect("producer");
        let mut rx = channel.take_consumer().expect("consumer");

        assert_eq!(poll_once(rx.get()), Poll::Pending);
        assert_eq!(rx.try_get(), None);

        tx.try_put(7).expect("slot available");
        assert_eq!(poll_once(rx.get()), Poll::Ready(7));
    }

    #[test]
    fn put_all_reserves_every_slot_before_writing() {
        let channel = TestChannel::new();
        let mut tx = channel.take_producer().expect("producer");
        let mut rx = channel.take_consumer().expect("consumer");

        tx.try_put(1).expect("slot available");
        tx.try_put(2).expect("slot available");

        assert_eq!(tx.try_put_all(&[3, 4, 5]), Err(ChannelFull));
        assert_eq!(channel.len(), 2, "a rejected batch must not write a prefix");
        assert_eq!(poll_once(tx.put_all(&[3, 4, 5])), Poll::Pending);
        assert_eq!(channel.len(), 2);

        assert_eq!(rx.try_get(), Some(1));
        assert_eq!(poll_once(tx.put_all(&[3, 4, 5])), Poll::Ready(()));
        assert_eq!(rx.pending(), 4);
    }

    #[test]
    fn put_all_longer_than_capacity_completes_as_consumer_drains() {
        let channel = TestChannel::new();
        let mut tx = channel.take_producer().expect("producer");
        let mut rx = channel.take_consumer().expect("consumer");

        let mut write = pin!(tx.put_all(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(poll_once(&mut write), Poll::Pending);
        assert_eq!(rx.pending(), 4);

        let first: [u8; 4] = core::array::from_fn(|_| rx.try_get().expect("queued byte"));
        assert_eq!(first, [1, 2, 3, 4]);

        assert_eq!(poll_once(&mut write), Poll::Ready(()));
        assert_eq!(rx.try_get(), Some(5));
        assert_eq!(rx.try_get(), Some(6));
        assert_eq!(rx.try_get(), None);
    }

    #[test]
    fn wait_pending_does_not_consume() {
        let channel = TestChannel::new();
        let mut tx = channel.take_producer().expect("producer");
        let mut rx = channel.take_consumer().expect("consumer");

        assert_eq!(poll_once(rx.wait_pending()), Poll::Pending);
        tx.try_put(9).expect("slot available");
        assert_eq!(poll_once(rx.wait_pending()), Poll::Ready(()));
        assert_eq!(rx.pending(), 1);
        assert_eq!(rx.try_get(), Some(9));
    }

    #[test]
    fn default_capacity_is_256() {
        let channel: ByteChannel<CriticalSectionRawMutex> = ByteChannel::new();
        assert_eq!(channel.capacity(), BYTE_CHANNEL_CAPACITY);
        assert_eq!(channel.capacity(), 256);
    }
}
