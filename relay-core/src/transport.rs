//! Serial transport drivers moving bytes between a UART and the byte channels.
//!
//! Two interchangeable drivers feed the same channel endpoints:
//! [`InterruptDriver`] exposes entry points for receive and transmit-ready
//! interrupts, while [`PollingDriver`] services the port from a periodic loop
//! when interrupts are unavailable. Only one of them owns the endpoints.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::channel::{Consumer, Producer};

/// Byte-oriented duplex serial port.
pub trait SerialPort {
    /// Returns a received byte if one is waiting.
    fn read_byte(&mut self) -> Option<u8>;

    /// Returns `true` when the transmitter can accept another byte.
    fn transmit_ready(&self) -> bool;

    /// Hands a byte to the transmitter. Only called after `transmit_ready`.
    fn write_byte(&mut self, byte: u8);
}

/// How the serial port is serviced.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TransportMode {
    #[default]
    Interrupt,
    Polling,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Interrupt => f.write_str("interrupt"),
            TransportMode::Polling => f.write_str("polling"),
        }
    }
}

/// Byte counts kept by both drivers.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TransportStats {
    pub received: u32,
    pub transmitted: u32,
    /// Received bytes discarded because the receive channel was full.
    pub overruns: u32,
}

/// Entry points for interrupt handlers. Every call is non-blocking.
pub struct InterruptDriver<'a, M: RawMutex, const N: usize> {
    rx: Producer<'a, M, N>,
    tx: Consumer<'a, M, N>,
    stats: TransportStats,
}

impl<'a, M: RawMutex, const N: usize> InterruptDriver<'a, M, N> {
    #[must_use]
    pub const fn new(rx: Producer<'a, M, N>, tx: Consumer<'a, M, N>) -> Self {
        Self {
            rx,
            tx,
            stats: TransportStats {
                received: 0,
                transmitted: 0,
                overruns: 0,
            },
        }
    }

    /// Receive interrupt: queue the byte for the packet task.
    ///
    /// Returns `false` when the byte was dropped because the channel is full.
    pub fn on_byte_received(&mut self, byte: u8) -> bool {
        if self.rx.try_put(byte).is_ok() {
            self.stats.received = self.stats.received.wrapping_add(1);
            true
        } else {
            self.stats.overruns = self.stats.overruns.wrapping_add(1);
            false
        }
    }

    /// Transmit-ready interrupt: move the next queued byte into `port`.
    ///
    /// Returns `false` when nothing was pending, so the caller can disable
    /// the transmit interrupt until more bytes are queued.
    pub fn on_transmit_ready<P: SerialPort + ?Sized>(&mut self, port: &mut P) -> bool {
        match self.tx.try_get() {
            Some(byte) => {
                port.write_byte(byte);
                self.stats.transmitted = self.stats.transmitted.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    /// Returns `true` when bytes are queued for transmission.
    #[must_use]
    pub fn transmit_pending(&self) -> bool {
        self.tx.pending() > 0
    }

    /// Waits until a byte is queued for transmission, i.e. until the
    /// transmit-ready interrupt should be enabled.
    pub async fn wait_transmit(&self) {
        self.tx.wait_pending().await;
    }

    #[must_use]
    pub const fn stats(&self) -> TransportStats {
        self.stats
    }
}

/// Services a port by checking its status on every call to [`PollingDriver::poll`].
pub struct PollingDriver<'a, P: SerialPort, M: RawMutex, const N: usize> {
    port: P,
    link: InterruptDriver<'a, M, N>,
}

impl<'a, P: SerialPort, M: RawMutex, const N: usize> PollingDriver<'a, P, M, N> {
    #[must_use]
    pub const fn new(port: P, rx: Producer<'a, M, N>, tx: Consumer<'a, M, N>) -> Self {
        Self {
            port,
            link: InterruptDriver::new(rx, tx),
        }
    }

    /// Moves at most one byte in each direction. Returns the number moved.
    pub fn poll(&mut self) -> usize {
        let mut moved = 0;
        if let Some(byte) = self.port.read_byte() {
            if self.link.on_byte_received(byte) {
                moved += 1;
            }
        }
        if self.port.transmit_ready() && self.link.on_transmit_ready(&mut self.port) {
            moved += 1;
        }
        moved
    }

    /// Polls until neither direction makes progress.
    pub fn drain(&mut self) -> usize {
        let mut total = 0;
        loop {
            let moved = self.poll();
            if moved == 0 {
                return total;
            }
            total += moved;
        }
    }

    #[must_use]
    pub const fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    #[must_use]
    pub const fn stats(&self) -> TransportStats {
        self.link.stats()
    }
}
