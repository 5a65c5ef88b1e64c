use embassy_futures::select::{Either, select};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::mode::Blocking;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits, Uart};
use embassy_time::{Duration, Ticker};
use embedded_io_async::{Read, Write};
use heapless::Vec;
use relay_core::transport::{PollingDriver, SerialPort};
use static_cell::StaticCell;

use super::{NodeConsumer, NodeInterruptDriver, NodeProducer};
use crate::telemetry;

const UART_BUFFER_SIZE: usize = 64;
/// Bytes handed to the UART per transmit-ready wakeup.
const TRANSMIT_BURST: usize = 16;
/// One byte time at 115 200 baud is about 87 us.
const POLL_INTERVAL: Duration = Duration::from_micros(50);

static UART_TX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

fn uart_config(baud_rate: u32) -> UartConfig {
    let mut config = UartConfig::default();
    config.baudrate = baud_rate;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;
    config
}

/// Bytes released by the driver, written to the UART in one burst.
struct TransmitStage {
    bytes: Vec<u8, TRANSMIT_BURST>,
}

impl SerialPort for TransmitStage {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }

    fn transmit_ready(&self) -> bool {
        !self.bytes.is_full()
    }

    fn write_byte(&mut self, byte: u8) {
        // Only called after transmit_ready.
        let _ = self.bytes.push(byte);
    }
}

/// Interrupt-driven transport: the UART interrupt wakes this task, which
/// invokes the driver's receive and transmit-ready entry points.
#[embassy_executor::task]
pub async fn run_interrupt(
    mut driver: NodeInterruptDriver,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
    baud_rate: u32,
) -> ! {
    let uart = BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        UART_TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UartIrqs,
        uart_config(baud_rate),
    )
    .expect("failed to initialize UART");

    let (mut uart_tx, mut uart_rx) = uart.split();
    let mut ingress = [0u8; UART_BUFFER_SIZE];
    let mut stage = TransmitStage { bytes: Vec::new() };

    loop {
        match select(uart_rx.read(&mut ingress), driver.wait_transmit()).await {
            Either::First(Ok(count)) => {
                for &byte in &ingress[..count] {
                    if !driver.on_byte_received(byte) {
                        telemetry::log_transport_stats(driver.stats());
                    }
                }
            }
            Either::First(Err(_)) => {
                defmt::warn!("uart: read error");
            }
            Either::Second(()) => {
                while stage.transmit_ready() && driver.on_transmit_ready(&mut stage) {}
                if uart_tx.write_all(&stage.bytes).await.is_err() {
                    defmt::warn!("uart: write error, {} bytes lost", stage.bytes.len());
                }
                stage.bytes.clear();
            }
        }
    }
}

/// Blocking UART serviced by [`PollingDriver`].
struct PolledUart {
    uart: Uart<'static, Blocking>,
}

impl SerialPort for PolledUart {
    fn read_byte(&mut self) -> Option<u8> {
        self.uart.nb_read().ok()
    }

    fn transmit_ready(&self) -> bool {
        true
    }

    fn write_byte(&mut self, byte: u8) {
        if self.uart.blocking_write(&[byte]).is_err() {
            defmt::warn!("uart: write error");
        }
    }
}

/// Polling transport for boards without a usable UART interrupt.
#[embassy_executor::task]
pub async fn run_polling(
    rx: NodeProducer,
    tx: NodeConsumer,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
    baud_rate: u32,
) -> ! {
    let uart = Uart::new_blocking(usart, rx_pin, tx_pin, uart_config(baud_rate))
        .expect("failed to initialize UART");
    let mut driver = PollingDriver::new(PolledUart { uart }, rx, tx);
    let mut ticker = Ticker::every(POLL_INTERVAL);
    let mut overruns = 0;

    loop {
        driver.drain();
        let stats = driver.stats();
        if stats.overruns != overruns {
            overruns = stats.overruns;
            telemetry::log_transport_stats(stats);
        }
        ticker.next().await;
    }
}
