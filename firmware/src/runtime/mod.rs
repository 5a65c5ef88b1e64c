use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicU64, Ordering};
use relay_core::NodeConfig;
use relay_core::channel::{BYTE_CHANNEL_CAPACITY, ByteChannel, Consumer, Producer};
use relay_core::config::DEFAULT_BAUD_RATE;
use relay_core::dispatch::CommandDispatcher;
use relay_core::frame::{FrameReader, FrameWriter};
use relay_core::relay::{
    DEFAULT_BAND, DEFAULT_DEFINITE_DELAY, DEFAULT_TICK_PERIOD, Direction, RelayConfig, RelayEvent,
    SignalOutput, TimingMode, TimingModeCell,
};
use relay_core::sampling::{CHANNEL_COUNT, ChannelId, SamplingPipeline};
use relay_core::storage::TripCounters;
use relay_core::telemetry::{TelemetryEventKind, TelemetryRecorder};
use relay_core::transport::{InterruptDriver, TransportMode};
use static_cell::StaticCell;

use crate::hw::{AdcSource, FlashStorage, RelayLines};
use crate::telemetry;

mod alarm_task;
mod packet_task;
mod rms_task;
mod sample_task;
mod signal_task;
mod uart_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Node configuration baked into the image.
const NODE_CONFIG: NodeConfig = NodeConfig::new(
    RelayConfig::new(DEFAULT_BAND, DEFAULT_TICK_PERIOD, DEFAULT_DEFINITE_DELAY),
    TransportMode::Interrupt,
    DEFAULT_BAUD_RATE,
);

/// Inputs queued per alarm task between two scheduler turns.
const ALARM_QUEUE_DEPTH: usize = 4;
/// Relay transitions waiting for the signal-output task.
const EVENT_QUEUE_DEPTH: usize = 8;

type RelayMutex = ThreadModeRawMutex;

type NodeChannel = ByteChannel<RelayMutex, BYTE_CHANNEL_CAPACITY>;
type NodeProducer = Producer<'static, RelayMutex, BYTE_CHANNEL_CAPACITY>;
type NodeConsumer = Consumer<'static, RelayMutex, BYTE_CHANNEL_CAPACITY>;
type NodeReader = FrameReader<'static, RelayMutex, BYTE_CHANNEL_CAPACITY>;
type NodeWriter = FrameWriter<'static, RelayMutex, BYTE_CHANNEL_CAPACITY>;
type NodeInterruptDriver = InterruptDriver<'static, RelayMutex, BYTE_CHANNEL_CAPACITY>;

type SharedCounters = Mutex<RelayMutex, RefCell<TripCounters<FlashStorage>>>;
type SharedPipeline = Mutex<RelayMutex, RefCell<SamplingPipeline>>;
type SharedTelemetry = Mutex<RelayMutex, RefCell<TelemetryRecorder>>;

/// Work delivered to one channel's alarm task. Both variants carry the
/// [`TICK`] count they were produced at, so a consumer that was held off can
/// account for ticks whose messages were dropped.
#[derive(Copy, Clone)]
enum AlarmInput {
    /// RMS of the window completed at `tick`.
    Rms { rms: i16, tick: u64 },
    /// Sampling tick `tick` elapsed; carries the live RMS of the filling window.
    Tick { live_rms: i16, tick: u64 },
}

type AlarmQueue = Channel<RelayMutex, AlarmInput, ALARM_QUEUE_DEPTH>;
type EventQueue = Channel<RelayMutex, (ChannelId, RelayEvent), EVENT_QUEUE_DEPTH>;

static RX_CHANNEL: NodeChannel = ByteChannel::new();
static TX_CHANNEL: NodeChannel = ByteChannel::new();
static TIMING_MODE: TimingModeCell = TimingModeCell::new(TimingMode::Definite);
static PIPELINE: SharedPipeline = Mutex::new(RefCell::new(SamplingPipeline::new()));
static TELEMETRY: SharedTelemetry = Mutex::new(RefCell::new(TelemetryRecorder::new()));
static ALARM_QUEUES: [AlarmQueue; CHANNEL_COUNT] = [const { Channel::new() }; CHANNEL_COUNT];
static RELAY_EVENTS: EventQueue = Channel::new();
/// RMS of the window that just completed, reduced under the pipeline lock,
/// and the tick it completed at.
static WINDOW_READY: Signal<RelayMutex, ([i16; CHANNEL_COUNT], u64)> = Signal::new();
static TICK: AtomicU64 = AtomicU64::new(0);
static COUNTERS: StaticCell<SharedCounters> = StaticCell::new();

/// Records a telemetry event at the current sampling tick.
fn record(channel: Option<ChannelId>, event: TelemetryEventKind) {
    let tick = TICK.load(Ordering::Relaxed);
    TELEMETRY.lock(|recorder| {
        telemetry::record(&mut recorder.borrow_mut(), tick, channel, event);
    });
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        ADC1,
        PA0,
        PA1,
        PA4,
        PA5,
        PA6,
        PA7,
        FLASH,
        USART5,
        PB0,
        PB1,
        ..
    } = hal::init(config);

    telemetry::log_startup(&NODE_CONFIG);

    let counters = TripCounters::bind(FlashStorage::new(Flash::new_blocking(FLASH)));
    for direction in [Direction::Raise, Direction::Lower] {
        if !counters.is_bound(direction) {
            defmt::warn!(
                "relay: no storage slot for {} counter, counting in RAM only",
                defmt::Display2Format(&direction)
            );
        }
    }
    let counters: &'static SharedCounters = COUNTERS.init(Mutex::new(RefCell::new(counters)));

    let source = AdcSource::new(
        Adc::new(ADC1),
        [PA0.degrade_adc(), PA1.degrade_adc(), PA4.degrade_adc()],
    );
    let output = SignalOutput::new(RelayLines::new(
        Output::new(PA5, Level::Low, Speed::Low),
        Output::new(PA6, Level::Low, Speed::Low),
        Output::new(PA7, Level::Low, Speed::Low),
    ));

    let dispatcher = CommandDispatcher::new(
        TIMING_MODE
            .take_writer()
            .expect("timing mode writer already taken"),
    );
    let reader = FrameReader::new(RX_CHANNEL.take_consumer().expect("rx consumer already taken"));
    let writer = FrameWriter::new(TX_CHANNEL.take_producer().expect("tx producer already taken"));
    let rx = RX_CHANNEL.take_producer().expect("rx producer already taken");
    let tx = TX_CHANNEL.take_consumer().expect("tx consumer already taken");

    match NODE_CONFIG.transport {
        TransportMode::Interrupt => spawner
            .spawn(uart_task::run_interrupt(
                InterruptDriver::new(rx, tx),
                USART5,
                PB0,
                PB1,
                NODE_CONFIG.baud_rate,
            ))
            .expect("failed to spawn UART task"),
        TransportMode::Polling => spawner
            .spawn(uart_task::run_polling(
                rx,
                tx,
                USART5,
                PB0,
                PB1,
                NODE_CONFIG.baud_rate,
            ))
            .expect("failed to spawn UART task"),
    }

    spawner
        .spawn(packet_task::run(reader, writer, dispatcher, counters))
        .expect("failed to spawn packet task");

    for channel in ChannelId::ALL {
        spawner
            .spawn(alarm_task::run(
                channel,
                NODE_CONFIG.relay,
                &ALARM_QUEUES[channel.index()],
                &RELAY_EVENTS,
            ))
            .expect("failed to spawn alarm task");
    }

    spawner
        .spawn(signal_task::run(output, counters, &RELAY_EVENTS))
        .expect("failed to spawn signal task");

    spawner
        .spawn(rms_task::run())
        .expect("failed to spawn RMS task");

    spawner
        .spawn(sample_task::run(source, NODE_CONFIG.relay.tick_period))
        .expect("failed to spawn sample task");

    core::future::pending::<()>().await;
}
