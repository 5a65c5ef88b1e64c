use core::task::Poll;

use embassy_futures::{block_on, poll_once};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Vec as HeaplessVec;
use relay_core::channel::ByteChannel;
use relay_core::dispatch::CommandDispatcher;
use relay_core::frame::{Frame, FrameDecoder, FrameReader, FrameWriter};
use relay_core::relay::{Direction, TimingMode, TimingModeCell};
use relay_core::storage::{CounterBank, MemoryStorage, TripCounters};
use relay_core::transport::{InterruptDriver, SerialPort};

type Channel = ByteChannel<CriticalSectionRawMutex, 32>;

/// Captures everything the node transmits.
#[derive(Default)]
struct HostPort {
    sent: HeaplessVec<u8, 64>,
}

impl SerialPort for HostPort {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }

    fn transmit_ready(&self) -> bool {
        !self.sent.is_full()
    }

    fn write_byte(&mut self, byte: u8) {
        self.sent.push(byte).expect("host buffer");
    }
}

fn host_frames(bytes: &[u8]) -> HeaplessVec<Frame, 8> {
    let mut decoder = FrameDecoder::new();
    bytes
        .iter()
        .filter_map(|&byte| decoder.push(byte))
        .collect()
}

#[test]
fn request_round_trip_through_interrupt_driver() {
    let rx = Channel::new();
    let tx = Channel::new();
    let mode = TimingModeCell::new(TimingMode::Definite);
    let mut counters = TripCounters::bind(MemoryStorage::<8, 8>::new());
    counters.record(Direction::Lower).expect("persist");

    let mut driver = InterruptDriver::new(
        rx.take_producer().expect("rx producer"),
        tx.take_consumer().expect("tx consumer"),
    );
    let mut reader = FrameReader::new(rx.take_consumer().expect("rx consumer"));
    let mut writer = FrameWriter::new(tx.take_producer().expect("tx producer"));
    let mut dispatcher = CommandDispatcher::new(mode.take_writer().expect("mode writer"));

    // Leading noise followed by "ack lowers get".
    driver.on_byte_received(0xEE);
    for byte in Frame::new(0x92, 0, 0, 0).to_bytes() {
        assert!(driver.on_byte_received(byte));
    }

    let request = block_on(reader.read_frame());
    assert_eq!(request, Frame::new(0x92, 0, 0, 0));
    assert_eq!(reader.decoder().dropped_bytes(), 1);

    let dispatch = dispatcher.handle(request, &mut counters);
    for reply in dispatch.replies {
        block_on(writer.write_frame(reply));
    }

    let mut port = HostPort::default();
    while driver.on_transmit_ready(&mut port) {}

    assert_eq!(
        host_frames(&port.sent).as_slice(),
        &[Frame::new(0x12, 1, 0, 0), Frame::new(0x92, 0, 0, 0)]
    );
}

#[test]
fn timing_change_is_visible_to_readers_and_reported_at_startup() {
    let mode = TimingModeCell::new(TimingMode::Definite);
    let mut counters = TripCounters::bind(MemoryStorage::<8, 8>::new());
    let mut dispatcher = CommandDispatcher::new(mode.take_writer().expect("mode writer"));

    let dispatch = dispatcher.handle(Frame::new(0x90, 2, 0, 0), &mut counters);

    assert!(dispatch.success);
    assert_eq!(mode.get(), TimingMode::Inverse);
    assert_eq!(
        dispatcher.startup_frames(&counters)[0],
        Frame::new(0x10, 0, 2, 0)
    );
}

#[test]
fn counter_reset_is_persisted() {
    let mode = TimingModeCell::default();
    let mut dispatcher = CommandDispatcher::new(mode.take_writer().expect("mode writer"));
    let mut counters = TripCounters::bind(MemoryStorage::<8, 8>::new());
    counters.record(Direction::Raise).expect("persist");
    counters.record(Direction::Raise).expect("persist");

    let dispatch = dispatcher.handle(Frame::new(0x91, 1, 0, 0), &mut counters);
    assert_eq!(dispatch.replies.as_slice(), &[Frame::new(0x91, 1, 0, 0)]);

    let restored = TripCounters::bind(counters.into_device());
    assert_eq!(restored.count(Direction::Raise), 0);
}

#[test]
fn writer_blocks_until_a_whole_frame_fits() {
    let tx = ByteChannel::<CriticalSectionRawMutex, 8>::new();
    let mut writer = FrameWriter::new(tx.take_producer().expect("producer"));
    let mut consumer = tx.take_consumer().expect("consumer");

    block_on(writer.write_frame(Frame::new(0x10, 0, 1, 0)));
    assert_eq!(
        poll_once(writer.write_frame(Frame::new(0x11, 0, 0, 0))),
        Poll::Pending
    );
    assert_eq!(tx.len(), 5, "no partial frame may be enqueued");

    for _ in 0..2 {
        consumer.try_get().expect("byte");
    }
    assert_eq!(
        poll_once(writer.write_frame(Frame::new(0x11, 0, 0, 0))),
        Poll::Ready(())
    );
    assert_eq!(tx.len(), 8);
}
