use core::time::Duration;

use relay_core::relay::{
    DEFAULT_BAND, Direction, RelayConfig, RelayEvent, RelayState, RelayStateMachine,
    SignalOutput, TimingMode, TimingModeCell,
};
use relay_core::sampling::{AnalogSink, AnalogSource, CHANNEL_COUNT, ChannelId, SamplingPipeline};
use relay_core::storage::{MemoryStorage, TripCounters};
use relay_core::telemetry::{TelemetryEventKind, TelemetryRecorder};

const FAST: RelayConfig = RelayConfig::new(
    DEFAULT_BAND,
    Duration::from_millis(1),
    Duration::from_millis(40),
);

/// Square wave per channel; the RMS equals the amplitude.
struct SquareWave {
    amplitude: [i16; CHANNEL_COUNT],
    positive: [bool; CHANNEL_COUNT],
}

impl SquareWave {
    fn new(amplitude: i16) -> Self {
        Self {
            amplitude: [amplitude; CHANNEL_COUNT],
            positive: [true; CHANNEL_COUNT],
        }
    }
}

impl AnalogSource for SquareWave {
    fn sample(&mut self, channel: ChannelId) -> i16 {
        let index = channel.index();
        self.positive[index] = !self.positive[index];
        if self.positive[index] {
            self.amplitude[index]
        } else {
            -self.amplitude[index]
        }
    }
}

#[derive(Default)]
struct Lines([i16; 3]);

impl AnalogSink for Lines {
    fn put(&mut self, line: u8, magnitude: i16) {
        self.0[usize::from(line)] = magnitude;
    }
}

struct Node {
    mode: TimingModeCell,
    source: SquareWave,
    pipeline: SamplingPipeline,
    relays: [RelayStateMachine; CHANNEL_COUNT],
    output: SignalOutput<Lines>,
    counters: TripCounters<MemoryStorage<8, 8>>,
    telemetry: TelemetryRecorder,
    tick: u64,
}

impl Node {
    fn new(config: RelayConfig, mode: TimingMode) -> Self {
        Self {
            mode: TimingModeCell::new(mode),
            source: SquareWave::new(DEFAULT_BAND.nominal),
            pipeline: SamplingPipeline::new(),
            relays: ChannelId::ALL.map(|channel| RelayStateMachine::new(channel, config)),
            output: SignalOutput::new(Lines::default()),
            counters: TripCounters::bind(MemoryStorage::new()),
            telemetry: TelemetryRecorder::new(),
            tick: 0,
        }
    }

    fn step(&mut self) {
        self.tick += 1;
        let mode = self.mode.get();

        if let Some(window) = self.pipeline.tick(&mut self.source) {
            for channel in ChannelId::ALL {
                let rms = window[channel.index()];
                if let Some(event) = self.relays[channel.index()].on_rms(rms, mode) {
                    self.apply(channel, event);
                }
            }
        }

        for channel in ChannelId::ALL {
            let live = self.pipeline.live_rms(channel);
            if let Some(event) = self.relays[channel.index()].on_tick(live) {
                self.apply(channel, event);
            }
        }
    }

    fn apply(&mut self, channel: ChannelId, event: RelayEvent) {
        self.telemetry.record_relay(self.tick, channel, event);
        self.output
            .apply(channel, event, &mut self.counters)
            .expect("counter persisted");
    }

    fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.step();
        }
    }

    fn run_until_trip(&mut self, channel: ChannelId, limit: u32) -> u64 {
        for _ in 0..limit {
            self.step();
            if matches!(self.relays[channel.index()].state(), RelayState::Tripped(_)) {
                return self.tick;
            }
        }
        panic!("channel {channel} did not trip within {limit} ticks");
    }
}

fn channel(index: u8) -> ChannelId {
    ChannelId::new(index).expect("valid channel")
}

#[test]
fn definite_trip_counts_exactly_once() {
    let mut node = Node::new(FAST, TimingMode::Definite);
    let low = DEFAULT_BAND.low;
    node.source.amplitude[0] = low - low / 10;

    node.run(400);

    assert_eq!(
        node.relays[0].state(),
        RelayState::Tripped(Direction::Raise)
    );
    assert!(node.relays[0].record().raise_request);
    assert!(!node.relays[0].record().lower_request);
    assert_eq!(node.counters.raises(), 1);
    assert_eq!(node.counters.lowers(), 0);
    assert_eq!(node.relays[1].state(), RelayState::Normal);

    let levels = node.output.levels();
    assert!(levels.raise && levels.alarm && !levels.lower);
}

#[test]
fn definite_recovery_before_delay_does_not_count() {
    let mut node = Node::new(FAST, TimingMode::Definite);
    let low = DEFAULT_BAND.low;
    node.source.amplitude[0] = low - low / 10;

    node.run(16);
    assert_eq!(node.relays[0].state(), RelayState::OutOfRange);

    node.source.amplitude[0] = DEFAULT_BAND.nominal;
    node.run(16);

    assert_eq!(node.relays[0].state(), RelayState::Normal);
    assert_eq!(node.counters.raises(), 0);
    assert!(!node.output.levels().alarm);

    let kinds: Vec<TelemetryEventKind> = node
        .telemetry
        .oldest_first()
        .map(|record| record.event)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TelemetryEventKind::OutOfRange(Direction::Raise),
            TelemetryEventKind::Restored,
        ]
    );
}

#[test]
fn inverse_trip_is_faster_for_larger_deviation() {
    let mut far = Node::new(FAST, TimingMode::Inverse);
    far.source.amplitude[2] = 4_000;
    let far_trip = far.run_until_trip(channel(2), 1_000);

    let mut near = Node::new(FAST, TimingMode::Inverse);
    near.source.amplitude[2] = 6_000;
    let near_trip = near.run_until_trip(channel(2), 1_000);

    assert!(
        far_trip < near_trip,
        "deviation 4191 tripped at {far_trip}, deviation 2191 at {near_trip}"
    );
    assert_eq!(far.counters.raises(), 1);
}

#[test]
fn countdown_keeps_the_mode_latched_at_entry() {
    let mut node = Node::new(FAST, TimingMode::Definite);
    node.source.amplitude[1] = 12_000;

    node.run(16);
    assert_eq!(node.relays[1].state(), RelayState::OutOfRange);
    node.mode
        .take_writer()
        .expect("writer")
        .set(TimingMode::Inverse);

    node.run(20);
    assert_eq!(node.relays[1].latched_mode(), TimingMode::Definite);
    assert_eq!(node.relays[1].state(), RelayState::OutOfRange);

    node.run(30);
    assert_eq!(
        node.relays[1].state(),
        RelayState::Tripped(Direction::Lower)
    );
    assert_eq!(node.counters.lowers(), 1);
}
