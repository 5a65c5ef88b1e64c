use std::f64::consts::{SQRT_2, TAU};

use relay_core::relay::{
    RelayConfig, RelayEvent, RelayStateMachine, SignalOutput, TimingMode, millivolts,
};
use relay_core::sampling::{
    AnalogSink, AnalogSource, CHANNEL_COUNT, ChannelId, SamplingPipeline, WINDOW_LEN,
};
use relay_core::storage::{MemoryStorage, TripCounters};
use relay_core::telemetry::{TelemetryEventKind, TelemetryRecord, TelemetryRecorder};

/// One flash phrase, matching the firmware's counter region.
pub type NodeStorage = MemoryStorage<8, 8>;

/// Nominal RMS each channel starts at, in millivolts.
pub const NOMINAL_MILLIVOLTS: i32 = 2_500;

/// Sine source completing one cycle per window, so a full window's RMS is
/// the configured level.
struct SineSource {
    peak: [f64; CHANNEL_COUNT],
    phase: usize,
}

impl SineSource {
    fn new(rms_millivolts: i32) -> Self {
        let mut source = Self {
            peak: [0.0; CHANNEL_COUNT],
            phase: 0,
        };
        for channel in ChannelId::ALL {
            source.set_rms(channel, rms_millivolts);
        }
        source
    }

    fn set_rms(&mut self, channel: ChannelId, rms_millivolts: i32) {
        self.peak[channel.index()] = f64::from(millivolts(rms_millivolts)) * SQRT_2;
    }

    fn advance(&mut self) {
        self.phase = (self.phase + 1) % WINDOW_LEN;
    }
}

impl AnalogSource for SineSource {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn sample(&mut self, channel: ChannelId) -> i16 {
        let angle = TAU * self.phase as f64 / WINDOW_LEN as f64;
        let value = (self.peak[channel.index()] * angle.sin()).round();
        value.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }
}

/// Analog output lines as last written by the output stage.
#[derive(Default)]
pub struct OutputLines {
    levels: [i16; 3],
}

impl OutputLines {
    pub fn level(&self, line: u8) -> i16 {
        self.levels[usize::from(line)]
    }
}

impl AnalogSink for OutputLines {
    fn put(&mut self, line: u8, magnitude: i16) {
        if let Some(level) = self.levels.get_mut(usize::from(line)) {
            *level = magnitude;
        }
    }
}

/// Sampling, relays, output lines and counters of one simulated node.
pub struct SimulatedNode {
    source: SineSource,
    levels: [i32; CHANNEL_COUNT],
    pipeline: SamplingPipeline,
    relays: [RelayStateMachine; CHANNEL_COUNT],
    output: SignalOutput<OutputLines>,
    counters: TripCounters<NodeStorage>,
    telemetry: TelemetryRecorder,
    tick: u64,
}

impl SimulatedNode {
    pub fn new(config: RelayConfig, storage: NodeStorage) -> Self {
        Self {
            source: SineSource::new(NOMINAL_MILLIVOLTS),
            levels: [NOMINAL_MILLIVOLTS; CHANNEL_COUNT],
            pipeline: SamplingPipeline::new(),
            relays: ChannelId::ALL.map(|channel| RelayStateMachine::new(channel, config)),
            output: SignalOutput::new(OutputLines::default()),
            counters: TripCounters::bind(storage),
            telemetry: TelemetryRecorder::new(),
            tick: 0,
        }
    }

    pub fn set_level(&mut self, channel: ChannelId, rms_millivolts: i32) {
        self.levels[channel.index()] = rms_millivolts;
        self.source.set_rms(channel, rms_millivolts);
    }

    pub fn level(&self, channel: ChannelId) -> i32 {
        self.levels[channel.index()]
    }

    /// Advances `ticks` sampling periods and returns the events recorded.
    pub fn run(&mut self, ticks: u32, mode: TimingMode) -> Vec<TelemetryRecord> {
        let first = self.telemetry.latest().map_or(0, |record| record.id + 1);
        for _ in 0..ticks {
            self.step(mode);
        }
        self.telemetry
            .oldest_first()
            .filter(|record| record.id >= first)
            .copied()
            .collect()
    }

    fn step(&mut self, mode: TimingMode) {
        self.tick += 1;

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

        self.source.advance();
    }

    fn apply(&mut self, channel: ChannelId, event: RelayEvent) {
        self.telemetry.record_relay(self.tick, channel, event);
        if let Err(error) = self.output.apply(channel, event, &mut self.counters) {
            if let RelayEvent::Tripped(direction) = event {
                self.telemetry.record(
                    self.tick,
                    Some(channel),
                    TelemetryEventKind::CounterPersistFailed { direction, error },
                );
            }
        }
    }

    /// Records a node-level event at the current tick.
    pub fn note(&mut self, event: TelemetryEventKind) {
        self.telemetry.record(self.tick, None, event);
    }

    pub fn relay(&self, channel: ChannelId) -> &RelayStateMachine {
        &self.relays[channel.index()]
    }

    pub fn window_rms(&self) -> [i16; CHANNEL_COUNT] {
        self.pipeline.rms()
    }

    pub fn output(&self) -> &OutputLines {
        self.output.sink()
    }

    pub fn counters(&self) -> &TripCounters<NodeStorage> {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut TripCounters<NodeStorage> {
        &mut self.counters
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}
