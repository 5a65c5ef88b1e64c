//! Per-channel voltage relay: band check, timed countdown and trip latching.
//!
//! ```text
//!            out of band (latch mode)          countdown expires
//!   Normal ---------------------------> OutOfRange -------------> Tripped(dir)
//!      ^                                    |                          |
//!      +---------- back in band ------------+--------------------------+
//! ```
//!
//! Window-rate RMS values arrive through [`RelayStateMachine::on_rms`]; the
//! tick-rate countdown runs through [`RelayStateMachine::on_tick`], or
//! [`RelayStateMachine::on_ticks`] with a [`TickClock`] delta when tick
//! messages can be lost.

use core::fmt;
use core::time::Duration;

use crate::sampling::ChannelId;

mod mode;
mod output;

pub use mode::{TimingMode, TimingModeCell, TimingModeWriter};
pub use output::{
    ALARM_LINE, LINE_ASSERTED, LINE_RELEASED, LOWER_LINE, LineLevels, RAISE_LINE, SignalOutput,
};

/// ADC counts per volt, scaled by ten: full scale 32767 is 10 V.
pub const COUNTS_PER_10_VOLTS: i32 = 32_767;
const FULL_SCALE_MILLIVOLTS: i32 = 10_000;

/// Sampling tick period.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_micros(1_250);

/// Definite-time trip delay, also the inverse-time delay at half-band deviation.
pub const DEFAULT_DEFINITE_DELAY: Duration = Duration::from_secs(5);

/// Converts millivolts to raw ADC counts, truncating toward zero.
///
/// Inputs beyond ±10 V saturate at full scale.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn millivolts(mv: i32) -> i16 {
    let mv = if mv > FULL_SCALE_MILLIVOLTS {
        FULL_SCALE_MILLIVOLTS
    } else if mv < -FULL_SCALE_MILLIVOLTS {
        -FULL_SCALE_MILLIVOLTS
    } else {
        mv
    };
    // |counts| <= COUNTS_PER_10_VOLTS, which fits i16.
    (mv * COUNTS_PER_10_VOLTS / FULL_SCALE_MILLIVOLTS) as i16
}

/// Corrective action requested by a tripped relay.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Voltage below band; tap changer should raise.
    Raise,
    /// Voltage above band; tap changer should lower.
    Lower,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Raise => f.write_str("raise"),
            Direction::Lower => f.write_str("lower"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RelayState {
    #[default]
    Normal,
    OutOfRange,
    Tripped(Direction),
}

/// Transition reported by the state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayEvent {
    OutOfRange(Direction),
    Tripped(Direction),
    Restored,
}

/// Acceptable RMS band in raw counts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VoltageBand {
    pub low: i16,
    pub high: i16,
    pub nominal: i16,
}

/// 2.0 V to 3.0 V around 2.5 V.
pub const DEFAULT_BAND: VoltageBand = VoltageBand::new(millivolts(2_000), millivolts(3_000));

impl VoltageBand {
    /// Band with its nominal at the midpoint.
    #[must_use]
    pub const fn new(low: i16, high: i16) -> Self {
        Self {
            low,
            high,
            nominal: low + (high - low) / 2,
        }
    }

    #[must_use]
    pub const fn contains(&self, rms: i16) -> bool {
        rms >= self.low && rms <= self.high
    }

    /// Direction needed to bring `rms` back, or `None` when in band.
    #[must_use]
    pub const fn classify(&self, rms: i16) -> Option<Direction> {
        if rms < self.low {
            Some(Direction::Raise)
        } else if rms > self.high {
            Some(Direction::Lower)
        } else {
            None
        }
    }

    /// Distance from nominal in counts.
    #[must_use]
    pub const fn deviation(&self, rms: i16) -> u16 {
        rms.abs_diff(self.nominal)
    }

    #[must_use]
    pub const fn half_width(&self) -> u16 {
        self.high.abs_diff(self.low) / 2
    }
}

impl Default for VoltageBand {
    fn default() -> Self {
        DEFAULT_BAND
    }
}

/// Relay timing configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RelayConfig {
    pub band: VoltageBand,
    pub tick_period: Duration,
    pub definite_delay: Duration,
}

impl RelayConfig {
    #[must_use]
    pub const fn new(band: VoltageBand, tick_period: Duration, definite_delay: Duration) -> Self {
        Self {
            band,
            tick_period,
            definite_delay,
        }
    }

    /// Ticks a definite-time countdown lasts, rounded up.
    #[must_use]
    pub fn definite_ticks(&self) -> u32 {
        let tick = self.tick_period.as_nanos().max(1);
        let ticks = self.definite_delay.as_nanos().div_ceil(tick);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }

    /// Inverse-time delay `definite_delay * half_width / deviation`.
    ///
    /// A zero deviation has no finite delay and yields `None`.
    #[must_use]
    pub fn inverse_delay(&self, deviation: u16) -> Option<Duration> {
        if deviation == 0 {
            return None;
        }
        let nanos = self.definite_delay.as_nanos() * u128::from(self.band.half_width())
            / u128::from(deviation);
        Some(Duration::from_nanos(
            u64::try_from(nanos).unwrap_or(u64::MAX),
        ))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BAND, DEFAULT_TICK_PERIOD, DEFAULT_DEFINITE_DELAY)
    }
}

/// Observable per-channel relay state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RelayRecord {
    pub state: RelayState,
    pub raise_request: bool,
    pub lower_request: bool,
    /// Delay the current countdown must reach; `None` when idle or when the
    /// inverse curve has no finite delay.
    pub timer_delay: Option<Duration>,
    /// Ticks elapsed in the current countdown.
    pub timer_count: u32,
}

/// Converts monotonically increasing tick numbers into tick deltas.
///
/// Tick messages may be dropped under backpressure; the next one delivered
/// still advances the countdown by every tick since the last seen. Stale or
/// repeated numbers advance nothing.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TickClock {
    last: u64,
}

impl TickClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Ticks elapsed since the last call, saturating at `u32::MAX`.
    pub fn advance(&mut self, tick: u64) -> u32 {
        let Some(elapsed) = tick.checked_sub(self.last) else {
            return 0;
        };
        self.last = tick;
        u32::try_from(elapsed).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub const fn last(&self) -> u64 {
        self.last
    }
}

/// One channel's relay. Owned by exactly one task.
#[derive(Clone, Debug)]
pub struct RelayStateMachine {
    channel: ChannelId,
    config: RelayConfig,
    record: RelayRecord,
    latched_mode: TimingMode,
    window_rms: i16,
    elapsed: Duration,
}

impl RelayStateMachine {
    #[must_use]
    pub fn new(channel: ChannelId, config: RelayConfig) -> Self {
        Self {
            channel,
            config,
            record: RelayRecord::default(),
            latched_mode: TimingMode::default(),
            window_rms: config.band.nominal,
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        self.channel
    }

    #[must_use]
    pub const fn record(&self) -> &RelayRecord {
        &self.record
    }

    #[must_use]
    pub const fn state(&self) -> RelayState {
        self.record.state
    }

    /// Mode latched when the current countdown began.
    #[must_use]
    pub const fn latched_mode(&self) -> TimingMode {
        self.latched_mode
    }

    /// Last full-window RMS delivered through [`RelayStateMachine::on_rms`].
    #[must_use]
    pub const fn window_rms(&self) -> i16 {
        self.window_rms
    }

    /// Window-rate band check.
    pub fn on_rms(&mut self, rms: i16, mode: TimingMode) -> Option<RelayEvent> {
        self.window_rms = rms;
        match (self.record.state, self.config.band.classify(rms)) {
            (RelayState::Normal, Some(direction)) => {
                self.begin_countdown(rms, mode);
                Some(RelayEvent::OutOfRange(direction))
            }
            (RelayState::OutOfRange | RelayState::Tripped(_), None) => Some(self.restore()),
            _ => None,
        }
    }

    /// Tick-rate countdown. `live_rms` is the RMS over the current ring
    /// contents and only matters in inverse mode.
    pub fn on_tick(&mut self, live_rms: i16) -> Option<RelayEvent> {
        self.on_ticks(1, live_rms)
    }

    /// Advances the countdown by `ticks` sampling periods at once, for
    /// callers that were held off for several ticks. Zero is a no-op.
    pub fn on_ticks(&mut self, ticks: u32, live_rms: i16) -> Option<RelayEvent> {
        if ticks == 0 || self.record.state != RelayState::OutOfRange {
            return None;
        }

        self.record.timer_count = self.record.timer_count.saturating_add(ticks);
        self.elapsed = self
            .elapsed
            .saturating_add(self.config.tick_period.saturating_mul(ticks));

        match self.latched_mode {
            TimingMode::Definite => {
                let Some(direction) = self.config.band.classify(self.window_rms) else {
                    return Some(self.restore());
                };
                (self.record.timer_count >= self.config.definite_ticks())
                    .then(|| self.trip(direction))
            }
            TimingMode::Inverse => {
                let Some(direction) = self.config.band.classify(live_rms) else {
                    return Some(self.restore());
                };
                let delay = self
                    .config
                    .inverse_delay(self.config.band.deviation(live_rms));
                self.record.timer_delay = delay;
                match delay {
                    Some(required) if self.elapsed >= required => Some(self.trip(direction)),
                    _ => None,
                }
            }
        }
    }

    fn begin_countdown(&mut self, rms: i16, mode: TimingMode) {
        self.latched_mode = mode;
        self.elapsed = Duration::ZERO;
        self.record.state = RelayState::OutOfRange;
        self.record.timer_count = 0;
        self.record.timer_delay = match mode {
            TimingMode::Definite => Some(self.config.definite_delay),
            TimingMode::Inverse => self
                .config
                .inverse_delay(self.config.band.deviation(rms)),
        };
    }

    fn trip(&mut self, direction: Direction) -> RelayEvent {
        self.record.state = RelayState::Tripped(direction);
        self.record.raise_request = direction == Direction::Raise;
        self.record.lower_request = direction == Direction::Lower;
        RelayEvent::Tripped(direction)
    }

    fn restore(&mut self) -> RelayEvent {
        self.record = RelayRecord::default();
        self.elapsed = Duration::ZERO;
        RelayEvent::Restored
    }
}
