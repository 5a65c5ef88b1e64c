//! Lockstep sampling of the monitored channels and RMS reduction.

use core::fmt;

/// Number of monitored analog channels.
pub const CHANNEL_COUNT: usize = 3;

/// Samples per RMS window.
pub const WINDOW_LEN: usize = 16;

/// Index of a monitored channel, always below [`CHANNEL_COUNT`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Every channel in ascending order.
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [ChannelId(0), ChannelId(1), ChannelId(2)];

    /// Returns the channel for `index`, or `None` when out of range.
    #[must_use]
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < CHANNEL_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Source of raw signed samples, one conversion per call.
pub trait AnalogSource {
    fn sample(&mut self, channel: ChannelId) -> i16;
}

/// Analog outputs driving the actuation lines.
pub trait AnalogSink {
    fn put(&mut self, line: u8, magnitude: i16);
}

/// Ring of the last [`WINDOW_LEN`] samples of one channel.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SampleWindow {
    samples: [i16; WINDOW_LEN],
}

impl SampleWindow {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: [0; WINDOW_LEN],
        }
    }

    #[must_use]
    pub const fn as_slice(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub fn rms(&self) -> i16 {
        rms(&self.samples)
    }
}

/// Root mean square, `floor(sqrt(mean(x²)))`, saturated to `i16::MAX`.
///
/// An empty slice yields zero.
#[must_use]
pub fn rms(samples: &[i16]) -> i16 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u64 = samples
        .iter()
        .map(|&sample| {
            let magnitude = u64::from(sample.unsigned_abs());
            magnitude * magnitude
        })
        .sum();
    let count = u64::try_from(samples.len()).unwrap_or(u64::MAX);
    i16::try_from((sum / count).isqrt()).unwrap_or(i16::MAX)
}

/// Per-channel sample windows sharing one write position.
#[derive(Clone, Debug, Default)]
pub struct SamplingPipeline {
    windows: [SampleWindow; CHANNEL_COUNT],
    position: usize,
    completed: u32,
}

impl SamplingPipeline {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            windows: [SampleWindow::new(); CHANNEL_COUNT],
            position: 0,
            completed: 0,
        }
    }

    /// Samples every channel at the current position, then advances it.
    ///
    /// Returns the RMS of each window when the position wraps, i.e. once per
    /// [`WINDOW_LEN`] ticks.
    pub fn tick<S: AnalogSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Option<[i16; CHANNEL_COUNT]> {
        for channel in ChannelId::ALL {
            self.windows[channel.index()].samples[self.position] = source.sample(channel);
        }

        self.position += 1;
        if self.position < WINDOW_LEN {
            return None;
        }

        self.position = 0;
        self.completed = self.completed.wrapping_add(1);
        Some(self.rms())
    }

    /// RMS of every window as it stands.
    #[must_use]
    pub fn rms(&self) -> [i16; CHANNEL_COUNT] {
        core::array::from_fn(|index| self.windows[index].rms())
    }

    /// RMS over the ring for one channel, including partially refreshed samples.
    #[must_use]
    pub fn live_rms(&self, channel: ChannelId) -> i16 {
        self.windows[channel.index()].rms()
    }

    #[must_use]
    pub const fn window(&self, channel: ChannelId) -> &SampleWindow {
        &self.windows[channel.index()]
    }

    /// Next write position within the windows.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Number of full windows completed since start.
    #[must_use]
    pub const fn completed_windows(&self) -> u32 {
        self.completed
    }
}
