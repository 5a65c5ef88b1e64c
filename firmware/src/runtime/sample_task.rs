use embassy_time::{Duration, Ticker};
use portable_atomic::Ordering;
use relay_core::sampling::ChannelId;

use super::{ALARM_QUEUES, AlarmInput, PIPELINE, TICK, WINDOW_READY};
use crate::hw::AdcSource;

#[embassy_executor::task]
pub async fn run(mut source: AdcSource, period: core::time::Duration) -> ! {
    let micros = u64::try_from(period.as_micros()).unwrap_or(u64::MAX);
    let mut ticker = Ticker::every(Duration::from_micros(micros));

    loop {
        ticker.next().await;
        let tick = TICK.fetch_add(1, Ordering::Relaxed) + 1;

        // Every channel is sampled before the window position advances, and
        // the live RMS is read under the same lock.
        let (completed, live) = PIPELINE.lock(|pipeline| {
            let mut pipeline = pipeline.borrow_mut();
            let completed = pipeline.tick(&mut source);
            let live = ChannelId::ALL.map(|channel| pipeline.live_rms(channel));
            (completed, live)
        });

        if let Some(rms) = completed {
            WINDOW_READY.signal((rms, tick));
        }

        // A full queue only delays the countdown: the next delivered tick
        // carries the count, and the alarm task catches up on it.
        for channel in ChannelId::ALL {
            let input = AlarmInput::Tick {
                live_rms: live[channel.index()],
                tick,
            };
            if ALARM_QUEUES[channel.index()].try_send(input).is_err() {
                defmt::debug!("sample: ch{} alarm queue full at tick {}", channel.get(), tick);
            }
        }
    }
}
