use relay_core::relay::{RelayConfig, RelayStateMachine, TickClock};
use relay_core::sampling::ChannelId;

use super::{AlarmInput, AlarmQueue, EventQueue, TIMING_MODE};

/// Owns one channel's relay state machine; the only writer of its record.
#[embassy_executor::task(pool_size = 3)]
pub async fn run(
    channel: ChannelId,
    config: RelayConfig,
    inputs: &'static AlarmQueue,
    events: &'static EventQueue,
) -> ! {
    let mut relay = RelayStateMachine::new(channel, config);
    let mut clock = TickClock::new();

    loop {
        match inputs.receive().await {
            AlarmInput::Rms { rms, tick } => {
                // Ticks up to the window boundary count against the state the
                // window found; the ring RMS at that point is the window RMS.
                if let Some(event) = relay.on_ticks(clock.advance(tick), rms) {
                    events.send((channel, event)).await;
                }
                if let Some(event) = relay.on_rms(rms, TIMING_MODE.get()) {
                    events.send((channel, event)).await;
                }
            }
            AlarmInput::Tick { live_rms, tick } => {
                if let Some(event) = relay.on_ticks(clock.advance(tick), live_rms) {
                    events.send((channel, event)).await;
                }
            }
        }
    }
}
