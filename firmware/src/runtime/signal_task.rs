use relay_core::relay::{RelayEvent, SignalOutput};
use relay_core::telemetry::TelemetryEventKind;

use super::{EventQueue, SharedCounters, record};
use crate::hw::RelayLines;

/// Drives the output lines and persists trip counts.
#[embassy_executor::task]
pub async fn run(
    mut output: SignalOutput<RelayLines>,
    counters: &'static SharedCounters,
    events: &'static EventQueue,
) -> ! {
    loop {
        let (channel, event) = events.receive().await;
        record(Some(channel), event.into());

        let persisted =
            counters.lock(|counters| output.apply(channel, event, &mut *counters.borrow_mut()));

        if let (Err(error), RelayEvent::Tripped(direction)) = (persisted, event) {
            record(
                Some(channel),
                TelemetryEventKind::CounterPersistFailed { direction, error },
            );
        }
    }
}
