use relay_core::dispatch::{Command, CommandDispatcher};
use relay_core::relay::Direction;
use relay_core::telemetry::TelemetryEventKind;

use super::{NodeReader, NodeWriter, SharedCounters, record};

const RESET: u8 = 1;

/// Decodes host requests, applies them and queues the replies.
#[embassy_executor::task]
pub async fn run(
    mut reader: NodeReader,
    mut writer: NodeWriter,
    mut dispatcher: CommandDispatcher<'static>,
    counters: &'static SharedCounters,
) -> ! {
    let startup = counters.lock(|counters| dispatcher.startup_frames(&*counters.borrow()));
    for frame in startup {
        writer.write_frame(frame).await;
    }

    let mut desync_reported = 0;
    loop {
        let request = reader.read_frame().await;

        let dropped = reader.decoder().dropped_bytes();
        if dropped > desync_reported {
            record(
                None,
                TelemetryEventKind::FrameDesync {
                    dropped: dropped - desync_reported,
                },
            );
            desync_reported = dropped;
        }

        let mode_before = dispatcher.mode();
        let dispatch =
            counters.lock(|counters| dispatcher.handle(request, &mut *counters.borrow_mut()));

        if dispatcher.mode() != mode_before {
            record(None, TelemetryEventKind::ModeChanged(dispatcher.mode()));
        }
        if dispatch.success && request.parameter1 == RESET {
            match dispatch.command {
                Some(Command::Raises) => {
                    record(None, TelemetryEventKind::CounterReset(Direction::Raise));
                }
                Some(Command::Lowers) => {
                    record(None, TelemetryEventKind::CounterReset(Direction::Lower));
                }
                _ => {}
            }
        }

        for reply in dispatch.replies {
            writer.write_frame(reply).await;
        }
    }
}
