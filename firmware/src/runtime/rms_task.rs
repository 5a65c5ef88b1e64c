use relay_core::sampling::ChannelId;

use super::{ALARM_QUEUES, AlarmInput, WINDOW_READY};

/// Fans the RMS of each completed window out to the alarm tasks.
#[embassy_executor::task]
pub async fn run() -> ! {
    loop {
        let (rms, tick) = WINDOW_READY.wait().await;

        for channel in ChannelId::ALL {
            ALARM_QUEUES[channel.index()]
                .send(AlarmInput::Rms {
                    rms: rms[channel.index()],
                    tick,
                })
                .await;
        }
    }
}
