use embassy_futures::select::{Either, select};
use embassy_stm32::gpio::{Level, Output};
use embassy_time::Timer;

use crate::feedback::{self, Heartbeat};
use crate::port::CueReceiver;

#[embassy_executor::task]
pub async fn run(cues: CueReceiver<'static>, mut buzzer: Output<'static>, mut led: Output<'static>) -> ! {
    let mut heartbeat = Heartbeat::new();

    loop {
        let cue = if heartbeat.is_blinking() {
            match select(cues.receive(), Timer::after_millis(feedback::HEARTBEAT_MILLIS)).await {
                Either::First(cue) => cue,
                Either::Second(()) => {
                    led.set_level(Level::from(heartbeat.toggle()));
                    continue;
                }
            }
        } else {
            cues.receive().await
        };

        defmt::trace!("feedback: playing cue");
        heartbeat.observe(cue);
        for step in feedback::steps(cue) {
            buzzer.set_level(Level::from(step.buzzer));
            led.set_level(Level::from(step.led));
            if step.millis > 0 {
                Timer::after_millis(u64::from(step.millis)).await;
            }
        }
        led.set_level(Level::from(heartbeat.resting_level()));
    }
}
