//! Board adapters for the controller traits.
//!
//! Pin map (STM32G0B1 carrier):
//!
//! | Pin | Role                               |
//! |-----|------------------------------------|
//! | PA0 | customer button, active-low        |
//! | PB4 | solenoid driver enable             |
//! | PB5 | solenoid driver fault, active-low  |
//! | PB6 | piezo buzzer                       |
//! | PA5 | status LED                         |

use core::fmt::{self, Write as _};

use embassy_stm32::gpio::{Input, Output};
use embassy_time::{Duration, Timer};
use heapless::String;
use vending_core::controller::{
    ActuatorError, DispenseActuator, PresentationSink, UserInputSource,
};
use vending_core::session::{Amount, BeepPattern, MAX_QR_PAYLOAD_LEN, Tone};

use crate::clock::FirmwareInstant;
use crate::feedback::Cue;
use crate::port::{CueSender, SerialPort};

/// How long the solenoid is energised for one release.
const SOLENOID_PULSE: Duration = Duration::from_millis(350);
/// Rest after the pulse so the plunger returns before the next cycle.
const SOLENOID_SETTLE: Duration = Duration::from_millis(200);

const ECHO_LEN: usize = MAX_QR_PAYLOAD_LEN + 64;

/// Item name sent with every charge.
pub const PRODUCT_DESCRIPTION: &str = "Vending item";
/// Contact chatter window; longer than one controller cycle so a single
/// noisy sample cannot end a press.
pub const BUTTON_DEBOUNCE: core::time::Duration = core::time::Duration::from_millis(60);

/// Customer button sampled once per controller cycle.
pub struct Button {
    pin: Input<'static>,
}

impl Button {
    pub const fn new(pin: Input<'static>) -> Self {
        Self { pin }
    }
}

impl UserInputSource for Button {
    type Instant = FirmwareInstant;

    fn sample(&mut self) -> bool {
        self.pin.is_low()
    }

    fn now(&self) -> FirmwareInstant {
        FirmwareInstant::now()
    }
}

/// Spring-return solenoid behind a driver with a fault output.
pub struct SolenoidActuator {
    coil: Output<'static>,
    fault: Input<'static>,
}

impl SolenoidActuator {
    pub fn new(mut coil: Output<'static>, fault: Input<'static>) -> Self {
        coil.set_low();
        Self { coil, fault }
    }
}

impl DispenseActuator for SolenoidActuator {
    async fn dispense(&mut self) -> Result<(), ActuatorError> {
        if self.fault.is_low() {
            defmt::error!("solenoid: driver fault before release");
            return Err(ActuatorError::DriverFault);
        }

        self.coil.set_high();
        Timer::after(SOLENOID_PULSE).await;
        let faulted = self.fault.is_low();
        self.coil.set_low();
        Timer::after(SOLENOID_SETTLE).await;

        if faulted {
            defmt::error!("solenoid: driver fault during release");
            Err(ActuatorError::DriverFault)
        } else {
            defmt::info!("solenoid: released");
            Ok(())
        }
    }
}

/// Status panel: buzzer and LED cues plus a text echo on the operator console.
pub struct PanelSink {
    cues: CueSender<'static>,
    console: &'static SerialPort,
    qr_echoed: bool,
}

impl PanelSink {
    pub const fn new(cues: CueSender<'static>, console: &'static SerialPort) -> Self {
        Self {
            cues,
            console,
            qr_echoed: false,
        }
    }

    fn cue(&self, cue: Cue) {
        if self.cues.try_send(cue).is_err() {
            defmt::warn!("panel: cue queue full");
        }
    }

    fn echo(&self, args: fmt::Arguments<'_>) {
        if !self.console.is_connected() {
            return;
        }

        let mut text: String<ECHO_LEN> = String::new();
        if text.write_fmt(args).is_err() || text.push_str("\r\n").is_err() {
            defmt::warn!("panel: echo truncated");
        }
        if !self.console.try_write(&text) {
            defmt::warn!("panel: console backlog, echo dropped");
        }
    }
}

impl PresentationSink for PanelSink {
    fn show(&mut self, title: &str, message: &str, tone: Tone) {
        defmt::info!("screen: {}: {}", title, message);
        self.qr_echoed = false;
        self.cue(Cue::Screen(tone));
        self.echo(format_args!("[screen] {title}: {message}"));
    }

    fn show_qr(&mut self, payload: &str, amount: Amount, seconds_remaining: u32) {
        defmt::debug!("screen: qr {}s remaining", seconds_remaining);
        if self.qr_echoed {
            return;
        }
        self.qr_echoed = true;
        self.cue(Cue::Qr);
        self.echo(format_args!(
            "[qr] R$ {amount} {seconds_remaining}s {payload}"
        ));
    }

    fn beep(&mut self, pattern: BeepPattern) {
        self.cue(Cue::Beep(pattern));
    }
}
