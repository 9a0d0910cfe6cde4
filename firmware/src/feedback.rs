#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Buzzer and status LED patterns.
//!
//! The presentation sink only queues a [`Cue`]; the feedback task plays the
//! matching step table so gateway and actuator work never waits on a beep.
//! Between cues the LED rests at the level tracked by [`Heartbeat`], which
//! blinks slowly while the welcome screen is up.

use vending_core::session::{BeepPattern, Tone};

/// Depth of the cue queue between the controller and the feedback task.
pub const CUE_QUEUE_DEPTH: usize = 8;

/// Time between LED toggles while idle.
pub const HEARTBEAT_MILLIS: u64 = 2_000;

/// Something the customer should hear or see.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cue {
    Screen(Tone),
    /// A payment QR went up; the LED holds steady until the next screen.
    Qr,
    Beep(BeepPattern),
}

/// One segment of a pattern.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Step {
    pub buzzer: bool,
    pub led: bool,
    pub millis: u16,
}

const fn on(millis: u16) -> Step {
    Step {
        buzzer: true,
        led: true,
        millis,
    }
}

const fn led(millis: u16) -> Step {
    Step {
        buzzer: false,
        led: true,
        millis,
    }
}

const fn off(millis: u16) -> Step {
    Step {
        buzzer: false,
        led: false,
        millis,
    }
}

const CHARGE_READY: &[Step] = &[on(80), off(60), on(80), off(0)];
const PAID: &[Step] = &[on(250), off(0)];
const CANCEL: &[Step] = &[on(400), off(0)];
const ERROR: &[Step] = &[on(120), off(80), on(120), off(80), on(120), off(0)];

const SCREEN_INFO: &[Step] = &[led(0)];
const QR: &[Step] = &[led(0)];
const SCREEN_SUCCESS: &[Step] = &[led(1_000), off(0)];
const SCREEN_WARN: &[Step] = &[led(300), off(300), led(300), off(0)];
const SCREEN_ERROR: &[Step] = &[led(150), off(150), led(150), off(150), led(150), off(0)];

/// Step table for `cue`. Every table ends with the buzzer silent.
pub const fn steps(cue: Cue) -> &'static [Step] {
    match cue {
        Cue::Beep(BeepPattern::ChargeReady) => CHARGE_READY,
        Cue::Beep(BeepPattern::Paid) => PAID,
        Cue::Beep(BeepPattern::Cancel) => CANCEL,
        Cue::Beep(BeepPattern::Error) => ERROR,
        Cue::Screen(Tone::Info) => SCREEN_INFO,
        Cue::Screen(Tone::Success) => SCREEN_SUCCESS,
        Cue::Screen(Tone::Warn) => SCREEN_WARN,
        Cue::Screen(Tone::Error) => SCREEN_ERROR,
        Cue::Qr => QR,
    }
}

/// LED level held between cues.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Heartbeat {
    blinking: bool,
    lit: bool,
}

impl Heartbeat {
    pub const fn new() -> Self {
        Self {
            blinking: false,
            lit: false,
        }
    }

    /// `true` while the LED should toggle every [`HEARTBEAT_MILLIS`].
    pub const fn is_blinking(&self) -> bool {
        self.blinking
    }

    /// Level to restore once the pattern for the last observed cue ends.
    pub const fn resting_level(&self) -> bool {
        self.lit
    }

    /// Updates the resting state for `cue`. Beeps leave it untouched.
    pub fn observe(&mut self, cue: Cue) {
        match cue {
            Cue::Screen(tone) => {
                self.blinking = matches!(tone, Tone::Info);
                self.lit = steps(cue).last().is_some_and(|step| step.led);
            }
            Cue::Qr => {
                self.blinking = false;
                self.lit = true;
            }
            Cue::Beep(_) => {}
        }
    }

    /// Flips the LED for one idle period and returns the new level.
    pub fn toggle(&mut self) -> bool {
        self.lit = !self.lit;
        self.lit
    }
}
