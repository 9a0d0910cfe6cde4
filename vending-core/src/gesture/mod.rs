//! Button debouncer turning raw level samples into taps and long holds.

use core::fmt;
use core::time::Duration;

use crate::clock::TerminalInstant;
use crate::session::{SessionState, UserEvent};

/// Timing thresholds for gesture classification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GestureConfig {
    /// Presses shorter than this are taps.
    pub tap_max: Duration,
    /// Presses reaching this length are long holds.
    pub long_hold: Duration,
    /// Edges closer than this to the previous accepted edge are bounce.
    pub debounce: Duration,
}

impl GestureConfig {
    pub const DEFAULT_TAP_MAX: Duration = Duration::from_millis(800);
    pub const DEFAULT_LONG_HOLD: Duration = Duration::from_millis(3_000);
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(20);

    #[must_use]
    pub const fn new() -> Self {
        Self {
            tap_max: Self::DEFAULT_TAP_MAX,
            long_hold: Self::DEFAULT_LONG_HOLD,
            debounce: Self::DEFAULT_DEBOUNCE,
        }
    }

    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Semantic gesture recognised from the button.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Gesture {
    Tap,
    LongHold,
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gesture::Tap => "tap",
            Gesture::LongHold => "long-hold",
        })
    }
}

impl From<Gesture> for UserEvent {
    fn from(gesture: Gesture) -> Self {
        match gesture {
            Gesture::Tap => UserEvent::Tap,
            Gesture::LongHold => UserEvent::LongHold,
        }
    }
}

/// Which gestures the session currently reacts to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GestureContext {
    pub tap_accepted: bool,
    pub hold_accepted: bool,
}

impl From<SessionState> for GestureContext {
    fn from(state: SessionState) -> Self {
        Self {
            tap_accepted: state.accepts_tap(),
            hold_accepted: state.accepts_hold(),
        }
    }
}

/// Per-press tracker. Feed every sample through [`ButtonGesture::sample`].
pub struct ButtonGesture<I>
where
    I: TerminalInstant,
{
    config: GestureConfig,
    pressed: bool,
    last_edge_at: Option<I>,
    press_started_at: Option<I>,
    consumed: bool,
}

impl<I> ButtonGesture<I>
where
    I: TerminalInstant,
{
    #[must_use]
    pub const fn new(config: GestureConfig) -> Self {
        Self {
            config,
            pressed: false,
            last_edge_at: None,
            press_started_at: None,
            consumed: false,
        }
    }

    /// Debounced button level.
    #[must_use]
    pub const fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Applies one level sample taken at `now`.
    pub fn sample(&mut self, pressed: bool, now: I, context: GestureContext) -> Option<Gesture> {
        if pressed != self.pressed && !self.is_bounce(now) {
            self.last_edge_at = Some(now);
            self.pressed = pressed;

            if pressed {
                self.press_started_at = Some(now);
                self.consumed = false;
            } else {
                return self.release(now, context);
            }
        }

        if self.pressed {
            self.check_hold(now, context)
        } else {
            None
        }
    }

    fn is_bounce(&self, now: I) -> bool {
        self.last_edge_at
            .is_some_and(|edge| now.saturating_duration_since(edge) < self.config.debounce)
    }

    fn release(&mut self, now: I, context: GestureContext) -> Option<Gesture> {
        let started = self.press_started_at.take()?;
        let consumed = core::mem::replace(&mut self.consumed, false);
        let held = now.saturating_duration_since(started);

        if !consumed && held < self.config.tap_max && context.tap_accepted {
            Some(Gesture::Tap)
        } else {
            None
        }
    }

    fn check_hold(&mut self, now: I, context: GestureContext) -> Option<Gesture> {
        let started = self.press_started_at?;
        if self.consumed || !context.hold_accepted {
            return None;
        }
        if now.saturating_duration_since(started) < self.config.long_hold {
            return None;
        }
        self.consumed = true;
        Some(Gesture::LongHold)
    }
}
