//! Single-threaded controller loop driving the charge session.
//!
//! Each [`TerminalController::run_cycle`] samples the button, applies any
//! gesture, advances the session clock and then drains every queued effect.
//! Gateway and actuator calls are awaited in place and their results are fed
//! back into the session before the cycle ends, so a confirmation that
//! arrives is always applied before the next timeout check.

use core::fmt;

use crate::clock::TerminalInstant;
use crate::console::ConsoleTarget;
use crate::gateway::PaymentGateway;
use crate::gesture::{ButtonGesture, Gesture, GestureConfig, GestureContext};
use crate::session::{
    Amount, BeepPattern, ChargeSession, Effect, PollOutcome, SessionConfig, SessionTransition,
    Tone, UserEvent,
};
use crate::telemetry::{
    GatewayOperation, TelemetryEventKind, TelemetryPayload, TelemetryRecorder,
};

/// Renders customer-facing output.
pub trait PresentationSink {
    fn show(&mut self, title: &str, message: &str, tone: Tone);

    fn show_qr(&mut self, payload: &str, amount: Amount, seconds_remaining: u32);

    fn beep(&mut self, pattern: BeepPattern);
}

/// Dispense failure. Never retried.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ActuatorError {
    /// Mechanism did not complete its travel.
    Jammed,
    /// Driver reported an electrical fault.
    DriverFault,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActuatorError::Jammed => "jammed",
            ActuatorError::DriverFault => "driver-fault",
        })
    }
}

/// Physical release mechanism.
#[allow(async_fn_in_trait)]
pub trait DispenseActuator {
    /// Runs one release motion to completion.
    async fn dispense(&mut self) -> Result<(), ActuatorError>;
}

/// Raw button level plus the monotonic clock every timestamp comes from.
pub trait UserInputSource {
    type Instant: TerminalInstant;

    /// Current pressed level.
    fn sample(&mut self) -> bool;

    fn now(&self) -> Self::Instant;
}

/// Controller configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TerminalConfig {
    pub session: SessionConfig,
    pub gesture: GestureConfig,
}

impl TerminalConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            session: SessionConfig::new(),
            gesture: GestureConfig::new(),
        }
    }

    #[must_use]
    pub const fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub const fn with_gesture(mut self, gesture: GestureConfig) -> Self {
        self.gesture = gesture;
        self
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened during one [`TerminalController::run_cycle`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleReport {
    pub gesture: Option<Gesture>,
    pub transitions: u8,
    pub effects: u8,
}

/// Owns the session and every collaborator it talks to.
pub struct TerminalController<S, G, P, A>
where
    S: UserInputSource,
{
    input: S,
    gateway: G,
    presentation: P,
    actuator: A,
    session: ChargeSession<S::Instant>,
    gesture: ButtonGesture<S::Instant>,
    telemetry: TelemetryRecorder<S::Instant>,
    reported_overflow: u32,
    last_actuator_error: Option<ActuatorError>,
}

impl<S, G, P, A> TerminalController<S, G, P, A>
where
    S: UserInputSource,
    G: PaymentGateway,
    P: PresentationSink,
    A: DispenseActuator,
{
    #[must_use]
    pub fn new(input: S, gateway: G, presentation: P, actuator: A, config: TerminalConfig) -> Self {
        Self {
            input,
            gateway,
            presentation,
            actuator,
            session: ChargeSession::new(config.session),
            gesture: ButtonGesture::new(config.gesture),
            telemetry: TelemetryRecorder::new(),
            reported_overflow: 0,
            last_actuator_error: None,
        }
    }

    /// Shows the idle screen.
    pub async fn start(&mut self) {
        self.session.announce();
        self.dispatch_effects(&mut CycleReport::default()).await;
    }

    /// Runs one control cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let now = self.input.now();
        let pressed = self.input.sample();

        let context = GestureContext::from(self.session.state());
        if let Some(gesture) = self.gesture.sample(pressed, now, context) {
            report.gesture = Some(gesture);
            self.telemetry.record_gesture(gesture, now);
            let transition = self.session.handle_event(UserEvent::from(gesture), now);
            self.apply(transition, now, &mut report);
        }

        let transition = self.session.handle_tick(now);
        self.apply(transition, now, &mut report);

        self.dispatch_effects(&mut report).await;
        report
    }

    /// Dispatches queued effects, including those queued by console commands.
    pub async fn flush(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        self.dispatch_effects(&mut report).await;
        report
    }

    #[must_use]
    pub fn session(&self) -> &ChargeSession<S::Instant> {
        &self.session
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder<S::Instant> {
        &self.telemetry
    }

    #[must_use]
    pub const fn last_actuator_error(&self) -> Option<ActuatorError> {
        self.last_actuator_error
    }

    pub fn input_mut(&mut self) -> &mut S {
        &mut self.input
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    #[must_use]
    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    pub fn presentation_mut(&mut self) -> &mut P {
        &mut self.presentation
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    async fn dispatch_effects(&mut self, report: &mut CycleReport) {
        while let Some(effect) = self.session.take_effect() {
            report.effects = report.effects.saturating_add(1);
            self.dispatch(effect, report).await;
        }

        let dropped = self.session.dropped_effects();
        if dropped > self.reported_overflow {
            self.reported_overflow = dropped;
            self.telemetry.record(
                TelemetryEventKind::EffectOverflow,
                TelemetryPayload::Overflow(dropped),
                self.input.now(),
            );
        }
    }

    async fn dispatch(&mut self, effect: Effect, report: &mut CycleReport) {
        match effect {
            Effect::CreateCharge {
                amount,
                description,
            } => {
                let result = self.gateway.create_charge(amount, description).await;
                let now = self.input.now();
                let event = match &result {
                    Ok(_) => TelemetryEventKind::ChargeCreated,
                    Err(_) => TelemetryEventKind::ChargeFailed,
                };
                self.telemetry.record_gateway(
                    event,
                    GatewayOperation::Create,
                    result.as_ref().err().copied(),
                    now,
                );
                let transition = self.session.handle_create_result(result, now);
                self.apply(transition, now, report);
            }
            Effect::QueryStatus(payment_id) => {
                let result = self.gateway.query_status(&payment_id).await;
                let now = self.input.now();
                match self.session.handle_status_result(&payment_id, result) {
                    PollOutcome::Discarded => {}
                    PollOutcome::Confirmed(transition) => {
                        self.record_poll(TelemetryEventKind::PaymentConfirmed, None, now);
                        self.apply(Some(transition), now, report);
                    }
                    PollOutcome::Pending(_) => {
                        self.record_poll(TelemetryEventKind::StatusPolled, None, now);
                    }
                    PollOutcome::Unrecognized => {
                        self.record_poll(TelemetryEventKind::StatusUnrecognized, None, now);
                    }
                    PollOutcome::Failed(error) => {
                        self.record_poll(TelemetryEventKind::PollFailed, Some(error), now);
                    }
                }
            }
            Effect::CancelCharge(payment_id) => {
                if let Err(error) = self.gateway.cancel(&payment_id).await {
                    self.telemetry.record_gateway(
                        TelemetryEventKind::CancelFailed,
                        GatewayOperation::Cancel,
                        Some(error),
                        self.input.now(),
                    );
                }
            }
            Effect::Actuate => {
                let result = self.actuator.dispense().await;
                let now = self.input.now();
                let polls = self.session.polls_issued();
                let (transition, event) = match result {
                    Ok(()) => (
                        self.session.handle_actuator_done(now),
                        TelemetryEventKind::DispenseComplete,
                    ),
                    Err(error) => {
                        self.last_actuator_error = Some(error);
                        (
                            self.session.handle_actuator_fault(now),
                            TelemetryEventKind::DispenseFault,
                        )
                    }
                };
                self.telemetry.record_session_end(
                    event,
                    self.session.last_session_duration(),
                    polls,
                    now,
                );
                self.apply(transition, now, report);
            }
            Effect::Show(notice) => {
                self.presentation
                    .show(notice.title(), notice.message(), notice.tone());
            }
            Effect::ShowQr {
                payload,
                amount,
                seconds_remaining,
            } => self.presentation.show_qr(&payload, amount, seconds_remaining),
            Effect::Beep(pattern) => self.presentation.beep(pattern),
        }
    }

    fn record_poll(
        &mut self,
        event: TelemetryEventKind,
        error: Option<crate::gateway::GatewayError>,
        now: S::Instant,
    ) {
        self.telemetry
            .record_gateway(event, GatewayOperation::Status, error, now);
    }

    fn apply(
        &mut self,
        transition: Option<SessionTransition>,
        now: S::Instant,
        report: &mut CycleReport,
    ) {
        if let Some(transition) = transition {
            report.transitions = report.transitions.saturating_add(1);
            self.record_transition(transition, now);
        }
    }

    fn record_transition(&mut self, transition: SessionTransition, now: S::Instant) {
        self.telemetry.record_transition(
            transition,
            self.session.last_session_duration(),
            self.session.polls_issued(),
            now,
        );
    }
}

impl<S, G, P, A> ConsoleTarget for TerminalController<S, G, P, A>
where
    S: UserInputSource,
    G: PaymentGateway,
    P: PresentationSink,
    A: DispenseActuator,
{
    type Instant = S::Instant;

    fn now(&self) -> S::Instant {
        self.input.now()
    }

    fn session(&self) -> &ChargeSession<S::Instant> {
        &self.session
    }

    fn session_mut(&mut self) -> &mut ChargeSession<S::Instant> {
        &mut self.session
    }

    fn telemetry(&self) -> &TelemetryRecorder<S::Instant> {
        &self.telemetry
    }

    fn note_transition(&mut self, transition: SessionTransition) {
        let now = self.input.now();
        self.record_transition(transition, now);
    }
}
