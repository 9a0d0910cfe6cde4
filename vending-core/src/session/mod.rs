//! Charge lifecycle state machine.
//!
//! A [`ChargeSession`] owns everything about the single sale the terminal can
//! serve at a time: the state, the remote payment identifier, the locked
//! amount and the timeout/poll clocks. Handlers never perform I/O. They queue
//! [`Effect`]s which the controller drains and dispatches, then feeds the
//! collaborator results back through the `handle_*` methods.

use core::fmt;
use core::time::Duration;

use heapless::{Deque, String};

use crate::clock::{TerminalInstant, whole_seconds_ceil};
use crate::gateway::{ChargeReceipt, GatewayError, PaymentStatus, StatusReport};

/// Maximum length of a remote payment identifier.
pub const MAX_PAYMENT_ID_LEN: usize = 64;

/// Maximum length of a PIX copy-and-paste payload.
pub const MAX_QR_PAYLOAD_LEN: usize = 512;

/// Number of effects that can be queued between two drains.
pub const EFFECT_QUEUE_DEPTH: usize = 8;

/// Opaque payment identifier assigned by the backend.
pub type PaymentId = String<MAX_PAYMENT_ID_LEN>;

/// QR payload rendered while waiting for payment.
pub type QrPayload = String<MAX_QR_PAYLOAD_LEN>;

/// Monetary value in integer minor units (centavos).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Amount(u32);

impl Amount {
    /// Zero minor units.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_minor(minor: u32) -> Self {
        Self(minor)
    }

    #[must_use]
    pub const fn minor(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Lifecycle state of the charge session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Creating,
    AwaitingPayment,
    Dispensing,
    Cancelling,
    Error,
}

impl SessionState {
    /// Returns `true` when the state carries a remote payment identifier.
    #[must_use]
    pub const fn holds_payment(self) -> bool {
        matches!(
            self,
            SessionState::AwaitingPayment | SessionState::Dispensing | SessionState::Cancelling
        )
    }

    /// Returns `true` when a tap starts a new charge.
    #[must_use]
    pub const fn accepts_tap(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error)
    }

    /// Returns `true` when a long hold cancels the live charge.
    #[must_use]
    pub const fn accepts_hold(self) -> bool {
        matches!(self, SessionState::AwaitingPayment)
    }

    /// Returns `true` while a sale is in progress and the price is locked.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Error)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Creating => "creating",
            SessionState::AwaitingPayment => "awaiting-payment",
            SessionState::Dispensing => "dispensing",
            SessionState::Cancelling => "cancelling",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Semantic user input produced by the button gesture tracker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UserEvent {
    Tap,
    LongHold,
}

/// Why a charge was abandoned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// Customer held the button past the long-hold threshold.
    UserHold,
    /// The payment window elapsed.
    Timeout,
    /// Operator issued `cancel` on the console.
    Operator,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CancelReason::UserHold => "user-hold",
            CancelReason::Timeout => "timeout",
            CancelReason::Operator => "operator",
        })
    }
}

/// Visual tone used by the presentation sink.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tone {
    Info,
    Warn,
    Error,
    Success,
}

/// Audible feedback patterns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BeepPattern {
    /// QR code is on screen.
    ChargeReady,
    /// Payment confirmed.
    Paid,
    /// Charge cancelled or expired.
    Cancel,
    /// Charge creation or dispense failed.
    Error,
}

/// Fixed status screens shown to the customer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Notice {
    Welcome,
    CreatingCharge,
    PaymentConfirmed,
    DispenseComplete,
    Cancelled,
    TimedOut,
    ChargeFailed(GatewayError),
    DispenseFault,
}

impl Notice {
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Notice::Welcome => "PIX vending",
            Notice::CreatingCharge => "Please wait",
            Notice::PaymentConfirmed => "Payment received",
            Notice::DispenseComplete => "Thank you",
            Notice::Cancelled => "Cancelled",
            Notice::TimedOut => "Timed out",
            Notice::ChargeFailed(_) => "Charge failed",
            Notice::DispenseFault => "Dispense fault",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Notice::Welcome => "Tap the button to buy",
            Notice::CreatingCharge => "Creating PIX charge",
            Notice::PaymentConfirmed => "Releasing your product",
            Notice::DispenseComplete => "Please take your product",
            Notice::Cancelled => "The charge was cancelled",
            Notice::TimedOut => "Payment window expired",
            Notice::ChargeFailed(error) => match error {
                GatewayError::Unreachable => "Payment service unreachable",
                GatewayError::Timeout => "Payment service timed out",
                GatewayError::HttpStatus(_) => "Payment service refused the charge",
                GatewayError::Malformed => "Unexpected payment service reply",
                GatewayError::AmountMismatch => "Charge amount did not match",
            },
            Notice::DispenseFault => "Please call the operator",
        }
    }

    #[must_use]
    pub const fn tone(self) -> Tone {
        match self {
            Notice::Welcome | Notice::CreatingCharge => Tone::Info,
            Notice::PaymentConfirmed | Notice::DispenseComplete => Tone::Success,
            Notice::Cancelled | Notice::TimedOut => Tone::Warn,
            Notice::ChargeFailed(_) | Notice::DispenseFault => Tone::Error,
        }
    }
}

/// Side effect requested by the session and executed by the controller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Effect {
    CreateCharge {
        amount: Amount,
        description: &'static str,
    },
    QueryStatus(PaymentId),
    CancelCharge(PaymentId),
    Actuate,
    Show(Notice),
    ShowQr {
        payload: QrPayload,
        amount: Amount,
        seconds_remaining: u32,
    },
    Beep(BeepPattern),
}

impl Effect {
    /// Screen or buzzer output. Later output supersedes it, so it gives way
    /// to commands when the queue is full.
    #[must_use]
    pub const fn is_presentation(&self) -> bool {
        matches!(
            self,
            Effect::Show(_) | Effect::ShowQr { .. } | Effect::Beep(_)
        )
    }
}

/// What moved the session from one state to another.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransitionCause {
    ChargeRequested,
    ChargeCreated,
    ChargeFailed(GatewayError),
    PaymentConfirmed,
    Cancelled(CancelReason),
    DispenseFinished,
    DispenseFaulted,
    ErrorCleared,
}

/// A state change applied by one handler call.
///
/// Transient states (`Cancelling`) are collapsed: a cancel reports
/// `AwaitingPayment -> Idle`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub cause: TransitionCause,
}

/// Result of applying a status poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    /// Session left `AwaitingPayment` or the id belongs to an older charge.
    Discarded,
    /// Payment confirmed; the session moved to `Dispensing`.
    Confirmed(SessionTransition),
    /// Known non-confirming status; the session stays alive.
    Pending(PaymentStatus),
    /// Status outside the known vocabulary (soft failure).
    Unrecognized,
    /// Transport failure (soft failure).
    Failed(GatewayError),
}

impl PollOutcome {
    #[must_use]
    pub const fn transition(self) -> Option<SessionTransition> {
        match self {
            PollOutcome::Confirmed(transition) => Some(transition),
            _ => None,
        }
    }
}

/// Rejected price change.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PriceError {
    /// A sale is in progress.
    Locked,
    /// Charges for zero are not allowed.
    Zero,
}

impl fmt::Display for PriceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PriceError::Locked => "price locked while a sale is in progress",
            PriceError::Zero => "price must be greater than zero",
        })
    }
}

/// Session timing and product configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    pub amount: Amount,
    pub description: &'static str,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub error_display: Duration,
}

impl SessionConfig {
    pub const DEFAULT_AMOUNT: Amount = Amount::from_minor(50);
    pub const DEFAULT_DESCRIPTION: &'static str = "Test product";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_ERROR_DISPLAY: Duration = Duration::from_secs(5);

    #[must_use]
    pub const fn new() -> Self {
        Self {
            amount: Self::DEFAULT_AMOUNT,
            description: Self::DEFAULT_DESCRIPTION,
            timeout: Self::DEFAULT_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            error_display: Self::DEFAULT_ERROR_DISPLAY,
        }
    }

    #[must_use]
    pub const fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self
    }

    #[must_use]
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the session used by status reporting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub payment_id: Option<PaymentId>,
    pub amount: Amount,
    pub seconds_remaining: Option<u32>,
    pub polls_issued: u32,
    pub soft_failures: u32,
    pub last_error: Option<GatewayError>,
    pub dropped_effects: u32,
}

/// The single charge session served by the terminal.
pub struct ChargeSession<I>
where
    I: TerminalInstant,
{
    config: SessionConfig,
    state: SessionState,
    amount: Amount,
    payment_id: Option<PaymentId>,
    qr_payload: QrPayload,
    created_at: Option<I>,
    last_poll_at: Option<I>,
    error_since: Option<I>,
    countdown: Option<u32>,
    polls_issued: u32,
    soft_failures: u32,
    last_error: Option<GatewayError>,
    last_session_duration: Option<Duration>,
    effects: Deque<Effect, EFFECT_QUEUE_DEPTH>,
    dropped_effects: u32,
}

impl<I> ChargeSession<I>
where
    I: TerminalInstant,
{
    /// Creates an idle session priced at `config.amount`.
    #[must_use]
    pub const fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            amount: config.amount,
            payment_id: None,
            qr_payload: String::new(),
            created_at: None,
            last_poll_at: None,
            error_since: None,
            countdown: None,
            polls_issued: 0,
            soft_failures: 0,
            last_error: None,
            last_session_duration: None,
            effects: Deque::new(),
            dropped_effects: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    /// Price of the next (or the live) charge.
    #[must_use]
    pub const fn amount(&self) -> Amount {
        self.amount
    }

    /// Status polls issued for the current (or most recent) charge.
    #[must_use]
    pub const fn polls_issued(&self) -> u32 {
        self.polls_issued
    }

    /// Number of effects discarded because the queue was full.
    #[must_use]
    pub const fn dropped_effects(&self) -> u32 {
        self.dropped_effects
    }

    /// Pops the oldest pending effect.
    pub fn take_effect(&mut self) -> Option<Effect> {
        self.effects.pop_front()
    }

    /// Changes the price used by the next charge.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::Locked`] while a sale is live and
    /// [`PriceError::Zero`] for a zero amount.
    pub fn set_amount(&mut self, amount: Amount) -> Result<(), PriceError> {
        if self.state.is_live() {
            return Err(PriceError::Locked);
        }
        if amount.is_zero() {
            return Err(PriceError::Zero);
        }
        self.amount = amount;
        Ok(())
    }

    /// Queues the idle screen. Called once at boot.
    pub fn announce(&mut self) {
        self.push_effect(Effect::Show(Notice::Welcome));
    }

    /// Applies a semantic user event.
    pub fn handle_event(&mut self, event: UserEvent, now: I) -> Option<SessionTransition> {
        match event {
            UserEvent::Tap if self.state.accepts_tap() => Some(self.begin_charge()),
            UserEvent::LongHold if self.state.accepts_hold() => {
                Some(self.cancel(CancelReason::UserHold, now))
            }
            UserEvent::Tap | UserEvent::LongHold => None,
        }
    }

    /// Cancels the live charge on behalf of the operator.
    pub fn request_cancel(&mut self, reason: CancelReason, now: I) -> Option<SessionTransition> {
        if self.state.accepts_hold() {
            Some(self.cancel(reason, now))
        } else {
            None
        }
    }

    /// Advances timers. Safe to call repeatedly with the same `now`.
    pub fn handle_tick(&mut self, now: I) -> Option<SessionTransition> {
        match self.state {
            SessionState::AwaitingPayment => self.tick_awaiting(now),
            SessionState::Error => {
                let since = self.error_since?;
                if now.saturating_duration_since(since) < self.config.error_display {
                    return None;
                }
                self.error_since = None;
                self.push_effect(Effect::Show(Notice::Welcome));
                Some(self.enter(SessionState::Idle, TransitionCause::ErrorCleared))
            }
            SessionState::Idle
            | SessionState::Creating
            | SessionState::Dispensing
            | SessionState::Cancelling => None,
        }
    }

    /// Applies the outcome of a `CreateCharge` effect.
    pub fn handle_create_result(
        &mut self,
        result: Result<ChargeReceipt, GatewayError>,
        now: I,
    ) -> Option<SessionTransition> {
        if self.state != SessionState::Creating {
            return None;
        }

        let receipt = match result {
            Ok(receipt) if receipt.payment_id.is_empty() => {
                return Some(self.fail(GatewayError::Malformed, now));
            }
            Ok(receipt) if receipt.amount != self.amount => {
                self.push_effect(Effect::CancelCharge(receipt.payment_id));
                return Some(self.fail(GatewayError::AmountMismatch, now));
            }
            Ok(receipt) => receipt,
            Err(error) => return Some(self.fail(error, now)),
        };

        self.payment_id = Some(receipt.payment_id);
        self.qr_payload = receipt.qr_payload;
        self.created_at = Some(now);
        self.last_poll_at = Some(now);
        self.polls_issued = 0;
        self.soft_failures = 0;
        self.last_error = None;

        let seconds = whole_seconds_ceil(self.config.timeout);
        self.countdown = Some(seconds);
        self.push_qr(seconds);
        self.push_effect(Effect::Beep(BeepPattern::ChargeReady));

        Some(self.enter(SessionState::AwaitingPayment, TransitionCause::ChargeCreated))
    }

    /// Applies the outcome of a `QueryStatus` effect for `payment_id`.
    pub fn handle_status_result(
        &mut self,
        payment_id: &str,
        result: Result<StatusReport, GatewayError>,
    ) -> PollOutcome {
        if self.state != SessionState::AwaitingPayment || self.payment_id() != Some(payment_id) {
            return PollOutcome::Discarded;
        }

        let report = match result {
            Ok(report) => report,
            Err(error) => {
                self.soft_failures = self.soft_failures.saturating_add(1);
                self.last_error = Some(error);
                return PollOutcome::Failed(error);
            }
        };

        match report.classify() {
            PaymentStatus::Confirmed => {
                self.countdown = None;
                self.push_effect(Effect::Show(Notice::PaymentConfirmed));
                self.push_effect(Effect::Beep(BeepPattern::Paid));
                self.push_effect(Effect::Actuate);
                PollOutcome::Confirmed(
                    self.enter(SessionState::Dispensing, TransitionCause::PaymentConfirmed),
                )
            }
            PaymentStatus::Unrecognized => {
                self.soft_failures = self.soft_failures.saturating_add(1);
                PollOutcome::Unrecognized
            }
            status @ (PaymentStatus::Pending | PaymentStatus::Declined) => {
                PollOutcome::Pending(status)
            }
        }
    }

    /// Applies a completed dispense.
    pub fn handle_actuator_done(&mut self, now: I) -> Option<SessionTransition> {
        self.finish_dispense(TransitionCause::DispenseFinished, now)
    }

    /// Applies a failed dispense. The actuator is never retried.
    pub fn handle_actuator_fault(&mut self, now: I) -> Option<SessionTransition> {
        self.finish_dispense(TransitionCause::DispenseFaulted, now)
    }

    /// Duration of the most recently finished charge, from creation to
    /// dispense completion or cancellation.
    #[must_use]
    pub const fn last_session_duration(&self) -> Option<Duration> {
        self.last_session_duration
    }

    /// Captures the current session view.
    #[must_use]
    pub fn snapshot(&self, now: I) -> SessionSnapshot {
        let seconds_remaining = match (self.state, self.created_at) {
            (SessionState::AwaitingPayment, Some(created_at)) => Some(whole_seconds_ceil(
                self.config
                    .timeout
                    .saturating_sub(now.saturating_duration_since(created_at)),
            )),
            _ => None,
        };

        SessionSnapshot {
            state: self.state,
            payment_id: self.payment_id.clone(),
            amount: self.amount,
            seconds_remaining,
            polls_issued: self.polls_issued,
            soft_failures: self.soft_failures,
            last_error: self.last_error,
            dropped_effects: self.dropped_effects,
        }
    }

    fn begin_charge(&mut self) -> SessionTransition {
        self.error_since = None;
        self.last_error = None;
        self.push_effect(Effect::Show(Notice::CreatingCharge));
        self.push_effect(Effect::CreateCharge {
            amount: self.amount,
            description: self.config.description,
        });
        self.enter(SessionState::Creating, TransitionCause::ChargeRequested)
    }

    fn tick_awaiting(&mut self, now: I) -> Option<SessionTransition> {
        let created_at = self.created_at?;
        let elapsed = now.saturating_duration_since(created_at);
        if elapsed >= self.config.timeout {
            return Some(self.cancel(CancelReason::Timeout, now));
        }

        let poll_due = self.last_poll_at.is_none_or(|last| {
            now.saturating_duration_since(last) >= self.config.poll_interval
        });
        let poll_queued = self
            .effects
            .iter()
            .any(|effect| matches!(effect, Effect::QueryStatus(_)));
        if poll_due && !poll_queued {
            if let Some(id) = self.payment_id.clone() {
                self.last_poll_at = Some(now);
                self.polls_issued = self.polls_issued.saturating_add(1);
                self.push_effect(Effect::QueryStatus(id));
            }
        }

        let seconds = whole_seconds_ceil(self.config.timeout.saturating_sub(elapsed));
        if self.countdown != Some(seconds) {
            self.countdown = Some(seconds);
            self.push_qr(seconds);
        }

        None
    }

    fn cancel(&mut self, reason: CancelReason, now: I) -> SessionTransition {
        let from = self.state;
        self.state = SessionState::Cancelling;
        if let Some(id) = self.payment_id.take() {
            self.push_effect(Effect::CancelCharge(id));
        }

        self.clear_charge(now);
        let notice = match reason {
            CancelReason::Timeout => Notice::TimedOut,
            CancelReason::UserHold | CancelReason::Operator => Notice::Cancelled,
        };
        self.push_effect(Effect::Show(notice));
        self.push_effect(Effect::Beep(BeepPattern::Cancel));
        self.state = SessionState::Idle;

        SessionTransition {
            from,
            to: SessionState::Idle,
            cause: TransitionCause::Cancelled(reason),
        }
    }

    fn fail(&mut self, error: GatewayError, now: I) -> SessionTransition {
        self.last_error = Some(error);
        self.error_since = Some(now);
        self.push_effect(Effect::Show(Notice::ChargeFailed(error)));
        self.push_effect(Effect::Beep(BeepPattern::Error));
        self.enter(SessionState::Error, TransitionCause::ChargeFailed(error))
    }

    fn finish_dispense(&mut self, cause: TransitionCause, now: I) -> Option<SessionTransition> {
        if self.state != SessionState::Dispensing {
            return None;
        }
        self.payment_id = None;
        self.clear_charge(now);
        if cause == TransitionCause::DispenseFaulted {
            self.push_effect(Effect::Show(Notice::DispenseFault));
            self.push_effect(Effect::Beep(BeepPattern::Error));
        } else {
            self.push_effect(Effect::Show(Notice::DispenseComplete));
        }
        Some(self.enter(SessionState::Idle, cause))
    }

    fn clear_charge(&mut self, now: I) {
        self.last_session_duration = self
            .created_at
            .map(|created_at| now.saturating_duration_since(created_at));
        self.qr_payload.clear();
        self.created_at = None;
        self.last_poll_at = None;
        self.countdown = None;
    }

    fn enter(&mut self, to: SessionState, cause: TransitionCause) -> SessionTransition {
        let from = self.state;
        self.state = to;
        SessionTransition { from, to, cause }
    }

    fn push_qr(&mut self, seconds_remaining: u32) {
        let effect = Effect::ShowQr {
            payload: self.qr_payload.clone(),
            amount: self.amount,
            seconds_remaining,
        };
        self.push_effect(effect);
    }

    /// Queues `effect`. A newer countdown replaces a queued one. When the
    /// queue is full the oldest presentation effect is evicted; a command is
    /// only lost when every queued effect is itself a command.
    fn push_effect(&mut self, effect: Effect) {
        if matches!(effect, Effect::ShowQr { .. }) {
            if let Some(queued) = self
                .effects
                .iter_mut()
                .find(|queued| matches!(queued, Effect::ShowQr { .. }))
            {
                *queued = effect;
                return;
            }
        }

        if self.effects.is_full() && !self.evict_presentation() && effect.is_presentation() {
            self.dropped_effects = self.dropped_effects.saturating_add(1);
            return;
        }
        if self.effects.push_back(effect).is_err() {
            self.dropped_effects = self.dropped_effects.saturating_add(1);
        }
    }

    fn evict_presentation(&mut self) -> bool {
        let Some(index) = self.effects.iter().position(Effect::is_presentation) else {
            return false;
        };
        for position in 0..self.effects.len() {
            if let Some(effect) = self.effects.pop_front() {
                if position != index {
                    // Cannot fail: the slot was just popped.
                    let _ = self.effects.push_back(effect);
                }
            }
        }
        self.dropped_effects = self.dropped_effects.saturating_add(1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ops::Add;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl MicrosInstant {
        fn from_millis(value: u64) -> Self {
            Self(value * 1_000)
        }
    }

    impl Add<Duration> for MicrosInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
            Self(self.0.saturating_add(micros))
        }
    }

    impl TerminalInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    fn at(ms: u64) -> MicrosInstant {
        MicrosInstant::from_millis(ms)
    }

    fn drain(session: &mut ChargeSession<MicrosInstant>) -> Vec<Effect, 16> {
        let mut effects = Vec::new();
        while let Some(effect) = session.take_effect() {
            effects.push(effect).unwrap();
        }
        effects
    }

    fn receipt(id: &str, minor: u32) -> ChargeReceipt {
        ChargeReceipt::new(id, "Q", Amount::from_minor(minor)).unwrap()
    }

    fn awaiting_session() -> ChargeSession<MicrosInstant> {
        let mut session = ChargeSession::new(SessionConfig::new());
        session.handle_event(UserEvent::Tap, at(0));
        session.handle_create_result(Ok(receipt("p1", 50)), at(100));
        drain(&mut session);
        session
    }

    fn assert_payment_id_matches_state(session: &ChargeSession<MicrosInstant>) {
        assert_eq!(
            session.payment_id().is_some_and(|id| !id.is_empty()),
            session.state().holds_payment(),
            "payment id presence must follow state {:?}",
            session.state()
        );
    }

    #[test]
    fn tap_in_idle_requests_charge() {
        let mut session = ChargeSession::<MicrosInstant>::new(SessionConfig::new());
        let transition = session.handle_event(UserEvent::Tap, at(0)).unwrap();

        assert_eq!(transition.from, SessionState::Idle);
        assert_eq!(transition.to, SessionState::Creating);
        let effects = drain(&mut session);
        assert!(effects.contains(&Effect::CreateCharge {
            amount: Amount::from_minor(50),
            description: SessionConfig::DEFAULT_DESCRIPTION,
        }));
        assert_payment_id_matches_state(&session);
    }

    #[test]
    fn create_success_enters_awaiting_payment() {
        let mut session = ChargeSession::new(SessionConfig::new());
        session.handle_event(UserEvent::Tap, at(0));
        drain(&mut session);

        session.handle_create_result(Ok(receipt("p1", 50)), at(100));

        assert_eq!(session.state(), SessionState::AwaitingPayment);
        assert_eq!(session.payment_id(), Some("p1"));
        let effects = drain(&mut session);
        assert!(effects.iter().any(|effect| matches!(
            effect,
            Effect::ShowQr { payload, seconds_remaining: 60, .. } if payload.as_str() == "Q"
        )));
        assert_payment_id_matches_state(&session);
    }

    #[test]
    fn tick_at_poll_boundary_queries_once() {
        let mut session = awaiting_session();

        assert!(session.handle_tick(at(5_099)).is_none());
        assert!(
            !drain(&mut session)
                .iter()
                .any(|effect| matches!(effect, Effect::QueryStatus(_)))
        );

        session.handle_tick(at(5_100));
        let effects = drain(&mut session);
        assert!(effects.contains(&Effect::QueryStatus(PaymentId::try_from("p1").unwrap())));

        session.handle_tick(at(5_100));
        assert!(drain(&mut session).is_empty());
        assert_eq!(session.snapshot(at(5_100)).polls_issued, 1);
    }

    #[test]
    fn pending_status_keeps_session_alive() {
        let mut session = awaiting_session();
        let outcome = session.handle_status_result("p1", Ok(StatusReport::new("pending").unwrap()));

        assert_eq!(outcome, PollOutcome::Pending(PaymentStatus::Pending));
        assert_eq!(session.state(), SessionState::AwaitingPayment);
    }

    #[test]
    fn approval_dispenses_then_returns_to_idle() {
        let mut session = awaiting_session();
        let outcome =
            session.handle_status_result("p1", Ok(StatusReport::new("APPROVED").unwrap()));

        assert!(matches!(outcome, PollOutcome::Confirmed(_)));
        assert_eq!(session.state(), SessionState::Dispensing);
        assert!(drain(&mut session).contains(&Effect::Actuate));
        assert_payment_id_matches_state(&session);

        let transition = session.handle_actuator_done(at(7_000)).unwrap();
        assert_eq!(transition.to, SessionState::Idle);
        assert_eq!(session.payment_id(), None);
        assert_payment_id_matches_state(&session);
    }

    #[test]
    fn timeout_before_first_poll_cancels() {
        let mut session = ChargeSession::new(
            SessionConfig::new().with_poll_interval(Duration::from_secs(120)),
        );
        session.handle_event(UserEvent::Tap, at(0));
        session.handle_create_result(Ok(receipt("p1", 50)), at(0));
        drain(&mut session);

        let transition = session.handle_tick(at(60_000)).unwrap();

        assert_eq!(transition.cause, TransitionCause::Cancelled(CancelReason::Timeout));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.payment_id(), None);
        let effects = drain(&mut session);
        assert_eq!(
            effects[0],
            Effect::CancelCharge(PaymentId::try_from("p1").unwrap())
        );
        assert!(effects.contains(&Effect::Show(Notice::TimedOut)));
    }

    #[test]
    fn timeout_dominates_poll_phase() {
        let mut session = awaiting_session();
        session.handle_tick(at(5_100));
        drain(&mut session);

        session.handle_tick(at(60_100));

        assert_eq!(session.state(), SessionState::Idle);
        assert!(
            !drain(&mut session)
                .iter()
                .any(|effect| matches!(effect, Effect::QueryStatus(_)))
        );
    }

    #[test]
    fn long_hold_cancels_immediately_and_discards_late_status() {
        let mut session = awaiting_session();
        let transition = session.handle_event(UserEvent::LongHold, at(4_000)).unwrap();

        assert_eq!(transition.from, SessionState::AwaitingPayment);
        assert_eq!(transition.to, SessionState::Idle);
        assert_payment_id_matches_state(&session);

        let outcome =
            session.handle_status_result("p1", Ok(StatusReport::new("approved").unwrap()));
        assert_eq!(outcome, PollOutcome::Discarded);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn create_failure_is_not_sticky() {
        let mut session = ChargeSession::<MicrosInstant>::new(SessionConfig::new());
        session.handle_event(UserEvent::Tap, at(0));
        session.handle_create_result(Err(GatewayError::Timeout), at(3_000));

        assert_eq!(session.state(), SessionState::Error);
        assert_payment_id_matches_state(&session);

        session.handle_event(UserEvent::Tap, at(3_500));
        assert_eq!(session.state(), SessionState::Creating);
    }

    #[test]
    fn error_clears_after_display_delay() {
        let mut session = ChargeSession::<MicrosInstant>::new(SessionConfig::new());
        session.handle_event(UserEvent::Tap, at(0));
        session.handle_create_result(Err(GatewayError::Unreachable), at(1_000));

        assert!(session.handle_tick(at(5_999)).is_none());
        let transition = session.handle_tick(at(6_000)).unwrap();
        assert_eq!(transition.cause, TransitionCause::ErrorCleared);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn amount_mismatch_fails_and_cancels_remote_charge() {
        let mut session = ChargeSession::<MicrosInstant>::new(SessionConfig::new());
        session.handle_event(UserEvent::Tap, at(0));
        drain(&mut session);

        let transition = session
            .handle_create_result(Ok(receipt("p9", 500)), at(10))
            .unwrap();

        assert_eq!(
            transition.cause,
            TransitionCause::ChargeFailed(GatewayError::AmountMismatch)
        );
        assert_eq!(session.payment_id(), None);
        assert_eq!(
            drain(&mut session)[0],
            Effect::CancelCharge(PaymentId::try_from("p9").unwrap())
        );
    }

    #[test]
    fn soft_failures_never_move_the_session() {
        let mut session = awaiting_session();

        let unknown = session.handle_status_result("p1", Ok(StatusReport::new("weird").unwrap()));
        let failed = session.handle_status_result("p1", Err(GatewayError::Timeout));
        let declined =
            session.handle_status_result("p1", Ok(StatusReport::new("rejected").unwrap()));

        assert_eq!(unknown, PollOutcome::Unrecognized);
        assert_eq!(failed, PollOutcome::Failed(GatewayError::Timeout));
        assert_eq!(declined, PollOutcome::Pending(PaymentStatus::Declined));
        assert_eq!(session.state(), SessionState::AwaitingPayment);
        assert_eq!(session.snapshot(at(200)).soft_failures, 2);
    }

    #[test]
    fn status_for_other_payment_is_discarded() {
        let mut session = awaiting_session();
        let outcome =
            session.handle_status_result("p0", Ok(StatusReport::new("approved").unwrap()));

        assert_eq!(outcome, PollOutcome::Discarded);
        assert_eq!(session.state(), SessionState::AwaitingPayment);
    }

    #[test]
    fn dispensing_ignores_everything_but_completion() {
        let mut session = awaiting_session();
        session.handle_status_result("p1", Ok(StatusReport::new("paid").unwrap()));
        drain(&mut session);

        assert!(session.handle_event(UserEvent::Tap, at(200)).is_none());
        assert!(session.handle_event(UserEvent::LongHold, at(200)).is_none());
        assert!(session.request_cancel(CancelReason::Operator, at(200)).is_none());
        assert!(session.handle_tick(at(120_000)).is_none());
        assert_eq!(session.set_amount(Amount::from_minor(75)), Err(PriceError::Locked));
        assert_eq!(session.state(), SessionState::Dispensing);
    }

    #[test]
    fn countdown_reemits_qr_once_per_second() {
        let mut session = awaiting_session();

        session.handle_tick(at(1_050));
        assert!(drain(&mut session).is_empty());

        session.handle_tick(at(1_150));
        let next = drain(&mut session);
        assert_eq!(next.len(), 1);
        assert!(matches!(
            next[0],
            Effect::ShowQr {
                seconds_remaining: 59,
                ..
            }
        ));

        session.handle_tick(at(1_180));
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn dispense_fault_still_returns_to_idle() {
        let mut session = awaiting_session();
        session.handle_status_result("p1", Ok(StatusReport::new("approved").unwrap()));
        drain(&mut session);

        let transition = session.handle_actuator_fault(at(2_100)).unwrap();

        assert_eq!(transition.cause, TransitionCause::DispenseFaulted);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.last_session_duration(), Some(Duration::from_secs(2)));
        assert!(drain(&mut session).contains(&Effect::Show(Notice::DispenseFault)));
    }

    #[test]
    fn price_changes_only_between_sales() {
        let mut session = ChargeSession::<MicrosInstant>::new(SessionConfig::new());
        assert_eq!(session.set_amount(Amount::ZERO), Err(PriceError::Zero));
        session.set_amount(Amount::from_minor(150)).unwrap();

        session.handle_event(UserEvent::Tap, at(0));
        assert_eq!(session.set_amount(Amount::from_minor(10)), Err(PriceError::Locked));
        assert!(drain(&mut session).contains(&Effect::CreateCharge {
            amount: Amount::from_minor(150),
            description: SessionConfig::DEFAULT_DESCRIPTION,
        }));
    }

    #[test]
    fn configured_description_is_sent_with_the_charge() {
        let config = SessionConfig::new().with_description("Cold brew");
        let mut session = ChargeSession::<MicrosInstant>::new(config);
        session.handle_event(UserEvent::Tap, at(0));
        assert!(drain(&mut session).contains(&Effect::CreateCharge {
            amount: SessionConfig::DEFAULT_AMOUNT,
            description: "Cold brew",
        }));
    }

    #[test]
    fn amount_renders_with_two_decimals() {
        let mut rendered = String::<16>::new();
        core::fmt::write(&mut rendered, format_args!("{}", Amount::from_minor(1_505))).unwrap();
        assert_eq!(rendered.as_str(), "15.05");
    }

    #[test]
    fn undrained_countdown_keeps_a_single_qr() {
        let mut session = awaiting_session();
        for second in 1..=9 {
            session.handle_tick(at(100 + second * 1_000));
        }
        let outcome =
            session.handle_status_result("p1", Ok(StatusReport::new("approved").unwrap()));

        assert!(matches!(outcome, PollOutcome::Confirmed(_)));
        let effects = drain(&mut session);
        let qrs: Vec<u32, 8> = effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::ShowQr {
                    seconds_remaining, ..
                } => Some(*seconds_remaining),
                _ => None,
            })
            .collect();
        assert_eq!(qrs.as_slice(), [51]);
        assert_eq!(
            effects
                .iter()
                .filter(|effect| matches!(effect, Effect::QueryStatus(_)))
                .count(),
            1
        );
        assert!(effects.contains(&Effect::Actuate));
        assert_eq!(session.dropped_effects(), 0);
    }

    #[test]
    fn full_queue_evicts_screens_before_create() {
        let mut session = ChargeSession::<MicrosInstant>::new(SessionConfig::new());
        for _ in 0..EFFECT_QUEUE_DEPTH {
            session.announce();
        }

        session.handle_event(UserEvent::Tap, at(0));

        assert_eq!(session.state(), SessionState::Creating);
        assert_eq!(session.dropped_effects(), 2);
        let effects = drain(&mut session);
        assert_eq!(effects.len(), EFFECT_QUEUE_DEPTH);
        assert!(effects.iter().any(|effect| matches!(effect, Effect::CreateCharge { .. })));
        assert_eq!(effects.last(), Some(&Effect::CreateCharge {
            amount: SessionConfig::DEFAULT_AMOUNT,
            description: SessionConfig::DEFAULT_DESCRIPTION,
        }));
        assert!(effects.contains(&Effect::Show(Notice::CreatingCharge)));
    }

    #[test]
    fn full_queue_never_loses_actuate() {
        let mut session = awaiting_session();
        for _ in 0..EFFECT_QUEUE_DEPTH {
            session.announce();
        }

        session.handle_status_result("p1", Ok(StatusReport::new("approved").unwrap()));

        assert_eq!(session.state(), SessionState::Dispensing);
        assert_eq!(session.dropped_effects(), 3);
        let effects = drain(&mut session);
        assert_eq!(effects.last(), Some(&Effect::Actuate));
        assert_eq!(
            effects.iter().filter(|effect| !effect.is_presentation()).count(),
            1
        );
    }

    #[test]
    fn queued_poll_is_not_duplicated() {
        let mut session = awaiting_session();
        session.handle_tick(at(5_100));
        session.handle_tick(at(10_100));

        let polls = drain(&mut session)
            .iter()
            .filter(|effect| matches!(effect, Effect::QueryStatus(_)))
            .count();
        assert_eq!(polls, 1);
        assert_eq!(session.polls_issued(), 1);
    }
}
