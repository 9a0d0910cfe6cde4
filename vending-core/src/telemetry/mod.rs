//! Telemetry event catalog and payload structures shared by firmware and host targets.
//!
//! Every observable step of a sale (state changes, gestures, gateway calls,
//! dispense outcomes) lands in a fixed-size ring so the operator console can
//! show recent history without heap allocation. Event kinds serialize to
//! compact numeric codes for transport over diagnostics channels.

use core::{convert::TryFrom, fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::clock::TerminalInstant;
use crate::gateway::GatewayError;
use crate::gesture::Gesture;
use crate::session::{CancelReason, SessionState, SessionTransition, TransitionCause};

/// Monotonic identifier assigned to each telemetry record.
pub type EventId = u32;

/// Discriminated telemetry events shared across all terminal targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    StateEntered(SessionState),
    GestureDetected(Gesture),
    ChargeCreated,
    ChargeFailed,
    StatusPolled,
    PollFailed,
    StatusUnrecognized,
    PaymentConfirmed,
    SessionCancelled(CancelReason),
    CancelFailed,
    DispenseComplete,
    DispenseFault,
    EffectOverflow,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::StateEntered(state) => write!(f, "state {state}"),
            TelemetryEventKind::GestureDetected(gesture) => write!(f, "gesture {gesture}"),
            TelemetryEventKind::ChargeCreated => f.write_str("charge-created"),
            TelemetryEventKind::ChargeFailed => f.write_str("charge-failed"),
            TelemetryEventKind::StatusPolled => f.write_str("status-polled"),
            TelemetryEventKind::PollFailed => f.write_str("poll-failed"),
            TelemetryEventKind::StatusUnrecognized => f.write_str("status-unrecognized"),
            TelemetryEventKind::PaymentConfirmed => f.write_str("payment-confirmed"),
            TelemetryEventKind::SessionCancelled(reason) => write!(f, "cancelled {reason}"),
            TelemetryEventKind::CancelFailed => f.write_str("cancel-failed"),
            TelemetryEventKind::DispenseComplete => f.write_str("dispense-complete"),
            TelemetryEventKind::DispenseFault => f.write_str("dispense-fault"),
            TelemetryEventKind::EffectOverflow => f.write_str("effect-overflow"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const STATE_ENTERED_BASE: u16 = 0x0000;
    const GESTURE_BASE: u16 = 0x0008;
    const CHARGE_CREATED_CODE: u16 = 0x0010;
    const CHARGE_FAILED_CODE: u16 = 0x0011;
    const STATUS_POLLED_CODE: u16 = 0x0012;
    const POLL_FAILED_CODE: u16 = 0x0013;
    const STATUS_UNRECOGNIZED_CODE: u16 = 0x0014;
    const PAYMENT_CONFIRMED_CODE: u16 = 0x0015;
    const CANCELLED_BASE: u16 = 0x0018;
    const CANCEL_FAILED_CODE: u16 = 0x001C;
    const DISPENSE_COMPLETE_CODE: u16 = 0x0020;
    const DISPENSE_FAULT_CODE: u16 = 0x0021;
    const EFFECT_OVERFLOW_CODE: u16 = 0x0022;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::StateEntered(state) => Self::STATE_ENTERED_BASE + state_index(state),
            TelemetryEventKind::GestureDetected(gesture) => {
                Self::GESTURE_BASE + gesture_index(gesture)
            }
            TelemetryEventKind::ChargeCreated => Self::CHARGE_CREATED_CODE,
            TelemetryEventKind::ChargeFailed => Self::CHARGE_FAILED_CODE,
            TelemetryEventKind::StatusPolled => Self::STATUS_POLLED_CODE,
            TelemetryEventKind::PollFailed => Self::POLL_FAILED_CODE,
            TelemetryEventKind::StatusUnrecognized => Self::STATUS_UNRECOGNIZED_CODE,
            TelemetryEventKind::PaymentConfirmed => Self::PAYMENT_CONFIRMED_CODE,
            TelemetryEventKind::SessionCancelled(reason) => {
                Self::CANCELLED_BASE + reason_index(reason)
            }
            TelemetryEventKind::CancelFailed => Self::CANCEL_FAILED_CODE,
            TelemetryEventKind::DispenseComplete => Self::DISPENSE_COMPLETE_CODE,
            TelemetryEventKind::DispenseFault => Self::DISPENSE_FAULT_CODE,
            TelemetryEventKind::EffectOverflow => Self::EFFECT_OVERFLOW_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant into a telemetry event, falling back to [`Custom`].
    ///
    /// [`Custom`]: TelemetryEventKind::Custom
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::CHARGE_CREATED_CODE => TelemetryEventKind::ChargeCreated,
            Self::CHARGE_FAILED_CODE => TelemetryEventKind::ChargeFailed,
            Self::STATUS_POLLED_CODE => TelemetryEventKind::StatusPolled,
            Self::POLL_FAILED_CODE => TelemetryEventKind::PollFailed,
            Self::STATUS_UNRECOGNIZED_CODE => TelemetryEventKind::StatusUnrecognized,
            Self::PAYMENT_CONFIRMED_CODE => TelemetryEventKind::PaymentConfirmed,
            Self::CANCEL_FAILED_CODE => TelemetryEventKind::CancelFailed,
            Self::DISPENSE_COMPLETE_CODE => TelemetryEventKind::DispenseComplete,
            Self::DISPENSE_FAULT_CODE => TelemetryEventKind::DispenseFault,
            Self::EFFECT_OVERFLOW_CODE => TelemetryEventKind::EffectOverflow,
            value if (Self::STATE_ENTERED_BASE..Self::GESTURE_BASE).contains(&value) => {
                state_from_index(value - Self::STATE_ENTERED_BASE).map_or(
                    TelemetryEventKind::Custom(value),
                    TelemetryEventKind::StateEntered,
                )
            }
            value if (Self::GESTURE_BASE..Self::CHARGE_CREATED_CODE).contains(&value) => {
                gesture_from_index(value - Self::GESTURE_BASE).map_or(
                    TelemetryEventKind::Custom(value),
                    TelemetryEventKind::GestureDetected,
                )
            }
            value if (Self::CANCELLED_BASE..Self::CANCEL_FAILED_CODE).contains(&value) => {
                reason_from_index(value - Self::CANCELLED_BASE).map_or(
                    TelemetryEventKind::Custom(value),
                    TelemetryEventKind::SessionCancelled,
                )
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

/// Gateway call a payload refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GatewayOperation {
    Create,
    Status,
    Cancel,
}

impl fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GatewayOperation::Create => "create",
            GatewayOperation::Status => "status",
            GatewayOperation::Cancel => "cancel",
        })
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Details describing a state change.
    Transition(TransitionTelemetry),
    /// Outcome of a gateway call.
    Gateway(GatewayTelemetry),
    /// Summary of a finished sale or cancelled charge.
    Session(SessionTelemetry),
    /// Number of effects dropped so far.
    Overflow(u32),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Transition(details) => {
                write!(f, "from={}", details.from)?;
                if let Some(elapsed) = details.elapsed_since_previous {
                    write!(f, " after={}ms", elapsed.as_millis())?;
                }
                Ok(())
            }
            TelemetryPayload::Gateway(details) => {
                write!(f, "op={}", details.operation)?;
                if let Some(error) = details.error {
                    write!(f, " error={error}")?;
                }
                Ok(())
            }
            TelemetryPayload::Session(details) => {
                if let Some(duration) = details.duration {
                    write!(f, "duration={}ms ", duration.as_millis())?;
                }
                write!(f, "polls={}", details.polls)
            }
            TelemetryPayload::Overflow(dropped) => write!(f, "dropped={dropped}"),
        }
    }
}

/// State change payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransitionTelemetry {
    pub from: SessionState,
    pub cause: TransitionCause,
    pub elapsed_since_previous: Option<Duration>,
}

/// Gateway call payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GatewayTelemetry {
    pub operation: GatewayOperation,
    pub error: Option<GatewayError>,
}

impl GatewayTelemetry {
    #[must_use]
    pub const fn new(operation: GatewayOperation, error: Option<GatewayError>) -> Self {
        Self { operation, error }
    }
}

/// Sale summary payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SessionTelemetry {
    pub duration: Option<Duration>,
    pub polls: u16,
}

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_transition_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TerminalInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_transition_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the `count` most recent records, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        let skip = self.ring.len().saturating_sub(count);
        self.ring.oldest_ordered().skip(skip)
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier the next record will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records a state change and captures elapsed time since the previous one.
    ///
    /// Cancellations additionally record a [`TelemetryEventKind::SessionCancelled`]
    /// entry carrying the charge duration.
    pub fn record_transition(
        &mut self,
        transition: SessionTransition,
        session_duration: Option<Duration>,
        polls: u32,
        timestamp: TInstant,
    ) -> EventId {
        let elapsed = self
            .last_transition_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_transition_at = Some(timestamp);

        if let TransitionCause::Cancelled(reason) = transition.cause {
            self.record_session_end(
                TelemetryEventKind::SessionCancelled(reason),
                session_duration,
                polls,
                timestamp,
            );
        }

        let payload = TelemetryPayload::Transition(TransitionTelemetry {
            from: transition.from,
            cause: transition.cause,
            elapsed_since_previous: elapsed,
        });
        self.record(
            TelemetryEventKind::StateEntered(transition.to),
            payload,
            timestamp,
        )
    }

    /// Records a recognised button gesture.
    pub fn record_gesture(&mut self, gesture: Gesture, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::GestureDetected(gesture),
            TelemetryPayload::none(),
            timestamp,
        )
    }

    /// Records a gateway call outcome.
    pub fn record_gateway(
        &mut self,
        event: TelemetryEventKind,
        operation: GatewayOperation,
        error: Option<GatewayError>,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            event,
            TelemetryPayload::Gateway(GatewayTelemetry::new(operation, error)),
            timestamp,
        )
    }

    /// Records the end of a charge (dispense outcome or cancellation).
    pub fn record_session_end(
        &mut self,
        event: TelemetryEventKind,
        duration: Option<Duration>,
        polls: u32,
        timestamp: TInstant,
    ) -> EventId {
        let payload = TelemetryPayload::Session(SessionTelemetry {
            duration,
            polls: truncate_count(polls),
        });
        self.record(event, payload, timestamp)
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TerminalInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_count(count: u32) -> u16 {
    u16::try_from(count).unwrap_or(u16::MAX)
}

const fn state_index(state: SessionState) -> u16 {
    match state {
        SessionState::Idle => 0,
        SessionState::Creating => 1,
        SessionState::AwaitingPayment => 2,
        SessionState::Dispensing => 3,
        SessionState::Cancelling => 4,
        SessionState::Error => 5,
    }
}

fn state_from_index(index: u16) -> Option<SessionState> {
    match index {
        0 => Some(SessionState::Idle),
        1 => Some(SessionState::Creating),
        2 => Some(SessionState::AwaitingPayment),
        3 => Some(SessionState::Dispensing),
        4 => Some(SessionState::Cancelling),
        5 => Some(SessionState::Error),
        _ => None,
    }
}

const fn gesture_index(gesture: Gesture) -> u16 {
    match gesture {
        Gesture::Tap => 0,
        Gesture::LongHold => 1,
    }
}

fn gesture_from_index(index: u16) -> Option<Gesture> {
    match index {
        0 => Some(Gesture::Tap),
        1 => Some(Gesture::LongHold),
        _ => None,
    }
}

const fn reason_index(reason: CancelReason) -> u16 {
    match reason {
        CancelReason::UserHold => 0,
        CancelReason::Timeout => 1,
        CancelReason::Operator => 2,
    }
}

fn reason_from_index(index: u16) -> Option<CancelReason> {
    match index {
        0 => Some(CancelReason::UserHold),
        1 => Some(CancelReason::Timeout),
        2 => Some(CancelReason::Operator),
        _ => None,
    }
}
