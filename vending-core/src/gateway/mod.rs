//! Payment gateway contract consumed by the controller loop.
//!
//! The terminal never talks HTTP itself. Firmware forwards requests over a
//! serial relay link (see [`wire`]) and the emulator plugs in a scripted
//! gateway; both implement [`PaymentGateway`]. Every call must be bounded by
//! [`GATEWAY_CALL_TIMEOUT`] and report expiry as [`GatewayError::Timeout`].

use core::fmt;
use core::time::Duration;

use heapless::String;

use crate::session::{Amount, PaymentId, QrPayload};

pub mod wire;

/// Upper bound for a single create/status/cancel round trip.
pub const GATEWAY_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum length of a raw status value reported by the backend.
pub const MAX_STATUS_LEN: usize = 24;

/// Raw status text as reported by the backend.
pub type StatusText = String<MAX_STATUS_LEN>;

/// Failure reported by a gateway call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GatewayError {
    /// Relay or backend could not be reached.
    Unreachable,
    /// The call did not complete within [`GATEWAY_CALL_TIMEOUT`].
    Timeout,
    /// Backend answered with a non-success HTTP-equivalent status.
    HttpStatus(u16),
    /// Response body could not be decoded or did not match the request.
    Malformed,
    /// Charge was created for a different amount than requested.
    AmountMismatch,
}

impl GatewayError {
    /// Short, stable label used in logs and console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            GatewayError::Unreachable => "unreachable",
            GatewayError::Timeout => "timeout",
            GatewayError::HttpStatus(_) => "http-status",
            GatewayError::Malformed => "malformed",
            GatewayError::AmountMismatch => "amount-mismatch",
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::HttpStatus(code) => write!(f, "http-status {code}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Successful charge creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChargeReceipt {
    pub payment_id: PaymentId,
    pub qr_payload: QrPayload,
    pub amount: Amount,
}

impl ChargeReceipt {
    /// Builds a receipt from borrowed fields, rejecting oversized values.
    pub fn new(payment_id: &str, qr_payload: &str, amount: Amount) -> Result<Self, GatewayError> {
        let payment_id = PaymentId::try_from(payment_id).map_err(|_| GatewayError::Malformed)?;
        let qr_payload = QrPayload::try_from(qr_payload).map_err(|_| GatewayError::Malformed)?;
        Ok(Self {
            payment_id,
            qr_payload,
            amount,
        })
    }
}

/// Result of a status query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusReport {
    pub status: StatusText,
}

impl StatusReport {
    /// Builds a report from a raw status value, rejecting oversized values.
    pub fn new(status: &str) -> Result<Self, GatewayError> {
        let status = StatusText::try_from(status).map_err(|_| GatewayError::Malformed)?;
        Ok(Self { status })
    }

    /// Classifies the raw status value.
    #[must_use]
    pub fn classify(&self) -> PaymentStatus {
        PaymentStatus::classify(&self.status)
    }
}

/// Normalized payment status vocabulary.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PaymentStatus {
    /// Money has been received; the only status that releases goods.
    Confirmed,
    /// Charge is still open.
    Pending,
    /// Backend reports a terminal negative outcome.
    Declined,
    /// Value outside the known vocabulary.
    Unrecognized,
}

const CONFIRMED_STATUSES: &[&str] = &["approved", "paid"];
const PENDING_STATUSES: &[&str] = &["pending", "in_process", "in_mediation", "authorized"];
const DECLINED_STATUSES: &[&str] = &[
    "rejected",
    "cancelled",
    "canceled",
    "refunded",
    "charged_back",
    "expired",
];

impl PaymentStatus {
    /// Classifies a raw status value, ignoring ASCII case and surrounding whitespace.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        let value = raw.trim();
        let matches = |vocabulary: &[&str]| {
            vocabulary
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(value))
        };

        if matches(CONFIRMED_STATUSES) {
            PaymentStatus::Confirmed
        } else if matches(PENDING_STATUSES) {
            PaymentStatus::Pending
        } else if matches(DECLINED_STATUSES) {
            PaymentStatus::Declined
        } else {
            PaymentStatus::Unrecognized
        }
    }
}

/// Remote payment backend as seen from the terminal.
///
/// Calls are awaited from the single control cycle, so implementations must
/// enforce [`GATEWAY_CALL_TIMEOUT`] themselves.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway {
    /// Opens a new PIX charge for `amount`.
    async fn create_charge(
        &mut self,
        amount: Amount,
        description: &str,
    ) -> Result<ChargeReceipt, GatewayError>;

    /// Queries the current status of `payment_id`.
    async fn query_status(&mut self, payment_id: &str) -> Result<StatusReport, GatewayError>;

    /// Best-effort cancellation of an open charge.
    async fn cancel(&mut self, payment_id: &str) -> Result<(), GatewayError>;
}
