//! Line protocol spoken with the payment relay over the serial link.
//!
//! The terminal writes one request per line and waits for one response line:
//!
//! ```text
//! > CREATE 50 Test product        < CHARGE p1 50 00020126...6304ABCD
//! > STATUS p1                     < STATUS p1 pending
//! > CANCEL p1                     < OK
//!                                 < ERR http 502 bad gateway
//! ```
//!
//! Keywords are case-insensitive and a trailing `\r` is tolerated. Anything
//! after the fixed fields of `CREATE` and `CHARGE` is taken verbatim.

use core::fmt;

use winnow::ascii::{Caseless, dec_uint, space1};
use winnow::combinator::{alt, opt, preceded, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{literal, rest, take_till};

use super::{ChargeReceipt, GatewayError, StatusReport};
use crate::session::{Amount, MAX_PAYMENT_ID_LEN, MAX_QR_PAYLOAD_LEN};

/// Longest line either side may send, excluding the terminator.
pub const MAX_LINE_LEN: usize = MAX_QR_PAYLOAD_LEN + MAX_PAYMENT_ID_LEN + 32;

/// Codec failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireError {
    /// Line does not match the grammar.
    Syntax,
    /// Line exceeds [`MAX_LINE_LEN`].
    TooLong,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Syntax => f.write_str("malformed line"),
            WireError::TooLong => write!(f, "line longer than {MAX_LINE_LEN} bytes"),
        }
    }
}

impl From<WireError> for GatewayError {
    fn from(_: WireError) -> Self {
        GatewayError::Malformed
    }
}

/// Terminal-to-relay request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Request<'a> {
    Create {
        amount: Amount,
        description: &'a str,
    },
    Status(&'a str),
    Cancel(&'a str),
}

impl fmt::Display for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Create {
                amount,
                description,
            } => write!(f, "CREATE {} {description}", amount.minor()),
            Request::Status(id) => write!(f, "STATUS {id}"),
            Request::Cancel(id) => write!(f, "CANCEL {id}"),
        }
    }
}

/// Relay-to-terminal response.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Response<'a> {
    Charge {
        payment_id: &'a str,
        amount: Amount,
        qr_payload: &'a str,
    },
    Status {
        payment_id: &'a str,
        status: &'a str,
    },
    Ok,
    Err(GatewayError),
}

impl fmt::Display for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Charge {
                payment_id,
                amount,
                qr_payload,
            } => write!(f, "CHARGE {payment_id} {} {qr_payload}", amount.minor()),
            Response::Status { payment_id, status } => write!(f, "STATUS {payment_id} {status}"),
            Response::Ok => f.write_str("OK"),
            Response::Err(GatewayError::HttpStatus(code)) => write!(f, "ERR http {code}"),
            Response::Err(GatewayError::Unreachable) => f.write_str("ERR unreachable"),
            Response::Err(GatewayError::Timeout) => f.write_str("ERR timeout"),
            Response::Err(GatewayError::Malformed | GatewayError::AmountMismatch) => {
                f.write_str("ERR malformed")
            }
        }
    }
}

impl<'a> Response<'a> {
    /// `true` when this reply could have been sent for `request`.
    ///
    /// A charge must echo the requested amount and a status the requested
    /// id. Relayed errors answer any request.
    #[must_use]
    pub fn answers(&self, request: &Request<'_>) -> bool {
        match (self, request) {
            (Response::Err(_), _) | (Response::Ok, Request::Cancel(_)) => true,
            (Response::Charge { amount, .. }, Request::Create { amount: wanted, .. }) => {
                amount == wanted
            }
            (Response::Status { payment_id, .. }, Request::Status(id)) => payment_id == id,
            _ => false,
        }
    }

    /// Interprets the reply to a `CREATE` request.
    ///
    /// # Errors
    ///
    /// Relayed errors pass through; any other reply is [`GatewayError::Malformed`].
    pub fn into_receipt(self) -> Result<ChargeReceipt, GatewayError> {
        match self {
            Response::Charge {
                payment_id,
                amount,
                qr_payload,
            } => ChargeReceipt::new(payment_id, qr_payload, amount),
            Response::Err(error) => Err(error),
            Response::Status { .. } | Response::Ok => Err(GatewayError::Malformed),
        }
    }

    /// Interprets the reply to `STATUS expected_id`.
    ///
    /// # Errors
    ///
    /// Relayed errors pass through; replies for another id or of another
    /// kind are [`GatewayError::Malformed`].
    pub fn into_status_report(self, expected_id: &str) -> Result<StatusReport, GatewayError> {
        match self {
            Response::Status { payment_id, status } if payment_id == expected_id => {
                StatusReport::new(status)
            }
            Response::Err(error) => Err(error),
            Response::Status { .. } | Response::Charge { .. } | Response::Ok => {
                Err(GatewayError::Malformed)
            }
        }
    }

    /// Interprets the reply to a `CANCEL` request.
    ///
    /// # Errors
    ///
    /// Relayed errors pass through; anything but `OK` is [`GatewayError::Malformed`].
    pub fn into_ack(self) -> Result<(), GatewayError> {
        match self {
            Response::Ok => Ok(()),
            Response::Err(error) => Err(error),
            Response::Charge { .. } | Response::Status { .. } => Err(GatewayError::Malformed),
        }
    }
}

/// Parses one response line.
///
/// # Errors
///
/// Returns [`WireError`] when the line is oversized or does not match the grammar.
pub fn parse_response(line: &str) -> Result<Response<'_>, WireError> {
    let line = trim_line(line)?;
    alt((charge, status_reply, ok_reply, err_reply))
        .parse(line)
        .map_err(|_| WireError::Syntax)
}

/// Parses one request line.
///
/// # Errors
///
/// Returns [`WireError`] when the line is oversized or does not match the grammar.
pub fn parse_request(line: &str) -> Result<Request<'_>, WireError> {
    let line = trim_line(line)?;
    alt((create, status_request, cancel_request))
        .parse(line)
        .map_err(|_| WireError::Syntax)
}

fn trim_line(line: &str) -> Result<&str, WireError> {
    let line = line.trim_end_matches(['\r', '\n']).trim();
    if line.len() > MAX_LINE_LEN {
        Err(WireError::TooLong)
    } else {
        Ok(line)
    }
}

fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, &'a str, ErrMode<ContextError>> {
    literal(Caseless(word))
}

fn field<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_till(1.., |c: char| c.is_ascii_whitespace()).parse_next(input)
}

fn create<'a>(input: &mut &'a str) -> ModalResult<Request<'a>> {
    let (minor, description): (u32, &str) = preceded(
        (keyword("CREATE"), space1),
        (terminated(dec_uint, space1), rest),
    )
    .parse_next(input)?;

    Ok(Request::Create {
        amount: Amount::from_minor(minor),
        description,
    })
}

fn status_request<'a>(input: &mut &'a str) -> ModalResult<Request<'a>> {
    preceded((keyword("STATUS"), space1), field)
        .map(Request::Status)
        .parse_next(input)
}

fn cancel_request<'a>(input: &mut &'a str) -> ModalResult<Request<'a>> {
    preceded((keyword("CANCEL"), space1), field)
        .map(Request::Cancel)
        .parse_next(input)
}

fn charge<'a>(input: &mut &'a str) -> ModalResult<Response<'a>> {
    let (payment_id, minor, qr_payload): (&str, u32, &str) = preceded(
        (keyword("CHARGE"), space1),
        (
            terminated(field, space1),
            terminated(dec_uint, space1),
            rest,
        ),
    )
    .parse_next(input)?;

    Ok(Response::Charge {
        payment_id,
        amount: Amount::from_minor(minor),
        qr_payload,
    })
}

fn status_reply<'a>(input: &mut &'a str) -> ModalResult<Response<'a>> {
    let (payment_id, status) =
        preceded((keyword("STATUS"), space1), (terminated(field, space1), field))
            .parse_next(input)?;

    Ok(Response::Status { payment_id, status })
}

fn ok_reply<'a>(input: &mut &'a str) -> ModalResult<Response<'a>> {
    keyword("OK").value(Response::Ok).parse_next(input)
}

fn err_reply<'a>(input: &mut &'a str) -> ModalResult<Response<'a>> {
    let error = preceded(
        (keyword("ERR"), space1),
        alt((
            preceded((keyword("http"), space1), dec_uint).map(GatewayError::HttpStatus),
            keyword("unreachable").value(GatewayError::Unreachable),
            keyword("timeout").value(GatewayError::Timeout),
            keyword("malformed").value(GatewayError::Malformed),
        )),
    )
    .parse_next(input)?;
    let _detail = opt(preceded(space1, rest)).parse_next(input)?;

    Ok(Response::Err(error))
}
