//! Host stand-ins for the terminal hardware and the payment relay.

use std::cell::Cell;
use std::ops::Add;
use std::rc::Rc;
use std::time::Duration;

use vending_core::clock::TerminalInstant;
use vending_core::controller::{
    ActuatorError, DispenseActuator, PresentationSink, UserInputSource,
};
use vending_core::gateway::wire::{self, Request, Response};
use vending_core::gateway::{ChargeReceipt, GatewayError, PaymentGateway, StatusReport};
use vending_core::session::{Amount, BeepPattern, Tone};

/// Round trip charged to every relay exchange.
pub const RELAY_LATENCY: Duration = Duration::from_millis(120);

/// Time the simulated solenoid takes to release a product.
pub const DISPENSE_TIME: Duration = Duration::from_millis(800);

/// Virtual instant in microseconds since emulator start.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(u64);

impl SimInstant {
    #[must_use]
    pub fn elapsed(self) -> Duration {
        Duration::from_micros(self.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }
}

impl TerminalInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Shared virtual clock. Collaborators advance it to model latency.
#[derive(Clone, Default)]
pub struct SimClock(Rc<Cell<SimInstant>>);

impl SimClock {
    pub fn now(&self) -> SimInstant {
        self.0.get()
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

/// Button wired to REPL verbs.
pub struct SimButton {
    clock: SimClock,
    pressed: bool,
}

impl SimButton {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            pressed: false,
        }
    }

    pub fn set(&mut self, pressed: bool) {
        self.pressed = pressed;
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }
}

impl UserInputSource for SimButton {
    type Instant = SimInstant;

    fn sample(&mut self) -> bool {
        self.pressed
    }

    fn now(&self) -> SimInstant {
        self.clock.now()
    }
}

/// How the simulated backend answers the next requests.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackendMode {
    Pending,
    Approve,
    Decline,
    Garble,
    Fail(GatewayError),
}

impl BackendMode {
    pub fn label(self) -> String {
        match self {
            BackendMode::Pending => "pending".to_string(),
            BackendMode::Approve => "approve".to_string(),
            BackendMode::Decline => "decline".to_string(),
            BackendMode::Garble => "garble".to_string(),
            BackendMode::Fail(error) => format!("fail {error}"),
        }
    }
}

/// In-process relay answering wire requests the way the host bridge would.
pub struct SimRelay {
    mode: BackendMode,
    next_charge: u32,
}

impl SimRelay {
    pub fn new() -> Self {
        Self {
            mode: BackendMode::Pending,
            next_charge: 1,
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: BackendMode) {
        self.mode = mode;
    }

    /// Produces the reply line for one request line.
    pub fn answer(&mut self, line: &str) -> String {
        let request = match wire::parse_request(line) {
            Ok(request) => request,
            Err(_) => return Response::Err(GatewayError::Malformed).to_string(),
        };

        match (self.mode, request) {
            (BackendMode::Garble, _) => "CHARGE ???".to_string(),
            (BackendMode::Fail(error), _) => Response::Err(error).to_string(),
            (_, Request::Create { amount, .. }) => {
                let id = format!("sim-{:04}", self.next_charge);
                self.next_charge = self.next_charge.wrapping_add(1);
                let qr = pix_payload(&id, amount);
                Response::Charge {
                    payment_id: &id,
                    amount,
                    qr_payload: &qr,
                }
                .to_string()
            }
            (mode, Request::Status(id)) => {
                let status = match mode {
                    BackendMode::Approve => "approved",
                    BackendMode::Decline => "rejected",
                    _ => "pending",
                };
                Response::Status {
                    payment_id: id,
                    status,
                }
                .to_string()
            }
            (_, Request::Cancel(_)) => Response::Ok.to_string(),
        }
    }
}

fn pix_payload(id: &str, amount: Amount) -> String {
    format!(
        "00020126360014BR.GOV.BCB.PIX0114{id}5303986540{}5802BR6304SIMU",
        amount.minor()
    )
}

impl Default for SimRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Gateway that speaks the wire protocol to [`SimRelay`].
pub struct RelayGateway {
    clock: SimClock,
    relay: SimRelay,
    exchanges: Vec<(String, String)>,
}

impl RelayGateway {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            relay: SimRelay::new(),
            exchanges: Vec::new(),
        }
    }

    pub fn relay_mut(&mut self) -> &mut SimRelay {
        &mut self.relay
    }

    pub fn relay(&self) -> &SimRelay {
        &self.relay
    }

    /// Request/reply pairs since the last call.
    pub fn take_exchanges(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.exchanges)
    }

    fn exchange(&mut self, request: Request<'_>) -> String {
        let line = request.to_string();
        self.clock.advance(RELAY_LATENCY);
        let reply = self.relay.answer(&line);
        self.exchanges.push((line, reply.clone()));
        reply
    }
}

impl PaymentGateway for RelayGateway {
    async fn create_charge(
        &mut self,
        amount: Amount,
        description: &str,
    ) -> Result<ChargeReceipt, GatewayError> {
        let reply = self.exchange(Request::Create {
            amount,
            description,
        });
        wire::parse_response(&reply)?.into_receipt()
    }

    async fn query_status(&mut self, payment_id: &str) -> Result<StatusReport, GatewayError> {
        let reply = self.exchange(Request::Status(payment_id));
        wire::parse_response(&reply)?.into_status_report(payment_id)
    }

    async fn cancel(&mut self, payment_id: &str) -> Result<(), GatewayError> {
        let reply = self.exchange(Request::Cancel(payment_id));
        wire::parse_response(&reply)?.into_ack()
    }
}

/// Solenoid stand-in that can be told to jam.
pub struct SimActuator {
    clock: SimClock,
    jam: bool,
    runs: u32,
}

impl SimActuator {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            jam: false,
            runs: 0,
        }
    }

    pub fn set_jam(&mut self, jam: bool) {
        self.jam = jam;
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }
}

impl DispenseActuator for SimActuator {
    async fn dispense(&mut self) -> Result<(), ActuatorError> {
        self.runs = self.runs.saturating_add(1);
        self.clock.advance(DISPENSE_TIME);
        if self.jam {
            Err(ActuatorError::Jammed)
        } else {
            Ok(())
        }
    }
}

/// One line of customer-facing output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScreenLine {
    pub tone: Tone,
    pub text: String,
}

/// Collects presentation output until the REPL prints it.
#[derive(Default)]
pub struct ScreenSink {
    pending: Vec<ScreenLine>,
}

impl ScreenSink {
    pub fn take(&mut self) -> Vec<ScreenLine> {
        std::mem::take(&mut self.pending)
    }

    fn push(&mut self, tone: Tone, text: String) {
        self.pending.push(ScreenLine { tone, text });
    }
}

impl PresentationSink for ScreenSink {
    fn show(&mut self, title: &str, message: &str, tone: Tone) {
        self.push(tone, format!("[screen] {title}: {message}"));
    }

    fn show_qr(&mut self, payload: &str, amount: Amount, seconds_remaining: u32) {
        self.push(
            Tone::Info,
            format!("[qr] R$ {amount} {seconds_remaining}s {payload}"),
        );
    }

    fn beep(&mut self, pattern: BeepPattern) {
        let label = match pattern {
            BeepPattern::ChargeReady => "charge-ready",
            BeepPattern::Paid => "paid",
            BeepPattern::Cancel => "cancel",
            BeepPattern::Error => "error",
        };
        self.push(Tone::Info, format!("[beep] {label}"));
    }
}
