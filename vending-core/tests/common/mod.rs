#![allow(dead_code)]

use core::ops::Add;
use core::time::Duration;
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::{String, ToString};
use std::vec::Vec;

use embassy_futures::block_on;
use vending_core::clock::TerminalInstant;
use vending_core::controller::{
    ActuatorError, CycleReport, DispenseActuator, PresentationSink, TerminalConfig,
    TerminalController, UserInputSource,
};
use vending_core::gateway::{ChargeReceipt, GatewayError, PaymentGateway, StatusReport};
use vending_core::session::{Amount, BeepPattern, Tone};

pub const CYCLE: Duration = Duration::from_millis(50);

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MicrosInstant(pub u64);

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

#[derive(Clone, Default)]
pub struct Clock(Rc<Cell<u64>>);

impl Clock {
    pub fn now(&self) -> MicrosInstant {
        MicrosInstant(self.0.get())
    }

    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.0.set(self.0.get().saturating_add(micros));
    }
}

pub struct MockInput {
    pub clock: Clock,
    pub pressed: bool,
}

impl UserInputSource for MockInput {
    type Instant = MicrosInstant;

    fn sample(&mut self) -> bool {
        self.pressed
    }

    fn now(&self) -> MicrosInstant {
        self.clock.now()
    }
}

pub struct ScriptedGateway {
    pub clock: Clock,
    pub latency: Duration,
    pub status_latency: Duration,
    pub creates: VecDeque<Result<ChargeReceipt, GatewayError>>,
    pub statuses: VecDeque<Result<StatusReport, GatewayError>>,
    pub cancel_result: Result<(), GatewayError>,
    pub calls: Vec<String>,
}

impl ScriptedGateway {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            latency: Duration::from_millis(100),
            status_latency: Duration::from_millis(100),
            creates: VecDeque::new(),
            statuses: VecDeque::new(),
            cancel_result: Ok(()),
            calls: Vec::new(),
        }
    }

    pub fn queue_charge(&mut self, id: &str, minor: u32) {
        self.creates
            .push_back(ChargeReceipt::new(id, "00020126PIXQR", Amount::from_minor(minor)));
    }

    pub fn queue_status(&mut self, status: &str) {
        self.statuses.push_back(StatusReport::new(status));
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

impl PaymentGateway for ScriptedGateway {
    async fn create_charge(
        &mut self,
        amount: Amount,
        description: &str,
    ) -> Result<ChargeReceipt, GatewayError> {
        self.calls
            .push(format!("create {} {description}", amount.minor()));
        self.clock.advance(self.latency);
        self.creates
            .pop_front()
            .unwrap_or(Err(GatewayError::Unreachable))
    }

    async fn query_status(&mut self, payment_id: &str) -> Result<StatusReport, GatewayError> {
        self.calls.push(format!("status {payment_id}"));
        self.clock.advance(self.status_latency);
        self.statuses
            .pop_front()
            .unwrap_or_else(|| StatusReport::new("pending"))
    }

    async fn cancel(&mut self, payment_id: &str) -> Result<(), GatewayError> {
        self.calls.push(format!("cancel {payment_id}"));
        self.clock.advance(self.latency);
        self.cancel_result
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub screens: Vec<(String, Tone)>,
    pub qr: Vec<(String, Amount, u32)>,
    pub beeps: Vec<BeepPattern>,
}

impl RecordingSink {
    pub fn last_title(&self) -> Option<&str> {
        self.screens.last().map(|(title, _)| title.as_str())
    }

    pub fn saw(&self, title: &str) -> bool {
        self.screens.iter().any(|(seen, _)| seen == title)
    }
}

impl PresentationSink for RecordingSink {
    fn show(&mut self, title: &str, _message: &str, tone: Tone) {
        self.screens.push((title.to_string(), tone));
    }

    fn show_qr(&mut self, payload: &str, amount: Amount, seconds_remaining: u32) {
        self.qr.push((payload.to_string(), amount, seconds_remaining));
    }

    fn beep(&mut self, pattern: BeepPattern) {
        self.beeps.push(pattern);
    }
}

pub struct MockActuator {
    pub clock: Clock,
    pub runs: u32,
    pub result: Result<(), ActuatorError>,
}

impl DispenseActuator for MockActuator {
    async fn dispense(&mut self) -> Result<(), ActuatorError> {
        self.runs += 1;
        self.clock.advance(Duration::from_millis(1_500));
        self.result
    }
}

pub type Controller = TerminalController<MockInput, ScriptedGateway, RecordingSink, MockActuator>;

pub struct Harness {
    pub clock: Clock,
    pub controller: Controller,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TerminalConfig::new())
    }

    pub fn with_config(config: TerminalConfig) -> Self {
        let clock = Clock::default();
        let input = MockInput {
            clock: clock.clone(),
            pressed: false,
        };
        let gateway = ScriptedGateway::new(clock.clone());
        let actuator = MockActuator {
            clock: clock.clone(),
            runs: 0,
            result: Ok(()),
        };
        let mut controller =
            TerminalController::new(input, gateway, RecordingSink::default(), actuator, config);
        block_on(controller.start());
        Self { clock, controller }
    }

    pub fn gateway(&mut self) -> &mut ScriptedGateway {
        self.controller.gateway_mut()
    }

    pub fn cycle(&mut self) -> CycleReport {
        self.clock.advance(CYCLE);
        block_on(self.controller.run_cycle())
    }

    pub fn run_for(&mut self, duration: Duration) {
        let cycles = duration.as_millis() / CYCLE.as_millis();
        for _ in 0..cycles {
            self.cycle();
        }
    }

    pub fn set_pressed(&mut self, pressed: bool) {
        self.controller.input_mut().pressed = pressed;
    }

    pub fn tap(&mut self) {
        self.set_pressed(true);
        self.run_for(Duration::from_millis(200));
        self.set_pressed(false);
        self.cycle();
    }

    pub fn hold(&mut self, duration: Duration) {
        self.set_pressed(true);
        self.run_for(duration);
        self.set_pressed(false);
        self.cycle();
    }
}
