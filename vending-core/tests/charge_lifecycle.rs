mod common;

use core::time::Duration;

use common::Harness;
use embassy_futures::block_on;
use vending_core::console::{self, ConsoleTarget};
use vending_core::controller::{ActuatorError, TerminalConfig};
use vending_core::gateway::GatewayError;
use vending_core::session::{BeepPattern, CancelReason, SessionConfig, SessionState, Tone, UserEvent};
use vending_core::telemetry::{TelemetryEventKind, TelemetryPayload};

fn recorded(harness: &Harness, kind: TelemetryEventKind) -> bool {
    harness
        .controller
        .telemetry()
        .oldest_first()
        .any(|record| record.event == kind)
}

fn awaiting(harness: &mut Harness) {
    harness.gateway().queue_charge("p1", 50);
    harness.tap();
    assert_eq!(
        harness.controller.session().state(),
        SessionState::AwaitingPayment
    );
}

#[test]
fn boot_shows_welcome_screen() {
    let harness = Harness::new();
    let sink = harness.controller.presentation();

    assert_eq!(sink.screens.len(), 1);
    assert_eq!(sink.screens[0], (String::from("PIX vending"), Tone::Info));
    assert_eq!(harness.controller.session().state(), SessionState::Idle);
}

#[test]
fn paid_charge_dispenses_once_and_returns_to_idle() {
    let mut harness = Harness::new();
    awaiting(&mut harness);
    harness.gateway().queue_status("pending");
    harness.gateway().queue_status("approved");

    harness.run_for(Duration::from_secs(11));

    assert_eq!(harness.controller.session().state(), SessionState::Idle);
    assert_eq!(harness.controller.session().payment_id(), None);
    assert_eq!(harness.controller.actuator_mut().runs, 1);
    assert_eq!(harness.gateway().count("create"), 1);
    assert_eq!(harness.gateway().count("status p1"), 2);
    assert_eq!(harness.gateway().count("cancel"), 0);

    let sink = harness.controller.presentation();
    assert!(sink.saw("Payment received"));
    assert_eq!(sink.last_title(), Some("Thank you"));
    assert_eq!(
        sink.beeps,
        [BeepPattern::ChargeReady, BeepPattern::Paid]
    );
    assert_eq!(sink.qr[0].2, 60);
    assert!(recorded(&harness, TelemetryEventKind::DispenseComplete));
}

#[test]
fn unpaid_charge_times_out_and_is_cancelled_remotely() {
    let mut harness = Harness::new();
    awaiting(&mut harness);

    harness.run_for(Duration::from_secs(61));

    assert_eq!(harness.controller.session().state(), SessionState::Idle);
    assert_eq!(harness.gateway().count("cancel p1"), 1);
    assert_eq!(harness.controller.actuator_mut().runs, 0);
    assert_eq!(harness.gateway().count("status p1"), 11);
    assert_eq!(
        harness.controller.presentation().last_title(),
        Some("Timed out")
    );
    assert!(recorded(
        &harness,
        TelemetryEventKind::SessionCancelled(CancelReason::Timeout)
    ));

    // Countdown reached the last second before the deadline.
    let last_qr = harness.controller.presentation().qr.last().map(|qr| qr.2);
    assert_eq!(last_qr, Some(1));
}

#[test]
fn long_hold_cancels_without_waiting_for_a_poll() {
    let mut harness = Harness::new();
    awaiting(&mut harness);

    harness.hold(Duration::from_millis(3_500));

    assert_eq!(harness.controller.session().state(), SessionState::Idle);
    assert_eq!(harness.gateway().count("cancel p1"), 1);
    assert_eq!(harness.gateway().count("status"), 0);
    assert_eq!(
        harness.controller.presentation().last_title(),
        Some("Cancelled")
    );
    assert!(recorded(
        &harness,
        TelemetryEventKind::SessionCancelled(CancelReason::UserHold)
    ));
}

#[test]
fn short_hold_does_not_cancel() {
    let mut harness = Harness::new();
    awaiting(&mut harness);

    harness.hold(Duration::from_millis(1_500));

    assert_eq!(
        harness.controller.session().state(),
        SessionState::AwaitingPayment
    );
    assert_eq!(harness.gateway().count("cancel"), 0);
}

#[test]
fn create_failure_shows_error_then_recovers() {
    let mut harness = Harness::new();

    harness.tap();
    assert_eq!(harness.controller.session().state(), SessionState::Error);
    assert_eq!(
        harness.controller.presentation().last_title(),
        Some("Charge failed")
    );
    assert!(recorded(&harness, TelemetryEventKind::ChargeFailed));

    harness.run_for(Duration::from_secs(5));
    assert_eq!(harness.controller.session().state(), SessionState::Idle);
    assert_eq!(
        harness.controller.presentation().last_title(),
        Some("PIX vending")
    );

    awaiting(&mut harness);
    assert_eq!(harness.gateway().count("create"), 2);
}

#[test]
fn tap_during_error_display_retries_immediately() {
    let mut harness = Harness::new();
    harness.tap();
    assert_eq!(harness.controller.session().state(), SessionState::Error);

    awaiting(&mut harness);
    assert_eq!(harness.controller.session().payment_id(), Some("p1"));
}

#[test]
fn soft_poll_failures_keep_waiting_until_paid() {
    let mut harness = Harness::new();
    awaiting(&mut harness);
    harness
        .gateway()
        .statuses
        .push_back(Err(GatewayError::Timeout));
    harness.gateway().queue_status("in-limbo");
    harness.gateway().queue_status("rejected");
    harness.gateway().queue_status("PAID");

    harness.run_for(Duration::from_secs(16));
    assert_eq!(
        harness.controller.session().state(),
        SessionState::AwaitingPayment
    );
    let snapshot = harness
        .controller
        .session()
        .snapshot(harness.clock.now());
    assert_eq!(snapshot.soft_failures, 2);
    assert_eq!(snapshot.last_error, Some(GatewayError::Timeout));

    harness.run_for(Duration::from_secs(5));
    assert_eq!(harness.controller.session().state(), SessionState::Idle);
    assert_eq!(harness.controller.actuator_mut().runs, 1);
    assert!(recorded(&harness, TelemetryEventKind::PollFailed));
    assert!(recorded(&harness, TelemetryEventKind::StatusUnrecognized));
}

#[test]
fn approval_arriving_after_deadline_still_dispenses() {
    let config = TerminalConfig::new()
        .with_session(SessionConfig::new().with_timeout(Duration::from_millis(10_200)));
    let mut harness = Harness::with_config(config);
    awaiting(&mut harness);
    harness.gateway().status_latency = Duration::from_millis(500);
    harness.gateway().queue_status("pending");
    harness.gateway().queue_status("approved");

    harness.run_for(Duration::from_secs(12));

    assert_eq!(harness.controller.actuator_mut().runs, 1);
    assert_eq!(harness.gateway().count("cancel"), 0);
    assert!(recorded(&harness, TelemetryEventKind::PaymentConfirmed));
    assert!(!recorded(
        &harness,
        TelemetryEventKind::SessionCancelled(CancelReason::Timeout)
    ));
}

#[test]
fn failed_remote_cancel_still_frees_the_terminal() {
    let mut harness = Harness::new();
    awaiting(&mut harness);
    harness.gateway().cancel_result = Err(GatewayError::Unreachable);

    harness.hold(Duration::from_millis(3_200));

    assert_eq!(harness.controller.session().state(), SessionState::Idle);
    assert!(recorded(&harness, TelemetryEventKind::CancelFailed));

    awaiting(&mut harness);
}

#[test]
fn actuator_jam_is_reported_and_not_retried() {
    let mut harness = Harness::new();
    harness.controller.actuator_mut().result = Err(ActuatorError::Jammed);
    awaiting(&mut harness);
    harness.gateway().queue_status("approved");

    harness.run_for(Duration::from_secs(20));

    assert_eq!(harness.controller.session().state(), SessionState::Idle);
    assert_eq!(harness.controller.actuator_mut().runs, 1);
    assert_eq!(
        harness.controller.last_actuator_error(),
        Some(ActuatorError::Jammed)
    );
    assert!(harness.controller.presentation().saw("Dispense fault"));
    assert!(recorded(&harness, TelemetryEventKind::DispenseFault));
}

#[test]
fn tap_while_awaiting_never_creates_second_charge() {
    let mut harness = Harness::new();
    awaiting(&mut harness);

    harness.tap();
    harness.tap();

    assert_eq!(harness.gateway().count("create"), 1);
    assert_eq!(harness.controller.session().payment_id(), Some("p1"));
}

#[test]
fn amount_mismatch_cancels_the_unexpected_charge() {
    let mut harness = Harness::new();
    harness.gateway().queue_charge("p7", 999);

    harness.tap();

    assert_eq!(harness.controller.session().state(), SessionState::Error);
    assert_eq!(harness.gateway().count("cancel p7"), 1);
    assert_eq!(
        harness
            .controller
            .session()
            .snapshot(harness.clock.now())
            .last_error,
        Some(GatewayError::AmountMismatch)
    );
}

#[test]
fn console_buy_and_cancel_drive_the_same_session() {
    let mut harness = Harness::new();
    harness.gateway().queue_charge("p2", 125);

    assert!(console::execute(&mut harness.controller, "price 1.25").is_ok());
    assert!(console::execute(&mut harness.controller, "buy").is_ok());
    block_on(harness.controller.flush());

    assert_eq!(
        harness.controller.session().state(),
        SessionState::AwaitingPayment
    );
    assert_eq!(harness.gateway().calls[0], "create 125 Test product");

    assert!(console::execute(&mut harness.controller, "price 2").is_err());
    assert!(console::execute(&mut harness.controller, "cancel").is_ok());
    block_on(harness.controller.flush());

    assert_eq!(harness.controller.session().state(), SessionState::Idle);
    assert_eq!(harness.gateway().count("cancel p2"), 1);
    assert!(recorded(
        &harness,
        TelemetryEventKind::SessionCancelled(CancelReason::Operator)
    ));
}

#[test]
fn screen_backlog_is_reported_without_losing_the_charge() {
    let mut harness = Harness::new();
    for _ in 0..9 {
        harness.controller.session_mut().announce();
    }
    harness.gateway().queue_charge("p1", 50);
    let now = harness.clock.now();
    harness
        .controller
        .session_mut()
        .handle_event(UserEvent::Tap, now);

    harness.cycle();

    assert_eq!(
        harness.controller.session().state(),
        SessionState::AwaitingPayment
    );
    assert_eq!(harness.gateway().count("create"), 1);
    let overflow = harness
        .controller
        .telemetry()
        .oldest_first()
        .find(|record| record.event == TelemetryEventKind::EffectOverflow)
        .map(|record| record.details);
    assert_eq!(overflow, Some(TelemetryPayload::Overflow(3)));
}
