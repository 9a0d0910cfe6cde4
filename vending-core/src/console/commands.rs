//! Console command dispatcher.
//!
//! Glues parsed commands to the live session. Purchase and cancel requests go
//! through the same session handlers as the button, so the operator can never
//! do anything a customer could not.

use core::fmt;

use crate::clock::TerminalInstant;
use crate::session::{
    CancelReason, ChargeSession, PriceError, SessionSnapshot, SessionState, SessionTransition,
    UserEvent,
};
use crate::telemetry::{TelemetryRecord, TelemetryRecorder};

use super::grammar::{self, Command, HelpCommand};

/// Number of history entries shown when no count is given.
pub const DEFAULT_HISTORY_COUNT: u8 = 8;

/// Everything the console needs from the terminal.
pub trait ConsoleTarget {
    type Instant: TerminalInstant;

    fn now(&self) -> Self::Instant;

    fn session(&self) -> &ChargeSession<Self::Instant>;

    fn session_mut(&mut self) -> &mut ChargeSession<Self::Instant>;

    fn telemetry(&self) -> &TelemetryRecorder<Self::Instant>;

    /// Records a transition applied on the operator's behalf.
    fn note_transition(&mut self, transition: SessionTransition);
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleError<'a> {
    Parse(grammar::ParseError<'a>),
    PriceLocked,
    InvalidAmount,
}

impl<'a> From<grammar::ParseError<'a>> for ConsoleError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl From<PriceError> for ConsoleError<'_> {
    fn from(error: PriceError) -> Self {
        match error {
            PriceError::Locked => Self::PriceLocked,
            PriceError::Zero => Self::InvalidAmount,
        }
    }
}

impl fmt::Display for ConsoleError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Parse(error) => write!(f, "error: {error}"),
            ConsoleError::PriceLocked => f.write_str("error: price locked while a sale is in progress"),
            ConsoleError::InvalidAmount => f.write_str("error: price must be greater than zero"),
        }
    }
}

/// Successful command output, rendered with [`fmt::Display`].
pub enum ConsoleReply<'a, I>
where
    I: TerminalInstant,
{
    Status(SessionSnapshot),
    PriceSet(crate::session::Amount),
    /// Purchase request; `None` when the session was busy.
    Purchase(Option<SessionTransition>, SessionState),
    /// Cancel request; `None` when nothing was cancellable.
    Cancel(Option<SessionTransition>, SessionState),
    History(HistoryView<'a, I>),
    Help(&'static str),
}

/// Borrowed tail of the telemetry ring.
pub struct HistoryView<'a, I>
where
    I: TerminalInstant,
{
    recorder: &'a TelemetryRecorder<I>,
    count: usize,
}

impl<I> HistoryView<'_, I>
where
    I: TerminalInstant,
{
    pub fn records(&self) -> impl Iterator<Item = &TelemetryRecord<I>> {
        self.recorder.recent(self.count)
    }
}

impl<I> fmt::Display for ConsoleReply<'_, I>
where
    I: TerminalInstant,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleReply::Status(snapshot) => write_status(f, snapshot),
            ConsoleReply::PriceSet(amount) => write!(f, "ok: price {amount}"),
            ConsoleReply::Purchase(Some(_), _) => f.write_str("ok: charge requested"),
            ConsoleReply::Purchase(None, state) => write!(f, "busy: session is {state}"),
            ConsoleReply::Cancel(Some(_), _) => f.write_str("ok: charge cancelled"),
            ConsoleReply::Cancel(None, state) => write!(f, "ignored: session is {state}"),
            ConsoleReply::History(view) => {
                let mut empty = true;
                for record in view.records() {
                    if !empty {
                        f.write_str("\n")?;
                    }
                    empty = false;
                    write!(f, "#{} {}", record.id, record.event)?;
                    let mut details = heapless::String::<64>::new();
                    if fmt::write(&mut details, format_args!("{}", record.details)).is_ok()
                        && !details.is_empty()
                    {
                        write!(f, " {details}")?;
                    }
                }
                if empty {
                    f.write_str("history empty")?;
                }
                Ok(())
            }
            ConsoleReply::Help(text) => f.write_str(text),
        }
    }
}

fn write_status(f: &mut fmt::Formatter<'_>, snapshot: &SessionSnapshot) -> fmt::Result {
    write!(f, "state={} price={}", snapshot.state, snapshot.amount)?;
    if let Some(id) = &snapshot.payment_id {
        write!(f, " payment={id}")?;
    }
    if let Some(seconds) = snapshot.seconds_remaining {
        write!(f, " remaining={seconds}s")?;
    }
    write!(
        f,
        " polls={} soft-failures={}",
        snapshot.polls_issued, snapshot.soft_failures
    )?;
    if let Some(error) = snapshot.last_error {
        write!(f, " last-error={error}")?;
    }
    if snapshot.dropped_effects > 0 {
        write!(f, " dropped-effects={}", snapshot.dropped_effects)?;
    }
    Ok(())
}

const HELP_OVERVIEW: &str = "commands: status, price <amount>, buy, cancel, history [count], help [topic]";

const HELP_TOPICS: &[(&str, &str)] = &[
    ("status", "status: show session state, price, countdown and poll counters"),
    (
        "price",
        "price <amount>: set the sale price as minor units (150) or decimal (1.50); idle only",
    ),
    ("buy", "buy: start a charge exactly as a button tap would"),
    ("cancel", "cancel: cancel the charge awaiting payment"),
    ("history", "history [count]: show the most recent telemetry events (1-64)"),
    ("help", "help [topic]: list commands or describe one"),
];

fn help_text(command: &HelpCommand<'_>) -> &'static str {
    command
        .topic
        .and_then(|topic| {
            HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(topic))
                .map(|(_, text)| *text)
        })
        .unwrap_or(HELP_OVERVIEW)
}

/// Parses and executes one console line.
///
/// # Errors
///
/// Returns [`ConsoleError`] for parse failures and rejected price changes.
pub fn execute<'t, 'l, T>(
    target: &'t mut T,
    line: &'l str,
) -> Result<ConsoleReply<'t, T::Instant>, ConsoleError<'l>>
where
    T: ConsoleTarget,
{
    let command = grammar::parse(line)?;
    dispatch(target, command)
}

fn dispatch<'t, 'l, T>(
    target: &'t mut T,
    command: Command<'l>,
) -> Result<ConsoleReply<'t, T::Instant>, ConsoleError<'l>>
where
    T: ConsoleTarget,
{
    let now = target.now();
    match command {
        Command::Status => Ok(ConsoleReply::Status(target.session().snapshot(now))),
        Command::Price(amount) => {
            target.session_mut().set_amount(amount)?;
            Ok(ConsoleReply::PriceSet(amount))
        }
        Command::Buy => {
            let transition = target.session_mut().handle_event(UserEvent::Tap, now);
            if let Some(transition) = transition {
                target.note_transition(transition);
            }
            Ok(ConsoleReply::Purchase(transition, target.session().state()))
        }
        Command::Cancel => {
            let transition = target
                .session_mut()
                .request_cancel(CancelReason::Operator, now);
            if let Some(transition) = transition {
                target.note_transition(transition);
            }
            Ok(ConsoleReply::Cancel(transition, target.session().state()))
        }
        Command::History(count) => {
            let target: &'t T = target;
            Ok(ConsoleReply::History(HistoryView {
                recorder: target.telemetry(),
                count: usize::from(count.unwrap_or(DEFAULT_HISTORY_COUNT)),
            }))
        }
        Command::Help(help) => Ok(ConsoleReply::Help(help_text(&help))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ops::Add;
    use core::time::Duration;

    use heapless::String;

    use crate::gateway::ChargeReceipt;
    use crate::session::{Amount, SessionConfig};
    use crate::telemetry::TelemetryEventKind;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

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

    struct Bench {
        now: MicrosInstant,
        session: ChargeSession<MicrosInstant>,
        telemetry: TelemetryRecorder<MicrosInstant>,
    }

    impl Bench {
        fn new() -> Self {
            Self {
                now: MicrosInstant(0),
                session: ChargeSession::new(SessionConfig::new()),
                telemetry: TelemetryRecorder::new(),
            }
        }
    }

    impl ConsoleTarget for Bench {
        type Instant = MicrosInstant;

        fn now(&self) -> MicrosInstant {
            self.now
        }

        fn session(&self) -> &ChargeSession<MicrosInstant> {
            &self.session
        }

        fn session_mut(&mut self) -> &mut ChargeSession<MicrosInstant> {
            &mut self.session
        }

        fn telemetry(&self) -> &TelemetryRecorder<MicrosInstant> {
            &self.telemetry
        }

        fn note_transition(&mut self, transition: SessionTransition) {
            self.telemetry.record_transition(transition, None, 0, self.now);
        }
    }

    fn render<I: TerminalInstant>(reply: &ConsoleReply<'_, I>) -> String<512> {
        let mut out = String::new();
        fmt::write(&mut out, format_args!("{reply}")).unwrap();
        out
    }

    #[test]
    fn price_then_buy_requests_charge_at_new_price() {
        let mut bench = Bench::new();

        let reply = execute(&mut bench, "price 1.50").unwrap();
        assert_eq!(render(&reply).as_str(), "ok: price 1.50");

        let reply = execute(&mut bench, "buy").unwrap();
        assert_eq!(render(&reply).as_str(), "ok: charge requested");
        assert_eq!(bench.session.state(), SessionState::Creating);
        assert_eq!(bench.session.amount(), Amount::from_minor(150));
        assert_eq!(
            bench.telemetry.oldest_first().last().map(|record| record.event),
            Some(TelemetryEventKind::StateEntered(SessionState::Creating))
        );
    }

    #[test]
    fn price_is_locked_during_sale() {
        let mut bench = Bench::new();
        execute(&mut bench, "buy").unwrap();

        assert!(matches!(
            execute(&mut bench, "price 200"),
            Err(ConsoleError::PriceLocked)
        ));
        assert!(matches!(
            execute(&mut bench, "buy"),
            Ok(ConsoleReply::Purchase(None, SessionState::Creating))
        ));
    }

    #[test]
    fn zero_price_is_rejected() {
        let mut bench = Bench::new();
        assert!(matches!(
            execute(&mut bench, "price 0"),
            Err(ConsoleError::InvalidAmount)
        ));
    }

    #[test]
    fn cancel_only_applies_while_awaiting_payment() {
        let mut bench = Bench::new();
        let reply = execute(&mut bench, "cancel").unwrap();
        assert_eq!(render(&reply).as_str(), "ignored: session is idle");

        bench.session.handle_event(UserEvent::Tap, bench.now);
        bench.session.handle_create_result(
            ChargeReceipt::new("p1", "Q", Amount::from_minor(50)),
            bench.now,
        );

        let reply = execute(&mut bench, "cancel").unwrap();
        assert_eq!(render(&reply).as_str(), "ok: charge cancelled");
        assert_eq!(bench.session.state(), SessionState::Idle);
    }

    #[test]
    fn status_reports_countdown_and_payment() {
        let mut bench = Bench::new();
        bench.session.handle_event(UserEvent::Tap, bench.now);
        bench.session.handle_create_result(
            ChargeReceipt::new("p1", "Q", Amount::from_minor(50)),
            bench.now,
        );
        bench.now = MicrosInstant(18_500_000);

        let reply = execute(&mut bench, "status").unwrap();
        assert_eq!(
            render(&reply).as_str(),
            "state=awaiting-payment price=0.50 payment=p1 remaining=42s polls=0 soft-failures=0"
        );
    }

    #[test]
    fn history_lists_recent_events() {
        let mut bench = Bench::new();
        let reply = execute(&mut bench, "history").unwrap();
        assert_eq!(render(&reply).as_str(), "history empty");

        execute(&mut bench, "buy").unwrap();
        let reply = execute(&mut bench, "history 1").unwrap();
        assert_eq!(
            render(&reply).as_str(),
            "#0 state creating from=idle"
        );
    }

    #[test]
    fn help_falls_back_to_overview() {
        let mut bench = Bench::new();
        let reply = execute(&mut bench, "help PRICE").unwrap();
        assert!(render(&reply).starts_with("price <amount>"));

        let reply = execute(&mut bench, "help refunds").unwrap();
        assert!(render(&reply).starts_with("commands:"));
    }

    #[test]
    fn parse_errors_render_with_prefix() {
        let mut bench = Bench::new();
        let error = execute(&mut bench, "refund").err().unwrap();
        let mut out = String::<64>::new();
        fmt::write(&mut out, format_args!("{error}")).unwrap();
        assert_eq!(out.as_str(), "error: unknown command `refund` (try `help`)");
    }
}
