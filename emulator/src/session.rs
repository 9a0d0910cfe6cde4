use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use embassy_futures::block_on;
use vending_core::console;
use vending_core::controller::{TerminalConfig, TerminalController};
use vending_core::gateway::GatewayError;
use vending_core::session::{Amount, SessionConfig, Tone};

use crate::sim::{
    BackendMode, RelayGateway, ScreenSink, SimActuator, SimButton, SimClock,
};

/// Length of one virtual control cycle.
pub const CYCLE: Duration = Duration::from_millis(50);

/// Press length used by `tap`.
const TAP_PRESS: Duration = Duration::from_millis(150);

/// Press length used by `hold` without an argument.
const DEFAULT_HOLD: Duration = Duration::from_millis(3_200);

/// Upper bound for a single `wait` or `hold`.
const MAX_WAIT: Duration = Duration::from_secs(600);

pub const DEFAULT_TRANSCRIPT: &str = "transcripts/emulator.log";

pub const SIM_HELP: &[(&str, &str)] = &[
    ("tap", "tap                      - short press (start a purchase)"),
    ("hold", "hold [duration]          - long press, default 3200ms (cancel)"),
    ("press", "press | release          - change the raw button level"),
    ("wait", "wait <duration>          - advance virtual time, e.g. 500ms or 5s"),
    (
        "gateway",
        "gateway approve|pending|decline|garble|fail <kind>|reset",
    ),
    ("dispense", "dispense ok|jam          - set the actuator outcome"),
];

type Controller = TerminalController<SimButton, RelayGateway, ScreenSink, SimActuator>;

/// Emulator options taken from the command line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    pub price: Option<Amount>,
    pub transcript: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            price: None,
            transcript: PathBuf::from(DEFAULT_TRANSCRIPT),
        }
    }
}

/// One line printed back to the operator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Output {
    pub tone: Option<Tone>,
    pub text: String,
}

impl Output {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            tone: None,
            text: text.into(),
        }
    }

    fn toned(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone: Some(tone),
            text: text.into(),
        }
    }
}

pub struct Session {
    clock: SimClock,
    controller: Controller,
    transcript: TranscriptLogger,
}

impl Session {
    pub fn new(options: &Options, header: &str) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(&options.transcript, header)?;
        let clock = SimClock::default();
        let mut session_config = SessionConfig::new();
        if let Some(price) = options.price {
            session_config = session_config.with_amount(price);
        }

        let controller = TerminalController::new(
            SimButton::new(clock.clone()),
            RelayGateway::new(clock.clone()),
            ScreenSink::default(),
            SimActuator::new(clock.clone()),
            TerminalConfig::new().with_session(session_config),
        );

        Ok(Self {
            clock,
            controller,
            transcript,
        })
    }

    /// Shows the welcome screen.
    pub fn boot(&mut self) -> io::Result<Vec<Output>> {
        block_on(self.controller.start());
        let mut lines = Vec::new();
        self.collect(&mut lines);
        self.record_output(&lines)?;
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<Output>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        self.transcript
            .append_line(self.elapsed(), TranscriptRole::Host, trimmed)?;

        let lines = match self.simulate(trimmed) {
            Some(result) => match result {
                Ok(lines) => lines,
                Err(message) => vec![Output::plain(format!("error: {message}"))],
            },
            None => self.console(trimmed),
        };

        self.record_output(&lines)?;
        Ok(lines)
    }

    fn elapsed(&self) -> Duration {
        self.clock.now().elapsed()
    }

    fn simulate(&mut self, line: &str) -> Option<Result<Vec<Output>, String>> {
        let mut words = line.split_whitespace();
        let verb = words.next()?.to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let result = match verb.as_str() {
            "press" => Ok(self.set_button(true)),
            "release" => Ok(self.set_button(false)),
            "tap" => Ok(self.press_for(TAP_PRESS)),
            "hold" => match args.first() {
                Some(value) => parse_duration(value).map(|duration| self.press_for(duration)),
                None => Ok(self.press_for(DEFAULT_HOLD)),
            },
            "wait" => match args.first() {
                Some(value) => parse_duration(value).map(|duration| self.run_for(duration)),
                None => Err("wait needs a duration".to_string()),
            },
            "gateway" => self.set_backend(&args),
            "dispense" => self.set_dispense(&args),
            "help" if args.is_empty() => Ok(self.help_overview()),
            "help" if SIM_HELP.iter().any(|(name, _)| name.eq_ignore_ascii_case(args[0])) => {
                Ok(sim_help(args[0]))
            }
            _ => return None,
        };
        Some(result)
    }

    fn console(&mut self, line: &str) -> Vec<Output> {
        let reply = match console::execute(&mut self.controller, line) {
            Ok(reply) => reply.to_string(),
            Err(error) => error.to_string(),
        };

        let mut lines: Vec<Output> = reply.lines().map(Output::plain).collect();
        block_on(self.controller.flush());
        self.collect(&mut lines);
        lines
    }

    fn set_button(&mut self, pressed: bool) -> Vec<Output> {
        self.controller.input_mut().set(pressed);
        self.run_cycles(1)
    }

    fn press_for(&mut self, duration: Duration) -> Vec<Output> {
        self.controller.input_mut().set(true);
        let mut lines = self.run_for(duration);
        self.controller.input_mut().set(false);
        lines.extend(self.run_cycles(1));
        lines
    }

    fn run_for(&mut self, duration: Duration) -> Vec<Output> {
        let duration = duration.min(MAX_WAIT);
        let cycles = duration.as_millis().div_ceil(CYCLE.as_millis());
        self.run_cycles(usize::try_from(cycles).unwrap_or(usize::MAX))
    }

    fn run_cycles(&mut self, cycles: usize) -> Vec<Output> {
        let mut lines = Vec::new();
        for _ in 0..cycles {
            self.clock.advance(CYCLE);
            let report = block_on(self.controller.run_cycle());
            if let Some(gesture) = report.gesture {
                lines.push(Output::plain(format!("[button] {gesture}")));
            }
            self.collect(&mut lines);
        }
        lines
    }

    fn collect(&mut self, lines: &mut Vec<Output>) {
        for (request, reply) in self.controller.gateway_mut().take_exchanges() {
            lines.push(Output::plain(format!("[relay] > {request}")));
            lines.push(Output::plain(format!("[relay] < {reply}")));
        }
        for screen in self.controller.presentation_mut().take() {
            lines.push(Output::toned(screen.tone, screen.text));
        }
    }

    fn set_backend(&mut self, args: &[&str]) -> Result<Vec<Output>, String> {
        let mode = match args {
            ["approve"] => BackendMode::Approve,
            ["pending" | "reset"] => BackendMode::Pending,
            ["decline"] => BackendMode::Decline,
            ["garble"] => BackendMode::Garble,
            ["fail", kind @ ..] => BackendMode::Fail(parse_gateway_error(kind)?),
            _ => return Err("gateway approve|pending|decline|garble|fail <kind>|reset".to_string()),
        };
        self.controller.gateway_mut().relay_mut().set_mode(mode);
        let label = self.controller.gateway_mut().relay().mode().label();
        Ok(vec![Output::plain(format!("ok: gateway {label}"))])
    }

    fn set_dispense(&mut self, args: &[&str]) -> Result<Vec<Output>, String> {
        let jam = match args {
            ["ok"] => false,
            ["jam"] => true,
            _ => return Err("dispense ok|jam".to_string()),
        };
        self.controller.actuator_mut().set_jam(jam);
        let runs = self.controller.actuator_mut().runs();
        let label = if jam { "jam" } else { "ok" };
        Ok(vec![Output::plain(format!(
            "ok: dispense {label} (runs so far {runs})"
        ))])
    }

    fn help_overview(&mut self) -> Vec<Output> {
        let mut lines = self.console("help");
        let names: Vec<&str> = SIM_HELP.iter().map(|(name, _)| *name).collect();
        lines.push(Output::plain(format!("simulation: {}", names.join(", "))));
        lines
    }

    fn record_output(&mut self, lines: &[Output]) -> io::Result<()> {
        let elapsed = self.elapsed();
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, &line.text)?;
        }
        Ok(())
    }

    /// Raw button level, shown in the prompt while held.
    pub fn button_pressed(&mut self) -> bool {
        self.controller.input_mut().is_pressed()
    }
}

fn sim_help(topic: &str) -> Vec<Output> {
    SIM_HELP
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(topic))
        .map(|(_, text)| Output::plain(*text))
        .collect()
}

fn parse_gateway_error(kind: &[&str]) -> Result<GatewayError, String> {
    match kind {
        ["unreachable"] => Ok(GatewayError::Unreachable),
        ["timeout"] => Ok(GatewayError::Timeout),
        ["malformed"] => Ok(GatewayError::Malformed),
        ["http", code] => code
            .parse::<u16>()
            .map(GatewayError::HttpStatus)
            .map_err(|_| format!("invalid http status `{code}`")),
        _ => Err("fail unreachable|timeout|malformed|http <code>".to_string()),
    }
}

/// Parses `500ms`, `5s` or a bare millisecond count.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, scale) = if let Some(digits) = value.strip_suffix("ms") {
        (digits, 1)
    } else if let Some(digits) = value.strip_suffix('s') {
        (digits, 1_000)
    } else {
        (value.as_str(), 1)
    };

    digits
        .parse::<u64>()
        .map(|count| Duration::from_millis(count.saturating_mul(scale)))
        .map_err(|_| format!("invalid duration `{value}`"))
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(header)?;
        Ok(logger)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "# {header}")?;
        writeln!(
            self.writer,
            "# Timestamps are virtual milliseconds since power-on"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
