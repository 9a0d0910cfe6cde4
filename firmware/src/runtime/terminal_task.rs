use core::fmt::Write as _;

use defmt::Display2Format;
use embassy_time::{Duration, Ticker, with_timeout};
use heapless::String;
use vending_core::console;
use vending_core::controller::TerminalController;
use vending_core::telemetry::EventId;

use crate::hw::{Button, PanelSink, SolenoidActuator};
use crate::line::{Feed, LineAssembler};
use crate::link::LinkGateway;
use crate::port::SerialPort;

pub type Terminal = TerminalController<Button, LinkGateway, PanelSink, SolenoidActuator>;

const CYCLE: Duration = Duration::from_millis(50);
const CONSOLE_LINE_LEN: usize = 96;
const REPLY_LEN: usize = 2048;
const REPLY_TIMEOUT: Duration = Duration::from_millis(250);

#[embassy_executor::task]
pub async fn run(mut terminal: Terminal, port: &'static SerialPort) -> ! {
    let mut assembler = LineAssembler::<CONSOLE_LINE_LEN>::new();
    let mut logged: EventId = 0;
    let mut ticker = Ticker::every(CYCLE);

    terminal.start().await;
    defmt::info!("terminal: ready");

    loop {
        let report = terminal.run_cycle().await;
        if let Some(gesture) = report.gesture {
            defmt::debug!("terminal: {}", Display2Format(&gesture));
        }
        logged = log_telemetry(&terminal, logged);

        while let Ok(frame) = port.rx.try_receive() {
            for byte in frame {
                match assembler.feed(byte) {
                    Feed::Pending => {}
                    Feed::Overflow => reply(port, "error: line too long").await,
                    Feed::Ready => match assembler.take_line() {
                        Ok(line) => {
                            run_command(&mut terminal, port, &line).await;
                            logged = log_telemetry(&terminal, logged);
                        }
                        Err(_) => reply(port, "error: invalid utf-8").await,
                    },
                }
            }
        }

        ticker.next().await;
    }
}

async fn run_command(terminal: &mut Terminal, port: &'static SerialPort, line: &str) {
    let mut text: String<REPLY_LEN> = String::new();
    let rendered = match console::execute(terminal, line) {
        Ok(output) => write!(text, "{output}"),
        Err(error) => write!(text, "{error}"),
    };
    if rendered.is_err() {
        defmt::warn!("console: reply truncated");
    }
    reply(port, &text).await;
    terminal.flush().await;
}

async fn reply(port: &'static SerialPort, text: &str) {
    if !port.is_connected() {
        return;
    }

    let send = async {
        for line in text.split('\n') {
            port.write(line).await;
            port.write("\r\n").await;
        }
    };
    if with_timeout(REPLY_TIMEOUT, send).await.is_err() {
        defmt::warn!("console: reply dropped, host not reading");
    }
}

/// Mirrors telemetry records from `from` onwards to the RTT log and returns
/// the id to resume at.
fn log_telemetry(terminal: &Terminal, from: EventId) -> EventId {
    let telemetry = terminal.telemetry();
    for record in telemetry.oldest_first().filter(|record| record.id >= from) {
        defmt::info!(
            "telemetry: #{} {} {}",
            record.id,
            Display2Format(&record.event),
            Display2Format(&record.details)
        );
    }
    telemetry.next_id()
}
