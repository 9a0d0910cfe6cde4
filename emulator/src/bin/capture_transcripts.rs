use std::io;
use std::path::PathBuf;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;
#[allow(dead_code)]
#[path = "../sim.rs"]
mod sim;

use session::{Options, Session};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scenario {
    Paid,
    Timeout,
    Cancel,
    GatewayDown,
    Jam,
}

impl Scenario {
    const ALL: [Scenario; 5] = [
        Scenario::Paid,
        Scenario::Timeout,
        Scenario::Cancel,
        Scenario::GatewayDown,
        Scenario::Jam,
    ];

    fn tag(self) -> &'static str {
        match self {
            Scenario::Paid => "paid",
            Scenario::Timeout => "timeout",
            Scenario::Cancel => "cancel",
            Scenario::GatewayDown => "gateway-down",
            Scenario::Jam => "jam",
        }
    }

    fn script(self) -> &'static [&'static str] {
        match self {
            Scenario::Paid => &["price 1.50", "tap", "wait 5s", "gateway approve", "wait 5s", "status"],
            Scenario::Timeout => &["tap", "wait 61s", "status", "history 6"],
            Scenario::Cancel => &["tap", "wait 2s", "hold", "status"],
            Scenario::GatewayDown => &[
                "gateway fail unreachable",
                "tap",
                "wait 5s",
                "gateway reset",
                "tap",
                "cancel",
            ],
            Scenario::Jam => &["dispense jam", "gateway approve", "tap", "wait 6s", "history 4"],
        }
    }
}

fn main() -> io::Result<()> {
    for scenario in Scenario::ALL {
        record(scenario)?;
    }
    Ok(())
}

fn record(scenario: Scenario) -> io::Result<()> {
    let options = Options {
        price: None,
        transcript: PathBuf::from(format!("transcripts/emulator-{}.log", scenario.tag())),
    };
    let header = format!("PIX vending terminal {} transcript", scenario.tag());
    let mut session = Session::new(&options, &header)?;
    session.boot()?;
    for line in scenario.script() {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}
