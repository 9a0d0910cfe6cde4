mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use crossterm::style::{Color, Stylize, style};
use session::{Options, Output, Session};
use vending_core::session::{Amount, Tone};

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: vending-emulator [--price <minor>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&options, "PIX vending terminal emulator transcript")?;
    let mut line = String::new();

    writeln!(
        writer,
        "PIX vending terminal emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    print_lines(&mut writer, &session.boot()?)?;

    loop {
        line.clear();
        let prompt = if session.button_pressed() { "[held]> " } else { "> " };
        write!(writer, "{prompt}")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        print_lines(&mut writer, &responses)?;
    }

    Ok(())
}

fn print_lines(writer: &mut impl Write, lines: &[Output]) -> io::Result<()> {
    for output in lines {
        match output.tone {
            Some(tone) => writeln!(writer, "{}", style(&output.text).with(tone_color(tone)))?,
            None => writeln!(writer, "{}", output.text)?,
        }
    }
    Ok(())
}

fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Info => Color::Cyan,
        Tone::Warn => Color::Yellow,
        Tone::Error => Color::Red,
        Tone::Success => Color::Green,
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };

        match flag.as_str() {
            "--price" => {
                let raw = value()?;
                let minor = raw
                    .parse::<u32>()
                    .ok()
                    .filter(|minor| *minor > 0)
                    .ok_or_else(|| format!("Invalid price `{raw}` (minor units, > 0)"))?;
                options.price = Some(Amount::from_minor(minor));
            }
            "--transcript" => options.transcript = PathBuf::from(value()?),
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }
    Ok(options)
}
