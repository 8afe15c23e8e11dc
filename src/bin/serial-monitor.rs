use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use time::OffsetDateTime;
use tracing::warn;

use serial2csv::config::DEFAULT_SPEED;
use serial2csv::connection::{self, Received};
use serial2csv::prompt;
use serial2csv::{ConfigError, LineSource, PortSettings};

/// Dumps whatever the device prints, without collecting anything. Handy to
/// check the sketch output before starting a real session.
#[derive(Parser, Debug)]
#[command(name = "serial-monitor", version)]
struct Cli {
    /// Serial port to listen on. A menu of available ports is shown if omitted.
    port: Option<String>,
    #[arg(short, long, default_value_t = DEFAULT_SPEED)]
    baud: u32,
    /// Prefix each line with the (UTC) time it was received.
    #[arg(long)]
    timestamps: bool,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let endpoint = match cli.port {
        Some(port) => port,
        None => {
            let ports = connection::available_ports()?;
            match prompt::stdio().choose_port(&ports) {
                Ok(port) => port,
                Err(ConfigError::UserQuit) => return Ok(ExitCode::SUCCESS),
                Err(e) => return Err(e.into()),
            }
        }
    };

    let mut source = match connection::open(&PortSettings::new(endpoint, cli.baud)) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    eprintln!("Listening on {} at {} baud, Ctrl-C to stop.", source.endpoint(), cli.baud);

    let interrupt = Arc::new(AtomicBool::new(false));
    let interrupt_for_handler = interrupt.clone();
    ctrlc::set_handler(move || {
        interrupt_for_handler.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler failed")?;

    let timestamp_format = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    loop {
        if interrupt.load(Ordering::SeqCst) {
            eprintln!("User force quit program.");
            break;
        }
        match source.next_line() {
            Ok(Some(Received::Overlong { length })) => {
                eprintln!("[dropped {length}+ bytes without a line break]");
            }
            Ok(Some(Received::Line(line))) if cli.timestamps => {
                let now = OffsetDateTime::now_utc()
                    .format(&timestamp_format)
                    .context("formatting timestamp failed")?;
                println!("{now} {}", line.trim());
            }
            Ok(Some(Received::Line(line))) => println!("{}", line.trim()),
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "read failed");
                eprintln!("Microcontroller was disconnected.");
                break;
            }
        }
    }

    if let Err(e) = source.close() {
        warn!(error = %e, "failed to close serial port");
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    serial2csv::logging::init(cli.verbose);
    eprintln!("serial-monitor (v{})", env!("CARGO_PKG_VERSION"));

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
