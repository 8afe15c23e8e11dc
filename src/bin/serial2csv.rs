use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use serial2csv::config::{self, DEFAULT_SAMPLE_COUNT, DEFAULT_SPEED, EXIT_FATAL};
use serial2csv::connection;
use serial2csv::persist::{self, SaveStatus};
use serial2csv::prompt::{self, Prompter};
use serial2csv::record::DelimiterSet;
use serial2csv::{
    ConfigError, Destination, OutputConfig, OutputFormat, PortSettings, Session, SessionConfig,
    SessionError, SessionNotification, TerminationCause,
};

/// Collects delimited lines printed by a microcontroller into a CSV file.
///
/// Anything not given on the command line is asked for interactively.
#[derive(Parser, Debug)]
#[command(name = "serial2csv", version)]
struct Cli {
    /// Serial port the device is attached to, e.g. /dev/ttyACM0 or COM3.
    port: Option<String>,
    /// Baud rate (default 9600).
    #[arg(short, long)]
    baud: Option<u32>,
    /// Number of samples (rows) to collect (default 20).
    #[arg(short = 'n', long)]
    samples: Option<usize>,
    /// Whether the device prints a header line first. Headers are generated
    /// (Col0, Col1, ...) otherwise.
    #[arg(long)]
    headers_printed: Option<bool>,
    /// File name to save to, inside --dir. ".csv" is appended if missing.
    #[arg(short, long, conflicts_with = "no_save")]
    output: Option<String>,
    /// Don't save the collected data.
    #[arg(long)]
    no_save: bool,
    /// Directory to save into (default: your downloads directory).
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Characters separating values, in addition to whitespace.
    #[arg(long, default_value = ";|:,")]
    delimiters: DelimiterSet,
    /// Output format: csv or space.
    #[arg(long, default_value = "csv")]
    format: OutputFormat,
    /// Stop collecting when no complete line arrived for this many seconds.
    #[arg(long, value_name = "SECS")]
    read_timeout: Option<f64>,
    /// Never prompt: use defaults (and the first available port) for
    /// anything not given on the command line.
    #[arg(long)]
    no_prompt: bool,
    /// More logging (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn idle_timeout(read_timeout: Option<f64>) -> Result<Option<Duration>, ConfigError> {
    read_timeout
        .map(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Invalid {
                field: "read timeout",
                reason: format!("{secs} is not a valid number of seconds"),
            })
        })
        .transpose()
}

/// Fills in everything the command line left open. Port and speed are asked
/// first, then the collection parameters.
fn build_config<R: BufRead, W: Write>(
    cli: &Cli,
    prompter: &mut Option<Prompter<R, W>>,
) -> Result<(SessionConfig, OutputConfig), ConfigError> {
    let endpoint = match (&cli.port, prompter.as_mut()) {
        (Some(port), _) => port.clone(),
        (None, Some(prompter)) => prompter.choose_port(&connection::available_ports()?)?,
        (None, None) => connection::available_ports()?
            .into_iter()
            .next()
            .map(|port| port.name)
            .ok_or(ConfigError::NoPorts)?,
    };
    let speed = match (cli.baud, prompter.as_mut()) {
        (Some(baud), _) => baud,
        (None, Some(prompter)) => prompter.ask_speed(DEFAULT_SPEED)?,
        (None, None) => DEFAULT_SPEED,
    };
    let headers_printed = match (cli.headers_printed, prompter.as_mut()) {
        (Some(headers_printed), _) => headers_printed,
        (None, Some(prompter)) => prompter.ask_headers_printed()?,
        (None, None) => true,
    };
    let sample_count = match (cli.samples, prompter.as_mut()) {
        (Some(samples), _) => samples,
        (None, Some(prompter)) => prompter.ask_sample_count(DEFAULT_SAMPLE_COUNT)?,
        (None, None) => DEFAULT_SAMPLE_COUNT,
    };

    let directory = cli.dir.clone().unwrap_or_else(config::default_output_dir);
    let destination = if cli.no_save {
        Destination::Skip
    } else {
        match (&cli.output, prompter.as_mut()) {
            (Some(output), _) => persist::resolve_destination(output, &directory, cli.format),
            (None, Some(prompter)) => prompter.ask_destination(&directory, cli.format)?,
            (None, None) => persist::resolve_destination("", &directory, cli.format),
        }
    };

    let session_config = SessionConfig {
        port: PortSettings::new(endpoint, speed),
        headers_printed,
        sample_count,
        delimiters: cli.delimiters.clone(),
        idle_timeout: idle_timeout(cli.read_timeout)?,
    };
    session_config.validate()?;
    Ok((
        session_config,
        OutputConfig {
            destination,
            format: cli.format,
        },
    ))
}

fn install_interrupt_handler() -> anyhow::Result<Arc<AtomicBool>> {
    let interrupt = Arc::new(AtomicBool::new(false));
    let interrupt_for_handler = interrupt.clone();
    ctrlc::set_handler(move || {
        interrupt_for_handler.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler failed")?;
    Ok(interrupt)
}

fn print_progress(notification: &SessionNotification<'_>) {
    match notification {
        SessionNotification::HeadersEstablished(headers) => {
            println!("Columns: {}", headers.names().join(", "));
        }
        SessionNotification::RowAccepted { index, target, row } => {
            let values: Vec<String> = row.iter().map(|field| field.to_string()).collect();
            println!("Count {index:>3}/{target}: [{}]", values.join(", "));
        }
        SessionNotification::RowRejected { line, error } => {
            eprintln!("Dropped malformed record ({error}): {line:?}");
        }
        SessionNotification::RecordTooLong { length } => {
            eprintln!("Dropped a record of {length}+ bytes without a line break");
        }
        _ => (),
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut prompter = if cli.no_prompt {
        None
    } else {
        Some(prompt::stdio())
    };
    let (session_config, output) = match build_config(&cli, &mut prompter) {
        Ok(config) => config,
        Err(ConfigError::UserQuit) => {
            println!("User quit program.");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(EXIT_FATAL));
        }
    };
    // Release stdin before the session starts, Ctrl-C handling takes over.
    drop(prompter);

    let interrupt = install_interrupt_handler()?;

    print!(
        "\nTesting connection to port \"{}\" with baud rate of {}: ",
        session_config.port.endpoint, session_config.port.speed
    );
    std::io::stdout().flush()?;
    let session = match Session::connect(session_config, Some(Box::new(print_progress))) {
        Ok(session) => {
            println!("Connection successful!\n");
            session
        }
        Err(e) => {
            println!("Connection failed!");
            eprintln!("Error: {e}, check the port and/or baud rate!");
            return Ok(ExitCode::from(EXIT_FATAL));
        }
    };

    let outcome = match session.run(&interrupt) {
        Ok(outcome) => outcome,
        Err(SessionError::Schema(e)) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(EXIT_FATAL));
        }
        Err(SessionError::Connection(e)) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(EXIT_FATAL));
        }
    };

    match outcome.report.cause {
        TerminationCause::Completed => (),
        TerminationCause::Disconnected => println!("-> Device was disconnected."),
        TerminationCause::Interrupted => println!("-> User stopped program."),
        TerminationCause::TimedOut => println!("-> No data received within the read timeout."),
    }
    println!(
        "\nSession started {}. {}",
        outcome.report.started_at_string(),
        outcome.report
    );
    println!("\nSample of collected data:\n\n{}", outcome.preview);

    let status = persist::store(&outcome.table, &output);
    match &status {
        SaveStatus::Saved(path) => println!("\nData saved as \"{}\"", path.display()),
        SaveStatus::Skipped => println!("\nSaving data was skipped."),
        SaveStatus::NothingToSave => println!("\nNo data was received, nothing to save."),
        SaveStatus::Failed(e) => eprintln!("\nError: {e}"),
    }
    Ok(ExitCode::from(status.exit_code()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    serial2csv::logging::init(cli.verbose);
    eprintln!("serial2csv (v{})", env!("CARGO_PKG_VERSION"));

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
