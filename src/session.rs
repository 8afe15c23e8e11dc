use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::connection::{self, LineSource, Received, SerialLineReader};
use crate::error::{ConnectionError, DisconnectFault, RowShapeMismatch, SessionError};
use crate::record;
use crate::table::{HeaderSet, Row, Table, TableAccumulator, DEFAULT_PREVIEW_ROWS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    /// Waiting for the first record, which becomes the header set.
    Priming,
    Collecting,
    Terminating,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationCause {
    /// The requested number of rows was collected.
    Completed,
    Disconnected,
    Interrupted,
    /// No complete record arrived within the configured idle timeout.
    TimedOut,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminationCause::Completed => "completed",
            TerminationCause::Disconnected => "disconnected",
            TerminationCause::Interrupted => "interrupted",
            TerminationCause::TimedOut => "timed out",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub cause: TerminationCause,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
    pub rows: usize,
    pub target: usize,
    pub rejected: usize,
}

impl SessionReport {
    pub fn started_at_string(&self) -> String {
        let format = time::macros::format_description!(
            version = 2,
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        );
        self.started_at
            .format(&format)
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Collected {}/{} samples in {:.2}s ({})",
            self.rows,
            self.target,
            self.elapsed.as_secs_f64(),
            self.cause
        )?;
        match self.rejected {
            0 => Ok(()),
            1 => write!(f, ", dropped 1 malformed record"),
            n => write!(f, ", dropped {n} malformed records"),
        }
    }
}

pub enum SessionNotification<'a> {
    PhaseChange(SessionPhase),
    HeadersEstablished(&'a HeaderSet),
    /// `index` is 1-based, `target` is the configured sample count.
    RowAccepted {
        index: usize,
        target: usize,
        row: &'a Row,
    },
    RowRejected {
        line: &'a str,
        error: &'a RowShapeMismatch,
    },
    /// A record longer than the reader's limit was dropped unparsed.
    RecordTooLong {
        length: usize,
    },
    Disconnected(&'a DisconnectFault),
    /// Sent once at the end of every session that got past connecting,
    /// whatever the cause.
    Finished {
        report: &'a SessionReport,
        preview: &'a str,
    },
}

pub type SessionCallback = Box<dyn Fn(&SessionNotification<'_>) + 'static + std::marker::Send>;

pub struct SessionOutcome {
    pub report: SessionReport,
    pub table: Table,
    pub preview: String,
}

enum NextRecord {
    Line(String),
    Stop(TerminationCause),
}

fn notify(callback: &Option<SessionCallback>, notification: &SessionNotification<'_>) {
    if let Some(callback) = callback {
        callback(notification);
    }
}

/// Drives one collection run: prime headers from the first record, then
/// accumulate rows until the target count, a disconnect, an interrupt or the
/// idle timeout. The source is owned for the whole run and released on every
/// exit path.
pub struct Session<S: LineSource> {
    config: SessionConfig,
    source: S,
    accumulator: TableAccumulator,
    phase: SessionPhase,
    callback: Option<SessionCallback>,
}

impl Session<SerialLineReader> {
    pub fn connect(
        config: SessionConfig,
        callback: Option<SessionCallback>,
    ) -> Result<Session<SerialLineReader>, ConnectionError> {
        notify(
            &callback,
            &SessionNotification::PhaseChange(SessionPhase::Connecting),
        );
        let source = connection::open(&config.port)?;
        let mut session = Session::with_source(config, source, callback);
        session.phase = SessionPhase::Connecting;
        Ok(session)
    }
}

impl<S: LineSource> Session<S> {
    pub fn with_source(
        config: SessionConfig,
        source: S,
        callback: Option<SessionCallback>,
    ) -> Session<S> {
        Session {
            config,
            source,
            accumulator: TableAccumulator::new(),
            phase: SessionPhase::Idle,
            callback,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        debug!(from = ?self.phase, to = ?phase, "session phase change");
        self.phase = phase;
        notify(&self.callback, &SessionNotification::PhaseChange(phase));
    }

    /// Runs the session to completion. `interrupt` is polled between reads;
    /// setting it ends the session with cause Interrupted.
    ///
    /// Only a failure to derive headers is an error. Every other ending
    /// (including disconnects) produces an outcome with whatever was
    /// collected.
    pub fn run(mut self, interrupt: &AtomicBool) -> Result<SessionOutcome, SessionError> {
        let started_at = OffsetDateTime::now_utc();
        let start = Instant::now();
        info!(
            target_rows = self.config.sample_count,
            headers_printed = self.config.headers_printed,
            "starting collection"
        );

        self.set_phase(SessionPhase::Priming);
        let cause = match self.prime(interrupt) {
            Ok(Some(cause)) => cause,
            Ok(None) => {
                self.set_phase(SessionPhase::Collecting);
                self.collect(interrupt)
            }
            Err(error) => {
                self.set_phase(SessionPhase::Terminating);
                self.release();
                return Err(error.into());
            }
        };

        Ok(self.finish(cause, started_at, start.elapsed()))
    }

    /// Blocks until the next complete record, or until something ends the
    /// session.
    fn next_record(&mut self, interrupt: &AtomicBool) -> NextRecord {
        let waiting_since = Instant::now();
        loop {
            if interrupt.load(Ordering::SeqCst) {
                info!("interrupted by user");
                return NextRecord::Stop(TerminationCause::Interrupted);
            }
            match self.source.next_line() {
                Ok(Some(Received::Line(line))) => return NextRecord::Line(line),
                Ok(Some(Received::Overlong { length })) => {
                    warn!(length, "dropping overlong record");
                    self.accumulator.reject();
                    notify(
                        &self.callback,
                        &SessionNotification::RecordTooLong { length },
                    );
                }
                Ok(None) => {
                    if let Some(idle_timeout) = self.config.idle_timeout {
                        if waiting_since.elapsed() >= idle_timeout {
                            warn!(?idle_timeout, "no data received, giving up");
                            return NextRecord::Stop(TerminationCause::TimedOut);
                        }
                    }
                }
                Err(fault) => {
                    warn!(%fault, "connection lost");
                    notify(&self.callback, &SessionNotification::Disconnected(&fault));
                    return NextRecord::Stop(TerminationCause::Disconnected);
                }
            }
        }
    }

    /// Turns the first record into the header set. Returns a cause if the
    /// session ended before any record arrived.
    fn prime(
        &mut self,
        interrupt: &AtomicBool,
    ) -> Result<Option<TerminationCause>, crate::error::SchemaError> {
        let line = match self.next_record(interrupt) {
            NextRecord::Line(line) => line,
            NextRecord::Stop(cause) => return Ok(Some(cause)),
        };
        let tokens = record::normalize(&line, &self.config.delimiters);
        let headers = self
            .accumulator
            .establish_headers(&tokens, self.config.headers_printed)?;
        info!(columns = ?headers.names(), "column headers established");
        notify(
            &self.callback,
            &SessionNotification::HeadersEstablished(headers),
        );
        // Without a header line the priming record only fixes the column
        // count. It may also be the tail of a line the device was halfway
        // through when the port was opened, so it is never kept as data.
        Ok(None)
    }

    fn collect(&mut self, interrupt: &AtomicBool) -> TerminationCause {
        while self.accumulator.row_count() < self.config.sample_count {
            let line = match self.next_record(interrupt) {
                NextRecord::Line(line) => line,
                NextRecord::Stop(cause) => return cause,
            };
            let tokens = record::normalize(&line, &self.config.delimiters);
            self.accept(&line, &tokens);
        }
        TerminationCause::Completed
    }

    fn accept(&mut self, line: &str, tokens: &[String]) {
        let index = self.accumulator.row_count() + 1;
        let target = self.config.sample_count;
        match self.accumulator.append_row(tokens) {
            Ok(row) => {
                debug!(index, total = target, "row accepted");
                notify(
                    &self.callback,
                    &SessionNotification::RowAccepted { index, target, row },
                );
            }
            Err(error) => {
                warn!(
                    expected = error.expected,
                    found = error.found,
                    line,
                    "dropping malformed record"
                );
                notify(
                    &self.callback,
                    &SessionNotification::RowRejected {
                        line,
                        error: &error,
                    },
                );
            }
        }
    }

    fn release(&mut self) {
        if let Err(error) = self.source.close() {
            warn!(%error, "failed to close connection");
        }
    }

    fn finish(
        mut self,
        cause: TerminationCause,
        started_at: OffsetDateTime,
        elapsed: Duration,
    ) -> SessionOutcome {
        self.set_phase(SessionPhase::Terminating);
        self.release();

        let report = SessionReport {
            cause,
            started_at,
            elapsed,
            rows: self.accumulator.row_count(),
            target: self.config.sample_count,
            rejected: self.accumulator.rejected(),
        };
        let preview = self.accumulator.snapshot().preview(DEFAULT_PREVIEW_ROWS);
        info!(
            %cause,
            rows = report.rows,
            rejected = report.rejected,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "session finished"
        );

        self.set_phase(SessionPhase::Done);
        notify(
            &self.callback,
            &SessionNotification::Finished {
                report: &report,
                preview: &preview,
            },
        );

        SessionOutcome {
            report,
            table: self.accumulator.into_table(),
            preview,
        }
    }
}
