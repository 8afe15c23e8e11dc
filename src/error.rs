use std::path::PathBuf;

use thiserror::Error;

/// Failure to open (or enumerate) a serial endpoint. Always fatal: no session
/// is started when the connection can't be established.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("serial port {endpoint} not found")]
    NotFound { endpoint: String },
    #[error("serial port {endpoint} is busy or access was denied: {reason}")]
    Busy { endpoint: String, reason: String },
    #[error("serial port {endpoint} could not be configured: {reason}")]
    Misconfigured { endpoint: String, reason: String },
    #[error("failed to open serial port {endpoint}: {reason}")]
    Other { endpoint: String, reason: String },
    #[error("failed to enumerate serial ports: {0}")]
    Discovery(String),
}

impl ConnectionError {
    pub fn from_serialport(endpoint: &str, error: serialport::Error) -> ConnectionError {
        let endpoint = endpoint.to_string();
        let reason = error.description;
        match error.kind {
            serialport::ErrorKind::NoDevice => ConnectionError::NotFound { endpoint },
            serialport::ErrorKind::InvalidInput => {
                ConnectionError::Misconfigured { endpoint, reason }
            }
            serialport::ErrorKind::Io(kind) => match kind {
                std::io::ErrorKind::NotFound => ConnectionError::NotFound { endpoint },
                std::io::ErrorKind::PermissionDenied
                | std::io::ErrorKind::AddrInUse
                | std::io::ErrorKind::WouldBlock => ConnectionError::Busy { endpoint, reason },
                std::io::ErrorKind::InvalidInput => {
                    ConnectionError::Misconfigured { endpoint, reason }
                }
                _ => ConnectionError::Other { endpoint, reason },
            },
            serialport::ErrorKind::Unknown => ConnectionError::Other { endpoint, reason },
        }
    }
}

/// The connection was lost while collecting. Terminal for the session, but
/// everything collected so far is kept.
#[derive(Debug, Error)]
#[error("device disconnected: {0}")]
pub struct DisconnectFault(#[source] pub std::io::Error);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("the first record was empty, cannot derive column headers")]
    EmptyHeaderRecord,
    #[error("column headers were already established for this session")]
    AlreadyEstablished,
}

/// A record whose field count disagrees with the header set. The row is
/// dropped; the session carries on.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected {expected} fields, got {found}")]
pub struct RowShapeMismatch {
    pub expected: usize,
    pub found: usize,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write CSV data to {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("no free file name found for {0}")]
    Exhausted(PathBuf),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("no serial ports available, is the device plugged in?")]
    NoPorts,
    #[error("listing serial ports failed: {0}")]
    PortDiscovery(String),
    #[error("user quit")]
    UserQuit,
    #[error("input closed while waiting for an answer")]
    InputClosed,
    #[error("prompt I/O failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::Io(error.to_string())
    }
}

impl From<ConnectionError> for ConfigError {
    fn from(error: ConnectionError) -> Self {
        ConfigError::PortDiscovery(error.to_string())
    }
}

/// Errors that abort a session before any data can be kept.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_categories() {
        struct TestCase<'a> {
            name: &'a str,
            input: serialport::Error,
            expected: &'a str,
        }
        let tests = [
            TestCase {
                name: "NoDevice",
                input: serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
                expected: "NotFound",
            },
            TestCase {
                name: "IoNotFound",
                input: serialport::Error::new(
                    serialport::ErrorKind::Io(std::io::ErrorKind::NotFound),
                    "no such file",
                ),
                expected: "NotFound",
            },
            TestCase {
                name: "PermissionDenied",
                input: serialport::Error::new(
                    serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
                    "denied",
                ),
                expected: "Busy",
            },
            TestCase {
                name: "InvalidInput",
                input: serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud"),
                expected: "Misconfigured",
            },
            TestCase {
                name: "Unknown",
                input: serialport::Error::new(serialport::ErrorKind::Unknown, "???"),
                expected: "Other",
            },
        ];
        for case in tests {
            let got = ConnectionError::from_serialport("/dev/ttyACM0", case.input);
            let got_name = match got {
                ConnectionError::NotFound { .. } => "NotFound",
                ConnectionError::Busy { .. } => "Busy",
                ConnectionError::Misconfigured { .. } => "Misconfigured",
                ConnectionError::Other { .. } => "Other",
                ConnectionError::Discovery(_) => "Discovery",
            };
            assert_eq!(got_name, case.expected, "{}: got={got:?}", case.name);
        }
    }

    #[test]
    fn test_error_messages_name_endpoint() {
        let error = ConnectionError::from_serialport(
            "COM3",
            serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        );
        assert_eq!(error.to_string(), "serial port COM3 not found");
    }
}
