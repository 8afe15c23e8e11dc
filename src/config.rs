use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::record::DelimiterSet;

pub const DEFAULT_SPEED: u32 = 9600;
pub const DEFAULT_SAMPLE_COUNT: usize = 20;
pub const DEFAULT_FILENAME: &str = "Arduino_data";
/// How long a single read may block before the session loop gets a chance to
/// look at the interrupt flag (and the idle timeout).
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Process exit status when configuration, connection or header setup fails.
pub const EXIT_FATAL: u8 = 1;
/// Process exit status when data was collected but couldn't be written.
pub const EXIT_NOT_SAVED: u8 = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct PortSettings {
    pub endpoint: String,
    pub speed: u32,
    pub poll_timeout: Duration,
}

impl PortSettings {
    pub fn new(endpoint: impl Into<String>, speed: u32) -> PortSettings {
        PortSettings {
            endpoint: endpoint.into(),
            speed,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Everything a session needs, fixed before it starts.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub port: PortSettings,
    /// Whether the device prints its own header line before the data.
    pub headers_printed: bool,
    /// Number of rows to collect before the session completes.
    pub sample_count: usize,
    pub delimiters: DelimiterSet,
    /// Give up when no complete record arrived for this long. None waits
    /// forever (until disconnect or interrupt).
    pub idle_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> SessionConfig {
        SessionConfig {
            port: PortSettings::new(endpoint, DEFAULT_SPEED),
            headers_printed: true,
            sample_count: DEFAULT_SAMPLE_COUNT,
            delimiters: DelimiterSet::default(),
            idle_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must not be empty".to_string(),
            });
        }
        if self.port.speed == 0 {
            return Err(ConfigError::Invalid {
                field: "baud rate",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.port.poll_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "poll timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sample_count == 0 {
            return Err(ConfigError::Invalid {
                field: "sample count",
                reason: "must be a positive integer".to_string(),
            });
        }
        if let Some(idle_timeout) = self.idle_timeout {
            if idle_timeout < self.port.poll_timeout {
                return Err(ConfigError::Invalid {
                    field: "read timeout",
                    reason: format!(
                        "must be at least the poll interval ({}ms)",
                        self.port.poll_timeout.as_millis()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Csv,
    Space,
}

impl OutputFormat {
    pub fn delimiter(&self) -> u8 {
        match self {
            OutputFormat::Csv => b',',
            OutputFormat::Space => b' ',
        }
    }

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Space => "txt",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "CSV",
            OutputFormat::Space => "space-separated text",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "comma" => Ok(OutputFormat::Csv),
            "space" | "ssv" => Ok(OutputFormat::Space),
            other => Err(ConfigError::Invalid {
                field: "format",
                reason: format!("unknown format '{other}' (expected csv or space)"),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Save(PathBuf),
    Skip,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    pub destination: Destination,
    pub format: OutputFormat,
}

/// Where files go unless the user picks a directory: downloads, else home,
/// else the working directory.
pub fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}
