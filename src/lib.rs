pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod persist;
pub mod prompt;
pub mod record;
pub mod session;
pub mod table;

pub use config::{Destination, OutputConfig, OutputFormat, PortSettings, SessionConfig};
pub use connection::{LineSource, PortSummary, Received, SerialLineReader};
pub use error::{
    ConfigError, ConnectionError, DisconnectFault, PersistenceError, RowShapeMismatch,
    SchemaError, SessionError,
};
pub use session::{
    Session, SessionNotification, SessionOutcome, SessionPhase, SessionReport, TerminationCause,
};
pub use table::{Field, HeaderSet, Table};
