use std::fmt;
use std::io::{BufRead, BufReader};

use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info};

use crate::config::PortSettings;
use crate::error::{ConnectionError, DisconnectFault};

/// Longest record a reader buffers before giving up on it. Real sketches
/// print lines well under a hundred bytes.
pub const MAX_RECORD_LEN: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received {
    /// A complete record, line terminator stripped.
    Line(String),
    /// A record that grew past the reader's limit. Its bytes are dropped up to
    /// and including the next newline.
    Overlong { length: usize },
}

/// Anything that yields newline-terminated records, one per call.
pub trait LineSource {
    /// Blocks for at most the source's poll interval. Ok(None) means nothing
    /// complete arrived yet, the caller should simply ask again.
    fn next_line(&mut self) -> Result<Option<Received>, DisconnectFault>;

    /// Releases the underlying connection. Calling it twice is a no-op.
    fn close(&mut self) -> std::io::Result<()>;
}

/// Splits a byte stream into records. Partial records survive read timeouts
/// and are completed by later calls. At most one buffer's worth of input is
/// consumed per call, so a device that never sends a newline can't keep the
/// caller from polling its interrupt flag.
pub struct LineReader<R: BufRead> {
    reader: Option<R>,
    pending: Vec<u8>,
    limit: usize,
    discarding: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R) -> LineReader<R> {
        LineReader::with_limit(reader, MAX_RECORD_LEN)
    }

    pub fn with_limit(reader: R, limit: usize) -> LineReader<R> {
        LineReader {
            reader: Some(reader),
            pending: Vec::with_capacity(128),
            limit,
            discarding: false,
        }
    }

    pub fn take_inner(&mut self) -> Option<R> {
        self.pending.clear();
        self.discarding = false;
        self.reader.take()
    }
}

impl<R: BufRead> LineSource for LineReader<R> {
    fn next_line(&mut self) -> Result<Option<Received>, DisconnectFault> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(DisconnectFault(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection already closed",
            )));
        };
        let available = match reader.fill_buf() {
            Ok([]) => {
                return Err(DisconnectFault(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "end of stream",
                )))
            }
            Ok(available) => available,
            Err(error) => {
                return match error.kind() {
                    std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted => Ok(None),
                    _ => Err(DisconnectFault(error)),
                }
            }
        };
        let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let consumed = chunk.len();

        let mut received = None;
        if !self.discarding {
            if self.pending.len() + consumed > self.limit {
                received = Some(Received::Overlong {
                    length: self.pending.len() + consumed,
                });
                self.pending.clear();
                self.discarding = true;
            } else {
                self.pending.extend_from_slice(chunk);
            }
        }
        reader.consume(consumed);

        if !complete {
            return Ok(received);
        }
        if self.discarding {
            self.discarding = false;
            return Ok(received);
        }
        // Microcontrollers happily emit garbage while resetting, which
        // shouldn't take the whole session down.
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.pending.clear();
        Ok(Some(Received::Line(line)))
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.take_inner();
        Ok(())
    }
}

pub struct SerialLineReader {
    endpoint: String,
    lines: LineReader<BufReader<Box<dyn SerialPort>>>,
}

impl SerialLineReader {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl LineSource for SerialLineReader {
    fn next_line(&mut self) -> Result<Option<Received>, DisconnectFault> {
        self.lines.next_line()
    }

    fn close(&mut self) -> std::io::Result<()> {
        let Some(reader) = self.lines.take_inner() else {
            return Ok(());
        };
        debug!(endpoint = %self.endpoint, "closing serial port");
        // The port itself is closed on drop, which can't fail. Discarding
        // whatever the device sent after we stopped listening can.
        reader.into_inner().clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

/// Opens `settings.endpoint` as 8N1 without flow control, which is what the
/// Arduino core's Serial.begin() configures.
pub fn open(settings: &PortSettings) -> Result<SerialLineReader, ConnectionError> {
    info!(
        endpoint = %settings.endpoint,
        speed = settings.speed,
        "opening serial port"
    );
    let port = serialport::new(settings.endpoint.as_str(), settings.speed)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        // Reads return TimedOut after this long, see LineReader::next_line.
        .timeout(settings.poll_timeout)
        .open()
        .map_err(|error| ConnectionError::from_serialport(&settings.endpoint, error))?;

    Ok(SerialLineReader {
        endpoint: settings.endpoint.clone(),
        lines: LineReader::new(BufReader::new(port)),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    pub description: String,
}

impl fmt::Display for PortSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.description)
    }
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let label = [usb.manufacturer.as_deref(), usb.product.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if label.is_empty() {
                format!("USB {:04x}:{:04x}", usb.vid, usb.pid)
            } else {
                format!("USB {label} {:04x}:{:04x}", usb.vid, usb.pid)
            }
        }
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

pub fn available_ports() -> Result<Vec<PortSummary>, ConnectionError> {
    let ports =
        serialport::available_ports().map_err(|e| ConnectionError::Discovery(e.to_string()))?;
    debug!(count = ports.len(), "enumerated serial ports");
    Ok(ports
        .into_iter()
        .map(|port| PortSummary {
            description: describe_port_type(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Read;

    /// Hands out one scripted chunk (or error) per read() call.
    struct ChunkedRead {
        chunks: VecDeque<std::io::Result<Vec<u8>>>,
    }

    impl ChunkedRead {
        fn new(chunks: Vec<std::io::Result<&[u8]>>) -> ChunkedRead {
            ChunkedRead {
                chunks: chunks
                    .into_iter()
                    .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                    .collect(),
            }
        }
    }

    impl Read for ChunkedRead {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(bytes)) => {
                    assert!(bytes.len() <= buf.len(), "test chunk too large");
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    fn line(text: &str) -> Option<Received> {
        Some(Received::Line(text.to_string()))
    }

    fn timed_out() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out")
    }

    #[test]
    fn test_partial_line_survives_timeout() {
        let mut lines = LineReader::new(BufReader::new(ChunkedRead::new(vec![
            Ok(&b"Time;Te"[..]),
            Err(timed_out()),
            Ok(&b"mp\r\n1,2\r\n"[..]),
            Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "unplugged",
            )),
        ])));

        assert_eq!(lines.next_line().unwrap(), None);
        assert_eq!(lines.next_line().unwrap(), None);
        assert_eq!(lines.next_line().unwrap(), line("Time;Temp"));
        assert_eq!(lines.next_line().unwrap(), line("1,2"));
        let fault = lines.next_line().unwrap_err();
        assert_eq!(fault.0.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_overlong_record_is_dropped() {
        let mut lines = LineReader::with_limit(
            BufReader::new(ChunkedRead::new(vec![
                Ok(&b"0123"[..]),
                Ok(&b"456789"[..]),
                Ok(&b"abcdef"[..]),
                Err(timed_out()),
                Ok(&b"gh\nok\n"[..]),
                Ok(&b"12345678\n"[..]),
            ])),
            8,
        );

        assert_eq!(lines.next_line().unwrap(), None);
        assert_eq!(
            lines.next_line().unwrap(),
            Some(Received::Overlong { length: 10 })
        );
        // The rest of the record is skipped without being buffered.
        assert_eq!(lines.next_line().unwrap(), None);
        assert_eq!(lines.next_line().unwrap(), None);
        assert_eq!(lines.next_line().unwrap(), None);
        assert!(lines.pending.is_empty());
        assert_eq!(lines.next_line().unwrap(), line("ok"));
        // Terminator included, nine bytes is one too many.
        assert_eq!(
            lines.next_line().unwrap(),
            Some(Received::Overlong { length: 9 })
        );
        assert_eq!(
            lines.next_line().unwrap_err().0.kind(),
            std::io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_end_of_stream_is_a_disconnect() {
        let mut lines = LineReader::new(BufReader::new(ChunkedRead::new(vec![Ok(&b"a\n"[..])])));
        assert_eq!(lines.next_line().unwrap(), line("a"));
        let fault = lines.next_line().unwrap_err();
        assert_eq!(fault.0.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut lines = LineReader::new(BufReader::new(ChunkedRead::new(vec![Ok(&b"\xff1,2\n"[..])])));
        assert_eq!(lines.next_line().unwrap(), line("\u{FFFD}1,2"));
    }

    #[test]
    fn test_empty_line() {
        let mut lines = LineReader::new(BufReader::new(ChunkedRead::new(vec![Ok(&b"\r\n"[..])])));
        assert_eq!(lines.next_line().unwrap(), line(""));
    }

    #[test]
    fn test_read_after_close() {
        let mut lines = LineReader::new(BufReader::new(ChunkedRead::new(vec![Ok(&b"a\n"[..])])));
        lines.close().unwrap();
        lines.close().unwrap();
        assert_eq!(
            lines.next_line().unwrap_err().0.kind(),
            std::io::ErrorKind::NotConnected
        );
    }

    #[test]
    fn test_describe_port_type() {
        assert_eq!(describe_port_type(&SerialPortType::PciPort), "PCI");
        assert_eq!(
            describe_port_type(&SerialPortType::BluetoothPort),
            "Bluetooth"
        );
        assert_eq!(describe_port_type(&SerialPortType::Unknown), "unknown");
    }

    #[test]
    fn test_port_summary_display() {
        let summary = PortSummary {
            name: "/dev/ttyACM0".to_string(),
            description: "USB Arduino Uno 2341:0043".to_string(),
        };
        assert_eq!(
            summary.to_string(),
            "/dev/ttyACM0 (USB Arduino Uno 2341:0043)"
        );
    }
}
