use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::error::SmuError;
use crate::transport::{is_timeout, trim_response, Transport};

const DEFAULT_BAUD: u32 = 9600;
/// Per-read wait used while the transport is configured to block forever.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// RS-232 link to an SMU, newline terminated in both directions.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    timeout: Option<Duration>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// `address` is a device path, optionally followed by `@baud`
    /// (`/dev/ttyUSB0@19200`). A VISA style `ASRL/dev/ttyUSB0::INSTR` is accepted too.
    pub fn open(address: &str) -> crate::Result<Self> {
        let (path, baud) = parse_address(address)?;
        let port = serialport::new(path.as_str(), baud)
            .timeout(IDLE_POLL)
            .open()
            .map_err(|e| SmuError::Connection {
                address: address.to_string(),
                cause: io::Error::from(e),
            })?;
        debug!("opened {} at {} baud", path, baud);
        Ok(SerialTransport {
            port,
            timeout: Some(IDLE_POLL),
            pending: Vec::new(),
        })
    }

    pub fn list() -> crate::Result<Vec<String>> {
        Ok(serialport::available_ports()
            .map_err(io::Error::from)?
            .into_iter()
            .map(|p| p.port_name)
            .collect())
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(trim_response(&String::from_utf8_lossy(&line)))
    }
}

fn parse_address(address: &str) -> crate::Result<(String, u32)> {
    let trimmed = address
        .trim_start_matches("ASRL")
        .trim_end_matches("::INSTR");
    let (path, baud) = match trimmed.rfind('@') {
        Some(ix) => {
            let baud = trimmed[ix + 1..].parse::<u32>().map_err(|_| {
                SmuError::invalid(format!("bad baud rate in serial address {}", address))
            })?;
            (&trimmed[..ix], baud)
        }
        None => (trimmed, DEFAULT_BAUD),
    };
    if path.is_empty() {
        return Err(SmuError::invalid(format!("no device in serial address {}", address)).into());
    }
    Ok((path.to_string(), baud))
}

impl Transport for SerialTransport {
    fn write(&mut self, command: &str) -> io::Result<()> {
        self.port.write_all(command.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }

    fn read(&mut self) -> io::Result<String> {
        let mut buf = [0u8; 256];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            match self.port.read(&mut buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed"))
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(ref e) if is_timeout(e) && self.timeout.is_none() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout;
        self.port
            .set_timeout(timeout.unwrap_or(IDLE_POLL))
            .map_err(io::Error::from)
    }
}
