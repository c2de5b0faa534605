use std::ffi::CString;
use std::io::{self, BufRead, BufReader, Write};
use std::time::Duration;

use visa_rs::attribute::AttrTmoValue;
use visa_rs::prelude::*;

use crate::error::SmuError;
use crate::transport::{trim_response, Transport};

const OPEN_TIMEOUT: Duration = Duration::from_secs(1);
/// Session timeout while reads block; a timed out read is simply retried.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// GPIB/USB/LAN instrument reached through the system VISA library.
pub struct VisaTransport {
    // Keep the resource manager alive for as long as the session is open.
    _rm: DefaultRM,
    instr: Instrument,
    blocking: bool,
}

fn visa_to_io(e: visa_rs::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{:?}", e))
}

/// visa-rs wraps `VI_ERROR_TMO` into an `io::ErrorKind::Other`.
fn is_visa_timeout(e: &io::Error) -> bool {
    let text = format!("{:?}", e);
    text.contains("ErrorTmo") || text.contains("TMO")
}

/// Session I/O timeout in milliseconds, at least 1 so VISA never returns immediately.
fn timeout_ms(timeout: Option<Duration>) -> u32 {
    let ms = timeout.unwrap_or(IDLE_POLL).as_millis();
    ms.max(1).min(u128::from(u32::max_value())) as u32
}

impl VisaTransport {
    /// Opens a resource such as `GPIB0::24::INSTR`.
    pub fn open(address: &str) -> crate::Result<Self> {
        let connection_error = |cause: io::Error| SmuError::Connection {
            address: address.to_string(),
            cause,
        };
        let rm = DefaultRM::new().map_err(|e| connection_error(visa_to_io(e)))?;
        let name = CString::new(address)
            .map_err(|_| SmuError::invalid(format!("bad VISA address {:?}", address)))?;
        let instr = rm
            .open(&name.into(), AccessMode::NO_LOCK, OPEN_TIMEOUT)
            .map_err(|e| connection_error(visa_to_io(e)))?;
        debug!("opened VISA resource {}", address);
        let mut transport = VisaTransport {
            _rm: rm,
            instr,
            blocking: false,
        };
        transport
            .set_timeout(Some(IDLE_POLL))
            .map_err(connection_error)?;
        Ok(transport)
    }

    /// Every `?*INSTR` resource the VISA library can see.
    pub fn list() -> crate::Result<Vec<String>> {
        let rm = DefaultRM::new().map_err(visa_to_io)?;
        let expr = CString::new("?*INSTR")?.into();
        let mut list = rm.find_res_list(&expr).map_err(visa_to_io)?;
        let mut names = Vec::new();
        while let Some(name) = list.find_next().map_err(visa_to_io)? {
            names.push(name.to_string());
        }
        Ok(names)
    }
}

impl Transport for VisaTransport {
    fn write(&mut self, command: &str) -> io::Result<()> {
        self.instr.write_all(command.as_bytes())?;
        self.instr.write_all(b"\n")
    }

    fn read(&mut self) -> io::Result<String> {
        loop {
            let mut line = String::new();
            let result = {
                let mut reader = BufReader::new(&self.instr);
                reader.read_line(&mut line)
            };
            match result {
                Ok(_) => return Ok(trim_response(&line)),
                Err(ref e) if is_visa_timeout(e) && self.blocking => continue,
                Err(ref e) if is_visa_timeout(e) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, e.to_string()))
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let ms = timeout_ms(timeout);
        let attr = AttrTmoValue::new_checked(ms).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("VISA rejects a {} ms timeout", ms),
            )
        })?;
        self.instr.set_attr(attr).map_err(visa_to_io)?;
        self.blocking = timeout.is_none();
        Ok(())
    }
}
