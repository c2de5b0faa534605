use std::fmt;
use std::io;

use failure::Fail;

/// Error-queue entries drained from the instrument, in the order they were read.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorQueue(pub Vec<String>);

impl fmt::Display for ErrorQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(-s): {}", self.0.len(), self.0.join("; "))
    }
}

/// Failure kinds surfaced by the driver, the waveform builder and the trace parser.
///
/// Everything in the crate returns `crate::Result`, so callers that care about the
/// kind recover it with `error.downcast_ref::<SmuError>()`.
#[derive(Debug, Fail)]
pub enum SmuError {
    #[fail(display = "can't open instrument {}: {}", address, cause)]
    Connection {
        address: String,
        #[cause]
        cause: io::Error,
    },

    #[fail(display = "I/O failure on `{}`: {}", command, cause)]
    Transport {
        command: String,
        #[cause]
        cause: io::Error,
    },

    /// Messages are kept in the order the instrument returned them.
    #[fail(display = "instrument reported {}", _0)]
    Instrument(ErrorQueue),

    #[fail(display = "malformed instrument response: {}", _0)]
    Parse(String),

    #[fail(display = "invalid parameter: {}", _0)]
    InvalidParameter(String),

    #[fail(display = "no operation-complete reply within {:?}", _0)]
    Timeout(std::time::Duration),
}

impl SmuError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        SmuError::InvalidParameter(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        SmuError::Parse(msg.into())
    }

    pub fn messages(&self) -> &[String] {
        match self {
            SmuError::Instrument(queue) => &queue.0,
            _ => &[],
        }
    }
}
