mod mock;
#[cfg(feature = "serial")]
mod serial;
mod sim;
#[cfg(feature = "visa")]
mod visa;

use std::io;
use std::time::Duration;

pub use self::mock::ScriptedTransport;
#[cfg(feature = "serial")]
pub use self::serial::SerialTransport;
pub use self::sim::SimulatedSmu;
#[cfg(feature = "visa")]
pub use self::visa::VisaTransport;

/// Line-oriented command channel to an instrument.
///
/// `read` returns one response line without its terminator. A read that runs out
/// of time fails with `io::ErrorKind::TimedOut` (or `WouldBlock`) so callers can
/// tell a slow instrument from a broken link.
pub trait Transport {
    fn write(&mut self, command: &str) -> io::Result<()>;
    fn read(&mut self) -> io::Result<String>;

    /// `None` blocks reads until a line arrives.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, command: &str) -> io::Result<()> {
        (**self).write(command)
    }

    fn read(&mut self) -> io::Result<String> {
        (**self).read()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }
}

pub fn is_timeout(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => true,
        _ => false,
    }
}

/// Strip the line terminator an instrument appends to every response.
pub fn trim_response(line: &str) -> String {
    line.trim_end_matches(|c| c == '\n' || c == '\r').to_string()
}
