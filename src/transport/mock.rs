use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::transport::Transport;

/// Records every command and answers reads from a prepared queue.
///
/// An exhausted queue reads as `UnexpectedEof`, so a test that forgets a reply
/// fails instead of hanging.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    written: Vec<String>,
    responses: VecDeque<io::Result<String>>,
    timeouts: Vec<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut t = Self::new();
        for r in responses {
            t.push_response(r);
        }
        t
    }

    pub fn push_response<S: Into<String>>(&mut self, response: S) {
        self.responses.push_back(Ok(response.into()));
    }

    pub fn push_timeout(&mut self) {
        self.responses.push_back(Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "scripted read timeout",
        )));
    }

    pub fn written(&self) -> &[String] {
        &self.written
    }

    pub fn clear_written(&mut self) {
        self.written.clear();
    }

    pub fn timeouts(&self) -> &[Option<Duration>] {
        &self.timeouts
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, command: &str) -> io::Result<()> {
        self.written.push(command.to_string());
        Ok(())
    }

    fn read(&mut self) -> io::Result<String> {
        self.responses.pop_front().unwrap_or_else(|| {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no scripted response left",
            ))
        })
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeouts.push(timeout);
        Ok(())
    }
}
