//! SCPI driver for a voltage-sourcing, current-measuring SMU.
//!
//! The driver owns its transport. A typical run is
//! `connect → configure_sense → configure_*_sweep → enable_output →
//! trigger_measurement → wait_for_completion → disable_output →
//! check_for_errors → get_traces`, which [`Smu::run`] strings together after
//! configuration. Calls made out of order are passed to the instrument as-is.

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use itertools::Itertools;

use crate::error::{ErrorQueue, SmuError};
use crate::trace::TraceData;
use crate::transport::{is_timeout, Transport};
use crate::Result;

/// Operands the instrument accepts in one list command.
pub const MAX_LIST_OPERANDS: usize = 100;
/// Largest trigger count the instrument accepts, hence the longest sweep.
pub const MAX_TRIGGER_COUNT: usize = 2500;
/// Lower bound of the integration time, in power line cycles.
pub const MIN_NPLC: f64 = 0.01;
/// Source range and protection programmed for list sweeps, volts.
pub const LIST_SWEEP_VOLTAGE_LIMIT: f64 = 10.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SmuState {
    Disconnected,
    Connected,
    Configured,
    Armed,
    Measuring,
    Idle,
}

impl Display for SmuState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SmuState::Disconnected => "disconnected",
            SmuState::Connected => "connected",
            SmuState::Configured => "configured",
            SmuState::Armed => "armed",
            SmuState::Measuring => "measuring",
            SmuState::Idle => "idle",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SenseRange {
    Auto,
    /// Fixed current range, amps.
    Fixed(f64),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SenseConfig {
    pub range: SenseRange,
    /// Current protection limit, amps.
    pub compliance: Option<f64>,
    /// Integration time in power line cycles, raised to `MIN_NPLC` if lower.
    pub nplc: f64,
}

impl Default for SenseConfig {
    fn default() -> Self {
        SenseConfig {
            range: SenseRange::Fixed(1e-3),
            compliance: None,
            nplc: MIN_NPLC,
        }
    }
}

/// How long `wait_for_completion` keeps polling for operation-complete.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WaitPolicy {
    /// `None` waits as long as the instrument takes.
    pub timeout: Option<Duration>,
    /// Read timeout used between deadline checks.
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub fn indefinite() -> Self {
        WaitPolicy {
            timeout: None,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        WaitPolicy {
            timeout: Some(timeout),
            ..WaitPolicy::indefinite()
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::indefinite()
    }
}

fn format_values(values: &[f64]) -> String {
    values.iter().map(f64::to_string).join(",")
}

pub struct Smu<T: Transport> {
    transport: T,
    state: SmuState,
    identity: String,
    wait_policy: WaitPolicy,
    max_list_operands: usize,
}

impl<T: Transport> Smu<T> {
    /// Runs the power-on preset over an already opened transport: identifies the
    /// instrument, silences the beeper, switches the output off, clears the
    /// reading buffer and lets reads block indefinitely.
    pub fn connect(transport: T) -> Result<Self> {
        let mut smu = Smu {
            transport,
            state: SmuState::Disconnected,
            identity: String::new(),
            wait_policy: WaitPolicy::default(),
            max_list_operands: MAX_LIST_OPERANDS,
        };

        smu.identity = smu.query("*IDN?")?;
        info!("Device {} is connected", smu.identity);

        smu.write(":SYST:BEEP:STAT OFF")?;
        smu.write("OUTP OFF")?;
        smu.write("TRAC:CLE")?;
        smu.transport
            .set_timeout(None)
            .map_err(|cause| SmuError::Transport {
                command: "<set timeout>".to_string(),
                cause,
            })?;

        smu.set_state(SmuState::Connected);
        Ok(smu)
    }

    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    pub fn with_max_list_operands(mut self, operands: usize) -> Self {
        self.max_list_operands = operands.max(1);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> SmuState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Switches the output off and hands the transport back.
    pub fn disconnect(mut self) -> Result<T> {
        self.write("OUTP OFF")?;
        self.set_state(SmuState::Disconnected);
        Ok(self.transport)
    }

    fn set_state(&mut self, state: SmuState) {
        if self.state != state {
            debug!("SMU {} -> {}", self.state, state);
            self.state = state;
        }
    }

    pub fn write(&mut self, command: &str) -> Result<()> {
        debug!("-> {}", command);
        self.transport
            .write(command)
            .map_err(|cause| SmuError::Transport {
                command: command.to_string(),
                cause,
            })?;
        Ok(())
    }

    pub fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        let response = self.transport.read().map_err(|cause| SmuError::Transport {
            command: command.to_string(),
            cause,
        })?;
        debug!("<- {}", response);
        Ok(response)
    }

    fn query_count(&mut self, command: &str) -> Result<usize> {
        let response = self.query(command)?;
        let trimmed = response.trim();
        if let Ok(count) = trimmed.parse::<usize>() {
            return Ok(count);
        }
        // Some firmware answers counts in NR3 form, e.g. `+2.000000E+00`.
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => Ok(v as usize),
            _ => Err(SmuError::parse(format!("`{}` answered {:?}", command, response)).into()),
        }
    }

    pub fn configure_sense(&mut self, config: &SenseConfig) -> Result<()> {
        if let SenseRange::Fixed(range) = config.range {
            if !(range.is_finite() && range > 0.0) {
                return Err(SmuError::invalid(format!(
                    "current range must be positive, got {}",
                    range
                ))
                .into());
            }
        }
        if let Some(compliance) = config.compliance {
            if !(compliance.is_finite() && compliance > 0.0) {
                return Err(SmuError::invalid(format!(
                    "compliance must be positive, got {}",
                    compliance
                ))
                .into());
            }
        }

        self.write("SENS:FUNC:CONC OFF")?;
        self.write("SENS:FUNC:ON \"CURR\"")?;
        if let Some(compliance) = config.compliance {
            self.write(&format!("SENS:CURR:PROT {}", compliance))?;
        }
        match config.range {
            SenseRange::Auto => self.write("SENS:CURR:RANG:AUTO 1")?,
            SenseRange::Fixed(range) => {
                self.write("SENS:CURR:RANG:AUTO 0")?;
                self.write(&format!("SENS:CURR:RANG {}", range))?;
            }
        }
        let nplc = if config.nplc.is_finite() {
            config.nplc.max(MIN_NPLC)
        } else {
            MIN_NPLC
        };
        self.write(&format!("SENS:CURR:NPLC {}", nplc))?;

        self.set_state(SmuState::Configured);
        Ok(())
    }

    /// Linear sweep from `start` to `stop` volts over `steps` points, waiting
    /// `delay` seconds between sourcing and measuring each point.
    pub fn configure_staircase_sweep(
        &mut self,
        start: f64,
        stop: f64,
        steps: usize,
        delay: f64,
    ) -> Result<()> {
        if steps == 0 {
            return Err(SmuError::invalid("a sweep needs at least one step").into());
        }
        if !(start.is_finite() && stop.is_finite()) {
            return Err(SmuError::invalid("sweep bounds must be finite").into());
        }
        check_delay(delay)?;

        self.write("SOUR:FUNC VOLT")?;
        self.write(&format!(":SOUR:VOLT:STAR {}", start))?;
        self.write(&format!("SOUR:VOLT:STOP {}", stop))?;
        self.write(":SOUR:VOLT:MODE SWE")?;
        self.write(&format!("SOUR:SWE:POIN {}", steps))?;
        self.write("SOUR:SWE:RANG BEST")?;

        self.write(&format!("TRIG:COUN {}", steps))?;
        self.write(&format!("SOUR:DEL {}", delay))?;

        self.set_state(SmuState::Configured);
        Ok(())
    }

    /// Uploads an arbitrary voltage sequence, split into commands of at most
    /// `max_list_operands` values. Auto-delay and auto-zero are switched off so
    /// every point takes the same time.
    pub fn configure_list_sweep(&mut self, waveform: &[f64], delay: f64) -> Result<()> {
        if waveform.is_empty() {
            return Err(SmuError::invalid("list sweep needs at least one point").into());
        }
        if let Some(v) = waveform.iter().find(|v| !v.is_finite()) {
            return Err(SmuError::invalid(format!("list sweep point {} is not finite", v)).into());
        }
        check_delay(delay)?;

        self.write("SOUR:FUNC VOLT")?;
        self.write(":SOUR:VOLT:MODE LIST")?;

        let mut chunks = waveform.chunks(self.max_list_operands);
        if let Some(first) = chunks.next() {
            self.write(&format!(":SOUR:LIST:VOLT {}", format_values(first)))?;
        }
        for chunk in chunks {
            self.write(&format!(":SOUR:LIST:VOLT:APP {}", format_values(chunk)))?;
        }

        self.write("SOUR:VOLT:RANG:AUTO 0")?;
        self.write("SOUR:SWE:RANG FIX")?;
        self.write(&format!("SOUR:VOLT:RANG {}", LIST_SWEEP_VOLTAGE_LIMIT))?;
        self.write(&format!("SOUR:VOLT:PROT {}", LIST_SWEEP_VOLTAGE_LIMIT))?;
        self.write("SOUR:DEL:AUTO OFF")?;
        self.write(&format!("SOUR:DEL {}", delay))?;
        self.write(":SYST:AZER OFF")?;
        self.write(&format!(":TRIG:COUN {}", waveform.len()))?;

        self.set_state(SmuState::Configured);
        Ok(())
    }

    pub fn trigger_count(&mut self) -> Result<usize> {
        self.query_count("TRIG:COUN?")
    }

    pub fn enable_output(&mut self) -> Result<()> {
        self.write("OUTP ON")?;
        self.set_state(SmuState::Armed);
        Ok(())
    }

    /// Call `wait_for_completion` first: switching off mid-sweep truncates the buffer.
    pub fn disable_output(&mut self) -> Result<()> {
        if self.state == SmuState::Measuring {
            warn!("Output disabled before the measurement completed, the trace may be truncated");
        }
        self.write("OUTP OFF")?;
        self.set_state(SmuState::Idle);
        Ok(())
    }

    pub fn set_display(&mut self, enabled: bool) -> Result<()> {
        self.write(if enabled { ":DISP:ENAB ON" } else { ":DISP:ENAB OFF" })
    }

    /// Resets the timestamp and starts acquisition without waiting for it.
    pub fn trigger_measurement(&mut self) -> Result<()> {
        self.write("SYST:TIME:RES")?;
        self.write("INIT")?;
        self.set_state(SmuState::Measuring);
        Ok(())
    }

    /// Blocks until the instrument answers `*OPC?`, retrying reads that time out.
    pub fn wait_for_completion(&mut self) -> Result<()> {
        let policy = self.wait_policy;
        self.write("*OPC?")?;

        let started = Instant::now();
        let deadline = policy.timeout.map(|t| started + t);
        if deadline.is_some() {
            self.set_read_timeout(Some(policy.poll_interval))?;
        }

        let outcome = loop {
            match self.transport.read() {
                Ok(response) => {
                    debug!("<- {} after {:?}", response, started.elapsed());
                    break Ok(());
                }
                Err(ref e) if is_timeout(e) => {
                    if let (Some(deadline), Some(timeout)) = (deadline, policy.timeout) {
                        if Instant::now() >= deadline {
                            break Err(SmuError::Timeout(timeout));
                        }
                    }
                    debug!("still waiting for operation complete ({:?})", started.elapsed());
                }
                Err(cause) => {
                    break Err(SmuError::Transport {
                        command: "*OPC?".to_string(),
                        cause,
                    })
                }
            }
        };

        if deadline.is_some() {
            self.set_read_timeout(None)?;
        }
        outcome?;
        if self.state == SmuState::Measuring {
            self.set_state(SmuState::Armed);
        }
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.transport
            .set_timeout(timeout)
            .map_err(|cause| SmuError::Transport {
                command: "<set timeout>".to_string(),
                cause,
            })?;
        Ok(())
    }

    /// Drains the error queue and fails with every message in it, in the order
    /// the instrument hands them out.
    pub fn check_for_errors(&mut self) -> Result<()> {
        let count = self.query_count("SYST:ERR:COUN?")?;
        if count == 0 {
            return Ok(());
        }

        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            messages.push(self.query("SYST:ERR:NEXT?")?);
        }
        for message in &messages {
            warn!("SMU error: {}", message);
        }
        Err(SmuError::Instrument(ErrorQueue(messages)).into())
    }

    pub fn get_traces(&mut self) -> Result<TraceData> {
        self.write("FORM:ELEM TIME, VOLT, CURR")?;
        let response = self.query("FETC?")?;
        let trace = TraceData::from_fetch(&response)?;
        debug!("fetched {} point(-s)", trace.len());
        Ok(trace)
    }

    /// Runs an already configured sweep: output on, trigger, wait, output off,
    /// check the error queue and fetch the buffer.
    pub fn run(&mut self) -> Result<TraceData> {
        self.enable_output()?;
        self.trigger_measurement()?;
        let waited = self.wait_for_completion();
        self.disable_output()?;
        waited?;
        self.check_for_errors()?;
        self.get_traces()
    }
}

fn check_delay(delay: f64) -> Result<()> {
    if !(delay.is_finite() && delay >= 0.0) {
        return Err(SmuError::invalid(format!("delay must be non-negative, got {}", delay)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedTransport, SimulatedSmu};
    use crate::waveform::{self, PundParams};
    use approx::assert_relative_eq;

    fn connected() -> Smu<ScriptedTransport> {
        let mut smu =
            Smu::connect(ScriptedTransport::with_responses(vec!["KEITHLEY,2400,1,C30"])).unwrap();
        smu.transport_mut().clear_written();
        smu
    }

    fn kind(err: &failure::Error) -> &SmuError {
        err.downcast_ref::<SmuError>().expect("not an SmuError")
    }

    #[test]
    fn connect_runs_preset() {
        let smu =
            Smu::connect(ScriptedTransport::with_responses(vec!["KEITHLEY,2400,1,C30"])).unwrap();
        assert_eq!(smu.identity(), "KEITHLEY,2400,1,C30");
        assert_eq!(smu.state(), SmuState::Connected);
        assert_eq!(
            smu.transport().written(),
            &["*IDN?", ":SYST:BEEP:STAT OFF", "OUTP OFF", "TRAC:CLE"]
        );
        assert_eq!(smu.transport().timeouts(), &[None]);
    }

    #[test]
    fn connect_fails_without_identity() {
        let err = Smu::connect(ScriptedTransport::new()).err().unwrap();
        match kind(&err) {
            SmuError::Transport { command, .. } => assert_eq!(command, "*IDN?"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fixed_range_sense_with_compliance() {
        let mut smu = connected();
        smu.configure_sense(&SenseConfig {
            range: SenseRange::Fixed(1e-9),
            compliance: Some(1e-9),
            nplc: 0.1,
        })
        .unwrap();
        assert_eq!(
            smu.transport().written(),
            &[
                "SENS:FUNC:CONC OFF",
                "SENS:FUNC:ON \"CURR\"",
                "SENS:CURR:PROT 0.000000001",
                "SENS:CURR:RANG:AUTO 0",
                "SENS:CURR:RANG 0.000000001",
                "SENS:CURR:NPLC 0.1",
            ]
        );
        assert_eq!(smu.state(), SmuState::Configured);
    }

    #[test]
    fn autorange_sense_floors_nplc() {
        let mut smu = connected();
        smu.configure_sense(&SenseConfig {
            range: SenseRange::Auto,
            compliance: None,
            nplc: 0.001,
        })
        .unwrap();
        assert_eq!(
            smu.transport().written(),
            &[
                "SENS:FUNC:CONC OFF",
                "SENS:FUNC:ON \"CURR\"",
                "SENS:CURR:RANG:AUTO 1",
                "SENS:CURR:NPLC 0.01",
            ]
        );
    }

    #[test]
    fn negative_range_is_rejected_before_any_write() {
        let mut smu = connected();
        let err = smu
            .configure_sense(&SenseConfig {
                range: SenseRange::Fixed(-1.0),
                ..SenseConfig::default()
            })
            .unwrap_err();
        match kind(&err) {
            SmuError::InvalidParameter(_) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(smu.transport().written().is_empty());
    }

    #[test]
    fn staircase_sweep_commands() {
        let mut smu = connected();
        smu.configure_staircase_sweep(-1.0, 1.0, 20, 1.0).unwrap();
        assert_eq!(
            smu.transport().written(),
            &[
                "SOUR:FUNC VOLT",
                ":SOUR:VOLT:STAR -1",
                "SOUR:VOLT:STOP 1",
                ":SOUR:VOLT:MODE SWE",
                "SOUR:SWE:POIN 20",
                "SOUR:SWE:RANG BEST",
                "TRIG:COUN 20",
                "SOUR:DEL 1",
            ]
        );
    }

    #[test]
    fn staircase_sweep_needs_a_step() {
        let mut smu = connected();
        assert!(smu.configure_staircase_sweep(-1.0, 1.0, 0, 0.1).is_err());
        assert!(smu.configure_staircase_sweep(-1.0, 1.0, 2, -0.1).is_err());
    }

    #[test]
    fn list_sweep_is_uploaded_in_chunks_of_one_hundred() {
        let mut smu = connected();
        let waveform: Vec<f64> = (0..250).map(|k| k as f64 / 100.0).collect();
        smu.configure_list_sweep(&waveform, 0.0).unwrap();

        let written = smu.transport().written();
        let uploads: Vec<&String> = written
            .iter()
            .filter(|c| c.starts_with(":SOUR:LIST:VOLT"))
            .collect();
        assert_eq!(uploads.len(), 3);
        assert!(uploads[0].starts_with(":SOUR:LIST:VOLT 0,"));
        assert!(uploads[1].starts_with(":SOUR:LIST:VOLT:APP 1,"));
        assert!(uploads[2].starts_with(":SOUR:LIST:VOLT:APP 2,"));

        let mut uploaded = Vec::new();
        for (upload, expected_len) in uploads.iter().zip(&[100, 100, 50]) {
            let values: Vec<f64> = upload
                .splitn(2, ' ')
                .nth(1)
                .unwrap()
                .split(',')
                .map(|t| t.parse().unwrap())
                .collect();
            assert_eq!(values.len(), *expected_len);
            uploaded.extend(values);
        }
        assert_eq!(uploaded, waveform);

        assert_eq!(written[0], "SOUR:FUNC VOLT");
        assert_eq!(written[1], ":SOUR:VOLT:MODE LIST");
        assert_eq!(
            &written[5..],
            &[
                "SOUR:VOLT:RANG:AUTO 0",
                "SOUR:SWE:RANG FIX",
                "SOUR:VOLT:RANG 10",
                "SOUR:VOLT:PROT 10",
                "SOUR:DEL:AUTO OFF",
                "SOUR:DEL 0",
                ":SYST:AZER OFF",
                ":TRIG:COUN 250",
            ]
        );
    }

    #[test]
    fn short_list_is_a_single_set_command() {
        let mut smu = connected();
        smu.configure_list_sweep(&[0.0, 1.5, -1.5], 0.002).unwrap();
        let written = smu.transport().written();
        assert_eq!(written[2], ":SOUR:LIST:VOLT 0,1.5,-1.5");
        assert!(!written.iter().any(|c| c.contains("APP")));
        assert!(written.iter().any(|c| c == "SOUR:DEL 0.002"));
    }

    #[test]
    fn empty_list_is_rejected() {
        let mut smu = connected();
        let err = smu.configure_list_sweep(&[], 0.0).unwrap_err();
        match kind(&err) {
            SmuError::InvalidParameter(_) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wait_retries_read_timeouts() {
        let mut smu = connected();
        smu.transport_mut().push_timeout();
        smu.transport_mut().push_timeout();
        smu.transport_mut().push_response("1");
        smu.wait_for_completion().unwrap();
        assert_eq!(smu.transport().written(), &["*OPC?"]);
        assert_eq!(smu.transport().pending_responses(), 0);
    }

    #[test]
    fn wait_gives_up_after_timeout() {
        let mut smu = connected().with_wait_policy(WaitPolicy {
            timeout: Some(Duration::from_millis(0)),
            poll_interval: Duration::from_millis(10),
        });
        smu.transport_mut().push_timeout();
        smu.transport_mut().push_response("1");
        let err = smu.wait_for_completion().unwrap_err();
        match kind(&err) {
            SmuError::Timeout(_) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            smu.transport().timeouts(),
            &[None, Some(Duration::from_millis(10)), None]
        );
    }

    #[test]
    fn wait_propagates_broken_link() {
        let mut smu = connected();
        let err = smu.wait_for_completion().unwrap_err();
        match kind(&err) {
            SmuError::Transport { command, .. } => assert_eq!(command, "*OPC?"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_error_queue_passes() {
        let mut smu = connected();
        smu.transport_mut().push_response("0");
        smu.check_for_errors().unwrap();
        assert_eq!(smu.transport().written(), &["SYST:ERR:COUN?"]);
    }

    #[test]
    fn error_queue_is_drained_in_received_order() {
        let mut smu = connected();
        smu.transport_mut().push_response("2");
        smu.transport_mut().push_response("-221,\"Settings conflict\"");
        smu.transport_mut().push_response("-113,\"Undefined header\"");
        let err = smu.check_for_errors().unwrap_err();
        assert_eq!(
            kind(&err).messages(),
            &["-221,\"Settings conflict\"", "-113,\"Undefined header\""]
        );
        assert_eq!(
            smu.transport().written(),
            &["SYST:ERR:COUN?", "SYST:ERR:NEXT?", "SYST:ERR:NEXT?"]
        );
        assert_eq!(smu.transport().pending_responses(), 0);
    }

    #[test]
    fn unreadable_error_count_is_a_parse_error() {
        let mut smu = connected();
        smu.transport_mut().push_response("many");
        let err = smu.check_for_errors().unwrap_err();
        match kind(&err) {
            SmuError::Parse(_) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn negative_or_fractional_error_count_is_a_parse_error() {
        for reply in &["-1", "2.7", "nan"] {
            let mut smu = connected();
            smu.transport_mut().push_response(*reply);
            let err = smu.check_for_errors().unwrap_err();
            match kind(&err) {
                SmuError::Parse(_) => {}
                other => panic!("{:?} gave {:?}", reply, other),
            }
        }
    }

    #[test]
    fn scientific_error_count_is_accepted() {
        let mut smu = connected();
        smu.transport_mut().push_response("+1.000000E+00");
        smu.transport_mut().push_response("-113,\"Undefined header\"");
        let err = smu.check_for_errors().unwrap_err();
        assert_eq!(kind(&err).messages().len(), 1);
    }

    #[test]
    fn traces_are_fetched_and_split() {
        let mut smu = connected();
        smu.transport_mut()
            .push_response("0.1,1e-6,0.0,0.2,2e-6,0.001");
        let trace = smu.get_traces().unwrap();
        assert_eq!(
            smu.transport().written(),
            &["FORM:ELEM TIME, VOLT, CURR", "FETC?"]
        );
        assert_eq!(trace.voltage, vec![0.1, 0.2]);
        assert_eq!(trace.current, vec![1e-6, 2e-6]);
        assert_eq!(trace.time, vec![0.0, 0.001]);
    }

    #[test]
    fn disable_output_and_display() {
        let mut smu = connected();
        smu.enable_output().unwrap();
        assert_eq!(smu.state(), SmuState::Armed);
        smu.disable_output().unwrap();
        assert_eq!(smu.state(), SmuState::Idle);
        smu.set_display(false).unwrap();
        assert_eq!(
            smu.transport().written(),
            &["OUTP ON", "OUTP OFF", ":DISP:ENAB OFF"]
        );
    }

    #[test]
    fn staircase_trigger_count_reads_back() {
        let mut smu = Smu::connect(SimulatedSmu::default()).unwrap();
        smu.configure_staircase_sweep(-1.0, 1.0, 20, 1.0).unwrap();
        assert_eq!(smu.trigger_count().unwrap(), 20);
    }

    #[test]
    fn iv_sweep_on_simulator() {
        let mut smu = Smu::connect(SimulatedSmu::new(1.0e6)).unwrap();
        smu.configure_sense(&SenseConfig {
            range: SenseRange::Fixed(1e-5),
            compliance: Some(1e-5),
            nplc: 0.1,
        })
        .unwrap();
        smu.configure_staircase_sweep(-1.0, 1.0, 21, 0.0).unwrap();
        let trace = smu.run().unwrap();

        assert_eq!(trace.len(), 21);
        assert_relative_eq!(trace.voltage[0], -1.0);
        assert_relative_eq!(trace.voltage[20], 1.0);
        assert_relative_eq!(trace.current[20], 1e-6);
        assert_relative_eq!(trace.time[0], 0.0);
        assert!(!smu.transport().output_enabled());
        assert_eq!(smu.state(), SmuState::Idle);
    }

    #[test]
    fn repeated_runs_return_only_their_own_points() {
        let mut smu = Smu::connect(SimulatedSmu::default()).unwrap();
        smu.configure_staircase_sweep(0.0, 1.0, 3, 0.0).unwrap();
        let first = smu.run().unwrap();
        let second = smu.run().unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        assert_eq!(first.voltage, second.voltage);
        assert_relative_eq!(second.time[0], 0.0);
    }

    #[test]
    fn pund_sweep_on_simulator() {
        let params = PundParams {
            n_cycles: 1,
            ..PundParams::default()
        };
        let program = waveform::cycles(&params).unwrap();

        let mut smu = Smu::connect(SimulatedSmu::new(1.0e6).with_busy_reads(3)).unwrap();
        smu.configure_sense(&SenseConfig {
            range: SenseRange::Fixed(1e-5),
            compliance: Some(1e-5),
            nplc: 0.1,
        })
        .unwrap();
        smu.configure_list_sweep(&program, 0.0).unwrap();
        assert_eq!(smu.transport().list(), program.as_slice());

        let trace = smu.run().unwrap();
        assert_eq!(trace.len(), program.len());
        for (v, expected) in trace.voltage.iter().zip(&program) {
            assert_relative_eq!(*v, *expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn simulator_errors_surface_after_run() {
        let mut smu = Smu::connect(SimulatedSmu::default()).unwrap();
        smu.write("SENS:CURR:NPLC 100").unwrap();
        smu.write("BOGUS").unwrap();
        smu.configure_staircase_sweep(0.0, 1.0, 2, 0.0).unwrap();
        let err = smu.run().unwrap_err();
        assert_eq!(
            kind(&err).messages(),
            &["-222,\"Data out of range\"", "-113,\"Undefined header\""]
        );
    }

    #[test]
    fn disconnect_switches_output_off() {
        let mut smu = Smu::connect(SimulatedSmu::default()).unwrap();
        smu.enable_output().unwrap();
        let sim = smu.disconnect().unwrap();
        assert!(!sim.output_enabled());
    }
}
