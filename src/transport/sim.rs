use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use itertools::Itertools;
use itertools_num::linspace;

use crate::smu::{MAX_LIST_OPERANDS, MAX_TRIGGER_COUNT};
use crate::transport::Transport;

const UNDEFINED_HEADER: &str = "-113,\"Undefined header\"";
const DATA_TYPE_ERROR: &str = "-104,\"Data type error\"";
const DATA_OUT_OF_RANGE: &str = "-222,\"Data out of range\"";
const TOO_MUCH_DATA: &str = "-223,\"Too much data\"";
const SETTINGS_CONFLICT: &str = "-221,\"Settings conflict\"";

const LINE_FREQUENCY_HZ: f64 = 50.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SourceMode {
    Fixed,
    Sweep,
    List,
}

/// Polarisation state of a simulated ferroelectric capacitor.
#[derive(Copy, Clone, Debug)]
struct Ferroelectric {
    coercive_v: f64,
    switched_charge: f64,
    up: bool,
}

/// In-process stand-in for a voltage-sourcing SMU wired to a resistor.
///
/// Understands the SCPI subset the driver speaks, keeps an error queue the way the
/// real instrument does and fills its reading buffer on `INIT`. Optionally the load
/// also contains a ferroelectric capacitor that releases a burst of charge every
/// time the applied voltage crosses its coercive voltage in the opposite direction.
#[derive(Debug)]
pub struct SimulatedSmu {
    identity: String,
    load_ohms: f64,
    ferroelectric: Option<Ferroelectric>,
    output: bool,
    mode: SourceMode,
    level: f64,
    start: f64,
    stop: f64,
    sweep_points: usize,
    list: Vec<f64>,
    trigger_count: usize,
    source_delay: f64,
    nplc: f64,
    compliance: f64,
    clock: f64,
    buffer: Vec<[f64; 3]>,
    responses: VecDeque<String>,
    errors: VecDeque<String>,
    busy_reads: usize,
    pending_busy: usize,
    timeout: Option<Duration>,
}

impl SimulatedSmu {
    pub fn new(load_ohms: f64) -> Self {
        SimulatedSmu {
            identity: "SIMULATED,SMU-2400,0,1.0".to_string(),
            load_ohms,
            ferroelectric: None,
            output: false,
            mode: SourceMode::Fixed,
            level: 0.0,
            start: 0.0,
            stop: 0.0,
            sweep_points: 1,
            list: Vec::new(),
            trigger_count: 1,
            source_delay: 0.0,
            nplc: 1.0,
            compliance: 1.05e-4,
            clock: 0.0,
            buffer: Vec::new(),
            responses: VecDeque::new(),
            errors: VecDeque::new(),
            busy_reads: 0,
            pending_busy: 0,
            timeout: None,
        }
    }

    /// Adds a ferroelectric capacitor in parallel with the resistive load.
    pub fn with_ferroelectric(mut self, coercive_v: f64, switched_charge: f64) -> Self {
        self.ferroelectric = Some(Ferroelectric {
            coercive_v: coercive_v.abs(),
            switched_charge,
            up: false,
        });
        self
    }

    /// Makes each `*OPC?` time out this many reads before answering.
    pub fn with_busy_reads(mut self, reads: usize) -> Self {
        self.busy_reads = reads;
        self
    }

    pub fn output_enabled(&self) -> bool {
        self.output
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn list(&self) -> &[f64] {
        &self.list
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    fn push_error(&mut self, error: &str) {
        debug!("simulated SMU error {}", error);
        self.errors.push_back(error.to_string());
    }

    fn number(&mut self, arg: &str) -> Option<f64> {
        match arg.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                self.push_error(DATA_TYPE_ERROR);
                None
            }
        }
    }

    fn count(&mut self, arg: &str) -> Option<usize> {
        match arg.trim().parse::<usize>() {
            Ok(n) => Some(n),
            Err(_) => {
                self.push_error(DATA_TYPE_ERROR);
                None
            }
        }
    }

    fn switch(&mut self, arg: &str) -> Option<bool> {
        match arg.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" => Some(true),
            "OFF" | "0" => Some(false),
            _ => {
                self.push_error(DATA_TYPE_ERROR);
                None
            }
        }
    }

    fn keyword(&mut self, arg: &str, allowed: &[&str]) -> Option<String> {
        let word = arg.trim().trim_matches('"').to_ascii_uppercase();
        if allowed.contains(&word.as_str()) {
            Some(word)
        } else {
            self.push_error(DATA_TYPE_ERROR);
            None
        }
    }

    fn values(&mut self, arg: &str) -> Option<Vec<f64>> {
        let parsed: Result<Vec<f64>, _> = arg.split(',').map(|t| t.trim().parse::<f64>()).collect();
        match parsed {
            Ok(values) => {
                if values.len() > MAX_LIST_OPERANDS {
                    self.push_error(TOO_MUCH_DATA);
                    None
                } else {
                    Some(values)
                }
            }
            Err(_) => {
                self.push_error(DATA_TYPE_ERROR);
                None
            }
        }
    }

    fn source_points(&self) -> Vec<f64> {
        match self.mode {
            SourceMode::Fixed => vec![self.level],
            SourceMode::Sweep => linspace(self.start, self.stop, self.sweep_points.max(1)).collect_vec(),
            SourceMode::List => self.list.clone(),
        }
    }

    /// Each `INIT` overwrites the sample buffer.
    fn initiate(&mut self) {
        self.buffer.clear();
        let points = self.source_points();
        if points.is_empty() {
            self.push_error(SETTINGS_CONFLICT);
            return;
        }
        let point_time = self.source_delay + self.nplc / LINE_FREQUENCY_HZ;

        for k in 0..self.trigger_count {
            let v = if self.output { points[k % points.len()] } else { 0.0 };
            let mut i = v / self.load_ohms;

            if let Some(fe) = self.ferroelectric.as_mut() {
                if !fe.up && v > fe.coercive_v {
                    fe.up = true;
                    i += fe.switched_charge / point_time;
                } else if fe.up && v < -fe.coercive_v {
                    fe.up = false;
                    i -= fe.switched_charge / point_time;
                }
            }

            let i = i.max(-self.compliance).min(self.compliance);
            self.buffer.push([v, i, self.clock]);
            self.clock += point_time;
        }
    }

    fn fetch(&self) -> String {
        self.buffer
            .iter()
            .map(|[v, i, t]| format!("{:.6E},{:.6E},{:.6E}", v, i, t))
            .join(",")
    }

    fn execute(&mut self, header: &str, arg: &str) {
        match header {
            "*IDN?" => {
                let id = self.identity.clone();
                self.responses.push_back(id);
            }
            "*OPC?" => {
                self.pending_busy = self.busy_reads;
                self.responses.push_back("1".to_string());
            }
            "*RST" => {
                let ferroelectric = self.ferroelectric;
                let busy_reads = self.busy_reads;
                *self = SimulatedSmu::new(self.load_ohms);
                self.ferroelectric = ferroelectric;
                self.busy_reads = busy_reads;
            }
            "SYST:ERR:COUN?" => {
                let n = self.errors.len();
                self.responses.push_back(n.to_string());
            }
            "SYST:ERR:NEXT?" => {
                let next = self
                    .errors
                    .pop_front()
                    .unwrap_or_else(|| "0,\"No error\"".to_string());
                self.responses.push_back(next);
            }
            "TRIG:COUN?" => {
                let n = self.trigger_count;
                self.responses.push_back(n.to_string());
            }
            "FETC?" => {
                let data = self.fetch();
                self.responses.push_back(data);
            }
            "OUTP" => {
                if let Some(on) = self.switch(arg) {
                    self.output = on;
                }
            }
            "SYST:BEEP:STAT" | "SENS:FUNC:CONC" | "SENS:CURR:RANG:AUTO" | "SOUR:DEL:AUTO"
            | "SOUR:VOLT:RANG:AUTO" | "SYST:AZER" | "DISP:ENAB" => {
                self.switch(arg);
            }
            "TRAC:CLE" => self.buffer.clear(),
            "SYST:TIME:RES" => self.clock = 0.0,
            "INIT" => self.initiate(),
            "FORM:ELEM" => {}
            "SENS:FUNC:ON" => {
                self.keyword(arg, &["CURR", "CURR:DC"]);
            }
            "SOUR:FUNC" => {
                self.keyword(arg, &["VOLT"]);
            }
            "SOUR:SWE:RANG" => {
                self.keyword(arg, &["BEST", "AUTO", "FIX"]);
            }
            "SOUR:VOLT:MODE" => {
                if let Some(mode) = self.keyword(arg, &["FIX", "SWE", "LIST"]) {
                    self.mode = match mode.as_str() {
                        "SWE" => SourceMode::Sweep,
                        "LIST" => SourceMode::List,
                        _ => SourceMode::Fixed,
                    };
                }
            }
            "SENS:CURR:PROT" => {
                if let Some(c) = self.number(arg) {
                    self.compliance = c.abs();
                }
            }
            "SENS:CURR:RANG" | "SOUR:VOLT:RANG" | "SOUR:VOLT:PROT" => {
                self.number(arg);
            }
            "SENS:CURR:NPLC" => {
                if let Some(nplc) = self.number(arg) {
                    if nplc < 0.01 || nplc > 10.0 {
                        self.push_error(DATA_OUT_OF_RANGE);
                    } else {
                        self.nplc = nplc;
                    }
                }
            }
            "SOUR:VOLT" | "SOUR:VOLT:LEV" => {
                if let Some(v) = self.number(arg) {
                    self.level = v;
                }
            }
            "SOUR:VOLT:STAR" => {
                if let Some(v) = self.number(arg) {
                    self.start = v;
                }
            }
            "SOUR:VOLT:STOP" => {
                if let Some(v) = self.number(arg) {
                    self.stop = v;
                }
            }
            "SOUR:SWE:POIN" => {
                if let Some(n) = self.count(arg) {
                    self.sweep_points = n;
                }
            }
            "SOUR:DEL" => {
                if let Some(d) = self.number(arg) {
                    self.source_delay = d.max(0.0);
                }
            }
            "TRIG:COUN" => {
                if let Some(n) = self.count(arg) {
                    if n == 0 || n > MAX_TRIGGER_COUNT {
                        self.push_error(DATA_OUT_OF_RANGE);
                    } else {
                        self.trigger_count = n;
                    }
                }
            }
            "SOUR:LIST:VOLT" => {
                if let Some(values) = self.values(arg) {
                    self.list = values;
                }
            }
            "SOUR:LIST:VOLT:APP" => {
                if let Some(values) = self.values(arg) {
                    self.list.extend(values);
                }
            }
            _ => self.push_error(UNDEFINED_HEADER),
        }
    }
}

impl Default for SimulatedSmu {
    fn default() -> Self {
        SimulatedSmu::new(1.0e6)
    }
}

impl Transport for SimulatedSmu {
    fn write(&mut self, command: &str) -> io::Result<()> {
        let command = command.trim().trim_start_matches(':');
        let (header, arg) = match command.find(char::is_whitespace) {
            Some(ix) => (&command[..ix], command[ix..].trim()),
            None => (command, ""),
        };
        let header = header.to_ascii_uppercase();
        self.execute(&header, arg);
        Ok(())
    }

    fn read(&mut self) -> io::Result<String> {
        if self.pending_busy > 0 {
            self.pending_busy -= 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "measurement in progress"));
        }
        self.responses
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no response queued"))
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}
