use std::path::PathBuf;
use std::time::Duration;

use log::LevelFilter;
use simplelog::{Config, TerminalMode};
use structopt::StructOpt;

use crate::error::SmuError;
use crate::pund::switched_polarization;
use crate::smu::{SenseConfig, SenseRange, Smu, WaitPolicy};
use crate::trace::TraceData;
use crate::transport::{SimulatedSmu, Transport};
use crate::util::Engineering;
use crate::waveform::{self, PundParams};
use crate::Result;

const SIMULATOR_LOAD_OHMS: f64 = 1.0e6;
const SIMULATOR_COERCIVE_V: f64 = 1.0;
const SIMULATOR_SWITCHED_CHARGE: f64 = 1e-9;

#[derive(StructOpt, Debug)]
pub struct SenseOpt {
    /// Fixed current range, amps
    #[structopt(long = "range", default_value = "1e-3")]
    pub range: f64,
    /// Let the instrument pick the current range
    #[structopt(long = "autorange")]
    pub autorange: bool,
    /// Current compliance, amps
    #[structopt(long = "compliance")]
    pub compliance: Option<f64>,
    /// Integration time in power line cycles
    #[structopt(long = "nplc", default_value = "0.01")]
    pub nplc: f64,
}

impl SenseOpt {
    pub fn config(&self) -> SenseConfig {
        SenseConfig {
            range: if self.autorange {
                SenseRange::Auto
            } else {
                SenseRange::Fixed(self.range)
            },
            compliance: self.compliance,
            nplc: self.nplc,
        }
    }
}

#[derive(StructOpt, Debug)]
pub struct IvOpt {
    #[structopt(flatten)]
    pub sense: SenseOpt,
    #[structopt(long = "start", default_value = "-1", allow_hyphen_values = true)]
    pub start: f64,
    #[structopt(long = "stop", default_value = "1", allow_hyphen_values = true)]
    pub stop: f64,
    #[structopt(long = "steps", default_value = "20")]
    pub steps: usize,
    /// Seconds between setting a voltage and measuring
    #[structopt(long = "delay", default_value = "0.1")]
    pub delay: f64,
    /// Trace file; `.gz` compresses it
    #[structopt(short = "o", long = "out", parse(from_os_str))]
    pub out: Option<PathBuf>,
}

#[derive(StructOpt, Debug)]
pub struct PundOpt {
    #[structopt(flatten)]
    pub sense: SenseOpt,
    #[structopt(long = "vf", default_value = "-3", allow_hyphen_values = true)]
    pub vf: f64,
    #[structopt(long = "vs", default_value = "3", allow_hyphen_values = true)]
    pub vs: f64,
    #[structopt(long = "rise", default_value = "20")]
    pub rise: f64,
    #[structopt(long = "hold", default_value = "10")]
    pub hold: f64,
    #[structopt(long = "space", default_value = "10")]
    pub space: f64,
    #[structopt(long = "step", default_value = "1")]
    pub step: f64,
    #[structopt(long = "cycles", default_value = "2")]
    pub cycles: usize,
    /// Source delay per point, seconds
    #[structopt(long = "delay", default_value = "0")]
    pub delay: f64,
    /// Electrode area, cm²
    #[structopt(long = "area", default_value = "4e-4")]
    pub area: f64,
    /// Trace file; `.gz` compresses it
    #[structopt(short = "o", long = "out", parse(from_os_str))]
    pub out: Option<PathBuf>,
    /// Polarisation loop file
    #[structopt(long = "loop-out", parse(from_os_str))]
    pub loop_out: Option<PathBuf>,
}

impl PundOpt {
    pub fn params(&self) -> PundParams {
        PundParams {
            vf: self.vf,
            vs: self.vs,
            step: self.step,
            rise: self.rise,
            hold: self.hold,
            space: self.space,
            n_cycles: self.cycles,
        }
    }
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Staircase DC IV sweep
    #[structopt(name = "iv")]
    Iv(IvOpt),
    /// PUND list sweep and switched polarisation
    #[structopt(name = "pund")]
    Pund(PundOpt),
    /// Print the instrument identity
    #[structopt(name = "id")]
    Id,
    /// List reachable instruments
    #[structopt(name = "list")]
    List,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "smu-tracer")]
pub struct CliOpt {
    /// VISA resource, serial port (`/dev/ttyUSB0@9600`, `COM3`, `ASRL1::INSTR`)
    /// or `sim[:ohms]`
    #[structopt(short = "a", long = "address", default_value = "GPIB0::24::INSTR")]
    pub address: String,
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,
    /// Give up on a sweep after this many seconds
    #[structopt(long = "wait-timeout")]
    pub wait_timeout: Option<f64>,
    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq)]
enum AddressKind {
    Simulator(f64),
    Serial,
    Visa,
}

fn address_kind(address: &str) -> Result<AddressKind> {
    if address == "sim" {
        return Ok(AddressKind::Simulator(SIMULATOR_LOAD_OHMS));
    }
    if let Some(ohms) = address.strip_prefix("sim:") {
        let ohms = ohms
            .parse::<f64>()
            .map_err(|_| SmuError::invalid(format!("bad simulator load {:?}", ohms)))?;
        if !(ohms.is_finite() && ohms > 0.0) {
            return Err(SmuError::invalid(format!(
                "simulator load must be positive, got {}",
                ohms
            ))
            .into());
        }
        return Ok(AddressKind::Simulator(ohms));
    }
    if address.starts_with("ASRL") || address.starts_with("/dev/") || address.starts_with("COM")
    {
        return Ok(AddressKind::Serial);
    }
    Ok(AddressKind::Visa)
}

#[cfg(not(all(feature = "serial", feature = "visa")))]
fn unsupported(address: &str, feature: &str) -> failure::Error {
    SmuError::Connection {
        address: address.to_string(),
        cause: std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("built without the `{}` feature", feature),
        ),
    }
    .into()
}

#[cfg(feature = "serial")]
fn open_serial(address: &str) -> Result<Box<dyn Transport>> {
    Ok(Box::new(crate::transport::SerialTransport::open(address)?))
}

#[cfg(not(feature = "serial"))]
fn open_serial(address: &str) -> Result<Box<dyn Transport>> {
    Err(unsupported(address, "serial"))
}

#[cfg(feature = "visa")]
fn open_visa(address: &str) -> Result<Box<dyn Transport>> {
    Ok(Box::new(crate::transport::VisaTransport::open(address)?))
}

#[cfg(not(feature = "visa"))]
fn open_visa(address: &str) -> Result<Box<dyn Transport>> {
    Err(unsupported(address, "visa"))
}

/// Opens whatever kind of channel `address` names.
pub fn open_transport(address: &str) -> Result<Box<dyn Transport>> {
    match address_kind(address)? {
        AddressKind::Simulator(ohms) => Ok(Box::new(
            SimulatedSmu::new(ohms)
                .with_ferroelectric(SIMULATOR_COERCIVE_V, SIMULATOR_SWITCHED_CHARGE),
        )),
        AddressKind::Serial => open_serial(address),
        AddressKind::Visa => open_visa(address),
    }
}

/// Every address `open_transport` could be given on this machine.
pub fn list_resources() -> Vec<String> {
    let mut found = vec!["sim".to_string()];
    #[cfg(feature = "serial")]
    match crate::transport::SerialTransport::list() {
        Ok(ports) => found.extend(ports),
        Err(e) => warn!("can't enumerate serial ports: {}", e),
    }
    #[cfg(feature = "visa")]
    match crate::transport::VisaTransport::list() {
        Ok(resources) => found.extend(resources),
        Err(e) => warn!("can't enumerate VISA resources: {}", e),
    }
    found
}

fn log_trace_summary(trace: &TraceData) {
    let (i_min, i_max) = trace
        .current
        .iter()
        .fold((std::f64::INFINITY, std::f64::NEG_INFINITY), |(lo, hi), &i| {
            (lo.min(i), hi.max(i))
        });
    if trace.is_empty() {
        warn!("instrument returned no readings");
    } else {
        info!(
            "{} points, I from {}A to {}A",
            trace.len(),
            Engineering(i_min),
            Engineering(i_max)
        );
    }
}

/// `p` is already in µC/cm², so it is printed without an SI prefix.
fn polarization_summary(p: f64) -> String {
    format!("max 2P = {:.3} µC/cm²", p)
}

impl CliOpt {
    pub fn initialize_logging(&self) -> Result<()> {
        let level = if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        simplelog::TermLogger::init(level, Config::default(), TerminalMode::Mixed)
            .map_err(|e| failure::err_msg(format!("can't initialize logging: {:?}", e)))?;
        Ok(())
    }

    pub fn wait_policy(&self) -> Result<WaitPolicy> {
        match self.wait_timeout {
            None => Ok(WaitPolicy::indefinite()),
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                Ok(WaitPolicy::with_timeout(Duration::from_secs_f64(secs)))
            }
            Some(secs) => Err(SmuError::invalid(format!(
                "wait timeout must be positive, got {}",
                secs
            ))
            .into()),
        }
    }

    fn connect(&self) -> Result<Smu<Box<dyn Transport>>> {
        let transport = open_transport(&self.address)?;
        Ok(Smu::connect(transport)?.with_wait_policy(self.wait_policy()?))
    }

    pub fn run(&self) -> Result<()> {
        match &self.command {
            Command::List => {
                for resource in list_resources() {
                    println!("{}", resource);
                }
                Ok(())
            }
            Command::Id => {
                let smu = self.connect()?;
                println!("{}", smu.identity());
                smu.disconnect()?;
                Ok(())
            }
            Command::Iv(opt) => self.run_iv(opt),
            Command::Pund(opt) => self.run_pund(opt),
        }
    }

    fn run_iv(&self, opt: &IvOpt) -> Result<()> {
        let mut smu = self.connect()?;
        smu.configure_sense(&opt.sense.config())?;
        smu.configure_staircase_sweep(opt.start, opt.stop, opt.steps, opt.delay)?;
        let trace = {
            info_time!("IV sweep of {} points", opt.steps);
            smu.run()?
        };
        smu.disconnect()?;

        log_trace_summary(&trace);
        if let Some(out) = &opt.out {
            trace.save_as_csv(out)?;
            info!("saved {}", out.display());
        }
        Ok(())
    }

    fn run_pund(&self, opt: &PundOpt) -> Result<()> {
        let params = opt.params();
        let program = waveform::cycles(&params)?;
        info!(
            "PUND program: {} points over {} cycle(-s)",
            program.len(),
            params.n_cycles
        );

        let mut smu = self.connect()?;
        smu.configure_sense(&opt.sense.config())?;
        smu.configure_list_sweep(&program, opt.delay)?;
        let trace = {
            info_time!("PUND sweep of {} points", program.len());
            smu.run()?
        };
        smu.disconnect()?;

        log_trace_summary(&trace);
        if let Some(out) = &opt.out {
            trace.save_as_csv(out)?;
            info!("saved {}", out.display());
        }

        let hysteresis = switched_polarization(&trace, params.n_cycles, opt.area)?;
        match hysteresis.max_polarization() {
            Some(p) => info!("{}", polarization_summary(p)),
            None => warn!("no switching cycles found"),
        }
        if let Some(out) = &opt.loop_out {
            hysteresis.save_as_csv(out)?;
            info!("saved {}", out.display());
        }
        Ok(())
    }
}
