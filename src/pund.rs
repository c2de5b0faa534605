//! Switched polarisation from a PUND trace.
//!
//! Within each cycle the samples above `+POLARITY_THRESHOLD` volts are the P and U
//! pulses (first and second half), the samples below the negative threshold are N
//! and D. The non-switching current of U/D is subtracted from P/N and integrated.

use std::path::Path;

use itertools::Itertools;

use crate::error::SmuError;
use crate::trace::{csv_writer_from_path, write_creating_dirs, TraceData};
use crate::Result;

/// Volts; samples closer to zero belong to the gaps between pulses.
pub const POLARITY_THRESHOLD: f64 = 0.01;

/// 2P against applied voltage, µC/cm².
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolarizationLoop {
    pub voltage: Vec<f64>,
    pub polarization: Vec<f64>,
}

impl PolarizationLoop {
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub fn max_polarization(&self) -> Option<f64> {
        self.polarization.iter().cloned().fold1(f64::max)
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (f64, f64)> + 'a {
        self.voltage
            .iter()
            .cloned()
            .zip(self.polarization.iter().cloned())
    }

    pub fn save_as_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_creating_dirs(path.as_ref(), |path| {
            let mut out = csv_writer_from_path(path)?;
            out.write_record(&["voltage", "polarization"])?;
            for (v, p) in self.iter() {
                let v_str = v.to_string();
                let p_str = p.to_string();
                out.write_record(&[v_str.as_str(), p_str.as_str()])?;
            }
            out.close()
        })
    }
}

/// First and second half of the samples selected by `keep`, or `None` when the
/// selection can't be split evenly.
fn halves<F: Fn(f64) -> bool>(voltage: &[f64], current: &[f64], keep: F) -> Option<Halves> {
    let (vs, is): (Vec<f64>, Vec<f64>) = voltage
        .iter()
        .cloned()
        .zip(current.iter().cloned())
        .filter(|(v, _)| keep(*v))
        .unzip();
    if vs.len() % 2 != 0 {
        return None;
    }
    let mid = vs.len() / 2;
    Some(Halves {
        switching_v: vs[..mid].to_vec(),
        switching_i: is[..mid].to_vec(),
        reference_i: is[mid..].to_vec(),
    })
}

struct Halves {
    switching_v: Vec<f64>,
    switching_i: Vec<f64>,
    reference_i: Vec<f64>,
}

/// `area_cm2` is the electrode area. A trace that doesn't divide into `n_cycles`
/// equal parts yields an empty loop; a cycle with an odd number of positive or
/// negative samples ends the analysis at that cycle.
pub fn switched_polarization(
    trace: &TraceData,
    n_cycles: usize,
    area_cm2: f64,
) -> Result<PolarizationLoop> {
    if n_cycles == 0 {
        return Err(SmuError::invalid("n_cycles must be at least 1").into());
    }
    if !(area_cm2.is_finite() && area_cm2 > 0.0) {
        return Err(SmuError::invalid(format!("area must be positive, got {}", area_cm2)).into());
    }

    let mut result = PolarizationLoop::default();
    if trace.is_empty() || trace.len() % n_cycles != 0 {
        warn!(
            "{} points can't be split into {} cycle(-s), skipping polarisation",
            trace.len(),
            n_cycles
        );
        return Ok(result);
    }
    let dt = match trace.mean_interval() {
        Some(dt) => dt,
        None => return Ok(result),
    };
    let scale = 1e6 * dt / area_cm2;

    let cycle_len = trace.len() / n_cycles;
    for (v, i) in trace
        .voltage
        .chunks(cycle_len)
        .zip(trace.current.chunks(cycle_len))
    {
        let positive = match halves(v, i, |v| v > POLARITY_THRESHOLD) {
            Some(h) => h,
            None => break,
        };
        let negative = match halves(v, i, |v| v < -POLARITY_THRESHOLD) {
            Some(h) => h,
            None => break,
        };

        let switching = positive.switching_i.iter().chain(&negative.switching_i);
        let reference = positive.reference_i.iter().chain(&negative.reference_i);
        let mut charge = 0.0;
        for (s, r) in switching.zip(reference) {
            charge += s - r;
            result.polarization.push(charge * scale);
        }
        result.voltage.extend(positive.switching_v);
        result.voltage.extend(negative.switching_v);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smu::{SenseConfig, SenseRange, Smu};
    use crate::transport::SimulatedSmu;
    use crate::waveform::{self, PundParams};
    use approx::assert_relative_eq;

    fn cycle_trace(cycles: usize) -> TraceData {
        let v = [0.0, 1.0, 0.0, 1.0, 0.0, -1.0, 0.0, -1.0];
        let i = [0.0, 5.0, 0.0, 1.0, 0.0, -5.0, 0.0, -1.0];
        let n = v.len() * cycles;
        TraceData::new(
            (0..n).map(|k| k as f64).collect(),
            v.iter().cloned().cycle().take(n).collect(),
            i.iter().cloned().cycle().take(n).collect(),
        )
        .unwrap()
    }

    #[test]
    fn subtracts_non_switching_current() {
        let l = switched_polarization(&cycle_trace(1), 1, 1.0).unwrap();
        assert_eq!(l.voltage, vec![1.0, -1.0]);
        assert_relative_eq!(l.polarization[0], 4e6);
        assert_relative_eq!(l.polarization[1], 0.0);
    }

    #[test]
    fn every_cycle_restarts_integration() {
        let l = switched_polarization(&cycle_trace(3), 3, 2.0).unwrap();
        assert_eq!(l.len(), 6);
        assert_relative_eq!(l.polarization[2], 2e6);
        assert_relative_eq!(l.polarization[4], 2e6);
        assert_relative_eq!(l.max_polarization().unwrap(), 2e6);
    }

    #[test]
    fn uneven_cycles_give_empty_loop() {
        let l = switched_polarization(&cycle_trace(1), 3, 1.0).unwrap();
        assert!(l.is_empty());
    }

    #[test]
    fn odd_pulse_samples_stop_the_analysis() {
        let mut trace = cycle_trace(2);
        trace.voltage[11] = 0.0;
        let l = switched_polarization(&trace, 2, 1.0).unwrap();
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn loop_is_saved_next_to_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loops").join("pund_loop.csv");
        let l = switched_polarization(&cycle_trace(1), 1, 1.0).unwrap();
        l.save_as_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["voltage\tpolarization", "1\t4000000", "-1\t0"]);
    }

    #[test]
    fn bad_area_is_rejected() {
        assert!(switched_polarization(&cycle_trace(1), 1, 0.0).is_err());
        assert!(switched_polarization(&cycle_trace(1), 0, 1.0).is_err());
    }

    #[test]
    fn simulated_ferroelectric_switches_once() {
        let params = PundParams {
            vf: -3.0,
            vs: 3.0,
            n_cycles: 1,
            ..PundParams::default()
        };
        let area = 200.0f64.powi(2) * 1e-8;
        let program = waveform::cycles(&params).unwrap();

        let sim = SimulatedSmu::new(1.0e6).with_ferroelectric(1.0, 1e-9);
        let mut smu = Smu::connect(sim).unwrap();
        smu.configure_sense(&SenseConfig {
            range: SenseRange::Fixed(1e-5),
            compliance: Some(1e-5),
            nplc: 0.1,
        })
        .unwrap();
        smu.configure_list_sweep(&program, 0.0).unwrap();
        let trace = smu.run().unwrap();

        let l = switched_polarization(&trace, params.n_cycles, area).unwrap();
        assert!(!l.is_empty());
        assert_relative_eq!(l.max_polarization().unwrap(), 2.5, max_relative = 1e-3);
    }
}
