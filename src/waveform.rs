//! PUND voltage programs.
//!
//! A PUND sweep is four trapezoidal pulses (two at the first voltage, two at the
//! second) separated by zero-volt gaps, sampled at the instrument's integration step.

use itertools::Itertools;

use crate::error::SmuError;
use crate::smu::MAX_TRIGGER_COUNT;
use crate::Result;

/// Rounding slack when converting a duration into a whole number of steps.
const STEP_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PundParams {
    /// First pulse pair amplitude, volts.
    pub vf: f64,
    /// Second pulse pair amplitude, volts.
    pub vs: f64,
    /// Sampling interval, in the same unit as `rise`, `hold` and `space`.
    pub step: f64,
    pub rise: f64,
    pub hold: f64,
    /// Zero-volt gap between consecutive pulses.
    pub space: f64,
    pub n_cycles: usize,
}

impl Default for PundParams {
    fn default() -> Self {
        PundParams {
            vf: -3.0,
            vs: 3.0,
            step: 1.0,
            rise: 20.0,
            hold: 10.0,
            space: 10.0,
            n_cycles: 2,
        }
    }
}

impl PundParams {
    pub fn validate(&self) -> Result<()> {
        check_step(self.step)?;
        check_duration("rise", self.rise)?;
        check_duration("hold", self.hold)?;
        check_duration("space", self.space)?;
        check_amplitude(self.vf)?;
        check_amplitude(self.vs)?;
        if self.n_cycles == 0 {
            return Err(SmuError::invalid("n_cycles must be at least 1").into());
        }
        self.space_len()?;
        steps_floor(2.0 * self.rise + self.hold, self.step)?;
        Ok(())
    }

    /// Number of zero samples on each side of a pulse.
    pub fn space_len(&self) -> Result<usize> {
        steps_ceil(self.space / 2.0, self.step)
    }
}

fn check_step(step: f64) -> Result<()> {
    if !(step.is_finite() && step > 0.0) {
        return Err(SmuError::invalid(format!("step must be positive, got {}", step)).into());
    }
    Ok(())
}

fn check_duration(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(SmuError::invalid(format!("{} must be non-negative, got {}", name, value)).into());
    }
    Ok(())
}

fn check_amplitude(value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(SmuError::invalid(format!("amplitude must be finite, got {}", value)).into());
    }
    Ok(())
}

/// A whole number of steps, at most one trigger list long.
fn step_count(steps: f64) -> Result<usize> {
    if !(steps.is_finite() && steps <= MAX_TRIGGER_COUNT as f64) {
        return Err(SmuError::invalid(format!(
            "{} samples exceed the {} point trigger limit",
            steps, MAX_TRIGGER_COUNT
        ))
        .into());
    }
    Ok(steps.max(0.0) as usize)
}

fn steps_floor(duration: f64, step: f64) -> Result<usize> {
    step_count((duration / step + STEP_EPSILON).floor())
}

fn steps_ceil(duration: f64, step: f64) -> Result<usize> {
    step_count((duration / step - STEP_EPSILON).ceil())
}

/// Linear interpolation over ascending `xs`, zero outside `[xs[0], xs[last]]`.
///
/// Where control points coincide the rightmost one applies, and the last point
/// is returned exactly at the right edge.
fn interp(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let last = xs.len() - 1;
    if x < xs[0] || x > xs[last] {
        return 0.0;
    }
    if x == xs[last] {
        return ys[last];
    }
    let j = xs.iter().rposition(|&xp| xp <= x).unwrap_or(0);
    let span = xs[j + 1] - xs[j];
    if span <= 0.0 {
        return ys[j];
    }
    ys[j] + (ys[j + 1] - ys[j]) * (x - xs[j]) / span
}

/// One ramp-up / hold / ramp-down pulse sampled every `step`.
pub fn pulse(rise: f64, hold: f64, step: f64, amplitude: f64) -> Result<Vec<f64>> {
    check_step(step)?;
    check_duration("rise", rise)?;
    check_duration("hold", hold)?;
    check_amplitude(amplitude)?;

    let xs = [0.0, rise, rise + hold, 2.0 * rise + hold];
    let ys = [0.0, amplitude, amplitude, 0.0];
    let end = xs[3];
    let samples = steps_floor(end, step)? + 1;

    Ok((0..samples)
        .map(|k| {
            let t = (k as f64 * step).min(end);
            interp(t, &xs, &ys)
        })
        .collect_vec())
}

/// One PUND cycle: `[space, P, space, space, U, space, space, N, space, space, D, space]`.
pub fn waveform(params: &PundParams) -> Result<Vec<f64>> {
    params.validate()?;

    let gap = vec![0.0; params.space_len()?];
    let mut out = Vec::new();
    for &amplitude in &[params.vf, params.vf, params.vs, params.vs] {
        let p = pulse(params.rise, params.hold, params.step, amplitude)?;
        out.extend_from_slice(&gap);
        out.extend(p);
        out.extend_from_slice(&gap);
    }
    Ok(out)
}

/// `waveform` repeated `n_cycles` times.
pub fn cycles(params: &PundParams) -> Result<Vec<f64>> {
    let one = waveform(params)?;
    Ok(itertools::repeat_n(one, params.n_cycles)
        .flatten()
        .collect_vec())
}
