use std::fmt::Display;
use std::fmt::Error;
use std::fmt::Formatter;
use std::fmt::Write;

/// Formats a value with an SI prefix: `Engineering(1.5e-9)` prints `1.500n`.
pub struct Engineering(pub f64);

impl Display for Engineering {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        if self.0 == 0.0 || !self.0.is_finite() {
            write!(f, "{}", self.0)
        } else {
            let exp = (self.0.abs().log10() / 3.0).floor() as i32 * 3;
            let mantissa = self.0 / 10f64.powi(exp);
            write!(f, "{:.3}", mantissa)?;
            match exp {
                0 => {}
                -3 => f.write_char('m')?,
                -6 => f.write_char('µ')?,
                -9 => f.write_char('n')?,
                -12 => f.write_char('p')?,
                -15 => f.write_char('f')?,
                -18 => f.write_char('a')?,
                3 => f.write_char('k')?,
                6 => f.write_char('M')?,
                9 => f.write_char('G')?,
                12 => f.write_char('T')?,
                exp => write!(f, "e{}", exp)?,
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Engineering;

    #[test]
    fn picks_prefix_by_thousands() {
        assert_eq!(Engineering(1.5e-9).to_string(), "1.500n");
        assert_eq!(Engineering(-2.5e-6).to_string(), "-2.500µ");
        assert_eq!(Engineering(0.0105).to_string(), "10.500m");
        assert_eq!(Engineering(3.0).to_string(), "3.000");
        assert_eq!(Engineering(12_000.0).to_string(), "12.000k");
    }

    #[test]
    fn zero_and_tiny_values() {
        assert_eq!(Engineering(0.0).to_string(), "0");
        assert_eq!(Engineering(3e-21).to_string(), "3.000e-21");
    }
}
