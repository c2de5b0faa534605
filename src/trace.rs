use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use itertools::Itertools;
use serde::de::DeserializeOwned;

use crate::error::SmuError;
use crate::Result;

/// Buffered readings of one sweep, one entry per trigger.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TraceData {
    pub time: Vec<f64>,
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct Record {
    time: f64,
    voltage: f64,
    current: f64,
}

impl TraceData {
    /// Columns must have equal length.
    pub fn new(time: Vec<f64>, voltage: Vec<f64>, current: Vec<f64>) -> Result<Self> {
        if time.len() != voltage.len() || time.len() != current.len() {
            return Err(SmuError::invalid(format!(
                "column lengths differ: {} times, {} voltages, {} currents",
                time.len(),
                voltage.len(),
                current.len()
            ))
            .into());
        }
        Ok(TraceData {
            time,
            voltage,
            current,
        })
    }

    /// Parses a `FETC?` reply of repeating `voltage,current,time` triples.
    pub fn from_fetch(response: &str) -> Result<Self> {
        let response = response.trim();
        if response.is_empty() {
            return Ok(TraceData::default());
        }

        let values = response
            .split(',')
            .map(|token| {
                token
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| SmuError::parse(format!("not a number: {:?}", token)))
            })
            .collect::<std::result::Result<Vec<f64>, SmuError>>()?;

        if values.len() % 3 != 0 {
            return Err(SmuError::parse(format!(
                "{} values do not form voltage/current/time triples",
                values.len()
            ))
            .into());
        }

        Ok(TraceData {
            time: values.iter().skip(2).step_by(3).cloned().collect_vec(),
            voltage: values.iter().step_by(3).cloned().collect_vec(),
            current: values.iter().skip(1).step_by(3).cloned().collect_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// `(time, voltage, current)` rows.
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (f64, f64, f64)> + 'a {
        self.time
            .iter()
            .zip(self.voltage.iter())
            .zip(self.current.iter())
            .map(|((t, v), i)| (*t, *v, *i))
    }

    /// Mean spacing between consecutive timestamps.
    pub fn mean_interval(&self) -> Option<f64> {
        if self.time.len() < 2 {
            return None;
        }
        let span: f64 = self.time.iter().tuple_windows().map(|(a, b)| b - a).sum();
        Some(span / (self.time.len() - 1) as f64)
    }

    /// Writes a tab separated table; a `.gz` extension compresses it.
    pub fn save_as_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_creating_dirs(path.as_ref(), |path| self.write_csv(path))
    }

    fn write_csv(&self, path: &Path) -> Result<()> {
        let mut out = csv_writer_from_path(path)?;
        out.write_record(&["time", "voltage", "current"])?;
        for (t, v, i) in self.iter() {
            let t_str = t.to_string();
            let v_str = v.to_string();
            let i_str = i.to_string();
            out.write_record(&[t_str.as_str(), v_str.as_str(), i_str.as_str()])?;
        }
        out.close()
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut trace = TraceData::default();
        for result in csv_reader_from_path(path.as_ref())? {
            let record: Record = result?;
            trace.time.push(record.time);
            trace.voltage.push(record.voltage);
            trace.current.push(record.current);
        }
        Ok(trace)
    }
}

/// Runs `write`; if it fails because the parent directory is missing, creates
/// the directory and runs it once more.
pub fn write_creating_dirs<F>(path: &Path, write: F) -> Result<()>
where
    F: Fn(&Path) -> Result<()>,
{
    match write(path) {
        Err(ref e) if is_not_found(e) => {
            if let Some(parent) = path.parent() {
                info!("creating {}", parent.display());
                fs::create_dir_all(parent)?;
            }
            write(path)
        }
        other => other,
    }
}

fn is_not_found(e: &failure::Error) -> bool {
    let io_kind = e
        .downcast_ref::<io::Error>()
        .map(io::Error::kind)
        .or_else(|| match e.downcast_ref::<csv::Error>().map(csv::Error::kind) {
            Some(csv::ErrorKind::Io(inner)) => Some(inner.kind()),
            _ => None,
        });
    io_kind == Some(io::ErrorKind::NotFound)
}

pub trait CsvWriter {
    fn write_record(&mut self, record: &[&str]) -> Result<()>;
    fn close(self: Box<Self>) -> Result<()>;
}

impl<W: io::Write> CsvWriter for csv::Writer<libflate::gzip::Encoder<W>> {
    fn write_record(&mut self, record: &[&str]) -> Result<()> {
        csv::Writer::write_record(self, record)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.into_inner()
            .map_err(|_| failure::err_msg("Error writing the file"))?
            .finish()
            .into_result()?;
        Ok(())
    }
}

impl CsvWriter for csv::Writer<File> {
    fn write_record(&mut self, record: &[&str]) -> Result<()> {
        csv::Writer::write_record(self, record)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.into_inner()
            .map_err(|_| failure::err_msg("Error writing the file"))?;
        Ok(())
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension().and_then(OsStr::to_str) == Some("gz")
}

pub fn csv_writer_from_path(path: &Path) -> Result<Box<dyn CsvWriter>> {
    let mut out_builder = csv::WriterBuilder::new();
    out_builder.delimiter(b'\t');
    Ok(if is_gz(path) {
        Box::new(out_builder.from_writer(libflate::gzip::Encoder::new(File::create(path)?)?))
    } else {
        Box::new(out_builder.from_writer(File::create(path)?))
    })
}

pub fn csv_reader_from_path<D: DeserializeOwned + 'static>(
    path: &Path,
) -> Result<Box<dyn Iterator<Item = csv::Result<D>>>> {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(true);
    builder.delimiter(b'\t');
    Ok(if is_gz(path) {
        Box::new(
            builder
                .from_reader(libflate::gzip::Decoder::new(File::open(path)?)?)
                .into_deserialize(),
        )
    } else {
        Box::new(builder.from_reader(File::open(path)?).into_deserialize())
    })
}
