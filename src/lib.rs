#[macro_use]
extern crate log;
#[macro_use]
extern crate measure_time;
#[macro_use]
extern crate serde_derive;

pub mod error;
pub mod options;
pub mod pund;
pub mod smu;
pub mod trace;
pub mod transport;
pub mod util;
pub mod waveform;

pub use crate::error::SmuError;
pub use crate::smu::{SenseConfig, SenseRange, Smu, SmuState, WaitPolicy};
pub use crate::trace::TraceData;
pub use crate::waveform::PundParams;

pub type Result<T> = std::result::Result<T, failure::Error>;
