//! Telemetry pipeline: sample history and the measurement tick schedule.
//!
//! - `window`: bounded, time-ascending `SampleWindow`
//! - `sampler`: activation, tick and cancellation bookkeeping for the loop
//!   the link task runs

pub mod sampler;
pub mod window;

pub use sampler::Sampler;
pub use window::{Sample, SampleWindow};
