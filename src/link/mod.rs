//! Converter link: connection lifecycle, command gating and the sampling loop.
//!
//! - `state`: `LinkState`, the single container a renderer reads
//! - `task`: the embassy task that owns all mutation and device I/O dispatch
//! - `controller`: `ConverterController`, the operator-facing handle

pub mod controller;
pub mod state;
pub mod task;

#[cfg(test)]
mod fake;

pub use controller::ConverterController;
pub use state::{ConnectionState, ConverterTarget, LinkState, LinkStatus};
pub use task::{LinkCommand, LinkEvent, LinkFactory, SharedLinkState};
