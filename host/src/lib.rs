//! Host-side trajectory reconstruction for the SAR rail positioner.
//!
//! Replays the same command stream the device executes, using the same
//! frame decoder and motion model, and integrates it into continuous
//! piecewise-linear `x(t), y(t)` tracks, so the imaging pipeline can ask
//! where the radar was at any frame timestamp.

pub mod export;
pub mod segment;
pub mod session;

pub use session::{AxisConfig, RailSession};
