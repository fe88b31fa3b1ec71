//! Sensor-side inputs consumed by the engine
//!
//! The Hall-effect sensor is read through an interrupt-owned edge counter and
//! the supply rail through a filtered millivolt reading.

mod edge_counter;
mod voltage;

pub use edge_counter::*;
pub use voltage::*;
