//! End-to-end data movement between a source and destination target.

pub mod frame;
pub mod transport;
