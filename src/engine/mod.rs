//! Long-running loops: queue workers and the periodic sweep.

pub mod sweep;
pub mod worker;

pub use sweep::SweepLoop;
pub use worker::{Worker, WorkerConfig};
