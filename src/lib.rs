pub mod arch;
pub mod builtin;
pub mod error;
pub mod isa;
pub mod simulator;

pub use error::{SimError, SimResult};
pub use simulator::sim::mode::{SimConfig, StepMode};
pub use simulator::utils::log;
