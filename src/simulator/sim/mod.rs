pub mod mode;
pub mod shell;
pub mod trace;

pub use mode::{SimConfig, StepMode};
pub use shell::{Command, Shell};
pub use trace::TraceWriter;
