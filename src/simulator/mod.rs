pub mod config;
pub mod sim;
pub mod simulator;
pub mod utils;

// provide to the binary
pub use simulator::{RunReport, Simulator};
pub use utils::log;
