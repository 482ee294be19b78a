pub mod log;
pub mod report;

pub use report::{print_layer_stats, print_summary};
