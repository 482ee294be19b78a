pub mod artifacts;
#[allow(clippy::module_inception)]
pub mod config;

pub use artifacts::{ArchConfig, ConfigDir, LayerArtifacts, LayerJson, SimdSimConfig, SystolicConfig};
pub use config::{load_and_merge_configs, AppConfig, CliOverrides};
