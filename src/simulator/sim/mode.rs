use crate::arch::genesys::RunOptions;
use crate::simulator::config::AppConfig;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

/// Resolved run settings handed to the `Simulator`.
#[derive(Debug, Clone)]
pub struct SimConfig {
  pub quiet: bool,
  pub step_mode: StepMode,
  pub trace_file: Option<PathBuf>,
  pub config_dir: PathBuf,
  pub arch_config: Option<PathBuf>,
  pub csv_output: Option<PathBuf>,
  pub run: RunOptions,
}

impl SimConfig {
  pub fn from_app(app: &AppConfig) -> Self {
    Self {
      quiet: app.simulation.quiet,
      step_mode: if app.simulation.step_mode { StepMode::Step } else { StepMode::Continuous },
      trace_file: app.trace_path(),
      config_dir: PathBuf::from(&app.paths.config_dir),
      arch_config: app.arch_config_path(),
      csv_output: app.csv_path(),
      run: RunOptions {
        fast_run: app.simd.fast_run,
        ddr_latency: app.simd.ddr_latency,
        max_cycles: app.simulation.max_cycles,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::simulator::config::config::load_default_config;

  #[test]
  fn test_from_default_app_config() {
    let mut app = load_default_config().unwrap();
    app.simulation.step_mode = true;
    app.simd.fast_run = Some(false);
    let config = SimConfig::from_app(&app);
    assert_eq!(config.step_mode, StepMode::Step);
    assert!(config.trace_file.is_none());
    assert!(config.csv_output.is_none());
    assert_eq!(config.run.fast_run, Some(false));
    assert_eq!(config.run.max_cycles, 50_000_000);
  }
}
