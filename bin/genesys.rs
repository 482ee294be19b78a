use clap::Parser;
use genesys_sim::simulator::config::{load_and_merge_configs, CliOverrides};
use genesys_sim::simulator::utils::log::init_log;
use genesys_sim::simulator::Simulator;
use genesys_sim::SimConfig;
use std::path::PathBuf;

/// Genesys - performance simulator for the GeneSys systolic + SIMD accelerator
#[derive(Parser, Debug)]
#[command(name = "genesys")]
#[command(version = "0.1.0")]
#[command(about = "Cycle-level performance simulator for compiled GeneSys layers", long_about = None)]
struct Args {
  /// Layer directory, or a directory of `layer*` directories
  #[arg(value_name = "TEST_PATH")]
  test_path: PathBuf,

  /// Custom TOML config merged over the built-in defaults
  #[arg(long, value_name = "FILE")]
  config: Option<String>,

  /// Directory holding systolic_config.json and simd_config.json
  #[arg(long, value_name = "DIR")]
  config_dir: Option<String>,

  /// Architecture config, instead of searching for *arch_cfg.json
  #[arg(long, value_name = "FILE")]
  arch_config: Option<String>,

  /// Write the statistics records to this CSV file
  #[arg(long, value_name = "FILE")]
  csv: Option<String>,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Enable step mode (interactive stepping of the SIMD pipeline)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress the console report)
  #[arg(short, long)]
  quiet: bool,

  /// Replay every base-loop iteration instead of projecting from one
  #[arg(long)]
  no_fast_run: bool,
}

fn main() -> std::io::Result<()> {
  init_log();

  let args = Args::parse();

  let cli = CliOverrides {
    quiet: args.quiet,
    step: args.step,
    no_fast_run: args.no_fast_run,
    trace_file: args.trace_file.as_deref(),
    config_dir: args.config_dir.as_deref(),
    arch_config: args.arch_config.as_deref(),
    csv_output: args.csv.as_deref(),
  };

  let root = std::env::current_dir()?;
  let app_config = load_and_merge_configs(args.config.as_deref(), &root, &cli)?;
  let config = SimConfig::from_app(&app_config);

  let mut simulator = Simulator::new(config)?;
  let report = simulator.run(&args.test_path)?;

  if report.records.is_empty() && !report.failed.is_empty() {
    return Err(std::io::Error::new(
      std::io::ErrorKind::Other,
      format!("all {} layer(s) failed", report.failed.len()),
    ));
  }
  Ok(())
}
