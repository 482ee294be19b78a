use super::config::{ConfigDir, LayerArtifacts};
use super::sim::mode::{SimConfig, StepMode};
use super::sim::shell::{Command, Shell};
use super::sim::trace::TraceWriter;
use super::utils::log::apply_quiet;
use super::utils::report::{print_layer_stats, print_summary};
use crate::arch::genesys::simd::{Pipeline, SimdSummary};
use crate::arch::genesys::stats::write_csv_file;
use crate::arch::genesys::{Genesys, LayerDescriptor, LayerResult, LayerStats, TableEnergy};
use crate::error::{SimError, SimResult};
use crate::isa::StringTrace;
use crate::log_info;
use std::fs::{self, File};
use std::io::{self, Result};
use std::path::{Path, PathBuf};

/// String traces shorter than this carry no real layer.
pub const MIN_TRACE_LINES: usize = 20;

/// Outcome of a run over one or more layers.
#[derive(Debug, Default)]
pub struct RunReport {
  pub records: Vec<LayerStats>,
  pub skipped: Vec<String>,
  pub failed: Vec<(String, String)>,
}

pub struct Simulator {
  config: SimConfig,
  configs: ConfigDir,
  trace: Option<TraceWriter<File>>,
  shell: Option<Shell>,
  stopped: bool,
}

impl Simulator {
  pub fn new(config: SimConfig) -> Result<Self> {
    let configs = ConfigDir::load(&config.config_dir)?;
    Self::with_configs(config, configs)
  }

  /// Build around already loaded timing and SIMD configs.
  pub fn with_configs(config: SimConfig, configs: ConfigDir) -> Result<Self> {
    apply_quiet(config.quiet);
    let trace = match &config.trace_file {
      Some(path) => {
        log::info!("writing SIMD trace to {:?}", path);
        Some(TraceWriter::create(path)?)
      },
      None => None,
    };
    let shell = match config.step_mode {
      StepMode::Step => Some(Shell::new()?),
      StepMode::Continuous => None,
    };
    Ok(Self { config, configs, trace, shell, stopped: false })
  }

  pub fn config(&self) -> &SimConfig {
    &self.config
  }

  /// `path` itself when it is a layer directory, else its `layer*`
  /// subdirectories sorted by name.
  pub fn layer_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
      return Err(io::Error::new(io::ErrorKind::NotFound, format!("test path {:?} is not a directory", path)));
    }
    if super::config::artifacts::find_file(path, "json.json").is_some() {
      return Ok(vec![path.to_path_buf()]);
    }

    let mut dirs: Vec<PathBuf> = fs::read_dir(path)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|p| p.is_dir())
      .filter(|p| {
        p.file_name()
          .and_then(|n| n.to_str())
          .is_some_and(|n| n.starts_with("layer"))
      })
      .collect();
    dirs.sort();

    if dirs.is_empty() {
      return Err(io::Error::new(io::ErrorKind::NotFound, format!("no layer directories under {:?}", path)));
    }
    Ok(dirs)
  }

  /// Simulate one layer directory. `None` when the layer is skipped.
  pub fn simulate_layer(&mut self, dir: &Path) -> SimResult<Option<LayerResult>> {
    let artifacts = LayerArtifacts::discover(dir, self.config.arch_config.as_deref())?;
    let lines = StringTrace::load(&artifacts.string_trace)?.len();
    if lines < MIN_TRACE_LINES {
      log::info!("skipping {}: string trace has only {} lines", artifacts.name, lines);
      return Ok(None);
    }

    let layer = LayerDescriptor::load(&artifacts, &self.configs)?;
    let energy = TableEnergy::from_config(&layer.timing);
    let genesys = Genesys::new(&layer, self.config.run.clone(), &energy);

    if let Some(trace) = self.trace.as_mut() {
      trace.set_layer(&layer.name);
    }
    let trace = self.trace.as_mut();
    let shell = self.shell.as_mut();
    let stopped = &mut self.stopped;
    let result = genesys.run_with(|pipeline| drive(pipeline, shell, trace, stopped))?;
    Ok(Some(result))
  }

  /// Simulate every layer below `path`, print the reports and write the
  /// CSV. A failing layer is reported and the run moves on.
  pub fn run(&mut self, path: &Path) -> Result<RunReport> {
    let mut report = RunReport::default();

    for dir in Self::layer_dirs(path)? {
      let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
      match self.simulate_layer(&dir) {
        Ok(Some(result)) => {
          print_layer_stats(&result.stats);
          report.records.push(result.stats);
        },
        Ok(None) => report.skipped.push(name),
        Err(err) => {
          log::error!("layer {} failed: {}", name, err);
          report.failed.push((name, err.to_string()));
        },
      }
      if self.stopped {
        log_info!("stopped from the step shell");
        break;
      }
    }

    if let Some(trace) = self.trace.as_mut() {
      trace.flush()?;
    }
    if let Some(csv) = &self.config.csv_output {
      if !report.records.is_empty() {
        write_csv_file(&report.records, csv)?;
        log::info!("wrote {} layer record(s) to {:?}", report.records.len(), csv);
      }
    }
    print_summary(&report.records, &report.failed);
    Ok(report)
  }
}

/// Run the SIMD pipeline to completion, recording each cycle and handing
/// control to the step shell when one is attached.
fn drive(
  pipeline: &mut Pipeline,
  mut shell: Option<&mut Shell>,
  mut trace: Option<&mut TraceWriter<File>>,
  stopped: &mut bool,
) -> SimResult<SimdSummary> {
  if shell.is_none() && trace.is_none() {
    return pipeline.run();
  }

  let mut steps_left = 0u32;
  while !pipeline.is_finished() {
    let command = match shell.as_deref_mut() {
      Some(sh) if steps_left == 0 => {
        print_snapshot(pipeline);
        Some(sh.read_command()?)
      },
      _ => None,
    };
    match command {
      Some(Command::Step(n)) => steps_left = n,
      Some(Command::Continue) => shell = None,
      Some(Command::Quit) => {
        *stopped = true;
        return Err(SimError::invariant(format!("stopped at SIMD cycle {}", pipeline.cycle())));
      },
      None => {},
    }

    pipeline.step()?;
    steps_left = steps_left.saturating_sub(1);
    if let Some(tr) = trace.as_deref_mut() {
      tr.record(pipeline)?;
    }
  }
  Ok(pipeline.summary())
}

fn print_snapshot(pipeline: &Pipeline) {
  log_info!("cycle {}", pipeline.cycle());
  for stage in pipeline.snapshots() {
    let word = stage.word.map(|w| format!("{:#010x}", w)).unwrap_or_else(|| "-".to_string());
    let pc = stage.pc.map(|pc| pc.to_string()).unwrap_or_else(|| "-".to_string());
    log_info!(
      "  {:<10} {:<5} {:>4}/{:<4} pc {:>5} word {}",
      stage.name,
      if stage.busy { "busy" } else { "idle" },
      stage.executed,
      stage.required,
      pc,
      word
    );
  }
}
