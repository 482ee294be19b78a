use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_TOML: &str = include_str!("default.toml");

/// Prefix of environment overrides, e.g. `GENESYS__PATHS__CONFIG_DIR`.
pub const ENV_PREFIX: &str = "GENESYS";

/// Run control
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  #[serde(default = "default_max_cycles")]
  pub max_cycles: u64,
  #[serde(default = "default_mode")]
  pub mode: String,
}

fn default_max_cycles() -> u64 {
  50_000_000
}

fn default_mode() -> String {
  "perf".to_string()
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      max_cycles: default_max_cycles(),
      mode: default_mode(),
    }
  }
}

/// Where inputs and outputs live
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PathsSection {
  /// Holds `systolic_config.json` and `simd_config.json`.
  #[serde(default)]
  pub config_dir: String,
  /// Empty means search for `*arch_cfg.json` around each layer.
  #[serde(default)]
  pub arch_config: String,
  /// Empty means no CSV is written.
  #[serde(default)]
  pub csv_output: String,
}

/// Overrides of `simd_config.json`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimdSection {
  #[serde(default)]
  pub fast_run: Option<bool>,
  #[serde(default)]
  pub ddr_latency: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub simulation: SimulationSection,
  #[serde(default)]
  pub paths: PathsSection,
  #[serde(default)]
  pub simd: SimdSection,
}

impl AppConfig {
  pub fn arch_config_path(&self) -> Option<PathBuf> {
    if self.paths.arch_config.is_empty() {
      None
    } else {
      Some(PathBuf::from(&self.paths.arch_config))
    }
  }

  pub fn csv_path(&self) -> Option<PathBuf> {
    if self.paths.csv_output.is_empty() {
      None
    } else {
      Some(PathBuf::from(&self.paths.csv_output))
    }
  }

  pub fn trace_path(&self) -> Option<PathBuf> {
    if self.simulation.trace_file.is_empty() {
      None
    } else {
      Some(PathBuf::from(&self.simulation.trace_file))
    }
  }
}

/// Command-line values that win over every file and the environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides<'a> {
  pub quiet: bool,
  pub step: bool,
  pub no_fast_run: bool,
  pub trace_file: Option<&'a str>,
  pub config_dir: Option<&'a str>,
  pub arch_config: Option<&'a str>,
  pub csv_output: Option<&'a str>,
}

/// Built-in defaults embedded in the binary.
pub fn load_default_config() -> io::Result<AppConfig> {
  parse_config(DEFAULT_TOML, Path::new("default.toml"))
}

fn parse_config(content: &str, origin: &Path) -> io::Result<AppConfig> {
  toml::from_str::<AppConfig>(content)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to parse TOML config {:?}: {}", origin, e)))
}

pub fn load_config_file(path: &Path) -> io::Result<AppConfig> {
  let content = fs::read_to_string(path)
    .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("cannot read config file {:?}: {}", path, e)))?;
  parse_config(&content, path)
}

/// Merge two configs; set fields of `override_config` win.
pub fn merge_config(mut base: AppConfig, override_config: AppConfig) -> AppConfig {
  if override_config.simulation.quiet {
    base.simulation.quiet = true;
  }
  if override_config.simulation.step_mode {
    base.simulation.step_mode = true;
  }
  if !override_config.simulation.trace_file.is_empty() {
    base.simulation.trace_file = override_config.simulation.trace_file;
  }
  if override_config.simulation.max_cycles != default_max_cycles() {
    base.simulation.max_cycles = override_config.simulation.max_cycles;
  }
  if !override_config.simulation.mode.is_empty() {
    base.simulation.mode = override_config.simulation.mode;
  }

  if !override_config.paths.config_dir.is_empty() {
    base.paths.config_dir = override_config.paths.config_dir;
  }
  if !override_config.paths.arch_config.is_empty() {
    base.paths.arch_config = override_config.paths.arch_config;
  }
  if !override_config.paths.csv_output.is_empty() {
    base.paths.csv_output = override_config.paths.csv_output;
  }

  if override_config.simd.fast_run.is_some() {
    base.simd.fast_run = override_config.simd.fast_run;
  }
  if override_config.simd.ddr_latency.is_some() {
    base.simd.ddr_latency = override_config.simd.ddr_latency;
  }

  base
}

/// Layer `GENESYS__SECTION__KEY` environment variables over `config`.
pub fn apply_env_overrides(config: AppConfig) -> io::Result<AppConfig> {
  let current = toml::to_string(&config)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to serialize config: {}", e)))?;

  ::config::Config::builder()
    .add_source(::config::File::from_str(&current, ::config::FileFormat::Toml))
    .add_source(
      ::config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .and_then(|layered| layered.try_deserialize::<AppConfig>())
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid environment override: {}", e)))
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if cli.no_fast_run {
    config.simd.fast_run = Some(false);
  }
  if let Some(file) = cli.trace_file {
    config.simulation.trace_file = file.to_string();
  }
  if let Some(dir) = cli.config_dir {
    config.paths.config_dir = dir.to_string();
  }
  if let Some(file) = cli.arch_config {
    config.paths.arch_config = file.to_string();
  }
  if let Some(file) = cli.csv_output {
    config.paths.csv_output = file.to_string();
  }
}

pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  if config.simulation.mode != "perf" {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      format!("unsupported simulation mode: {}", config.simulation.mode),
    ));
  }

  if config.simulation.max_cycles == 0 {
    return Err(io::Error::new(io::ErrorKind::InvalidData, "max_cycles must be greater than 0".to_string()));
  }

  if config.paths.config_dir.trim().is_empty() {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      "config_dir cannot be empty, please specify it through the configuration file or CLI parameters".to_string(),
    ));
  }

  if let Some(latency) = config.simd.ddr_latency {
    if latency < 0.0 {
      return Err(io::Error::new(io::ErrorKind::InvalidData, format!("ddr_latency must not be negative: {}", latency)));
    }
  }

  Ok(())
}

/// Make relative paths absolute against `root`.
pub fn resolve_paths(config: &mut AppConfig, root: &Path) -> io::Result<()> {
  config.paths.config_dir = resolve_single_path(&config.paths.config_dir, root)?;
  config.paths.arch_config = resolve_single_path(&config.paths.arch_config, root)?;
  config.paths.csv_output = resolve_single_path(&config.paths.csv_output, root)?;
  config.simulation.trace_file = resolve_single_path(&config.simulation.trace_file, root)?;
  Ok(())
}

fn resolve_single_path(path_str: &str, root: &Path) -> io::Result<String> {
  if path_str.is_empty() {
    return Ok(path_str.to_string());
  }

  let path = Path::new(path_str);
  if path.is_absolute() {
    return Ok(path_str.to_string());
  }

  Ok(root.join(path).to_string_lossy().to_string())
}

/// Load and merge configs
///
/// Flow:
/// 1. Load the built-in defaults
/// 2. Merge the custom config file, if any
/// 3. Apply environment overrides
/// 4. Apply CLI overrides
/// 5. Resolve relative paths
/// 6. Validate
pub fn load_and_merge_configs(custom_config_path: Option<&str>, root: &Path, cli: &CliOverrides) -> io::Result<AppConfig> {
  let mut config = load_default_config()?;

  if let Some(custom_path) = custom_config_path {
    let custom_path_buf = PathBuf::from(custom_path);
    let custom_path_abs = if custom_path_buf.is_absolute() {
      custom_path_buf
    } else {
      root.join(&custom_path_buf)
    };

    let custom_config = load_config_file(&custom_path_abs)?;
    config = merge_config(config, custom_config);
  }

  config = apply_env_overrides(config)?;

  apply_cli_overrides(&mut config, cli);

  resolve_paths(&mut config, root)?;

  validate_config(&config)?;

  Ok(config)
}
