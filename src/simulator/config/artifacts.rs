use crate::error::{SimError, SimResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SYSTOLIC_CONFIG_FILE: &str = "systolic_config.json";
pub const SIMD_CONFIG_FILE: &str = "simd_config.json";

/// Hardware parameters emitted next to the compiled layers (`*arch_cfg.json`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ArchConfig {
  pub data_width: u32,
  pub acc_width: u32,
  pub wgt_width: u32,
  pub bias_width: u32,
  pub ibuf_depth: u64,
  pub obuf_depth: u64,
  pub wbuf_depth: u64,
  pub bbuf_depth: u64,
  pub vmem_depth: u64,
  pub vmem_banks: u64,
  pub array_n: u64,
  pub array_m: u64,
  pub simd_width: u64,
  /// Bits per cycle between the SIMD unit and DDR.
  pub simd_channel_bw: u64,
  #[serde(default)]
  pub dram_depth: Option<u64>,
  #[serde(default)]
  pub dram_width: Option<u32>,
  #[serde(default)]
  pub dram_banks: Option<u64>,
}

impl ArchConfig {
  pub fn validate(&self) -> SimResult<()> {
    if self.array_n == 0 || self.array_m == 0 {
      return Err(SimError::config("ARRAY_N and ARRAY_M must be non-zero"));
    }
    if self.simd_width == 0 {
      return Err(SimError::config("SIMD_WIDTH must be non-zero"));
    }
    if let Some(width) = self.dram_width {
      if width % 8 != 0 {
        return Err(SimError::config(format!("DRAM_WIDTH {} is not a multiple of 8", width)));
      }
    }
    Ok(())
  }

  /// OBUF is double-buffered on chip, so its usable depth is twice the
  /// configured one.
  pub fn obuf_bank_depth(&self) -> u64 {
    self.obuf_depth * 2
  }

  pub fn simd_bandwidth_bytes(&self) -> u64 {
    self.simd_channel_bw / 8
  }
}

/// Timing and energy parameters of the systolic side (`systolic_config.json`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SystolicConfig {
  #[serde(rename = "infLatency")]
  pub inf_latency: f64,
  /// Core clock in MHz.
  pub frequency: f64,
  #[serde(rename = "IBUFinfBandwidth")]
  pub ibuf_bandwidth: f64,
  #[serde(rename = "OBUFinfBandwidth")]
  pub obuf_bandwidth: f64,
  #[serde(rename = "WBUFinfBandwidth")]
  pub wbuf_bandwidth: f64,
  #[serde(rename = "BBUFinfBandwidth")]
  pub bbuf_bandwidth: f64,
  #[serde(rename = "ddr_frequency Mhz")]
  pub ddr_frequency_mhz: f64,
  #[serde(rename = "IBUFperAccessReadEnergy")]
  pub ibuf_read_energy: f64,
  #[serde(rename = "IBUFperAccessWriteEnergy")]
  pub ibuf_write_energy: f64,
  #[serde(rename = "OBUFperAccessReadEnergy")]
  pub obuf_read_energy: f64,
  #[serde(rename = "OBUFperAccessWriteEnergy")]
  pub obuf_write_energy: f64,
  #[serde(rename = "WBUFperAccessReadEnergy")]
  pub wbuf_read_energy: f64,
  #[serde(rename = "WBUFperAccessWriteEnergy")]
  pub wbuf_write_energy: f64,
  #[serde(rename = "BBUFperAccessReadEnergy")]
  pub bbuf_read_energy: f64,
  #[serde(rename = "BBUFperAccessWriteEnergy")]
  pub bbuf_write_energy: f64,
  #[serde(rename = "numTags", default = "default_num_tags")]
  pub num_tags: u32,
  #[serde(rename = "decoderCycles")]
  pub decoder_cycles: u64,
  #[serde(rename = "energyPerMAC")]
  pub energy_per_mac: f64,
  pub dram_cost: f64,
  #[serde(default)]
  pub systolic_energy: f64,
  pub simd_energy_cost: f64,
  #[serde(default = "default_tech_node")]
  pub tech_node: f64,
}

fn default_num_tags() -> u32 {
  2
}

fn default_tech_node() -> f64 {
  45.0
}

impl SystolicConfig {
  pub fn validate(&self) -> SimResult<()> {
    if self.frequency <= 0.0 {
      return Err(SimError::config("frequency must be positive"));
    }
    if self.ddr_frequency_mhz <= 0.0 {
      return Err(SimError::config("'ddr_frequency Mhz' must be positive"));
    }
    let bandwidths = [self.ibuf_bandwidth, self.obuf_bandwidth, self.wbuf_bandwidth, self.bbuf_bandwidth];
    if bandwidths.iter().any(|bw| *bw <= 0.0) {
      return Err(SimError::config("buffer interface bandwidths must be positive"));
    }
    Ok(())
  }
}

/// Knobs of the SIMD pipeline run (`simd_config.json`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimdSimConfig {
  #[serde(rename = "fast-run")]
  pub fast_run: bool,
  #[serde(rename = "ddrLatency")]
  pub ddr_latency: f64,
  #[serde(rename = "ld-init-delay-cycles", default)]
  pub ld_init_delay_cycles: Option<f64>,
  #[serde(rename = "ld-scale-of-delay", default)]
  pub ld_scale_of_delay: Option<f64>,
  #[serde(rename = "st-init-delay-cycles", default)]
  pub st_init_delay_cycles: Option<f64>,
  #[serde(rename = "st-scale-of-delay", default)]
  pub st_scale_of_delay: Option<f64>,
}

/// Stride and padding come as a scalar or as a per-axis list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum IntOrList {
  Int(i64),
  List(Vec<i64>),
}

impl IntOrList {
  pub fn first(&self) -> i64 {
    match self {
      IntOrList::Int(v) => *v,
      IntOrList::List(values) => values.first().copied().unwrap_or(0),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OperationParams {
  #[serde(default)]
  pub stride: Option<IntOrList>,
  #[serde(default)]
  pub pad: Option<IntOrList>,
}

pub type TileDims = BTreeMap<String, u64>;

/// One operand of the compiled operation and its per-buffer tiling.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OperandJson {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub tiling: BTreeMap<String, TileDims>,
}

impl OperandJson {
  pub fn tiling_for(&self, buffer: &str) -> TileDims {
    self.tiling.get(buffer).cloned().unwrap_or_default()
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OperationJson {
  pub operation: String,
  #[serde(default)]
  pub operation_parameters: OperationParams,
  #[serde(default)]
  pub iterable_dimensions: TileDims,
  #[serde(default)]
  pub inputs: Vec<OperandJson>,
  #[serde(default)]
  pub outputs: Vec<OperandJson>,
  #[serde(default)]
  pub intermediate: Vec<OperandJson>,
}

impl OperationJson {
  pub fn stride(&self) -> i64 {
    self.operation_parameters.stride.as_ref().map_or(0, IntOrList::first)
  }

  pub fn pad(&self) -> i64 {
    self.operation_parameters.pad.as_ref().map_or(0, IntOrList::first)
  }

  fn input_tiling(&self, idx: usize, buffer: &str) -> TileDims {
    self.inputs.get(idx).map(|op| op.tiling_for(buffer)).unwrap_or_default()
  }

  pub fn ibuf_tiling(&self) -> TileDims {
    self.input_tiling(0, "IBUF")
  }

  pub fn wbuf_tiling(&self) -> TileDims {
    self.input_tiling(1, "WBUF")
  }

  pub fn bbuf_tiling(&self) -> TileDims {
    self.input_tiling(2, "BBUF")
  }

  /// OBUF tiling of the systolic output: the first output of a plain
  /// systolic layer, the `conv_out` intermediate of a fused one.
  pub fn obuf_tiling(&self, fused: bool) -> TileDims {
    let operand = if fused {
      self.intermediate.iter().find(|op| op.name == "conv_out")
    } else {
      self.outputs.first()
    };
    operand.map(|op| op.tiling_for("OBUF")).unwrap_or_default()
  }
}

/// Compiler-emitted description of one layer (`*json.json`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LayerJson {
  pub program: Vec<OperationJson>,
}

impl LayerJson {
  pub fn operation(&self) -> SimResult<&OperationJson> {
    self
      .program
      .first()
      .ok_or_else(|| SimError::config("layer JSON has an empty program"))
  }
}

/// Read and deserialize a JSON artifact. Any failure is a configuration
/// error that names the file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> SimResult<T> {
  let text = fs::read_to_string(path).map_err(|e| SimError::config(format!("cannot read {:?}: {}", path, e)))?;
  serde_json::from_str(&text).map_err(|e| SimError::config(format!("invalid {:?}: {}", path, e)))
}

/// First regular file in `dir` (by name) whose name ends with `suffix`.
pub fn find_file(dir: &Path, suffix: &str) -> Option<PathBuf> {
  let mut names: Vec<PathBuf> = fs::read_dir(dir)
    .ok()?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|path| path.is_file())
    .filter(|path| {
      path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(suffix))
    })
    .collect();
  names.sort();
  names.into_iter().next()
}

fn require_file(dir: &Path, suffix: &str) -> SimResult<PathBuf> {
  find_file(dir, suffix).ok_or_else(|| SimError::config(format!("no '*{}' file in {:?}", suffix, dir)))
}

/// Paths of everything a layer directory must provide.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerArtifacts {
  pub dir: PathBuf,
  pub name: String,
  pub layer_json: PathBuf,
  pub string_trace: PathBuf,
  /// Decimal words when present, binary otherwise.
  pub instructions: PathBuf,
  pub arch_config: PathBuf,
}

impl LayerArtifacts {
  /// Locate the artifacts of `dir`. The architecture file is `arch_override`
  /// when given, else the first `*arch_cfg.json` in the parent directory,
  /// then in the layer directory itself.
  pub fn discover(dir: &Path, arch_override: Option<&Path>) -> SimResult<Self> {
    if !dir.is_dir() {
      return Err(SimError::config(format!("layer directory {:?} does not exist", dir)));
    }
    let name = dir
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or_default()
      .to_string();

    let layer_json = require_file(dir, "json.json")?;
    let string_trace = require_file(dir, "_string_final.txt")?;
    let instructions = find_file(dir, "_decimal.txt")
      .or_else(|| find_file(dir, "_binary.txt"))
      .ok_or_else(|| SimError::config(format!("no '*_decimal.txt' or '*_binary.txt' file in {:?}", dir)))?;

    let arch_config = match arch_override {
      Some(path) => {
        if !path.is_file() {
          return Err(SimError::config(format!("architecture config {:?} does not exist", path)));
        }
        path.to_path_buf()
      },
      None => dir
        .parent()
        .and_then(|parent| find_file(parent, "arch_cfg.json"))
        .or_else(|| find_file(dir, "arch_cfg.json"))
        .ok_or_else(|| SimError::config(format!("no '*arch_cfg.json' next to or inside {:?}", dir)))?,
    };

    Ok(Self {
      dir: dir.to_path_buf(),
      name,
      layer_json,
      string_trace,
      instructions,
      arch_config,
    })
  }
}

/// The two JSON files of the configuration directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDir {
  pub systolic: SystolicConfig,
  pub simd: SimdSimConfig,
}

impl ConfigDir {
  pub fn load(dir: &Path) -> SimResult<Self> {
    let systolic: SystolicConfig = load_json(&dir.join(SYSTOLIC_CONFIG_FILE))?;
    systolic.validate()?;
    let simd: SimdSimConfig = load_json(&dir.join(SIMD_CONFIG_FILE))?;
    Ok(Self { systolic, simd })
  }
}
