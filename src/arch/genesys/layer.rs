use super::simd::{DdrTiming, PipelineConfig};
use super::systolic::buffer::tile_bytes;
use super::systolic::{ArrayShape, BufferGeometry, BufferKind, ComputeDims, PerBuffer, SystolicParams, TileOrder, TileSpace};
use crate::error::{SimError, SimResult};
use crate::isa::{LayerType, Program, SimdTileCounts, StringTrace, SystolicLoops};
use crate::simulator::config::artifacts::{load_json, TileDims};
use crate::simulator::config::{ArchConfig, ConfigDir, LayerArtifacts, LayerJson, SimdSimConfig, SystolicConfig};
use std::fs;

/// Loop layout of a GEMM-class layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmVariant {
  /// B, C, M, N, P
  Gemm4d,
  /// M, N, P
  Gemm,
  /// B, M, N, P
  Matmul,
}

impl GemmVariant {
  /// `None` for operations that do not run as a GEMM.
  pub fn detect(operation: &str, iterable_dims: usize) -> Option<Self> {
    if !operation.contains("gemm") && !operation.contains("matmul") {
      return None;
    }
    if iterable_dims == 5 {
      Some(GemmVariant::Gemm4d)
    } else if matches!(operation, "gemm" | "gemm_relu" | "gemm_tanh") {
      Some(GemmVariant::Gemm)
    } else {
      Some(GemmVariant::Matmul)
    }
  }

  /// Tile dimension driven by each `SA_LOOP_CFG` loop id.
  pub fn loop_dims(self) -> &'static [&'static str] {
    match self {
      GemmVariant::Gemm4d => &["B", "C", "M", "N", "P"],
      GemmVariant::Gemm => &["M", "N", "P"],
      GemmVariant::Matmul => &["B", "M", "N", "P"],
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerClass {
  Conv,
  Gemm(GemmVariant),
}

impl LayerClass {
  pub fn tile_order(self) -> TileOrder {
    match self {
      LayerClass::Conv => TileOrder::Conv,
      LayerClass::Gemm(_) => TileOrder::Gemm,
    }
  }

  pub fn loop_dims(self) -> &'static [&'static str] {
    match self {
      LayerClass::Conv => TileOrder::Conv.dims(),
      LayerClass::Gemm(variant) => variant.loop_dims(),
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      LayerClass::Conv => "Conv",
      LayerClass::Gemm(_) => "Gemm",
    }
  }
}

/// Per-buffer tiling as the compiler planned it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferTiling {
  pub ibuf: TileDims,
  pub wbuf: TileDims,
  pub bbuf: TileDims,
  pub obuf: TileDims,
}

impl BufferTiling {
  pub fn get(&self, kind: BufferKind) -> &TileDims {
    match kind {
      BufferKind::Ibuf => &self.ibuf,
      BufferKind::Wbuf => &self.wbuf,
      BufferKind::Bbuf => &self.bbuf,
      BufferKind::Obuf => &self.obuf,
    }
  }
}

fn dim(dims: &TileDims, name: &str) -> u64 {
  dims.get(name).copied().unwrap_or(1).max(1)
}

/// Everything known about one compiled layer before simulation.
#[derive(Debug, Clone)]
pub struct LayerDescriptor {
  pub name: String,
  pub layer_type: LayerType,
  pub class: LayerClass,
  pub arch: ArchConfig,
  pub timing: SystolicConfig,
  pub simd_config: SimdSimConfig,
  pub ddr_dims: TileDims,
  pub tiling: BufferTiling,
  pub stride: i64,
  pub pad: i64,
  pub systolic_loops: SystolicLoops,
  pub simd_tiles: SimdTileCounts,
  /// Instruction words the SIMD pipeline replays.
  pub simd_program: Program,
}

impl LayerDescriptor {
  /// Parse every artifact of a layer directory.
  pub fn load(artifacts: &LayerArtifacts, configs: &ConfigDir) -> SimResult<Self> {
    let trace = StringTrace::load(&artifacts.string_trace)?;
    let layer_type = trace.layer_type()?;

    let arch: ArchConfig = load_json(&artifacts.arch_config)?;
    arch.validate()?;
    let layer: LayerJson = load_json(&artifacts.layer_json)?;
    let op = layer.operation()?;
    let class = match GemmVariant::detect(&op.operation, op.iterable_dimensions.len()) {
      Some(variant) => LayerClass::Gemm(variant),
      None => LayerClass::Conv,
    };

    let words = fs::read_to_string(&artifacts.instructions)
      .map_err(|e| SimError::config(format!("cannot read instruction file {:?}: {}", artifacts.instructions, e)))?;
    // the SIMD half of a fused layer starts at its last SIMD start marker
    let (simd_program, simd_trace) = if layer_type == LayerType::Fused {
      let split = trace.simd_split_line();
      (Program::split_at_line(&words, split)?, trace.tail(split))
    } else {
      (Program::parse(&words)?, trace.clone())
    };

    let simd_tiles = if layer_type == LayerType::Systolic {
      SimdTileCounts::default()
    } else {
      simd_trace.simd_tiles()?
    };

    let (stride, pad) = if layer_type == LayerType::Simd { (0, 0) } else { (op.stride(), op.pad()) };
    let tiling = if layer_type == LayerType::Simd {
      BufferTiling::default()
    } else {
      BufferTiling {
        ibuf: op.ibuf_tiling(),
        wbuf: op.wbuf_tiling(),
        bbuf: op.bbuf_tiling(),
        obuf: op.obuf_tiling(layer_type == LayerType::Fused),
      }
    };

    log::debug!("layer {}: {} {:?}, {} SIMD words", artifacts.name, layer_type.as_str(), class, simd_program.len());

    Ok(Self {
      name: artifacts.name.clone(),
      layer_type,
      class,
      arch,
      timing: configs.systolic.clone(),
      simd_config: configs.simd.clone(),
      ddr_dims: op.iterable_dimensions.clone(),
      tiling,
      stride,
      pad,
      systolic_loops: trace.systolic_loops()?,
      simd_tiles,
      simd_program,
    })
  }

  pub fn has_systolic(&self) -> bool {
    self.layer_type != LayerType::Simd
  }

  pub fn has_simd(&self) -> bool {
    self.layer_type != LayerType::Systolic
  }

  /// Tile counts per loop dimension from the `SA_LOOP_CFG` lines.
  pub fn tile_counts(&self) -> Vec<(&'static str, u64)> {
    let dims = self.class.loop_dims();
    self
      .systolic_loops
      .tile_loops
      .iter()
      .filter_map(|&(loop_id, trips)| dims.get(loop_id).map(|d| (*d, trips)))
      .collect()
  }

  pub fn tile_space(&self) -> TileSpace {
    TileSpace::new(self.class.tile_order(), self.tile_counts())
  }

  /// Work one tile maps onto the array.
  pub fn compute_dims(&self) -> ComputeDims {
    let t = &self.tiling;
    match self.class {
      LayerClass::Conv => ComputeDims::Conv {
        n: dim(&self.ddr_dims, "N"),
        ic: dim(&t.ibuf, "IC"),
        kh: dim(&t.wbuf, "KH"),
        kw: dim(&t.wbuf, "KW"),
        oc: dim(&t.obuf, "OC"),
        oh: dim(&t.obuf, "OH"),
        ow: dim(&t.obuf, "OW"),
      },
      LayerClass::Gemm(_) => ComputeDims::Gemm {
        b: dim(&t.ibuf, "B"),
        c: dim(&t.ibuf, "C"),
        m: dim(&t.ibuf, "M"),
        n: dim(&t.wbuf, "N"),
        p: dim(&t.wbuf, "P"),
      },
    }
  }

  pub fn array(&self) -> ArrayShape {
    ArrayShape { rows: self.arch.array_n, cols: self.arch.array_m }
  }

  fn geometry(&self, kind: BufferKind) -> BufferGeometry {
    let a = &self.arch;
    let t = &self.timing;
    let (banks, depth, width_bits, bandwidth) = match kind {
      BufferKind::Ibuf => (a.array_n, a.ibuf_depth, a.data_width, t.ibuf_bandwidth),
      BufferKind::Wbuf => (a.array_m * a.array_m, a.wbuf_depth, a.wgt_width, t.wbuf_bandwidth),
      BufferKind::Bbuf => (a.array_m, a.bbuf_depth, a.bias_width, t.bbuf_bandwidth),
      BufferKind::Obuf => (a.array_m, a.obuf_bank_depth(), a.acc_width, t.obuf_bandwidth),
    };
    BufferGeometry {
      banks,
      depth,
      width_bits,
      tile_bytes: tile_bytes(self.tiling.get(kind), width_bits),
      bandwidth,
    }
  }

  pub fn systolic_params(&self) -> SystolicParams {
    SystolicParams {
      space: self.tile_space(),
      dims: self.compute_dims(),
      array: self.array(),
      buffers: PerBuffer::from_fn(|kind| self.geometry(kind)),
      ddr_freq_mhz: self.timing.ddr_frequency_mhz,
      latency: self.timing.inf_latency,
      decoder_cycles: self.timing.decoder_cycles,
    }
  }

  /// SIMD pipeline parameters. `fast_run` and `ddr_latency` override the
  /// values of `simd_config.json` when set.
  pub fn pipeline_config(&self, fast_run: Option<bool>, ddr_latency: Option<f64>, max_cycles: u64) -> PipelineConfig {
    PipelineConfig {
      lanes: self.arch.simd_width as usize,
      bandwidth_bytes: self.arch.simd_bandwidth_bytes(),
      vmem_depth: self.arch.vmem_depth as usize,
      fast_run: fast_run.unwrap_or(self.simd_config.fast_run),
      ddr: DdrTiming {
        bandwidth: self.timing.ibuf_bandwidth,
        freq_mhz: self.timing.ddr_frequency_mhz,
        latency: ddr_latency.unwrap_or(self.simd_config.ddr_latency),
      },
      max_cycles,
      ..PipelineConfig::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_gemm_variant_detection() {
    assert_eq!(GemmVariant::detect("conv_bias", 7), None);
    assert_eq!(GemmVariant::detect("gemm", 5), Some(GemmVariant::Gemm4d));
    assert_eq!(GemmVariant::detect("gemm_relu", 3), Some(GemmVariant::Gemm));
    assert_eq!(GemmVariant::detect("matmul", 4), Some(GemmVariant::Matmul));
    assert_eq!(GemmVariant::detect("gemm_no_bias", 3), Some(GemmVariant::Matmul));
  }

  #[test]
  fn test_loop_dims_per_class() {
    assert_eq!(LayerClass::Conv.loop_dims()[5], "OH");
    assert_eq!(LayerClass::Gemm(GemmVariant::Gemm).loop_dims()[0], "M");
    assert_eq!(LayerClass::Gemm(GemmVariant::Matmul).loop_dims()[1], "M");
    assert_eq!(LayerClass::Gemm(GemmVariant::Gemm4d).loop_dims().len(), 5);
  }

  #[test]
  fn test_missing_dims_default_to_one() {
    let dims: TileDims = [("IC".to_string(), 0)].into();
    assert_eq!(dim(&dims, "IC"), 1);
    assert_eq!(dim(&dims, "KH"), 1);
  }
}
