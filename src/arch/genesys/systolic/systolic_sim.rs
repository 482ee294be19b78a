use super::buffer::{BufferGeometry, BufferKind, DoubleBufferTags, PerBuffer};
use super::compute::{ArrayShape, ComputeDims, TileCompute};
use super::tiling::{ReuseMap, TileSpace};
use crate::builtin::Module;
use crate::error::SimResult;
use serde::Serialize;

/// Everything the systolic model needs to know about one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SystolicParams {
  pub space: TileSpace,
  pub dims: ComputeDims,
  pub array: ArrayShape,
  pub buffers: PerBuffer<BufferGeometry>,
  pub ddr_freq_mhz: f64,
  /// DDR access latency in cycles.
  pub latency: f64,
  pub decoder_cycles: u64,
}

impl SystolicParams {
  /// Same layer behind a link with every buffer bandwidth scaled by `factor`.
  pub fn scale_bandwidth(&self, factor: f64) -> Self {
    let mut out = self.clone();
    out.buffers = PerBuffer::from_fn(|kind| {
      let geo = &self.buffers[kind];
      geo.with_bandwidth(geo.bandwidth * factor)
    });
    out
  }
}

/// Interior tile cost: compute overlaps the next load plus the previous store.
pub fn overlap(compute: u64, load: u64, store: u64) -> u64 {
  compute.max(load + store)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystolicStats {
  pub total_cycles: u64,
  pub compute_cycles: u64,
  pub per_tile_compute_cycles: u64,
  pub input_load_cycles: u64,
  pub output_store_cycles: u64,
  pub ibuf_util: f64,
  pub obuf_util: f64,
  pub wbuf_util: f64,
  pub bbuf_util: f64,
  pub compute_util: f64,
  pub weight_load_cycles: u64,
  pub num_tiles: u64,
  pub macs_per_tile: u64,
  pub decoder_cycles: u64,
  /// Schedule slots: prologue, one per tile, epilogue.
  pub per_tile_cycles: Vec<u64>,
}

impl SystolicStats {
  pub const FIELDS: [&'static str; 11] = [
    "totalCycles",
    "computeCycles",
    "perTileComputeCycles",
    "inputLoadCycles",
    "outputStoreCycles",
    "perTileIbufUtil",
    "perTileObufUtil",
    "perTileWbufUtil",
    "perTileBbufUtil",
    "perTileComputeUtils",
    "weightLoadCycles",
  ];

  pub fn to_vec(&self) -> Vec<f64> {
    vec![
      self.total_cycles as f64,
      self.compute_cycles as f64,
      self.per_tile_compute_cycles as f64,
      self.input_load_cycles as f64,
      self.output_store_cycles as f64,
      self.ibuf_util,
      self.obuf_util,
      self.wbuf_util,
      self.bbuf_util,
      self.compute_util,
      self.weight_load_cycles as f64,
    ]
  }

  fn record(&mut self, cycles: u64) {
    self.per_tile_cycles.push(cycles);
    self.total_cycles += cycles;
  }
}

/// Closed-form tile scheduler for the systolic array and its four buffers.
#[derive(Debug, Clone)]
pub struct SystolicSim {
  params: SystolicParams,
  reuse: ReuseMap,
  tags: PerBuffer<DoubleBufferTags>,
  compute: TileCompute,
}

impl SystolicSim {
  pub fn new(params: SystolicParams) -> Self {
    let reuse = params.space.reuse();
    Self::with_reuse(params, reuse)
  }

  /// Schedule against an externally supplied residency map.
  pub fn with_reuse(params: SystolicParams, reuse: ReuseMap) -> Self {
    let compute = params.dims.tile(params.array);
    Self {
      params,
      reuse,
      tags: PerBuffer::default(),
      compute,
    }
  }

  pub fn params(&self) -> &SystolicParams {
    &self.params
  }

  pub fn reuse(&self) -> &ReuseMap {
    &self.reuse
  }

  pub fn tags(&self) -> &PerBuffer<DoubleBufferTags> {
    &self.tags
  }

  pub fn tile_compute(&self) -> TileCompute {
    self.compute
  }

  pub fn num_tiles(&self) -> u64 {
    self.params.space.len()
  }

  /// Cycles to move one tile of each of `kinds` over DDR in one burst.
  pub fn transfer_cycles(&self, kinds: &[BufferKind]) -> u64 {
    if kinds.is_empty() {
      return 0;
    }
    let cycles: f64 = kinds
      .iter()
      .map(|&kind| self.params.buffers[kind].transfer_cycles(self.params.ddr_freq_mhz))
      .sum();
    (cycles + self.params.latency).ceil() as u64
  }

  /// Cycles to refill every input buffer `tile` does not find resident.
  pub fn load_cycles(&self, tile: u64) -> u64 {
    let reloads: Vec<BufferKind> = BufferKind::INPUTS
      .into_iter()
      .filter(|&kind| !self.reuse.is_resident(kind, tile))
      .collect();
    self.transfer_cycles(&reloads)
  }

  pub fn weight_load_cycles(&self) -> u64 {
    self.transfer_cycles(&[BufferKind::Wbuf])
  }

  pub fn store_cycles(&self) -> u64 {
    self.transfer_cycles(&[BufferKind::Obuf])
  }

  fn issue_load(&mut self, tile: u64) -> SimResult<u64> {
    for kind in BufferKind::INPUTS {
      if !self.reuse.is_resident(kind, tile) {
        self.tags[kind].load(kind)?;
      }
    }
    Ok(self.load_cycles(tile))
  }

  fn issue_store(&mut self) -> SimResult<u64> {
    self.tags[BufferKind::Obuf].store(BufferKind::Obuf)?;
    Ok(self.store_cycles())
  }

  fn advance(&mut self, tile: u64) {
    for kind in BufferKind::ALL {
      if !self.reuse.is_resident(kind, tile) {
        self.tags[kind].advance();
      }
    }
  }

  /// Walk the tile space: a load-only prologue, one slot per tile, and a
  /// store-only epilogue, plus the one-time decoder overhead.
  pub fn run(&mut self) -> SimResult<SystolicStats> {
    self.reset();
    let tiles = self.num_tiles();
    let compute = self.compute.cycles;
    let mut stats = SystolicStats {
      per_tile_compute_cycles: compute,
      num_tiles: tiles,
      macs_per_tile: self.compute.macs,
      decoder_cycles: self.params.decoder_cycles,
      weight_load_cycles: self.weight_load_cycles(),
      ibuf_util: self.params.buffers[BufferKind::Ibuf].bank_utilization(),
      obuf_util: self.params.buffers[BufferKind::Obuf].bank_utilization(),
      wbuf_util: self.params.buffers[BufferKind::Wbuf].bank_utilization(),
      bbuf_util: self.params.buffers[BufferKind::Bbuf].bank_utilization(),
      compute_util: self.compute.utilization,
      ..Default::default()
    };

    let first = self.issue_load(0)?;
    stats.input_load_cycles = first;
    stats.record(first);

    for tile in 0..tiles {
      self.advance(tile);
      let next_load = if tile + 1 < tiles { self.issue_load(tile + 1)? } else { 0 };
      // a fresh output tile means the previous one is complete
      let store = if tile > 0 && !self.reuse.is_resident(BufferKind::Obuf, tile) {
        self.issue_store()?
      } else {
        0
      };
      let slot = overlap(compute, next_load, store);
      log::debug!(
        "systolic tile {}/{}: compute {} load {} store {} -> {}",
        tile,
        tiles,
        compute,
        next_load,
        store,
        slot
      );
      stats.compute_cycles += compute;
      stats.record(slot);
    }

    self.tags[BufferKind::Obuf].advance();
    let last = self.issue_store()?;
    stats.output_store_cycles = last;
    stats.record(last);

    stats.total_cycles += self.params.decoder_cycles;
    Ok(stats)
  }
}

impl Module for SystolicSim {
  fn name(&self) -> &str {
    "systolic"
  }

  fn reset(&mut self) {
    self.tags = PerBuffer::default();
  }
}
