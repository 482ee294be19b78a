// ===========================================
// Genesys layer composition
// ===========================================

use super::energy::{EnergyProvider, EnergyReport, LayerActivity};
use super::layer::LayerDescriptor;
use super::simd::{Pipeline, SimdSummary};
use super::stats::{LayerStats, StatSection};
use super::systolic::{BufferKind, PerBuffer, ReuseMap, SystolicSim, SystolicStats};
use crate::error::SimResult;
use crate::isa::{LayerType, SimdTileCounts};
use serde::Serialize;

/// Knobs that come from the application config rather than the artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
  pub fast_run: Option<bool>,
  pub ddr_latency: Option<f64>,
  pub max_cycles: u64,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self { fast_run: None, ddr_latency: None, max_cycles: 50_000_000 }
  }
}

/// Layer-level cycle totals and their ratios.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenesysTotals {
  pub tot_cycles: f64,
  pub tot_time_us: f64,
  pub load2tot: f64,
  pub sys_compute2tot: f64,
  pub simd2tot: f64,
  pub mem_wait_cycles: f64,
  pub mem_wait2tot: f64,
  pub compute2tot: f64,
}

impl GenesysTotals {
  /// Totals without any overlap bookkeeping.
  pub fn plain(tot_cycles: f64, freq_mhz: f64) -> Self {
    Self {
      tot_cycles,
      tot_time_us: time_us(tot_cycles, freq_mhz),
      ..Default::default()
    }
  }

  fn section(&self) -> StatSection {
    StatSection::new("Genesys")
      .with("totCycles", self.tot_cycles)
      .with("totTime(us)", self.tot_time_us)
      .with("load2tot_cycles", self.load2tot)
      .with("sysCompute2tot_cycles", self.sys_compute2tot)
      .with("simd2tot_cycles", self.simd2tot)
      .with("memWaitCycles", self.mem_wait_cycles)
      .with("memWaitCycles2tot_cycles", self.mem_wait2tot)
      .with("computeCycles2tot_cycles", self.compute2tot)
  }
}

fn time_us(cycles: f64, freq_mhz: f64) -> f64 {
  if freq_mhz > 0.0 {
    cycles / freq_mhz
  } else {
    0.0
  }
}

fn ratio(part: f64, total: f64) -> f64 {
  if total > 0.0 {
    part / total
  } else {
    0.0
  }
}

/// Per-tile costs the fused schedule interleaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FusedCosts {
  pub sys_compute: u64,
  /// IBUF refill.
  pub sys_load: u64,
  /// WBUF refill.
  pub weight_load: u64,
  pub simd_load: f64,
  pub simd_compute: f64,
  pub simd_store: f64,
  /// SIMD tiles that still have to fetch operands from DDR.
  pub simd_load_tiles: u64,
  pub decoder_cycles: u64,
}

impl FusedCosts {
  /// SIMD cost of post-processing systolic tile `tile`.
  pub fn simd(&self, tile: u64) -> f64 {
    let load = if tile < self.simd_load_tiles { self.simd_load } else { 0.0 };
    load + self.simd_compute + self.simd_store
  }

  /// Refill cost before systolic tile `tile`; nothing past the last tile.
  fn load(&self, reuse: &ReuseMap, tile: u64, tiles: u64) -> u64 {
    if tile >= tiles {
      return 0;
    }
    let ibuf = if reuse.is_resident(BufferKind::Ibuf, tile) { 0 } else { self.sys_load };
    let wbuf = if reuse.is_resident(BufferKind::Wbuf, tile) { 0 } else { self.weight_load };
    ibuf + wbuf
  }
}

/// Outcome of the fused systolic/SIMD schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusedSchedule {
  /// Prologue, one slot per systolic tile, epilogue.
  pub slots: Vec<f64>,
  pub tot_cycles: f64,
  pub tot_load: f64,
  pub tot_sys_compute: f64,
  pub tot_simd_compute: f64,
  pub tot_store: f64,
  pub tot_simd_cycles: f64,
}

impl FusedSchedule {
  fn record(&mut self, slot: f64) {
    self.slots.push(slot);
    self.tot_cycles += slot.ceil();
  }

  pub fn totals(&self, freq_mhz: f64) -> GenesysTotals {
    let tot = self.tot_cycles;
    let busiest = self.tot_sys_compute.max(self.tot_simd_compute + self.tot_store);
    let mem_wait = (tot - busiest).max(0.0);
    let mem_wait2tot = ratio(mem_wait, tot);
    GenesysTotals {
      tot_cycles: tot,
      tot_time_us: time_us(tot, freq_mhz),
      load2tot: ratio(self.tot_load, tot),
      sys_compute2tot: ratio(self.tot_sys_compute, tot),
      simd2tot: ratio(self.tot_simd_compute + self.tot_store, tot),
      mem_wait_cycles: mem_wait,
      mem_wait2tot,
      compute2tot: 1.0 - mem_wait2tot,
    }
  }
}

/// Overlap systolic tiles with the SIMD post-processing of the previous
/// tile. Slot t computes tile t on the array while DDR refills tile t+1
/// and the SIMD unit drains tile t-1; the epilogue drains the last tile.
///
/// # Arguments
/// * `costs` - per-tile cycle costs of both engines
/// * `reuse` - residency map of the systolic tile space
/// * `tiles` - number of systolic tiles
pub fn fused_schedule(costs: &FusedCosts, reuse: &ReuseMap, tiles: u64) -> FusedSchedule {
  let mut out = FusedSchedule::default();
  let compute = costs.sys_compute as f64;

  let first = costs.load(reuse, 0, tiles) as f64;
  out.tot_load += first;
  out.record(first);

  for tile in 0..tiles {
    let next_load = costs.load(reuse, tile + 1, tiles) as f64;
    let slot = if tile == 0 {
      out.tot_load += next_load;
      compute.max(next_load)
    } else {
      let simd = costs.simd(tile - 1);
      out.tot_load += next_load;
      out.tot_simd_compute += costs.simd_compute;
      out.tot_store += costs.simd_store;
      out.tot_simd_cycles += simd;
      compute.max(next_load + simd)
    };
    out.tot_sys_compute += compute;
    out.record(slot);
  }

  if tiles > 0 {
    let simd = costs.simd(tiles - 1);
    out.tot_simd_compute += costs.simd_compute;
    out.tot_store += costs.simd_store;
    out.tot_simd_cycles += simd;
    out.record(simd);
  }

  out.tot_cycles += costs.decoder_cycles as f64;
  out
}

/// SIMD-only layers: every compute tile pays compute and store, and the
/// larger VMEM load is paid once per load tile.
pub fn simd_only_cycles(summary: &SimdSummary, tiles: &SimdTileCounts) -> f64 {
  (summary.per_tile_cycles + summary.store_cycles) * tiles.compute_tiles as f64
    + summary.load_cycles() * tiles.max_load_tiles() as f64
}

/// Everything one layer run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerResult {
  pub stats: LayerStats,
  pub totals: GenesysTotals,
  pub systolic: Option<SystolicStats>,
  pub simd: Option<SimdSummary>,
  pub fused: Option<FusedSchedule>,
  pub activity: LayerActivity,
  pub energy: EnergyReport,
}

/// Runs one layer on the systolic model, the SIMD pipeline, or both.
pub struct Genesys<'a> {
  layer: &'a LayerDescriptor,
  options: RunOptions,
  energy: &'a dyn EnergyProvider,
}

impl<'a> Genesys<'a> {
  pub fn new(layer: &'a LayerDescriptor, options: RunOptions, energy: &'a dyn EnergyProvider) -> Self {
    Self { layer, options, energy }
  }

  /// Fused layers share DDR between the two engines.
  fn bandwidth_factor(&self) -> f64 {
    if self.layer.layer_type == LayerType::Fused {
      0.5
    } else {
      1.0
    }
  }

  pub fn systolic(&self) -> SystolicSim {
    let params = self.layer.systolic_params().scale_bandwidth(self.bandwidth_factor());
    SystolicSim::new(params)
  }

  /// Pipeline loaded with the layer's SIMD program, ready to step.
  pub fn pipeline(&self) -> Pipeline {
    let mut config = self
      .layer
      .pipeline_config(self.options.fast_run, self.options.ddr_latency, self.options.max_cycles);
    config.ddr.bandwidth *= self.bandwidth_factor();
    let mut pipeline = Pipeline::new(config);
    pipeline.load(&self.layer.simd_program);
    pipeline
  }

  pub fn run(&self) -> SimResult<LayerResult> {
    self.run_with(|pipeline| pipeline.run())
  }

  /// Run the layer, handing the SIMD pipeline to `drive` so callers can
  /// step or trace it.
  pub fn run_with(&self, drive: impl FnOnce(&mut Pipeline) -> SimResult<SimdSummary>) -> SimResult<LayerResult> {
    let layer = self.layer;
    log::info!("simulating layer {} ({})", layer.name, layer.layer_type.as_str());

    let mut sim = self.systolic();
    let systolic = if layer.has_systolic() { Some(sim.run()?) } else { None };
    let simd = if layer.has_simd() {
      let mut pipeline = self.pipeline();
      Some(drive(&mut pipeline)?)
    } else {
      None
    };

    let freq = layer.timing.frequency;
    let (totals, fused) = match (&systolic, &simd) {
      (Some(sys), Some(summary)) => {
        let costs = FusedCosts {
          sys_compute: sys.per_tile_compute_cycles,
          sys_load: sim.transfer_cycles(&[BufferKind::Ibuf]),
          weight_load: sys.weight_load_cycles,
          simd_load: summary.load_cycles(),
          simd_compute: summary.per_tile_cycles,
          simd_store: summary.store_cycles,
          simd_load_tiles: layer.simd_tiles.max_load_tiles(),
          decoder_cycles: layer.timing.decoder_cycles,
        };
        let schedule = fused_schedule(&costs, sim.reuse(), sys.num_tiles);
        (schedule.totals(freq), Some(schedule))
      },
      (Some(sys), None) => (GenesysTotals::plain(sys.total_cycles as f64, freq), None),
      (None, Some(summary)) => (GenesysTotals::plain(simd_only_cycles(summary, &layer.simd_tiles), freq), None),
      (None, None) => (GenesysTotals::plain(0.0, freq), None),
    };

    let activity = self.activity(&sim, systolic.as_ref(), simd.as_ref());
    let energy = self.energy.estimate(&activity)?;
    log::info!(
      "layer {} done: {} cycles, {:.3} us",
      layer.name,
      totals.tot_cycles,
      totals.tot_time_us
    );

    let stats = self.stats(&totals, systolic.as_ref(), simd.as_ref(), fused.as_ref(), &energy);
    Ok(LayerResult { stats, totals, systolic, simd, fused, activity, energy })
  }

  fn activity(&self, sim: &SystolicSim, systolic: Option<&SystolicStats>, simd: Option<&SimdSummary>) -> LayerActivity {
    let layer = self.layer;
    let mut activity = LayerActivity::default();

    if let Some(sys) = systolic {
      let params = sim.params();
      let loops = layer.systolic_loops.compute_loops.max(1);
      let per_tile = |kind: BufferKind| loops * params.buffers[kind].banks * sys.num_tiles;
      let words = |kind: BufferKind| {
        let geo = &params.buffers[kind];
        if geo.width_bits == 0 {
          0
        } else {
          geo.tile_bytes * 8 / geo.width_bits as u64
        }
      };
      activity.reads = PerBuffer::from_fn(per_tile);
      activity.writes = PerBuffer::from_fn(|kind| match kind {
        BufferKind::Obuf => per_tile(kind),
        _ => sim.reuse().transfers(kind) * words(kind),
      });
      activity.dram_bytes = BufferKind::ALL
        .into_iter()
        .map(|kind| sim.reuse().transfers(kind) * params.buffers[kind].tile_bytes)
        .sum();
      activity.macs = sys.macs_per_tile * sys.num_tiles;
    }

    if let Some(summary) = simd {
      let tiles = &layer.simd_tiles;
      let access = &summary.access;
      activity.reads[BufferKind::Obuf] += access.obuf;
      activity.dram_bytes += summary.load_tile_size_vmem1 * tiles.vmem1_load_tiles
        + summary.load_tile_size_vmem2 * tiles.vmem2_load_tiles
        + summary.store_tile_size * tiles.compute_tiles;
      activity.simd_accesses =
        (access.vmem1() + access.vmem2() + access.imm_read + access.imm_write) * tiles.compute_tiles;
    }

    activity
  }

  fn stats(
    &self,
    totals: &GenesysTotals,
    systolic: Option<&SystolicStats>,
    simd: Option<&SimdSummary>,
    fused: Option<&FusedSchedule>,
    energy: &EnergyReport,
  ) -> LayerStats {
    let layer = self.layer;
    let num_tiles = match (systolic, simd) {
      (Some(sys), _) => sys.num_tiles,
      (None, Some(summary)) => summary.num_tiles,
      (None, None) => 0,
    };

    let compiler = StatSection::new("Compiler")
      .with("layerName", layer.name.as_str())
      .with("layerType", layer.layer_type.as_str())
      .with("layerClass", layer.class.as_str())
      .with("DDRTiling", layer.ddr_dims.clone())
      .with("IBUFTiling", layer.tiling.ibuf.clone())
      .with("WBUFTiling", layer.tiling.wbuf.clone())
      .with("BBUFTiling", layer.tiling.bbuf.clone())
      .with("OBUFTiling", layer.tiling.obuf.clone())
      .with("NumTiles", num_tiles)
      .with("stride", layer.stride)
      .with("pad", layer.pad);

    let arch = &layer.arch;
    let sys_depth = |depth: u64| if layer.has_systolic() { depth } else { 0 };
    let arch_section = StatSection::new("Arch")
      .with("arrayN", arch.array_n)
      .with("arrayM", arch.array_m)
      .with("memBandwidth", layer.timing.ibuf_bandwidth * self.bandwidth_factor())
      .with("memLatency", layer.timing.inf_latency)
      .with("ibufDepth", sys_depth(arch.ibuf_depth))
      .with("obufDepth", sys_depth(arch.obuf_bank_depth()))
      .with("wbufDepth", sys_depth(arch.wbuf_depth))
      .with("bbufDepth", sys_depth(arch.bbuf_depth))
      .with("vmem1Depth", if layer.has_simd() { arch.vmem_depth } else { 0 })
      .with("freq", layer.timing.frequency);

    let sys = systolic.cloned().unwrap_or_default();
    let systotal = match fused {
      Some(schedule) => schedule.tot_sys_compute,
      None => sys.total_cycles as f64,
    };
    let systolic_section = StatSection::new("Systolic")
      .with("systotalCycles", systotal)
      .with("sysComputeCyclesPerTile", sys.per_tile_compute_cycles)
      .with("sysLoadCyclesPerTile", sys.input_load_cycles)
      .with("sysStoreCyclesPerTile", sys.output_store_cycles)
      .with("sysWeightLoadCyclesPerTile", sys.weight_load_cycles)
      .with("perTileIbufUtil", sys.ibuf_util)
      .with("perTileObufUtil", sys.obuf_util)
      .with("perTileWbufUtil", sys.wbuf_util)
      .with("perTileBbufUtil", sys.bbuf_util)
      .with("perTileComputeUtils", sys.compute_util);

    let summary = simd.cloned().unwrap_or_default();
    let tiles = match simd {
      Some(_) => layer.simd_tiles.clone(),
      None => SimdTileCounts { compute_tiles: 0, vmem1_load_tiles: 0, vmem2_load_tiles: 0, ..Default::default() },
    };
    let simd_total = match (fused, simd) {
      (Some(schedule), _) => schedule.tot_simd_cycles,
      (None, Some(_)) => totals.tot_cycles,
      (None, None) => 0.0,
    };
    let knobs = &layer.simd_config;
    let simd_section = StatSection::new("Simd")
      .with("simdtotalCycles", simd_total)
      .with("simdComputeCyclesPerTile", summary.per_tile_cycles)
      .with("simdLoadCycles", summary.load_cycles())
      .with("simdStoreCycles", summary.store_cycles)
      .with("NumComputeTiles", tiles.compute_tiles)
      .with("VMEM1LoadTiles", tiles.vmem1_load_tiles)
      .with("VMEM2LoadTiles", tiles.vmem2_load_tiles)
      .with("StoreTiles", tiles.compute_tiles)
      .with("StoreTilesNameSpace", if simd.is_some() { tiles.store_namespace.name() } else { "" })
      .with("perTileLogCycles", summary.per_tile_log_cycles)
      .with("stateChangeCount", summary.state_change_count as u64)
      .with("ldInitDelayCycles", knobs.ld_init_delay_cycles.unwrap_or(0.0))
      .with("ldScaleOfDelay", knobs.ld_scale_of_delay.unwrap_or(0.0))
      .with("stInitDelayCycles", knobs.st_init_delay_cycles.unwrap_or(0.0))
      .with("stScaleOfDelay", knobs.st_scale_of_delay.unwrap_or(0.0));

    let mut energy_section = StatSection::new("Energy");
    for &(key, value) in &energy.entries {
      energy_section = energy_section.with(key, value);
    }

    LayerStats {
      sections: vec![compiler, arch_section, totals.section(), systolic_section, simd_section, energy_section],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::genesys::systolic::{TileOrder, TileSpace};

  fn costs() -> FusedCosts {
    FusedCosts {
      sys_compute: 100,
      sys_load: 30,
      weight_load: 20,
      simd_load: 50.0,
      simd_compute: 40.0,
      simd_store: 10.0,
      simd_load_tiles: 1,
      decoder_cycles: 5,
    }
  }

  #[test]
  fn test_single_tile_schedule() {
    let reuse = TileSpace::new(TileOrder::Conv, [("OC", 1)]).reuse();
    let schedule = fused_schedule(&costs(), &reuse, 1);
    // prologue loads both buffers, the tile computes alone, the epilogue drains
    assert_eq!(schedule.slots, vec![50.0, 100.0, 100.0]);
    assert_eq!(schedule.tot_cycles, 255.0);
    assert_eq!(schedule.tot_sys_compute, 100.0);
    assert_eq!(schedule.tot_simd_cycles, 100.0);
  }

  #[test]
  fn test_interior_slots_overlap() {
    // OC=3: IBUF stays resident, WBUF reloads every tile
    let reuse = TileSpace::new(TileOrder::Conv, [("OC", 3)]).reuse();
    let schedule = fused_schedule(&costs(), &reuse, 3);
    // tile 1: max(100, 20 + (50 + 40 + 10)) = 120; tile 2: max(100, 0 + 50)
    assert_eq!(schedule.slots, vec![50.0, 100.0, 120.0, 100.0, 50.0]);
    assert_eq!(schedule.tot_cycles, 50.0 + 100.0 + 120.0 + 100.0 + 50.0 + 5.0);
    assert_eq!(schedule.tot_load, 50.0 + 20.0 + 20.0);
    assert_eq!(schedule.tot_simd_compute, 120.0);
    assert_eq!(schedule.tot_store, 30.0);
  }

  #[test]
  fn test_fused_ratios() {
    let reuse = TileSpace::new(TileOrder::Conv, [("OC", 3)]).reuse();
    let totals = fused_schedule(&costs(), &reuse, 3).totals(200.0);
    assert_eq!(totals.tot_cycles, 425.0);
    assert!((totals.tot_time_us - 2.125).abs() < 1e-12);
    assert_eq!(totals.mem_wait_cycles, 425.0 - 300.0);
    assert!(totals.mem_wait2tot >= 0.0 && totals.mem_wait2tot <= 1.0);
    assert!((totals.compute2tot + totals.mem_wait2tot - 1.0).abs() < 1e-12);
    assert!((totals.simd2tot - 150.0 / 425.0).abs() < 1e-12);
  }

  #[test]
  fn test_simd_only_cycles() {
    let summary = SimdSummary {
      per_tile_cycles: 30.0,
      store_cycles: 10.0,
      load_cycles_vmem1: 20.0,
      load_cycles_vmem2: 25.0,
      ..Default::default()
    };
    let tiles = SimdTileCounts { compute_tiles: 4, vmem1_load_tiles: 2, vmem2_load_tiles: 3, ..Default::default() };
    assert_eq!(simd_only_cycles(&summary, &tiles), 40.0 * 4.0 + 25.0 * 3.0);
  }

  #[test]
  fn test_empty_totals_have_no_nan() {
    let totals = FusedSchedule::default().totals(100.0);
    assert_eq!(totals.load2tot, 0.0);
    assert_eq!(totals.compute2tot, 1.0);
  }
}
