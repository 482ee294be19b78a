use super::address_generation::AddressGeneration;
use super::alu::AluLane;
use super::decode::{Control, Decode};
use super::fetch::InstructionFetch;
use super::profiler::DdrTiming;
use super::stage::{Stage, StageSnapshot};
use super::state::SimulationState;
use super::stats::MemoryAccessTotals;
use crate::builtin::Module;
use crate::error::{SimError, SimResult};
use crate::isa::Program;
use serde::Serialize;

/// Stages ahead of the ALU lanes: fetch, decode, address generation.
pub const FRONT_STAGES: usize = 3;
pub const IMM_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
  pub lanes: usize,
  /// DMA bytes moved per cycle.
  pub bandwidth_bytes: u64,
  pub vmem_depth: usize,
  pub imm_depth: usize,
  /// Simulate one base-loop iteration and extrapolate the rest.
  pub fast_run: bool,
  pub ddr: DdrTiming,
  pub max_cycles: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      lanes: 16,
      bandwidth_bytes: 64,
      vmem_depth: 1024,
      imm_depth: IMM_DEPTH,
      fast_run: true,
      ddr: DdrTiming { bandwidth: 25.6e9, freq_mhz: 1000.0, latency: 100.0 },
      max_cycles: 50_000_000,
    }
  }
}

/// Result of one SIMD run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimdSummary {
  pub cycle: f64,
  pub per_tile_cycles: f64,
  pub load_cycles_vmem1: f64,
  pub load_cycles_vmem2: f64,
  pub store_cycles: f64,
  pub num_tiles: u64,
  pub load_tile_size_vmem1: u64,
  pub load_tile_size_vmem2: u64,
  pub store_tile_size: u64,
  pub access: MemoryAccessTotals,
  pub per_tile_log_cycles: f64,
  pub state_change_count: u32,
  pub global_cycle: u64,
}

impl SimdSummary {
  pub fn load_cycles(&self) -> f64 {
    self.load_cycles_vmem1.max(self.load_cycles_vmem2)
  }
}

/// Fetch, decode, address generation and `lanes` ALU lanes in lock-step.
#[derive(Debug, Clone)]
pub struct Pipeline {
  config: PipelineConfig,
  fetch: InstructionFetch,
  decode: Decode,
  addrgen: AddressGeneration,
  lanes: Vec<AluLane>,
  state: SimulationState,
  state_changes: u32,
}

impl Pipeline {
  pub fn new(config: PipelineConfig) -> Self {
    let lanes = config.lanes.max(1);
    Self {
      fetch: InstructionFetch::new(),
      decode: Decode::new(lanes, config.bandwidth_bytes),
      addrgen: AddressGeneration::new(lanes),
      lanes: (0..lanes).map(|i| AluLane::new(i, i + 1 == lanes)).collect(),
      state: SimulationState::new(lanes, config.vmem_depth, config.imm_depth),
      state_changes: 0,
      config,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn stage_count(&self) -> usize {
    FRONT_STAGES + self.lanes.len()
  }

  pub fn state(&self) -> &SimulationState {
    &self.state
  }

  pub fn cycle(&self) -> u64 {
    self.state.global_cycle
  }

  pub fn fetch(&self) -> &InstructionFetch {
    &self.fetch
  }

  pub fn decode(&self) -> &Decode {
    &self.decode
  }

  pub fn address_generation(&self) -> &AddressGeneration {
    &self.addrgen
  }

  pub fn lanes(&self) -> &[AluLane] {
    &self.lanes
  }

  /// Reset every stage and latch the first word of `program`.
  pub fn load(&mut self, program: &Program) {
    self.reset();
    self.state_changes = program.state_change_count();
    self.fetch.load(&program.instructions);
  }

  pub fn is_finished(&self) -> bool {
    self.fetch.is_finished()
      && self.decode.is_finished()
      && self.addrgen.is_finished()
      && self.lanes.iter().all(|lane| lane.is_finished())
  }

  /// One global cycle: every stage ticks, then the pull phase runs back to
  /// front.
  pub fn step(&mut self) -> SimResult<()> {
    self.state.global_cycle += 1;
    if self.state.global_cycle > self.config.max_cycles {
      return Err(SimError::invariant(format!(
        "SIMD pipeline did not drain within {} cycles (pc {})",
        self.config.max_cycles,
        self.fetch.pc()
      )));
    }

    self.fetch.tick();
    for control in self.decode.tick(&mut self.state)? {
      self.apply(control);
    }
    self.addrgen.tick(&mut self.state)?;
    for lane in self.lanes.iter_mut() {
      lane.tick(&mut self.state)?;
    }
    self.propagate();
    Ok(())
  }

  pub fn run(&mut self) -> SimResult<SimdSummary> {
    while !self.is_finished() {
      self.step()?;
    }
    log::debug!("SIMD pipeline drained after {} cycles", self.state.global_cycle);
    Ok(self.summary())
  }

  fn apply(&mut self, control: Control) {
    log::debug!("cycle {}: {:?}", self.state.global_cycle, control);
    match control {
      Control::StartAluLoop { inst_cnt, iter_cnt, nested } => {
        let left = u32::try_from(iter_cnt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.fetch.start_loop(inst_cnt as usize, left, nested);
      },
      Control::StartPermutation { total } => self.addrgen.set_permutation_total(total),
      Control::SetBaseLoop { left } => {
        let left = if self.config.fast_run { 0 } else { left };
        self.fetch.set_base_loop(left);
      },
    }
  }

  /// A stalled stage blocks every stage in front of it, except that a
  /// stage holding a NOP never propagates the stall.
  fn propagate(&mut self) {
    let mut stalled = false;
    for i in (0..self.lanes.len()).rev() {
      if self.lanes[i].core().holds_nop() {
        stalled = false;
      }
      if stalled {
        continue;
      }
      stalled = if i == 0 {
        self.lanes[0].pull_from(&mut self.addrgen)
      } else {
        let (head, tail) = self.lanes.split_at_mut(i);
        tail[0].pull_from(&mut head[i - 1])
      };
    }

    if self.addrgen.core().holds_nop() {
      stalled = false;
    }
    if !stalled {
      stalled = self.addrgen.pull_from_decode(&mut self.decode);
    }

    if self.decode.core().holds_nop() {
      stalled = false;
    }
    if !stalled {
      stalled = self.decode.pull_from(&mut self.fetch);
    }

    if self.fetch.core().holds_nop() {
      stalled = false;
    }
    if !stalled && self.fetch.advance() {
      self.decode.should_inc_base_iter = true;
    }
  }

  pub fn summary(&self) -> SimdSummary {
    let profile = self.state.profiler.profile(self.stage_count(), &self.config.ddr);
    let cycle = if self.config.fast_run {
      profile.projected_cycles
    } else {
      self.state.global_cycle as f64
    };
    SimdSummary {
      cycle,
      per_tile_cycles: profile.per_tile_cycles,
      load_cycles_vmem1: profile.load_cycles_vmem1,
      load_cycles_vmem2: profile.load_cycles_vmem2,
      store_cycles: profile.store_cycles,
      num_tiles: profile.num_tiles,
      load_tile_size_vmem1: profile.load_tile_size_vmem1,
      load_tile_size_vmem2: profile.load_tile_size_vmem2,
      store_tile_size: profile.store_tile_size,
      access: self.state.access.totals(),
      per_tile_log_cycles: profile.per_tile_log_cycles,
      state_change_count: self.state_changes,
      global_cycle: self.state.global_cycle,
    }
  }

  pub fn snapshots(&self) -> Vec<StageSnapshot> {
    let mut out = vec![self.fetch.snapshot(), self.decode.snapshot(), self.addrgen.snapshot()];
    out.extend(self.lanes.iter().map(|lane| lane.snapshot()));
    out
  }
}

impl Module for Pipeline {
  fn name(&self) -> &str {
    "simd"
  }

  fn reset(&mut self) {
    self.fetch.reset();
    self.decode.reset();
    self.addrgen.reset();
    for lane in self.lanes.iter_mut() {
      lane.reset();
    }
    self.state.reset();
    self.state_changes = 0;
  }
}
