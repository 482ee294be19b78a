use super::bank::BankedMemory;
use super::profiler::SingleBaseLoopProfiler;
use super::stats::MemoryAccessStats;

/// Everything the stages share during one SIMD run. Owned by the pipeline
/// and lent to one stage at a time, so each resource has a single writer
/// per cycle.
#[derive(Debug, Clone)]
pub struct SimulationState {
  pub banks: BankedMemory,
  /// Write address each lane published for bank-shuffle moves.
  pub dest_bank_write_address: Vec<i64>,
  pub access: MemoryAccessStats,
  pub profiler: SingleBaseLoopProfiler,
  pub global_cycle: u64,
}

impl SimulationState {
  pub fn new(lanes: usize, depth: usize, imm_depth: usize) -> Self {
    Self {
      banks: BankedMemory::new(lanes, depth, imm_depth),
      dest_bank_write_address: vec![0; lanes],
      access: MemoryAccessStats::new(lanes),
      profiler: SingleBaseLoopProfiler::default(),
      global_cycle: 0,
    }
  }

  pub fn lanes(&self) -> usize {
    self.dest_bank_write_address.len()
  }

  pub fn reset(&mut self) {
    let lanes = self.lanes();
    self.banks.reset();
    self.dest_bank_write_address.fill(0);
    self.access = MemoryAccessStats::new(lanes);
    self.profiler = SingleBaseLoopProfiler::default();
    self.global_cycle = 0;
  }
}
