use crate::isa::{Instruction, Namespace};
use serde::Serialize;

/// Off-chip memory timing used to turn DMA bytes into cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DdrTiming {
  /// Bytes per second.
  pub bandwidth: f64,
  pub freq_mhz: f64,
  pub latency: f64,
}

impl DdrTiming {
  pub fn bytes_per_cycle(&self) -> f64 {
    self.bandwidth / (self.freq_mhz * 1e6)
  }

  /// `bytes / bpc + latency`, or nothing when no bytes move.
  pub fn transfer_cycles(&self, bytes: u64) -> f64 {
    if bytes == 0 {
      0.0
    } else {
      bytes as f64 / self.bytes_per_cycle() + self.latency
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfiledInst {
  pub inst: Instruction,
  pub ended_cycle: u64,
}

/// Closed-form cost of one base-loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimdProfile {
  pub per_tile_cycles: f64,
  /// Projected cycles for every base iteration, from the single profiled one.
  pub projected_cycles: f64,
  pub load_cycles_vmem1: f64,
  pub load_cycles_vmem2: f64,
  pub store_cycles: f64,
  pub num_tiles: u64,
  pub load_tile_size_vmem1: u64,
  pub load_tile_size_vmem2: u64,
  pub store_tile_size: u64,
  pub per_tile_log_cycles: f64,
}

/// Watches the instructions leaving the last lane and the DMA volumes
/// configured by decode during one base-loop iteration.
#[derive(Debug, Clone, Default)]
pub struct SingleBaseLoopProfiler {
  records: Vec<ProfiledInst>,
  prev: Option<Instruction>,
  total_base_loop_iterations: u64,
  load_bytes_vmem1: u64,
  load_bytes_vmem2: u64,
  store_bytes: Vec<u64>,
}

impl SingleBaseLoopProfiler {
  pub fn records(&self) -> &[ProfiledInst] {
    &self.records
  }

  pub fn total_base_loop_iterations(&self) -> u64 {
    self.total_base_loop_iterations
  }

  pub fn set_total_base_loop_iterations(&mut self, count: u64) {
    self.total_base_loop_iterations = count;
  }

  pub fn add_load_bytes(&mut self, ns: Namespace, bytes: u64) {
    match ns {
      Namespace::Vmem1 => self.load_bytes_vmem1 += bytes,
      Namespace::Vmem2 => self.load_bytes_vmem2 += bytes,
      _ => {},
    }
  }

  pub fn push_store_bytes(&mut self, bytes: u64) {
    self.store_bytes.push(bytes);
  }

  /// Called every cycle the last lane holds an instruction. A new word is
  /// kept only when the one before it was a compute op, a permutation or
  /// the SET_INST that opened a loop.
  pub fn record(&mut self, inst: &Instruction, cycle: u64) {
    if let Some(prev) = self.prev {
      if prev.encode() != inst.encode() && Self::opens_window(&prev, inst) {
        self.records.push(ProfiledInst { inst: *inst, ended_cycle: cycle });
      }
    }
    self.prev = Some(*inst);
  }

  fn opens_window(prev: &Instruction, next: &Instruction) -> bool {
    match prev.opcode {
      7 => prev.function == 2,
      0..=2 | 8 => true,
      3 => !next.is_nop(),
      _ => false,
    }
  }

  /// Sum of the spacing between consecutive compute records, plus the
  /// share of it spent in LOG.
  fn compute_span(&self) -> (f64, f64) {
    let mut cycles = 0.0;
    let mut log_cycles = 0.0;
    for pair in self.records.windows(2) {
      let inst = &pair[0].inst;
      if !matches!(inst.opcode, 0..=3 | 10) {
        continue;
      }
      let diff = pair[1].ended_cycle.saturating_sub(pair[0].ended_cycle) as f64;
      if inst.is_nop() {
        cycles += diff / 2.0;
      }
      if inst.opcode == 1 && inst.function == 10 {
        log_cycles += diff * 5.0;
      }
      cycles += diff;
    }
    (cycles, log_cycles)
  }

  pub fn profile(&self, stage_cnt: usize, ddr: &DdrTiming) -> SimdProfile {
    let (span, log_cycles) = self.compute_span();
    let stages = stage_cnt as f64;
    let tiles = self.total_base_loop_iterations.max(1);
    let store_bytes: u64 = self.store_bytes.iter().sum();
    SimdProfile {
      per_tile_cycles: 2.0 + span + stages,
      projected_cycles: 2.0 + (tiles as f64 * span - 1.0) + stages,
      load_cycles_vmem1: ddr.transfer_cycles(self.load_bytes_vmem1),
      load_cycles_vmem2: ddr.transfer_cycles(self.load_bytes_vmem2),
      store_cycles: ddr.transfer_cycles(store_bytes),
      num_tiles: tiles,
      load_tile_size_vmem1: self.load_bytes_vmem1,
      load_tile_size_vmem2: self.load_bytes_vmem2,
      store_tile_size: store_bytes,
      per_tile_log_cycles: log_cycles,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn inst(opcode: u8, function: u8) -> Instruction {
    Instruction::decode(((opcode as u32) << 28) | ((function as u32) << 24) | 0x42)
  }

  fn ddr() -> DdrTiming {
    // 8 bytes per cycle
    DdrTiming { bandwidth: 8e9, freq_mhz: 1000.0, latency: 10.0 }
  }

  #[test]
  fn test_record_filters_on_previous_word() {
    let mut profiler = SingleBaseLoopProfiler::default();
    profiler.record(&inst(5, 5), 1);
    profiler.record(&inst(7, 2), 2);
    // previous is LD_ST: not kept
    assert!(profiler.records().is_empty());
    profiler.record(&inst(0, 0), 3);
    profiler.record(&inst(0, 0), 4);
    profiler.record(&inst(0, 2), 6);
    profiler.record(&inst(10, 0), 9);
    let ended: Vec<u64> = profiler.records().iter().map(|r| r.ended_cycle).collect();
    assert_eq!(ended, vec![3, 6, 9]);
  }

  #[test]
  fn test_cast_opens_window_unless_followed_by_nop() {
    let mut profiler = SingleBaseLoopProfiler::default();
    profiler.record(&inst(3, 8), 1);
    profiler.record(&inst(0, 0), 2);
    profiler.record(&inst(3, 9), 3);
    profiler.record(&inst(0, 15), 4);
    let ended: Vec<u64> = profiler.records().iter().map(|r| r.ended_cycle).collect();
    assert_eq!(ended, vec![2, 3]);
  }

  #[test]
  fn test_profile_sums_compute_spacing() {
    let mut profiler = SingleBaseLoopProfiler::default();
    profiler.set_total_base_loop_iterations(4);
    profiler.record(&inst(7, 2), 10);
    profiler.record(&inst(0, 0), 11);
    profiler.record(&inst(1, 10), 14);
    profiler.record(&inst(10, 0), 16);
    let profile = profiler.profile(5, &ddr());
    // ADD spans 3, LOG spans 2
    assert_eq!(profile.per_tile_cycles, 2.0 + 5.0 + 5.0);
    assert_eq!(profile.projected_cycles, 2.0 + (4.0 * 5.0 - 1.0) + 5.0);
    assert_eq!(profile.per_tile_log_cycles, 10.0);
    assert_eq!(profile.num_tiles, 4);
  }

  #[test]
  fn test_transfer_cycles() {
    let mut profiler = SingleBaseLoopProfiler::default();
    profiler.add_load_bytes(Namespace::Vmem2, 64);
    profiler.push_store_bytes(16);
    profiler.push_store_bytes(16);
    let profile = profiler.profile(3, &ddr());
    assert_eq!(profile.load_cycles_vmem1, 0.0);
    assert_eq!(profile.load_cycles_vmem2, 64.0 / 8.0 + 10.0);
    assert_eq!(profile.store_cycles, 32.0 / 8.0 + 10.0);
    assert_eq!(profile.store_tile_size, 32);
  }
}
