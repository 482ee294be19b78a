use crate::isa::namespace::{Namespace, NsArray};
use serde::Serialize;

/// Access counters of one bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneCounters {
  pub compute_read: u64,
  pub compute_write: u64,
  pub ld_write: u64,
  pub st_read: u64,
}

/// Per-lane, per-namespace memory traffic of one SIMD run.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessStats {
  banks: NsArray<Vec<LaneCounters>>,
  pub imm_read: u64,
  pub imm_write: u64,
}

/// Layer-level access totals. OBUF compute traffic is folded into VMEM1,
/// which is where the hardware serves it from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryAccessTotals {
  pub obuf: u64,
  pub ibuf: u64,
  pub vmem1_compute_read: u64,
  pub vmem1_compute_write: u64,
  pub vmem1_ld_write: u64,
  pub vmem1_st_read: u64,
  pub vmem2_compute_read: u64,
  pub vmem2_compute_write: u64,
  pub vmem2_ld_write: u64,
  pub vmem2_st_read: u64,
  pub imm_read: u64,
  pub imm_write: u64,
}

impl MemoryAccessTotals {
  pub fn vmem1(&self) -> u64 {
    self.vmem1_compute_read + self.vmem1_compute_write + self.vmem1_ld_write + self.vmem1_st_read
  }

  pub fn vmem2(&self) -> u64 {
    self.vmem2_compute_read + self.vmem2_compute_write + self.vmem2_ld_write + self.vmem2_st_read
  }
}

impl MemoryAccessStats {
  pub fn new(lanes: usize) -> Self {
    Self {
      banks: NsArray::from_fn(|ns| if ns.is_banked() { vec![LaneCounters::default(); lanes] } else { Vec::new() }),
      imm_read: 0,
      imm_write: 0,
    }
  }

  /// Counters of one bank. Non-banked namespaces have none.
  pub fn lane_mut(&mut self, ns: Namespace, lane: usize) -> Option<&mut LaneCounters> {
    self.banks[ns].get_mut(lane)
  }

  pub fn lane(&self, ns: Namespace, lane: usize) -> LaneCounters {
    self.banks[ns].get(lane).copied().unwrap_or_default()
  }

  fn sum(&self, ns: Namespace) -> LaneCounters {
    self.banks[ns].iter().fold(LaneCounters::default(), |acc, c| LaneCounters {
      compute_read: acc.compute_read + c.compute_read,
      compute_write: acc.compute_write + c.compute_write,
      ld_write: acc.ld_write + c.ld_write,
      st_read: acc.st_read + c.st_read,
    })
  }

  pub fn totals(&self) -> MemoryAccessTotals {
    let obuf = self.sum(Namespace::Obuf);
    let ibuf = self.sum(Namespace::Ibuf);
    let vmem1 = self.sum(Namespace::Vmem1);
    let vmem2 = self.sum(Namespace::Vmem2);
    MemoryAccessTotals {
      obuf: obuf.compute_read + obuf.compute_write,
      ibuf: ibuf.compute_read + ibuf.compute_write,
      vmem1_compute_read: vmem1.compute_read + obuf.compute_read,
      vmem1_compute_write: vmem1.compute_write + obuf.compute_write,
      vmem1_ld_write: vmem1.ld_write,
      vmem1_st_read: vmem1.st_read,
      vmem2_compute_read: vmem2.compute_read,
      vmem2_compute_write: vmem2.compute_write,
      vmem2_ld_write: vmem2.ld_write,
      vmem2_st_read: vmem2.st_read,
      imm_read: self.imm_read,
      imm_write: self.imm_write,
    }
  }
}
