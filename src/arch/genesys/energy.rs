use super::systolic::{BufferKind, PerBuffer};
use crate::error::SimResult;
use crate::simulator::config::SystolicConfig;
use serde::Serialize;

/// Access activity of one simulated layer, the input of every energy model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerActivity {
  /// Word reads by the array (OBUF also by the SIMD unit).
  pub reads: PerBuffer<u64>,
  /// Word writes: DDR refills of the input buffers, array writes of OBUF.
  pub writes: PerBuffer<u64>,
  pub dram_bytes: u64,
  pub macs: u64,
  pub simd_accesses: u64,
}

/// Named energy figures in report order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyReport {
  pub entries: Vec<(&'static str, f64)>,
}

impl EnergyReport {
  pub fn get(&self, key: &str) -> Option<f64> {
    self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
  }

  pub fn total(&self) -> f64 {
    self.get("totalEnergy").unwrap_or(0.0)
  }
}

/// Turns layer activity into energy. Implementations may wrap external
/// SRAM/DRAM models; the composition layer only sees this trait.
pub trait EnergyProvider {
  fn name(&self) -> &str;

  fn estimate(&self, activity: &LayerActivity) -> SimResult<EnergyReport>;
}

/// Energy from the per-access costs in `systolic_config.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEnergy {
  pub read: PerBuffer<f64>,
  pub write: PerBuffer<f64>,
  pub dram_cost: f64,
  pub energy_per_mac: f64,
  pub simd_energy_cost: f64,
}

impl TableEnergy {
  pub fn from_config(config: &SystolicConfig) -> Self {
    Self {
      read: PerBuffer::from_fn(|kind| match kind {
        BufferKind::Ibuf => config.ibuf_read_energy,
        BufferKind::Wbuf => config.wbuf_read_energy,
        BufferKind::Bbuf => config.bbuf_read_energy,
        BufferKind::Obuf => config.obuf_read_energy,
      }),
      write: PerBuffer::from_fn(|kind| match kind {
        BufferKind::Ibuf => config.ibuf_write_energy,
        BufferKind::Wbuf => config.wbuf_write_energy,
        BufferKind::Bbuf => config.bbuf_write_energy,
        BufferKind::Obuf => config.obuf_write_energy,
      }),
      dram_cost: config.dram_cost,
      energy_per_mac: config.energy_per_mac,
      simd_energy_cost: config.simd_energy_cost,
    }
  }
}

const READ_KEYS: [&str; 4] = ["ibufReadEnergy", "wbufReadEnergy", "bbufReadEnergy", "obufReadEnergy"];
const WRITE_KEYS: [&str; 4] = ["ibufWriteEnergy", "wbufWriteEnergy", "bbufWriteEnergy", "obufWriteEnergy"];

impl EnergyProvider for TableEnergy {
  fn name(&self) -> &str {
    "table"
  }

  fn estimate(&self, activity: &LayerActivity) -> SimResult<EnergyReport> {
    let mut entries = Vec::with_capacity(12);
    let mut total = 0.0;
    for kind in BufferKind::ALL {
      let energy = activity.reads[kind] as f64 * self.read[kind];
      entries.push((READ_KEYS[kind.index()], energy));
      total += energy;
    }
    for kind in BufferKind::ALL {
      let energy = activity.writes[kind] as f64 * self.write[kind];
      entries.push((WRITE_KEYS[kind.index()], energy));
      total += energy;
    }

    let dram = activity.dram_bytes as f64 * self.dram_cost;
    let mac = activity.macs as f64 * self.energy_per_mac;
    let simd = activity.simd_accesses as f64 * self.simd_energy_cost;
    total += dram + mac + simd;
    entries.push(("dramEnergy", dram));
    entries.push(("macEnergy", mac));
    entries.push(("simdEnergy", simd));
    entries.push(("totalEnergy", total));
    Ok(EnergyReport { entries })
  }
}
