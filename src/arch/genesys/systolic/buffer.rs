use crate::arch::genesys::simd::DdrTiming;
use crate::error::{SimError, SimResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};

/// On-chip buffers around the systolic array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BufferKind {
  Ibuf,
  Wbuf,
  Bbuf,
  Obuf,
}

impl BufferKind {
  pub const ALL: [BufferKind; 4] = [BufferKind::Ibuf, BufferKind::Wbuf, BufferKind::Bbuf, BufferKind::Obuf];
  /// Buffers refilled from DDR ahead of compute.
  pub const INPUTS: [BufferKind; 3] = [BufferKind::Ibuf, BufferKind::Wbuf, BufferKind::Bbuf];

  pub fn index(self) -> usize {
    match self {
      BufferKind::Ibuf => 0,
      BufferKind::Wbuf => 1,
      BufferKind::Bbuf => 2,
      BufferKind::Obuf => 3,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      BufferKind::Ibuf => "IBUF",
      BufferKind::Wbuf => "WBUF",
      BufferKind::Bbuf => "BBUF",
      BufferKind::Obuf => "OBUF",
    }
  }
}

impl fmt::Display for BufferKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// One value per systolic buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerBuffer<T>([T; 4]);

impl<T> PerBuffer<T> {
  pub fn from_fn(mut f: impl FnMut(BufferKind) -> T) -> Self {
    Self([
      f(BufferKind::Ibuf),
      f(BufferKind::Wbuf),
      f(BufferKind::Bbuf),
      f(BufferKind::Obuf),
    ])
  }

  pub fn iter(&self) -> impl Iterator<Item = (BufferKind, &T)> {
    BufferKind::ALL.into_iter().zip(self.0.iter())
  }
}

impl<T> Index<BufferKind> for PerBuffer<T> {
  type Output = T;

  fn index(&self, kind: BufferKind) -> &T {
    &self.0[kind.index()]
  }
}

impl<T> IndexMut<BufferKind> for PerBuffer<T> {
  fn index_mut(&mut self, kind: BufferKind) -> &mut T {
    &mut self.0[kind.index()]
  }
}

/// Bytes of one tile: product of the tile dimensions times the element
/// width. A buffer without tiling holds nothing.
pub fn tile_bytes(dims: &BTreeMap<String, u64>, width_bits: u32) -> u64 {
  if dims.is_empty() {
    return 0;
  }
  dims.values().product::<u64>() * width_bits as u64 / 8
}

/// Physical shape of a buffer and its link to DDR.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferGeometry {
  pub banks: u64,
  /// Words per bank.
  pub depth: u64,
  pub width_bits: u32,
  pub tile_bytes: u64,
  /// Interface bandwidth in bytes per second.
  pub bandwidth: f64,
}

impl BufferGeometry {
  /// Share of the buffer one tile occupies, in percent.
  pub fn bank_utilization(&self) -> f64 {
    let bank_bytes = self.depth as f64 * self.width_bits as f64 / 8.0;
    if self.banks == 0 || bank_bytes == 0.0 {
      return 0.0;
    }
    self.tile_bytes as f64 / self.banks as f64 / bank_bytes * 100.0
  }

  /// Cycles to move one tile over DDR, without the access latency.
  pub fn transfer_cycles(&self, ddr_freq_mhz: f64) -> f64 {
    let link = DdrTiming { bandwidth: self.bandwidth, freq_mhz: ddr_freq_mhz, latency: 0.0 };
    link.transfer_cycles(self.tile_bytes)
  }

  pub fn with_bandwidth(&self, bandwidth: f64) -> Self {
    Self { bandwidth, ..self.clone() }
  }
}

/// Region ownership of one double-buffered memory.
///
/// Each tag names the half of the buffer its agent uses. A load or store
/// always flips to the other half first, and that half must not be the one
/// compute is reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DoubleBufferTags {
  pub compute: bool,
  pub load: bool,
  pub store: bool,
}

impl Default for DoubleBufferTags {
  fn default() -> Self {
    Self { compute: true, load: true, store: true }
  }
}

impl DoubleBufferTags {
  pub fn load(&mut self, kind: BufferKind) -> SimResult<()> {
    let next = !self.load;
    if next == self.compute {
      return Err(SimError::invariant(format!("{} load tag equals compute tag", kind)));
    }
    self.load = next;
    Ok(())
  }

  /// Compute moves on to the half holding a fresh tile.
  pub fn advance(&mut self) {
    self.compute = !self.compute;
  }

  pub fn store(&mut self, kind: BufferKind) -> SimResult<()> {
    let next = !self.store;
    if next == self.compute {
      return Err(SimError::invariant(format!("{} store tag equals compute tag", kind)));
    }
    self.store = next;
    Ok(())
  }
}
