use super::buffer::{BufferKind, PerBuffer};
use crate::arch::genesys::simd::indexing::LoopNest;
use serde::Serialize;

/// Loop order of a systolic layer's tile space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TileOrder {
  /// OC, N, IC, KH, KW, OH, OW
  Conv,
  /// B, C, M, N, P
  Gemm,
}

pub const CONV_DIMS: [&str; 7] = ["OC", "N", "IC", "KH", "KW", "OH", "OW"];
pub const GEMM_DIMS: [&str; 5] = ["B", "C", "M", "N", "P"];

impl TileOrder {
  pub fn dims(self) -> &'static [&'static str] {
    match self {
      TileOrder::Conv => &CONV_DIMS,
      TileOrder::Gemm => &GEMM_DIMS,
    }
  }

  /// Dimensions whose change forces `kind` to be refilled (or drained).
  pub fn dependencies(self, kind: BufferKind) -> &'static [&'static str] {
    match (self, kind) {
      (TileOrder::Conv, BufferKind::Ibuf) => &["N", "IC", "OH", "OW"],
      (TileOrder::Conv, BufferKind::Wbuf) => &["OC", "IC", "KH", "KW"],
      (TileOrder::Conv, BufferKind::Bbuf) => &["OC"],
      (TileOrder::Conv, BufferKind::Obuf) => &["N", "OC", "OH", "OW"],
      (TileOrder::Gemm, BufferKind::Ibuf) => &["B", "C", "M", "N"],
      (TileOrder::Gemm, BufferKind::Wbuf) => &["B", "C", "N", "P"],
      (TileOrder::Gemm, BufferKind::Bbuf) => &["P"],
      (TileOrder::Gemm, BufferKind::Obuf) => &["B", "C", "M", "P"],
    }
  }
}

/// Row-major tile space of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSpace {
  order: TileOrder,
  nest: LoopNest,
}

impl TileSpace {
  /// `counts` maps dimension names to tile counts; missing dimensions are 1.
  pub fn new<'a>(order: TileOrder, counts: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
    let mut extents = vec![1u32; order.dims().len()];
    for (name, count) in counts {
      if let Some(pos) = order.dims().iter().position(|d| *d == name) {
        extents[pos] = u32::try_from(count.max(1)).unwrap_or(u32::MAX);
      }
    }
    Self { order, nest: LoopNest::new(extents) }
  }

  pub fn order(&self) -> TileOrder {
    self.order
  }

  pub fn extent(&self, dim: &str) -> u64 {
    self
      .order
      .dims()
      .iter()
      .position(|d| *d == dim)
      .and_then(|pos| self.nest.iters().get(pos))
      .map_or(1, |&e| e as u64)
  }

  pub fn len(&self) -> u64 {
    self.nest.total()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn coordinates(&self, tile: u64) -> Vec<u64> {
    self.nest.coordinates(tile)
  }

  /// Walk the space in loop order and mark, per buffer, which tiles find
  /// their data already resident.
  pub fn reuse(&self) -> ReuseMap {
    let dims = self.order.dims();
    let positions = PerBuffer::from_fn(|kind| {
      self
        .order
        .dependencies(kind)
        .iter()
        .filter_map(|dep| dims.iter().position(|d| d == dep))
        .collect::<Vec<_>>()
    });

    let mut flags = PerBuffer::from_fn(|_| Vec::with_capacity(self.len() as usize));
    let mut prev: Option<Vec<u64>> = None;
    for tile in 0..self.len() {
      let coords = self.coordinates(tile);
      for kind in BufferKind::ALL {
        let resident = prev
          .as_ref()
          .is_some_and(|p| positions[kind].iter().all(|&i| p[i] == coords[i]));
        flags[kind].push(resident);
      }
      prev = Some(coords);
    }
    ReuseMap { flags }
  }
}

/// Per-buffer residency of every tile; `true` means no reload is needed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReuseMap {
  flags: PerBuffer<Vec<bool>>,
}

impl ReuseMap {
  /// Build from explicit flags, one vector per buffer.
  pub fn from_flags(flags: PerBuffer<Vec<bool>>) -> Self {
    Self { flags }
  }

  /// Tiles past the end are never resident.
  pub fn is_resident(&self, kind: BufferKind, tile: u64) -> bool {
    self.flags[kind].get(tile as usize).copied().unwrap_or(false)
  }

  pub fn flags(&self, kind: BufferKind) -> &[bool] {
    &self.flags[kind]
  }

  /// Tiles that actually move through `kind`.
  pub fn transfers(&self, kind: BufferKind) -> u64 {
    self.flags[kind].iter().filter(|r| !**r).count() as u64
  }
}
