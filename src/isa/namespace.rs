use crate::error::{SimError, SimResult};
use serde::Serialize;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Addressable memory regions of the SIMD array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
  Obuf = 0,
  Ibuf = 1,
  Vmem1 = 2,
  Vmem2 = 3,
  Imm = 4,
  None = 5,
}

impl Namespace {
  pub const COUNT: usize = 6;

  /// Namespaces backed by one bank per SIMD lane.
  pub const BANKED: [Namespace; 4] = [Namespace::Obuf, Namespace::Ibuf, Namespace::Vmem1, Namespace::Vmem2];

  pub const ALL: [Namespace; Self::COUNT] = [
    Namespace::Obuf,
    Namespace::Ibuf,
    Namespace::Vmem1,
    Namespace::Vmem2,
    Namespace::Imm,
    Namespace::None,
  ];

  pub fn from_id(id: u8) -> SimResult<Self> {
    match id {
      0 => Ok(Namespace::Obuf),
      1 => Ok(Namespace::Ibuf),
      2 => Ok(Namespace::Vmem1),
      3 => Ok(Namespace::Vmem2),
      4 => Ok(Namespace::Imm),
      5 => Ok(Namespace::None),
      other => Err(SimError::InvalidNamespace(other)),
    }
  }

  /// Parse the upper-case mnemonic used by compiler string traces.
  pub fn from_mnemonic(name: &str) -> Option<Self> {
    match name.trim().to_ascii_lowercase().as_str() {
      "obuf" => Some(Namespace::Obuf),
      "ibuf" => Some(Namespace::Ibuf),
      "vmem1" => Some(Namespace::Vmem1),
      "vmem2" => Some(Namespace::Vmem2),
      "imm" => Some(Namespace::Imm),
      "none" => Some(Namespace::None),
      _ => None,
    }
  }

  pub fn id(self) -> u8 {
    self as u8
  }

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn is_banked(self) -> bool {
    matches!(self, Namespace::Obuf | Namespace::Ibuf | Namespace::Vmem1 | Namespace::Vmem2)
  }

  pub fn is_vmem(self) -> bool {
    matches!(self, Namespace::Vmem1 | Namespace::Vmem2)
  }

  pub fn name(self) -> &'static str {
    match self {
      Namespace::Obuf => "obuf",
      Namespace::Ibuf => "ibuf",
      Namespace::Vmem1 => "vmem1",
      Namespace::Vmem2 => "vmem2",
      Namespace::Imm => "imm",
      Namespace::None => "none",
    }
  }
}

impl fmt::Display for Namespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Fixed table with one slot per namespace.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NsArray<T>([T; Namespace::COUNT]);

impl<T> NsArray<T> {
  pub fn from_fn(mut f: impl FnMut(Namespace) -> T) -> Self {
    NsArray(std::array::from_fn(|i| f(Namespace::ALL[i])))
  }

  pub fn iter(&self) -> impl Iterator<Item = (Namespace, &T)> {
    Namespace::ALL.iter().copied().zip(self.0.iter())
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = (Namespace, &mut T)> {
    Namespace::ALL.iter().copied().zip(self.0.iter_mut())
  }
}

impl<T> Index<Namespace> for NsArray<T> {
  type Output = T;

  fn index(&self, ns: Namespace) -> &T {
    &self.0[ns.index()]
  }
}

impl<T> IndexMut<Namespace> for NsArray<T> {
  fn index_mut(&mut self, ns: Namespace) -> &mut T {
    &mut self.0[ns.index()]
  }
}
