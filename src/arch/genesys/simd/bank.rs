/// On-chip memories of the SIMD array.
use crate::builtin::Module;
use crate::error::{SimError, SimResult};
use crate::isa::namespace::{Namespace, NsArray};

/// Initial contents of every bank word.
const POWER_ON_VALUE: f64 = -1.0;

/// One lane's scratchpad for one namespace.
#[derive(Debug, Clone)]
pub struct Bank {
  name: String,
  spad: Vec<f64>,
}

impl Bank {
  pub fn new(name: impl Into<String>, depth: usize) -> Self {
    Self {
      name: name.into(),
      spad: vec![POWER_ON_VALUE; depth],
    }
  }

  pub fn depth(&self) -> usize {
    self.spad.len()
  }

  pub fn read(&self, addr: usize) -> Option<f64> {
    self.spad.get(addr).copied()
  }

  pub fn write(&mut self, addr: usize, value: f64) -> bool {
    match self.spad.get_mut(addr) {
      Some(slot) => {
        *slot = value;
        true
      },
      None => false,
    }
  }
}

impl Module for Bank {
  fn name(&self) -> &str {
    &self.name
  }

  fn reset(&mut self) {
    self.spad.fill(POWER_ON_VALUE);
  }
}

/// Banked memories (one bank per lane for obuf/ibuf/vmem1/vmem2) plus the
/// shared immediate memory.
#[derive(Debug, Clone)]
pub struct BankedMemory {
  banks: NsArray<Vec<Bank>>,
  imm: Vec<i32>,
  depth: usize,
}

impl BankedMemory {
  pub fn new(lanes: usize, depth: usize, imm_depth: usize) -> Self {
    let banks = NsArray::from_fn(|ns| {
      if ns.is_banked() {
        (0..lanes).map(|lane| Bank::new(format!("{}[{}]", ns, lane), depth)).collect()
      } else {
        Vec::new()
      }
    });
    Self {
      banks,
      imm: vec![0; imm_depth],
      depth,
    }
  }

  pub fn depth(&self) -> usize {
    self.depth
  }

  fn bank(&self, ns: Namespace, lane: usize) -> SimResult<&Bank> {
    self.banks[ns]
      .get(lane)
      .ok_or_else(|| SimError::invariant(format!("{} has no bank for lane {}", ns, lane)))
  }

  fn check(&self, ns: Namespace, addr: i64) -> SimResult<usize> {
    if addr < 0 || addr as usize >= self.depth {
      return Err(SimError::AddressOverflow { ns, addr, depth: self.depth });
    }
    Ok(addr as usize)
  }

  pub fn read(&self, ns: Namespace, lane: usize, addr: i64) -> SimResult<f64> {
    let idx = self.check(ns, addr)?;
    let bank = self.bank(ns, lane)?;
    bank
      .read(idx)
      .ok_or(SimError::AddressOverflow { ns, addr, depth: bank.depth() })
  }

  pub fn write(&mut self, ns: Namespace, lane: usize, addr: i64, value: f64) -> SimResult<()> {
    let idx = self.check(ns, addr)?;
    let bank = self.banks[ns]
      .get_mut(lane)
      .ok_or_else(|| SimError::invariant(format!("{} has no bank for lane {}", ns, lane)))?;
    if bank.write(idx, value) {
      Ok(())
    } else {
      Err(SimError::AddressOverflow { ns, addr, depth: bank.depth() })
    }
  }

  pub fn imm(&self, index: usize) -> SimResult<i32> {
    self.imm.get(index).copied().ok_or(SimError::AddressOverflow {
      ns: Namespace::Imm,
      addr: index as i64,
      depth: self.imm.len(),
    })
  }

  pub fn set_imm(&mut self, index: usize, value: i32) -> SimResult<()> {
    let depth = self.imm.len();
    let slot = self.imm.get_mut(index).ok_or(SimError::AddressOverflow {
      ns: Namespace::Imm,
      addr: index as i64,
      depth,
    })?;
    *slot = value;
    Ok(())
  }

  pub fn reset(&mut self) {
    for (_, banks) in self.banks.iter_mut() {
      for bank in banks.iter_mut() {
        bank.reset();
      }
    }
    self.imm.fill(0);
  }
}
