use super::decode::{Decode, TABLE_ENTRIES};
use super::indexing::LoopNest;
use super::stage::{InstReg, ResolvedAddrs, Stage, StageCore};
use super::state::SimulationState;
use crate::builtin::Module;
use crate::error::{SimError, SimResult};
use crate::isa::instruction::{merge_half, sign_extend, Half, ImmWrite, IndexKey, IndexWrite, PermSide};
use crate::isa::{Instruction, Namespace, NsArray, Op, Operand};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
  pub base: i32,
  pub stride: i32,
}

/// Operands captured by LOOP SET_INDEX; one per loop level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registration {
  dst: Operand,
  src1: Operand,
  src2: Operand,
}

#[derive(Debug, Clone)]
struct NestedStrides {
  nest: LoopNest,
  dst: Vec<i64>,
  src1: Vec<i64>,
  src2: Vec<i64>,
}

#[derive(Debug, Clone)]
struct ActiveLoop {
  inst_cnt: u64,
  /// Addressed executions before the loop retires.
  total: u64,
  nested: Option<NestedStrides>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PermTable {
  base: i64,
  iters: [u32; TABLE_ENTRIES],
  strides: [i64; TABLE_ENTRIES],
}

impl Default for PermTable {
  fn default() -> Self {
    Self {
      base: 0,
      iters: [0; TABLE_ENTRIES],
      strides: [0; TABLE_ENTRIES],
    }
  }
}

impl PermTable {
  /// Configured dimensions only.
  fn nest(&self) -> (LoopNest, Vec<i64>) {
    let (iters, strides): (Vec<u32>, Vec<i64>) = self
      .iters
      .iter()
      .zip(self.strides.iter())
      .filter(|(&iter, _)| iter != 0)
      .map(|(&iter, &stride)| (iter, stride))
      .unzip();
    (LoopNest::new(iters), strides)
  }
}

#[derive(Debug, Clone)]
struct ActivePermutation {
  src: LoopNest,
  src_strides: Vec<i64>,
  src_base: i64,
  dst: LoopNest,
  dst_strides: Vec<i64>,
  dst_base: i64,
  moves: u64,
  total: u64,
}

/// Stage 2: resolves bank addresses for every compute instruction.
#[derive(Debug, Clone)]
pub struct AddressGeneration {
  core: StageCore,
  lanes: usize,
  index_tables: NsArray<Vec<IndexEntry>>,
  loop_iters: [u32; TABLE_ENTRIES],
  registrations: Vec<Registration>,
  registrations_fixed: bool,
  active: Option<ActiveLoop>,
  iteration: u64,
  perm_src: PermTable,
  perm_dst: PermTable,
  permutation: Option<ActivePermutation>,
  perm_total: u64,
  addressed: u64,
}

impl AddressGeneration {
  pub fn new(lanes: usize) -> Self {
    Self {
      core: StageCore::default(),
      lanes,
      index_tables: NsArray::from_fn(|_| vec![IndexEntry::default(); TABLE_ENTRIES]),
      loop_iters: [0; TABLE_ENTRIES],
      registrations: Vec::new(),
      registrations_fixed: false,
      active: None,
      iteration: 0,
      perm_src: PermTable::default(),
      perm_dst: PermTable::default(),
      permutation: None,
      perm_total: 0,
      addressed: 0,
    }
  }

  pub fn is_looping(&self) -> bool {
    self.active.is_some()
  }

  pub fn is_permuting(&self) -> bool {
    self.permutation.is_some()
  }

  /// Instructions that received loop or permutation addresses so far.
  pub fn addressed(&self) -> u64 {
    self.addressed
  }

  pub fn index_entry(&self, ns: Namespace, index: usize) -> Option<IndexEntry> {
    self.index_tables[ns].get(index).copied()
  }

  /// Move count decode computed for the permutation about to start.
  pub fn set_permutation_total(&mut self, total: u64) {
    self.perm_total = total;
  }

  pub fn tick(&mut self, state: &mut SimulationState) -> SimResult<()> {
    if !self.core.should_cycle() {
      return Ok(());
    }
    if self.core.state.executed() == 0 {
      if let Some(mut reg) = self.core.input.get().cloned() {
        self.handle(&mut reg, state)?;
        self.core.input.set(reg);
      }
      self.core.latch_output();
    }
    self.core.state.advance();
    Ok(())
  }

  /// Pull from decode. A permuting decode keeps its START latched, so
  /// every cycle gets a fresh copy of it.
  pub fn pull_from_decode(&mut self, decode: &mut Decode) -> bool {
    if !self.is_idle() {
      return true;
    }
    self.core.clear();
    if decode.is_idle() {
      if let Some(reg) = decode.core_mut().output.take() {
        self.accept(reg);
      }
      false
    } else if decode.is_permuting() {
      if let Some(reg) = decode.core().output.get().cloned() {
        self.accept(reg);
      }
      false
    } else {
      true
    }
  }

  fn handle(&mut self, reg: &mut InstReg, state: &mut SimulationState) -> SimResult<()> {
    let inst = reg.inst;
    match inst.opcode {
      4 | 5 | 10 | 14 => Ok(()),
      6 => self.iterator_config(&inst, state),
      7 => self.loop_config(&inst),
      8 => self.permutation(reg),
      _ => self.loop_address(reg),
    }
  }

  fn entry(&self, operand: Operand) -> SimResult<IndexEntry> {
    let ns = operand.namespace()?;
    self.index_tables[ns]
      .get(operand.index as usize)
      .copied()
      .ok_or_else(|| SimError::invariant(format!("index table entry {}:{} out of range", ns, operand.index)))
  }

  fn iterator_config(&mut self, inst: &Instruction, state: &mut SimulationState) -> SimResult<()> {
    match inst.op()? {
      Op::SetImmediate { index, write, value } => {
        let prev = state.banks.imm(index)?;
        let next = match write {
          ImmWrite::Low => merge_half(prev, value, Half::Low),
          ImmWrite::High => merge_half(prev, value, Half::High),
          ImmWrite::SignExtend => sign_extend(value),
        };
        state.banks.set_imm(index, next)?;
        state.access.imm_write += 1;
      },
      Op::SetIndexEntry { ns, index, key, write, value } => {
        let entry = self.index_tables[ns]
          .get_mut(index)
          .ok_or_else(|| SimError::invariant(format!("index table entry {}:{} out of range", ns, index)))?;
        let slot = match key {
          IndexKey::Base => &mut entry.base,
          IndexKey::Stride => &mut entry.stride,
        };
        *slot = match write {
          IndexWrite::SignExtend => sign_extend(value),
          IndexWrite::Low => merge_half(*slot, value, Half::Low),
          IndexWrite::High => merge_half(*slot, value, Half::High),
          IndexWrite::ZeroFill => value as i32,
        };
      },
      _ => {},
    }
    Ok(())
  }

  fn loop_config(&mut self, inst: &Instruction) -> SimResult<()> {
    match inst.op()? {
      Op::LoopSetIndex { dst, src1, src2 } => {
        if !self.registrations_fixed {
          self.registrations.push(Registration { dst, src1, src2 });
        }
      },
      Op::LoopSetIter { loop_id, count } => {
        if let Some(slot) = self.loop_iters.get_mut(loop_id) {
          *slot = count;
        }
      },
      Op::LoopSetInst { inst_cnt, nested } => self.start_loop(inst_cnt, nested)?,
      _ => {},
    }
    Ok(())
  }

  fn start_loop(&mut self, inst_cnt: u32, nested: bool) -> SimResult<()> {
    let iters: Vec<u32> = self.loop_iters.iter().copied().filter(|&i| i != 0).collect();
    let total = inst_cnt as u64 * iters.iter().map(|&i| i as u64).product::<u64>();
    let nested = if nested {
      let mut strides = NestedStrides {
        nest: LoopNest::new(iters),
        dst: Vec::new(),
        src1: Vec::new(),
        src2: Vec::new(),
      };
      for reg in &self.registrations {
        strides.dst.push(self.entry(reg.dst)?.stride as i64);
        strides.src1.push(self.entry(reg.src1)?.stride as i64);
        strides.src2.push(self.entry(reg.src2)?.stride as i64);
      }
      Some(strides)
    } else {
      None
    };
    self.iteration = 0;
    self.registrations_fixed = true;
    if total == 0 {
      self.finish_loop();
      return Ok(());
    }
    log::debug!("addrgen loop: {} executions, nested {}", total, nested.is_some());
    self.active = Some(ActiveLoop { inst_cnt: inst_cnt.max(1) as u64, total, nested });
    Ok(())
  }

  fn finish_loop(&mut self) {
    self.loop_iters = [0; TABLE_ENTRIES];
    for (_, table) in self.index_tables.iter_mut() {
      table.fill(IndexEntry::default());
    }
    self.registrations.clear();
    self.registrations_fixed = false;
    self.active = None;
    self.iteration = 0;
  }

  /// `base + n * stride` for one operand of a flat loop.
  fn flat_address(&self, operand: Operand, n: u64) -> SimResult<Option<i64>> {
    if operand.namespace()? == Namespace::None {
      return Ok(None);
    }
    let entry = self.entry(operand)?;
    Ok(Some(entry.base as i64 + n as i64 * entry.stride as i64))
  }

  fn resolve(&self, lp: &ActiveLoop, inst: &Instruction) -> SimResult<ResolvedAddrs> {
    let n = self.iteration / lp.inst_cnt;
    let Some(strides) = &lp.nested else {
      return Ok(ResolvedAddrs {
        dst: self.flat_address(inst.dst, n)?,
        src1: self.flat_address(inst.src1, n)?,
        src2: self.flat_address(inst.src2, n)?,
      });
    };
    // bases come from the innermost registration
    let Some(last) = self.registrations.last() else {
      return Ok(ResolvedAddrs::default());
    };
    Ok(ResolvedAddrs {
      dst: Some(self.entry(last.dst)?.base as i64 + strides.nest.address(n, &strides.dst)),
      src1: Some(self.entry(last.src1)?.base as i64 + strides.nest.address(n, &strides.src1)),
      src2: Some(self.entry(last.src2)?.base as i64 + strides.nest.address(n, &strides.src2)),
    })
  }

  fn loop_address(&mut self, reg: &mut InstReg) -> SimResult<()> {
    let Some(lp) = self.active.as_ref() else {
      return Ok(());
    };
    let total = lp.total;
    if !reg.inst.is_nop() {
      reg.addr = self.resolve(lp, &reg.inst)?;
      self.addressed += 1;
    }
    self.iteration += 1;
    if self.iteration >= total {
      log::debug!("addrgen loop retired after {} executions", total);
      self.finish_loop();
    }
    Ok(())
  }

  fn perm_table(&mut self, side: PermSide) -> &mut PermTable {
    match side {
      PermSide::Source => &mut self.perm_src,
      PermSide::Destination => &mut self.perm_dst,
    }
  }

  fn permutation(&mut self, reg: &mut InstReg) -> SimResult<()> {
    match reg.inst.op()? {
      Op::PermSetBase { side, addr } => self.perm_table(side).base = addr as i64,
      Op::PermSetIter { side, dim, count } => {
        if let Some(slot) = self.perm_table(side).iters.get_mut(dim) {
          *slot = count;
        }
      },
      Op::PermSetStride { side, dim, stride } => {
        if let Some(slot) = self.perm_table(side).strides.get_mut(dim) {
          *slot = stride as i64;
        }
      },
      Op::PermStart { .. } => match self.permutation.as_mut() {
        None => {
          let (src, src_strides) = self.perm_src.nest();
          let (dst, dst_strides) = self.perm_dst.nest();
          let total = if self.perm_total > 0 { self.perm_total } else { src.total().max(dst.total()) };
          self.perm_total = 0;
          self.permutation = Some(ActivePermutation {
            src,
            src_strides,
            src_base: self.perm_src.base,
            dst,
            dst_strides,
            dst_base: self.perm_dst.base,
            moves: 0,
            total,
          });
          reg.first_permute = true;
          log::debug!("permutation start: {} moves", total);
        },
        Some(perm) => {
          reg.first_permute = false;
          reg.dest_bank = Some(perm.moves as usize % self.lanes.max(1));
          reg.addr = ResolvedAddrs {
            dst: Some(perm.dst_base + perm.dst.address(perm.moves, &perm.dst_strides)),
            src1: Some(perm.src_base + perm.src.address(perm.moves, &perm.src_strides)),
            src2: None,
          };
          perm.moves += 1;
          self.addressed += 1;
          if perm.moves >= perm.total {
            self.permutation = None;
            self.perm_src = PermTable::default();
            self.perm_dst = PermTable::default();
          }
        },
      },
      _ => {},
    }
    Ok(())
  }
}

impl Module for AddressGeneration {
  fn name(&self) -> &str {
    "addrgen"
  }

  fn reset(&mut self) {
    *self = AddressGeneration::new(self.lanes);
  }
}

impl Stage for AddressGeneration {
  fn core(&self) -> &StageCore {
    &self.core
  }

  fn core_mut(&mut self) -> &mut StageCore {
    &mut self.core
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn feed(ag: &mut AddressGeneration, state: &mut SimulationState, inst: Instruction) -> InstReg {
    ag.accept(InstReg::new(inst, 0));
    ag.tick(state).unwrap();
    ag.core.output.take().unwrap()
  }

  fn set_entry(key: IndexKey, ns: Namespace, index: u8, value: u16) -> Instruction {
    // zero-extended write
    let function = match key {
      IndexKey::Base => 3,
      IndexKey::Stride => 7,
    };
    Instruction::with_immediate(6, function, Operand::new(ns, index), value)
  }

  fn set_iter(loop_id: u8, count: u16) -> Instruction {
    Instruction::with_immediate(7, 1, Operand { ns_id: loop_id, index: 0 }, count)
  }

  fn set_inst(count: u16, nested: bool) -> Instruction {
    Instruction::with_immediate(7, 2, Operand { ns_id: nested as u8, index: 0 }, count)
  }

  fn add() -> Instruction {
    Instruction::new(
      0,
      0,
      Operand::new(Namespace::Vmem1, 0),
      Operand::new(Namespace::Vmem2, 1),
      Operand::new(Namespace::Vmem2, 2),
    )
  }

  #[test]
  fn test_flat_loop_addresses() {
    let mut ag = AddressGeneration::new(4);
    let mut state = SimulationState::new(4, 64, 32);
    for inst in [
      set_entry(IndexKey::Base, Namespace::Vmem1, 0, 4),
      set_entry(IndexKey::Stride, Namespace::Vmem1, 0, 1),
      set_entry(IndexKey::Stride, Namespace::Vmem2, 1, 2),
      set_entry(IndexKey::Base, Namespace::Vmem2, 2, 8),
      set_iter(0, 3),
      set_inst(2, false),
    ] {
      feed(&mut ag, &mut state, inst);
    }
    assert!(ag.is_looping());
    let addrs: Vec<ResolvedAddrs> = (0..6).map(|_| feed(&mut ag, &mut state, add()).addr).collect();
    for (i, addr) in addrs.iter().enumerate() {
      let n = i as i64 / 2;
      assert_eq!(addr.dst, Some(4 + n));
      assert_eq!(addr.src1, Some(2 * n));
      assert_eq!(addr.src2, Some(8));
    }
    assert!(!ag.is_looping());
    assert_eq!(ag.addressed(), 6);
    assert_eq!(ag.index_entry(Namespace::Vmem1, 0), Some(IndexEntry::default()));
    assert_eq!(feed(&mut ag, &mut state, add()).addr, ResolvedAddrs::default());
  }

  #[test]
  fn test_nested_loop_addresses() {
    let mut ag = AddressGeneration::new(4);
    let mut state = SimulationState::new(4, 256, 32);
    let outer = Operand::new(Namespace::Vmem1, 0);
    let inner = Operand::new(Namespace::Vmem1, 1);
    for inst in [
      set_entry(IndexKey::Stride, Namespace::Vmem1, 0, 10),
      set_entry(IndexKey::Stride, Namespace::Vmem1, 1, 1),
      set_entry(IndexKey::Base, Namespace::Vmem1, 1, 100),
      Instruction::new(7, 0, outer, outer, outer),
      Instruction::new(7, 0, inner, inner, inner),
      set_iter(0, 2),
      set_iter(1, 3),
      set_inst(1, true),
    ] {
      feed(&mut ag, &mut state, inst);
    }
    let dsts: Vec<Option<i64>> = (0..6).map(|_| feed(&mut ag, &mut state, add()).addr.dst).collect();
    let expected: Vec<Option<i64>> = [100, 101, 102, 110, 111, 112].into_iter().map(Some).collect();
    assert_eq!(dsts, expected);
    assert!(!ag.is_looping());
  }

  #[test]
  fn test_nop_in_loop_is_not_addressed() {
    let mut ag = AddressGeneration::new(2);
    let mut state = SimulationState::new(2, 64, 32);
    feed(&mut ag, &mut state, set_iter(0, 2));
    feed(&mut ag, &mut state, set_inst(2, false));
    feed(&mut ag, &mut state, add());
    let nop = feed(&mut ag, &mut state, Instruction::NOP);
    assert_eq!(nop.addr, ResolvedAddrs::default());
    feed(&mut ag, &mut state, add());
    feed(&mut ag, &mut state, Instruction::NOP);
    assert!(!ag.is_looping());
    assert_eq!(ag.addressed(), 2);
  }

  #[test]
  fn test_permutation_moves() {
    let mut ag = AddressGeneration::new(2);
    let mut state = SimulationState::new(2, 64, 32);
    let perm = |function: u8, side: u8, dim: u8, imm: u16| {
      Instruction::with_immediate(8, function, Operand { ns_id: side, index: dim }, imm)
    };
    for inst in [
      perm(0, 1, 0, 32),
      perm(1, 0, 0, 1),
      perm(1, 0, 1, 1),
      perm(2, 0, 0, 2),
      perm(2, 0, 1, 1),
      perm(1, 1, 0, 1),
      perm(1, 1, 1, 1),
      perm(2, 1, 0, 1),
      perm(2, 1, 1, 2),
    ] {
      feed(&mut ag, &mut state, inst);
    }
    ag.set_permutation_total(4);
    let start = Instruction::decode((8 << 28) | (3 << 24) | 1);
    let marker = feed(&mut ag, &mut state, start);
    assert!(marker.first_permute);
    assert!(ag.is_permuting());
    let moves: Vec<InstReg> = (0..4).map(|_| feed(&mut ag, &mut state, start)).collect();
    let src: Vec<i64> = moves.iter().filter_map(|r| r.addr.src1).collect();
    let dst: Vec<i64> = moves.iter().filter_map(|r| r.addr.dst).collect();
    let banks: Vec<usize> = moves.iter().filter_map(|r| r.dest_bank).collect();
    assert_eq!(src, vec![0, 1, 2, 3]);
    assert_eq!(dst, vec![32, 34, 33, 35]);
    assert_eq!(banks, vec![0, 1, 0, 1]);
    assert!(!ag.is_permuting());
  }

  #[test]
  fn test_immediate_writes() {
    let mut ag = AddressGeneration::new(2);
    let mut state = SimulationState::new(2, 64, 32);
    feed(&mut ag, &mut state, Instruction::with_immediate(6, 10, Operand::new(Namespace::Imm, 3), 0xFFFE));
    feed(&mut ag, &mut state, Instruction::with_immediate(6, 9, Operand::new(Namespace::Imm, 3), 0x0001));
    assert_eq!(state.banks.imm(3).unwrap(), 0x0001_FFFE);
    assert_eq!(state.access.imm_write, 2);
  }
}
