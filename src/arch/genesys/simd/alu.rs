use super::stage::{InstReg, Stage, StageCore};
use super::state::SimulationState;
use crate::builtin::Module;
use crate::error::{SimError, SimResult};
use crate::isa::instruction::{AluFunction, CalculusFunction};
use crate::isa::{Namespace, Op, Operand};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct Pending {
  reg: InstReg,
  remain: u32,
}

/// One SIMD lane. Executes every instruction for its own banks only.
#[derive(Debug, Clone)]
pub struct AluLane {
  core: StageCore,
  name: String,
  lane: usize,
  queue: VecDeque<Pending>,
  /// The last lane reports what it retires to the profiler.
  profile: bool,
}

impl AluLane {
  pub fn new(lane: usize, profile: bool) -> Self {
    Self {
      core: StageCore::default(),
      name: format!("alu{}", lane),
      lane,
      queue: VecDeque::new(),
      profile,
    }
  }

  pub fn lane(&self) -> usize {
    self.lane
  }

  pub fn queue_len(&self) -> usize {
    self.queue.len()
  }

  pub fn should_skip(reg: &InstReg) -> bool {
    let inst = &reg.inst;
    if inst.is_nop() {
      return true;
    }
    match inst.opcode {
      4 | 5 | 6 | 7 | 10 | 11 => true,
      8 => inst.function < 3 || reg.first_permute,
      _ => false,
    }
  }

  pub fn latency(opcode: u8, function: u8) -> u32 {
    if opcode == 1 && function == 2 {
      4
    } else {
      1
    }
  }

  pub fn tick(&mut self, state: &mut SimulationState) -> SimResult<()> {
    if self.profile {
      if let Some(reg) = self.core.input.get() {
        state.profiler.record(&reg.inst, state.global_cycle);
      }
    }

    for pending in self.queue.iter_mut() {
      pending.remain = pending.remain.saturating_sub(1);
    }
    if self.queue.front().map_or(false, |p| p.remain == 0) {
      if let Some(done) = self.queue.pop_front() {
        self.retire(&done.reg, state)?;
      }
    }

    self.core.tick_passthrough();
    Ok(())
  }

  fn retire(&self, reg: &InstReg, state: &mut SimulationState) -> SimResult<()> {
    let inst = &reg.inst;
    match inst.opcode {
      13 | 14 => return Ok(()),
      9 | 12 | 15 => {
        return Err(SimError::UnsupportedFunction { opcode: inst.opcode, function: inst.function });
      },
      _ => {},
    }
    let shuffle = inst.opcode == 8 && inst.function == 3 && inst.src2.index == 1 && !reg.first_permute;
    if shuffle {
      // publish this lane's write address, then write into the target lane
      // at the address that lane published
      let dst = reg.addr.dst.unwrap_or(0);
      if let Some(slot) = state.dest_bank_write_address.get_mut(self.lane) {
        *slot = dst;
      }
      let value = self.compute(reg, state)?;
      let target = reg.dest_bank.unwrap_or(self.lane);
      let addr = state.dest_bank_write_address.get(target).copied();
      self.write(reg.inst.dst, target, addr, value, state)
    } else {
      let value = self.compute(reg, state)?;
      self.write(reg.inst.dst, self.lane, reg.addr.dst, value, state)
    }
  }

  /// Fetch an operand. Accesses without a resolved address are counted
  /// but return no value.
  fn read(&self, operand: Operand, addr: Option<i64>, state: &mut SimulationState) -> SimResult<Option<f64>> {
    let ns = operand.namespace()?;
    match ns {
      Namespace::None => Ok(None),
      Namespace::Imm => {
        state.access.imm_read += 1;
        Ok(Some(state.banks.imm(operand.index as usize)? as f64))
      },
      _ => {
        if let Some(counters) = state.access.lane_mut(ns, self.lane) {
          counters.compute_read += 1;
        }
        match addr {
          Some(addr) => Ok(Some(state.banks.read(ns, self.lane, addr)?)),
          None => Ok(None),
        }
      },
    }
  }

  fn write(
    &self,
    operand: Operand,
    lane: usize,
    addr: Option<i64>,
    value: Option<f64>,
    state: &mut SimulationState,
  ) -> SimResult<()> {
    let ns = operand.namespace()?;
    if !ns.is_banked() {
      return Ok(());
    }
    if let Some(counters) = state.access.lane_mut(ns, lane) {
      counters.compute_write += 1;
    }
    if let (Some(addr), Some(value)) = (addr, value) {
      state.banks.write(ns, lane, addr, value)?;
    }
    Ok(())
  }

  fn reads_src2(opcode: u8, function: u8) -> bool {
    match opcode {
      0 => function != 9 && function != 15,
      1 => function == 1 || function == 2,
      8 => function != 3,
      _ => true,
    }
  }

  /// Read the sources and produce the value to write back.
  fn compute(&self, reg: &InstReg, state: &mut SimulationState) -> SimResult<Option<f64>> {
    let inst = &reg.inst;
    let src1 = self.read(inst.src1, reg.addr.src1, state)?;
    let src2 = if !Self::reads_src2(inst.opcode, inst.function) {
      None
    } else if inst.opcode == 3 {
      // casts take their second operand from imm
      self.read(Operand { ns_id: Namespace::Imm.id(), index: inst.src2.index }, None, state)?
    } else {
      self.read(inst.src2, reg.addr.src2, state)?
    };
    let s1 = src1.unwrap_or(1.0);
    let s2 = src2.unwrap_or(1.0);

    let value = match inst.op()? {
      Op::Alu { function, dst, .. } => match function {
        AluFunction::Add => Some(s1 + s2),
        AluFunction::Sub => Some(s1 - s2),
        AluFunction::Mul => Some(s1 * s2),
        AluFunction::Macc => {
          let old = match (dst.namespace()?, reg.addr.dst) {
            (ns, Some(addr)) if ns.is_banked() => state.banks.read(ns, self.lane, addr)?,
            _ => 0.0,
          };
          Some(old + s1 * s2)
        },
        AluFunction::Div => Some(s1 / s2),
        AluFunction::Max => Some(s1.max(s2)),
        AluFunction::Min => Some(s1.min(s2)),
        AluFunction::Rshift => Some(((s1 as i64) >> (s2 as i64).clamp(0, 63)) as f64),
        AluFunction::Lshift => Some(((s1 as i64) << (s2 as i64).clamp(0, 63)) as f64),
        AluFunction::Move => Some(s1),
        AluFunction::CondMoveTrue => (s2 != 0.0).then_some(s1),
        AluFunction::CondMoveFalse => (s2 == 0.0).then_some(s1),
        AluFunction::Not => Some(!(s1 as i64) as f64),
        AluFunction::And => Some(((s1 as i64) & (s2 as i64)) as f64),
        AluFunction::Or => Some(((s1 as i64) | (s2 as i64)) as f64),
        AluFunction::Nop => None,
      },
      Op::Calculus { function, .. } => Some(match function {
        CalculusFunction::Relu => s1.max(0.0),
        CalculusFunction::LeakyRelu => {
          if s1 > 0.0 {
            s1
          } else {
            s1 * s2
          }
        },
        CalculusFunction::Sigmoid => 1.0 / (1.0 + (-s1).exp()),
        CalculusFunction::Tanh => s1.tanh(),
        CalculusFunction::Ln | CalculusFunction::Log => {
          if s1 > 0.0 {
            s1.ln()
          } else {
            -1.0
          }
        },
        CalculusFunction::Sqrt => {
          if s1 > 0.0 {
            s1.sqrt()
          } else {
            -1.0
          }
        },
      }),
      Op::Comparison { function, .. } => {
        let hit = match function {
          0 => s1 == s2,
          1 => s1 != s2,
          2 => s1 > s2,
          3 => s1 >= s2,
          4 => s1 < s2,
          5 => s1 <= s2,
          _ => return Ok(None),
        };
        Some(if hit { 1.0 } else { 0.0 })
      },
      Op::Cast { function, .. } => Some(match function {
        8 => s1.floor(),
        9 => s1.ceil(),
        _ => s1,
      }),
      Op::PermStart { .. } => Some(s1),
      _ => None,
    };
    Ok(value)
  }
}

impl Module for AluLane {
  fn name(&self) -> &str {
    &self.name
  }

  fn reset(&mut self) {
    self.core = StageCore::default();
    self.queue.clear();
  }
}

impl Stage for AluLane {
  fn core(&self) -> &StageCore {
    &self.core
  }

  fn core_mut(&mut self) -> &mut StageCore {
    &mut self.core
  }

  fn accept(&mut self, reg: InstReg) {
    if !Self::should_skip(&reg) {
      let remain = Self::latency(reg.inst.opcode, reg.inst.function);
      self.queue.push_back(Pending { reg: reg.clone(), remain });
    }
    self.core.input.set(reg);
    self.core.state.start(1);
  }

  fn is_finished(&self) -> bool {
    !self.core.input.valid && self.queue.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::genesys::simd::stage::ResolvedAddrs;
  use crate::isa::Instruction;

  fn reg(inst: Instruction, dst: i64, src1: i64, src2: i64) -> InstReg {
    InstReg {
      addr: ResolvedAddrs { dst: Some(dst), src1: Some(src1), src2: Some(src2) },
      ..InstReg::new(inst, 0)
    }
  }

  fn vmem(opcode: u8, function: u8) -> Instruction {
    Instruction::new(
      opcode,
      function,
      Operand::new(Namespace::Vmem1, 0),
      Operand::new(Namespace::Vmem1, 1),
      Operand::new(Namespace::Vmem2, 2),
    )
  }

  /// Push one instruction through a lane and tick until it retires.
  fn execute(lane: &mut AluLane, state: &mut SimulationState, reg: InstReg) -> SimResult<u32> {
    lane.accept(reg);
    let mut cycles = 0;
    loop {
      lane.tick(state)?;
      cycles += 1;
      lane.core.clear();
      if lane.is_finished() {
        return Ok(cycles);
      }
    }
  }

  #[test]
  fn test_skip_rules() {
    assert!(AluLane::should_skip(&InstReg::new(Instruction::NOP, 0)));
    assert!(AluLane::should_skip(&InstReg::new(vmem(5, 5), 0)));
    assert!(AluLane::should_skip(&InstReg::new(vmem(8, 1), 0)));
    let mut marker = InstReg::new(vmem(8, 3), 0);
    marker.first_permute = true;
    assert!(AluLane::should_skip(&marker));
    assert!(!AluLane::should_skip(&InstReg::new(vmem(8, 3), 0)));
    assert!(!AluLane::should_skip(&InstReg::new(vmem(0, 0), 0)));
    assert_eq!(AluLane::latency(1, 2), 4);
    assert_eq!(AluLane::latency(1, 10), 1);
  }

  #[test]
  fn test_add_writes_own_bank() {
    let mut lane = AluLane::new(1, false);
    let mut state = SimulationState::new(2, 16, 32);
    state.banks.write(Namespace::Vmem1, 1, 3, 2.0).unwrap();
    state.banks.write(Namespace::Vmem2, 1, 4, 5.0).unwrap();
    execute(&mut lane, &mut state, reg(vmem(0, 0), 7, 3, 4)).unwrap();
    assert_eq!(state.banks.read(Namespace::Vmem1, 1, 7).unwrap(), 7.0);
    assert_eq!(state.banks.read(Namespace::Vmem1, 0, 7).unwrap(), -1.0);
    let counters = state.access.lane(Namespace::Vmem1, 1);
    assert_eq!(counters.compute_read, 1);
    assert_eq!(counters.compute_write, 1);
    assert_eq!(state.access.lane(Namespace::Vmem2, 1).compute_read, 1);
  }

  #[test]
  fn test_sigmoid_latency() {
    let mut lane = AluLane::new(0, false);
    let mut state = SimulationState::new(1, 16, 32);
    let cycles = execute(&mut lane, &mut state, reg(vmem(1, 2), 0, 1, 2)).unwrap();
    assert_eq!(cycles, 4);
    let value = state.banks.read(Namespace::Vmem1, 0, 0).unwrap();
    assert!((value - 1.0 / (1.0 + 1.0f64.exp())).abs() < 1e-12);
  }

  #[test]
  fn test_comparison_and_conditional_move() {
    let mut lane = AluLane::new(0, false);
    let mut state = SimulationState::new(1, 16, 32);
    state.banks.write(Namespace::Vmem1, 0, 1, 3.0).unwrap();
    state.banks.write(Namespace::Vmem2, 0, 2, 3.0).unwrap();
    execute(&mut lane, &mut state, reg(vmem(2, 3), 0, 1, 2)).unwrap();
    assert_eq!(state.banks.read(Namespace::Vmem1, 0, 0).unwrap(), 1.0);
    // s2 != 0 keeps the move
    execute(&mut lane, &mut state, reg(vmem(0, 10), 5, 1, 2)).unwrap();
    assert_eq!(state.banks.read(Namespace::Vmem1, 0, 5).unwrap(), 3.0);
    // s2 != 0 blocks the inverted move
    execute(&mut lane, &mut state, reg(vmem(0, 11), 6, 1, 2)).unwrap();
    assert_eq!(state.banks.read(Namespace::Vmem1, 0, 6).unwrap(), -1.0);
  }

  #[test]
  fn test_bank_shuffle_targets_other_lane() {
    let mut lane0 = AluLane::new(0, false);
    let mut state = SimulationState::new(2, 16, 32);
    state.dest_bank_write_address[1] = 9;
    state.banks.write(Namespace::Vmem1, 0, 2, 4.5).unwrap();
    let mut shuffle = reg(
      Instruction::new(8, 3, Operand::new(Namespace::Vmem1, 0), Operand::new(Namespace::Vmem1, 0), Operand::new(Namespace::Imm, 1)),
      3,
      2,
      0,
    );
    shuffle.dest_bank = Some(1);
    execute(&mut lane0, &mut state, shuffle).unwrap();
    assert_eq!(state.dest_bank_write_address[0], 3);
    assert_eq!(state.banks.read(Namespace::Vmem1, 1, 9).unwrap(), 4.5);
    assert_eq!(state.access.lane(Namespace::Vmem1, 1).compute_write, 1);
  }

  #[test]
  fn test_overflow_and_unsupported() {
    let mut lane = AluLane::new(0, false);
    let mut state = SimulationState::new(1, 16, 32);
    let err = execute(&mut lane, &mut state, reg(vmem(0, 0), 16, 0, 0)).unwrap_err();
    assert!(matches!(err, SimError::AddressOverflow { ns: Namespace::Vmem1, addr: 16, depth: 16 }));
    let mut lane = AluLane::new(0, false);
    let err = execute(&mut lane, &mut state, reg(vmem(12, 0), 0, 0, 0)).unwrap_err();
    assert!(matches!(err, SimError::UnsupportedFunction { opcode: 12, .. }));
  }

  #[test]
  fn test_imm_source_is_counted() {
    let mut lane = AluLane::new(0, false);
    let mut state = SimulationState::new(1, 16, 32);
    state.banks.set_imm(2, 6).unwrap();
    let inst = Instruction::new(
      0,
      2,
      Operand::new(Namespace::Vmem1, 0),
      Operand::new(Namespace::Imm, 2),
      Operand::new(Namespace::Imm, 2),
    );
    execute(&mut lane, &mut state, reg(inst, 1, 0, 0)).unwrap();
    assert_eq!(state.banks.read(Namespace::Vmem1, 0, 1).unwrap(), 36.0);
    assert_eq!(state.access.imm_read, 2);
  }
}
