use super::stage::{InstReg, Stage, StageCore};
use crate::builtin::Module;
use crate::isa::Instruction;

/// ALU loop being replayed out of the fetch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AluLoop {
  start: usize,
  inst_cnt: usize,
  /// Replays still to come after the current pass.
  left: u32,
  nested: bool,
}

/// Stage 0: owns the program counter.
#[derive(Debug, Clone, Default)]
pub struct InstructionFetch {
  core: StageCore,
  program: Vec<Instruction>,
  pc: usize,
  alu_loop: Option<AluLoop>,
  base_left: u64,
}

impl InstructionFetch {
  pub fn new() -> Self {
    Self::default()
  }

  /// Install a program and latch its first word.
  pub fn load(&mut self, program: &[Instruction]) {
    self.reset();
    self.program = program.to_vec();
    if let Some(first) = self.program.first() {
      self.accept(InstReg::new(*first, 0));
    }
  }

  pub fn pc(&self) -> usize {
    self.pc
  }

  pub fn pc_end(&self) -> usize {
    self.program.len()
  }

  pub fn base_loops_left(&self) -> u64 {
    self.base_left
  }

  pub fn is_looping(&self) -> bool {
    self.alu_loop.is_some()
  }

  pub fn tick(&mut self) {
    self.core.tick_passthrough();
  }

  /// Replay the next `inst_cnt` words `left` more times, starting at the
  /// current pc.
  pub fn start_loop(&mut self, inst_cnt: usize, left: u32, nested: bool) {
    self.alu_loop = if left > 0 && inst_cnt > 0 {
      Some(AluLoop { start: self.pc, inst_cnt, left, nested })
    } else {
      None
    };
  }

  pub fn set_base_loop(&mut self, left: u64) {
    self.base_left = left;
  }

  /// Step the loop window. Returns the loop-back overhead in cycles.
  fn iterate_loop(&mut self) -> u32 {
    let Some(lp) = self.alu_loop.as_mut() else {
      return 0;
    };
    if self.pc != lp.start + lp.inst_cnt {
      return 0;
    }
    self.pc = lp.start;
    lp.left -= 1;
    let overhead = if lp.nested { 0 } else { 1 };
    if lp.left == 0 {
      self.alu_loop = None;
    }
    overhead
  }

  /// Pull phase for the stage without a predecessor. Returns true when the
  /// program wrapped for another base-loop iteration.
  pub fn advance(&mut self) -> bool {
    if !self.is_idle() {
      return false;
    }
    self.core.clear();
    self.pc += 1;
    let overhead = self.iterate_loop();

    let mut wrapped = false;
    if self.pc >= self.program.len() {
      return false;
    }
    if self.pc + 1 == self.program.len() && self.base_left > 0 {
      self.pc = 1;
      self.base_left -= 1;
      wrapped = true;
      log::debug!("base loop wrap, {} left", self.base_left);
    }
    if let Some(inst) = self.program.get(self.pc).copied() {
      self.accept(InstReg::new(inst, self.pc));
      self.core.state.extend(overhead);
    }
    wrapped
  }
}

impl Module for InstructionFetch {
  fn name(&self) -> &str {
    "fetch"
  }

  fn reset(&mut self) {
    self.core = StageCore::default();
    self.pc = 0;
    self.alu_loop = None;
    self.base_left = 0;
  }
}

impl Stage for InstructionFetch {
  fn core(&self) -> &StageCore {
    &self.core
  }

  fn core_mut(&mut self) -> &mut StageCore {
    &mut self.core
  }
}
