use crate::builtin::{Module, Wire};
use crate::isa::Instruction;
use serde::Serialize;

/// Bank addresses resolved by address generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedAddrs {
  pub dst: Option<i64>,
  pub src1: Option<i64>,
  pub src2: Option<i64>,
}

/// Instruction register travelling down the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstReg {
  pub inst: Instruction,
  pub pc: usize,
  pub addr: ResolvedAddrs,
  /// Lane whose bank receives the result of a bank-shuffle move.
  pub dest_bank: Option<usize>,
  /// Marker-only cycle that opens a permutation; lanes ignore it.
  pub first_permute: bool,
}

impl InstReg {
  pub fn new(inst: Instruction, pc: usize) -> Self {
    Self { inst, pc, ..Default::default() }
  }
}

/// Per-stage finite-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
  #[default]
  Idle,
  Busy { required: u32, executed: u32 },
}

impl StageState {
  pub fn is_idle(&self) -> bool {
    matches!(self, StageState::Idle)
  }

  pub fn executed(&self) -> u32 {
    match self {
      StageState::Idle => 0,
      StageState::Busy { executed, .. } => *executed,
    }
  }

  pub fn required(&self) -> u32 {
    match self {
      StageState::Idle => 0,
      StageState::Busy { required, .. } => *required,
    }
  }

  pub fn start(&mut self, cycles: u32) {
    *self = if cycles == 0 {
      StageState::Idle
    } else {
      StageState::Busy { required: cycles, executed: 0 }
    };
  }

  /// Lengthen the instruction currently being worked on.
  pub fn set_required(&mut self, cycles: u32) {
    if let StageState::Busy { required, .. } = self {
      *required = cycles.max(1);
    }
  }

  pub fn extend(&mut self, extra: u32) {
    if let StageState::Busy { required, .. } = self {
      *required += extra;
    }
  }

  /// One clock. Returns true when the stage completed and went idle.
  pub fn advance(&mut self) -> bool {
    match *self {
      StageState::Idle => false,
      StageState::Busy { required, executed } => {
        if executed + 1 >= required {
          *self = StageState::Idle;
          true
        } else {
          *self = StageState::Busy { required, executed: executed + 1 };
          false
        }
      },
    }
  }
}

/// Registers and FSM shared by every stage.
#[derive(Debug, Clone, Default)]
pub struct StageCore {
  pub input: Wire<InstReg>,
  pub output: Wire<InstReg>,
  pub state: StageState,
}

impl StageCore {
  pub fn clear(&mut self) {
    self.input.clear();
    self.output.clear();
  }

  pub fn holds_nop(&self) -> bool {
    self.input.get().map_or(false, |reg| reg.inst.is_nop())
  }

  /// A stage does work only while busy with a valid instruction.
  pub fn should_cycle(&self) -> bool {
    !self.state.is_idle() && self.input.valid
  }

  /// Forward the (possibly updated) input to the output register.
  pub fn latch_output(&mut self) {
    if let Some(reg) = self.input.get() {
      let reg = reg.clone();
      self.output.set(reg);
    }
  }

  /// Plain one-instruction-per-cycle behaviour.
  pub fn tick_passthrough(&mut self) {
    if !self.should_cycle() {
      return;
    }
    if self.state.executed() == 0 {
      self.latch_output();
    }
    self.state.advance();
  }
}

/// Snapshot of one stage for the trace file and the step shell.
#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
  pub name: String,
  pub busy: bool,
  pub executed: u32,
  pub required: u32,
  pub word: Option<u32>,
  pub pc: Option<usize>,
}

pub trait Stage: Module {
  fn core(&self) -> &StageCore;

  fn core_mut(&mut self) -> &mut StageCore;

  /// Latch a new instruction into the input register.
  fn accept(&mut self, reg: InstReg) {
    let core = self.core_mut();
    core.input.set(reg);
    core.state.start(1);
  }

  fn is_idle(&self) -> bool {
    self.core().state.is_idle()
  }

  fn is_finished(&self) -> bool {
    !self.core().input.valid
  }

  /// Pull phase. Returns true when this stage is stalled, which keeps its
  /// predecessor from advancing.
  fn pull_from(&mut self, prev: &mut dyn Stage) -> bool {
    if !self.is_idle() {
      return true;
    }
    self.core_mut().clear();
    if prev.is_idle() {
      if let Some(reg) = prev.core_mut().output.take() {
        self.accept(reg);
      }
      false
    } else {
      true
    }
  }

  fn snapshot(&self) -> StageSnapshot {
    let core = self.core();
    let reg = core.input.get();
    StageSnapshot {
      name: self.name().to_string(),
      busy: !core.state.is_idle(),
      executed: core.state.executed(),
      required: core.state.required(),
      word: reg.map(|r| r.inst.encode()),
      pc: reg.map(|r| r.pc),
    }
  }
}
