use super::indexing::LoopNest;
use super::stage::{Stage, StageCore};
use super::state::SimulationState;
use crate::builtin::Module;
use crate::error::{SimError, SimResult};
use crate::isa::instruction::{merge_half, DmaField, Direction, Half};
use crate::isa::{Namespace, NsArray, Op};

/// Entries per loop, permutation and DMA table.
pub const TABLE_ENTRIES: usize = 32;
const WORD_BYTES: u64 = 4;

/// Side effects decode asks the pipeline to apply to other stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
  StartAluLoop { inst_cnt: u32, iter_cnt: u64, nested: bool },
  StartPermutation { total: u64 },
  /// Extra passes over the program after the current one.
  SetBaseLoop { left: u64 },
}

/// One row of a load or store DMA table. Loop counts are stored decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaEntry {
  pub base_addr: i32,
  pub tile_addr: i32,
  pub base_loop_iter: u32,
  pub base_loop_stride: i32,
  pub tile_loop_iter: u32,
  pub tile_loop_stride: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaLoop {
  Base,
  Tile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaTable {
  pub entries: Vec<DmaEntry>,
  pub data_width: u8,
  pub req_size: u32,
}

impl Default for DmaTable {
  fn default() -> Self {
    Self {
      entries: vec![DmaEntry::default(); TABLE_ENTRIES],
      data_width: 0,
      req_size: 0,
    }
  }
}

impl DmaTable {
  fn entry_mut(&mut self, index: usize) -> SimResult<&mut DmaEntry> {
    self
      .entries
      .get_mut(index)
      .ok_or_else(|| SimError::invariant(format!("DMA table entry {} out of range", index)))
  }

  fn write(&mut self, index: usize, field: DmaField, half: Half, imm: u16) -> SimResult<()> {
    let entry = self.entry_mut(index)?;
    match field {
      DmaField::BaseAddr => entry.base_addr = merge_half(entry.base_addr, imm, half),
      DmaField::BaseLoopIter => entry.base_loop_iter = imm as u32 + 1,
      DmaField::BaseLoopStride => entry.base_loop_stride = merge_half(entry.base_loop_stride, imm, half),
      DmaField::TileLoopIter => entry.tile_loop_iter = imm as u32 + 1,
      DmaField::TileLoopStride => entry.tile_loop_stride = merge_half(entry.tile_loop_stride, imm, half),
      DmaField::TileAddr => entry.tile_addr = merge_half(entry.tile_addr, imm, half),
      DmaField::Start => {},
    }
    Ok(())
  }

  /// Product of the configured base-loop counts, if any entry is set.
  pub fn base_loop_product(&self) -> Option<u64> {
    let mut iters = self.entries.iter().filter(|e| e.base_loop_iter > 0).peekable();
    iters.peek()?;
    Some(iters.map(|e| e.base_loop_iter as u64).product())
  }

  /// Loops that actually iterate, with strides converted to words.
  fn loops(&self, which: DmaLoop) -> SimResult<(Vec<u32>, Vec<i64>)> {
    let mut iters = Vec::new();
    let mut strides = Vec::new();
    for entry in &self.entries {
      let (iter, stride) = match which {
        DmaLoop::Base => (entry.base_loop_iter, entry.base_loop_stride),
        DmaLoop::Tile => (entry.tile_loop_iter, entry.tile_loop_stride),
      };
      if iter <= 1 {
        continue;
      }
      if stride as i64 % WORD_BYTES as i64 != 0 {
        return Err(SimError::invariant(format!(
          "DMA stride {} is not a multiple of {} bytes",
          stride, WORD_BYTES
        )));
      }
      iters.push(iter);
      strides.push(stride as i64 / WORD_BYTES as i64);
    }
    Ok((iters, strides))
  }
}

/// DMA transfer in flight between DDR and a vmem namespace.
#[derive(Debug, Clone)]
struct ActiveTransfer {
  dir: Direction,
  ns: Namespace,
  /// Cycles before the first element moves.
  gate: u32,
  req_total: u64,
  /// Elements per cycle.
  bw: u64,
  base: LoopNest,
  base_strides: Vec<i64>,
  tile: LoopNest,
  tile_strides: Vec<i64>,
  ddr_base: i64,
  bank_base: i64,
  bank_cursor: u64,
  steps: u64,
  total_steps: u64,
}

/// Stage 1: loop, permutation and DMA bookkeeping.
#[derive(Debug, Clone)]
pub struct Decode {
  core: StageCore,
  lanes: usize,
  bandwidth_bytes: u64,
  loop_iters: [u32; TABLE_ENTRIES],
  perm_iters: [u32; TABLE_ENTRIES],
  load: NsArray<DmaTable>,
  store: NsArray<DmaTable>,
  transfer: Option<ActiveTransfer>,
  permuting: bool,
  base_loop_set: bool,
  base_iteration: u64,
  /// Set by fetch when the program wraps; consumed by the next transfer.
  pub should_inc_base_iter: bool,
}

impl Decode {
  pub fn new(lanes: usize, bandwidth_bytes: u64) -> Self {
    Self {
      core: StageCore::default(),
      lanes,
      bandwidth_bytes,
      loop_iters: [0; TABLE_ENTRIES],
      perm_iters: [0; TABLE_ENTRIES],
      load: NsArray::default(),
      store: NsArray::default(),
      transfer: None,
      permuting: false,
      base_loop_set: false,
      base_iteration: 0,
      should_inc_base_iter: false,
    }
  }

  pub fn is_permuting(&self) -> bool {
    self.permuting
  }

  pub fn is_transferring(&self) -> bool {
    self.transfer.is_some()
  }

  pub fn base_iteration(&self) -> u64 {
    self.base_iteration
  }

  pub fn table(&self, dir: Direction, ns: Namespace) -> &DmaTable {
    match dir {
      Direction::Load => &self.load[ns],
      Direction::Store => &self.store[ns],
    }
  }

  pub fn tick(&mut self, state: &mut SimulationState) -> SimResult<Vec<Control>> {
    let mut controls = Vec::new();
    if !self.core.should_cycle() {
      return Ok(controls);
    }
    let executed = self.core.state.executed();
    if executed == 0 {
      self.handle(state, &mut controls)?;
      self.core.latch_output();
    } else if self.permuting {
      // every cycle of a permutation re-issues START downstream
      self.core.latch_output();
    } else if self.transfer.is_some() {
      self.step_transfer(state, executed);
    }
    if self.core.state.advance() {
      self.permuting = false;
      self.transfer = None;
    }
    Ok(controls)
  }

  fn handle(&mut self, state: &mut SimulationState, controls: &mut Vec<Control>) -> SimResult<()> {
    let Some(reg) = self.core.input.get() else {
      return Ok(());
    };
    let inst = reg.inst;
    if inst.is_nop() || !matches!(inst.opcode, 5 | 7 | 8) {
      return Ok(());
    }
    log::debug!("decode pc {}: {}", reg.pc, inst);

    match inst.op()? {
      Op::LoadStore { dir, half, ns, index, field, immediate } => {
        if field == DmaField::Start {
          self.start_transfer(state, dir, ns, index, immediate)?;
        } else {
          let table = match dir {
            Direction::Load => &mut self.load[ns],
            Direction::Store => &mut self.store[ns],
          };
          table.write(index, field, half, immediate)?;
        }
      },
      Op::LoopSetIter { loop_id, count } => {
        if let Some(slot) = self.loop_iters.get_mut(loop_id) {
          *slot = count;
        }
      },
      Op::LoopSetInst { inst_cnt, nested } => {
        let iter_cnt = self.loop_iters.iter().filter(|&&i| i != 0).map(|&i| i as u64).product();
        self.loop_iters = [0; TABLE_ENTRIES];
        controls.push(Control::StartAluLoop { inst_cnt, iter_cnt, nested });
        self.try_set_base_loop(state, controls);
      },
      Op::PermSetIter { dim, count, .. } => {
        if let Some(slot) = self.perm_iters.get_mut(dim) {
          *slot = count;
        }
      },
      Op::PermStart { .. } if !self.permuting => {
        let total: u64 = self.perm_iters.iter().filter(|&&i| i != 0).map(|&i| i as u64).product();
        self.perm_iters = [0; TABLE_ENTRIES];
        let required = u32::try_from(total + 1)
          .map_err(|_| SimError::invariant(format!("permutation of {} moves is too long", total)))?;
        self.core.state.set_required(required);
        self.permuting = true;
        controls.push(Control::StartPermutation { total });
        self.try_set_base_loop(state, controls);
      },
      _ => {},
    }
    Ok(())
  }

  fn try_set_base_loop(&mut self, state: &mut SimulationState, controls: &mut Vec<Control>) {
    if self.base_loop_set {
      return;
    }
    let count = [
      &self.load[Namespace::Vmem1],
      &self.load[Namespace::Vmem2],
      &self.store[Namespace::Vmem1],
      &self.store[Namespace::Vmem2],
    ]
    .iter()
    .find_map(|table| table.base_loop_product())
    .unwrap_or(1);
    state.profiler.set_total_base_loop_iterations(count);
    controls.push(Control::SetBaseLoop { left: count.saturating_sub(1) });
    self.base_loop_set = true;
  }

  fn start_transfer(
    &mut self,
    state: &mut SimulationState,
    dir: Direction,
    ns: Namespace,
    width: usize,
    immediate: u16,
  ) -> SimResult<()> {
    let lanes = self.lanes as u64;
    let table = match dir {
      Direction::Load => &mut self.load[ns],
      Direction::Store => &mut self.store[ns],
    };
    table.data_width = width as u8;
    table.req_size = immediate as u32;

    let req_size = immediate as u64;
    let bw = (self.bandwidth_bytes / WORD_BYTES).max(1);
    let req_total = (lanes * (req_size / WORD_BYTES) / bw).max(1);
    let (base_iters, base_strides) = table.loops(DmaLoop::Base)?;
    let (tile_iters, tile_strides) = table.loops(DmaLoop::Tile)?;
    let first = table.entries[0];
    let tile = LoopNest::new(tile_iters);
    let tiles = tile.total();

    let bytes = tiles * req_size * lanes;
    match dir {
      Direction::Load => state.profiler.add_load_bytes(ns, bytes),
      Direction::Store => state.profiler.push_store_bytes(bytes),
    }

    // stores wait for the lanes' in-flight writes
    let gate = match dir {
      Direction::Load => 1,
      Direction::Store => self.lanes.max(1) as u32,
    };
    let total_steps = tiles * req_total;
    let required = u32::try_from(gate as u64 + total_steps)
      .map_err(|_| SimError::invariant(format!("DMA transfer of {} steps is too long", total_steps)))?;
    self.core.state.set_required(required);
    log::debug!(
      "{:?} {}: {} tiles x {} requests of {} bytes",
      dir,
      ns,
      tiles,
      req_total,
      req_size
    );

    self.transfer = Some(ActiveTransfer {
      dir,
      ns,
      gate,
      req_total,
      bw,
      base: LoopNest::new(base_iters),
      base_strides,
      tile,
      tile_strides,
      ddr_base: first.base_addr as i64 / WORD_BYTES as i64,
      bank_base: first.tile_addr as i64 * lanes as i64,
      bank_cursor: 0,
      steps: 0,
      total_steps,
    });
    Ok(())
  }

  fn step_transfer(&mut self, state: &mut SimulationState, executed: u32) {
    let Some(t) = self.transfer.as_mut() else {
      return;
    };
    if executed < t.gate || t.steps >= t.total_steps {
      return;
    }
    let tile_iter = t.steps / t.req_total;
    let req_idx = ((t.steps % t.req_total) * t.bw) as i64;
    let base_idx = t.base.address(self.base_iteration, &t.base_strides);
    let tile_idx = t.tile.address(tile_iter, &t.tile_strides);
    let ddr = t.ddr_base + base_idx + tile_idx + req_idx;
    let bank = t.bank_base + t.bank_cursor as i64;
    log::trace!("{:?} {} ddr[{}] <-> bank[{}] x {}", t.dir, t.ns, ddr, bank, t.bw);

    if t.ns.is_vmem() {
      for lane in 0..self.lanes {
        if let Some(counters) = state.access.lane_mut(t.ns, lane) {
          match t.dir {
            Direction::Load => counters.ld_write += 1,
            Direction::Store => counters.st_read += 1,
          }
        }
      }
    }

    t.bank_cursor += t.bw;
    t.steps += 1;
    if t.steps == t.total_steps && self.should_inc_base_iter {
      self.base_iteration += 1;
      self.should_inc_base_iter = false;
    }
  }
}

impl Module for Decode {
  fn name(&self) -> &str {
    "decode"
  }

  fn reset(&mut self) {
    *self = Decode::new(self.lanes, self.bandwidth_bytes);
  }
}

impl Stage for Decode {
  fn core(&self) -> &StageCore {
    &self.core
  }

  fn core_mut(&mut self) -> &mut StageCore {
    &mut self.core
  }
}
