use super::namespace::Namespace;
use crate::error::{SimError, SimResult};
use serde::Serialize;
use std::fmt;

/// Word of the canonical NOP: opcode 0 (ALU), function 15.
pub const NOP_WORD: u32 = 0x0F00_0000;

#[inline]
fn field(word: u32, hi: u32, lo: u32) -> u8 {
  ((word >> lo) & ((1u32 << (hi - lo + 1)) - 1)) as u8
}

/// Namespace id plus index slot of one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Operand {
  pub ns_id: u8,
  pub index: u8,
}

impl Operand {
  pub const fn new(ns: Namespace, index: u8) -> Self {
    Self { ns_id: ns as u8, index }
  }

  pub fn namespace(&self) -> SimResult<Namespace> {
    Namespace::from_id(self.ns_id)
  }
}

/// Decoded 32-bit instruction word.
///
/// Layout, MSB first: opcode[31:28] function[27:24] dst_ns[23:21]
/// dst_index[20:16] src1_ns[15:13] src1_index[12:8] src2_ns[7:5]
/// src2_index[4:0]. The immediate aliases bits [15:0].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Instruction {
  pub opcode: u8,
  pub function: u8,
  pub dst: Operand,
  pub src1: Operand,
  pub src2: Operand,
}

impl Default for Instruction {
  fn default() -> Self {
    Instruction::NOP
  }
}

impl Instruction {
  pub const NOP: Instruction = Instruction {
    opcode: 0,
    function: 15,
    dst: Operand { ns_id: 0, index: 0 },
    src1: Operand { ns_id: 0, index: 0 },
    src2: Operand { ns_id: 0, index: 0 },
  };

  pub fn decode(word: u32) -> Self {
    Self {
      opcode: field(word, 31, 28),
      function: field(word, 27, 24),
      dst: Operand { ns_id: field(word, 23, 21), index: field(word, 20, 16) },
      src1: Operand { ns_id: field(word, 15, 13), index: field(word, 12, 8) },
      src2: Operand { ns_id: field(word, 7, 5), index: field(word, 4, 0) },
    }
  }

  pub fn encode(&self) -> u32 {
    ((self.opcode as u32 & 0xF) << 28)
      | ((self.function as u32 & 0xF) << 24)
      | ((self.dst.ns_id as u32 & 0x7) << 21)
      | ((self.dst.index as u32 & 0x1F) << 16)
      | ((self.src1.ns_id as u32 & 0x7) << 13)
      | ((self.src1.index as u32 & 0x1F) << 8)
      | ((self.src2.ns_id as u32 & 0x7) << 5)
      | (self.src2.index as u32 & 0x1F)
  }

  pub fn new(opcode: u8, function: u8, dst: Operand, src1: Operand, src2: Operand) -> Self {
    Self { opcode, function, dst, src1, src2 }
  }

  /// Build a word whose low 16 bits carry an immediate instead of sources.
  pub fn with_immediate(opcode: u8, function: u8, dst: Operand, immediate: u16) -> Self {
    let low = Instruction::decode(immediate as u32);
    Self { opcode, function, dst, src1: low.src1, src2: low.src2 }
  }

  pub fn immediate(&self) -> u16 {
    (self.encode() & 0xFFFF) as u16
  }

  /// Opcode-specific modifier, bits [27:22].
  pub fn op_spec(&self) -> u8 {
    field(self.encode(), 27, 22)
  }

  pub fn is_nop(&self) -> bool {
    self.opcode == 0 && self.function == 15
  }

  pub fn opcode_kind(&self) -> Option<Opcode> {
    Opcode::from_u8(self.opcode)
  }

  /// Parse a 32-character binary string (MSB first).
  pub fn from_binary_str(text: &str) -> Option<Self> {
    let text = text.trim();
    if text.len() != 32 || !text.bytes().all(|b| b == b'0' || b == b'1') {
      return None;
    }
    u32::from_str_radix(text, 2).ok().map(Instruction::decode)
  }

  pub fn to_binary_string(&self) -> String {
    format!("{:032b}", self.encode())
  }

  /// Interpret the word as its opcode family, rejecting function codes the
  /// family does not define.
  pub fn op(&self) -> SimResult<Op> {
    let unsupported = || SimError::UnsupportedFunction { opcode: self.opcode, function: self.function };
    let Some(kind) = self.opcode_kind() else {
      return Ok(Op::Unknown { opcode: self.opcode });
    };
    let op = match kind {
      Opcode::Alu => Op::Alu {
        function: AluFunction::from_u8(self.function),
        dst: self.dst,
        src1: self.src1,
        src2: self.src2,
      },
      Opcode::Calculus => Op::Calculus {
        function: CalculusFunction::from_u8(self.function).ok_or_else(unsupported)?,
        dst: self.dst,
        src1: self.src1,
      },
      Opcode::Comparison => Op::Comparison { function: self.function, dst: self.dst, src1: self.src1, src2: self.src2 },
      Opcode::DatatypeCast => Op::Cast { function: self.function, dst: self.dst, src1: self.src1 },
      Opcode::DatatypeConfig => Op::DatatypeConfig { function: self.function },
      Opcode::LdSt => {
        let field = match self.function % 8 {
          0 => DmaField::BaseAddr,
          1 => DmaField::BaseLoopIter,
          2 => DmaField::BaseLoopStride,
          3 => DmaField::TileLoopIter,
          4 => DmaField::TileLoopStride,
          5 => DmaField::Start,
          6 => DmaField::TileAddr,
          _ => return Err(unsupported()),
        };
        Op::LoadStore {
          dir: if self.function / 8 == 1 { Direction::Store } else { Direction::Load },
          half: if self.dst.ns_id / 4 == 1 { Half::High } else { Half::Low },
          ns: Namespace::from_id(self.dst.ns_id % 4)?,
          index: self.dst.index as usize,
          field,
          immediate: self.immediate(),
        }
      },
      Opcode::IteratorConfig => {
        if self.function / 8 == 1 {
          let write = match self.function % 8 {
            0 => ImmWrite::Low,
            1 => ImmWrite::High,
            2 => ImmWrite::SignExtend,
            _ => return Err(unsupported()),
          };
          Op::SetImmediate { index: self.dst.index as usize, write, value: self.immediate() }
        } else {
          let key = if self.function >> 2 == 0 { IndexKey::Base } else { IndexKey::Stride };
          let write = match self.function % 4 {
            0 => IndexWrite::SignExtend,
            1 => IndexWrite::Low,
            2 => IndexWrite::High,
            _ => IndexWrite::ZeroFill,
          };
          Op::SetIndexEntry {
            ns: self.dst.namespace()?,
            index: self.dst.index as usize,
            key,
            write,
            value: self.immediate(),
          }
        }
      },
      Opcode::Loop => match self.function {
        0 => Op::LoopSetIndex { dst: self.dst, src1: self.src1, src2: self.src2 },
        1 => Op::LoopSetIter { loop_id: self.dst.ns_id as usize, count: self.immediate() as u32 },
        2 => Op::LoopSetInst { inst_cnt: self.immediate() as u32, nested: self.dst.ns_id != 0 },
        _ => return Err(unsupported()),
      },
      Opcode::Permutation => {
        let side = || match self.dst.ns_id {
          0 => Ok(PermSide::Source),
          1 => Ok(PermSide::Destination),
          _ => Err(unsupported()),
        };
        match self.function {
          0 => Op::PermSetBase { side: side()?, addr: self.immediate() },
          1 => Op::PermSetIter {
            side: side()?,
            dim: self.dst.index as usize,
            count: self.immediate() as u32 + 1,
          },
          2 => Op::PermSetStride { side: side()?, dim: self.dst.index as usize, stride: self.immediate() },
          3 => Op::PermStart { bank_shuffle: self.src2.index == 1 },
          _ => return Err(unsupported()),
        }
      },
      Opcode::StartDone => Op::StartDone { function: self.function },
      Opcode::Sentinel => Op::Sentinel,
    };
    Ok(op)
  }
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_nop() {
      return write!(f, "NOP");
    }
    let name = self.opcode_kind().map(|k| k.mnemonic()).unwrap_or("UNKNOWN");
    write!(
      f,
      "{} fn={} dst={}:{} src1={}:{} src2={}:{}",
      name,
      self.function,
      self.dst.ns_id,
      self.dst.index,
      self.src1.ns_id,
      self.src1.index,
      self.src2.ns_id,
      self.src2.index
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  Alu = 0,
  Calculus = 1,
  Comparison = 2,
  DatatypeCast = 3,
  DatatypeConfig = 4,
  LdSt = 5,
  IteratorConfig = 6,
  Loop = 7,
  Permutation = 8,
  StartDone = 10,
  Sentinel = 14,
}

impl Opcode {
  pub fn from_u8(value: u8) -> Option<Self> {
    let op = match value {
      0 => Opcode::Alu,
      1 => Opcode::Calculus,
      2 => Opcode::Comparison,
      3 => Opcode::DatatypeCast,
      4 => Opcode::DatatypeConfig,
      5 => Opcode::LdSt,
      6 => Opcode::IteratorConfig,
      7 => Opcode::Loop,
      8 => Opcode::Permutation,
      10 => Opcode::StartDone,
      14 => Opcode::Sentinel,
      _ => return None,
    };
    Some(op)
  }

  pub fn mnemonic(self) -> &'static str {
    match self {
      Opcode::Alu => "ALU",
      Opcode::Calculus => "CALCULUS",
      Opcode::Comparison => "COMPARISON",
      Opcode::DatatypeCast => "DATATYPE_CAST",
      Opcode::DatatypeConfig => "DATATYPE_CONFIG",
      Opcode::LdSt => "LD_ST",
      Opcode::IteratorConfig => "ITERATOR_CONFIG",
      Opcode::Loop => "LOOP",
      Opcode::Permutation => "PERMUTATION",
      Opcode::StartDone => "START_DONE",
      Opcode::Sentinel => "SENTINEL",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluFunction {
  Add,
  Sub,
  Mul,
  Macc,
  Div,
  Max,
  Min,
  Rshift,
  Lshift,
  Move,
  CondMoveTrue,
  CondMoveFalse,
  Not,
  And,
  Or,
  Nop,
}

impl AluFunction {
  pub fn from_u8(function: u8) -> Self {
    match function & 0xF {
      0 => AluFunction::Add,
      1 => AluFunction::Sub,
      2 => AluFunction::Mul,
      3 => AluFunction::Macc,
      4 => AluFunction::Div,
      5 => AluFunction::Max,
      6 => AluFunction::Min,
      7 => AluFunction::Rshift,
      8 => AluFunction::Lshift,
      9 => AluFunction::Move,
      10 => AluFunction::CondMoveTrue,
      11 => AluFunction::CondMoveFalse,
      12 => AluFunction::Not,
      13 => AluFunction::And,
      14 => AluFunction::Or,
      _ => AluFunction::Nop,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculusFunction {
  Relu,
  LeakyRelu,
  Sigmoid,
  Tanh,
  Ln,
  Sqrt,
  Log,
}

impl CalculusFunction {
  pub fn from_u8(function: u8) -> Option<Self> {
    let f = match function {
      0 => CalculusFunction::Relu,
      1 => CalculusFunction::LeakyRelu,
      2 => CalculusFunction::Sigmoid,
      3 => CalculusFunction::Tanh,
      5 => CalculusFunction::Ln,
      8 => CalculusFunction::Sqrt,
      10 => CalculusFunction::Log,
      _ => return None,
    };
    Some(f)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
  Load,
  Store,
}

/// Which 16-bit half of a 32-bit table entry an immediate replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
  Low,
  High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaField {
  BaseAddr,
  BaseLoopIter,
  BaseLoopStride,
  TileLoopIter,
  TileLoopStride,
  Start,
  TileAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmWrite {
  Low,
  High,
  SignExtend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKey {
  Base,
  Stride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWrite {
  SignExtend,
  Low,
  High,
  ZeroFill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermSide {
  Source,
  Destination,
}

/// An instruction viewed through its opcode family; each variant carries
/// only the fields that family reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
  Alu { function: AluFunction, dst: Operand, src1: Operand, src2: Operand },
  Calculus { function: CalculusFunction, dst: Operand, src1: Operand },
  Comparison { function: u8, dst: Operand, src1: Operand, src2: Operand },
  Cast { function: u8, dst: Operand, src1: Operand },
  DatatypeConfig { function: u8 },
  LoadStore { dir: Direction, half: Half, ns: Namespace, index: usize, field: DmaField, immediate: u16 },
  SetImmediate { index: usize, write: ImmWrite, value: u16 },
  SetIndexEntry { ns: Namespace, index: usize, key: IndexKey, write: IndexWrite, value: u16 },
  LoopSetIndex { dst: Operand, src1: Operand, src2: Operand },
  LoopSetIter { loop_id: usize, count: u32 },
  LoopSetInst { inst_cnt: u32, nested: bool },
  PermSetBase { side: PermSide, addr: u16 },
  /// `count` is already decoded (the word stores count minus one).
  PermSetIter { side: PermSide, dim: usize, count: u32 },
  PermSetStride { side: PermSide, dim: usize, stride: u16 },
  PermStart { bank_shuffle: bool },
  StartDone { function: u8 },
  Sentinel,
  Unknown { opcode: u8 },
}

/// Replace one 16-bit half of `prev` with `value`.
pub fn merge_half(prev: i32, value: u16, half: Half) -> i32 {
  match half {
    Half::Low => ((prev as u32 & 0xFFFF_0000) | value as u32) as i32,
    Half::High => ((prev as u32 & 0x0000_FFFF) | ((value as u32) << 16)) as i32,
  }
}

pub fn sign_extend(value: u16) -> i32 {
  value as i16 as i32
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Deterministic word generator for sweeping the encoding space.
  fn words(count: usize) -> impl Iterator<Item = u32> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    (0..count).map(move |_| {
      state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
      (state >> 32) as u32
    })
  }

  #[test]
  fn test_decode_fields() {
    // LOOP SET_INST, dst_ns 1, immediate 3
    let inst = Instruction::decode((7 << 28) | (2 << 24) | (1 << 21) | 3);
    assert_eq!(inst.opcode, 7);
    assert_eq!(inst.function, 2);
    assert_eq!(inst.dst.ns_id, 1);
    assert_eq!(inst.immediate(), 3);
    assert_eq!(inst.op().unwrap(), Op::LoopSetInst { inst_cnt: 3, nested: true });
  }

  #[test]
  fn test_encode_inverts_decode() {
    for word in words(4096).chain([0, u32::MAX, NOP_WORD]) {
      let inst = Instruction::decode(word);
      let again = Instruction::decode(inst.encode());
      assert_eq!(inst, again);
      assert_eq!(inst.encode(), word);
      assert_eq!(inst.immediate() as u32, word & 0xFFFF);
      assert_eq!(inst.op_spec() as u32, (word >> 22) & 0x3F);
    }
  }

  #[test]
  fn test_nop() {
    assert!(Instruction::decode(NOP_WORD).is_nop());
    assert!(Instruction::default().is_nop());
    assert_eq!(Instruction::NOP.encode(), NOP_WORD);
  }

  #[test]
  fn test_binary_string() {
    let inst = Instruction::with_immediate(6, 3, Operand::new(Namespace::Vmem1, 4), 0x1234);
    let text = inst.to_binary_string();
    assert_eq!(Instruction::from_binary_str(&text), Some(inst));
    assert!(Instruction::from_binary_str("0101").is_none());
    assert!(Instruction::from_binary_str(&"2".repeat(32)).is_none());
  }

  #[test]
  fn test_ld_st_variant() {
    // ST tile-loop-iter, high half, vmem2 entry 3
    let word = (5 << 28) | (11 << 24) | ((4 + 3) << 21) | (3 << 16) | 9;
    match Instruction::decode(word).op().unwrap() {
      Op::LoadStore { dir, half, ns, index, field, immediate } => {
        assert_eq!(dir, Direction::Store);
        assert_eq!(half, Half::High);
        assert_eq!(ns, Namespace::Vmem2);
        assert_eq!(index, 3);
        assert_eq!(field, DmaField::TileLoopIter);
        assert_eq!(immediate, 9);
      },
      other => panic!("unexpected {:?}", other),
    }
    let bad = Instruction::decode((5 << 28) | (7 << 24));
    assert!(matches!(bad.op(), Err(SimError::UnsupportedFunction { opcode: 5, function: 7 })));
  }

  #[test]
  fn test_iterator_config_variants() {
    let stride = Instruction::with_immediate(6, 5, Operand::new(Namespace::Vmem2, 1), 8);
    assert_eq!(
      stride.op().unwrap(),
      Op::SetIndexEntry { ns: Namespace::Vmem2, index: 1, key: IndexKey::Stride, write: IndexWrite::Low, value: 8 }
    );
    let imm = Instruction::with_immediate(6, 10, Operand::new(Namespace::Imm, 2), 0xFFFF);
    assert_eq!(imm.op().unwrap(), Op::SetImmediate { index: 2, write: ImmWrite::SignExtend, value: 0xFFFF });
    let bad = Instruction::with_immediate(6, 11, Operand::new(Namespace::Imm, 2), 0);
    assert!(bad.op().is_err());
  }

  #[test]
  fn test_unsupported_codes() {
    assert!(Instruction::decode((7 << 28) | (3 << 24)).op().is_err());
    assert!(Instruction::decode((8 << 28) | (4 << 24)).op().is_err());
    assert!(Instruction::decode((1 << 28) | (4 << 24)).op().is_err());
    // permutation side other than source/destination
    assert!(Instruction::decode((8 << 28) | (1 << 24) | (2 << 21)).op().is_err());
    assert_eq!(Instruction::decode(9 << 28).op().unwrap(), Op::Unknown { opcode: 9 });
  }

  #[test]
  fn test_half_merge() {
    assert_eq!(merge_half(0x1234_5678, 0xABCD, Half::Low), 0x1234_ABCD);
    assert_eq!(merge_half(0x1234_5678, 0xABCD, Half::High) as u32, 0xABCD_5678);
    assert_eq!(sign_extend(0xFFFE), -2);
    assert_eq!(sign_extend(0x7FFF), 0x7FFF);
  }
}
