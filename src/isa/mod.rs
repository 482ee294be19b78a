pub mod instruction;
pub mod namespace;
pub mod program;

pub use instruction::{Instruction, Op, Opcode, Operand, NOP_WORD};
pub use namespace::{Namespace, NsArray};
pub use program::{LayerType, Program, SimdTileCounts, StringTrace, SystolicLoops};
