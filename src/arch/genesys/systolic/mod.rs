pub mod buffer;
pub mod compute;
pub mod systolic_sim;
pub mod tiling;

pub use buffer::{BufferGeometry, BufferKind, DoubleBufferTags, PerBuffer};
pub use compute::{ArrayShape, ComputeDims, TileCompute};
pub use systolic_sim::{overlap, SystolicParams, SystolicSim, SystolicStats};
pub use tiling::{ReuseMap, TileOrder, TileSpace};
