pub mod address_generation;
pub mod alu;
pub mod bank;
pub mod decode;
pub mod fetch;
pub mod indexing;
pub mod pipeline;
pub mod profiler;
pub mod stage;
pub mod state;
pub mod stats;

pub use pipeline::{Pipeline, PipelineConfig, SimdSummary};
pub use profiler::DdrTiming;
pub use stage::{Stage, StageSnapshot};
pub use state::SimulationState;
pub use stats::MemoryAccessTotals;
