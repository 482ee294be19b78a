pub mod compose;
pub mod energy;
pub mod layer;
pub mod simd;
pub mod stats;
pub mod systolic;

pub use compose::{Genesys, GenesysTotals, LayerResult, RunOptions};
pub use energy::{EnergyProvider, EnergyReport, LayerActivity, TableEnergy};
pub use layer::LayerDescriptor;
pub use stats::LayerStats;
