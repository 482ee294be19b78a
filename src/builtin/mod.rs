pub mod port;

pub use port::Wire;

/// Common surface of every simulated hardware block.
pub trait Module {
  fn name(&self) -> &str;

  /// Return the block to its power-on state.
  fn reset(&mut self);
}
