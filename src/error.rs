use crate::isa::namespace::Namespace;
use std::io;
use thiserror::Error;

/// Errors raised while simulating one layer. All of them abort the layer.
#[derive(Debug, Error)]
pub enum SimError {
  /// Unrecognized layer type, missing artifact, missing or invalid key.
  #[error("configuration error: {0}")]
  Config(String),

  /// A line of an instruction stream or string trace could not be parsed.
  #[error("malformed trace entry at line {line}: {reason}")]
  Trace { line: usize, reason: String },

  #[error("unsupported function {function} for opcode {opcode}")]
  UnsupportedFunction { opcode: u8, function: u8 },

  #[error("invalid namespace id {0}")]
  InvalidNamespace(u8),

  /// Simulator/artifact mismatch: tag collision, bad scheduling, runaway loop.
  #[error("invariant violated: {0}")]
  Invariant(String),

  #[error("{ns} address {addr} out of range (bank depth {depth})")]
  AddressOverflow { ns: Namespace, addr: i64, depth: usize },

  #[error(transparent)]
  Io(#[from] io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;

impl SimError {
  pub fn config(msg: impl Into<String>) -> Self {
    SimError::Config(msg.into())
  }

  pub fn invariant(msg: impl Into<String>) -> Self {
    SimError::Invariant(msg.into())
  }

  pub fn trace(line: usize, reason: impl Into<String>) -> Self {
    SimError::Trace { line, reason: reason.into() }
  }
}

impl From<SimError> for io::Error {
  fn from(err: SimError) -> Self {
    match err {
      SimError::Io(e) => e,
      other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_io_conversion_keeps_message() {
    let err: io::Error = SimError::invariant("obuf store tag equals compute tag").into();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    assert!(err.to_string().contains("obuf store tag"));
  }

  #[test]
  fn test_overflow_message_names_namespace() {
    let err = SimError::AddressOverflow { ns: Namespace::Vmem2, addr: 2048, depth: 1024 };
    assert_eq!(err.to_string(), "vmem2 address 2048 out of range (bank depth 1024)");
  }
}
