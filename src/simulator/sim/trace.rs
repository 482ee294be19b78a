use crate::arch::genesys::simd::Pipeline;
use std::fs::{self, File};
use std::io::{BufWriter, Result, Write};
use std::path::Path;

/// JSON-lines record of every SIMD pipeline cycle.
pub struct TraceWriter<W: Write> {
  out: BufWriter<W>,
  layer: String,
}

impl TraceWriter<File> {
  pub fn create(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
      }
    }
    Ok(Self::new(File::create(path)?))
  }
}

impl<W: Write> TraceWriter<W> {
  pub fn new(out: W) -> Self {
    Self { out: BufWriter::new(out), layer: String::new() }
  }

  /// Layer name stamped on the following records.
  pub fn set_layer(&mut self, layer: &str) {
    self.layer = layer.to_string();
  }

  pub fn record(&mut self, pipeline: &Pipeline) -> Result<()> {
    let entry = serde_json::json!({
      "layer": self.layer,
      "cycle": pipeline.cycle(),
      "stages": pipeline.snapshots(),
    });
    writeln!(self.out, "{}", entry)
  }

  pub fn flush(&mut self) -> Result<()> {
    self.out.flush()
  }

  pub fn into_inner(self) -> Result<W> {
    self.out.into_inner().map_err(|e| e.into_error())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::genesys::simd::PipelineConfig;
  use crate::isa::Program;

  #[test]
  fn test_one_line_per_cycle() {
    let mut pipeline = Pipeline::new(PipelineConfig { lanes: 2, ..PipelineConfig::default() });
    pipeline.load(&Program::default());
    let mut trace = TraceWriter::new(Vec::new());
    trace.set_layer("layer0");
    trace.record(&pipeline).unwrap();
    trace.record(&pipeline).unwrap();
    let text = String::from_utf8(trace.into_inner().unwrap()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["layer"], "layer0");
    assert_eq!(first["cycle"], 0);
    assert_eq!(first["stages"].as_array().unwrap().len(), 5);
  }
}
