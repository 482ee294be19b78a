use super::instruction::Instruction;
use super::namespace::Namespace;
use crate::error::{SimError, SimResult};
use std::fs;
use std::path::Path;

/// Marker line where the SIMD half of a fused layer begins.
pub const SIMD_SPLIT_MARKER: &str = "SYNC_INST SIMD, START";

/// An instruction stream, one 32-bit word per line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
  pub instructions: Vec<Instruction>,
}

impl Program {
  pub fn new(instructions: Vec<Instruction>) -> Self {
    Self { instructions }
  }

  /// Parse decimal or 32-character binary words. Blank lines are skipped.
  pub fn parse(text: &str) -> SimResult<Self> {
    Self::parse_lines(text.lines().enumerate())
  }

  fn parse_lines<'a>(lines: impl Iterator<Item = (usize, &'a str)>) -> SimResult<Self> {
    let mut instructions = Vec::new();
    for (num, line) in lines {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let inst = if let Some(inst) = Instruction::from_binary_str(line) {
        inst
      } else {
        let word = line
          .parse::<u32>()
          .map_err(|e| SimError::trace(num + 1, format!("'{}' is not an instruction word: {}", line, e)))?;
        Instruction::decode(word)
      };
      instructions.push(inst);
    }
    Ok(Self { instructions })
  }

  pub fn load(path: &Path) -> SimResult<Self> {
    let text = fs::read_to_string(path)
      .map_err(|e| SimError::config(format!("cannot read instruction file {:?}: {}", path, e)))?;
    Self::parse(&text)
  }

  /// Keep the words from line `line` onward (the SIMD half of a fused layer).
  pub fn split_at_line(text: &str, line: usize) -> SimResult<Self> {
    Self::parse_lines(text.lines().enumerate().skip(line))
  }

  pub fn len(&self) -> usize {
    self.instructions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instructions.is_empty()
  }

  /// Number of opcode transitions along the stream, starting from START/DONE.
  pub fn state_change_count(&self) -> u32 {
    let mut current = 10u8;
    let mut changes = 0;
    for inst in &self.instructions {
      if inst.opcode != current {
        changes += 1;
        current = inst.opcode;
      }
    }
    changes
  }
}

/// Systolic/SIMD presence in a layer's compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
  Systolic,
  Simd,
  Fused,
}

impl LayerType {
  pub fn as_str(self) -> &'static str {
    match self {
      LayerType::Systolic => "systolic",
      LayerType::Simd => "simd",
      LayerType::Fused => "fused",
    }
  }
}

/// Tile counts read from `SA_LOOP_CFG 0, loop, iter` lines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SystolicLoops {
  /// (loop id, trip count) in program order, loop ids below 7 only.
  pub tile_loops: Vec<(usize, u64)>,
  /// Product of the trip counts of loops 7..=13.
  pub compute_loops: u64,
}

/// SIMD tile counts read from load/store base-loop configuration lines.
#[derive(Debug, Clone, PartialEq)]
pub struct SimdTileCounts {
  pub compute_tiles: u64,
  pub vmem1_load_tiles: u64,
  pub vmem2_load_tiles: u64,
  pub store_namespace: Namespace,
}

impl Default for SimdTileCounts {
  fn default() -> Self {
    Self {
      compute_tiles: 1,
      vmem1_load_tiles: 1,
      vmem2_load_tiles: 1,
      store_namespace: Namespace::Vmem1,
    }
  }
}

impl SimdTileCounts {
  pub fn max_load_tiles(&self) -> u64 {
    self.vmem1_load_tiles.max(self.vmem2_load_tiles)
  }
}

/// Human-readable compiler trace (`*_string_final.txt`).
#[derive(Debug, Clone, Default)]
pub struct StringTrace {
  lines: Vec<String>,
}

fn int_arg(parts: &[&str], idx: usize, line: usize) -> SimResult<u64> {
  let raw = parts
    .get(idx)
    .ok_or_else(|| SimError::trace(line, format!("missing operand {}", idx)))?;
  raw
    .trim()
    .parse::<u64>()
    .map_err(|e| SimError::trace(line, format!("operand '{}': {}", raw.trim(), e)))
}

/// Tracks one VMEM namespace's load tiling across `LD_CONFIG_BASE_LOOP_ITER` lines.
#[derive(Default)]
struct LoadTileScan {
  base_config_count: u32,
  start_count: u32,
  started: bool,
  last_loop: Option<u64>,
  tiles: u64,
}

impl LoadTileScan {
  fn new() -> Self {
    Self { tiles: 1, ..Default::default() }
  }

  fn on_base_config_zero(&mut self) {
    self.base_config_count += 1;
  }

  fn on_start(&mut self) {
    // A namespace configured twice only counts tiles up to its second LD_START.
    if self.base_config_count == 2 {
      self.start_count += 1;
      if self.start_count == 2 {
        self.started = true;
      }
    } else {
      self.started = true;
    }
  }

  fn on_loop(&mut self, loop_id: u64, trips: u64) {
    if self.last_loop != Some(loop_id) && !self.started {
      self.tiles *= trips;
    }
    self.last_loop = Some(loop_id);
  }
}

impl StringTrace {
  pub fn parse(text: &str) -> Self {
    Self { lines: text.lines().map(str::to_string).collect() }
  }

  pub fn load(path: &Path) -> SimResult<Self> {
    let text = fs::read_to_string(path)
      .map_err(|e| SimError::config(format!("cannot read string trace {:?}: {}", path, e)))?;
    Ok(Self::parse(&text))
  }

  pub fn len(&self) -> usize {
    self.lines.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  pub fn layer_type(&self) -> SimResult<LayerType> {
    let systolic = self.lines.iter().any(|l| l.contains("SYSTOLIC_ARRAY"));
    let simd = self.lines.iter().any(|l| l.contains("SIMD"));
    match (systolic, simd) {
      (true, true) => Ok(LayerType::Fused),
      (true, false) => Ok(LayerType::Systolic),
      (false, true) => Ok(LayerType::Simd),
      (false, false) => Err(SimError::config("could not find layer type in string trace")),
    }
  }

  /// Index of the last SIMD start marker, or 0 when there is none.
  pub fn simd_split_line(&self) -> usize {
    self.lines.iter().rposition(|l| l.contains(SIMD_SPLIT_MARKER)).unwrap_or(0)
  }

  /// Trace from `line` onward.
  pub fn tail(&self, line: usize) -> StringTrace {
    StringTrace { lines: self.lines.iter().skip(line).cloned().collect() }
  }

  pub fn systolic_loops(&self) -> SimResult<SystolicLoops> {
    let mut loops = SystolicLoops { tile_loops: Vec::new(), compute_loops: 1 };
    for (num, line) in self.lines.iter().enumerate() {
      if !line.contains("SA_LOOP_CFG 0") {
        continue;
      }
      let parts: Vec<&str> = line.split(',').collect();
      let loop_id = int_arg(&parts, 1, num + 1)? as usize;
      let trips = int_arg(&parts, 2, num + 1)? + 1;
      if loop_id < 7 {
        loops.tile_loops.push((loop_id, trips));
      } else if loop_id < 14 {
        loops.compute_loops *= trips;
      }
    }
    Ok(loops)
  }

  pub fn simd_tiles(&self) -> SimResult<SimdTileCounts> {
    let mut counts = SimdTileCounts::default();
    let mut vmem1 = LoadTileScan::new();
    let mut vmem2 = LoadTileScan::new();

    for (num, line) in self.lines.iter().enumerate() {
      let line_no = num + 1;
      if line.contains("ST_CONFIG_BASE_LOOP_ITER 0") {
        let parts: Vec<&str> = line.split(',').collect();
        counts.compute_tiles *= int_arg(&parts, 3, line_no)? + 1;
        if let Some(ns) = parts.get(1).and_then(|p| Namespace::from_mnemonic(p)) {
          counts.store_namespace = ns;
        }
      }

      if line.contains("LD_CONFIG_BASE_LOOP_ITER 0, VMEM1, 0") {
        vmem1.on_base_config_zero();
      }
      if line.contains("LD_CONFIG_BASE_LOOP_ITER 0, VMEM2, 0") {
        vmem2.on_base_config_zero();
      }
      if line.contains("LD_START 0, VMEM1") {
        vmem1.on_start();
      }
      if line.contains("LD_START 0, VMEM2") {
        vmem2.on_start();
      }

      for (marker, scan) in [("LD_CONFIG_BASE_LOOP_ITER 0, VMEM1", &mut vmem1), ("LD_CONFIG_BASE_LOOP_ITER 0, VMEM2", &mut vmem2)] {
        if line.contains(marker) {
          let parts: Vec<&str> = line.split(',').collect();
          let trips = int_arg(&parts, 3, line_no)? + 1;
          let loop_id = int_arg(&parts, 2, line_no)?;
          scan.on_loop(loop_id, trips);
        }
      }
    }

    counts.vmem1_load_tiles = vmem1.tiles;
    counts.vmem2_load_tiles = vmem2.tiles;
    Ok(counts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_decimal_and_binary() {
    let text = format!("{}\n\n{}\n", 0x0F00_0000u32, "10100000000000000000000000000000");
    let program = Program::parse(&text).unwrap();
    assert_eq!(program.len(), 2);
    assert!(program.instructions[0].is_nop());
    assert_eq!(program.instructions[1].opcode, 10);
  }

  #[test]
  fn test_parse_reports_line() {
    let err = Program::parse("1\n2\nabc\n").unwrap_err();
    assert!(matches!(err, SimError::Trace { line: 3, .. }));
  }

  #[test]
  fn test_state_changes() {
    let words = [10u32 << 28, 10 << 28, 5 << 28, 5 << 28, 0, 10 << 28];
    let program = Program::new(words.iter().map(|w| Instruction::decode(*w)).collect());
    assert_eq!(program.state_change_count(), 3);
  }

  #[test]
  fn test_layer_type_detection() {
    let fused = StringTrace::parse("SYNC_INST SYSTOLIC_ARRAY, START\nSYNC_INST SIMD, START\n");
    assert_eq!(fused.layer_type().unwrap(), LayerType::Fused);
    let simd = StringTrace::parse("SYNC_INST SIMD, START\n");
    assert_eq!(simd.layer_type().unwrap(), LayerType::Simd);
    assert!(StringTrace::parse("NOP\n").layer_type().is_err());
  }

  #[test]
  fn test_systolic_loops() {
    let trace = StringTrace::parse("SA_LOOP_CFG 0, 0, 1\nSA_LOOP_CFG 0, 5, 3\nSA_LOOP_CFG 0, 9, 2\nSA_LOOP_CFG 1, 4, 7\n");
    let loops = trace.systolic_loops().unwrap();
    assert_eq!(loops.tile_loops, vec![(0, 2), (5, 4)]);
    assert_eq!(loops.compute_loops, 3);
  }

  #[test]
  fn test_simd_tiles() {
    let trace = StringTrace::parse(
      "LD_CONFIG_BASE_LOOP_ITER 0, VMEM1, 0, 3\n\
       LD_CONFIG_BASE_LOOP_ITER 0, VMEM1, 1, 1\n\
       LD_START 0, VMEM1, 0, 8\n\
       LD_CONFIG_BASE_LOOP_ITER 0, VMEM1, 2, 9\n\
       ST_CONFIG_BASE_LOOP_ITER 0, VMEM2, 0, 3\n\
       ST_CONFIG_BASE_LOOP_ITER 0, VMEM2, 1, 1\n",
    );
    let tiles = trace.simd_tiles().unwrap();
    assert_eq!(tiles.vmem1_load_tiles, 8);
    assert_eq!(tiles.vmem2_load_tiles, 1);
    assert_eq!(tiles.compute_tiles, 8);
    assert_eq!(tiles.store_namespace, Namespace::Vmem2);
  }

  #[test]
  fn test_split_marker() {
    let trace = StringTrace::parse("A\nSYNC_INST SIMD, START\nB\nSYNC_INST SIMD, START\nC\n");
    assert_eq!(trace.simd_split_line(), 3);
    assert_eq!(trace.tail(3).len(), 2);
    let program = Program::split_at_line("1\n2\n3\n4\n5\n", 3).unwrap();
    assert_eq!(program.len(), 2);
  }
}
