use crate::error::SimResult;
use crate::simulator::config::artifacts::TileDims;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// One cell of the statistics record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
  Int(i64),
  Float(f64),
  Text(String),
  Dims(TileDims),
}

impl StatValue {
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      StatValue::Int(v) => Some(*v as f64),
      StatValue::Float(v) => Some(*v),
      _ => None,
    }
  }
}

impl fmt::Display for StatValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StatValue::Int(v) => write!(f, "{}", v),
      StatValue::Float(v) => write!(f, "{}", v),
      StatValue::Text(s) => f.write_str(s),
      StatValue::Dims(dims) => {
        let parts: Vec<String> = dims.iter().map(|(k, v)| format!("'{}': {}", k, v)).collect();
        write!(f, "{{{}}}", parts.join(", "))
      },
    }
  }
}

impl From<u64> for StatValue {
  fn from(v: u64) -> Self {
    StatValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
  }
}

impl From<i64> for StatValue {
  fn from(v: i64) -> Self {
    StatValue::Int(v)
  }
}

impl From<f64> for StatValue {
  fn from(v: f64) -> Self {
    StatValue::Float(v)
  }
}

impl From<&str> for StatValue {
  fn from(v: &str) -> Self {
    StatValue::Text(v.to_string())
  }
}

impl From<String> for StatValue {
  fn from(v: String) -> Self {
    StatValue::Text(v)
  }
}

impl From<TileDims> for StatValue {
  fn from(v: TileDims) -> Self {
    StatValue::Dims(v)
  }
}

/// Named group of metrics, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatSection {
  pub name: &'static str,
  pub fields: Vec<(&'static str, StatValue)>,
}

impl StatSection {
  pub fn new(name: &'static str) -> Self {
    Self { name, fields: Vec::new() }
  }

  pub fn with(mut self, key: &'static str, value: impl Into<StatValue>) -> Self {
    self.fields.push((key, value.into()));
    self
  }

  pub fn get(&self, key: &str) -> Option<&StatValue> {
    self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
  }
}

pub const SECTIONS: [&str; 6] = ["Compiler", "Arch", "Genesys", "Systolic", "Simd", "Energy"];

/// Statistics record of one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStats {
  pub sections: Vec<StatSection>,
}

impl LayerStats {
  pub fn section(&self, name: &str) -> Option<&StatSection> {
    self.sections.iter().find(|s| s.name == name)
  }

  pub fn get(&self, section: &str, key: &str) -> Option<&StatValue> {
    self.section(section).and_then(|s| s.get(key))
  }

  /// Numeric metric, 0 when absent or not a number.
  pub fn number(&self, section: &str, key: &str) -> f64 {
    self.get(section, key).and_then(StatValue::as_f64).unwrap_or(0.0)
  }

  pub fn text(&self, section: &str, key: &str) -> String {
    self.get(section, key).map(|v| v.to_string()).unwrap_or_default()
  }

  /// Section names, each followed by blanks up to the width of its fields.
  pub fn header_row(&self) -> Vec<String> {
    let mut row = Vec::new();
    for section in &self.sections {
      row.push(section.name.to_string());
      row.extend(std::iter::repeat(String::new()).take(section.fields.len().saturating_sub(1)));
    }
    row
  }

  pub fn metric_row(&self) -> Vec<String> {
    self
      .sections
      .iter()
      .flat_map(|s| s.fields.iter().map(|(k, _)| k.to_string()))
      .collect()
  }

  pub fn value_row(&self) -> Vec<String> {
    self
      .sections
      .iter()
      .flat_map(|s| s.fields.iter().map(|(_, v)| v.to_string()))
      .collect()
  }
}

fn csv_field(value: &str) -> String {
  if value.contains([',', '"', '\n']) {
    format!("\"{}\"", value.replace('"', "\"\""))
  } else {
    value.to_string()
  }
}

fn write_row(out: &mut impl Write, row: &[String]) -> SimResult<()> {
  let cells: Vec<String> = row.iter().map(|c| csv_field(c)).collect();
  writeln!(out, "{}", cells.join(","))?;
  Ok(())
}

/// Render records as CSV: the section header row, the metric-name row,
/// then one row per layer. The first record fixes the columns.
pub fn write_csv(records: &[LayerStats], out: &mut impl Write) -> SimResult<()> {
  let Some(first) = records.first() else {
    return Ok(());
  };
  write_row(out, &first.header_row())?;
  write_row(out, &first.metric_row())?;
  for record in records {
    write_row(out, &record.value_row())?;
  }
  Ok(())
}

pub fn write_csv_file(records: &[LayerStats], path: &Path) -> SimResult<()> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      fs::create_dir_all(parent)?;
    }
  }
  let mut writer = BufWriter::new(File::create(path)?);
  write_csv(records, &mut writer)?;
  writer.flush()?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(name: &str, cycles: u64) -> LayerStats {
    let dims: TileDims = [("N".to_string(), 1), ("OC".to_string(), 4)].into();
    LayerStats {
      sections: vec![
        StatSection::new("Compiler").with("layerName", name).with("DDRTiling", dims),
        StatSection::new("Genesys").with("totCycles", cycles).with("totTime(us)", cycles as f64 / 200.0),
      ],
    }
  }

  #[test]
  fn test_lookup() {
    let stats = record("layer0", 400);
    assert_eq!(stats.number("Genesys", "totCycles"), 400.0);
    assert_eq!(stats.number("Genesys", "totTime(us)"), 2.0);
    assert_eq!(stats.text("Compiler", "layerName"), "layer0");
    assert_eq!(stats.number("Simd", "simdtotalCycles"), 0.0);
  }

  #[test]
  fn test_csv_layout() {
    let mut out = Vec::new();
    write_csv(&[record("layer0", 400), record("layer1", 10)], &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Compiler,,Genesys,");
    assert_eq!(lines[1], "layerName,DDRTiling,totCycles,totTime(us)");
    assert_eq!(lines[2], "layer0,\"{'N': 1, 'OC': 4}\",400,2");
    assert_eq!(lines[3], "layer1,\"{'N': 1, 'OC': 4}\",10,0.05");
    assert_eq!(lines.len(), 4);
  }

  #[test]
  fn test_no_records_no_output() {
    let mut out = Vec::new();
    write_csv(&[], &mut out).unwrap();
    assert!(out.is_empty());
  }
}
