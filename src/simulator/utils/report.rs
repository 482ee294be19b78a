use crate::arch::genesys::LayerStats;
use crate::log_info;

pub fn print_layer_stats(stats: &LayerStats) {
  if !super::log::is_log_enabled() {
    return;
  }
  println!("\n--- Layer Statistics ---");

  for section in &stats.sections {
    println!("\n[{}]", section.name);
    for (key, value) in &section.fields {
      println!("  {:<28} {}", key, value);
    }
  }

  println!("--- End Statistics ---\n");
}

/// One line per layer once a multi-layer run is over.
pub fn print_summary(records: &[LayerStats], failed: &[(String, String)]) {
  for stats in records {
    log_info!(
      "{:<24} {:>8} {:>14} cycles {:>12.3} us",
      stats.text("Compiler", "layerName"),
      stats.text("Compiler", "layerType"),
      stats.number("Genesys", "totCycles"),
      stats.number("Genesys", "totTime(us)")
    );
  }
  for (layer, reason) in failed {
    log_info!("{:<24} failed: {}", layer, reason);
  }
}
