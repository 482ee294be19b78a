use genesys_sim::arch::genesys::compose::RunOptions;
use genesys_sim::isa::{Instruction, Namespace, Operand, NOP_WORD};
use genesys_sim::simulator::Simulator;
use genesys_sim::{SimConfig, StepMode};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// Simulator setup flips process-wide logging switches
static TEST_MUTEX: Mutex<()> = Mutex::new(());

const SYSTOLIC_CONFIG: &str = r#"{
  "infLatency": 5, "frequency": 200,
  "IBUFinfBandwidth": 1e9, "OBUFinfBandwidth": 1e9, "WBUFinfBandwidth": 1e9, "BBUFinfBandwidth": 1e9,
  "ddr_frequency Mhz": 100,
  "IBUFperAccessReadEnergy": 0, "IBUFperAccessWriteEnergy": 0,
  "OBUFperAccessReadEnergy": 0, "OBUFperAccessWriteEnergy": 0,
  "WBUFperAccessReadEnergy": 0, "WBUFperAccessWriteEnergy": 0,
  "BBUFperAccessReadEnergy": 0, "BBUFperAccessWriteEnergy": 0,
  "decoderCycles": 3, "energyPerMAC": 1.0, "dram_cost": 0, "simd_energy_cost": 0
}"#;

const SIMD_CONFIG: &str = r#"{ "fast-run": true, "ddrLatency": 0 }"#;

const ARCH_CONFIG: &str = r#"{
  "DATA_WIDTH": 8, "ACC_WIDTH": 32, "WGT_WIDTH": 8, "BIAS_WIDTH": 32,
  "IBUF_DEPTH": 1024, "OBUF_DEPTH": 512, "WBUF_DEPTH": 1024, "BBUF_DEPTH": 256,
  "VMEM_DEPTH": 64, "VMEM_BANKS": 8, "ARRAY_N": 8, "ARRAY_M": 8,
  "SIMD_WIDTH": 2, "SIMD_CHANNEL_BW": 64
}"#;

const CONV_JSON: &str = r#"{
  "program": [{
    "operation": "conv_bias",
    "operation_parameters": { "stride": 1, "pad": 0 },
    "iterable_dimensions": { "N": 1, "OC": 4, "IC": 1, "KH": 1, "KW": 1, "OH": 1, "OW": 1 },
    "inputs": [
      { "name": "data", "tiling": { "IBUF": { "N": 1, "IC": 1, "IH": 1, "IW": 1 } } },
      { "name": "weight", "tiling": { "WBUF": { "OC": 2, "IC": 1, "KH": 1, "KW": 1 } } },
      { "name": "bias", "tiling": { "BBUF": { "OC": 2 } } }
    ],
    "outputs": [ { "name": "out", "tiling": { "OBUF": { "N": 1, "OC": 2, "OH": 1, "OW": 1 } } } ]
  }]
}"#;

const RELU_JSON: &str = r#"{ "program": [{ "operation": "relu", "iterable_dimensions": { "N": 1, "C": 16 } }] }"#;

/// Fresh directory under the system temp dir.
fn workspace(name: &str) -> PathBuf {
  let root = std::env::temp_dir().join(format!("genesys-sim-{}-{}", name, std::process::id()));
  let _ = fs::remove_dir_all(&root);
  fs::create_dir_all(root.join("configs")).unwrap();
  fs::write(root.join("configs/systolic_config.json"), SYSTOLIC_CONFIG).unwrap();
  fs::write(root.join("configs/simd_config.json"), SIMD_CONFIG).unwrap();
  fs::create_dir_all(root.join("model")).unwrap();
  fs::write(root.join("model/genesys_arch_cfg.json"), ARCH_CONFIG).unwrap();
  root
}

fn padded_trace(lines: &[&str]) -> String {
  let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
  while out.len() < 24 {
    out.push("NOP".to_string());
  }
  out.join("\n")
}

fn write_layer(model: &Path, dir: &str, json: &str, trace: &str, words: &[u32]) {
  let layer = model.join(dir);
  fs::create_dir_all(&layer).unwrap();
  fs::write(layer.join("op_json.json"), json).unwrap();
  fs::write(layer.join("op_string_final.txt"), trace).unwrap();
  let text: Vec<String> = words.iter().map(|w| w.to_string()).collect();
  fs::write(layer.join("op_decimal.txt"), text.join("\n")).unwrap();
}

fn systolic_trace() -> String {
  padded_trace(&["SYNC_INST SYSTOLIC_ARRAY, START, EXEC, 0, 0, 0", "SA_LOOP_CFG 0, 0, 1", "SYNC_INST SYSTOLIC_ARRAY, END, EXEC, 0, 0, 0"])
}

fn simd_trace() -> String {
  padded_trace(&["SYNC_INST SIMD, START, EXEC, 0, 0, 0", "ST_CONFIG_BASE_LOOP_ITER 0, VMEM1, 0, 3", "SYNC_INST SIMD, END, EXEC, 0, 0, 0"])
}

fn simd_words() -> Vec<u32> {
  let add = Instruction::new(
    0,
    0,
    Operand::new(Namespace::Vmem1, 0),
    Operand::new(Namespace::Vmem1, 0),
    Operand::new(Namespace::Vmem2, 0),
  );
  vec![10 << 28, add.encode(), add.encode(), 10 << 28]
}

fn sim_config(root: &Path) -> SimConfig {
  SimConfig {
    quiet: true,
    step_mode: StepMode::Continuous,
    trace_file: None,
    config_dir: root.join("configs"),
    arch_config: None,
    csv_output: Some(root.join("out/stats.csv")),
    run: RunOptions::default(),
  }
}

#[test]
fn test_systolic_layer_end_to_end() {
  let _guard = TEST_MUTEX.lock().unwrap();
  let root = workspace("systolic");
  let model = root.join("model");
  write_layer(&model, "layer0", CONV_JSON, &systolic_trace(), &[NOP_WORD, NOP_WORD]);

  let mut simulator = Simulator::new(sim_config(&root)).unwrap();
  let result = simulator.simulate_layer(&model.join("layer0")).unwrap().unwrap();
  let stats = &result.stats;

  // 10 B per DDR cycle, 5 cycles latency: prologue ceil(1.1 + 5), two
  // compute-bound tiles of 17, epilogue ceil(0.8 + 5), decoder 3
  assert_eq!(stats.number("Genesys", "totCycles"), 7.0 + 17.0 + 17.0 + 6.0 + 3.0);
  assert_eq!(stats.number("Genesys", "totTime(us)"), 50.0 / 200.0);
  assert_eq!(stats.number("Genesys", "memWaitCycles"), 0.0);
  assert_eq!(stats.text("Compiler", "layerType"), "systolic");
  assert_eq!(stats.text("Compiler", "layerClass"), "Conv");
  assert_eq!(stats.number("Compiler", "NumTiles"), 2.0);
  assert_eq!(stats.number("Systolic", "sysComputeCyclesPerTile"), 17.0);
  assert_eq!(stats.number("Systolic", "systotalCycles"), 50.0);
  assert_eq!(stats.number("Simd", "simdtotalCycles"), 0.0);
  assert_eq!(stats.number("Arch", "obufDepth"), 1024.0);
  assert_eq!(stats.number("Arch", "vmem1Depth"), 0.0);
  assert_eq!(stats.number("Energy", "macEnergy"), 4.0);
  assert_eq!(stats.text("Compiler", "OBUFTiling"), "{'N': 1, 'OC': 2, 'OH': 1, 'OW': 1}");
}

#[test]
fn test_simd_layer_end_to_end() {
  let _guard = TEST_MUTEX.lock().unwrap();
  let root = workspace("simd");
  let model = root.join("model");
  write_layer(&model, "layer0", RELU_JSON, &simd_trace(), &simd_words());

  let mut simulator = Simulator::new(sim_config(&root)).unwrap();
  let result = simulator.simulate_layer(&model.join("layer0")).unwrap().unwrap();
  let stats = &result.stats;

  let per_tile = stats.number("Simd", "simdComputeCyclesPerTile");
  assert!(per_tile > 0.0);
  // four compute tiles, nothing to load or store
  assert_eq!(stats.number("Simd", "NumComputeTiles"), 4.0);
  assert_eq!(stats.number("Genesys", "totCycles"), 4.0 * per_tile);
  assert_eq!(stats.number("Simd", "simdtotalCycles"), 4.0 * per_tile);
  assert_eq!(stats.number("Systolic", "systotalCycles"), 0.0);
  assert_eq!(stats.number("Arch", "ibufDepth"), 0.0);
  assert_eq!(stats.number("Arch", "vmem1Depth"), 64.0);
  assert_eq!(stats.text("Simd", "StoreTilesNameSpace"), "vmem1");
  assert!(result.systolic.is_none());
}

#[test]
fn test_model_run_skips_and_survives_failures() {
  let _guard = TEST_MUTEX.lock().unwrap();
  let root = workspace("model");
  let model = root.join("model");
  write_layer(&model, "layer0", CONV_JSON, &systolic_trace(), &[NOP_WORD]);
  // too short to be a real layer
  write_layer(&model, "layer1", CONV_JSON, "SYNC_INST SYSTOLIC_ARRAY, START", &[NOP_WORD]);
  // neither systolic nor SIMD
  write_layer(&model, "layer2", CONV_JSON, &padded_trace(&[]), &[NOP_WORD]);
  write_layer(&model, "layer3", RELU_JSON, &simd_trace(), &simd_words());
  fs::create_dir_all(model.join("notes")).unwrap();

  let config = sim_config(&root);
  let csv = config.csv_output.clone().unwrap();
  let mut simulator = Simulator::new(config).unwrap();
  let report = simulator.run(&model).unwrap();

  assert_eq!(report.records.len(), 2);
  assert_eq!(report.skipped, vec!["layer1".to_string()]);
  assert_eq!(report.failed.len(), 1);
  assert_eq!(report.failed[0].0, "layer2");
  assert!(report.failed[0].1.contains("layer type"));

  let text = fs::read_to_string(csv).unwrap();
  let lines: Vec<&str> = text.lines().collect();
  assert_eq!(lines.len(), 4);
  assert!(lines[0].starts_with("Compiler,"));
  assert!(lines[1].starts_with("layerName,layerType,layerClass,DDRTiling"));
  assert!(lines[2].starts_with("layer0,systolic,Conv,"));
  assert!(lines[3].starts_with("layer3,simd,"));
}

#[test]
fn test_missing_artifacts_fail_fast() {
  let _guard = TEST_MUTEX.lock().unwrap();
  let root = workspace("missing");
  let layer = root.join("model/layer0");
  fs::create_dir_all(&layer).unwrap();
  fs::write(layer.join("op_json.json"), CONV_JSON).unwrap();

  let mut simulator = Simulator::new(sim_config(&root)).unwrap();
  let err = simulator.simulate_layer(&layer).unwrap_err();
  assert!(err.to_string().contains("_string_final.txt"));
  assert!(Simulator::layer_dirs(&root.join("configs")).is_err());
}

#[test]
fn test_trace_file_has_one_line_per_cycle() {
  let _guard = TEST_MUTEX.lock().unwrap();
  let root = workspace("trace");
  let model = root.join("model");
  write_layer(&model, "layer0", RELU_JSON, &simd_trace(), &simd_words());

  let trace_path = root.join("out/trace.jsonl");
  let config = SimConfig { trace_file: Some(trace_path.clone()), csv_output: None, ..sim_config(&root) };
  let mut simulator = Simulator::new(config).unwrap();
  let result = simulator.simulate_layer(&model.join("layer0")).unwrap().unwrap();
  drop(simulator);

  let cycles = result.simd.unwrap().global_cycle;
  let text = fs::read_to_string(trace_path).unwrap();
  assert_eq!(text.lines().count() as u64, cycles);
  let last: serde_json::Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
  assert_eq!(last["cycle"], cycles);
  assert_eq!(last["layer"], "layer0");
}
