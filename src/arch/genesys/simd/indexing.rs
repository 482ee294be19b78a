/// Row-major offsets of a loop nest: `offsets[i] = Π iters[i+1..]`.
pub fn offsets(iters: &[u32]) -> Vec<u64> {
  let mut out = vec![1u64; iters.len()];
  for i in (0..iters.len().saturating_sub(1)).rev() {
    out[i] = out[i + 1] * iters[i + 1].max(1) as u64;
  }
  out
}

/// Trip counts of an active loop nest together with their offsets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopNest {
  iters: Vec<u32>,
  offsets: Vec<u64>,
}

impl LoopNest {
  /// Zero trip counts mean "not configured" and count as one.
  pub fn new(iters: Vec<u32>) -> Self {
    let iters: Vec<u32> = iters.into_iter().map(|i| i.max(1)).collect();
    let offsets = offsets(&iters);
    Self { iters, offsets }
  }

  pub fn depth(&self) -> usize {
    self.iters.len()
  }

  pub fn iters(&self) -> &[u32] {
    &self.iters
  }

  pub fn total(&self) -> u64 {
    self.iters.iter().map(|&i| i as u64).product()
  }

  /// Per-dimension coordinate of linear iteration `n`.
  pub fn coordinates(&self, n: u64) -> Vec<u64> {
    self
      .iters
      .iter()
      .zip(&self.offsets)
      .map(|(&iter, &off)| (n / off) % iter as u64)
      .collect()
  }

  /// `Σ strides[i] * ((n / offsets[i]) mod iters[i])`; extra dimensions on
  /// either side are ignored.
  pub fn address(&self, n: u64, strides: &[i64]) -> i64 {
    self
      .coordinates(n)
      .iter()
      .zip(strides)
      .map(|(&coord, &stride)| coord as i64 * stride)
      .sum()
  }
}
