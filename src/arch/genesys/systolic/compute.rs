// ===========================================
// Systolic array compute model
// ===========================================

use serde::Serialize;

/// Rows and columns of processing elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArrayShape {
  pub rows: u64,
  pub cols: u64,
}

/// Dimensions of the work mapped onto the array for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComputeDims {
  Conv {
    n: u64,
    ic: u64,
    kh: u64,
    kw: u64,
    oc: u64,
    oh: u64,
    ow: u64,
  },
  Gemm {
    b: u64,
    c: u64,
    m: u64,
    n: u64,
    p: u64,
  },
}

/// Cost of one tile on the array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TileCompute {
  pub cycles: u64,
  /// Percent of the array doing useful work.
  pub utilization: f64,
  pub macs: u64,
}

fn folds(work: u64, lanes: u64) -> u64 {
  work.div_ceil(lanes.max(1))
}

/// Fraction of `lanes * folds` slots that carry `work`.
fn occupancy(work: u64, lanes: u64) -> f64 {
  let slots = folds(work, lanes) * lanes.max(1);
  if slots == 0 {
    0.0
  } else {
    work as f64 / slots as f64
  }
}

impl ComputeDims {
  /// Cycles, utilization and MAC count of one tile.
  ///
  /// # Arguments
  /// * `array` - shape of the systolic array
  ///
  /// # Returns
  /// Streaming cycles plus `rows + cols` for pipeline fill and drain.
  pub fn tile(&self, array: ArrayShape) -> TileCompute {
    let fill = array.rows + array.cols;
    match *self {
      ComputeDims::Conv { n, ic, kh, kw, oc, oh, ow } => {
        let reduction = kh * kw * ic;
        TileCompute {
          cycles: n * oh * ow * folds(reduction, array.rows) * folds(oc, array.cols) + fill,
          utilization: occupancy(reduction, array.rows) * occupancy(oc, array.cols) * 100.0,
          macs: oh * ow * oc * kh * kw * ic,
        }
      },
      ComputeDims::Gemm { b, c, m, n, p } => TileCompute {
        cycles: c * (b * m) * folds(n, array.rows) * folds(p, array.cols) + fill,
        utilization: occupancy(n, array.rows) * occupancy(p, array.cols) * 100.0,
        macs: c * m * p * n,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const ARRAY: ArrayShape = ArrayShape { rows: 8, cols: 8 };

  #[test]
  fn test_conv_single_tile() {
    let dims = ComputeDims::Conv { n: 1, ic: 1, kh: 1, kw: 1, oc: 2, oh: 1, ow: 1 };
    let tile = dims.tile(ARRAY);
    assert_eq!(tile.cycles, 17);
    assert_eq!(tile.macs, 2);
    assert!((tile.utilization - 100.0 / 8.0 * 2.0 / 8.0).abs() < 1e-9);
  }

  #[test]
  fn test_conv_folds_reduction() {
    // 3x3x16 = 144 reduction rows over 8 array rows is 18 folds
    let dims = ComputeDims::Conv { n: 1, ic: 16, kh: 3, kw: 3, oc: 16, oh: 4, ow: 4 };
    let tile = dims.tile(ARRAY);
    assert_eq!(tile.cycles, 16 * 18 * 2 + 16);
    assert!((tile.utilization - 100.0).abs() < 1e-9);
  }

  #[test]
  fn test_gemm_tile() {
    let dims = ComputeDims::Gemm { b: 1, c: 2, m: 4, n: 12, p: 8 };
    let tile = dims.tile(ARRAY);
    assert_eq!(tile.cycles, 2 * 4 * 2 + 16);
    assert_eq!(tile.macs, 2 * 4 * 8 * 12);
    assert!((tile.utilization - 75.0).abs() < 1e-9);
  }
}
