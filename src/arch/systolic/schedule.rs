// Matrix-multiply jobs and their decomposition into grid-sized tiles

use super::pe::Dataflow;
use crate::error::{Result, SimError};
use crate::memdomain::WORD_BYTES;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayShape {
  pub rows: usize,
  pub cols: usize,
}

impl ArrayShape {
  pub fn new(rows: usize, cols: usize) -> Self {
    Self { rows, cols }
  }

  /// Side of every tile buffer. Buffers are `rows`×`rows` even when the
  /// grid is not square.
  pub fn tile_dim(&self) -> usize {
    self.rows
  }

  /// Output columns one pass can produce.
  pub fn tile_width(&self) -> usize {
    self.rows.min(self.cols)
  }
}

impl fmt::Display for ArrayShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.rows, self.cols)
  }
}

/// Loop order the tiling controller walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TilingStrategy {
  /// i → j → k, fetching A and W tiles for every visit
  #[default]
  #[serde(rename = "standard")]
  Standard,
  /// k → i → j, fetching each A/W tile once per k-slice and reusing it
  #[serde(rename = "reuse")]
  DataReuse,
}

impl fmt::Display for TilingStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TilingStrategy::Standard => write!(f, "standard"),
      TilingStrategy::DataReuse => write!(f, "reuse"),
    }
  }
}

impl FromStr for TilingStrategy {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "standard" => Ok(TilingStrategy::Standard),
      "reuse" | "data_reuse" | "data-reuse" => Ok(TilingStrategy::DataReuse),
      other => Err(format!("unknown tiling strategy: {}", other)),
    }
  }
}

/// One C[k1×k3] = A[k1×k2] · W[k2×k3] request. Matrices are row-major f32
/// at the given byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatMulJob {
  pub k1: usize,
  pub k2: usize,
  pub k3: usize,
  pub a_base: u32,
  pub w_base: u32,
  pub c_base: u32,
  #[serde(default)]
  pub mode: Dataflow,
  #[serde(default)]
  pub strategy: TilingStrategy,
}

impl MatMulJob {
  /// Job with A, W and C packed back to back from address 0.
  pub fn new(k1: usize, k2: usize, k3: usize) -> Self {
    let a_bytes = (k1 * k2) as u32 * WORD_BYTES;
    let w_bytes = (k2 * k3) as u32 * WORD_BYTES;
    Self {
      k1,
      k2,
      k3,
      a_base: 0,
      w_base: a_bytes,
      c_base: a_bytes + w_bytes,
      mode: Dataflow::default(),
      strategy: TilingStrategy::default(),
    }
  }

  pub fn with_bases(mut self, a_base: u32, w_base: u32, c_base: u32) -> Self {
    self.a_base = a_base;
    self.w_base = w_base;
    self.c_base = c_base;
    self
  }

  pub fn with_mode(mut self, mode: Dataflow) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_strategy(mut self, strategy: TilingStrategy) -> Self {
    self.strategy = strategy;
    self
  }

  /// Byte ranges `[start, end)` of A, W and C.
  pub fn regions(&self) -> [(&'static str, u64, u64); 3] {
    let span = |base: u32, rows: usize, cols: usize| {
      let start = base as u64;
      (start, start + (rows * cols) as u64 * WORD_BYTES as u64)
    };
    let (a0, a1) = span(self.a_base, self.k1, self.k2);
    let (w0, w1) = span(self.w_base, self.k2, self.k3);
    let (c0, c1) = span(self.c_base, self.k1, self.k3);
    [("A", a0, a1), ("W", w0, w1), ("C", c0, c1)]
  }

  /// Reject anything that would fault once streaming has begun.
  pub fn validate(&self, capacity_bytes: usize) -> Result<()> {
    if self.k1 == 0 || self.k2 == 0 || self.k3 == 0 {
      return Err(SimError::InvalidJob(format!(
        "dimensions must be positive, got {}x{}x{}",
        self.k1, self.k2, self.k3
      )));
    }

    for (name, base) in [("A", self.a_base), ("W", self.w_base), ("C", self.c_base)] {
      if base % WORD_BYTES != 0 {
        return Err(SimError::InvalidJob(format!(
          "{} base address 0x{:08x} is not {}-byte aligned",
          name, base, WORD_BYTES
        )));
      }
    }

    let regions = self.regions();
    for (name, _, end) in regions {
      if end > capacity_bytes as u64 {
        return Err(SimError::InvalidJob(format!(
          "matrix {} ends at byte {} beyond the {} byte memory",
          name, end, capacity_bytes
        )));
      }
    }

    let (_, c0, c1) = regions[2];
    for (name, start, end) in &regions[..2] {
      if c0 < *end && *start < c1 {
        return Err(SimError::InvalidJob(format!("output C overlaps input {}", name)));
      }
    }

    Ok(())
  }
}

/// Tile counts and extents for one job on one grid. Derived, never stored
/// beyond the job that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingSchedule {
  pub k1: usize,
  pub k2: usize,
  pub k3: usize,
  /// Rows of A/C per tile
  pub tile_height: usize,
  /// Reduction depth per tile
  pub tile_depth: usize,
  /// Columns of W/C per tile
  pub tile_width: usize,
  pub num_i_tiles: usize,
  pub num_j_tiles: usize,
  pub num_k_tiles: usize,
}

impl TilingSchedule {
  pub fn new(shape: ArrayShape, job: &MatMulJob) -> Self {
    let tile_height = shape.tile_dim();
    let tile_depth = shape.tile_dim();
    let tile_width = shape.tile_width();
    Self {
      k1: job.k1,
      k2: job.k2,
      k3: job.k3,
      tile_height,
      tile_depth,
      tile_width,
      num_i_tiles: job.k1.div_ceil(tile_height),
      num_j_tiles: job.k3.div_ceil(tile_width),
      num_k_tiles: job.k2.div_ceil(tile_depth),
    }
  }

  /// Valid rows in output row-tile `i_tile`.
  pub fn rows_in(&self, i_tile: usize) -> usize {
    assert!(i_tile < self.num_i_tiles, "i tile {} outside schedule", i_tile);
    self.tile_height.min(self.k1 - i_tile * self.tile_height)
  }

  /// Valid reduction depth in k-tile `k_tile`.
  pub fn depth_in(&self, k_tile: usize) -> usize {
    assert!(k_tile < self.num_k_tiles, "k tile {} outside schedule", k_tile);
    self.tile_depth.min(self.k2 - k_tile * self.tile_depth)
  }

  /// Valid columns in output column-tile `j_tile`.
  pub fn cols_in(&self, j_tile: usize) -> usize {
    assert!(j_tile < self.num_j_tiles, "j tile {} outside schedule", j_tile);
    self.tile_width.min(self.k3 - j_tile * self.tile_width)
  }

  pub fn output_tiles(&self) -> usize {
    self.num_i_tiles * self.num_j_tiles
  }

  /// A and W tile fetches the strategy performs.
  pub fn tile_fetches(&self, strategy: TilingStrategy) -> u64 {
    let (i, j, k) = (self.num_i_tiles as u64, self.num_j_tiles as u64, self.num_k_tiles as u64);
    match strategy {
      TilingStrategy::Standard => 2 * i * j * k,
      TilingStrategy::DataReuse => k * (i + j),
    }
  }

  /// Element reads the strategy issues. Padding is never fetched.
  pub fn element_reads(&self, strategy: TilingStrategy) -> u64 {
    let (k1, k2, k3) = (self.k1 as u64, self.k2 as u64, self.k3 as u64);
    match strategy {
      TilingStrategy::Standard => self.num_j_tiles as u64 * k1 * k2 + self.num_i_tiles as u64 * k2 * k3,
      TilingStrategy::DataReuse => k1 * k2 + k2 * k3,
    }
  }

  pub fn element_writes(&self) -> u64 {
    (self.k1 * self.k3) as u64
  }
}
