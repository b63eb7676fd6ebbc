// Per-tile dataflow controller: streams one tile-pair through the grid

use super::grid::{GridInputs, SystolicGrid};
use super::pe::Dataflow;
use super::tile_buffer::TileBuffer;
use serde::Serialize;
use std::fmt;

/// Valid extent of one pass: `rows` of A/C, reduction `depth`, `cols` of W/C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassShape {
  pub rows: usize,
  pub depth: usize,
  pub cols: usize,
}

/// Output-stationary bracketing of a pass. Accumulators survive between
/// passes unless `reset` is set, and are only shifted out when `drain` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsControl {
  pub reset: bool,
  pub drain: bool,
}

impl OsControl {
  /// Reset, accumulate and drain in a single pass.
  pub const SINGLE: OsControl = OsControl { reset: true, drain: true };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataflowPhase {
  Idle,
  /// WS: weights enter every PE
  Preload,
  /// WS: activations stream in, partial sums leave the bottom edge
  Stream(usize),
  /// OS: one-tick reset pulse
  Reset,
  /// OS: A from the left, W from the top
  Accumulate(usize),
  /// OS: first drain-mode tick, every PE presents its accumulator
  Settle,
  /// OS: one output row per tick, bottom row first
  Drain(usize),
}

impl fmt::Display for DataflowPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DataflowPhase::Idle => write!(f, "idle"),
      DataflowPhase::Preload => write!(f, "preload"),
      DataflowPhase::Stream(c) => write!(f, "stream {}", c),
      DataflowPhase::Reset => write!(f, "reset"),
      DataflowPhase::Accumulate(c) => write!(f, "accumulate {}", c),
      DataflowPhase::Settle => write!(f, "settle"),
      DataflowPhase::Drain(t) => write!(f, "drain {}", t),
    }
  }
}

/// Drives the grid's boundary ports for one tile-pair.
///
/// Each `tick` samples the grid's registered outputs (what the PEs latched on
/// the previous tick) and drives the inputs the grid will consume on this
/// tick. Skew arithmetic, with M grid rows:
/// * WS: A[r][i] enters row i on stream tick r + i; the sum for row r leaves
///   column j and is sampled on stream tick r + M + j.
/// * OS: A[i][k] enters row i and W[k][j] enters column j on accumulate
///   tick k + i and k + j. After the settle tick, drain tick t carries
///   output row M - 1 - t.
#[derive(Debug, Clone)]
pub struct DataflowController {
  grid_rows: usize,
  grid_cols: usize,
  mode: Dataflow,
  shape: PassShape,
  os: OsControl,
  phase: DataflowPhase,
}

impl DataflowController {
  pub fn new(grid_rows: usize, grid_cols: usize) -> Self {
    Self {
      grid_rows,
      grid_cols,
      mode: Dataflow::WeightStationary,
      shape: PassShape { rows: 0, depth: 0, cols: 0 },
      os: OsControl::SINGLE,
      phase: DataflowPhase::Idle,
    }
  }

  pub fn phase(&self) -> DataflowPhase {
    self.phase
  }

  pub fn is_idle(&self) -> bool {
    self.phase == DataflowPhase::Idle
  }

  /// Arm a pass. `os` is ignored in weight-stationary mode.
  pub fn begin(&mut self, mode: Dataflow, shape: PassShape, os: OsControl) {
    assert!(self.is_idle(), "pass started while {} in progress", self.phase);
    assert!(
      shape.rows <= self.grid_rows && shape.depth <= self.grid_rows,
      "pass {:?} does not fit {} grid rows",
      shape,
      self.grid_rows
    );
    assert!(shape.cols <= self.grid_cols, "pass {:?} does not fit {} grid columns", shape, self.grid_cols);

    self.mode = mode;
    self.shape = shape;
    self.os = os;
    self.phase = match mode {
      Dataflow::WeightStationary => DataflowPhase::Preload,
      Dataflow::OutputStationary if os.reset => DataflowPhase::Reset,
      Dataflow::OutputStationary => DataflowPhase::Accumulate(0),
    };
    log::debug!("dataflow {} pass {:?} begins with {}", mode, shape, self.phase);
  }

  /// Ticks a full pass occupies, including preload/reset and drain.
  pub fn pass_cycles(&self, mode: Dataflow, shape: PassShape, os: OsControl) -> usize {
    let (m, n) = (self.grid_rows, self.grid_cols);
    match mode {
      Dataflow::WeightStationary => 1 + shape.rows + m + n,
      Dataflow::OutputStationary => {
        let reset = if os.reset { 1 } else { 0 };
        let drain = if os.drain { 1 + m } else { 0 };
        reset + shape.depth + m + n + drain
      },
    }
  }

  /// Advance one tick. `c` receives WS partial sums (added in place) or OS
  /// drained rows (overwritten).
  ///
  /// # Returns
  /// True on the tick that completes the pass.
  pub fn tick(
    &mut self,
    grid: &SystolicGrid,
    inputs: &mut GridInputs,
    a: &TileBuffer,
    w: &TileBuffer,
    c: &mut TileBuffer,
  ) -> bool {
    let (m, n) = (self.grid_rows, self.grid_cols);
    let PassShape { rows, depth, cols } = self.shape;

    let (next, finished) = match self.phase {
      DataflowPhase::Idle => return false,

      DataflowPhase::Preload => {
        for i in 0..m {
          for j in 0..n {
            inputs.preload.value[i * n + j] = if i < depth && j < cols { w.get(i, j) } else { 0.0 };
          }
        }
        inputs.preload.valid = true;
        (DataflowPhase::Stream(0), false)
      },

      DataflowPhase::Stream(cycle) => {
        for i in 0..m {
          inputs.in_left[i] = match cycle.checked_sub(i) {
            Some(r) if r < rows && i < depth => a.get(r, i),
            _ => 0.0,
          };
        }
        for j in 0..cols {
          if let Some(r) = cycle.checked_sub(m + j) {
            if r < rows {
              c.add(r, j, grid.out_bottom(j));
            }
          }
        }
        if cycle + 1 == rows + m + n {
          (DataflowPhase::Idle, true)
        } else {
          (DataflowPhase::Stream(cycle + 1), false)
        }
      },

      DataflowPhase::Reset => {
        inputs.reset = true;
        (DataflowPhase::Accumulate(0), false)
      },

      DataflowPhase::Accumulate(cycle) => {
        for i in 0..m {
          inputs.in_left[i] = match cycle.checked_sub(i) {
            Some(k) if k < depth && i < rows => a.get(i, k),
            _ => 0.0,
          };
        }
        for j in 0..n {
          inputs.in_top[j] = match cycle.checked_sub(j) {
            Some(k) if k < depth && j < cols => w.get(k, j),
            _ => 0.0,
          };
        }
        if cycle + 1 < depth + m + n {
          (DataflowPhase::Accumulate(cycle + 1), false)
        } else if self.os.drain {
          (DataflowPhase::Settle, false)
        } else {
          (DataflowPhase::Idle, true)
        }
      },

      DataflowPhase::Settle => {
        inputs.preload.valid = true;
        (DataflowPhase::Drain(0), false)
      },

      DataflowPhase::Drain(t) => {
        inputs.preload.valid = true;
        let row = m - 1 - t;
        if row < rows {
          for j in 0..cols {
            c.set(row, j, grid.out_bottom(j));
          }
        }
        if t + 1 == m {
          (DataflowPhase::Idle, true)
        } else {
          (DataflowPhase::Drain(t + 1), false)
        }
      },
    };

    log::trace!("dataflow {} -> {}", self.phase, next);
    self.phase = next;
    finished
  }
}
