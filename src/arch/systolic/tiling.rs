// Tiling controller: walks a job tile by tile, moving tiles between
// memory and the staging buffers and handing tile-pairs to the dataflow
// controller

use super::dataflow::{DataflowController, DataflowPhase, OsControl, PassShape};
use super::grid::{GridInputs, SystolicGrid};
use super::pe::Dataflow;
use super::schedule::{ArrayShape, MatMulJob, TilingSchedule, TilingStrategy};
use super::tile_buffer::TileBuffer;
use crate::memdomain::{MemPort, ReadReq, Storage, WriteReq, WORD_BYTES};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operand {
  A,
  W,
}

/// Where a compute pass leaves its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Target {
  /// Straight into a C tile slot
  Tile(usize),
  /// Into the scratch tile, to be folded into a C slot afterwards
  Scratch,
}

/// One tile-level operation of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TileStep {
  /// Fetch tile (`row_tile`, `col_tile`) of A or W into a slot
  Load {
    operand: Operand,
    slot: usize,
    row_tile: usize,
    col_tile: usize,
  },
  /// Zero a C slot and size it for output tile (`i_tile`, `j_tile`)
  ClearC { slot: usize, i_tile: usize, j_tile: usize },
  /// Stream one A/W tile-pair through the grid
  Compute {
    a_slot: usize,
    w_slot: usize,
    target: Target,
    i_tile: usize,
    j_tile: usize,
    k_tile: usize,
    /// OS only: clear the accumulators first
    reset: bool,
    /// OS only: shift the accumulators out at the end
    drain: bool,
  },
  /// C slot += scratch
  Fold { slot: usize },
  /// Commit a finished C slot to memory
  Store { slot: usize, i_tile: usize, j_tile: usize },
}

impl fmt::Display for TileStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TileStep::Load {
        operand,
        slot,
        row_tile,
        col_tile,
      } => write!(f, "load {:?}[{},{}] -> slot {}", operand, row_tile, col_tile, slot),
      TileStep::ClearC { slot, i_tile, j_tile } => write!(f, "clear C[{},{}] in slot {}", i_tile, j_tile, slot),
      TileStep::Compute {
        i_tile, j_tile, k_tile, ..
      } => write!(f, "compute C[{},{}] k={}", i_tile, j_tile, k_tile),
      TileStep::Fold { slot } => write!(f, "fold scratch -> slot {}", slot),
      TileStep::Store { slot, i_tile, j_tile } => write!(f, "store slot {} -> C[{},{}]", slot, i_tile, j_tile),
    }
  }
}

/// Ordered tile steps for one job plus the number of buffer slots they use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TilePlan {
  steps: Vec<TileStep>,
  a_slots: usize,
  w_slots: usize,
  c_slots: usize,
}

impl TilePlan {
  pub fn build(schedule: &TilingSchedule, strategy: TilingStrategy, mode: Dataflow) -> Self {
    match strategy {
      TilingStrategy::Standard => Self::standard(schedule),
      TilingStrategy::DataReuse => Self::data_reuse(schedule, mode),
    }
  }

  /// i → j → k with a single slot of each kind. The OS accumulators carry
  /// across the k loop and are drained once per output tile.
  fn standard(s: &TilingSchedule) -> Self {
    let mut steps = Vec::new();
    let last_k = s.num_k_tiles - 1;
    for i in 0..s.num_i_tiles {
      for j in 0..s.num_j_tiles {
        steps.push(TileStep::ClearC { slot: 0, i_tile: i, j_tile: j });
        for k in 0..s.num_k_tiles {
          steps.push(TileStep::Load {
            operand: Operand::A,
            slot: 0,
            row_tile: i,
            col_tile: k,
          });
          steps.push(TileStep::Load {
            operand: Operand::W,
            slot: 0,
            row_tile: k,
            col_tile: j,
          });
          steps.push(TileStep::Compute {
            a_slot: 0,
            w_slot: 0,
            target: Target::Tile(0),
            i_tile: i,
            j_tile: j,
            k_tile: k,
            reset: k == 0,
            drain: k == last_k,
          });
        }
        steps.push(TileStep::Store { slot: 0, i_tile: i, j_tile: j });
      }
    }
    Self {
      steps,
      a_slots: 1,
      w_slots: 1,
      c_slots: 1,
    }
  }

  /// k → i → j. Every C tile stays resident for the whole job; the A
  /// column and W row of each k-slice are fetched once and shared.
  fn data_reuse(s: &TilingSchedule, mode: Dataflow) -> Self {
    let (ni, nj) = (s.num_i_tiles, s.num_j_tiles);
    let mut steps = Vec::new();

    for i in 0..ni {
      for j in 0..nj {
        steps.push(TileStep::ClearC {
          slot: i * nj + j,
          i_tile: i,
          j_tile: j,
        });
      }
    }

    for k in 0..s.num_k_tiles {
      for i in 0..ni {
        steps.push(TileStep::Load {
          operand: Operand::A,
          slot: i,
          row_tile: i,
          col_tile: k,
        });
      }
      for j in 0..nj {
        steps.push(TileStep::Load {
          operand: Operand::W,
          slot: j,
          row_tile: k,
          col_tile: j,
        });
      }
      for i in 0..ni {
        for j in 0..nj {
          let slot = i * nj + j;
          match mode {
            Dataflow::WeightStationary => steps.push(TileStep::Compute {
              a_slot: i,
              w_slot: j,
              target: Target::Tile(slot),
              i_tile: i,
              j_tile: j,
              k_tile: k,
              reset: false,
              drain: false,
            }),
            Dataflow::OutputStationary => {
              steps.push(TileStep::Compute {
                a_slot: i,
                w_slot: j,
                target: Target::Scratch,
                i_tile: i,
                j_tile: j,
                k_tile: k,
                reset: true,
                drain: true,
              });
              steps.push(TileStep::Fold { slot });
            },
          }
        }
      }
    }

    for i in 0..ni {
      for j in 0..nj {
        steps.push(TileStep::Store {
          slot: i * nj + j,
          i_tile: i,
          j_tile: j,
        });
      }
    }

    Self {
      steps,
      a_slots: ni,
      w_slots: nj,
      c_slots: ni * nj,
    }
  }

  pub fn steps(&self) -> &[TileStep] {
    &self.steps
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Number of A and W tile loads in the plan.
  pub fn tile_fetches(&self) -> u64 {
    self.steps.iter().filter(|s| matches!(s, TileStep::Load { .. })).count() as u64
  }
}

/// Counters collected while a job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TilingStats {
  pub tile_fetches: u64,
  pub elements_read: u64,
  pub elements_written: u64,
  pub passes: u64,
  /// Ticks spent inside compute passes
  pub compute_cycles: u64,
  /// Ticks spent moving tiles in or out
  pub memory_cycles: u64,
}

/// Where in memory a tile lives and how much of it is real data.
struct TileWindow {
  base: u32,
  stride: usize,
  row0: usize,
  col0: usize,
  rows: usize,
  cols: usize,
}

impl TileWindow {
  fn addr(&self, idx: usize) -> u32 {
    let (r, c) = (idx / self.cols, idx % self.cols);
    let word = (self.row0 + r) * self.stride + self.col0 + c;
    self.base + word as u32 * WORD_BYTES
  }

  fn len(&self) -> usize {
    self.rows * self.cols
  }
}

pub struct TilingController {
  shape: ArrayShape,
  job: Option<MatMulJob>,
  schedule: Option<TilingSchedule>,
  plan: TilePlan,
  pc: usize,
  entered: bool,
  // element cursor for loads and stores
  cursor: usize,
  // read issued last tick, answered this tick
  in_flight: Option<usize>,
  a_tiles: Vec<TileBuffer>,
  w_tiles: Vec<TileBuffer>,
  c_tiles: Vec<TileBuffer>,
  scratch: TileBuffer,
  dataflow: DataflowController,
  stats: TilingStats,
}

impl TilingController {
  pub fn new(shape: ArrayShape) -> Self {
    Self {
      shape,
      job: None,
      schedule: None,
      plan: TilePlan::default(),
      pc: 0,
      entered: false,
      cursor: 0,
      in_flight: None,
      a_tiles: Vec::new(),
      w_tiles: Vec::new(),
      c_tiles: Vec::new(),
      scratch: TileBuffer::new(shape.tile_dim()),
      dataflow: DataflowController::new(shape.rows, shape.cols),
      stats: TilingStats::default(),
    }
  }

  /// Load a validated job and build its plan.
  pub fn start(&mut self, job: MatMulJob) {
    let schedule = TilingSchedule::new(self.shape, &job);
    let plan = TilePlan::build(&schedule, job.strategy, job.mode);
    let dim = self.shape.tile_dim();

    log::info!(
      "tiling {}x{}x{} as {}x{}x{} tiles ({} order, {} steps)",
      job.k1,
      job.k2,
      job.k3,
      schedule.num_i_tiles,
      schedule.num_j_tiles,
      schedule.num_k_tiles,
      job.strategy,
      plan.len()
    );

    self.a_tiles = vec![TileBuffer::new(dim); plan.a_slots];
    self.w_tiles = vec![TileBuffer::new(dim); plan.w_slots];
    self.c_tiles = vec![TileBuffer::new(dim); plan.c_slots];
    self.scratch = TileBuffer::new(dim);
    self.dataflow = DataflowController::new(self.shape.rows, self.shape.cols);
    self.job = Some(job);
    self.schedule = Some(schedule);
    self.plan = plan;
    self.pc = 0;
    self.entered = false;
    self.cursor = 0;
    self.in_flight = None;
    self.stats = TilingStats::default();
  }

  /// Drop the current job.
  pub fn abort(&mut self) {
    if self.is_busy() {
      log::warn!("aborting job at step {}/{}", self.pc, self.plan.len());
    }
    self.job = None;
    self.schedule = None;
    self.plan = TilePlan::default();
    self.pc = 0;
    self.entered = false;
    self.in_flight = None;
    self.dataflow = DataflowController::new(self.shape.rows, self.shape.cols);
  }

  pub fn is_busy(&self) -> bool {
    self.pc < self.plan.len()
  }

  pub fn stats(&self) -> TilingStats {
    self.stats
  }

  pub fn schedule(&self) -> Option<&TilingSchedule> {
    self.schedule.as_ref()
  }

  pub fn plan(&self) -> &TilePlan {
    &self.plan
  }

  pub fn current_step(&self) -> Option<TileStep> {
    self.plan.steps().get(self.pc).copied()
  }

  pub fn dataflow_phase(&self) -> DataflowPhase {
    self.dataflow.phase()
  }

  /// One-line status for the shell and the trace.
  pub fn describe(&self) -> String {
    match self.current_step() {
      None => "idle".to_string(),
      Some(step @ TileStep::Compute { .. }) => {
        format!("[{}/{}] {} ({})", self.pc + 1, self.plan.len(), step, self.dataflow.phase())
      },
      Some(step) => format!("[{}/{}] {}", self.pc + 1, self.plan.len(), step),
    }
  }

  /// Advance one tick.
  ///
  /// # Returns
  /// True on the tick the last step of the plan completes.
  pub fn tick<S: Storage>(&mut self, grid: &SystolicGrid, inputs: &mut GridInputs, port: &mut MemPort<S>) -> bool {
    let (Some(step), Some(job), Some(sched)) = (self.current_step(), self.job, self.schedule) else {
      return false;
    };
    let entering = !self.entered;
    self.entered = true;

    let finished = match step {
      TileStep::Load {
        operand,
        slot,
        row_tile,
        col_tile,
      } => {
        let (window, buf) = match operand {
          Operand::A => (
            TileWindow {
              base: job.a_base,
              stride: job.k2,
              row0: row_tile * sched.tile_height,
              col0: col_tile * sched.tile_depth,
              rows: sched.rows_in(row_tile),
              cols: sched.depth_in(col_tile),
            },
            &mut self.a_tiles[slot],
          ),
          Operand::W => (
            TileWindow {
              base: job.w_base,
              stride: job.k3,
              row0: row_tile * sched.tile_depth,
              col0: col_tile * sched.tile_width,
              rows: sched.depth_in(row_tile),
              cols: sched.cols_in(col_tile),
            },
            &mut self.w_tiles[slot],
          ),
        };
        if entering {
          buf.prepare(window.rows, window.cols);
          self.cursor = 0;
          self.in_flight = None;
          self.stats.tile_fetches += 1;
        }
        self.stats.memory_cycles += 1;

        let mut waiting = false;
        if let Some(idx) = self.in_flight {
          match port.read_resp.get() {
            Some(resp) => {
              debug_assert_eq!(resp.addr, window.addr(idx));
              buf.set(idx / window.cols, idx % window.cols, resp.data);
              self.stats.elements_read += 1;
              self.in_flight = None;
            },
            // the port is waiting for the bus
            None => waiting = true,
          }
        }
        if waiting {
          false
        } else if self.cursor < window.len() {
          port.read_req.set(ReadReq {
            addr: window.addr(self.cursor),
          });
          self.in_flight = Some(self.cursor);
          self.cursor += 1;
          false
        } else {
          true
        }
      },

      TileStep::ClearC { slot, i_tile, j_tile } => {
        self.c_tiles[slot].prepare(sched.rows_in(i_tile), sched.cols_in(j_tile));
        true
      },

      TileStep::Compute {
        a_slot,
        w_slot,
        target,
        i_tile,
        j_tile,
        k_tile,
        reset,
        drain,
      } => {
        let pass = PassShape {
          rows: sched.rows_in(i_tile),
          depth: sched.depth_in(k_tile),
          cols: sched.cols_in(j_tile),
        };
        if entering {
          if target == Target::Scratch {
            self.scratch.prepare(pass.rows, pass.cols);
          }
          self.dataflow.begin(job.mode, pass, OsControl { reset, drain });
          self.stats.passes += 1;
        }
        self.stats.compute_cycles += 1;

        let out = match target {
          Target::Tile(slot) => &mut self.c_tiles[slot],
          Target::Scratch => &mut self.scratch,
        };
        self
          .dataflow
          .tick(grid, inputs, &self.a_tiles[a_slot], &self.w_tiles[w_slot], out)
      },

      TileStep::Fold { slot } => {
        self.c_tiles[slot].accumulate(&self.scratch);
        true
      },

      TileStep::Store { slot, i_tile, j_tile } => {
        let window = TileWindow {
          base: job.c_base,
          stride: job.k3,
          row0: i_tile * sched.tile_height,
          col0: j_tile * sched.tile_width,
          rows: sched.rows_in(i_tile),
          cols: sched.cols_in(j_tile),
        };
        if entering {
          self.cursor = 0;
        }
        self.stats.memory_cycles += 1;

        let tile = &self.c_tiles[slot];
        if port.write_req.valid {
          // previous write still waiting for the bus
          false
        } else if self.cursor < window.len() {
          let idx = self.cursor;
          port.write_req.set(WriteReq {
            addr: window.addr(idx),
            data: tile.get(idx / window.cols, idx % window.cols),
          });
          self.cursor += 1;
          self.stats.elements_written += 1;
          false
        } else {
          // the last write commits when the port runs
          port.is_idle()
        }
      },
    };

    if !finished {
      return false;
    }
    log::debug!("step {}/{} done: {}", self.pc + 1, self.plan.len(), step);
    self.pc += 1;
    self.entered = false;
    if self.is_busy() {
      return false;
    }
    log::info!(
      "job finished: {} passes, {} tile fetches, {} reads, {} writes",
      self.stats.passes,
      self.stats.tile_fetches,
      self.stats.elements_read,
      self.stats.elements_written
    );
    true
  }
}
