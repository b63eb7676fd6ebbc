/// Accelerator top level: grid, tiling controller and memory port on one clock
use super::systolic::{
  ArrayShape, DataflowPhase, GridInputs, MatMulJob, ProcessingElement, SystolicGrid, TilingController, TilingSchedule,
  TilingStrategy,
};
use crate::builtin::Module;
use crate::error::{Result, SimError};
use crate::memdomain::{CacheStats, MainMemory, MemPort, Storage};
use serde::Serialize;
use std::fmt;

/// Figures for one completed job.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub shape: ArrayShape,
  pub job: MatMulJob,
  pub cycles: u64,
  pub passes: u64,
  pub compute_cycles: u64,
  pub memory_cycles: u64,
  pub tile_fetches: u64,
  /// Fetches the i → j → k order would have needed
  pub baseline_tile_fetches: u64,
  pub memory_reads: u64,
  pub memory_writes: u64,
  /// Ticks a memory request waited for the shared bus
  pub stall_cycles: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache: Option<CacheStats>,
}

impl RunReport {
  /// Tile fetches saved against the standard order, in percent.
  pub fn fetch_reduction(&self) -> f64 {
    if self.baseline_tile_fetches == 0 {
      return 0.0;
    }
    100.0 * (1.0 - self.tile_fetches as f64 / self.baseline_tile_fetches as f64)
  }
}

impl fmt::Display for RunReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "C[{}x{}] = A[{}x{}] * W[{}x{}] on a {} grid ({}, {} order)",
      self.job.k1,
      self.job.k3,
      self.job.k1,
      self.job.k2,
      self.job.k2,
      self.job.k3,
      self.shape,
      self.job.mode,
      self.job.strategy
    )?;
    writeln!(
      f,
      "  cycles:       {} ({} compute, {} memory)",
      self.cycles, self.compute_cycles, self.memory_cycles
    )?;
    writeln!(f, "  passes:       {}", self.passes)?;
    writeln!(f, "  memory:       {} reads, {} writes", self.memory_reads, self.memory_writes)?;
    if self.stall_cycles > 0 {
      writeln!(f, "  bus stalls:   {}", self.stall_cycles)?;
    }
    if let Some(cache) = &self.cache {
      writeln!(
        f,
        "  cache:        {} hits, {} misses ({:.1}% hit rate), {} write-backs",
        cache.hits,
        cache.misses,
        cache.hit_rate(),
        cache.writebacks
      )?;
    }
    write!(
      f,
      "  tile fetches: {} (baseline {}, {:.1}% fewer)",
      self.tile_fetches,
      self.baseline_tile_fetches,
      self.fetch_reduction()
    )
  }
}

/// State exposed to passive observers after each tick.
#[derive(Debug, Serialize)]
pub struct TickSnapshot<'a> {
  pub cycle: u64,
  pub busy: bool,
  pub done: bool,
  pub step: String,
  pub phase: DataflowPhase,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pes: Option<&'a [ProcessingElement]>,
}

/// Matmul accelerator. Accepts one job at a time through `start`, raises
/// `done` for a single tick when the result is in memory.
pub struct Accelerator<S: Storage = MainMemory> {
  name: String,
  shape: ArrayShape,

  grid: SystolicGrid,
  inputs: GridInputs,
  tiling: TilingController,
  port: MemPort<S>,

  job: Option<MatMulJob>,
  cycle: u64,
  job_start: u64,
  cache_start: Option<CacheStats>,
  done: bool,
  fault: Option<SimError>,
  last_report: Option<RunReport>,
}

impl<S: Storage> Accelerator<S> {
  pub fn new(name: impl Into<String>, shape: ArrayShape, storage: S) -> Self {
    Self {
      name: name.into(),
      shape,
      grid: SystolicGrid::new(shape.rows, shape.cols, Default::default()),
      inputs: GridInputs::new(shape.rows, shape.cols),
      tiling: TilingController::new(shape),
      port: MemPort::new("mem_port", storage),
      job: None,
      cycle: 0,
      job_start: 0,
      cache_start: None,
      done: false,
      fault: None,
      last_report: None,
    }
  }

  pub fn shape(&self) -> ArrayShape {
    self.shape
  }

  pub fn grid(&self) -> &SystolicGrid {
    &self.grid
  }

  pub fn tiling(&self) -> &TilingController {
    &self.tiling
  }

  pub fn storage(&self) -> &S {
    self.port.storage()
  }

  pub fn storage_mut(&mut self) -> &mut S {
    self.port.storage_mut()
  }

  pub fn into_storage(self) -> S {
    self.port.into_storage()
  }

  pub fn cycle(&self) -> u64 {
    self.cycle
  }

  pub fn is_busy(&self) -> bool {
    self.tiling.is_busy()
  }

  /// High for exactly one tick after a job completes.
  pub fn done(&self) -> bool {
    self.done
  }

  pub fn last_report(&self) -> Option<&RunReport> {
    self.last_report.as_ref()
  }

  /// A pending memory request needs the shared bus this tick.
  pub fn wants_bus(&self) -> bool {
    self.port.bus_request()
  }

  pub fn set_bus_grant(&mut self, grant: bool) {
    self.port.set_grant(grant);
  }

  /// Drop the running job, if any.
  pub fn abort(&mut self) {
    self.tiling.abort();
    self.job = None;
  }

  /// Accept a job. Fails when a job is still running or the job does not
  /// fit the attached memory; nothing is streamed in either case.
  pub fn start(&mut self, job: MatMulJob) -> Result<()> {
    if self.is_busy() {
      return Err(SimError::Busy);
    }
    job.validate(self.port.storage().capacity_bytes())?;
    // operands may have been written behind a cache
    self.port.storage_mut().flush()?;

    log::info!(
      "{}: start {}x{}x{} {} job at cycle {}",
      self.name,
      job.k1,
      job.k2,
      job.k3,
      job.mode,
      self.cycle
    );
    self.grid.set_mode(job.mode);
    self.grid.reset();
    self.inputs.clear();
    self.port.reset();
    self.tiling.start(job);
    self.job = Some(job);
    self.job_start = self.cycle;
    self.cache_start = self.port.storage().cache_stats();
    self.done = false;
    self.fault = None;
    Ok(())
  }

  /// Advance one clock tick. A memory fault aborts the running job and is
  /// returned here.
  pub fn tick(&mut self) -> Result<()> {
    self.run();
    match self.fault.take() {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  /// Start `job` and clock until it completes.
  pub fn run_job(&mut self, job: MatMulJob, max_cycles: u64) -> Result<RunReport> {
    self.start(job)?;
    while !self.done {
      if self.cycle - self.job_start >= max_cycles {
        self.abort();
        log::error!("{}: gave up after {} cycles", self.name, max_cycles);
        return Err(SimError::Timeout(max_cycles));
      }
      self.tick()?;
    }
    self
      .last_report
      .clone()
      .ok_or_else(|| SimError::InvalidJob("job finished without a report".to_string()))
  }

  /// Observer view of the current state. PE registers are included on
  /// request since they dominate the size.
  pub fn snapshot(&self, include_pes: bool) -> TickSnapshot<'_> {
    TickSnapshot {
      cycle: self.cycle,
      busy: self.is_busy(),
      done: self.done,
      step: self.tiling.describe(),
      phase: self.tiling.dataflow_phase(),
      pes: include_pes.then(|| self.grid.pes()),
    }
  }

  fn build_report(&self, job: MatMulJob) -> RunReport {
    let stats = self.tiling.stats();
    let schedule = TilingSchedule::new(self.shape, &job);
    let storage = self.port.storage();
    let cache = match (storage.cache_stats(), &self.cache_start) {
      (Some(now), Some(start)) => Some(now.since(start)),
      (now, _) => now,
    };
    RunReport {
      shape: self.shape,
      job,
      cycles: self.cycle - self.job_start,
      passes: stats.passes,
      compute_cycles: stats.compute_cycles,
      memory_cycles: stats.memory_cycles,
      tile_fetches: stats.tile_fetches,
      baseline_tile_fetches: schedule.tile_fetches(TilingStrategy::Standard),
      memory_reads: stats.elements_read,
      memory_writes: stats.elements_written,
      stall_cycles: self.port.stall_cycles(),
      cache,
    }
  }
}

impl<S: Storage> Module for Accelerator<S> {
  fn run(&mut self) {
    self.done = false;

    // memory first: it answers what the controller asked for last tick
    self.port.run();
    if let Some(e) = self.port.take_fault() {
      log::error!("{}: memory fault at cycle {}: {}", self.name, self.cycle, e);
      self.abort();
      self.fault = Some(e);
      self.cycle += 1;
      return;
    }

    self.inputs.clear();
    let finished = self.tiling.tick(&self.grid, &mut self.inputs, &mut self.port);
    self.grid.step(&self.inputs);
    self.cycle += 1;

    log::trace!("{}: cycle {} {}", self.name, self.cycle, self.tiling.describe());

    if finished {
      // C must be in the backing store before done is raised
      if let Err(e) = self.port.storage_mut().flush() {
        log::error!("{}: write-back failed at cycle {}: {}", self.name, self.cycle, e);
        self.job = None;
        self.fault = Some(e);
        return;
      }
      if let Some(job) = self.job.take() {
        let report = self.build_report(job);
        log::info!("{}: done after {} cycles", self.name, report.cycles);
        self.last_report = Some(report);
      }
      self.done = true;
    }
  }

  fn reset(&mut self) {
    self.tiling.abort();
    self.grid.reset();
    self.inputs.clear();
    self.port.reset();
    self.job = None;
    self.cycle = 0;
    self.job_start = 0;
    self.cache_start = None;
    self.done = false;
    self.fault = None;
  }

  fn name(&self) -> &str {
    &self.name
  }
}
