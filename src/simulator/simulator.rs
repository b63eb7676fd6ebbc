use super::config::AppConfig;
use super::sim::job::Workload;
use super::sim::mode::StepMode;
use super::sim::shell::{Command, Shell};
use super::sim::trace::TraceWriter;
use super::utils::log::set_log;
use super::utils::report;
use crate::arch::{Accelerator, RunReport};
use crate::error::{Result, SimError};
use crate::log_info;
use crate::memdomain::{Cache, MainMemory, Storage};
use std::path::Path;

/// Runs one workload on a configured accelerator, continuously or under
/// the interactive step shell.
pub struct Simulator {
  config: AppConfig,
  step_mode: StepMode,
  accel: Accelerator<Cache<MainMemory>>,
  workload: Workload,
  trace: Option<TraceWriter>,
}

impl Simulator {
  /// Fresh memory with the workload's operands written in.
  pub fn new(config: AppConfig, workload: Workload) -> Result<Self> {
    let mut memory = MainMemory::new(config.memory.size_bytes);
    workload.load_into(&mut memory)?;
    Self::with_memory(config, workload, memory)
  }

  /// Start from a text memory image sized to `memory.size_bytes`, then
  /// write the workload's operands over it.
  pub fn from_image(config: AppConfig, workload: Workload, path: &Path) -> Result<Self> {
    let mut memory = MainMemory::load_image(path, config.memory.size_bytes)?;
    workload.load_into(&mut memory)?;
    Self::with_memory(config, workload, memory)
  }

  /// Run against memory that already holds the operands, e.g. a loaded image.
  pub fn with_memory(config: AppConfig, workload: Workload, memory: MainMemory) -> Result<Self> {
    if memory.capacity_bytes() != config.memory.size_bytes {
      log::warn!(
        "memory holds {} bytes but memory.size_bytes is {}",
        memory.capacity_bytes(),
        config.memory.size_bytes
      );
    }
    let trace = match config.trace_path() {
      Some(path) => Some(TraceWriter::create(path, config.simulation.trace_pes)?),
      None => None,
    };
    let storage = Cache::new(memory, config.cache);
    Ok(Self {
      step_mode: config.simulation.step_mode.into(),
      accel: Accelerator::new("sasim", config.shape(), storage),
      config,
      workload,
      trace,
    })
  }

  pub fn accelerator(&self) -> &Accelerator<Cache<MainMemory>> {
    &self.accel
  }

  /// Backing store. Complete once a job has finished; mid-job, dirty cache
  /// lines are not reflected.
  pub fn memory(&self) -> &MainMemory {
    self.accel.storage().backing()
  }

  pub fn workload(&self) -> &Workload {
    &self.workload
  }

  /// Run the workload to completion.
  ///
  /// # Returns
  /// `None` when the user quit the step shell before the job finished.
  pub fn run(&mut self) -> Result<Option<RunReport>> {
    set_log(!self.config.simulation.quiet);

    let job = self.workload.job;
    self.accel.start(job)?;
    if let Some(trace) = &mut self.trace {
      trace.job_started(&self.accel)?;
    }
    log_info!(
      "C[{}x{}] = A[{}x{}] * W[{}x{}] on a {} grid, {} mode, {} order",
      job.k1,
      job.k3,
      job.k1,
      job.k2,
      job.k2,
      job.k3,
      self.accel.shape(),
      job.mode,
      job.strategy
    );

    let finished = match self.step_mode {
      StepMode::Continuous => self.run_continuous()?,
      StepMode::Step => self.run_step_mode()?,
    };
    if !finished {
      return Ok(None);
    }

    let report = self
      .accel
      .last_report()
      .cloned()
      .ok_or_else(|| SimError::InvalidJob("job finished without a report".to_string()))?;
    if let Some(trace) = &mut self.trace {
      trace.job_finished(&report)?;
    }
    log_info!("finished in {} cycles", report.cycles);
    Ok(Some(report))
  }

  /// Output matrix as it currently sits in memory.
  pub fn result(&self) -> Result<Vec<f32>> {
    let job = &self.workload.job;
    self.memory().read_matrix(job.c_base, job.k1, job.k3)
  }

  /// Check the result against the reference model.
  ///
  /// # Returns
  /// Number of mismatching elements.
  pub fn verify(&self, tolerance: f32) -> Result<usize> {
    let actual = self.result()?;
    let expected = self.workload.expected();
    Ok(report::verify_result(&expected, &actual, self.workload.job.k3, tolerance))
  }

  fn run_continuous(&mut self) -> Result<bool> {
    while !self.accel.done() {
      self.step()?;
    }
    Ok(true)
  }

  fn run_step_mode(&mut self) -> Result<bool> {
    println!("Step mode - Enter steps one tick, 'si N' steps N, 'p' prints the grid, 'c' continues, 'q' quits");
    let mut shell = Shell::new()?;
    loop {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            self.step()?;
            if self.accel.done() {
              break;
            }
          }
          println!("cycle {}: {}", self.accel.cycle(), self.accel.tiling().describe());
          if self.accel.done() {
            return Ok(true);
          }
        },
        Command::Print => self.print_grid(),
        Command::Continue => return self.run_continuous(),
        Command::Quit => {
          log_info!("quit at cycle {}", self.accel.cycle());
          return Ok(false);
        },
      }
    }
  }

  fn step(&mut self) -> Result<()> {
    let max_cycles = self.config.simulation.max_cycles;
    if self.accel.cycle() >= max_cycles {
      return Err(SimError::Timeout(max_cycles));
    }
    self.accel.tick()?;
    if let Some(trace) = &mut self.trace {
      trace.tick(&self.accel)?;
    }
    Ok(())
  }

  fn print_grid(&self) {
    let grid = self.accel.grid();
    let (rows, cols) = (grid.rows(), grid.cols());
    let acc: Vec<f32> = grid.pes().iter().map(|pe| pe.accumulator()).collect();
    let bottom: Vec<f32> = (0..cols).map(|c| grid.out_bottom(c)).collect();
    println!("cycle {} [{} mode]: {}", self.accel.cycle(), grid.mode(), self.accel.tiling().describe());
    report::print_matrix("accumulators", &acc, rows, cols);
    report::print_matrix("out_bottom", &bottom, 1, cols);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::systolic::{Dataflow, TilingStrategy};

  fn config(rows: usize, cols: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.array.rows = rows;
    config.array.cols = cols;
    config.memory.size_bytes = 1 << 14;
    config.simulation.quiet = true;
    config
  }

  #[test]
  fn test_continuous_run_verifies() {
    let workload = Workload::random(9, 6, 11, 7, Dataflow::OutputStationary, TilingStrategy::DataReuse);
    let mut sim = Simulator::new(config(4, 3), workload).unwrap();
    let report = sim.run().unwrap().unwrap();
    assert!(report.cycles > 0);
    assert_eq!(sim.verify(1e-3).unwrap(), 0);
  }

  #[test]
  fn test_cached_run_verifies() {
    let workload = Workload::random(8, 8, 8, 4, Dataflow::WeightStationary, TilingStrategy::Standard);
    let mut config = config(3, 3);
    config.cache.enabled = true;
    let mut sim = Simulator::new(config, workload).unwrap();
    let report = sim.run().unwrap().unwrap();
    assert_eq!(sim.verify(1e-3).unwrap(), 0);

    let cache = report.cache.unwrap();
    assert!(cache.hits > 0);
    assert_eq!(cache.writebacks, 64);
    // repeated tile fetches hit, so memory sees fewer reads than the controller asked for
    assert!(sim.memory().reads() < report.memory_reads);
  }

  #[test]
  fn test_max_cycles_enforced() {
    let workload = Workload::random(4, 4, 4, 1, Dataflow::WeightStationary, TilingStrategy::Standard);
    let mut config = config(2, 2);
    config.simulation.max_cycles = 10;
    let mut sim = Simulator::new(config, workload).unwrap();
    assert!(matches!(sim.run(), Err(SimError::Timeout(10))));
  }

  #[test]
  fn test_trace_file_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let mut config = config(2, 2);
    config.simulation.trace_file = path.to_string_lossy().to_string();

    let workload = Workload::random(2, 2, 2, 3, Dataflow::WeightStationary, TilingStrategy::Standard);
    let mut sim = Simulator::new(config, workload).unwrap();
    let report = sim.run().unwrap().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    // start + one per tick + done
    assert_eq!(text.lines().count() as u64, report.cycles + 2);
  }
}
