/// Several accelerators sharing one memory bus
use super::accelerator::{Accelerator, RunReport};
use super::systolic::MatMulJob;
use crate::error::{Result, SimError};
use crate::memdomain::{RoundRobinArbiter, Storage};

/// Accelerators clocked together. Each tick the arbiter grants the bus to
/// one unit whose pending request cannot be served by its own cache; the
/// others hold their request.
pub struct Cluster<S: Storage> {
  units: Vec<Accelerator<S>>,
  arbiter: RoundRobinArbiter,
  cycle: u64,
}

impl<S: Storage> Cluster<S> {
  pub fn new(units: Vec<Accelerator<S>>) -> Self {
    let arbiter = RoundRobinArbiter::new(units.len());
    Self {
      units,
      arbiter,
      cycle: 0,
    }
  }

  pub fn units(&self) -> &[Accelerator<S>] {
    &self.units
  }

  pub fn unit_mut(&mut self, idx: usize) -> Option<&mut Accelerator<S>> {
    self.units.get_mut(idx)
  }

  pub fn arbiter(&self) -> &RoundRobinArbiter {
    &self.arbiter
  }

  pub fn cycle(&self) -> u64 {
    self.cycle
  }

  pub fn is_busy(&self) -> bool {
    self.units.iter().any(|u| u.is_busy())
  }

  pub fn start(&mut self, idx: usize, job: MatMulJob) -> Result<()> {
    let count = self.units.len();
    self
      .units
      .get_mut(idx)
      .ok_or_else(|| SimError::InvalidJob(format!("no unit {} in a cluster of {}", idx, count)))?
      .start(job)
  }

  /// Arbitrate, then clock every unit once. All units tick even when one
  /// faults; the first fault is returned.
  pub fn tick(&mut self) -> Result<()> {
    let requests: Vec<bool> = self.units.iter().map(|u| u.wants_bus()).collect();
    let grant = self.arbiter.arbitrate(&requests);

    let mut fault = None;
    for (idx, unit) in self.units.iter_mut().enumerate() {
      unit.set_bus_grant(grant == Some(idx));
      if let Err(e) = unit.tick() {
        log::error!("cluster: unit {} faulted at cycle {}: {}", idx, self.cycle, e);
        fault.get_or_insert(e);
      }
    }
    self.cycle += 1;
    match fault {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  /// Start `jobs[i]` on unit `i` and clock until all of them are done.
  ///
  /// # Returns
  /// One report per job, in job order.
  pub fn run_jobs(&mut self, jobs: &[MatMulJob], max_cycles: u64) -> Result<Vec<RunReport>> {
    if jobs.len() > self.units.len() {
      return Err(SimError::InvalidJob(format!(
        "{} jobs for a cluster of {}",
        jobs.len(),
        self.units.len()
      )));
    }
    for (idx, job) in jobs.iter().enumerate() {
      self.start(idx, *job)?;
    }

    let start = self.cycle;
    let mut reports: Vec<Option<RunReport>> = vec![None; jobs.len()];
    while reports.iter().any(Option::is_none) {
      if self.cycle - start >= max_cycles {
        self.units.iter_mut().for_each(|u| u.abort());
        log::error!("cluster: gave up after {} cycles", max_cycles);
        return Err(SimError::Timeout(max_cycles));
      }
      self.tick()?;
      for (slot, unit) in reports.iter_mut().zip(&self.units) {
        if unit.done() {
          *slot = unit.last_report().cloned();
        }
      }
    }
    log::info!(
      "cluster: {} jobs done at cycle {}, bus grants {:?}",
      jobs.len(),
      self.cycle,
      self.arbiter.grants()
    );
    Ok(reports.into_iter().flatten().collect())
  }

  /// Hand the units back with their bus grant raised.
  pub fn into_units(self) -> Vec<Accelerator<S>> {
    let mut units = self.units;
    units.iter_mut().for_each(|u| u.set_bus_grant(true));
    units
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::systolic::{ArrayShape, Dataflow, TilingStrategy};
  use crate::memdomain::{Cache, CacheConfig, MainMemory, SharedMemory};
  use crate::reference;

  fn seq(n: usize, offset: usize) -> Vec<f32> {
    (0..n).map(|v| ((v + offset) % 9) as f32 - 4.0).collect()
  }

  #[test]
  fn test_units_share_memory_fairly() {
    let memory = SharedMemory::new(MainMemory::new(1 << 14));
    let jobs = [
      MatMulJob::new(5, 4, 6).with_bases(0, 0x400, 0x800),
      MatMulJob::new(4, 6, 3)
        .with_bases(0x1000, 0x1400, 0x1800)
        .with_mode(Dataflow::OutputStationary)
        .with_strategy(TilingStrategy::DataReuse),
    ];
    let mut operands = Vec::new();
    for (n, job) in jobs.iter().enumerate() {
      let (a, w) = (seq(job.k1 * job.k2, n), seq(job.k2 * job.k3, n + 3));
      let mut mem = memory.borrow_mut();
      mem.load_matrix(job.a_base, job.k1, job.k2, &a).unwrap();
      mem.load_matrix(job.w_base, job.k2, job.k3, &w).unwrap();
      operands.push((a, w));
    }

    // same work alone, for the cycle count
    let mut solo_mem = MainMemory::new(1 << 14);
    solo_mem.load_matrix(jobs[0].a_base, 5, 4, &operands[0].0).unwrap();
    solo_mem.load_matrix(jobs[0].w_base, 4, 6, &operands[0].1).unwrap();
    let solo = Accelerator::new("solo", ArrayShape::new(2, 3), solo_mem)
      .run_job(jobs[0], 100_000)
      .unwrap();

    let units = vec![
      Accelerator::new("u0", ArrayShape::new(2, 3), memory.clone()),
      Accelerator::new("u1", ArrayShape::new(3, 3), memory.clone()),
    ];
    let mut cluster = Cluster::new(units);
    let reports = cluster.run_jobs(&jobs, 100_000).unwrap();

    for (job, (a, w)) in jobs.iter().zip(&operands) {
      let c = memory.borrow().read_matrix(job.c_base, job.k1, job.k3).unwrap();
      assert_eq!(c, reference::matmul(a, w, job.k1, job.k2, job.k3));
    }
    // both units contended for the bus and both waited at some point
    assert!(cluster.arbiter().contended_cycles() > 0);
    assert!(reports.iter().all(|r| r.stall_cycles > 0));
    assert!(reports[0].cycles > solo.cycles);
    assert_eq!(reports[0].cycles, solo.cycles + reports[0].stall_cycles);

    let grants: u64 = cluster.arbiter().grants().iter().sum();
    let traffic: u64 = reports.iter().map(|r| r.memory_reads + r.memory_writes).sum();
    assert_eq!(grants, traffic);
  }

  #[test]
  fn test_cache_hits_bypass_arbitration() {
    let memory = SharedMemory::new(MainMemory::new(1 << 14));
    let job = MatMulJob::new(6, 4, 6);
    let (a, w) = (seq(24, 1), seq(24, 2));
    memory.borrow_mut().load_matrix(job.a_base, 6, 4, &a).unwrap();
    memory.borrow_mut().load_matrix(job.w_base, 4, 6, &w).unwrap();
    let config = CacheConfig {
      enabled: true,
      sets: 16,
      ways: 4,
    };

    let units = (0..2)
      .map(|n| Accelerator::new(format!("u{}", n), ArrayShape::new(2, 2), Cache::new(memory.clone(), config)))
      .collect();
    let mut cluster = Cluster::new(units);
    // the second unit writes its copy of C further up
    let jobs = [job, job.with_bases(job.a_base, job.w_base, 0x1000)];
    let reports = cluster.run_jobs(&jobs, 100_000).unwrap();

    let expected = reference::matmul(&a, &w, 6, 4, 6);
    for job in &jobs {
      assert_eq!(memory.borrow().read_matrix(job.c_base, 6, 6).unwrap(), expected);
    }
    for report in &reports {
      // A and W tiles are fetched 3 times each in the i -> j -> k order
      let cache = report.cache.unwrap();
      assert!(cache.hits > 0);
      assert_eq!(cache.hits + cache.misses, report.memory_reads + report.memory_writes);
      assert_eq!(cache.writebacks, 36);
    }
    // only misses reached the bus
    let grants: u64 = cluster.arbiter().grants().iter().sum();
    let misses: u64 = reports.iter().map(|r| r.cache.unwrap().misses).sum();
    assert_eq!(grants, misses);
  }

  #[test]
  fn test_job_count_checked() {
    let units = vec![Accelerator::new("u0", ArrayShape::new(2, 2), MainMemory::new(256))];
    let mut cluster = Cluster::new(units);
    let jobs = [MatMulJob::new(2, 2, 2), MatMulJob::new(2, 2, 2)];
    assert!(matches!(cluster.run_jobs(&jobs, 100), Err(SimError::InvalidJob(_))));
    assert!(cluster.start(3, MatMulJob::new(2, 2, 2)).is_err());
    assert!(!cluster.is_busy());

    let units = cluster.into_units();
    assert!(!units[0].wants_bus());
  }
}
