// Workloads: a job plus the operand data it runs on

use crate::arch::systolic::{Dataflow, MatMulJob, TilingStrategy};
use crate::error::{Result, SimError};
use crate::memdomain::MainMemory;
use crate::reference;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// On-disk job description. Base addresses default to A, W and C packed
/// from address 0; mode and strategy default to the configured ones.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobFile {
  pub k1: usize,
  pub k2: usize,
  pub k3: usize,
  #[serde(default)]
  pub a_base: Option<u32>,
  #[serde(default)]
  pub w_base: Option<u32>,
  #[serde(default)]
  pub c_base: Option<u32>,
  #[serde(default)]
  pub mode: Option<Dataflow>,
  #[serde(default)]
  pub strategy: Option<TilingStrategy>,
  /// Row-major A, `k1` rows of `k2`
  pub a: Vec<Vec<f32>>,
  /// Row-major W, `k2` rows of `k3`
  pub w: Vec<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct Workload {
  pub job: MatMulJob,
  pub a: Vec<f32>,
  pub w: Vec<f32>,
}

fn flatten(name: &str, rows: Vec<Vec<f32>>, expect_rows: usize, expect_cols: usize) -> Result<Vec<f32>> {
  if rows.len() != expect_rows {
    return Err(SimError::InvalidJob(format!(
      "matrix {} has {} rows, expected {}",
      name,
      rows.len(),
      expect_rows
    )));
  }
  let mut flat = Vec::with_capacity(expect_rows * expect_cols);
  for (r, row) in rows.into_iter().enumerate() {
    if row.len() != expect_cols {
      return Err(SimError::InvalidJob(format!(
        "matrix {} row {} has {} columns, expected {}",
        name,
        r,
        row.len(),
        expect_cols
      )));
    }
    flat.extend(row);
  }
  Ok(flat)
}

impl Workload {
  pub fn from_job_file(file: JobFile, mode: Dataflow, strategy: TilingStrategy) -> Result<Self> {
    let mut job = MatMulJob::new(file.k1, file.k2, file.k3)
      .with_mode(file.mode.unwrap_or(mode))
      .with_strategy(file.strategy.unwrap_or(strategy));
    job.a_base = file.a_base.unwrap_or(job.a_base);
    job.w_base = file.w_base.unwrap_or(job.w_base);
    job.c_base = file.c_base.unwrap_or(job.c_base);

    let a = flatten("A", file.a, file.k1, file.k2)?;
    let w = flatten("W", file.w, file.k2, file.k3)?;
    Ok(Self { job, a, w })
  }

  pub fn from_toml(text: &str, mode: Dataflow, strategy: TilingStrategy) -> Result<Self> {
    let file: JobFile = toml::from_str(text)?;
    Self::from_job_file(file, mode, strategy)
  }

  pub fn load(path: &Path, mode: Dataflow, strategy: TilingStrategy) -> Result<Self> {
    let text = fs::read_to_string(path)
      .map_err(|e| SimError::InvalidJob(format!("cannot read job file {:?}: {}", path, e)))?;
    Self::from_toml(&text, mode, strategy)
  }

  /// Random operands, packed from address 0. Values are multiples of 0.25
  /// in [-20, 20].
  pub fn random(k1: usize, k2: usize, k3: usize, seed: u64, mode: Dataflow, strategy: TilingStrategy) -> Self {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sample = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.gen_range(-80..=80) as f32 * 0.25).collect() };
    let a = sample(k1 * k2);
    let w = sample(k2 * k3);
    Self {
      job: MatMulJob::new(k1, k2, k3).with_mode(mode).with_strategy(strategy),
      a,
      w,
    }
  }

  /// Write A and W into memory at the job's base addresses.
  pub fn load_into(&self, mem: &mut MainMemory) -> Result<()> {
    mem.load_matrix(self.job.a_base, self.job.k1, self.job.k2, &self.a)?;
    mem.load_matrix(self.job.w_base, self.job.k2, self.job.k3, &self.w)
  }

  pub fn expected(&self) -> Vec<f32> {
    reference::matmul(&self.a, &self.w, self.job.k1, self.job.k2, self.job.k3)
  }
}
