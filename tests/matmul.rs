use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sasim::arch::systolic::TilingSchedule;
use sasim::reference::{matmul, max_abs_diff};
use sasim::simulator::sim::Workload;
use sasim::simulator::utils::log::init_log;
use sasim::{
  Accelerator, ArrayShape, Cache, CacheConfig, Dataflow, MainMemory, MatMulJob, RunReport, Storage, TilingStrategy,
  WORD_BYTES,
};
use std::path::PathBuf;

const TOLERANCE: f32 = 1e-3;
const MODES: [Dataflow; 2] = [Dataflow::WeightStationary, Dataflow::OutputStationary];
const STRATEGIES: [TilingStrategy; 2] = [TilingStrategy::Standard, TilingStrategy::DataReuse];

fn job_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("jobs").join(name)
}

/// Run a workload on a fresh accelerator and hand back C, the report and
/// the memory it ran against.
fn simulate(shape: ArrayShape, workload: &Workload) -> (Vec<f32>, RunReport, MainMemory) {
  let mut mem = MainMemory::new(1 << 20);
  workload.load_into(&mut mem).unwrap();
  let mut accel = Accelerator::new("acc", shape, mem);
  let report = accel.run_job(workload.job, 10_000_000).unwrap();
  let mem = accel.into_storage();
  let job = workload.job;
  (mem.read_matrix(job.c_base, job.k1, job.k3).unwrap(), report, mem)
}

/// Operands in [-20, 20] on a 0.25 grid, so every partial sum is exact.
fn random_workload(rng: &mut StdRng, k1: usize, k2: usize, k3: usize) -> Workload {
  let mut sample = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.gen_range(-80..=80) as f32 * 0.25).collect() };
  let a = sample(k1 * k2);
  let w = sample(k2 * k3);
  Workload {
    job: MatMulJob::new(k1, k2, k3),
    a,
    w,
  }
}

#[test]
fn test_small_cache_keeps_results_exact() {
  init_log();
  let mut rng = StdRng::seed_from_u64(11);
  let shape = ArrayShape::new(3, 4);
  // 8 lines for a 9x7x10 job, so lines are evicted constantly
  let config = CacheConfig {
    enabled: true,
    sets: 4,
    ways: 2,
  };

  for mode in MODES {
    for strategy in STRATEGIES {
      let mut workload = random_workload(&mut rng, 9, 7, 10);
      workload.job = workload.job.with_mode(mode).with_strategy(strategy);
      let (plain, _, _) = simulate(shape, &workload);

      let mut mem = MainMemory::new(1 << 20);
      workload.load_into(&mut mem).unwrap();
      let mut accel = Accelerator::new("cached", shape, Cache::new(mem, config));
      let report = accel.run_job(workload.job, 10_000_000).unwrap();
      let mem = accel.into_storage().into_inner().unwrap();
      let job = workload.job;

      assert_eq!(mem.read_matrix(job.c_base, 9, 10).unwrap(), plain, "{} {}", mode, strategy);
      let cache = report.cache.unwrap();
      assert_eq!(cache.hits + cache.misses, report.memory_reads + report.memory_writes);
      // every C word is written once and reaches memory once
      assert_eq!(cache.writebacks, 90);
      assert_eq!(mem.writes(), 90);
    }
  }
}

#[test]
fn test_2x2_both_modes() {
  init_log();
  let base = Workload::load(&job_path("matmul_2x2.toml"), Dataflow::WeightStationary, TilingStrategy::Standard).unwrap();
  for mode in MODES {
    let mut workload = base.clone();
    workload.job.mode = mode;
    let (c, _, _) = simulate(ArrayShape::new(2, 2), &workload);
    assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0], "{} mode", mode);
  }
}

#[test]
fn test_16x16_on_7x7_grid() {
  init_log();
  let base = Workload::load(
    &job_path("matmul_16x16.toml"),
    Dataflow::WeightStationary,
    TilingStrategy::Standard,
  )
  .unwrap();
  assert_eq!((base.job.w_base, base.job.c_base), (10000, 20000));
  let expected = base.expected();

  for mode in MODES {
    for strategy in STRATEGIES {
      let mut workload = base.clone();
      workload.job.mode = mode;
      workload.job.strategy = strategy;
      let (c, report, _) = simulate(ArrayShape::new(7, 7), &workload);
      assert!(
        max_abs_diff(&c, &expected) <= TOLERANCE,
        "{} {}: max diff {}",
        mode,
        strategy,
        max_abs_diff(&c, &expected)
      );
      assert_eq!(report.memory_writes, 256);
    }
  }
}

#[test]
fn test_edge_tiles_stay_inside_c() {
  init_log();
  let mut rng = StdRng::seed_from_u64(5);
  let shape = ArrayShape::new(3, 3);

  for mode in MODES {
    let mut workload = random_workload(&mut rng, 5, 5, 5);
    workload.job = workload.job.with_mode(mode);
    let sched = TilingSchedule::new(shape, &workload.job);
    assert_eq!(sched.num_i_tiles, 2);
    assert_eq!(sched.rows_in(1), 2);

    let (c, report, mem) = simulate(shape, &workload);
    assert!(max_abs_diff(&c, &workload.expected()) <= TOLERANCE);

    // exactly the 25 words of C were written, nothing after them
    assert_eq!(report.memory_writes, 25);
    let c_end = workload.job.c_base + 25 * WORD_BYTES;
    for offset in 0..16 {
      assert!(!mem.is_initialized(c_end + offset * WORD_BYTES));
    }
  }
}

#[test]
fn test_rerun_is_identical() {
  init_log();
  let mut rng = StdRng::seed_from_u64(11);
  let workload = random_workload(&mut rng, 10, 13, 8);

  for mode in MODES {
    let mut workload = workload.clone();
    workload.job.mode = mode;

    let mut mem = MainMemory::new(1 << 16);
    workload.load_into(&mut mem).unwrap();
    let mut accel = Accelerator::new("acc", ArrayShape::new(4, 4), mem);
    let job = workload.job;

    let first_report = accel.run_job(job, 1_000_000).unwrap();
    let first = accel.storage().read_matrix(job.c_base, job.k1, job.k3).unwrap();
    let second_report = accel.run_job(job, 1_000_000).unwrap();
    let second = accel.storage().read_matrix(job.c_base, job.k1, job.k3).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_report.cycles, second_report.cycles);
  }
}

#[test]
fn test_reuse_reads_less() {
  init_log();
  let mut rng = StdRng::seed_from_u64(23);
  let mut standard = random_workload(&mut rng, 16, 16, 16);
  standard.job.mode = Dataflow::OutputStationary;
  let mut reuse = standard.clone();
  reuse.job.strategy = TilingStrategy::DataReuse;

  let shape = ArrayShape::new(7, 7);
  let (c_std, std_report, std_mem) = simulate(shape, &standard);
  let (c_reuse, reuse_report, reuse_mem) = simulate(shape, &reuse);

  assert!(max_abs_diff(&c_std, &c_reuse) <= TOLERANCE);
  assert_eq!(std_report.tile_fetches, 54);
  assert_eq!(reuse_report.tile_fetches, 18);
  assert!((reuse_report.fetch_reduction() - 100.0 * (1.0 - 18.0 / 54.0)).abs() < 1e-9);
  assert!(reuse_mem.reads() < std_mem.reads());
  assert_eq!(reuse_mem.reads(), 2 * 256);
  assert_eq!(reuse_mem.writes(), std_mem.writes());
}

#[test]
fn test_random_shapes_match_reference() {
  init_log();
  let mut rng = StdRng::seed_from_u64(0x5eed);

  for _ in 0..12 {
    let shape = ArrayShape::new(rng.gen_range(1..=6), rng.gen_range(1..=6));
    let (k1, k2, k3) = (rng.gen_range(1..=14), rng.gen_range(1..=14), rng.gen_range(1..=14));
    let base = random_workload(&mut rng, k1, k2, k3);
    let expected = matmul(&base.a, &base.w, k1, k2, k3);

    for mode in MODES {
      for strategy in STRATEGIES {
        let mut workload = base.clone();
        workload.job = workload.job.with_mode(mode).with_strategy(strategy);
        let (c, _, _) = simulate(shape, &workload);
        let diff = max_abs_diff(&c, &expected);
        assert!(
          diff <= TOLERANCE,
          "{}x{}x{} on {} ({} {}): max diff {}",
          k1,
          k2,
          k3,
          shape,
          mode,
          strategy,
          diff
        );
      }
    }
  }
}

#[test]
fn test_uninitialized_operands_read_as_zero() {
  init_log();
  // only A is written; W is never initialized
  let job = MatMulJob::new(3, 3, 3);
  let mut mem = MainMemory::new(1024);
  mem.load_matrix(job.a_base, 3, 3, &[1.0; 9]).unwrap();
  let mut accel = Accelerator::new("acc", ArrayShape::new(2, 2), mem);

  accel.run_job(job, 100_000).unwrap();
  let c = accel.storage().read_matrix(job.c_base, 3, 3).unwrap();
  assert!(c.iter().all(|&v| v == 0.0));
  assert_eq!(accel.storage().uninit_reads(), accel.storage().reads() / 2);
  assert!(accel.storage().capacity_bytes() >= 1024);
}

#[cfg(feature = "smoke-tests")]
#[test]
fn test_large_sweep() {
  init_log();
  let mut rng = StdRng::seed_from_u64(99);
  for side in [8, 16] {
    let base = random_workload(&mut rng, 40, 33, 47);
    let expected = base.expected();
    for mode in MODES {
      for strategy in STRATEGIES {
        let mut workload = base.clone();
        workload.job = workload.job.with_mode(mode).with_strategy(strategy);
        let (c, _, _) = simulate(ArrayShape::new(side, side), &workload);
        assert!(max_abs_diff(&c, &expected) <= 1e-2);
      }
    }
  }
}
