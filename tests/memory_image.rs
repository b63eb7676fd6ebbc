use sasim::simulator::config::AppConfig;
use sasim::simulator::sim::Workload;
use sasim::simulator::utils::log::init_log;
use sasim::simulator::Simulator;
use sasim::{Dataflow, MainMemory, SimError, Storage, TilingStrategy};

fn quiet_config() -> AppConfig {
  let mut config = AppConfig::default();
  config.array.rows = 3;
  config.array.cols = 3;
  config.memory.size_bytes = 4096;
  config.simulation.quiet = true;
  config
}

#[test]
fn test_dumped_image_reloads_with_result() {
  init_log();
  let dir = tempfile::tempdir().unwrap();
  let image = dir.path().join("memory.txt");

  let workload = Workload::random(4, 5, 6, 17, Dataflow::OutputStationary, TilingStrategy::Standard);
  let job = workload.job;
  let mut sim = Simulator::new(quiet_config(), workload).unwrap();
  sim.run().unwrap().unwrap();
  assert_eq!(sim.verify(1e-3).unwrap(), 0);
  sim.memory().save_image(&image).unwrap();

  let reloaded = MainMemory::load_image(&image, 4096).unwrap();
  assert_eq!(
    reloaded.read_matrix(job.c_base, job.k1, job.k3).unwrap(),
    sim.result().unwrap()
  );
  // words past C were never written and stay that way through the image
  assert!(!reloaded.is_initialized(job.c_base + (job.k1 * job.k3) as u32 * 4));
}

#[test]
fn test_run_from_loaded_image() {
  init_log();
  let dir = tempfile::tempdir().unwrap();
  let image = dir.path().join("operands.txt");

  let workload = Workload::random(5, 5, 5, 2, Dataflow::WeightStationary, TilingStrategy::DataReuse);
  let mut mem = MainMemory::new(4096);
  workload.load_into(&mut mem).unwrap();
  mem.save_image(&image).unwrap();

  let mem = MainMemory::load_image(&image, 4096).unwrap();
  let mut sim = Simulator::with_memory(quiet_config(), workload, mem).unwrap();
  let report = sim.run().unwrap().unwrap();
  assert_eq!(report.memory_writes, 25);
  assert_eq!(sim.verify(1e-3).unwrap(), 0);
}

#[test]
fn test_loaded_image_takes_configured_size() {
  init_log();
  let dir = tempfile::tempdir().unwrap();
  let image = dir.path().join("small.txt");

  let workload = Workload::random(3, 3, 3, 5, Dataflow::WeightStationary, TilingStrategy::Standard);
  let mut mem = MainMemory::new(4096);
  workload.load_into(&mut mem).unwrap();
  mem.save_image(&image).unwrap();

  let mut config = quiet_config();
  config.memory.size_bytes = 8192;
  let mut sim = Simulator::from_image(config, workload.clone(), &image).unwrap();
  assert_eq!(sim.memory().capacity_bytes(), 8192);
  sim.run().unwrap().unwrap();
  assert_eq!(sim.verify(1e-3).unwrap(), 0);

  // the image mentions words past a 2 KiB store
  let mut config = quiet_config();
  config.memory.size_bytes = 2048;
  let err = Simulator::from_image(config, workload, &image).err().unwrap();
  assert!(matches!(err, SimError::BadImage { .. }), "{}", err);
}
