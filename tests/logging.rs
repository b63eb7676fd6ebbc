use log::LevelFilter;
use sasim::simulator::config::AppConfig;
use sasim::simulator::sim::Workload;
use sasim::simulator::utils::log::{init_log, is_log_enabled, set_log};
use sasim::simulator::Simulator;
use sasim::{Dataflow, TilingStrategy};

fn run(quiet: bool) {
  let mut config = AppConfig::default();
  config.array.rows = 2;
  config.array.cols = 2;
  config.memory.size_bytes = 4096;
  config.simulation.quiet = quiet;
  let workload = Workload::random(2, 3, 2, 9, Dataflow::WeightStationary, TilingStrategy::Standard);
  let mut sim = Simulator::new(config, workload).unwrap();
  sim.run().unwrap().unwrap();
  assert_eq!(sim.verify(1e-3).unwrap(), 0);
}

#[test]
fn test_quiet_level_is_restored() {
  init_log();
  log::set_max_level(LevelFilter::Debug);

  set_log(false);
  assert!(!is_log_enabled());
  assert_eq!(log::max_level(), LevelFilter::Warn);
  // a second quiet call keeps the first saved level
  set_log(false);
  set_log(true);
  assert!(is_log_enabled());
  assert_eq!(log::max_level(), LevelFilter::Debug);

  // back-to-back simulators in one process
  run(true);
  assert_eq!(log::max_level(), LevelFilter::Warn);
  run(false);
  assert_eq!(log::max_level(), LevelFilter::Debug);
}
