use clap::{ArgGroup, Parser};
use sasim::arch::systolic::{Dataflow, TilingStrategy};
use sasim::log_info;
use sasim::simulator::config::{load_and_merge_configs, CliOverrides};
use sasim::simulator::sim::Workload;
use sasim::simulator::utils::log::init_log;
use sasim::simulator::utils::report;
use sasim::simulator::Simulator;
use std::path::PathBuf;
use std::process::ExitCode;

/// sasim - cycle-accurate systolic array matrix multiply simulator
#[derive(Parser, Debug)]
#[command(name = "sasim")]
#[command(version = "0.1.0")]
#[command(about = "Systolic array matmul simulator (weight- and output-stationary)", long_about = None)]
#[command(group(ArgGroup::new("workload").required(true).args(["job", "random"])))]
struct Args {
  /// Configuration file layered over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Job description (TOML) with dimensions and the A/W matrices
  #[arg(short, long, value_name = "FILE")]
  job: Option<PathBuf>,

  /// Random job with the given dimensions
  #[arg(long, num_args = 3, value_names = ["K1", "K2", "K3"])]
  random: Option<Vec<usize>>,

  /// Seed for --random
  #[arg(long, default_value_t = 0)]
  seed: u64,

  /// Dataflow: ws or os
  #[arg(short, long, value_name = "MODE")]
  mode: Option<Dataflow>,

  /// Grid rows
  #[arg(long)]
  rows: Option<usize>,

  /// Grid columns
  #[arg(long)]
  cols: Option<usize>,

  /// Use the k -> i -> j data-reuse tiling order
  #[arg(long)]
  reuse: bool,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress log messages)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path (JSON lines)
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Include every PE's registers in the trace
  #[arg(long)]
  trace_pes: bool,

  /// Give up after this many cycles
  #[arg(long)]
  max_cycles: Option<u64>,

  /// Put the set-associative cache between the accelerator and memory
  #[arg(long)]
  cache: bool,

  /// Start from a saved memory image
  #[arg(long, value_name = "FILE")]
  load_memory: Option<PathBuf>,

  /// Save the final memory image
  #[arg(long, value_name = "FILE")]
  dump_memory: Option<PathBuf>,

  /// Check C against the reference model
  #[arg(long)]
  verify: bool,

  /// Print the operands and the result
  #[arg(short, long)]
  print: bool,
}

fn run(args: Args) -> sasim::Result<bool> {
  let cli = CliOverrides {
    rows: args.rows,
    cols: args.cols,
    mode: args.mode,
    reuse: args.reuse,
    quiet: args.quiet,
    step: args.step,
    trace_file: args.trace_file.clone(),
    trace_pes: args.trace_pes,
    max_cycles: args.max_cycles,
    cache: args.cache,
  };
  let config = load_and_merge_configs(args.config.as_deref(), &cli)?;
  let (mode, strategy) = (config.simulation.mode, config.simulation.strategy);

  let mut workload = match (&args.job, &args.random) {
    (Some(path), _) => Workload::load(path, mode, strategy)?,
    (None, Some(dims)) => Workload::random(dims[0], dims[1], dims[2], args.seed, mode, strategy),
    (None, None) => {
      return Err(sasim::SimError::InvalidJob("either --job or --random is required".to_string()));
    },
  };
  // flags given on the command line beat the job file
  if let Some(mode) = args.mode {
    workload.job.mode = mode;
  }
  if args.reuse {
    workload.job.strategy = TilingStrategy::DataReuse;
  }

  let job = workload.job;
  if args.print {
    report::print_matrix("Input A", &workload.a, job.k1, job.k2);
    report::print_matrix("Input W", &workload.w, job.k2, job.k3);
  }

  let mut sim = match &args.load_memory {
    Some(path) => Simulator::from_image(config, workload, path)?,
    None => Simulator::new(config, workload)?,
  };

  let Some(run_report) = sim.run()? else {
    return Ok(true);
  };
  report::print_run_report(&run_report);

  if args.print {
    report::print_matrix("Result C", &sim.result()?, job.k1, job.k3);
  }
  if let Some(path) = &args.dump_memory {
    sim.memory().save_image(path)?;
    log_info!("memory image written to {}", path.display());
  }
  if args.verify {
    let mismatches = sim.verify(1e-3)?;
    if mismatches > 0 {
      eprintln!("verification failed: {} of {} elements differ", mismatches, job.k1 * job.k3);
      return Ok(false);
    }
    println!("verification passed");
  }
  Ok(true)
}

fn main() -> ExitCode {
  init_log();

  let args = Args::parse();
  match run(args) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(e) => {
      eprintln!("error: {}", e);
      ExitCode::FAILURE
    },
  }
}
