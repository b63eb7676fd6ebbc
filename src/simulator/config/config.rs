use crate::arch::systolic::{ArrayShape, Dataflow, TilingStrategy};
use crate::error::{Result, SimError};
use crate::memdomain::{CacheConfig, WORD_BYTES};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Largest grid side accepted from configuration
pub const MAX_GRID_SIDE: usize = 256;

/// Grid geometry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArraySection {
  #[serde(default = "default_side")]
  pub rows: usize,
  #[serde(default = "default_side")]
  pub cols: usize,
}

fn default_side() -> usize {
  7
}

impl Default for ArraySection {
  fn default() -> Self {
    Self {
      rows: default_side(),
      cols: default_side(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemorySection {
  #[serde(default = "default_size_bytes")]
  pub size_bytes: usize,
}

fn default_size_bytes() -> usize {
  1 << 20
}

impl Default for MemorySection {
  fn default() -> Self {
    Self {
      size_bytes: default_size_bytes(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub mode: Dataflow,
  #[serde(default)]
  pub strategy: TilingStrategy,
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  #[serde(default)]
  pub trace_pes: bool,
  #[serde(default = "default_max_cycles")]
  pub max_cycles: u64,
}

fn default_max_cycles() -> u64 {
  100_000_000
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      mode: Dataflow::default(),
      strategy: TilingStrategy::default(),
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      trace_pes: false,
      max_cycles: default_max_cycles(),
    }
  }
}

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub array: ArraySection,
  #[serde(default)]
  pub memory: MemorySection,
  #[serde(default)]
  pub simulation: SimulationSection,
  #[serde(default)]
  pub cache: CacheConfig,
}

impl AppConfig {
  pub fn shape(&self) -> ArrayShape {
    ArrayShape::new(self.array.rows, self.array.cols)
  }

  pub fn trace_path(&self) -> Option<&Path> {
    let path = self.simulation.trace_file.trim();
    (!path.is_empty()).then(|| Path::new(path))
  }
}

/// Command-line values that take precedence over every config layer.
/// `None`/`false` leaves the configured value alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub rows: Option<usize>,
  pub cols: Option<usize>,
  pub mode: Option<Dataflow>,
  pub reuse: bool,
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<String>,
  pub trace_pes: bool,
  pub max_cycles: Option<u64>,
  pub cache: bool,
}

/// Parse the embedded default configuration.
pub fn load_default_config() -> Result<AppConfig> {
  Ok(toml::from_str(DEFAULT_CONFIG)?)
}

/// Parse one TOML configuration file on its own.
pub fn load_config_file(path: &Path) -> Result<AppConfig> {
  let content = fs::read_to_string(path)
    .map_err(|e| SimError::InvalidConfig(format!("cannot read config file {:?}: {}", path, e)))?;
  Ok(toml::from_str(&content)?)
}

/// Stack the configuration sources, later ones winning per key:
/// embedded defaults, the optional user file, then `SASIM_*` environment
/// variables (`SASIM_ARRAY__ROWS=8`).
pub fn load_layered(custom_config_path: Option<&Path>) -> Result<AppConfig> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

  if let Some(path) = custom_config_path {
    if !path.exists() {
      return Err(SimError::InvalidConfig(format!("config file {:?} does not exist", path)));
    }
    builder = builder.add_source(File::from(path).format(FileFormat::Toml));
  }

  let config = builder
    .add_source(Environment::with_prefix("SASIM").prefix_separator("_").separator("__").try_parsing(true))
    .build()?;
  Ok(config.try_deserialize()?)
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if let Some(rows) = cli.rows {
    config.array.rows = rows;
  }
  if let Some(cols) = cli.cols {
    config.array.cols = cols;
  }
  if let Some(mode) = cli.mode {
    config.simulation.mode = mode;
  }
  if cli.reuse {
    config.simulation.strategy = TilingStrategy::DataReuse;
  }
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if cli.trace_pes {
    config.simulation.trace_pes = true;
  }
  if let Some(max_cycles) = cli.max_cycles {
    config.simulation.max_cycles = max_cycles;
  }
  if cli.cache {
    config.cache.enabled = true;
  }
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
  let ArraySection { rows, cols } = config.array;
  if rows == 0 || cols == 0 {
    return Err(SimError::InvalidConfig(format!("grid must be at least 1x1, got {}x{}", rows, cols)));
  }
  if rows > MAX_GRID_SIDE || cols > MAX_GRID_SIDE {
    return Err(SimError::InvalidConfig(format!(
      "grid {}x{} exceeds {} per side",
      rows, cols, MAX_GRID_SIDE
    )));
  }

  let size = config.memory.size_bytes;
  if size == 0 || size % WORD_BYTES as usize != 0 {
    return Err(SimError::InvalidConfig(format!(
      "memory size {} is not a positive multiple of {}",
      size, WORD_BYTES
    )));
  }
  if size > u32::MAX as usize {
    return Err(SimError::InvalidConfig(format!("memory size {} exceeds the 32-bit address space", size)));
  }

  let cache = &config.cache;
  if cache.enabled && (cache.sets == 0 || cache.ways == 0) {
    return Err(SimError::InvalidConfig(format!(
      "cache needs at least one set and one way, got {} sets x {} ways",
      cache.sets, cache.ways
    )));
  }

  if config.simulation.max_cycles == 0 {
    return Err(SimError::InvalidConfig("max_cycles must be positive".to_string()));
  }

  Ok(())
}

/// Load and merge configuration
///
/// Flow:
/// 1. Embedded defaults, user file and environment (`load_layered`)
/// 2. CLI overrides
/// 3. Validation
pub fn load_and_merge_configs(custom_config_path: Option<&Path>, cli: &CliOverrides) -> Result<AppConfig> {
  let mut config = load_layered(custom_config_path)?;
  apply_cli_overrides(&mut config, cli);
  validate_config(&config)?;
  Ok(config)
}
