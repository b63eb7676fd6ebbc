use thiserror::Error;

/// Errors surfaced by the simulator. Tile-index violations are not here:
/// those are programmer errors and panic.
#[derive(Debug, Error)]
pub enum SimError {
  #[error("invalid job: {0}")]
  InvalidJob(String),

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("misaligned memory access at byte 0x{0:08x}")]
  Misaligned(u32),

  #[error("memory access at byte 0x{addr:08x} outside {capacity} byte store")]
  OutOfRange { addr: u32, capacity: usize },

  #[error("accelerator is busy with another job")]
  Busy,

  #[error("job did not finish within {0} cycles")]
  Timeout(u64),

  #[error("bad memory image line {line}: {reason}")]
  BadImage { line: usize, reason: String },

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("toml parse error: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("config error: {0}")]
  Config(#[from] config::ConfigError),

  #[error("trace encoding error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
