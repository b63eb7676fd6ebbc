/// Console and `log` facade setup
use env_logger::Env;
use log::LevelFilter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

static ENABLE_LOG: AtomicBool = AtomicBool::new(true);
// facade level in force before quiet mode capped it
static LOUD_LEVEL: Mutex<Option<LevelFilter>> = Mutex::new(None);

/// Install the env_logger backend. `RUST_LOG` wins over the default level;
/// calling this more than once is harmless.
pub fn init_log() {
  let _ = env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
    .format_timestamp(None)
    .format_target(false)
    .try_init();
}

/// Set console logging enabled. Quiet mode also caps the facade at `warn`;
/// enabling again restores the level it had before.
pub fn set_log(enabled: bool) {
  ENABLE_LOG.store(enabled, Ordering::Relaxed);
  let Ok(mut loud) = LOUD_LEVEL.lock() else {
    return;
  };
  if enabled {
    if let Some(level) = loud.take() {
      log::set_max_level(level);
    }
  } else if loud.is_none() {
    let level = log::max_level();
    *loud = Some(level);
    log::set_max_level(LevelFilter::Warn.min(level));
  }
}

/// Check if logging is enabled, default is true
pub fn is_log_enabled() -> bool {
  ENABLE_LOG.load(Ordering::Relaxed)
}

/// Print a log message with blue [Log] prefix unless quiet
#[macro_export]
macro_rules! log_info {
  ($($arg:tt)*) => {
    if $crate::log::is_log_enabled() {
      println!("\x1b[34m[Log]\x1b[0m {}", format!($($arg)*));
    }
  };
}
