/// Console report switch and logger setup
use std::sync::atomic::{AtomicBool, Ordering};
static ENABLE_LOG: AtomicBool = AtomicBool::new(true);

/// Set console reporting enabled
pub fn set_log(enabled: bool) {
  ENABLE_LOG.store(enabled, Ordering::Relaxed);
}

/// Check if console reporting is enabled, default is true
pub fn is_log_enabled() -> bool {
  ENABLE_LOG.load(Ordering::Relaxed)
}

/// Install the `env_logger` backend. `RUST_LOG` wins over the default
/// `info` filter. Safe to call more than once.
pub fn init_log() {
  let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    .format_timestamp(None)
    .try_init();
}

/// Quiet runs only keep warnings and errors.
pub fn apply_quiet(quiet: bool) {
  set_log(!quiet);
  if quiet {
    log::set_max_level(log::LevelFilter::Warn);
  }
}

/// Print a console line with blue [Log] prefix, unless quiet
#[macro_export]
macro_rules! log_info {
  ($($arg:tt)*) => {
    if $crate::simulator::utils::log::is_log_enabled() {
      println!("\x1b[34m[Log]\x1b[0m {}", format!($($arg)*));
    }
  };
}
