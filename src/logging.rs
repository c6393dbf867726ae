//! Process-wide logger setup for the binary.
//!
//! The library only emits through the `log` facade; installing a sink is
//! the caller's business.  `RUST_LOG` overrides the level passed in.

use log::LevelFilter;

/// Install the `env_logger` sink.  Returns `false` if a logger was
/// already installed, in which case the existing one stays in place.
pub fn init(level: LevelFilter) -> bool {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}
