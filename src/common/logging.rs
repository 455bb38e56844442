//! Logger setup shared by the dispatcher, worker and client binaries.

use std::io::Write;

use env_logger::Builder;
use log::{LevelFilter, SetLoggerError};

/// Install the process-wide logger.
///
/// Format: `[HH:MM:SS] [LEVEL] message`, at `level` unless `RUST_LOG` says otherwise.
///
/// # Errors
/// Fails if a logger has already been installed.
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        .parse_default_env()
        .try_init()
}
