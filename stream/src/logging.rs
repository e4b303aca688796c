//! Optional logging bootstrap (the `logging` cargo feature).
//!
//! Embedders with their own log backend skip this and the engine's `log`
//! calls go wherever they wired them.

use log::LevelFilter;

/// Wires a fern dispatcher to stderr. Returns an error when a global
/// logger is already installed.
pub fn set_up_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}
