//! Logger construction helpers

use slog::Drain;

/// Builds an asynchronous terminal logger filtered at `level`.
pub fn terminal_logger(level: slog::Level) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    slog::Logger::root(drain, slog::o!())
}

/// Installs [`terminal_logger`] as the `slog_scope` global logger.
///
/// Keep the returned guard alive for as long as logging is needed.
#[must_use = "the global logger is reset when the guard is dropped"]
pub fn install(level: slog::Level) -> slog_scope::GlobalLoggerGuard {
    slog_scope::set_global_logger(terminal_logger(level))
}

/// Logger that drops every record.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
