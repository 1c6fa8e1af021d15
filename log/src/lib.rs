use std::sync::Mutex;

use slog::Drain;
use slog::Fuse;
use slog_async::Async;
use slog_json::Json;

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

pub fn initialize_logger() -> slog::Logger {
    let drain = Mutex::new(Json::default(std::io::stderr())).map(Fuse);
    let drain = Async::new(drain).build().fuse();

    Logger::root(
        drain,
        o!("version" => info::VERSION, "revision" => info::REVISION, "build_timestamp" => info::BUILD_TIMESTAMP),
    )
}

/// Returns a logger that drops every record. Useful in tests.
pub fn discard() -> slog::Logger {
    Logger::root(Discard, o!())
}

/// Routes `RUST_LOG`-filtered records to stderr for as long as the
/// returned guard lives.
#[cfg(feature = "env_logging")]
pub fn initialize_env_logger() -> slog_scope::GlobalLoggerGuard {
    slog_envlogger::init().expect("initialize slog-envlogger")
}
