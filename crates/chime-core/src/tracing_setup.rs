use std::fs::OpenOptions;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter directives, e.g. `CHIME_LOG=chime_core=debug`
pub const LOG_ENV: &str = "CHIME_LOG";
/// Optional path of an additional debug-level log file
pub const LOG_FILE_ENV: &str = "CHIME_LOG_FILE";

pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Console logging to stderr, filtered by `CHIME_LOG` (falling back to
/// `default_filter`). When `CHIME_LOG_FILE` is set a second layer writes
/// everything at debug level to that file.
pub fn init_tracing_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    let registry = tracing_subscriber::registry().with(console);

    let file_layer = std::env::var(LOG_FILE_ENV).ok().and_then(|log_path| {
        match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => {
                eprintln!("File logging enabled: {}", log_path);
                Some(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG),
                )
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", log_path, e);
                None
            }
        }
    });

    // A second init (tests, embedding hosts) is not an error worth dying for.
    let _ = registry.with(file_layer).try_init();
}
