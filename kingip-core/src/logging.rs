//! Shared `tracing` bootstrap, following `core::server::Server::run_forever`'s
//! pretty-printed subscriber: file/line, thread ids, and target all on, level
//! controlled by `RUST_LOG` (falling back to the node's configured level).

use tracing_subscriber::EnvFilter;

pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .pretty()
        .try_init();
}
