use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `FRAMESCAN_LOG` first, then
/// `RUST_LOG`, then a default.
///
/// Log field contract for framescan processes:
/// - Always include `rank` once the cluster transport is up.
/// - Include `gpu` on any evaluate-stage event.
/// - Include `work_item` on any per-task event.
/// - Worker exit summaries go to target `framescan_stats`.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("FRAMESCAN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
