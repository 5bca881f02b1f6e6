use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber once. `RUST_LOG` overrides the default
/// filter. Does nothing if the application already installed a subscriber.
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                EnvFilter::new("warn,fl2k_stream=debug,fl2k_driver=debug")
            } else {
                EnvFilter::new("info")
            }
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_thread_ids(true)
            .try_init()
            .ok();
    });
}
