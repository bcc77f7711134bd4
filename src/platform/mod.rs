//! Platform abstraction layer
//!
//! Handles browser/native differences for:
//! - Logging setup
//! - Whether threads may block (wasm main threads may not)

/// Initialize logging for the current platform
#[cfg(target_arch = "wasm32")]
pub fn init_logging() {
    console_error_panic_hook::set_once();
    let _ = console_log::init_with_level(log::Level::Info);
}

/// Initialize logging for the current platform
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Whether this build can park a thread on a condition variable.
///
/// wasm32 without the atomics target feature has no thread blocking at all.
pub fn blocking_wait_supported() -> bool {
    !cfg!(all(target_arch = "wasm32", not(target_feature = "atomics")))
}

/// Whether worker threads can be spawned at all
pub fn threads_supported() -> bool {
    !cfg!(all(target_arch = "wasm32", not(target_feature = "atomics")))
}
