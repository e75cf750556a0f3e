//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing for a host process. Hosts can install their own
/// subscriber; this helper installs an env-filtered `fmt` subscriber if none
/// is set (`RUST_LOG=prometheus_admission=debug`).
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
