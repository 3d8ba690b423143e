//! Structured `tracing` initialization. Collapses two independently-configured verbosity
//! tiers (`--log-level-base`, `--log-level-time-machine`) into a single `EnvFilter`
//! directive string, since `tracing` has no notion of independent non-propagating loggers
//! (SPEC_FULL.md §7, "Logging (ambient)").

use archivo_core::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Targets raised to `time_machine` verbosity independently of the base level.
const TIME_MACHINE_TARGETS: &[&str] = &["archivo_version", "archivo_plugin"];

/// Build the `EnvFilter` directive string for a given base/time-machine verbosity pair.
/// `RUST_LOG`, if set, always wins over the computed default.
pub fn filter_directives(base: LogLevel, time_machine: LogLevel) -> String {
    let base = base.as_filter_str();
    let tm = time_machine.as_filter_str();
    let mut directive = base.to_string();
    for target in TIME_MACHINE_TARGETS {
        directive.push_str(&format!(",{target}={tm}"));
    }
    directive
}

/// Initialize the global `tracing` subscriber. Safe to call once per process; a second
/// call is a no-op (errors from `try_init` are swallowed).
pub fn init(base: LogLevel, time_machine: LogLevel) {
    let directive = filter_directives(base, time_machine);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
