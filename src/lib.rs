//! # GCodeLink
//!
//! A template-driven command/response engine for G-code motion controllers
//! (pick-and-place and CNC class machines) over TCP or serial.
//!
//! ## Architecture
//!
//! 1. **gcodelink-core** - Error taxonomy, command kinds, subjects
//! 2. **gcodelink-communication** - Channels, registry, protocol session, driver
//! 3. **gcodelink-settings** - JSON/TOML driver configuration
//! 4. **gcodelink** - Logging setup and the command-line binary
//!
//! The machine dialect is data: every capability maps to a command template
//! and every read to a response pattern, both loaded from configuration.

pub mod cli;

pub use gcodelink_communication::{
    CommandRegistry, ConnectionParams, DriverSettings, DriverState, GcodeDriver, GcodeServer,
    MoveTarget,
};
pub use gcodelink_core::{ActuatorValue, CommandKind, Error, Result, Subject};
pub use gcodelink_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
