//! GCodeLink Settings Crate
//!
//! Serializable driver configuration: transport parameters, timing, and the
//! command dialect. A loaded [`Config`] produces the registry, connection
//! parameters and driver settings the communication crate consumes.

pub mod config;
pub mod error;

pub use config::{CommandEntry, Config, ConnectionSettings, DriverConfig, PatternEntry};
pub use error::{Result, SettingsError};
