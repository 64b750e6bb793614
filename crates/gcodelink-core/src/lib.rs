//! # GCodeLink Core
//!
//! Core types shared by every GCodeLink crate: the addressing types used to
//! look up command templates and the unified error taxonomy.

pub mod command;
pub mod error;

pub use command::{ActuatorValue, CommandKind, Subject};
pub use error::{ConfigError, ConnectionError, Error, ProtocolError, Result};

/// Reply line that concludes every exchange
pub const TERMINAL_MARKER: &str = "ok";
