//! Command addressing types
//!
//! A command is addressed by the pair ([`Subject`], [`CommandKind`]). The kind
//! names what the command is for; the subject names which unit it applies to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic purpose of a command template
///
/// This is a closed set. Configuration files refer to kinds by their
/// snake_case name (e.g. `move_to_complete`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Sent once after the channel opens (units, positioning mode, ...)
    Connect,
    /// Sent when the machine is enabled
    Enable,
    /// Sent when the machine is disabled
    Disable,
    /// Homing cycle
    Home,
    /// Move to a coordinate
    MoveTo,
    /// Block until all queued motion has finished
    MoveToComplete,
    /// Drive an on/off actuator
    ActuateBoolean,
    /// Drive an actuator with a numeric or textual value
    ActuateDouble,
    /// Query an actuator or sensor for a value
    ActuatorRead,
}

impl CommandKind {
    /// Every kind, in declaration order
    pub const ALL: [CommandKind; 9] = [
        CommandKind::Connect,
        CommandKind::Enable,
        CommandKind::Disable,
        CommandKind::Home,
        CommandKind::MoveTo,
        CommandKind::MoveToComplete,
        CommandKind::ActuateBoolean,
        CommandKind::ActuateDouble,
        CommandKind::ActuatorRead,
    ];

    /// Whether the kind expects a value back and may carry a response pattern
    pub fn is_read(&self) -> bool {
        matches!(self, CommandKind::ActuatorRead)
    }

    /// Configuration name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Home => "home",
            Self::MoveTo => "move_to",
            Self::MoveToComplete => "move_to_complete",
            Self::ActuateBoolean => "actuate_boolean",
            Self::ActuateDouble => "actuate_double",
            Self::ActuatorRead => "actuator_read",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown command kind '{}'", s))
    }
}

/// The unit a command applies to
///
/// `Global` templates are machine-wide defaults. A `Named` template for the
/// same kind overrides the default for that one unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Subject {
    /// The machine as a whole
    #[default]
    Global,
    /// An axis or actuator, by its stable name
    Named(String),
}

impl Subject {
    /// Create a named subject
    pub fn named(name: impl Into<String>) -> Self {
        Subject::Named(name.into())
    }

    /// Name of the subject, `None` for the global subject
    pub fn name(&self) -> Option<&str> {
        match self {
            Subject::Global => None,
            Subject::Named(name) => Some(name),
        }
    }

    /// Check if this is the global subject
    pub fn is_global(&self) -> bool {
        matches!(self, Subject::Global)
    }
}

impl From<Option<String>> for Subject {
    fn from(name: Option<String>) -> Self {
        match name {
            Some(name) if !name.is_empty() => Subject::Named(name),
            _ => Subject::Global,
        }
    }
}

impl From<Subject> for Option<String> {
    fn from(subject: Subject) -> Self {
        match subject {
            Subject::Global => None,
            Subject::Named(name) => Some(name),
        }
    }
}

impl From<&str> for Subject {
    fn from(name: &str) -> Self {
        Subject::from(Some(name.to_string()))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Global => write!(f, "global"),
            Subject::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Value written to an actuator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActuatorValue {
    /// On/off
    Boolean(bool),
    /// Numeric setpoint
    Double(f64),
    /// Free-form text, substituted verbatim
    Text(String),
}

impl ActuatorValue {
    /// Command kind used to write this value
    pub fn command_kind(&self) -> CommandKind {
        match self {
            ActuatorValue::Boolean(_) => CommandKind::ActuateBoolean,
            ActuatorValue::Double(_) | ActuatorValue::Text(_) => CommandKind::ActuateDouble,
        }
    }

    /// Parse a command-line style value: `true`/`on`, `false`/`off`, a number, or text
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "on" => return ActuatorValue::Boolean(true),
            "false" | "off" => return ActuatorValue::Boolean(false),
            _ => {}
        }
        raw.trim()
            .parse::<f64>()
            .map(ActuatorValue::Double)
            .unwrap_or_else(|_| ActuatorValue::Text(raw.to_string()))
    }
}

impl fmt::Display for ActuatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorValue::Boolean(value) => write!(f, "{}", value),
            ActuatorValue::Double(value) => write!(f, "{}", value),
            ActuatorValue::Text(value) => f.write_str(value),
        }
    }
}
