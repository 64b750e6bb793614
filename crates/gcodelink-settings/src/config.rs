//! Driver configuration
//!
//! Supports JSON and TOML file formats, chosen by file extension.
//!
//! Configuration is organized into sections:
//! - Connection settings (transport, host or serial port, line settings)
//! - Driver timing (response timeout, settle delay, keep-alive)
//! - The command dialect (templates, response patterns, error pattern)

use crate::error::{Result, SettingsError};
use gcodelink_communication::{
    CommandRegistry, ConnectionDriver, ConnectionParams, DriverSettings, SerialParity,
};
use gcodelink_core::{CommandKind, Subject};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Transport type
    pub driver: ConnectionDriver,
    /// Hostname for TCP connections
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Serial port name, e.g. "/dev/ttyUSB0"
    pub serial_port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Time allowed to open the connection, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Tcp,
            host: "localhost".to_string(),
            port: 23,
            serial_port: String::new(),
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            connect_timeout_ms: 5000,
        }
    }
}

/// Driver timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Response timeout per command, in milliseconds
    pub timeout_ms: u64,
    /// Delay after connecting before the first command, in milliseconds
    pub connect_wait_ms: u64,
    /// Stay connected while the driver is disabled
    pub keep_alive: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            connect_wait_ms: 3000,
            keep_alive: true,
        }
    }
}

/// One command template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    /// Device the template applies to; omitted for the global default
    #[serde(default, skip_serializing_if = "Subject::is_global")]
    pub subject: Subject,
    pub kind: CommandKind,
    /// Template text; several lines are sent as separate commands
    pub template: String,
}

/// One response pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    #[serde(default, skip_serializing_if = "Subject::is_global")]
    pub subject: Subject,
    pub kind: CommandKind,
    /// Regular expression; a named group `Value` supplies the read result
    pub pattern: String,
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pattern marking a reply line as a command rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_pattern: Option<String>,
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Driver timing
    pub driver: DriverConfig,
    /// Command templates
    pub commands: Vec<CommandEntry>,
    /// Response patterns
    pub patterns: Vec<PatternEntry>,
}

impl Default for Config {
    fn default() -> Self {
        let global = |kind, template: &str| CommandEntry {
            subject: Subject::Global,
            kind,
            template: template.to_string(),
        };
        Self {
            error_pattern: None,
            connection: ConnectionSettings::default(),
            driver: DriverConfig::default(),
            commands: vec![
                global(
                    CommandKind::Connect,
                    "G21 ; Set millimeters mode\n\
                     G90 ; Set absolute positioning mode\n\
                     M82 ; Set absolute mode for extruder",
                ),
                global(CommandKind::Home, "G28 ; Home all axes"),
                global(
                    CommandKind::MoveTo,
                    "G0 {X:X%.4f} {Y:Y%.4f} {Z:Z%.4f} {Rotation:E%.4f} F{FeedRate:%.0f}",
                ),
                global(
                    CommandKind::MoveToComplete,
                    "M400 ; Wait for moves to complete before returning",
                ),
            ],
            patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Create new config with the stock dialect
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform config location: `<config dir>/gcodelink/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("gcodelink").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".into())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = match Format::of(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!(
            "Loaded {} commands and {} patterns from {}",
            config.commands.len(),
            config.patterns.len(),
            path.display()
        );
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    ///
    /// Every template and pattern is compiled, so a config that validates
    /// always builds a registry.
    pub fn validate(&self) -> Result<()> {
        if self.driver.timeout_ms == 0 {
            return Err(SettingsError::invalid("driver.timeout_ms", "must be > 0"));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.connect_timeout_ms",
                "must be > 0",
            ));
        }
        if self.connection.driver == ConnectionDriver::Serial && self.connection.serial_port.is_empty() {
            return Err(SettingsError::invalid(
                "connection.serial_port",
                "required for the serial driver",
            ));
        }

        self.connection_params().validate()?;
        self.build_registry()?;
        Ok(())
    }

    /// Registry populated with every template and pattern
    pub fn build_registry(&self) -> Result<CommandRegistry> {
        let mut registry = CommandRegistry::new();
        for entry in &self.commands {
            registry.set_command(entry.subject.clone(), entry.kind, &entry.template)?;
        }
        for entry in &self.patterns {
            registry.set_pattern(entry.subject.clone(), entry.kind, &entry.pattern)?;
        }
        registry.set_error_pattern(self.error_pattern.as_deref())?;
        Ok(registry)
    }

    /// Parameters for opening the channel
    pub fn connection_params(&self) -> ConnectionParams {
        let c = &self.connection;
        let port = match c.driver {
            ConnectionDriver::Tcp => c.host.clone(),
            ConnectionDriver::Serial => c.serial_port.clone(),
        };
        ConnectionParams {
            driver: c.driver,
            port,
            network_port: c.port,
            baud_rate: c.baud_rate,
            data_bits: c.data_bits,
            stop_bits: c.stop_bits,
            parity: c.parity,
            flow_control: c.flow_control,
            timeout_ms: c.connect_timeout_ms,
        }
    }

    /// Timing for the driver
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            timeout: Duration::from_millis(self.driver.timeout_ms),
            connect_wait: Duration::from_millis(self.driver.connect_wait_ms),
            keep_alive: self.driver.keep_alive,
        }
    }

    /// Store a template, replacing any existing one for the same key
    pub fn set_command(&mut self, subject: impl Into<Subject>, kind: CommandKind, template: &str) {
        let subject = subject.into();
        self.commands
            .retain(|e| !(e.subject == subject && e.kind == kind));
        self.commands.push(CommandEntry {
            subject,
            kind,
            template: template.to_string(),
        });
    }

    /// Store a response pattern, replacing any existing one for the same key
    pub fn set_pattern(&mut self, subject: impl Into<Subject>, kind: CommandKind, pattern: &str) {
        let subject = subject.into();
        self.patterns
            .retain(|e| !(e.subject == subject && e.kind == kind));
        self.patterns.push(PatternEntry {
            subject,
            kind,
            pattern: pattern.to_string(),
        });
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            _ => Err(SettingsError::UnsupportedFormat(path.display().to_string())),
        }
    }
}
