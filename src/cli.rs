//! Command-line interface
//!
//! One-shot mode: every subcommand loads the configuration, enables the
//! driver, runs, then disables it again.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gcodelink_communication::{DriverState, GcodeDriver, MoveTarget};
use gcodelink_core::{ActuatorValue, Subject};
use gcodelink_settings::Config;
use std::path::{Path, PathBuf};

/// GCodeLink - drive a G-code motion controller from the command line
#[derive(Parser, Debug)]
#[command(name = "gcodelink")]
#[command(about = "Template-driven G-code command/response engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (.toml or .json); defaults to the platform config dir
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Home all axes
    Home,

    /// Read a value from an actuator or sensor
    Read {
        /// Actuator name
        subject: String,
    },

    /// Write a value to an actuator (true/false/on/off, a number, or text)
    Actuate {
        subject: String,
        value: String,
    },

    /// Move to a position; unset axes are left where they are
    Move {
        /// Head or nozzle name; omit for the machine default
        subject: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        x: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        y: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        z: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        rotation: Option<f64>,
        #[arg(long)]
        feed_rate: Option<f64>,
    },

    /// Send one raw command line and print the reply
    Send { line: String },

    /// Write the stock configuration to a file
    InitConfig {
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a parsed command line, returning text to print
pub async fn run(cli: Cli) -> Result<Option<String>> {
    if let Commands::InitConfig { path, force } = &cli.command {
        return init_config(path, *force).map(Some);
    }

    let config = load_config(cli.config.as_deref())?;
    let driver = GcodeDriver::from_params(
        &config.connection_params(),
        config.build_registry()?,
        config.driver_settings(),
    )?;

    driver.enable().await.context("Failed to enable driver")?;
    let result = execute(&driver, &cli.command).await;

    let disabled = driver.disable().await;
    if driver.state() != DriverState::Disconnected {
        driver.disconnect().await?;
    }

    let output = result?;
    disabled?;
    Ok(output)
}

async fn execute(driver: &GcodeDriver, command: &Commands) -> Result<Option<String>> {
    match command {
        Commands::Home => {
            driver.home().await?;
            Ok(None)
        }
        Commands::Read { subject } => Ok(Some(driver.read(subject.as_str()).await?)),
        Commands::Actuate { subject, value } => {
            driver
                .actuate(subject.as_str(), &ActuatorValue::parse(value))
                .await?;
            Ok(None)
        }
        Commands::Move {
            subject,
            x,
            y,
            z,
            rotation,
            feed_rate,
        } => {
            let target = MoveTarget {
                x: *x,
                y: *y,
                z: *z,
                rotation: *rotation,
                feed_rate: *feed_rate,
            };
            let subject = subject.as_deref().map(Subject::from).unwrap_or_default();
            driver.move_to(subject, &target).await?;
            Ok(None)
        }
        Commands::Send { line } => {
            let result = driver.send_command(line).await?;
            Ok(Some(result.lines.join("\n")))
        }
        Commands::InitConfig { .. } => Ok(None),
    }
}

fn init_config(path: &Path, force: bool) -> Result<String> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save_to_file(path)?;
    Ok(format!("Wrote default configuration to {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Config::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()));
    }

    let path = Config::default_path()?;
    if path.exists() {
        Config::load_from_file(&path).with_context(|| format!("Failed to load {}", path.display()))
    } else {
        tracing::info!("No config at {}, using the stock dialect", path.display());
        Ok(Config::default())
    }
}
