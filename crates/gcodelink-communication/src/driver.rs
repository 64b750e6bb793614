//! G-code driver
//!
//! Typed machine operations (home, move, actuate, read) built from the
//! command registry and run through the task serializer. Templates are
//! resolved and filled before admission, so a configuration error never
//! reaches the wire.

use crate::communication::{open_channel, Channel, ConnectionParams};
use crate::protocol::{
    CommandRegistry, CommandTemplate, ExchangeResult, ProtocolSession, ResponsePattern,
    TaskSerializer, TemplateVars,
};
use gcodelink_core::{ActuatorValue, CommandKind, ConfigError, Error, Result, Subject};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Driver timing and connection policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Deadline for each exchange
    pub timeout: Duration,
    /// Settle time after the channel opens, before the first command
    pub connect_wait: Duration,
    /// Keep the channel open while the driver is disabled
    pub keep_alive: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            connect_wait: Duration::from_millis(3000),
            keep_alive: true,
        }
    }
}

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Channel closed
    Disconnected,
    /// Channel open, machine not initialized
    Connected,
    /// Initialized; the registry is locked
    Enabled,
}

/// Target of a move; unset axes are left out of the command
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveTarget {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub rotation: Option<f64>,
    pub feed_rate: Option<f64>,
}

impl MoveTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn x(mut self, x: f64) -> Self {
        self.x = Some(x);
        self
    }

    pub fn y(mut self, y: f64) -> Self {
        self.y = Some(y);
        self
    }

    pub fn z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    pub fn rotation(mut self, rotation: f64) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn feed_rate(mut self, feed_rate: f64) -> Self {
        self.feed_rate = Some(feed_rate);
        self
    }

    fn apply(&self, vars: &mut TemplateVars) {
        let axes = [
            ("X", self.x),
            ("Y", self.y),
            ("Z", self.z),
            ("Rotation", self.rotation),
            ("FeedRate", self.feed_rate),
        ];
        for (name, value) in axes {
            if let Some(value) = value {
                vars.set(name, value);
            }
        }
    }
}

/// One command line and the pattern to apply to its replies
#[derive(Debug, Clone)]
struct Step {
    command: String,
    pattern: Option<ResponsePattern>,
}

/// Fully resolved work for one serialized operation
#[derive(Debug, Clone, Default)]
struct Plan {
    steps: Vec<Step>,
    error_pattern: Option<ResponsePattern>,
}

impl Plan {
    fn push_lines(&mut self, lines: Vec<String>, pattern: Option<&ResponsePattern>) {
        self.steps.extend(lines.into_iter().map(|command| Step {
            command,
            pattern: pattern.cloned(),
        }));
    }
}

/// Template-driven G-code driver
pub struct GcodeDriver {
    registry: Arc<RwLock<CommandRegistry>>,
    serializer: TaskSerializer,
    settings: DriverSettings,
    state: Arc<RwLock<DriverState>>,
}

impl GcodeDriver {
    /// Create a driver over an unopened channel
    pub fn new(channel: Box<dyn Channel>, registry: CommandRegistry, settings: DriverSettings) -> Self {
        let session = ProtocolSession::new(channel).with_timeout(settings.timeout);
        Self {
            registry: Arc::new(RwLock::new(registry)),
            serializer: TaskSerializer::new(session),
            settings,
            state: Arc::new(RwLock::new(DriverState::Disconnected)),
        }
    }

    /// Create a driver for the given transport parameters
    pub fn from_params(
        params: &ConnectionParams,
        registry: CommandRegistry,
        settings: DriverSettings,
    ) -> Result<Self> {
        Ok(Self::new(open_channel(params)?, registry, settings))
    }

    /// Current lifecycle state
    pub fn state(&self) -> DriverState {
        *self.state.read()
    }

    /// Driver settings
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Snapshot of the registry
    pub fn registry(&self) -> CommandRegistry {
        self.registry.read().clone()
    }

    /// Store a template; refused while enabled
    pub fn set_command(
        &self,
        subject: impl Into<Subject>,
        kind: CommandKind,
        template: &str,
    ) -> Result<()> {
        self.registry.write().set_command(subject, kind, template)
    }

    /// Store a response pattern; refused while enabled
    pub fn set_pattern(
        &self,
        subject: impl Into<Subject>,
        kind: CommandKind,
        pattern: &str,
    ) -> Result<()> {
        self.registry.write().set_pattern(subject, kind, pattern)
    }

    /// Set the error-line pattern; refused while enabled
    pub fn set_error_pattern(&self, pattern: Option<&str>) -> Result<()> {
        self.registry.write().set_error_pattern(pattern)
    }

    /// Open the channel and wait for the controller to settle
    pub async fn connect(&self) -> Result<()> {
        let connect_wait = self.settings.connect_wait;
        self.serializer
            .execute(move |session| {
                Box::pin(async move { open_session(session, connect_wait).await })
            })
            .await?;
        self.set_state_at_least(DriverState::Connected);
        Ok(())
    }

    /// Send the setup sequence: connect lines, enable lines, home, wait
    ///
    /// Connect, enable and wait templates are optional; home is required.
    /// The whole sequence holds the channel and stops at the first failure.
    pub async fn initialize(&self) -> Result<()> {
        let plan = self.initialize_plan()?;
        self.run(plan).await?;
        Ok(())
    }

    /// Connect if needed, initialize, and lock the registry
    ///
    /// The state is checked once the channel is held, so concurrent callers
    /// run the setup sequence only once.
    pub async fn enable(&self) -> Result<()> {
        if self.state() == DriverState::Enabled {
            return Ok(());
        }

        let plan = self.initialize_plan()?;
        self.registry.write().lock();
        tracing::info!("Enabling driver ({} setup commands)", plan.steps.len());

        let timeout = self.settings.timeout;
        let connect_wait = self.settings.connect_wait;
        let state = self.state.clone();
        let registry = self.registry.clone();

        let result = self
            .serializer
            .execute(move |session| {
                Box::pin(async move {
                    if *state.read() == DriverState::Enabled {
                        return Ok(false);
                    }
                    let outcome = async {
                        open_session(session, connect_wait).await?;
                        run_steps(session, plan, timeout).await
                    }
                    .await;

                    let mut current = state.write();
                    match outcome {
                        Ok(_) => {
                            registry.write().lock();
                            *current = DriverState::Enabled;
                            Ok(true)
                        }
                        Err(e) => {
                            if session.is_connected() && *current == DriverState::Disconnected {
                                *current = DriverState::Connected;
                            }
                            Err(e)
                        }
                    }
                })
            })
            .await;

        match result {
            Ok(true) => {
                tracing::info!("Driver enabled");
                Ok(())
            }
            Ok(false) => {
                tracing::debug!("Driver already enabled");
                Ok(())
            }
            Err(e) => {
                if self.state() != DriverState::Enabled {
                    self.registry.write().unlock();
                }
                tracing::error!("Enable failed: {}", e);
                Err(e)
            }
        }
    }

    /// Send the disable command, unlock the registry, and close the channel
    /// unless keep-alive is set
    ///
    /// Cleanup always completes; the first error is returned afterwards.
    pub async fn disable(&self) -> Result<()> {
        let was_enabled = self.state() == DriverState::Enabled;
        let mut outcome = Ok(());

        if was_enabled {
            let plan = self.optional_plan(&[CommandKind::Disable]);
            if !plan.steps.is_empty() {
                if let Err(e) = self.run(plan).await {
                    if e.is_connection_error() {
                        tracing::warn!("Disable command skipped, channel closed: {}", e);
                    } else {
                        outcome = Err(e);
                    }
                }
            }
            self.registry.write().unlock();
            *self.state.write() = DriverState::Connected;
            tracing::info!("Driver disabled");
        }

        if !self.settings.keep_alive {
            self.disconnect().await?;
        }
        outcome
    }

    /// Close the channel; tolerates a channel that is already closed
    pub async fn disconnect(&self) -> Result<()> {
        let result = self
            .serializer
            .execute(|session| Box::pin(async move { session.disconnect().await }))
            .await;
        if let Err(e) = &result {
            tracing::warn!("Error while disconnecting: {}", e);
        }
        self.registry.write().unlock();
        *self.state.write() = DriverState::Disconnected;
        result
    }

    /// Run the homing command
    pub async fn home(&self) -> Result<()> {
        let plan = self.required_plan(&Subject::Global, CommandKind::Home, &TemplateVars::new())?;
        self.run(plan).await?;
        Ok(())
    }

    /// Block until the controller reports queued motion complete
    pub async fn wait_for_idle(&self) -> Result<()> {
        let plan = self.required_plan(
            &Subject::Global,
            CommandKind::MoveToComplete,
            &TemplateVars::new(),
        )?;
        self.run(plan).await?;
        Ok(())
    }

    /// Move `subject` to `target`, then wait for completion when a wait
    /// command is configured
    pub async fn move_to(&self, subject: impl Into<Subject>, target: &MoveTarget) -> Result<()> {
        let subject = subject.into();
        let mut vars = subject_vars(&subject);
        target.apply(&mut vars);

        let mut plan = self.required_plan(&subject, CommandKind::MoveTo, &vars)?;
        let wait = self.optional_plan_for(&subject, &[CommandKind::MoveToComplete], &vars);
        plan.steps.extend(wait.steps);

        self.run(plan).await?;
        Ok(())
    }

    /// Write a value to an actuator
    pub async fn actuate(&self, subject: impl Into<Subject>, value: &ActuatorValue) -> Result<()> {
        let subject = subject.into();
        let mut vars = subject_vars(&subject);
        match value {
            ActuatorValue::Boolean(on) => {
                vars.set(if *on { "True" } else { "False" }, "");
                vars.set("Value", if *on { 1.0 } else { 0.0 });
            }
            ActuatorValue::Double(v) => vars.set("Value", *v),
            ActuatorValue::Text(v) => vars.set("Value", v.as_str()),
        }

        let plan = self.required_plan(&subject, value.command_kind(), &vars)?;
        self.run(plan).await?;
        Ok(())
    }

    /// Read a value from an actuator or sensor
    ///
    /// Fails with `MissingCommand`/`MissingPattern` before sending anything
    /// if configuration is incomplete, and with `NoMatch` if the terminal
    /// marker arrived without any line matching the pattern.
    pub async fn read(&self, subject: impl Into<Subject>) -> Result<String> {
        let subject = subject.into();
        let plan = {
            let registry = self.registry.read();
            let (template, pattern) = registry.resolve_read(&subject, CommandKind::ActuatorRead)?;
            let mut plan = Plan {
                error_pattern: registry.error_pattern().cloned(),
                ..Default::default()
            };
            plan.push_lines(fill_required(template, &subject_vars(&subject))?, Some(pattern));
            plan
        };

        let mut results = self.run(plan).await?;
        let result = match results.iter().position(|r| r.matched) {
            Some(index) => results.swap_remove(index),
            None => results
                .pop()
                .ok_or_else(|| Error::other("read produced no exchanges"))?,
        };
        result.into_value()
    }

    /// Send one raw command line and wait for the terminal marker
    pub async fn send_command(&self, command: &str) -> Result<ExchangeResult> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ConfigError::InvalidTemplate {
                template: command.to_string(),
                reason: "empty command line".to_string(),
            }
            .into());
        }
        let plan = Plan {
            steps: vec![Step {
                command: command.to_string(),
                pattern: None,
            }],
            error_pattern: self.registry.read().error_pattern().cloned(),
        };
        self.run(plan)
            .await?
            .pop()
            .ok_or_else(|| Error::other("command produced no exchange"))
    }

    fn initialize_plan(&self) -> Result<Plan> {
        let vars = TemplateVars::new();
        let mut plan = self.optional_plan(&[CommandKind::Connect, CommandKind::Enable]);
        let home = self.required_plan(&Subject::Global, CommandKind::Home, &vars)?;
        plan.steps.extend(home.steps);
        plan.steps
            .extend(self.optional_plan(&[CommandKind::MoveToComplete]).steps);
        Ok(plan)
    }

    fn required_plan(&self, subject: &Subject, kind: CommandKind, vars: &TemplateVars) -> Result<Plan> {
        let registry = self.registry.read();
        let template = registry.resolve_command(subject, kind)?;
        let mut plan = Plan {
            error_pattern: registry.error_pattern().cloned(),
            ..Default::default()
        };
        plan.push_lines(fill_required(template, vars)?, None);
        Ok(plan)
    }

    fn optional_plan(&self, kinds: &[CommandKind]) -> Plan {
        self.optional_plan_for(&Subject::Global, kinds, &TemplateVars::new())
    }

    fn optional_plan_for(&self, subject: &Subject, kinds: &[CommandKind], vars: &TemplateVars) -> Plan {
        let registry = self.registry.read();
        let mut plan = Plan {
            error_pattern: registry.error_pattern().cloned(),
            ..Default::default()
        };
        for kind in kinds {
            match registry.find_command(subject, *kind) {
                Some(template) => {
                    let lines = template.fill(vars);
                    if lines.is_empty() {
                        tracing::debug!("{} command filled to nothing, skipping", kind);
                    }
                    plan.push_lines(lines, None);
                }
                None => tracing::debug!("No {} command configured, skipping", kind),
            }
        }
        plan
    }

    async fn run(&self, plan: Plan) -> Result<Vec<ExchangeResult>> {
        let timeout = self.settings.timeout;
        self.serializer
            .execute(move |session| Box::pin(run_steps(session, plan, timeout)))
            .await
    }

    fn set_state_at_least(&self, state: DriverState) {
        let mut current = self.state.write();
        if *current == DriverState::Disconnected {
            *current = state;
        }
    }
}

async fn open_session(session: &mut ProtocolSession, connect_wait: Duration) -> Result<()> {
    if session.is_connected() {
        return Ok(());
    }
    session.connect().await?;
    if !connect_wait.is_zero() {
        tracing::debug!("Waiting {:?} for {} to settle", connect_wait, session.channel_name());
        tokio::time::sleep(connect_wait).await;
    }
    Ok(())
}

async fn run_steps(
    session: &mut ProtocolSession,
    plan: Plan,
    timeout: Duration,
) -> Result<Vec<ExchangeResult>> {
    session.set_timeout(timeout);
    session.set_error_pattern(plan.error_pattern);

    let mut results = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        results.push(session.exchange(&step.command, step.pattern.as_ref()).await?);
    }
    Ok(results)
}

/// Fill a template that must produce at least one command line
fn fill_required(template: &CommandTemplate, vars: &TemplateVars) -> Result<Vec<String>> {
    let lines = template.fill(vars);
    if lines.is_empty() {
        let unbound: Vec<String> = template
            .placeholders()
            .into_iter()
            .filter(|name| vars.get(name).is_none())
            .collect();
        return Err(ConfigError::InvalidTemplate {
            template: template.as_str().to_string(),
            reason: format!(
                "template produced no command lines (unbound: {})",
                unbound.join(", ")
            ),
        }
        .into());
    }
    Ok(lines)
}

fn subject_vars(subject: &Subject) -> TemplateVars {
    let mut vars = TemplateVars::new();
    if let Some(name) = subject.name() {
        vars.set("Id", name);
        vars.set("Name", name);
    }
    vars
}
