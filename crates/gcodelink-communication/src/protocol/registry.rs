//! Command template registry
//!
//! Stores one template per (subject, kind) and, for read-capable kinds, one
//! response pattern. Lookups try the subject first and fall back to the
//! global default for the same kind.

use super::matcher::ResponsePattern;
use super::template::CommandTemplate;
use gcodelink_core::{CommandKind, ConfigError, Result, Subject};
use std::collections::BTreeMap;

type Key = (Subject, CommandKind);

/// Registry of command templates and response patterns
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<Key, CommandTemplate>,
    patterns: BTreeMap<Key, ResponsePattern>,
    error_pattern: Option<ResponsePattern>,
    locked: bool,
}

impl CommandRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite a template
    ///
    /// An empty template removes the entry, so a subject can fall back to
    /// the global default again.
    pub fn set_command(
        &mut self,
        subject: impl Into<Subject>,
        kind: CommandKind,
        template: &str,
    ) -> Result<()> {
        self.ensure_unlocked()?;
        let key = (subject.into(), kind);
        if template.trim().is_empty() {
            self.commands.remove(&key);
            return Ok(());
        }
        let template = CommandTemplate::parse(template)?;
        self.commands.insert(key, template);
        Ok(())
    }

    /// Store or overwrite a response pattern for a read-capable kind
    ///
    /// The pattern is compiled here; invalid text is rejected immediately.
    pub fn set_pattern(
        &mut self,
        subject: impl Into<Subject>,
        kind: CommandKind,
        pattern: &str,
    ) -> Result<()> {
        self.ensure_unlocked()?;
        if !kind.is_read() {
            return Err(ConfigError::PatternNotSupported { kind }.into());
        }
        let key = (subject.into(), kind);
        if pattern.is_empty() {
            self.patterns.remove(&key);
            return Ok(());
        }
        let pattern = ResponsePattern::compile(pattern)?;
        self.patterns.insert(key, pattern);
        Ok(())
    }

    /// Set or clear the pattern recognising error replies
    pub fn set_error_pattern(&mut self, pattern: Option<&str>) -> Result<()> {
        self.ensure_unlocked()?;
        self.error_pattern = match pattern.filter(|p| !p.is_empty()) {
            Some(p) => Some(ResponsePattern::compile(p)?),
            None => None,
        };
        Ok(())
    }

    /// Most specific template for (subject, kind)
    pub fn resolve_command(&self, subject: &Subject, kind: CommandKind) -> Result<&CommandTemplate> {
        self.find_command(subject, kind).ok_or_else(|| {
            ConfigError::MissingCommand {
                subject: subject.clone(),
                kind,
            }
            .into()
        })
    }

    /// Most specific template for (subject, kind), if any
    pub fn find_command(&self, subject: &Subject, kind: CommandKind) -> Option<&CommandTemplate> {
        lookup(&self.commands, subject, kind)
    }

    /// Most specific response pattern for (subject, kind)
    pub fn resolve_pattern(&self, subject: &Subject, kind: CommandKind) -> Result<&ResponsePattern> {
        lookup(&self.patterns, subject, kind).ok_or_else(|| {
            ConfigError::MissingPattern {
                subject: subject.clone(),
                kind,
            }
            .into()
        })
    }

    /// Template and pattern for a read command
    ///
    /// The template is resolved first: a pattern without a template reports
    /// `MissingCommand`, a template without a pattern `MissingPattern`.
    pub fn resolve_read(
        &self,
        subject: &Subject,
        kind: CommandKind,
    ) -> Result<(&CommandTemplate, &ResponsePattern)> {
        let command = self.resolve_command(subject, kind)?;
        let pattern = self.resolve_pattern(subject, kind)?;
        Ok((command, pattern))
    }

    /// Pattern recognising error replies
    pub fn error_pattern(&self) -> Option<&ResponsePattern> {
        self.error_pattern.as_ref()
    }

    /// Registered templates, in key order
    pub fn commands(&self) -> impl Iterator<Item = (&Subject, CommandKind, &CommandTemplate)> {
        self.commands.iter().map(|((s, k), t)| (s, *k, t))
    }

    /// Registered patterns, in key order
    pub fn patterns(&self) -> impl Iterator<Item = (&Subject, CommandKind, &ResponsePattern)> {
        self.patterns.iter().map(|((s, k), p)| (s, *k, p))
    }

    /// Refuse further changes
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Allow changes again
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Check if the registry refuses changes
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(ConfigError::RegistryLocked.into());
        }
        Ok(())
    }
}

fn lookup<'a, V>(map: &'a BTreeMap<Key, V>, subject: &Subject, kind: CommandKind) -> Option<&'a V> {
    map.get(&(subject.clone(), kind)).or_else(|| {
        if subject.is_global() {
            None
        } else {
            map.get(&(Subject::Global, kind))
        }
    })
}
