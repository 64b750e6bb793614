//! Command templates
//!
//! A template is command text with `{Name}` or `{Name:format}` placeholders.
//! The format is literal text around one printf-style conversion, so
//! `{X:X%.4f}` with `X = 10` becomes `X10.0000`. Placeholders whose variable
//! is not supplied are dropped, letting a single move template serve moves
//! on any subset of axes.

use gcodelink_core::{ConfigError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(\w+)(?::([^{}]*))?\}").expect("placeholder regex is valid")
});

/// Value bound to a template variable
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    /// Numeric value, formatted by `%d`/`%f`
    Number(f64),
    /// Text value, substituted verbatim
    Text(String),
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateValue::Number(value) => write!(f, "{}", value),
            TemplateValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        TemplateValue::Number(value)
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::Text(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::Text(value)
    }
}

/// Variables available while filling a template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVars {
    values: BTreeMap<String, TemplateValue>,
}

impl TemplateVars {
    /// Create an empty variable set
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Bind a variable
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<TemplateValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.values.get(name)
    }
}

/// Validated command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
}

impl CommandTemplate {
    /// Validate placeholder syntax
    ///
    /// Braces that are not part of a well-formed placeholder are rejected.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let stripped = PLACEHOLDER_REGEX.replace_all(&source, "");
        if stripped.contains('{') || stripped.contains('}') {
            return Err(ConfigError::InvalidTemplate {
                template: source,
                reason: "unbalanced or malformed placeholder".to_string(),
            }
            .into());
        }
        Ok(Self { source })
    }

    /// Template text as registered
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of all placeholders in the template
    pub fn placeholders(&self) -> Vec<String> {
        PLACEHOLDER_REGEX
            .captures_iter(&self.source)
            .map(|cap| cap[1].to_string())
            .collect()
    }

    /// Substitute variables and split into transmit lines
    ///
    /// Each non-blank line of the result is one command on the wire.
    pub fn fill(&self, vars: &TemplateVars) -> Vec<String> {
        let filled = PLACEHOLDER_REGEX.replace_all(&self.source, |cap: &regex::Captures| {
            match vars.get(&cap[1]) {
                Some(value) => match cap.get(2) {
                    Some(format) => apply_format(format.as_str(), value),
                    None => value.to_string(),
                },
                None => String::new(),
            }
        });

        filled
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect()
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Expand printf-style conversions in `format` with `value`
fn apply_format(format: &str, value: &TemplateValue) -> String {
    let mut out = String::with_capacity(format.len() + 8);
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let zero_pad = chars.peek() == Some(&'0');
        if zero_pad {
            chars.next();
        }
        let mut width = String::new();
        while let Some(d) = chars.peek().copied().filter(|d| d.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            precision = Some(digits.parse::<usize>().unwrap_or(0));
        }
        let width = width.parse::<usize>().unwrap_or(0);

        match chars.next() {
            Some('d') => out.push_str(&pad(
                &match value {
                    TemplateValue::Number(n) => format!("{}", n.round() as i64),
                    TemplateValue::Text(t) => t.clone(),
                },
                width,
                zero_pad,
            )),
            Some('f') => out.push_str(&pad(
                &match value {
                    TemplateValue::Number(n) => format!("{:.*}", precision.unwrap_or(6), n),
                    TemplateValue::Text(t) => t.clone(),
                },
                width,
                zero_pad,
            )),
            Some('s') => out.push_str(&pad(&value.to_string(), width, false)),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }

    out
}

fn pad(text: &str, width: usize, zero: bool) -> String {
    if text.len() >= width {
        return text.to_string();
    }
    let fill = width - text.len();
    if zero {
        match text.strip_prefix('-') {
            Some(digits) => format!("-{}{}", "0".repeat(fill), digits),
            None => format!("{}{}", "0".repeat(fill), text),
        }
    } else {
        format!("{}{}", " ".repeat(fill), text)
    }
}
