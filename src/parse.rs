//! Stat-line parsing boundary.
//!
//! Parsers turn modifier lines such as `"+40 to maximum Life"` into
//! [`Modifier`]s. The calculator only consumes [`ParseResult`]s; how a
//! parser matches lines is its own business. [`TemplateParser`] is a small
//! pattern-based implementation backed by [`crate::builder`] templates.

use crate::builder::{BuildParameters, ModifierTemplate, ResolveContext, Unresolved};
use crate::error::ConfigurationError;
use crate::modifier::Modifier;
use crate::source::ModifierSource;
use crate::stat::{Entity, Stat};
use crate::value::Value;

/// One line to parse and where it comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserParameter {
    pub modifier_line: String,
    pub source: ModifierSource,
    pub entity: Entity,
}

impl ParserParameter {
    pub fn new(modifier_line: impl Into<String>, source: ModifierSource) -> Self {
        Self {
            modifier_line: modifier_line.into(),
            source,
            entity: Entity::Character,
        }
    }

    pub fn for_entity(mut self, entity: Entity) -> Self {
        self.entity = entity;
        self
    }
}

/// Output of parsing one or more lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    /// Lines that could not be understood.
    pub failed_lines: Vec<String>,
    /// Parts of failed lines left unmatched.
    pub remaining_substrings: Vec<String>,
    pub modifiers: Vec<Modifier>,
}

impl ParseResult {
    pub fn success(modifiers: Vec<Modifier>) -> Self {
        Self {
            modifiers,
            ..Self::default()
        }
    }

    pub fn failure(line: impl Into<String>, remaining: impl Into<String>) -> Self {
        Self {
            failed_lines: vec![line.into()],
            remaining_substrings: vec![remaining.into()],
            modifiers: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_lines.is_empty()
    }

    /// Concatenate several results.
    pub fn aggregate(results: impl IntoIterator<Item = ParseResult>) -> Self {
        results
            .into_iter()
            .fold(ParseResult::default(), |mut total, result| {
                total.failed_lines.extend(result.failed_lines);
                total.remaining_substrings.extend(result.remaining_substrings);
                total.modifiers.extend(result.modifiers);
                total
            })
    }
}

/// Turns modifier lines into modifiers.
///
/// Parsers run on worker threads, never on the calculation thread.
pub trait Parser: Send + Sync {
    fn parse(&self, parameter: &ParserParameter) -> ParseResult;

    /// Parse several lines and aggregate the results.
    fn parse_all(&self, parameters: &[ParserParameter]) -> ParseResult {
        ParseResult::aggregate(parameters.iter().map(|p| self.parse(p)))
    }
}

/// A literal pattern where each `#` captures a number.
#[derive(Debug, Clone, PartialEq)]
struct LinePattern {
    literals: Vec<String>,
}

impl LinePattern {
    fn new(pattern: &str) -> Self {
        Self {
            literals: pattern.split('#').map(str::to_string).collect(),
        }
    }

    /// Captured numbers, or `None` if `line` does not match.
    fn captures(&self, line: &str) -> Option<Vec<Value>> {
        let (first, rest_literals) = self.literals.split_first()?;
        let mut rest = line.strip_prefix(first.as_str())?;
        let mut captured = Vec::with_capacity(rest_literals.len());
        for literal in rest_literals {
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
                .unwrap_or(rest.len());
            let number: f64 = rest[..end].parse().ok()?;
            captured.push(Value::scalar(number));
            rest = rest[end..].strip_prefix(literal.as_str())?;
        }
        rest.is_empty().then_some(captured)
    }
}

/// Matches lines against `#` patterns and builds the associated templates.
///
/// # Examples
///
/// ```rust
/// use modcalc::builder::{ModifierTemplate, ValueTemplate};
/// use modcalc::parse::{Parser, ParserParameter, TemplateParser};
/// use modcalc::{Form, ModifierSource};
///
/// let parser = TemplateParser::new().with_rule(
///     "+# to maximum Life",
///     vec![ModifierTemplate::new("Life", Form::BaseAdd, ValueTemplate::Captured(0))],
/// );
///
/// let result = parser.parse(&ParserParameter::new("+40 to maximum Life", ModifierSource::Given));
/// assert!(result.is_success());
/// assert_eq!(result.modifiers.len(), 1);
///
/// let result = parser.parse(&ParserParameter::new("Cannot be Stunned", ModifierSource::Given));
/// assert_eq!(result.failed_lines, vec!["Cannot be Stunned"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateParser {
    rules: Vec<(LinePattern, Unresolved<Vec<ModifierTemplate>>)>,
    definitions: Vec<Stat>,
}

impl TemplateParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Rules are tried in insertion order.
    pub fn with_rule(mut self, pattern: &str, templates: Vec<ModifierTemplate>) -> Self {
        self.rules
            .push((LinePattern::new(pattern), Unresolved::new(templates)));
        self
    }

    /// Build modifiers for these stat definitions instead of plain stats.
    pub fn with_definitions(mut self, stats: impl IntoIterator<Item = Stat>) -> Self {
        self.definitions.extend(stats);
        self
    }

    fn build(
        &self,
        templates: &Unresolved<Vec<ModifierTemplate>>,
        captured: Vec<Value>,
        parameter: &ParserParameter,
    ) -> Result<Vec<Modifier>, ConfigurationError> {
        let context = ResolveContext::new().with_captured(captured);
        let parameters = BuildParameters::new(parameter.source.clone(), parameter.entity)
            .with_definitions(self.definitions.iter().cloned());
        templates.resolve(&context)?.build(&parameters)
    }
}

impl Parser for TemplateParser {
    fn parse(&self, parameter: &ParserParameter) -> ParseResult {
        let line = parameter.modifier_line.trim();
        for (pattern, templates) in &self.rules {
            let Some(captured) = pattern.captures(line) else {
                continue;
            };
            return match self.build(templates, captured, parameter) {
                Ok(modifiers) => ParseResult::success(modifiers),
                Err(_) => ParseResult::failure(line, line),
            };
        }
        ParseResult::failure(line, line)
    }
}
