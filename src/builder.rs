//! Modifier templates.
//!
//! Game data describes modifiers declaratively: stat names may contain
//! `{placeholder}`s and values may refer to numbers captured from a parsed
//! stat line. A template goes through two explicit stages before it becomes
//! a [`Modifier`]:
//!
//! ```text
//! Unresolved<ModifierTemplate> --resolve(&ResolveContext)--> Resolved<ModifierTemplate>
//! Resolved<ModifierTemplate>   --build(&BuildParameters)---> Vec<Modifier>
//! ```
//!
//! All placeholder and capture lookups happen in `resolve`, so `build` only
//! binds the source, entity and form. `Unresolved` has no `build`, so
//! building an unresolved template does not compile.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::modifier::{Constant, Modifier, PerStat, StatReference, ValueFunction};
use crate::selector::Form;
use crate::source::ModifierSource;
use crate::stat::{Entity, Stat};
use crate::value::Value;

/// How a template's value is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTemplate {
    Constant(Value),
    /// The n-th number captured from the parsed line.
    Captured(usize),
    /// `value` per full `per` points of another stat's total.
    PerStat { stat: String, per: f64, value: f64 },
    /// Another stat's total times `factor`.
    StatTotal { stat: String, factor: f64 },
}

/// Declarative description of a modifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierTemplate {
    /// Stat identities, possibly with `{placeholder}`s.
    pub stats: Vec<String>,
    /// Left open for forms chosen by the build parameters.
    pub form: Option<Form>,
    pub value: ValueTemplate,
}

impl ModifierTemplate {
    pub fn new(stat: impl Into<String>, form: Form, value: ValueTemplate) -> Self {
        Self {
            stats: vec![stat.into()],
            form: Some(form),
            value,
        }
    }

    /// A template whose form is supplied at build time.
    pub fn without_form(stat: impl Into<String>, value: ValueTemplate) -> Self {
        Self {
            stats: vec![stat.into()],
            form: None,
            value,
        }
    }

    pub fn and_stat(mut self, stat: impl Into<String>) -> Self {
        self.stats.push(stat.into());
        self
    }

    fn resolve_with(&self, context: &ResolveContext) -> Result<Self, ConfigurationError> {
        let stats = self
            .stats
            .iter()
            .map(|stat| context.substitute(stat))
            .collect::<Result<Vec<_>, _>>()?;
        let value = match &self.value {
            ValueTemplate::Constant(value) => ValueTemplate::Constant(*value),
            ValueTemplate::Captured(index) => ValueTemplate::Constant(context.captured(*index)?),
            ValueTemplate::PerStat { stat, per, value } => ValueTemplate::PerStat {
                stat: context.substitute(stat)?,
                per: *per,
                value: *value,
            },
            ValueTemplate::StatTotal { stat, factor } => ValueTemplate::StatTotal {
                stat: context.substitute(stat)?,
                factor: *factor,
            },
        };
        Ok(Self {
            stats,
            form: self.form,
            value,
        })
    }

    fn build_with(&self, parameters: &BuildParameters) -> Result<Modifier, ConfigurationError> {
        let form = parameters
            .form
            .or(self.form)
            .ok_or(ConfigurationError::MissingForm)?;
        if self.stats.is_empty() {
            return Err(ConfigurationError::EmptyStats);
        }
        let stats = self
            .stats
            .iter()
            .map(|identity| parameters.stat(identity))
            .collect();
        let value: Arc<dyn ValueFunction> = match &self.value {
            ValueTemplate::Constant(value) => Arc::new(Constant(*value)),
            ValueTemplate::Captured(index) => {
                return Err(ConfigurationError::MissingCapturedValue(*index))
            }
            ValueTemplate::PerStat { stat, per, .. } if *per == 0.0 || !per.is_finite() => {
                return Err(ConfigurationError::InvalidPerStatDivisor(stat.clone()))
            }
            ValueTemplate::PerStat { stat, per, value } => Arc::new(PerStat {
                stat: parameters.stat(stat),
                per: *per,
                value: *value,
            }),
            ValueTemplate::StatTotal { stat, factor } => {
                Arc::new(StatReference::total(parameters.stat(stat)).times(*factor))
            }
        };
        Ok(Modifier::from_arc(
            stats,
            form,
            value,
            parameters.source.clone(),
        ))
    }
}

/// Placeholder values and captured numbers used to resolve templates.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    placeholders: HashMap<String, String>,
    captured: Vec<Value>,
}

impl ResolveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placeholder(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.placeholders.insert(name.into(), value.into());
        self
    }

    pub fn with_captured(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.captured.extend(values);
        self
    }

    fn captured(&self, index: usize) -> Result<Value, ConfigurationError> {
        self.captured
            .get(index)
            .copied()
            .ok_or(ConfigurationError::MissingCapturedValue(index))
    }

    /// Replace every `{name}` in `template`.
    fn substitute(&self, template: &str) -> Result<String, ConfigurationError> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            result.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| ConfigurationError::UnresolvedPlaceholder(after.to_string()))?;
            let name = &after[..close];
            let value = self
                .placeholders
                .get(name)
                .ok_or_else(|| ConfigurationError::UnresolvedPlaceholder(name.to_string()))?;
            result.push_str(value);
            rest = &after[close + 1..];
        }
        result.push_str(rest);
        Ok(result)
    }
}

/// Binds resolved templates to where their modifiers come from.
///
/// Stat names are looked up in the known definitions first, so built
/// modifiers carry the declared data type, companions and markers. Unknown
/// names become plain [`crate::stat::DataType::Number`] stats.
#[derive(Debug, Clone)]
pub struct BuildParameters {
    pub source: ModifierSource,
    pub entity: Entity,
    /// Overrides the template's form when set.
    pub form: Option<Form>,
    definitions: HashMap<(String, Entity), Stat>,
}

impl BuildParameters {
    pub fn new(source: ModifierSource, entity: Entity) -> Self {
        Self {
            source,
            entity,
            form: None,
            definitions: HashMap::new(),
        }
    }

    pub fn with_form(mut self, form: Form) -> Self {
        self.form = Some(form);
        self
    }

    /// Resolve stat names through `stats`, e.g. [`crate::Calculator::definitions`].
    pub fn with_definitions(mut self, stats: impl IntoIterator<Item = Stat>) -> Self {
        for stat in stats {
            self.definitions
                .insert((stat.identity().to_string(), stat.entity()), stat);
        }
        self
    }

    fn stat(&self, identity: &str) -> Stat {
        self.definitions
            .get(&(identity.to_string(), self.entity))
            .cloned()
            .unwrap_or_else(|| Stat::builder(identity).entity(self.entity).build())
    }
}

/// A template that still contains placeholders or captured-value references.
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved<T>(T);

/// A template ready to be built.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T>(T);

impl<T> Unresolved<T> {
    pub fn new(template: T) -> Self {
        Unresolved(template)
    }

    pub fn template(&self) -> &T {
        &self.0
    }
}

impl<T> Resolved<T> {
    pub fn template(&self) -> &T {
        &self.0
    }
}

impl Unresolved<ModifierTemplate> {
    /// Substitute placeholders and captured values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use modcalc::builder::{
    ///     BuildParameters, ModifierTemplate, ResolveContext, Unresolved, ValueTemplate,
    /// };
    /// use modcalc::{Entity, Form, ModifierSource, Value};
    ///
    /// let template = Unresolved::new(ModifierTemplate::new(
    ///     "{element}Resistance",
    ///     Form::BaseAdd,
    ///     ValueTemplate::Captured(0),
    /// ));
    /// let context = ResolveContext::new()
    ///     .with_placeholder("element", "Fire")
    ///     .with_captured([Value::scalar(30.0)]);
    ///
    /// let resolved = template.resolve(&context).unwrap();
    /// let modifiers = resolved
    ///     .build(&BuildParameters::new(ModifierSource::Given, Entity::Character))
    ///     .unwrap();
    /// assert_eq!(modifiers[0].stats()[0].identity(), "FireResistance");
    /// ```
    pub fn resolve(&self, context: &ResolveContext) -> Result<Resolved<ModifierTemplate>, ConfigurationError> {
        self.0.resolve_with(context).map(Resolved)
    }
}

impl Unresolved<Vec<ModifierTemplate>> {
    /// Resolve every template; the first failure aborts.
    pub fn resolve(
        &self,
        context: &ResolveContext,
    ) -> Result<Resolved<Vec<ModifierTemplate>>, ConfigurationError> {
        self.0
            .iter()
            .map(|template| template.resolve_with(context))
            .collect::<Result<Vec<_>, _>>()
            .map(Resolved)
    }
}

impl Resolved<ModifierTemplate> {
    pub fn build(&self, parameters: &BuildParameters) -> Result<Vec<Modifier>, ConfigurationError> {
        Ok(vec![self.0.build_with(parameters)?])
    }
}

impl Resolved<Vec<ModifierTemplate>> {
    pub fn build(&self, parameters: &BuildParameters) -> Result<Vec<Modifier>, ConfigurationError> {
        self.0
            .iter()
            .map(|template| template.build_with(parameters))
            .collect()
    }
}
