//! Modifiers and their value functions.
//!
//! A [`Modifier`] contributes to one or more stats with a [`Form`]. Its value
//! is produced by a [`ValueFunction`] evaluated against a
//! [`ValueCalculationContext`], which lets the value read other stats.
//! Modifiers are added and removed in batches described by
//! [`CalculatorUpdate`].

use std::fmt;
use std::sync::Arc;

use crate::context::ValueCalculationContext;
use crate::error::CalculationError;
use crate::selector::{Form, NodeType, PathDefinition};
use crate::source::ModifierSource;
use crate::stat::Stat;
use crate::value::Value;

/// Computes a modifier's value.
///
/// Implementations must be pure: the same context state always yields the
/// same value. Reading other stats through the context records a dependency,
/// so the modifier is re-evaluated when those stats change. Returning
/// [`Value::UNSET`] means the modifier does not apply (e.g. its condition is
/// false).
///
/// # Examples
///
/// ```rust
/// use modcalc::modifier::{Constant, ValueFunction};
/// use modcalc::Value;
///
/// let value = Constant(Value::scalar(10.0));
/// assert_eq!(value.describe(), "10");
/// ```
pub trait ValueFunction: Send + Sync {
    fn calculate(&self, context: &mut ValueCalculationContext<'_>) -> Result<Value, CalculationError>;

    /// Human-readable description for breakdowns and logs.
    fn describe(&self) -> String;
}

/// A fixed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub Value);

impl ValueFunction for Constant {
    fn calculate(&self, _context: &mut ValueCalculationContext<'_>) -> Result<Value, CalculationError> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        self.0.to_string()
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Constant(Value::scalar(value))
    }
}

/// Another stat's node value multiplied by a factor.
#[derive(Debug, Clone)]
pub struct StatReference {
    pub stat: Stat,
    pub node_type: NodeType,
    pub path: PathDefinition,
    pub factor: f64,
}

impl StatReference {
    /// The total of `stat`.
    pub fn total(stat: Stat) -> Self {
        Self {
            stat,
            node_type: NodeType::Total,
            path: PathDefinition::main(),
            factor: 1.0,
        }
    }

    pub fn times(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }
}

impl ValueFunction for StatReference {
    fn calculate(&self, context: &mut ValueCalculationContext<'_>) -> Result<Value, CalculationError> {
        let value = context.get_value(&self.stat, self.node_type, &self.path)?;
        Ok(value * self.factor)
    }

    fn describe(&self) -> String {
        if self.factor == 1.0 {
            format!("{}.{:?}", self.stat, self.node_type)
        } else {
            format!("{} * {}.{:?}", self.factor, self.stat, self.node_type)
        }
    }
}

/// `value` for every full `per` points of a stat's total,
/// e.g. "+1 to maximum Life per 2 Strength". Unset if `per` is zero or not
/// finite.
#[derive(Debug, Clone)]
pub struct PerStat {
    pub stat: Stat,
    pub per: f64,
    pub value: f64,
}

impl ValueFunction for PerStat {
    fn calculate(&self, context: &mut ValueCalculationContext<'_>) -> Result<Value, CalculationError> {
        let per = self.per;
        if per == 0.0 || !per.is_finite() {
            return Ok(Value::UNSET);
        }
        let total = context.get_total(&self.stat)?;
        let value = self.value;
        Ok(total.map(|t| (t / per).floor() * value))
    }

    fn describe(&self) -> String {
        format!("{} per {} {}", self.value, self.per, self.stat)
    }
}

/// Applies `value` only while `condition` is true.
#[derive(Clone)]
pub struct Conditional {
    pub condition: Stat,
    pub value: Arc<dyn ValueFunction>,
}

impl Conditional {
    pub fn new(condition: Stat, value: impl ValueFunction + 'static) -> Self {
        Self {
            condition,
            value: Arc::new(value),
        }
    }
}

impl ValueFunction for Conditional {
    fn calculate(&self, context: &mut ValueCalculationContext<'_>) -> Result<Value, CalculationError> {
        if context.get_total(&self.condition)?.is_true() {
            self.value.calculate(context)
        } else {
            Ok(Value::UNSET)
        }
    }

    fn describe(&self) -> String {
        format!("{} if {}", self.value.describe(), self.condition)
    }
}

/// Closure-backed value function for ad-hoc formulas.
pub struct FnValue<F> {
    description: String,
    function: F,
}

impl<F> FnValue<F>
where
    F: Fn(&mut ValueCalculationContext<'_>) -> Result<Value, CalculationError> + Send + Sync,
{
    pub fn new(description: impl Into<String>, function: F) -> Self {
        Self {
            description: description.into(),
            function,
        }
    }
}

impl<F> ValueFunction for FnValue<F>
where
    F: Fn(&mut ValueCalculationContext<'_>) -> Result<Value, CalculationError> + Send + Sync,
{
    fn calculate(&self, context: &mut ValueCalculationContext<'_>) -> Result<Value, CalculationError> {
        (self.function)(context)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// An immutable contribution to one or more stats.
///
/// Two modifiers are equal when they affect the same stats with the same
/// form and source and share the same value-function instance. Removing a
/// modifier therefore requires a clone of the modifier that was added.
///
/// # Examples
///
/// ```rust
/// use modcalc::{Form, Modifier, ModifierSource, Stat};
///
/// let life = Stat::new("Life");
/// let a = Modifier::constant(life.clone(), Form::BaseAdd, 50.0, ModifierSource::global());
/// let b = Modifier::constant(life, Form::BaseAdd, 50.0, ModifierSource::global());
/// assert_eq!(a, a.clone());
/// assert_ne!(a, b);
/// ```
#[derive(Clone)]
pub struct Modifier {
    stats: Vec<Stat>,
    form: Form,
    value: Arc<dyn ValueFunction>,
    source: ModifierSource,
}

impl Modifier {
    pub fn new(
        stats: Vec<Stat>,
        form: Form,
        value: impl ValueFunction + 'static,
        source: ModifierSource,
    ) -> Self {
        Self::from_arc(stats, form, Arc::new(value), source)
    }

    pub fn from_arc(
        stats: Vec<Stat>,
        form: Form,
        value: Arc<dyn ValueFunction>,
        source: ModifierSource,
    ) -> Self {
        Self {
            stats,
            form,
            value,
            source,
        }
    }

    /// A single-stat modifier with a constant value.
    pub fn constant(stat: Stat, form: Form, value: f64, source: ModifierSource) -> Self {
        Self::new(vec![stat], form, Constant::from(value), source)
    }

    pub fn stats(&self) -> &[Stat] {
        &self.stats
    }

    pub fn form(&self) -> Form {
        self.form
    }

    pub fn value(&self) -> &Arc<dyn ValueFunction> {
        &self.value
    }

    pub fn source(&self) -> &ModifierSource {
        &self.source
    }

    /// The path this modifier is registered on.
    pub fn path(&self) -> PathDefinition {
        PathDefinition::from_source(&self.source)
    }
}

impl PartialEq for Modifier {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
            && self.form == other.form
            && self.stats == other.stats
            && self.source == other.source
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modifier")
            .field("stats", &self.stats)
            .field("form", &self.form)
            .field("value", &format!("<{}>", self.value.describe()))
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats: Vec<String> = self.stats.iter().map(|s| s.to_string()).collect();
        write!(
            f,
            "{:?} {} to {} ({})",
            self.form,
            self.value.describe(),
            stats.join(", "),
            self.source
        )
    }
}

/// A batch of modifier additions and removals applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalculatorUpdate {
    pub added: Vec<Modifier>,
    pub removed: Vec<Modifier>,
}

impl CalculatorUpdate {
    pub fn new(added: Vec<Modifier>, removed: Vec<Modifier>) -> Self {
        Self { added, removed }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn adding(added: Vec<Modifier>) -> Self {
        Self::new(added, Vec::new())
    }

    pub fn removing(removed: Vec<Modifier>) -> Self {
        Self::new(Vec::new(), removed)
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Swap additions and removals.
    pub fn invert(self) -> Self {
        Self {
            added: self.removed,
            removed: self.added,
        }
    }

    /// Combine two updates, `left` first.
    ///
    /// A modifier added on one side and removed on the other cancels out,
    /// one occurrence at a time.
    ///
    /// ```rust
    /// use modcalc::{CalculatorUpdate, Form, Modifier, ModifierSource, Stat};
    ///
    /// let m = Modifier::constant(Stat::new("Life"), Form::BaseAdd, 10.0, ModifierSource::global());
    /// let equip = CalculatorUpdate::adding(vec![m.clone()]);
    /// let unequip = CalculatorUpdate::removing(vec![m]);
    /// assert!(CalculatorUpdate::accumulate(equip, unequip).is_empty());
    /// ```
    pub fn accumulate(left: CalculatorUpdate, right: CalculatorUpdate) -> CalculatorUpdate {
        let mut added = left.added;
        let mut removed = left.removed;
        for modifier in right.removed {
            match added.iter().position(|m| *m == modifier) {
                Some(index) => {
                    added.remove(index);
                }
                None => removed.push(modifier),
            }
        }
        for modifier in right.added {
            match removed.iter().position(|m| *m == modifier) {
                Some(index) => {
                    removed.remove(index);
                }
                None => added.push(modifier),
            }
        }
        CalculatorUpdate { added, removed }
    }
}
