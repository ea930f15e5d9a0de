//! Numeric values produced by stat calculations.
//!
//! A [`Value`] is either unset ("this node has no value", e.g. a stat with
//! no modifiers or a modifier whose condition is false) or a closed interval
//! `[minimum, maximum]`. Scalar results use `minimum == maximum`; damage
//! ranges such as "adds 10 to 20 physical damage" use a proper interval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// An immutable calculation result.
///
/// Arithmetic between values is component-wise and unset is absorbing:
/// any operation with an unset operand yields unset. Aggregations
/// ([`Value::sum_of`], [`Value::product_of`], [`Value::max_of`]) instead
/// treat unset as their identity.
///
/// # Examples
///
/// ```rust
/// use modcalc::Value;
///
/// let base = Value::scalar(50.0) + Value::scalar(20.0);
/// assert_eq!(base, Value::scalar(70.0));
///
/// let damage = Value::range(10.0, 20.0) * 1.5;
/// assert_eq!(damage.minimum(), Some(15.0));
/// assert_eq!(damage.maximum(), Some(30.0));
///
/// assert_eq!(Value::UNSET + Value::scalar(1.0), Value::UNSET);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// No value.
    #[default]
    Unset,
    /// A closed interval. `minimum <= maximum` always holds.
    Range { minimum: f64, maximum: f64 },
}

impl Value {
    /// The unset value.
    pub const UNSET: Value = Value::Unset;

    /// The scalar zero.
    pub const ZERO: Value = Value::Range {
        minimum: 0.0,
        maximum: 0.0,
    };

    /// The scalar one.
    pub const ONE: Value = Value::Range {
        minimum: 1.0,
        maximum: 1.0,
    };

    /// Create a degenerate interval `[value, value]`.
    pub fn scalar(value: f64) -> Self {
        Value::Range {
            minimum: value,
            maximum: value,
        }
    }

    /// Create an interval. The bounds are swapped if given in reverse order.
    pub fn range(a: f64, b: f64) -> Self {
        if a <= b {
            Value::Range {
                minimum: a,
                maximum: b,
            }
        } else {
            Value::Range {
                minimum: b,
                maximum: a,
            }
        }
    }

    /// `1` for true, `0` for false.
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::ONE
        } else {
            Self::ZERO
        }
    }

    /// Create a value from an optional scalar.
    pub fn from_option(value: Option<f64>) -> Self {
        value.map_or(Value::Unset, Value::scalar)
    }

    /// Returns `true` unless this value is unset.
    pub fn is_set(self) -> bool {
        matches!(self, Value::Range { .. })
    }

    /// Lower bound, `None` if unset.
    pub fn minimum(self) -> Option<f64> {
        match self {
            Value::Unset => None,
            Value::Range { minimum, .. } => Some(minimum),
        }
    }

    /// Upper bound, `None` if unset.
    pub fn maximum(self) -> Option<f64> {
        match self {
            Value::Unset => None,
            Value::Range { maximum, .. } => Some(maximum),
        }
    }

    /// Midpoint of the interval, `None` if unset.
    ///
    /// For scalars this is the scalar itself.
    pub fn single(self) -> Option<f64> {
        match self {
            Value::Unset => None,
            Value::Range { minimum, maximum } if minimum == maximum => Some(minimum),
            Value::Range { minimum, maximum } => Some((minimum + maximum) / 2.0),
        }
    }

    /// Boolean coercion: everything except unset and exactly zero is true.
    ///
    /// ```rust
    /// use modcalc::Value;
    ///
    /// assert!(!Value::UNSET.is_true());
    /// assert!(!Value::scalar(0.0).is_true());
    /// assert!(Value::scalar(-1.0).is_true());
    /// assert!(Value::range(0.0, 1.0).is_true());
    /// ```
    pub fn is_true(self) -> bool {
        match self {
            Value::Unset => false,
            Value::Range { minimum, maximum } => minimum != 0.0 || maximum != 0.0,
        }
    }

    /// Apply `f` to both bounds. Unset stays unset.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            Value::Unset => Value::Unset,
            Value::Range { minimum, maximum } => Value::range(f(minimum), f(maximum)),
        }
    }

    /// Combine two values bound by bound. Unset if either side is unset.
    pub fn combine(self, other: Value, f: impl Fn(f64, f64) -> f64) -> Self {
        match (self, other) {
            (
                Value::Range {
                    minimum: a_min,
                    maximum: a_max,
                },
                Value::Range {
                    minimum: b_min,
                    maximum: b_max,
                },
            ) => Value::range(f(a_min, b_min), f(a_max, b_max)),
            _ => Value::Unset,
        }
    }

    /// Returns `self` if set, otherwise `fallback`.
    pub fn or(self, fallback: Value) -> Self {
        if self.is_set() {
            self
        } else {
            fallback
        }
    }

    /// Round both bounds down.
    pub fn floor(self) -> Self {
        self.map(f64::floor)
    }

    /// Clamp into `[lower, upper]`. An unset bound does not clamp its side.
    ///
    /// ```rust
    /// use modcalc::Value;
    ///
    /// let res = Value::scalar(90.0);
    /// assert_eq!(res.clamp(Value::scalar(-100.0), Value::scalar(75.0)), Value::scalar(75.0));
    /// assert_eq!(res.clamp(Value::UNSET, Value::UNSET), res);
    /// ```
    pub fn clamp(self, lower: Value, upper: Value) -> Self {
        let mut result = self;
        if let Some(low) = lower.minimum() {
            result = result.map(|v| v.max(low));
        }
        if let Some(high) = upper.maximum() {
            result = result.map(|v| v.min(high));
        }
        result
    }

    /// Sum with unset as identity. Unset only if every input is unset.
    pub fn sum_of(values: impl IntoIterator<Item = Value>) -> Self {
        Self::fold_set(values, |a, b| a + b)
    }

    /// Product with unset as identity. Unset only if every input is unset.
    pub fn product_of(values: impl IntoIterator<Item = Value>) -> Self {
        Self::fold_set(values, |a, b| a * b)
    }

    /// Bound-wise maximum with unset as identity.
    pub fn max_of(values: impl IntoIterator<Item = Value>) -> Self {
        Self::fold_set(values, |a, b| a.combine(b, f64::max))
    }

    fn fold_set(values: impl IntoIterator<Item = Value>, f: impl Fn(Value, Value) -> Value) -> Self {
        values
            .into_iter()
            .filter(|v| v.is_set())
            .reduce(f)
            .unwrap_or(Value::Unset)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::scalar(value)
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        Value::from_option(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::from_bool(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unset => write!(f, "null"),
            Value::Range { minimum, maximum } if minimum == maximum => write!(f, "{}", minimum),
            Value::Range { minimum, maximum } => write!(f, "{} to {}", minimum, maximum),
        }
    }
}

macro_rules! impl_value_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for Value {
            type Output = Value;

            fn $method(self, rhs: Value) -> Value {
                self.combine(rhs, |a, b| a $op b)
            }
        }

        impl $trait<f64> for Value {
            type Output = Value;

            fn $method(self, rhs: f64) -> Value {
                self.map(|a| a $op rhs)
            }
        }
    };
}

impl_value_op!(Add, add, +);
impl_value_op!(Sub, sub, -);
impl_value_op!(Mul, mul, *);
impl_value_op!(Div, div, /);

impl Neg for Value {
    type Output = Value;

    fn neg(self) -> Value {
        self.map(|a| -a)
    }
}
