//! Stat identity module.
//!
//! Provides the [`Stat`] type: an immutable, value-equal key naming a
//! quantity (e.g. `Life`) for a specific [`Entity`]. Stats are cheap to clone
//! and share one allocation per definition.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::value::Value;

/// The entity a stat belongs to.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Entity {
    Character,
    Enemy,
    Minion,
    Totem,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Character => "Character",
            Entity::Enemy => "Enemy",
            Entity::Minion => "Minion",
            Entity::Totem => "Totem",
        };
        f.write_str(name)
    }
}

/// Declared data type of a stat. Applied to the stat's `Total`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Real numbers, no coercion.
    Number,
    /// Totals are rounded down.
    Integer,
    /// Totals are coerced to `0` or `1`.
    Boolean,
}

impl DataType {
    /// Coerce a total value to this data type.
    pub fn coerce(self, value: Value) -> Value {
        match self {
            DataType::Number => value,
            DataType::Integer => value.floor(),
            DataType::Boolean if value.is_set() => Value::from_bool(value.is_true()),
            DataType::Boolean => value,
        }
    }
}

/// Special aggregation rules attached to a stat.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Behavior {
    /// Only the highest `BaseAdd` contribution of a path counts.
    HighestBaseAdd,
    /// The uncapped subtotal is the highest path total instead of the sum.
    HighestPathTotal,
}

/// Marks stats that must be declared before they accept modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExplicitRegistration {
    /// A value entered by the user (e.g. "Enemy is shocked").
    /// `default` is the total while no modifier applies.
    UserSpecifiedValue { default: Value },
    /// Declared by the game data, no default.
    PreDeclared,
}

struct StatDefinition {
    identity: Arc<str>,
    entity: Entity,
    data_type: DataType,
    minimum: Option<Stat>,
    maximum: Option<Stat>,
    behaviors: Vec<Behavior>,
    explicit_registration: Option<ExplicitRegistration>,
}

/// A named, typed quantity scoped to an entity.
///
/// Equality and hashing only consider `(identity, entity, data_type)`: two
/// independently created stats with the same key are interchangeable.
///
/// # Examples
///
/// ```rust
/// use modcalc::{Stat, Entity};
///
/// let life = Stat::new("Life");
/// let again = Stat::builder("Life").entity(Entity::Character).build();
/// assert_eq!(life, again);
///
/// let enemy_life = Stat::builder("Life").entity(Entity::Enemy).build();
/// assert_ne!(life, enemy_life);
///
/// let res = Stat::builder("FireResistance").with_minimum().with_maximum().build();
/// assert_eq!(res.maximum().unwrap().identity(), "FireResistance.Maximum");
/// ```
#[derive(Clone)]
pub struct Stat(Arc<StatDefinition>);

impl Stat {
    /// A character stat of type [`DataType::Number`] without extras.
    pub fn new(identity: &str) -> Self {
        Self::builder(identity).build()
    }

    /// Start building a stat definition.
    pub fn builder(identity: &str) -> StatBuilder {
        StatBuilder {
            identity: Arc::from(identity),
            entity: Entity::Character,
            data_type: DataType::Number,
            minimum: false,
            maximum: false,
            behaviors: Vec::new(),
            explicit_registration: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.0.identity
    }

    pub fn entity(&self) -> Entity {
        self.0.entity
    }

    pub fn data_type(&self) -> DataType {
        self.0.data_type
    }

    /// Companion stat whose total is the lower clamp bound.
    pub fn minimum(&self) -> Option<&Stat> {
        self.0.minimum.as_ref()
    }

    /// Companion stat whose total is the upper clamp bound.
    pub fn maximum(&self) -> Option<&Stat> {
        self.0.maximum.as_ref()
    }

    pub fn behaviors(&self) -> &[Behavior] {
        &self.0.behaviors
    }

    pub fn has_behavior(&self, behavior: Behavior) -> bool {
        self.0.behaviors.contains(&behavior)
    }

    pub fn explicit_registration(&self) -> Option<ExplicitRegistration> {
        self.0.explicit_registration
    }

    /// Whether this stat must be declared before it receives modifiers.
    pub fn requires_declaration(&self) -> bool {
        self.0.explicit_registration.is_some()
    }

    /// No companions, behaviors or registration marker.
    pub fn is_bare(&self) -> bool {
        self.0.minimum.is_none()
            && self.0.maximum.is_none()
            && self.0.behaviors.is_empty()
            && self.0.explicit_registration.is_none()
    }

    /// Combine this definition with another definition of the same stat.
    ///
    /// Companions and behaviors of either are kept. This definition's
    /// registration marker wins over `other`'s. Returns `None` if `other`
    /// adds nothing.
    pub fn merged_with(&self, other: &Stat) -> Option<Stat> {
        debug_assert_eq!(self, other);
        if Arc::ptr_eq(&self.0, &other.0) || other.is_bare() {
            return None;
        }
        let minimum = self.0.minimum.clone().or_else(|| other.0.minimum.clone());
        let maximum = self.0.maximum.clone().or_else(|| other.0.maximum.clone());
        let mut behaviors = self.0.behaviors.clone();
        for behavior in &other.0.behaviors {
            if !behaviors.contains(behavior) {
                behaviors.push(*behavior);
            }
        }
        let explicit_registration = self.0.explicit_registration.or(other.0.explicit_registration);

        let unchanged = minimum.is_some() == self.0.minimum.is_some()
            && maximum.is_some() == self.0.maximum.is_some()
            && behaviors.len() == self.0.behaviors.len()
            && explicit_registration.is_some() == self.0.explicit_registration.is_some();
        if unchanged {
            return None;
        }
        Some(Stat(Arc::new(StatDefinition {
            identity: Arc::clone(&self.0.identity),
            entity: self.0.entity,
            data_type: self.0.data_type,
            minimum,
            maximum,
            behaviors,
            explicit_registration,
        })))
    }
}

impl PartialEq for Stat {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.identity == other.0.identity
                && self.0.entity == other.0.entity
                && self.0.data_type == other.0.data_type)
    }
}

impl Eq for Stat {}

impl Hash for Stat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.identity.hash(state);
        self.0.entity.hash(state);
        self.0.data_type.hash(state);
    }
}

impl fmt::Debug for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stat")
            .field("identity", &self.0.identity)
            .field("entity", &self.0.entity)
            .field("data_type", &self.0.data_type)
            .finish()
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.entity {
            Entity::Character => write!(f, "{}", self.0.identity),
            entity => write!(f, "{}.{}", entity, self.0.identity),
        }
    }
}

impl Serialize for Stat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Stat", 3)?;
        state.serialize_field("identity", self.identity())?;
        state.serialize_field("entity", &self.0.entity)?;
        state.serialize_field("data_type", &self.0.data_type)?;
        state.end()
    }
}

/// Builder for [`Stat`]. Obtained from [`Stat::builder`].
#[derive(Debug, Clone)]
pub struct StatBuilder {
    identity: Arc<str>,
    entity: Entity,
    data_type: DataType,
    minimum: bool,
    maximum: bool,
    behaviors: Vec<Behavior>,
    explicit_registration: Option<ExplicitRegistration>,
}

impl StatBuilder {
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entity = entity;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Attach a `<identity>.Minimum` companion stat.
    pub fn with_minimum(mut self) -> Self {
        self.minimum = true;
        self
    }

    /// Attach a `<identity>.Maximum` companion stat.
    pub fn with_maximum(mut self) -> Self {
        self.maximum = true;
        self
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        if !self.behaviors.contains(&behavior) {
            self.behaviors.push(behavior);
        }
        self
    }

    pub fn explicit_registration(mut self, registration: ExplicitRegistration) -> Self {
        self.explicit_registration = Some(registration);
        self
    }

    pub fn build(self) -> Stat {
        let companion = |suffix: &str| {
            Stat::builder(&format!("{}.{}", self.identity, suffix))
                .entity(self.entity)
                .build()
        };
        let minimum = self.minimum.then(|| companion("Minimum"));
        let maximum = self.maximum.then(|| companion("Maximum"));
        Stat(Arc::new(StatDefinition {
            identity: self.identity,
            entity: self.entity,
            data_type: self.data_type,
            minimum,
            maximum,
            behaviors: self.behaviors,
            explicit_registration: self.explicit_registration,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stat_value_equality() {
        let a = Stat::new("Life");
        let b = Stat::builder("Life").with_maximum().build();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_stat_key_fields_distinguish() {
        let life = Stat::new("Life");
        assert_ne!(life, Stat::builder("Life").entity(Entity::Minion).build());
        assert_ne!(life, Stat::builder("Life").data_type(DataType::Integer).build());
        assert_ne!(life, Stat::new("Mana"));
    }

    #[test]
    fn test_companion_stats() {
        let res = Stat::builder("ColdResistance")
            .entity(Entity::Enemy)
            .with_minimum()
            .build();
        let minimum = res.minimum().unwrap();
        assert_eq!(minimum.identity(), "ColdResistance.Minimum");
        assert_eq!(minimum.entity(), Entity::Enemy);
        assert!(res.maximum().is_none());
    }

    #[test]
    fn test_data_type_coercion() {
        assert_eq!(DataType::Integer.coerce(Value::scalar(7.9)), Value::scalar(7.0));
        assert_eq!(DataType::Boolean.coerce(Value::scalar(3.0)), Value::ONE);
        assert_eq!(DataType::Boolean.coerce(Value::ZERO), Value::ZERO);
        assert_eq!(DataType::Boolean.coerce(Value::UNSET), Value::UNSET);
        assert_eq!(DataType::Number.coerce(Value::scalar(7.9)), Value::scalar(7.9));
    }

    #[test]
    fn test_display() {
        assert_eq!(Stat::new("Life").to_string(), "Life");
        let enemy = Stat::builder("Life").entity(Entity::Enemy).build();
        assert_eq!(enemy.to_string(), "Enemy.Life");
    }

    #[test]
    fn test_merge_definitions() {
        let plain = Stat::new("FireResistance");
        assert!(plain.is_bare());
        assert!(plain.merged_with(&Stat::new("FireResistance")).is_none());

        let capped = Stat::builder("FireResistance").with_maximum().build();
        let merged = plain.merged_with(&capped).unwrap();
        assert_eq!(merged.maximum().unwrap().identity(), "FireResistance.Maximum");
        assert!(merged.minimum().is_none());
        assert!(capped.merged_with(&plain).is_none());

        let marked = Stat::builder("FireResistance")
            .behavior(Behavior::HighestBaseAdd)
            .explicit_registration(ExplicitRegistration::PreDeclared)
            .build();
        let merged = merged.merged_with(&marked).unwrap();
        assert!(merged.maximum().is_some());
        assert!(merged.has_behavior(Behavior::HighestBaseAdd));
        assert!(merged.requires_declaration());
        assert!(merged.merged_with(&marked).is_none());
    }

    #[test]
    fn test_declaration_marker() {
        let shocked = Stat::builder("Enemy.IsShocked")
            .data_type(DataType::Boolean)
            .explicit_registration(ExplicitRegistration::UserSpecifiedValue {
                default: Value::ZERO,
            })
            .build();
        assert!(shocked.requires_declaration());
        assert!(!Stat::new("Life").requires_declaration());
    }
}
