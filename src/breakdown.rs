//! Stat breakdowns.
//!
//! A [`StatBreakdown`] lists every modifier contributing to one path of a
//! stat, grouped by form, together with the intermediate facet values. It is
//! read-only and serializable, meant for debug output and tooltips.

use serde::Serialize;

use crate::context::ValueCalculationContext;
use crate::error::CalculationError;
use crate::registry::ModifierRegistry;
use crate::selector::{Form, NodeType, PathDefinition};
use crate::source::ModifierSource;
use crate::stat::Stat;
use crate::value::Value;

/// One modifier's share of a breakdown.
///
/// An unset `value` means the modifier currently does not apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub form: Form,
    pub source: ModifierSource,
    pub description: String,
    pub value: Value,
}

/// Per-form contributions and facet values of one stat path.
///
/// # Examples
///
/// ```rust
/// use modcalc::breakdown::{Contribution, StatBreakdown};
/// use modcalc::selector::PathDefinition;
/// use modcalc::{Form, ModifierSource, Stat, Value};
///
/// let mut breakdown = StatBreakdown::new(Stat::new("Life"), PathDefinition::main());
/// breakdown.add_contribution(Contribution {
///     form: Form::BaseAdd,
///     source: ModifierSource::Given,
///     description: "38".into(),
///     value: Value::scalar(38.0),
/// });
/// assert_eq!(breakdown.contributions_of(Form::BaseAdd).count(), 1);
/// assert_eq!(breakdown.contributions_of(Form::More).count(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatBreakdown {
    pub stat: Stat,
    pub path: PathDefinition,

    /// Contributions in form order, then path order.
    pub contributions: Vec<Contribution>,

    pub base: Value,
    /// Summed percentage, including influencing paths.
    pub increase: Value,
    /// Combined multiplier, including influencing paths.
    pub more: Value,
    pub path_total: Value,
    pub total: Value,
}

impl StatBreakdown {
    /// Create an empty breakdown. All facet values start unset.
    pub fn new(stat: Stat, path: PathDefinition) -> Self {
        Self {
            stat,
            path,
            contributions: Vec::new(),
            base: Value::UNSET,
            increase: Value::UNSET,
            more: Value::UNSET,
            path_total: Value::UNSET,
            total: Value::UNSET,
        }
    }

    pub fn add_contribution(&mut self, contribution: Contribution) {
        self.contributions.push(contribution);
    }

    pub fn contributions_of(&self, form: Form) -> impl Iterator<Item = &Contribution> {
        self.contributions.iter().filter(move |c| c.form == form)
    }

    /// Evaluate the breakdown of `stat` on `path` in `context`.
    pub(crate) fn collect(
        context: &mut ValueCalculationContext<'_>,
        registry: &ModifierRegistry,
        stat: &Stat,
        path: &PathDefinition,
    ) -> Result<Self, CalculationError> {
        let mut breakdown = StatBreakdown::new(stat.clone(), path.clone());

        for form in Form::ALL {
            let modifiers: Vec<_> = match form {
                Form::TotalOverride => registry.modifiers_on_all_paths(stat, form).collect(),
                Form::Increase | Form::More => {
                    let mut paths = vec![path.clone()];
                    paths.extend(path.influencing_paths());
                    paths
                        .iter()
                        .flat_map(|p| registry.modifiers(stat, form, p).iter())
                        .collect()
                }
                _ => registry.modifiers(stat, form, path).iter().collect(),
            };
            for modifier in modifiers {
                let value = modifier.value().calculate(context)?;
                breakdown.add_contribution(Contribution {
                    form,
                    source: modifier.source().clone(),
                    description: modifier.value().describe(),
                    value,
                });
            }
        }

        breakdown.base = context.get_value(stat, NodeType::Base, path)?;
        breakdown.increase = context.get_value(stat, NodeType::Increase, path)?;
        breakdown.more = context.get_value(stat, NodeType::More, path)?;
        breakdown.path_total = context.get_value(stat, NodeType::PathTotal, path)?;
        breakdown.total = context.get_total(stat)?;
        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::Modifier;
    use crate::source::ItemSlot;
    use std::collections::HashMap;

    #[test]
    fn test_collect_groups_by_form() {
        let life = Stat::new("Life");
        let mut registry = ModifierRegistry::new();
        for (form, value) in [(Form::BaseAdd, 50.0), (Form::BaseAdd, 20.0), (Form::Increase, 10.0)] {
            registry
                .add(&life, Modifier::constant(life.clone(), form, value, ModifierSource::global()))
                .unwrap();
        }

        let cache = HashMap::new();
        let mut context = ValueCalculationContext::new(&registry, &cache);
        let breakdown =
            StatBreakdown::collect(&mut context, &registry, &life, &PathDefinition::main()).unwrap();

        assert_eq!(breakdown.contributions_of(Form::BaseAdd).count(), 2);
        assert_eq!(breakdown.contributions_of(Form::Increase).count(), 1);
        assert_eq!(breakdown.base, Value::scalar(70.0));
        assert_eq!(breakdown.increase, Value::scalar(10.0));
        assert_eq!(breakdown.more, Value::ONE);
        assert_eq!(breakdown.total, breakdown.path_total);
    }

    #[test]
    fn test_local_path_includes_global_increase() {
        let armour = Stat::new("Armour");
        let gloves = ModifierSource::Item {
            slot: ItemSlot::Gloves,
            name: Some("Iron Gauntlets".into()),
        };
        let mut registry = ModifierRegistry::new();
        registry
            .add(&armour, Modifier::constant(armour.clone(), Form::BaseAdd, 50.0, gloves.clone()))
            .unwrap();
        registry
            .add(&armour, Modifier::constant(armour.clone(), Form::Increase, 20.0, ModifierSource::global()))
            .unwrap();

        let cache = HashMap::new();
        let mut context = ValueCalculationContext::new(&registry, &cache);
        let path = PathDefinition::from_source(&gloves);
        let breakdown = StatBreakdown::collect(&mut context, &registry, &armour, &path).unwrap();

        let increases: Vec<_> = breakdown.contributions_of(Form::Increase).collect();
        assert_eq!(increases.len(), 1);
        assert!(increases[0].source.is_global());
        assert_eq!(breakdown.path_total, Value::scalar(60.0));
    }

    #[test]
    fn test_breakdown_serializes() {
        let breakdown = StatBreakdown::new(Stat::new("Mana"), PathDefinition::main());
        let json = serde_json::to_value(&breakdown).unwrap();
        assert!(json.get("contributions").is_some());
        assert_eq!(json["total"], serde_json::json!("Unset"));
    }
}
