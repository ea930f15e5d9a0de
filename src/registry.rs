//! Modifier registration tables.
//!
//! The registry maps every stat to its live modifiers, grouped by form and
//! path, and tracks which stats have been declared. It also keeps one
//! canonical definition per stat key: stats compare equal on their key
//! alone, so companions, behaviors and registration markers are always read
//! from the definition recorded here. It is owned by the calculator and only
//! touched from the calculation thread.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigurationError;
use crate::modifier::Modifier;
use crate::selector::{Form, PathDefinition};
use crate::stat::Stat;

/// Live modifiers of one stat.
#[derive(Debug, Default)]
struct StatModifiers {
    modifiers: HashMap<(Form, PathDefinition), Vec<Modifier>>,
    /// Paths in first-use order with their modifier counts.
    paths: Vec<(PathDefinition, usize)>,
}

impl StatModifiers {
    fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn get(&self, form: Form, path: &PathDefinition) -> &[Modifier] {
        self.modifiers
            .get(&(form, path.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Outcome of a successful add or remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationChange {
    /// The modifier opened a new path or closed the last one of its path.
    pub path_set_changed: bool,
}

/// Registration tables: stat → (form, path) → live modifiers.
#[derive(Debug, Default)]
pub struct ModifierRegistry {
    stats: HashMap<Stat, StatModifiers>,
    declared: HashSet<Stat>,
    definitions: HashMap<Stat, Stat>,
}

impl ModifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stat`'s definition, merging it into the one already known.
    ///
    /// Returns `true` if the known definition gained companions, behaviors
    /// or a registration marker.
    pub fn define(&mut self, stat: &Stat) -> bool {
        let merged = match self.definitions.get(stat) {
            Some(known) => known.merged_with(stat),
            None => {
                self.definitions.insert(stat.clone(), stat.clone());
                return !stat.is_bare();
            }
        };
        match merged {
            Some(merged) => {
                self.definitions.insert(stat.clone(), merged);
                true
            }
            None => false,
        }
    }

    /// The canonical definition of `stat`, or `stat` itself if none was
    /// recorded.
    pub fn definition(&self, stat: &Stat) -> Stat {
        self.definitions
            .get(stat)
            .cloned()
            .unwrap_or_else(|| stat.clone())
    }

    /// Every recorded definition.
    pub fn definitions(&self) -> impl Iterator<Item = &Stat> {
        self.definitions.values()
    }

    /// Declare a stat. Returns `false` if it already was.
    pub fn declare(&mut self, stat: Stat) -> bool {
        self.define(&stat);
        self.declared.insert(stat)
    }

    /// Undeclare a stat. Returns `false` if it was not declared.
    pub fn undeclare(&mut self, stat: &Stat) -> bool {
        self.declared.remove(stat)
    }

    pub fn is_declared(&self, stat: &Stat) -> bool {
        self.declared.contains(stat)
    }

    /// Declared stats, as their canonical definitions.
    pub fn declared(&self) -> impl Iterator<Item = Stat> + '_ {
        self.declared.iter().map(|stat| self.definition(stat))
    }

    /// Check whether `modifier` may be registered for `stat`.
    pub fn validate(&self, stat: &Stat, modifier: &Modifier) -> Result<(), ConfigurationError> {
        if self.definition(stat).requires_declaration() && !self.is_declared(stat) {
            return Err(ConfigurationError::UndeclaredStat(stat.clone()));
        }
        let path = modifier.path();
        if modifier.form() == Form::BaseSet && !self.modifiers(stat, Form::BaseSet, &path).is_empty()
        {
            return Err(ConfigurationError::ConflictingBaseSet {
                stat: stat.clone(),
                path,
            });
        }
        Ok(())
    }

    /// Register `modifier` for `stat`.
    pub fn add(&mut self, stat: &Stat, modifier: Modifier) -> Result<RegistrationChange, ConfigurationError> {
        self.define(stat);
        self.validate(stat, &modifier)?;
        let path = modifier.path();
        let entry = self.stats.entry(stat.clone()).or_default();
        let path_set_changed = match entry.paths.iter_mut().find(|(p, _)| *p == path) {
            Some((_, count)) => {
                *count += 1;
                false
            }
            None => {
                entry.paths.push((path.clone(), 1));
                true
            }
        };
        entry
            .modifiers
            .entry((modifier.form(), path))
            .or_default()
            .push(modifier);
        Ok(RegistrationChange { path_set_changed })
    }

    /// Unregister one occurrence of `modifier` from `stat`.
    pub fn remove(&mut self, stat: &Stat, modifier: &Modifier) -> Result<RegistrationChange, ConfigurationError> {
        let unknown = || ConfigurationError::UnknownModifier(stat.clone());
        let entry = self.stats.get_mut(stat).ok_or_else(unknown)?;
        let path = modifier.path();
        let key = (modifier.form(), path.clone());
        let list = entry.modifiers.get_mut(&key).ok_or_else(unknown)?;
        let index = list.iter().position(|m| m == modifier).ok_or_else(unknown)?;
        list.remove(index);
        if list.is_empty() {
            entry.modifiers.remove(&key);
        }

        let mut path_set_changed = false;
        if let Some(position) = entry.paths.iter().position(|(p, _)| *p == path) {
            entry.paths[position].1 -= 1;
            if entry.paths[position].1 == 0 {
                entry.paths.remove(position);
                path_set_changed = true;
            }
        }
        Ok(RegistrationChange { path_set_changed })
    }

    /// Modifiers of `stat` with `form` on `path`.
    pub fn modifiers(&self, stat: &Stat, form: Form, path: &PathDefinition) -> &[Modifier] {
        self.stats
            .get(stat)
            .map(|entry| entry.get(form, path))
            .unwrap_or(&[])
    }

    /// Modifiers of `stat` with `form` on every path, in path order.
    pub fn modifiers_on_all_paths<'a>(
        &'a self,
        stat: &Stat,
        form: Form,
    ) -> impl Iterator<Item = &'a Modifier> + 'a {
        self.stats.get(stat).into_iter().flat_map(move |entry| {
            entry
                .paths
                .iter()
                .flat_map(move |(path, _)| entry.get(form, path).iter())
        })
    }

    /// All live modifiers of `stat`.
    pub fn all_modifiers(&self, stat: &Stat) -> Vec<Modifier> {
        Form::ALL
            .iter()
            .flat_map(|form| self.modifiers_on_all_paths(stat, *form))
            .cloned()
            .collect()
    }

    /// Paths of `stat` that currently have modifiers. The main path is
    /// always listed first.
    pub fn paths(&self, stat: &Stat) -> Vec<PathDefinition> {
        let main = PathDefinition::main();
        let mut paths = vec![main.clone()];
        if let Some(entry) = self.stats.get(stat) {
            paths.extend(
                entry
                    .paths
                    .iter()
                    .map(|(path, _)| path)
                    .filter(|path| **path != main)
                    .cloned(),
            );
        }
        paths
    }

    pub fn has_modifiers(&self, stat: &Stat) -> bool {
        self.stats.get(stat).is_some_and(|entry| !entry.is_empty())
    }

    /// Stats that have a registry entry, with or without modifiers.
    pub fn stats(&self) -> impl Iterator<Item = &Stat> {
        self.stats.keys()
    }

    /// Drop the entry of a stat without modifiers. Returns `false` if the
    /// stat has no entry or still has modifiers.
    pub fn remove_stat(&mut self, stat: &Stat) -> bool {
        match self.stats.get(stat) {
            Some(entry) if entry.is_empty() => {
                self.stats.remove(stat);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ItemSlot, ModifierSource};
    use crate::stat::ExplicitRegistration;

    fn item_source() -> ModifierSource {
        ModifierSource::Item {
            slot: ItemSlot::BodyArmour,
            name: None,
        }
    }

    #[test]
    fn test_add_and_lookup() {
        let mut registry = ModifierRegistry::new();
        let life = Stat::new("Life");
        let m = Modifier::constant(life.clone(), Form::BaseAdd, 10.0, ModifierSource::global());

        let change = registry.add(&life, m.clone()).unwrap();
        assert!(change.path_set_changed);
        assert_eq!(
            registry.modifiers(&life, Form::BaseAdd, &PathDefinition::main()),
            &[m]
        );
        assert!(registry.has_modifiers(&life));
    }

    #[test]
    fn test_paths_track_first_use_and_removal() {
        let mut registry = ModifierRegistry::new();
        let life = Stat::new("Life");
        let local = Modifier::constant(life.clone(), Form::BaseAdd, 10.0, item_source());
        let local2 = Modifier::constant(life.clone(), Form::Increase, 5.0, item_source());

        assert!(registry.add(&life, local.clone()).unwrap().path_set_changed);
        assert!(!registry.add(&life, local2.clone()).unwrap().path_set_changed);
        assert_eq!(
            registry.paths(&life),
            vec![PathDefinition::main(), PathDefinition::from_source(&item_source())]
        );

        assert!(!registry.remove(&life, &local).unwrap().path_set_changed);
        assert!(registry.remove(&life, &local2).unwrap().path_set_changed);
        assert_eq!(registry.paths(&life), vec![PathDefinition::main()]);
        assert!(!registry.has_modifiers(&life));
        assert!(registry.remove_stat(&life));
    }

    #[test]
    fn test_second_base_set_is_rejected() {
        let mut registry = ModifierRegistry::new();
        let life = Stat::new("Life");
        let first = Modifier::constant(life.clone(), Form::BaseSet, 38.0, ModifierSource::Given);
        let second = Modifier::constant(life.clone(), Form::BaseSet, 50.0, ModifierSource::Given);
        registry.add(&life, first).unwrap();
        let err = registry.add(&life, second).unwrap_err();
        assert!(matches!(err, ConfigurationError::ConflictingBaseSet { .. }));
        assert_eq!(registry.all_modifiers(&life).len(), 1);

        // A BaseSet on another path is fine.
        let other = Modifier::constant(life.clone(), Form::BaseSet, 5.0, item_source());
        assert!(registry.add(&life, other).is_ok());
    }

    #[test]
    fn test_undeclared_stat_is_rejected() {
        let mut registry = ModifierRegistry::new();
        let shocked = Stat::builder("Enemy.IsShocked")
            .explicit_registration(ExplicitRegistration::PreDeclared)
            .build();
        let m = Modifier::constant(shocked.clone(), Form::TotalOverride, 1.0, ModifierSource::global());
        assert_eq!(
            registry.add(&shocked, m.clone()),
            Err(ConfigurationError::UndeclaredStat(shocked.clone()))
        );
        assert!(registry.declare(shocked.clone()));
        assert!(!registry.declare(shocked.clone()));
        assert!(registry.add(&shocked, m).is_ok());
    }

    #[test]
    fn test_equal_stats_share_one_definition() {
        let mut registry = ModifierRegistry::new();
        let plain = Stat::new("FireResistance");
        let capped = Stat::builder("FireResistance").with_maximum().build();

        assert!(!registry.define(&plain));
        assert!(registry.definition(&plain).maximum().is_none());
        assert!(registry.define(&capped));
        assert!(!registry.define(&plain));
        assert!(registry.definition(&plain).maximum().is_some());
        assert_eq!(registry.definitions().count(), 1);
    }

    #[test]
    fn test_plain_instance_of_declared_stat_is_checked() {
        let mut registry = ModifierRegistry::new();
        let shocked = Stat::builder("IsShocked")
            .explicit_registration(ExplicitRegistration::PreDeclared)
            .build();
        registry.define(&shocked);

        let plain = Stat::new("IsShocked");
        let m = Modifier::constant(plain.clone(), Form::BaseSet, 1.0, ModifierSource::global());
        assert_eq!(
            registry.add(&plain, m.clone()),
            Err(ConfigurationError::UndeclaredStat(plain.clone()))
        );
        registry.declare(plain.clone());
        assert!(registry.add(&plain, m).is_ok());
        assert!(registry.declared().all(|stat| stat.requires_declaration()));
    }

    #[test]
    fn test_remove_unknown_modifier() {
        let mut registry = ModifierRegistry::new();
        let life = Stat::new("Life");
        let m = Modifier::constant(life.clone(), Form::BaseAdd, 10.0, ModifierSource::global());
        assert_eq!(
            registry.remove(&life, &m),
            Err(ConfigurationError::UnknownModifier(life.clone()))
        );
        registry.add(&life, m.clone()).unwrap();
        let lookalike = Modifier::constant(life.clone(), Form::BaseAdd, 10.0, ModifierSource::global());
        assert!(registry.remove(&life, &lookalike).is_err());
        assert!(registry.remove(&life, &m).is_ok());
    }

    #[test]
    fn test_remove_stat_keeps_stats_with_modifiers() {
        let mut registry = ModifierRegistry::new();
        let life = Stat::new("Life");
        registry
            .add(&life, Modifier::constant(life.clone(), Form::More, 10.0, ModifierSource::global()))
            .unwrap();
        assert!(!registry.remove_stat(&life));
        assert!(!registry.remove_stat(&Stat::new("Mana")));
    }

    #[test]
    fn test_modifiers_on_all_paths() {
        let mut registry = ModifierRegistry::new();
        let life = Stat::new("Life");
        let global = Modifier::constant(life.clone(), Form::TotalOverride, 1.0, ModifierSource::global());
        let local = Modifier::constant(life.clone(), Form::TotalOverride, 2.0, item_source());
        registry.add(&life, global.clone()).unwrap();
        registry.add(&life, local.clone()).unwrap();
        let all: Vec<&Modifier> = registry
            .modifiers_on_all_paths(&life, Form::TotalOverride)
            .collect();
        assert_eq!(all, vec![&global, &local]);
    }
}
