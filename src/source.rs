//! Modifier sources module.
//!
//! A [`ModifierSource`] records where a modifier comes from: the global
//! pool, game-given base values, an equipped item, a skill gem or a passive
//! tree node. Sources form a rooted tree through
//! [`ModifierSource::influencing_sources`]: every local source is influenced
//! by itself and by `Global`, while `Global` is only influenced by itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Equipment slots that can carry local modifiers.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemSlot {
    Helm,
    BodyArmour,
    Gloves,
    Boots,
    MainHand,
    OffHand,
    Amulet,
    LeftRing,
    RightRing,
    Belt,
}

/// Provenance of a modifier.
///
/// Detail fields such as item or gem names are display information only;
/// [`ModifierSource::canonical`] strips them and is what the calculator keys
/// paths by.
///
/// # Examples
///
/// ```rust
/// use modcalc::source::{ItemSlot, ModifierSource};
///
/// let helm = ModifierSource::Item {
///     slot: ItemSlot::Helm,
///     name: Some("Devoto's Devotion".into()),
/// };
/// let canonical = helm.canonical();
/// assert_eq!(canonical, ModifierSource::Item { slot: ItemSlot::Helm, name: None });
/// assert_eq!(
///     helm.influencing_sources(),
///     vec![canonical, ModifierSource::global()],
/// );
/// ```
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifierSource {
    /// Applies everywhere. `origin` optionally records which local source
    /// the global modifier was granted by (e.g. a passive node).
    Global {
        origin: Option<Box<ModifierSource>>,
    },
    /// Base values given by the game (character class, level, ...).
    Given,
    /// Local to an equipped item.
    Item {
        slot: ItemSlot,
        name: Option<String>,
    },
    /// Local to a skill gem.
    Skill { gem: Option<String> },
    /// Local to a passive tree node.
    PassiveNode { id: Option<u16>, name: Option<String> },
}

impl ModifierSource {
    /// The plain global source.
    pub fn global() -> Self {
        ModifierSource::Global { origin: None }
    }

    /// A global source granted by `origin`.
    pub fn global_from(origin: ModifierSource) -> Self {
        ModifierSource::Global {
            origin: Some(Box::new(origin.canonical_or_self())),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ModifierSource::Global { .. })
    }

    /// This source without display details.
    pub fn canonical(&self) -> ModifierSource {
        match self {
            ModifierSource::Global { .. } => ModifierSource::global(),
            ModifierSource::Given => ModifierSource::Given,
            ModifierSource::Item { slot, .. } => ModifierSource::Item {
                slot: *slot,
                name: None,
            },
            ModifierSource::Skill { .. } => ModifierSource::Skill { gem: None },
            ModifierSource::PassiveNode { .. } => ModifierSource::PassiveNode {
                id: None,
                name: None,
            },
        }
    }

    // Origins keep their details for display but never nest further.
    fn canonical_or_self(self) -> ModifierSource {
        match self {
            ModifierSource::Global { origin: Some(inner) } => *inner,
            other => other,
        }
    }

    /// Canonical sources whose modifiers also apply to this source's path,
    /// starting with this source's own canonical form.
    pub fn influencing_sources(&self) -> Vec<ModifierSource> {
        let canonical = self.canonical();
        if canonical.is_global() {
            vec![canonical]
        } else {
            vec![canonical, ModifierSource::global()]
        }
    }
}

impl Default for ModifierSource {
    fn default() -> Self {
        ModifierSource::global()
    }
}

impl fmt::Display for ModifierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModifierSource::Global { origin: None } => write!(f, "Global"),
            ModifierSource::Global { origin: Some(origin) } => write!(f, "Global ({})", origin),
            ModifierSource::Given => write!(f, "Given"),
            ModifierSource::Item { slot, name: None } => write!(f, "Item {:?}", slot),
            ModifierSource::Item {
                slot,
                name: Some(name),
            } => write!(f, "Item {:?}: {}", slot, name),
            ModifierSource::Skill { gem: None } => write!(f, "Skill"),
            ModifierSource::Skill { gem: Some(gem) } => write!(f, "Skill: {}", gem),
            ModifierSource::PassiveNode { name: Some(name), .. } => {
                write!(f, "Passive node: {}", name)
            }
            ModifierSource::PassiveNode { id: Some(id), .. } => write!(f, "Passive node #{}", id),
            ModifierSource::PassiveNode { .. } => write!(f, "Passive node"),
        }
    }
}
