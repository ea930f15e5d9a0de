//! Forms, result facets and paths.
//!
//! Every stat is evaluated as a small subgraph of nodes. A node is addressed
//! by a [`NodeKey`]: the stat plus a [`NodeSelector`] made of the requested
//! facet ([`NodeType`]) and the [`PathDefinition`] it is computed on.

use serde::Serialize;
use std::fmt;

use crate::source::ModifierSource;
use crate::stat::Stat;

/// How a modifier's value participates in the combination of its stat.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Form {
    /// Sets the base value. At most one per stat and path.
    BaseSet,
    /// Added to the base value.
    BaseAdd,
    /// Replaces the base value of its path.
    BaseOverride,
    /// Additive percentage layer.
    Increase,
    /// Multiplicative percentage layer.
    More,
    /// Replaces the total, bypassing clamping.
    TotalOverride,
}

impl Form {
    pub const ALL: [Form; 6] = [
        Form::BaseSet,
        Form::BaseAdd,
        Form::BaseOverride,
        Form::Increase,
        Form::More,
        Form::TotalOverride,
    ];

    /// The node that aggregates modifiers of this form.
    pub fn node_type(self) -> NodeType {
        match self {
            Form::BaseSet => NodeType::BaseSet,
            Form::BaseAdd => NodeType::BaseAdd,
            Form::BaseOverride => NodeType::BaseOverride,
            Form::Increase => NodeType::Increase,
            Form::More => NodeType::More,
            Form::TotalOverride => NodeType::TotalOverride,
        }
    }
}

/// The facet of a stat a query asks for.
///
/// `Total`, `Subtotal`, `UncappedSubtotal` and `TotalOverride` describe the
/// whole stat; every other facet is computed per path.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum NodeType {
    Total,
    Subtotal,
    UncappedSubtotal,
    TotalOverride,
    PathTotal,
    Base,
    BaseOverride,
    BaseSet,
    BaseAdd,
    Increase,
    More,
}

impl NodeType {
    /// Whether the facet is computed per path.
    pub fn is_path_specific(self) -> bool {
        !matches!(
            self,
            NodeType::Total
                | NodeType::Subtotal
                | NodeType::UncappedSubtotal
                | NodeType::TotalOverride
        )
    }
}

/// A computation route of a stat.
///
/// The main path carries global modifiers. Every local source (an item slot,
/// skills, given stats, ...) gets its own path; conversion stats distinguish
/// values converted from other stats.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
pub struct PathDefinition {
    pub source: ModifierSource,
    pub conversion_stats: Vec<Stat>,
}

impl PathDefinition {
    /// The main path: global source, no conversion.
    pub fn main() -> Self {
        Self::from_source(&ModifierSource::global())
    }

    /// The unconverted path of `source`.
    pub fn from_source(source: &ModifierSource) -> Self {
        Self {
            source: source.canonical(),
            conversion_stats: Vec::new(),
        }
    }

    /// A path whose values are converted from `conversion_stats`.
    pub fn converted(source: &ModifierSource, conversion_stats: Vec<Stat>) -> Self {
        Self {
            source: source.canonical(),
            conversion_stats,
        }
    }

    pub fn is_main_path(&self) -> bool {
        self.source.is_global() && self.conversion_stats.is_empty()
    }

    /// Paths whose `Increase`/`More` modifiers also apply to this path,
    /// excluding this path itself.
    pub fn influencing_paths(&self) -> Vec<PathDefinition> {
        self.source
            .influencing_sources()
            .into_iter()
            .map(|source| PathDefinition {
                source,
                conversion_stats: self.conversion_stats.clone(),
            })
            .filter(|path| path != self)
            .collect()
    }
}

impl Default for PathDefinition {
    fn default() -> Self {
        Self::main()
    }
}

impl fmt::Display for PathDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if !self.conversion_stats.is_empty() {
            let stats: Vec<String> = self.conversion_stats.iter().map(|s| s.to_string()).collect();
            write!(f, " converted from {}", stats.join(", "))?;
        }
        Ok(())
    }
}

/// Facet plus path.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
pub struct NodeSelector {
    pub node_type: NodeType,
    pub path: PathDefinition,
}

impl NodeSelector {
    /// Stat-level facets are normalized onto the main path.
    pub fn new(node_type: NodeType, path: PathDefinition) -> Self {
        let path = if node_type.is_path_specific() {
            path
        } else {
            PathDefinition::main()
        };
        Self { node_type, path }
    }

    pub fn main(node_type: NodeType) -> Self {
        Self::new(node_type, PathDefinition::main())
    }
}

/// Address of one node in the calculation graph.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
pub struct NodeKey {
    pub stat: Stat,
    pub selector: NodeSelector,
}

impl NodeKey {
    pub fn new(stat: Stat, node_type: NodeType, path: PathDefinition) -> Self {
        Self {
            stat,
            selector: NodeSelector::new(node_type, path),
        }
    }

    /// The `Total` node of `stat`.
    pub fn total(stat: Stat) -> Self {
        Self::new(stat, NodeType::Total, PathDefinition::main())
    }

    pub fn node_type(&self) -> NodeType {
        self.selector.node_type
    }

    pub fn path(&self) -> &PathDefinition {
        &self.selector.path
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.selector.node_type.is_path_specific() {
            write!(
                f,
                "{}.{:?}[{}]",
                self.stat, self.selector.node_type, self.selector.path
            )
        } else {
            write!(f, "{}.{:?}", self.stat, self.selector.node_type)
        }
    }
}
