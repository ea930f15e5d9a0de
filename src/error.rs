//! Error types.
//!
//! - [`ConfigurationError`]: a modifier or template is malformed. Rejected
//!   per modifier; the registration tables stay untouched for it.
//! - [`CalculationError`]: one evaluation request failed (dependency cycle).
//! - [`ReclamationError`]: a node could not be reclaimed. Logged, non-fatal.
//! - [`SchedulerError`]: the calculation thread is unreachable or failed.

use thiserror::Error;

use crate::selector::{NodeKey, PathDefinition};
use crate::stat::Stat;

/// Format a cycle path as a readable string.
fn format_cycle_path(path: &[NodeKey]) -> String {
    if path.is_empty() {
        return String::from("(empty cycle)");
    }
    path.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Problems with the data that describes modifiers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("modifier affects no stats")]
    EmptyStats,

    #[error("stat {0} must be declared before it can receive modifiers")]
    UndeclaredStat(Stat),

    #[error("stat {stat} already has a BaseSet modifier on path {path}")]
    ConflictingBaseSet { stat: Stat, path: PathDefinition },

    #[error("modifier for {0} is not registered")]
    UnknownModifier(Stat),

    #[error("placeholder {{{0}}} has no resolved value")]
    UnresolvedPlaceholder(String),

    #[error("captured value #{0} is missing")]
    MissingCapturedValue(usize),

    #[error("template has no form and build parameters supply none")]
    MissingForm,

    #[error("per-stat divisor for {0} must be a finite non-zero number")]
    InvalidPerStatDivisor(String),
}

/// Errors that abort a single evaluation request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalculationError {
    /// A value depends on itself, directly or transitively.
    ///
    /// The path starts and ends with the node that was re-entered.
    #[error("Cycle detected: {}", format_cycle_path(.path))]
    Cycle { path: Vec<NodeKey> },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Errors raised while pruning unused nodes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReclamationError {
    #[error("node {0} is indexed but missing from the dependency graph")]
    StaleIndex(NodeKey),

    #[error("stat {0} still has nodes and cannot be removed")]
    StatInUse(Stat),
}

/// Errors surfaced by the scheduler handle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("calculation thread command channel closed")]
    CommandChannelClosed,

    #[error("calculation thread reply channel closed")]
    ReplyChannelClosed(#[source] tokio::sync::oneshot::error::RecvError),

    #[error("failed to spawn calculation thread")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("calculation thread panicked")]
    WorkerPanicked,

    #[error("parser task failed")]
    ParserTask(#[source] tokio::task::JoinError),

    #[error(transparent)]
    Calculation(#[from] CalculationError),

    #[error("invalid scheduler configuration")]
    Config(#[source] serde_json::Error),
}
