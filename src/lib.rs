//! # modcalc - Incremental Modifier-Driven Stat Calculation
//!
//! The computation core of an action-RPG build planner:
//! - **Modifier-driven**: stats are computed from modifiers (`+40 to maximum
//!   Life`, `10% increased Life`, ...) registered by form and source
//! - **Incremental**: every facet of a stat is a cached node; an update only
//!   invalidates what actually read the changed modifiers
//! - **Batched notifications**: subscribers hear about a batch once, after
//!   it has been fully applied
//! - **Single writer**: a dedicated calculation thread applies updates in
//!   order, with optional debouncing and idle node reclamation
//!
//! ## Core Concepts
//!
//! ### Node Pipeline
//!
//! Each stat is evaluated through a fixed set of nodes:
//!
//! ```text
//! Base ─┐
//! Inc ──┼─> PathTotal (per path) ─> UncappedSubtotal ─> Subtotal ─> Total
//! More ─┘                                              (clamped)   (override,
//!                                                                   data type)
//! ```
//!
//! `PathTotal = Base * (1 + Increase / 100) * More`. Local sources (an item,
//! a skill) get their own path; global modifiers influence every path.
//!
//! ## Example
//!
//! ```rust
//! use modcalc::*;
//!
//! let mut calculator = Calculator::new();
//! let life = Stat::new("Life");
//! let source = ModifierSource::global();
//!
//! calculator.update(CalculatorUpdate::adding(vec![
//!     Modifier::constant(life.clone(), Form::BaseAdd, 50.0, source.clone()),
//!     Modifier::constant(life.clone(), Form::BaseAdd, 20.0, source.clone()),
//!     Modifier::constant(life.clone(), Form::Increase, 10.0, source),
//! ]));
//!
//! let total = calculator.total(&life).unwrap().single().unwrap();
//! assert!((total - 77.0).abs() < 1e-9); // (50 + 20) * 1.1
//! ```
//!
//! ## Modules
//!
//! - [`value`] - Nullable interval values
//! - [`stat`] - Stat definitions
//! - [`source`] / [`selector`] - Modifier sources, forms, paths and node keys
//! - [`modifier`] - Modifiers, value functions and update batches
//! - [`registry`] - Modifier registration tables
//! - [`context`] - Node evaluation with dependency recording
//! - [`graph`] - Dependency graph between nodes
//! - [`events`] - Suspendable, buffered event delivery
//! - [`calculator`] - The calculator
//! - [`breakdown`] - Per-modifier contribution reports
//! - [`builder`] / [`parse`] - Modifier templates and the parser boundary
//! - [`scheduler`] / [`config`] - The calculation thread
//! - [`error`] - Error types

pub mod breakdown;
pub mod builder;
pub mod calculator;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod graph;
pub mod modifier;
pub mod parse;
pub mod registry;
pub mod scheduler;
pub mod selector;
pub mod source;
pub mod stat;
pub mod value;

// Re-export main types for convenience
pub use breakdown::{Contribution, StatBreakdown};
pub use calculator::{Calculator, SubscriptionId, UpdateReport, ValueChange};
pub use config::SchedulerConfig;
pub use error::{CalculationError, ConfigurationError, ReclamationError, SchedulerError};
pub use modifier::{CalculatorUpdate, Modifier, ValueFunction};
pub use scheduler::{CalculationScheduler, CalculatorHandle};
pub use selector::{Form, NodeKey, NodeType, PathDefinition};
pub use source::{ItemSlot, ModifierSource};
pub use stat::{Behavior, DataType, Entity, ExplicitRegistration, Stat};
pub use value::Value;
