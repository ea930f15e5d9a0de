//! The calculator.
//!
//! [`Calculator`] is the entry point of the computation core. It owns the
//! modifier registry, the persistent node cache and dependency graph, and
//! the event buffers that merge change notifications per batch.
//!
//! Applying an update:
//! 1. Suspend every event buffer (released by a guard on every exit path)
//! 2. Remove, then validate and add modifiers; rejected ones are reported
//! 3. Invalidate each touched node and everything that read it
//! 4. Recalculate immediate subscribers after every modifier
//! 5. Resume, flushing one merged notification per node
//! 6. Recalculate buffered subscribers and deliver [`ValueChange`]s for
//!    values that actually changed
//!
//! The calculator is single-threaded (`Rc` inside). Run it on one thread
//! and talk to it through [`crate::scheduler`] from everywhere else.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::breakdown::StatBreakdown;
use crate::context::{EvaluatedNode, ValueCalculationContext};
use crate::error::{CalculationError, ConfigurationError, ReclamationError};
use crate::events::{
    BufferingEventViewProvider, Delivery, EventBuffer, ListenerId, SuspendableEventsComposite,
};
use crate::graph::DependencyGraph;
use crate::modifier::{CalculatorUpdate, Modifier};
use crate::registry::{ModifierRegistry, RegistrationChange};
use crate::selector::{NodeKey, NodeType, PathDefinition};
use crate::stat::Stat;
use crate::value::Value;

const STAT_COLLECTION: &str = "stat-collection";

/// Calculator-assigned subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

/// A subscribed node's value changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueChange {
    pub key: NodeKey,
    pub previous: Value,
    pub current: Value,
}

/// A declared stat was added to or removed from the calculator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StatCollectionChange {
    Added(Stat),
    Removed(Stat),
}

/// A modifier the calculator refused to add or remove.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedModifier {
    pub modifier: Modifier,
    pub error: ConfigurationError,
}

/// Outcome of [`Calculator::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub added: usize,
    pub removed: usize,
    pub rejected: Vec<RejectedModifier>,
}

impl UpdateReport {
    /// Returns `true` if no modifier was rejected.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Outcome of [`Calculator::remove_unused_nodes`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReclamationReport {
    pub removed_nodes: usize,
    pub removed_stats: usize,
    pub failures: Vec<ReclamationError>,
}

type Listener = Box<dyn FnMut(&ValueChange)>;

struct Subscription {
    key: NodeKey,
    delivery: Delivery,
    listener_id: ListenerId,
    last: Value,
    listener: Listener,
}

/// Modifier-driven stat calculator.
///
/// # Examples
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use modcalc::calculator::Calculator;
/// use modcalc::events::Delivery;
/// use modcalc::{CalculatorUpdate, Form, Modifier, ModifierSource, NodeKey, Stat, Value};
///
/// let life = Stat::new("Life");
/// let base = Modifier::constant(life.clone(), Form::BaseAdd, 50.0, ModifierSource::global());
/// let extra = Modifier::constant(life.clone(), Form::BaseAdd, 20.0, ModifierSource::global());
///
/// let mut calculator = Calculator::new();
/// calculator.update(CalculatorUpdate::adding(vec![base, extra.clone()]));
/// assert_eq!(calculator.total(&life).unwrap(), Value::scalar(70.0));
///
/// let changes = Rc::new(RefCell::new(Vec::new()));
/// let sink = changes.clone();
/// calculator.subscribe(NodeKey::total(life.clone()), Delivery::Buffered, move |change| {
///     sink.borrow_mut().push(change.current);
/// });
///
/// calculator.update(CalculatorUpdate::removing(vec![extra]));
/// assert_eq!(*changes.borrow(), vec![Value::scalar(50.0)]);
/// ```
pub struct Calculator {
    registry: ModifierRegistry,
    graph: DependencyGraph,
    /// Values of clean nodes.
    cache: HashMap<NodeKey, Value>,

    suspender: Rc<SuspendableEventsComposite>,
    node_events: Rc<EventBuffer<NodeKey, NodeKey>>,
    providers: HashMap<NodeKey, BufferingEventViewProvider<NodeKey, NodeKey>>,
    stat_collection: BufferingEventViewProvider<&'static str, StatCollectionChange>,

    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_subscription: u64,
    pending_immediate: Rc<RefCell<Vec<SubscriptionId>>>,
    pending_buffered: Rc<RefCell<Vec<SubscriptionId>>>,
}

impl Calculator {
    pub fn new() -> Self {
        let suspender = Rc::new(SuspendableEventsComposite::new());
        let node_events = Rc::new(EventBuffer::new());
        let stat_events = Rc::new(EventBuffer::new());
        suspender.add(node_events.clone());
        suspender.add(stat_events.clone());

        Self {
            registry: ModifierRegistry::new(),
            graph: DependencyGraph::new(),
            cache: HashMap::new(),
            suspender,
            node_events,
            providers: HashMap::new(),
            stat_collection: BufferingEventViewProvider::new(STAT_COLLECTION, stat_events),
            subscriptions: HashMap::new(),
            next_subscription: 0,
            pending_immediate: Rc::new(RefCell::new(Vec::new())),
            pending_buffered: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Declare a stat so it may receive modifiers.
    ///
    /// Returns `false` if it already was declared.
    pub fn declare_stat(&mut self, stat: Stat) -> bool {
        if self.define(&stat) {
            self.deliver_pending(Delivery::Immediate);
            self.deliver_pending(Delivery::Buffered);
        }
        if !self.registry.declare(stat.clone()) {
            return false;
        }
        debug!(%stat, "declared stat");
        self.stat_collection.raise(StatCollectionChange::Added(stat));
        true
    }

    /// Declare several stats. Buffered stat-collection subscribers receive
    /// one merged notification.
    pub fn declare_stats(&mut self, stats: impl IntoIterator<Item = Stat>) -> usize {
        let suspender = Rc::clone(&self.suspender);
        let declared = {
            let _guard = suspender.suspend();
            stats
                .into_iter()
                .filter(|stat| self.declare_stat(stat.clone()))
                .count()
        };
        self.deliver_pending(Delivery::Buffered);
        declared
    }

    pub fn undeclare_stat(&mut self, stat: &Stat) -> bool {
        if !self.registry.undeclare(stat) {
            return false;
        }
        debug!(%stat, "undeclared stat");
        self.stat_collection
            .raise(StatCollectionChange::Removed(stat.clone()));
        true
    }

    pub fn is_declared(&self, stat: &Stat) -> bool {
        self.registry.is_declared(stat)
    }

    /// Declared stats that carry an explicit-registration marker.
    pub fn explicitly_registered_stats(&self) -> Vec<Stat> {
        self.registry
            .declared()
            .filter(|stat| stat.explicit_registration().is_some())
            .collect()
    }

    /// Canonical definitions of every stat the calculator has seen.
    pub fn definitions(&self) -> Vec<Stat> {
        self.registry.definitions().cloned().collect()
    }

    /// Record `stat`'s definition. If the known definition gained
    /// companions, behaviors or a marker, every node of the stat is
    /// invalidated. Returns whether that happened.
    fn define(&mut self, stat: &Stat) -> bool {
        if !self.registry.define(stat) {
            return false;
        }
        debug!(%stat, "stat definition changed");
        let mut keys = self.graph.nodes_of(stat);
        keys.extend(self.cache.keys().filter(|key| key.stat == *stat).cloned());
        for key in keys {
            self.invalidate(key);
        }
        true
    }

    pub fn subscribe_stat_collection(
        &self,
        delivery: Delivery,
        handler: impl Fn(&[StatCollectionChange]) + 'static,
    ) -> ListenerId {
        self.stat_collection.view(delivery).subscribe(handler)
    }

    pub fn unsubscribe_stat_collection(&self, delivery: Delivery, id: ListenerId) -> bool {
        self.stat_collection.view(delivery).unsubscribe(id)
    }

    /// Apply a batch of modifier removals and additions.
    ///
    /// Removals are applied first. A rejected modifier leaves the tables
    /// untouched for it and is listed in the report; the rest of the batch
    /// still applies.
    pub fn update(&mut self, update: CalculatorUpdate) -> UpdateReport {
        let mut report = UpdateReport::default();
        let suspender = Rc::clone(&self.suspender);
        {
            let _guard = suspender.suspend();
            for modifier in update.removed {
                match self.unregister(&modifier) {
                    Ok(()) => report.removed += 1,
                    Err(error) => {
                        warn!(%modifier, %error, "modifier removal rejected");
                        report.rejected.push(RejectedModifier { modifier, error });
                    }
                }
                self.deliver_pending(Delivery::Immediate);
            }
            for modifier in update.added {
                match self.register(&modifier) {
                    Ok(()) => report.added += 1,
                    Err(error) => {
                        warn!(%modifier, %error, "modifier rejected");
                        report.rejected.push(RejectedModifier { modifier, error });
                    }
                }
                self.deliver_pending(Delivery::Immediate);
            }
        }
        self.deliver_pending(Delivery::Buffered);

        debug!(
            added = report.added,
            removed = report.removed,
            rejected = report.rejected.len(),
            "applied calculator update"
        );
        report
    }

    pub fn add_modifiers(&mut self, modifiers: Vec<Modifier>) -> UpdateReport {
        self.update(CalculatorUpdate::adding(modifiers))
    }

    pub fn remove_modifiers(&mut self, modifiers: Vec<Modifier>) -> UpdateReport {
        self.update(CalculatorUpdate::removing(modifiers))
    }

    fn register(&mut self, modifier: &Modifier) -> Result<(), ConfigurationError> {
        if modifier.stats().is_empty() {
            return Err(ConfigurationError::EmptyStats);
        }
        for stat in modifier.stats() {
            self.define(stat);
        }
        for stat in modifier.stats() {
            self.registry.validate(stat, modifier)?;
        }
        for (index, stat) in modifier.stats().iter().enumerate() {
            match self.registry.add(stat, modifier.clone()) {
                Ok(change) => self.invalidate_modifier_nodes(stat, modifier, change),
                Err(error) => {
                    // A stat listed twice can conflict with itself.
                    for earlier in &modifier.stats()[..index] {
                        if let Ok(change) = self.registry.remove(earlier, modifier) {
                            self.invalidate_modifier_nodes(earlier, modifier, change);
                        }
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn unregister(&mut self, modifier: &Modifier) -> Result<(), ConfigurationError> {
        if modifier.stats().is_empty() {
            return Err(ConfigurationError::EmptyStats);
        }
        for (index, stat) in modifier.stats().iter().enumerate() {
            match self.registry.remove(stat, modifier) {
                Ok(change) => self.invalidate_modifier_nodes(stat, modifier, change),
                Err(error) => {
                    for earlier in &modifier.stats()[..index] {
                        if let Ok(change) = self.registry.add(earlier, modifier.clone()) {
                            self.invalidate_modifier_nodes(earlier, modifier, change);
                        }
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn invalidate_modifier_nodes(&mut self, stat: &Stat, modifier: &Modifier, change: RegistrationChange) {
        self.invalidate(NodeKey::new(
            stat.clone(),
            modifier.form().node_type(),
            modifier.path(),
        ));
        if change.path_set_changed {
            self.invalidate(NodeKey::new(
                stat.clone(),
                NodeType::UncappedSubtotal,
                PathDefinition::main(),
            ));
        }
    }

    /// Drop `start` and every node that transitively read it from the
    /// cache, raising their change events.
    fn invalidate(&mut self, start: NodeKey) {
        let mut stack = vec![start];
        let mut visited = HashSet::new();
        while let Some(key) = stack.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            self.cache.remove(&key);
            trace!(node = %key, "invalidated");
            if let Some(provider) = self.providers.get(&key) {
                provider.raise(key.clone());
            }
            stack.extend(self.graph.dependents(&key));
        }
    }

    fn deliver_pending(&mut self, delivery: Delivery) {
        let pending = match delivery {
            Delivery::Immediate => Rc::clone(&self.pending_immediate),
            Delivery::Buffered => Rc::clone(&self.pending_buffered),
        };
        let ids: Vec<SubscriptionId> = pending.borrow_mut().drain(..).collect();
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            let key = match self.subscriptions.get(&id) {
                Some(subscription) => subscription.key.clone(),
                None => continue,
            };
            let current = self.value_of_key_or_unset(&key);
            if let Some(subscription) = self.subscriptions.get_mut(&id) {
                if subscription.last == current {
                    continue;
                }
                let change = ValueChange {
                    key,
                    previous: subscription.last,
                    current,
                };
                subscription.last = current;
                (subscription.listener)(&change);
            }
        }
    }

    /// Value of `stat`'s `node_type` facet on `path`.
    pub fn value(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> Result<Value, CalculationError> {
        self.evaluate(&NodeKey::new(stat.clone(), node_type, path.clone()))
    }

    pub fn total(&mut self, stat: &Stat) -> Result<Value, CalculationError> {
        self.evaluate(&NodeKey::total(stat.clone()))
    }

    /// Like [`Calculator::value`], but a failed evaluation is logged and
    /// reported as unset.
    pub fn value_or_unset(&mut self, stat: &Stat, node_type: NodeType, path: &PathDefinition) -> Value {
        self.value_of_key_or_unset(&NodeKey::new(stat.clone(), node_type, path.clone()))
    }

    fn value_of_key_or_unset(&mut self, key: &NodeKey) -> Value {
        match self.evaluate(key) {
            Ok(value) => value,
            Err(error) => {
                warn!(node = %key, %error, "evaluation failed, reporting unset");
                Value::UNSET
            }
        }
    }

    /// Evaluate `key`, then cache every node the pass computed.
    pub fn evaluate(&mut self, key: &NodeKey) -> Result<Value, CalculationError> {
        if self.define(&key.stat) {
            self.deliver_pending(Delivery::Immediate);
            self.deliver_pending(Delivery::Buffered);
        }
        if let Some(value) = self.cache.get(key) {
            return Ok(*value);
        }
        let mut context = ValueCalculationContext::new(&self.registry, &self.cache);
        let result = context.evaluate(key.clone());
        let evaluated = context.finish();
        self.commit(evaluated);
        result
    }

    /// Record the reads of every node of a pass and cache the ones that
    /// succeeded. Failed nodes stay uncached but wired, so a later fix of
    /// what they read invalidates them.
    fn commit(&mut self, evaluated: Vec<EvaluatedNode>) {
        for node in evaluated {
            self.graph.set_dependencies(&node.key, node.dependencies);
            match node.value {
                Some(value) => {
                    self.cache.insert(node.key, value);
                }
                None => {
                    self.cache.remove(&node.key);
                }
            }
        }
    }

    /// Contributions and facet values of `stat` on `path`.
    pub fn breakdown(&mut self, stat: &Stat, path: &PathDefinition) -> Result<StatBreakdown, CalculationError> {
        if self.define(stat) {
            self.deliver_pending(Delivery::Immediate);
            self.deliver_pending(Delivery::Buffered);
        }
        let mut context = ValueCalculationContext::new(&self.registry, &self.cache);
        let result = StatBreakdown::collect(&mut context, &self.registry, stat, path);
        let evaluated = context.finish();
        self.commit(evaluated);
        result
    }

    /// Live modifiers of `stat`.
    pub fn modifiers(&self, stat: &Stat) -> Vec<Modifier> {
        self.registry.all_modifiers(stat)
    }

    /// Stats with live modifiers.
    pub fn stats(&self) -> Vec<Stat> {
        self.registry
            .stats()
            .filter(|stat| self.registry.has_modifiers(stat))
            .cloned()
            .collect()
    }

    /// Nodes in the dependency graph.
    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    pub fn cached_node_count(&self) -> usize {
        self.cache.len()
    }

    /// Call `listener` whenever the value of `key` changes.
    ///
    /// The node is evaluated right away, so the first notification reports
    /// the change from the current value.
    pub fn subscribe(
        &mut self,
        key: NodeKey,
        delivery: Delivery,
        listener: impl FnMut(&ValueChange) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        let pending = match delivery {
            Delivery::Immediate => Rc::clone(&self.pending_immediate),
            Delivery::Buffered => Rc::clone(&self.pending_buffered),
        };
        let node_events = Rc::clone(&self.node_events);
        let provider = self
            .providers
            .entry(key.clone())
            .or_insert_with(|| BufferingEventViewProvider::new(key.clone(), node_events));
        let listener_id = provider
            .view(delivery)
            .subscribe(move |_| pending.borrow_mut().push(id));

        let last = self.value_of_key_or_unset(&key);
        self.graph.add_node(key.clone());
        self.subscriptions.insert(
            id,
            Subscription {
                key,
                delivery,
                listener_id,
                last,
                listener: Box::new(listener),
            },
        );
        id
    }

    /// Returns `false` if `id` is not an active subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let subscription = match self.subscriptions.remove(&id) {
            Some(subscription) => subscription,
            None => return false,
        };
        if let Some(provider) = self.providers.get(&subscription.key) {
            provider
                .view(subscription.delivery)
                .unsubscribe(subscription.listener_id);
            if provider.subscriber_count() == 0 {
                self.providers.remove(&subscription.key);
            }
        }
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Remove nodes nothing depends on and nobody subscribes to, then
    /// registry entries of stats left without modifiers or nodes.
    ///
    /// Failures are logged, counted and skipped.
    pub fn remove_unused_nodes(&mut self) -> ReclamationReport {
        let mut report = ReclamationReport::default();

        loop {
            let candidates: Vec<NodeKey> = self
                .graph
                .unreferenced()
                .into_iter()
                .filter(|key| !self.providers.contains_key(key))
                .collect();
            if candidates.is_empty() {
                break;
            }
            let mut progressed = false;
            for key in candidates {
                match self.graph.remove_node(&key) {
                    Ok(()) => {
                        self.cache.remove(&key);
                        report.removed_nodes += 1;
                        progressed = true;
                    }
                    Err(error) => {
                        warn!(%error, "node reclamation failed");
                        self.cache.remove(&key);
                        report.failures.push(error);
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        let unused: Vec<Stat> = self
            .registry
            .stats()
            .filter(|stat| !self.registry.has_modifiers(stat) && !self.registry.is_declared(stat))
            .cloned()
            .collect();
        for stat in unused {
            match self.remove_stat(&stat) {
                Ok(true) => report.removed_stats += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(%error, "stat reclamation failed");
                    report.failures.push(error);
                }
            }
        }

        debug!(
            removed_nodes = report.removed_nodes,
            removed_stats = report.removed_stats,
            failures = report.failures.len(),
            "reclaimed unused nodes"
        );
        report
    }

    fn remove_stat(&mut self, stat: &Stat) -> Result<bool, ReclamationError> {
        if self.graph.has_nodes_of(stat) {
            return Err(ReclamationError::StatInUse(stat.clone()));
        }
        Ok(self.registry.remove_stat(stat))
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}
