//! Single-writer calculation scheduler.
//!
//! [`CalculationScheduler::spawn`] starts a dedicated `calculation` thread
//! that owns the [`Calculator`]. Everything else talks to it through a
//! cloneable [`CalculatorHandle`], which sends [`Command`]s over an ordered
//! channel:
//!
//! - updates are applied in arrival order, each as one suspended batch;
//! - debounced updates are merged until the debounce window has been quiet,
//!   and a direct update flushes a pending debounced batch first;
//! - value changes of watched nodes are published on a broadcast channel;
//! - unused nodes are reclaimed on the calculation thread when it is idle.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::breakdown::StatBreakdown;
use crate::calculator::{
    Calculator, ReclamationReport, SubscriptionId, UpdateReport, ValueChange,
};
use crate::config::SchedulerConfig;
use crate::error::{CalculationError, SchedulerError};
use crate::events::Delivery;
use crate::modifier::CalculatorUpdate;
use crate::parse::{Parser, ParserParameter};
use crate::selector::{NodeKey, NodeType, PathDefinition};
use crate::stat::Stat;
use crate::value::Value;

/// Commands processed by the calculation thread.
pub enum Command {
    /// Apply a batch now.
    Update {
        update: CalculatorUpdate,
        reply: oneshot::Sender<UpdateReport>,
    },
    /// Merge a batch into the pending debounced batch.
    Debounced { update: CalculatorUpdate },
    /// Apply the pending debounced batch now.
    FlushDebounced { reply: oneshot::Sender<()> },
    Query {
        key: NodeKey,
        reply: oneshot::Sender<Result<Value, CalculationError>>,
    },
    Breakdown {
        stat: Stat,
        path: PathDefinition,
        reply: oneshot::Sender<Result<StatBreakdown, CalculationError>>,
    },
    /// Publish changes of `key` on the change channel.
    Watch {
        key: NodeKey,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unwatch {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    DeclareStat {
        stat: Stat,
        reply: oneshot::Sender<bool>,
    },
    ReclaimNow {
        reply: oneshot::Sender<ReclamationReport>,
    },
    /// Stop after the current command. Pending debounced updates are
    /// discarded.
    Shutdown,
}

/// Updates waiting for the debounce window to pass.
#[derive(Debug)]
pub struct DebouncedUpdates {
    window: std::time::Duration,
    pending: Option<CalculatorUpdate>,
    deadline: Option<Instant>,
}

impl DebouncedUpdates {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window,
            pending: None,
            deadline: None,
        }
    }

    /// Merge `update` and restart the window at `now`. A window too long to
    /// represent never expires; only a flush applies the batch.
    pub fn push(&mut self, update: CalculatorUpdate, now: Instant) {
        self.pending = Some(match self.pending.take() {
            Some(pending) => CalculatorUpdate::accumulate(pending, update),
            None => update,
        });
        self.deadline = now.checked_add(self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn take(&mut self) -> Option<CalculatorUpdate> {
        self.deadline = None;
        self.pending.take()
    }
}

/// Owns the calculator on the calculation thread.
struct CalculationWorker {
    calculator: Calculator,
    config: SchedulerConfig,
    command_rx: mpsc::Receiver<Command>,
    change_tx: broadcast::Sender<ValueChange>,
    debounced: DebouncedUpdates,
    last_activity: Instant,
    needs_reclamation: bool,
}

impl CalculationWorker {
    fn new(
        calculator: Calculator,
        config: SchedulerConfig,
        command_rx: mpsc::Receiver<Command>,
        change_tx: broadcast::Sender<ValueChange>,
    ) -> Self {
        let debounced = DebouncedUpdates::new(config.debounce());
        Self {
            calculator,
            config,
            command_rx,
            change_tx,
            debounced,
            last_activity: Instant::now(),
            needs_reclamation: false,
        }
    }

    async fn run(mut self) {
        info!("calculation thread started");
        let mut reclamation = tokio::time::interval(self.config.reclamation_interval());
        reclamation.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        reclamation.tick().await;

        loop {
            let deadline = self.debounced.deadline();
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        self.last_activity = Instant::now();
                        self.needs_reclamation = true;
                        self.handle_command(command);
                    }
                },
                _ = wait_until(deadline) => self.flush_debounced(),
                _ = reclamation.tick() => self.reclaim_if_idle(),
            }
        }

        if self.debounced.is_pending() {
            debug!("discarding pending debounced updates on shutdown");
        }
        info!("calculation thread stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Update { update, reply } => {
                self.flush_debounced();
                let report = self.calculator.update(update);
                let _ = reply.send(report);
            }
            Command::Debounced { update } => {
                self.debounced.push(update, Instant::now());
            }
            Command::FlushDebounced { reply } => {
                self.flush_debounced();
                let _ = reply.send(());
            }
            Command::Query { key, reply } => {
                let _ = reply.send(self.calculator.evaluate(&key));
            }
            Command::Breakdown { stat, path, reply } => {
                let _ = reply.send(self.calculator.breakdown(&stat, &path));
            }
            Command::Watch { key, reply } => {
                let change_tx = self.change_tx.clone();
                let id = self.calculator.subscribe(key, Delivery::Buffered, move |change| {
                    // No receivers is fine.
                    let _ = change_tx.send(change.clone());
                });
                let _ = reply.send(id);
            }
            Command::Unwatch { id, reply } => {
                let _ = reply.send(self.calculator.unsubscribe(id));
            }
            Command::DeclareStat { stat, reply } => {
                let _ = reply.send(self.calculator.declare_stat(stat));
            }
            Command::ReclaimNow { reply } => {
                let report = self.calculator.remove_unused_nodes();
                self.needs_reclamation = false;
                let _ = reply.send(report);
            }
            Command::Shutdown => {}
        }
    }

    fn flush_debounced(&mut self) {
        let Some(update) = self.debounced.take() else {
            return;
        };
        if update.is_empty() {
            debug!("debounced updates cancelled out");
            return;
        }
        self.calculator.update(update);
    }

    fn reclaim_if_idle(&mut self) {
        if !self.needs_reclamation
            || self.debounced.is_pending()
            || self.last_activity.elapsed() < self.config.idle_threshold()
        {
            return;
        }
        let report = self.calculator.remove_unused_nodes();
        if !report.failures.is_empty() {
            warn!(
                failures = report.failures.len(),
                "idle reclamation finished with failures"
            );
        }
        self.needs_reclamation = false;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Parse outcome returned by [`CalculatorHandle::parse_and_submit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseSubmission {
    pub failed_lines: Vec<String>,
    pub remaining_substrings: Vec<String>,
    pub report: UpdateReport,
}

/// Cloneable, `Send` handle to the calculation thread.
#[derive(Clone)]
pub struct CalculatorHandle {
    command_tx: mpsc::Sender<Command>,
    change_tx: broadcast::Sender<ValueChange>,
}

impl CalculatorHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SchedulerError::CommandChannelClosed)?;
        reply_rx.await.map_err(SchedulerError::ReplyChannelClosed)
    }

    /// Apply `update` after everything submitted before it.
    pub async fn submit(&self, update: CalculatorUpdate) -> Result<UpdateReport, SchedulerError> {
        self.request(|reply| Command::Update { update, reply }).await
    }

    /// Merge `update` into the debounced batch.
    pub async fn submit_debounced(&self, update: CalculatorUpdate) -> Result<(), SchedulerError> {
        self.command_tx
            .send(Command::Debounced { update })
            .await
            .map_err(|_| SchedulerError::CommandChannelClosed)
    }

    /// Apply the debounced batch without waiting for the window.
    pub async fn flush_debounced(&self) -> Result<(), SchedulerError> {
        self.request(|reply| Command::FlushDebounced { reply }).await
    }

    /// Parse `lines` on the blocking pool and submit the modifiers.
    ///
    /// Lines the parser could not understand are logged and returned.
    pub async fn parse_and_submit<P>(
        &self,
        parser: Arc<P>,
        lines: Vec<ParserParameter>,
    ) -> Result<ParseSubmission, SchedulerError>
    where
        P: Parser + ?Sized + 'static,
    {
        let result = tokio::task::spawn_blocking(move || parser.parse_all(&lines))
            .await
            .map_err(SchedulerError::ParserTask)?;
        for line in &result.failed_lines {
            warn!(line = %line, "modifier line could not be understood");
        }
        let report = self
            .submit(CalculatorUpdate::adding(result.modifiers))
            .await?;
        Ok(ParseSubmission {
            failed_lines: result.failed_lines,
            remaining_substrings: result.remaining_substrings,
            report,
        })
    }

    pub async fn value(
        &self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> Result<Value, SchedulerError> {
        let key = NodeKey::new(stat.clone(), node_type, path.clone());
        Ok(self.request(|reply| Command::Query { key, reply }).await??)
    }

    pub async fn total(&self, stat: &Stat) -> Result<Value, SchedulerError> {
        self.value(stat, NodeType::Total, &PathDefinition::main()).await
    }

    pub async fn breakdown(
        &self,
        stat: &Stat,
        path: &PathDefinition,
    ) -> Result<StatBreakdown, SchedulerError> {
        let (stat, path) = (stat.clone(), path.clone());
        Ok(self
            .request(|reply| Command::Breakdown { stat, path, reply })
            .await??)
    }

    /// Publish changes of `key` on [`CalculatorHandle::changes`].
    pub async fn watch(&self, key: NodeKey) -> Result<SubscriptionId, SchedulerError> {
        self.request(|reply| Command::Watch { key, reply }).await
    }

    pub async fn unwatch(&self, id: SubscriptionId) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::Unwatch { id, reply }).await
    }

    pub fn changes(&self) -> broadcast::Receiver<ValueChange> {
        self.change_tx.subscribe()
    }

    pub async fn declare_stat(&self, stat: Stat) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::DeclareStat { stat, reply }).await
    }

    pub async fn reclaim_now(&self) -> Result<ReclamationReport, SchedulerError> {
        self.request(|reply| Command::ReclaimNow { reply }).await
    }

    /// Ask the calculation thread to stop.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.command_tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| SchedulerError::CommandChannelClosed)
    }
}

/// Owns the calculation thread.
pub struct CalculationScheduler {
    handle: CalculatorHandle,
    thread: Option<JoinHandle<()>>,
}

impl CalculationScheduler {
    /// Start the calculation thread. `factory` builds the calculator on that
    /// thread.
    pub fn spawn<F>(config: SchedulerConfig, factory: F) -> Result<Self, SchedulerError>
    where
        F: FnOnce() -> Calculator + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer_size.max(1));
        let (change_tx, _) = broadcast::channel(config.event_buffer_size.max(1));
        let worker_changes = change_tx.clone();

        let thread = std::thread::Builder::new()
            .name("calculation".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!(error = %err, "failed to build calculation runtime");
                        return;
                    }
                };
                let worker = CalculationWorker::new(factory(), config, command_rx, worker_changes);
                runtime.block_on(worker.run());
            })
            .map_err(SchedulerError::ThreadSpawn)?;

        Ok(Self {
            handle: CalculatorHandle {
                command_tx,
                change_tx,
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> CalculatorHandle {
        self.handle.clone()
    }

    /// Stop the calculation thread and wait for it to finish.
    pub async fn shutdown(mut self) -> Result<(), SchedulerError> {
        // Already stopped is fine.
        let _ = self.handle.shutdown().await;
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|_| SchedulerError::WorkerPanicked)?
            .map_err(|_| SchedulerError::WorkerPanicked)
    }
}

impl Drop for CalculationScheduler {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.handle.command_tx.try_send(Command::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::Modifier;
    use crate::selector::Form;
    use crate::source::ModifierSource;
    use std::time::Duration;

    fn life_mod(value: f64) -> Modifier {
        Modifier::constant(Stat::new("Life"), Form::BaseAdd, value, ModifierSource::global())
    }

    #[test]
    fn test_debounced_updates_merge_and_restart_window() {
        let mut debounced = DebouncedUpdates::new(Duration::from_millis(500));
        let start = Instant::now();
        let a = life_mod(1.0);

        debounced.push(CalculatorUpdate::adding(vec![a.clone()]), start);
        debounced.push(
            CalculatorUpdate::adding(vec![life_mod(2.0)]),
            start + Duration::from_millis(100),
        );
        assert_eq!(
            debounced.deadline(),
            Some(start + Duration::from_millis(600))
        );

        debounced.push(CalculatorUpdate::removing(vec![a]), start + Duration::from_millis(200));
        let merged = debounced.take().unwrap();
        assert_eq!(merged.added.len(), 1);
        assert!(merged.removed.is_empty());
        assert!(!debounced.is_pending());
        assert_eq!(debounced.deadline(), None);
    }

    #[test]
    fn test_unbounded_window_waits_for_flush() {
        let config = SchedulerConfig::default().with_debounce(Duration::MAX);
        let mut debounced = DebouncedUpdates::new(config.debounce());
        debounced.push(CalculatorUpdate::adding(vec![life_mod(1.0)]), Instant::now());
        assert!(debounced.is_pending());
        assert_eq!(debounced.deadline(), None);
        assert_eq!(debounced.take().map(|update| update.added.len()), Some(1));
    }

    #[tokio::test]
    async fn test_submit_and_query() {
        let scheduler = CalculationScheduler::spawn(SchedulerConfig::default(), Calculator::new).unwrap();
        let handle = scheduler.handle();

        let report = handle
            .submit(CalculatorUpdate::adding(vec![life_mod(50.0), life_mod(20.0)]))
            .await
            .unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(handle.total(&Stat::new("Life")).await.unwrap(), Value::scalar(70.0));

        scheduler.shutdown().await.unwrap();
        assert!(matches!(
            handle.total(&Stat::new("Life")).await,
            Err(SchedulerError::CommandChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_direct_update_flushes_pending_debounced_batch() {
        let config = SchedulerConfig::default().with_debounce(Duration::from_secs(60));
        let scheduler = CalculationScheduler::spawn(config, Calculator::new).unwrap();
        let handle = scheduler.handle();

        handle
            .submit_debounced(CalculatorUpdate::adding(vec![life_mod(5.0)]))
            .await
            .unwrap();
        handle
            .submit(CalculatorUpdate::adding(vec![life_mod(1.0)]))
            .await
            .unwrap();
        assert_eq!(handle.total(&Stat::new("Life")).await.unwrap(), Value::scalar(6.0));
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cycle_reaches_the_caller() {
        let scheduler = CalculationScheduler::spawn(SchedulerConfig::default(), Calculator::new).unwrap();
        let handle = scheduler.handle();
        let life = Stat::new("Life");
        handle
            .submit(CalculatorUpdate::adding(vec![Modifier::new(
                vec![life.clone()],
                Form::BaseAdd,
                crate::modifier::StatReference::total(life.clone()),
                ModifierSource::global(),
            )]))
            .await
            .unwrap();
        assert!(matches!(
            handle.total(&life).await,
            Err(SchedulerError::Calculation(CalculationError::Cycle { .. }))
        ));
        scheduler.shutdown().await.unwrap();
    }
}
