//! Tests for the calculation thread and its handle.

use std::sync::Arc;
use std::time::Duration;

use modcalc::builder::{ModifierTemplate, ValueTemplate};
use modcalc::parse::{ParserParameter, TemplateParser};
use modcalc::*;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;

fn life_mod(value: f64) -> Modifier {
    Modifier::constant(Stat::new("Life"), Form::BaseAdd, value, ModifierSource::global())
}

#[tokio::test]
async fn test_debounced_updates_are_applied_as_one_batch() {
    let config = SchedulerConfig::default().with_debounce(Duration::from_millis(100));
    let scheduler = CalculationScheduler::spawn(config, Calculator::new).unwrap();
    let handle = scheduler.handle();
    let life = Stat::new("Life");

    let mut changes = handle.changes();
    handle.watch(NodeKey::total(life.clone())).await.unwrap();

    for value in [1.0, 2.0, 3.0] {
        handle
            .submit_debounced(CalculatorUpdate::adding(vec![life_mod(value)]))
            .await
            .unwrap();
    }

    let change = timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("debounced batch should be applied")
        .unwrap();
    assert_eq!(change.key, NodeKey::total(life.clone()));
    assert_eq!(change.previous, Value::UNSET);
    assert_eq!(change.current, Value::scalar(6.0));
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_flush_applies_pending_batch() {
    let config = SchedulerConfig::default().with_debounce(Duration::from_secs(60));
    let scheduler = CalculationScheduler::spawn(config, Calculator::new).unwrap();
    let handle = scheduler.handle();
    let life = Stat::new("Life");
    let m = life_mod(10.0);

    handle
        .submit_debounced(CalculatorUpdate::adding(vec![m.clone(), life_mod(5.0)]))
        .await
        .unwrap();
    handle
        .submit_debounced(CalculatorUpdate::removing(vec![m]))
        .await
        .unwrap();
    assert_eq!(handle.total(&life).await.unwrap(), Value::UNSET);

    handle.flush_debounced().await.unwrap();
    assert_eq!(handle.total(&life).await.unwrap(), Value::scalar(5.0));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_updates_apply_in_submission_order() {
    let scheduler = CalculationScheduler::spawn(SchedulerConfig::default(), Calculator::new).unwrap();
    let handle = scheduler.handle();
    let life = Stat::new("Life");
    let m = life_mod(10.0);

    let first = handle.submit(CalculatorUpdate::adding(vec![m.clone()]));
    let second = handle.submit(CalculatorUpdate::removing(vec![m.clone()]));
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().added, 1);
    assert_eq!(second.unwrap().removed, 1);
    assert_eq!(handle.total(&life).await.unwrap(), Value::UNSET);

    let report = handle
        .submit(CalculatorUpdate::removing(vec![m]))
        .await
        .unwrap();
    assert!(!report.is_clean());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_parse_and_submit() {
    let parser = Arc::new(TemplateParser::new().with_rule(
        "+# to maximum Life",
        vec![ModifierTemplate::new("Life", Form::BaseAdd, ValueTemplate::Captured(0))],
    ));
    let scheduler = CalculationScheduler::spawn(SchedulerConfig::default(), Calculator::new).unwrap();
    let handle = scheduler.handle();

    let submission = handle
        .parse_and_submit(
            parser,
            vec![
                ParserParameter::new("+40 to maximum Life", ModifierSource::global()),
                ParserParameter::new("+12 to maximum Life", ModifierSource::global()),
                ParserParameter::new("Cannot Leech", ModifierSource::global()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(submission.failed_lines, vec!["Cannot Leech"]);
    assert_eq!(submission.report.added, 2);
    assert_eq!(
        handle.total(&Stat::new("Life")).await.unwrap(),
        Value::scalar(52.0)
    );

    let breakdown = handle
        .breakdown(&Stat::new("Life"), &PathDefinition::main())
        .await
        .unwrap();
    assert_eq!(breakdown.contributions_of(Form::BaseAdd).count(), 2);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_reclamation_runs_on_the_calculation_thread() {
    let config = SchedulerConfig::default()
        .with_reclamation(Duration::from_millis(20), Duration::from_millis(20));
    let scheduler = CalculationScheduler::spawn(config, Calculator::new).unwrap();
    let handle = scheduler.handle();
    let m = life_mod(10.0);

    handle
        .submit(CalculatorUpdate::adding(vec![m.clone()]))
        .await
        .unwrap();
    handle.total(&Stat::new("Life")).await.unwrap();
    handle
        .submit(CalculatorUpdate::removing(vec![m]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = handle.reclaim_now().await.unwrap();
    assert_eq!(report.removed_nodes, 0);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_watch_and_unwatch() {
    let scheduler = CalculationScheduler::spawn(SchedulerConfig::default(), Calculator::new).unwrap();
    let handle = scheduler.handle();
    let mut changes = handle.changes();

    let id = handle.watch(NodeKey::total(Stat::new("Life"))).await.unwrap();
    handle
        .submit(CalculatorUpdate::adding(vec![life_mod(3.0)]))
        .await
        .unwrap();
    assert_eq!(changes.recv().await.unwrap().current, Value::scalar(3.0));

    assert!(handle.unwatch(id).await.unwrap());
    assert!(!handle.unwatch(id).await.unwrap());
    handle
        .submit(CalculatorUpdate::adding(vec![life_mod(3.0)]))
        .await
        .unwrap();
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handle_fails_after_shutdown() {
    let scheduler = CalculationScheduler::spawn(SchedulerConfig::default(), Calculator::new).unwrap();
    let handle = scheduler.handle();
    assert!(handle.declare_stat(Stat::new("Enemy.IsShocked")).await.unwrap());

    scheduler.shutdown().await.unwrap();
    assert!(matches!(
        handle.submit(CalculatorUpdate::empty()).await,
        Err(SchedulerError::CommandChannelClosed)
    ));
    assert!(matches!(
        handle.shutdown().await,
        Err(SchedulerError::CommandChannelClosed)
    ));
}
