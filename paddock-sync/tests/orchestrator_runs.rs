//! Orchestrator integration against a mock upstream: run lifecycle,
//! fan-out partial failure, retry exhaustion, cancellation and child
//! task enqueueing.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use paddock_common::events::{EventBus, PaddockEvent};
use paddock_sync::cache::CacheGateway;
use paddock_sync::db;
use paddock_sync::model::{QueuedTask, RunState, TaskKind};
use paddock_sync::reconcile::Reconciler;
use paddock_sync::sync::{Backoff, RetryPolicy, SyncOrchestrator, TaskQueue};
use paddock_sync::upstream::client::CacheTtls;
use paddock_sync::upstream::{RateGate, RetryConfig, UpstreamClient};

fn orchestrator_for(
    pool: &SqlitePool,
    base_url: &str,
) -> (Arc<SyncOrchestrator>, mpsc::UnboundedReceiver<QueuedTask>, EventBus) {
    let client = UpstreamClient::new(
        base_url,
        Arc::new(RateGate::new(Duration::from_millis(1))),
        CacheGateway::new(100),
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        CacheTtls {
            series: Duration::from_secs(60),
            seasons: Duration::from_secs(60),
            schedule: Duration::from_secs(60),
        },
        Duration::from_secs(5),
    )
    .unwrap();

    let events = EventBus::new(64);
    let (queue, rx) = TaskQueue::new();
    let orchestrator = Arc::new(SyncOrchestrator::new(
        pool.clone(),
        Arc::new(client),
        events.clone(),
        RetryPolicy {
            max_attempts: 2,
            backoff: Backoff::Linear {
                step: Duration::from_millis(1),
            },
        },
        queue,
    ));
    (orchestrator, rx, events)
}

fn task(kind: TaskKind) -> QueuedTask {
    QueuedTask {
        task: kind,
        parent_run_id: None,
        force_refresh: false,
    }
}

#[tokio::test]
async fn series_metadata_run_completes_and_is_audited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"series_id": 280, "series_name": "GT3 Challenge", "license_group": "C",
             "car_class_ids": [2523], "active": true},
            {"series_id": 311, "series_name": "Prototype Cup", "multiclass": true}
        ])))
        .mount(&server)
        .await;

    let pool = test_pool().await;
    let (orchestrator, _rx, events) = orchestrator_for(&pool, &server.uri());
    let mut event_rx = events.subscribe();

    let run = orchestrator
        .run_task(task(TaskKind::SeriesMetadata), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.counts.created, 2);
    assert!(run.failed_units().is_empty());
    assert_eq!(db::series::count_series(&pool).await.unwrap(), 2);

    let audited = db::sync_runs::load_run(&pool, run.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(audited.state, "COMPLETED");
    assert_eq!(audited.counts.created, 2);
    assert!(audited.ended_at.is_some());

    // Lifecycle events: Started first, Finished last
    let mut seen = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(PaddockEvent::SyncRunStarted { .. })));
    match seen.last() {
        Some(PaddockEvent::SyncRunFinished { state, created, .. }) => {
            assert_eq!(state, "COMPLETED");
            assert_eq!(*created, 2);
        }
        other => panic!("expected SyncRunFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn season_fanout_reports_partial_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/seasons/current"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"season_id": 4501, "series_id": 280,
             "season_name": "GT3 Challenge - 2026 Season 3", "active": true,
             "start_date": "2026-06-16T00:00:00Z", "end_date": "2026-09-08T00:00:00Z",
             "schedules": [{
                 "race_week_num": 1, "layout_code": "spa-grand-prix",
                 "race_time_descriptors": [
                     {"repeating": true, "first_session_offset_minutes": 45, "repeat_minutes": 120}
                 ],
                 "car_class_ids": [2523]
             }]},
            {"season_id": 4502, "series_id": 311,
             "season_name": "Prototype Cup - 2026 Season 3", "active": true,
             "start_date": "2026-06-16T00:00:00Z", "end_date": "2026-09-08T00:00:00Z",
             "schedules": [{
                 "race_week_num": 1, "layout_code": "unknown-circuit",
                 "race_time_descriptors": [
                     {"repeating": true, "first_session_offset_minutes": 0, "repeat_minutes": 60}
                 ]
             }]}
        ])))
        .mount(&server)
        .await;

    let pool = test_pool().await;
    seed_layouts(&pool).await;
    Reconciler::new(pool.clone())
        .reconcile_series_list(&[gt3_series(), prototype_series()])
        .await;

    let (orchestrator, _rx, _events) = orchestrator_for(&pool, &server.uri());
    let run = orchestrator
        .run_task(task(TaskKind::CurrentSeasons), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.state, RunState::PartiallyFailed);
    assert_eq!(run.failed_units(), vec!["season:4502/round:1".to_string()]);

    // The healthy season landed in full
    let season = db::seasons::load_season_by_external_id(&pool, 4501)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db::events::count_events(&pool, season.guid).await.unwrap(), 1);

    // Both seasons exist; only the bad round is missing
    let bad_season = db::seasons::load_season_by_external_id(&pool, 4502)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db::events::count_events(&pool, bad_season.guid).await.unwrap(), 0);
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let pool = test_pool().await;
    let (orchestrator, _rx, _events) = orchestrator_for(&pool, &server.uri());

    let run = orchestrator
        .run_task(task(TaskKind::SeriesMetadata), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert!(run.error.is_some());
    assert_eq!(db::series::count_series(&pool).await.unwrap(), 0);

    let audited = db::sync_runs::load_run(&pool, run.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(audited.state, "FAILED");
    assert!(audited.error.is_some());
}

#[tokio::test]
async fn transient_error_then_success_completes() {
    let server = MockServer::start().await;
    // First request fails, later attempts succeed
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"series_id": 280, "series_name": "GT3 Challenge"}
        ])))
        .mount(&server)
        .await;

    let pool = test_pool().await;
    let (orchestrator, _rx, _events) = orchestrator_for(&pool, &server.uri());

    let run = orchestrator
        .run_task(task(TaskKind::SeriesMetadata), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(db::series::count_series(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn cancelled_token_cancels_before_fetch() {
    let server = MockServer::start().await;
    let pool = test_pool().await;
    let (orchestrator, _rx, _events) = orchestrator_for(&pool, &server.uri());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = orchestrator
        .run_task(task(TaskKind::SeriesMetadata), &cancel)
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Cancelled);
    let audited = db::sync_runs::load_run(&pool, run.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(audited.state, "CANCELLED");
}

#[tokio::test]
async fn past_seasons_enqueues_child_schedule_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/280/past-seasons"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"season_id": 4400, "series_id": 280, "season_name": "GT3 Challenge - 2025 Season 4"},
            {"season_id": 4300, "series_id": 280, "season_name": "GT3 Challenge - 2025 Season 3"}
        ])))
        .mount(&server)
        .await;

    let pool = test_pool().await;
    Reconciler::new(pool.clone())
        .reconcile_series(&gt3_series())
        .await
        .unwrap();

    let (orchestrator, mut rx, _events) = orchestrator_for(&pool, &server.uri());
    let run = orchestrator
        .run_task(task(TaskKind::PastSeasons), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);

    let first = rx.recv().await.unwrap();
    assert_eq!(first.task, TaskKind::SeasonSchedule { season_external_id: 4400 });
    assert_eq!(first.parent_run_id, Some(run.run_id));

    let second = rx.recv().await.unwrap();
    assert_eq!(second.task, TaskKind::SeasonSchedule { season_external_id: 4300 });
    assert_eq!(second.parent_run_id, Some(run.run_id));
}
