//! Reconciler integration: idempotency, failure isolation, commutativity
//! and descriptor replacement against a real SQLite schema.

mod common;

use common::*;
use paddock_sync::db;
use paddock_sync::model::ScheduleDescriptor;
use paddock_sync::reconcile::{ReconcileError, Reconciler};

#[tokio::test]
async fn second_identical_series_sync_creates_nothing() {
    let pool = test_pool().await;
    let reconciler = Reconciler::new(pool.clone());

    let first = reconciler.reconcile_series_list(&[gt3_series()]).await;
    assert!(first.is_clean());
    assert_eq!(first.counts.created, 1);
    assert_eq!(first.counts.updated, 0);

    let second = reconciler.reconcile_series_list(&[gt3_series()]).await;
    assert!(second.is_clean());
    assert_eq!(second.counts.created, 0);
    assert_eq!(second.counts.updated, 1);

    assert_eq!(db::series::count_series(&pool).await.unwrap(), 1);
    let series = db::series::load_series_by_external_id(&pool, 280)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(series.name, "GT3 Challenge");
    assert_eq!(series.allowed_class_ids, vec![2523]);
}

#[tokio::test]
async fn season_round_persists_the_full_graph() {
    let pool = test_pool().await;
    seed_layouts(&pool).await;
    let reconciler = Reconciler::new(pool.clone());
    reconciler.reconcile_series(&gt3_series()).await.unwrap();

    let summary = reconciler
        .reconcile_season(&gt3_season(vec![pattern_round(1, "spa-grand-prix")]))
        .await
        .unwrap();
    assert!(summary.is_clean());
    // Season + event + one class + one restriction
    assert_eq!(summary.counts.created, 4);
    assert_eq!(summary.counts.skipped, 0);

    let season = db::seasons::load_season_by_external_id(&pool, 4501)
        .await
        .unwrap()
        .unwrap();
    let event = db::events::load_event(&pool, season.guid, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event.schedule,
        ScheduleDescriptor::Pattern {
            first_session_offset_min: 45,
            repeat_interval_min: 120,
            session_count: None,
        }
    );

    let classes = db::classes::load_event_classes(&pool, event.guid).await.unwrap();
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0].car_class_id, 2523);

    let restrictions = db::classes::load_car_restrictions(&pool, event.guid)
        .await
        .unwrap();
    assert_eq!(restrictions.len(), 1);
    assert_eq!(restrictions[0].car_id, 133);
    assert_eq!(restrictions[0].max_pct_fuel_fill, Some(55.0));

    // Pattern events never materialize slots
    assert!(db::slots::load_slots(&pool, event.guid).await.unwrap().is_empty());
}

#[tokio::test]
async fn season_resync_is_idempotent() {
    let pool = test_pool().await;
    seed_layouts(&pool).await;
    let reconciler = Reconciler::new(pool.clone());
    reconciler.reconcile_series(&gt3_series()).await.unwrap();

    let payload = gt3_season(vec![pattern_round(1, "spa-grand-prix"), pattern_round(2, "monza-gp")]);
    reconciler.reconcile_season(&payload).await.unwrap();
    let second = reconciler.reconcile_season(&payload).await.unwrap();

    assert!(second.is_clean());
    assert_eq!(second.counts.created, 0);

    let season = db::seasons::load_season_by_external_id(&pool, 4501)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db::events::count_events(&pool, season.guid).await.unwrap(), 2);
}

#[tokio::test]
async fn missing_parent_series_fails_the_season() {
    let pool = test_pool().await;
    seed_layouts(&pool).await;
    let reconciler = Reconciler::new(pool.clone());

    let err = reconciler
        .reconcile_season(&gt3_season(vec![pattern_round(1, "spa-grand-prix")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::MissingParent { series_external_id: 280, season_external_id: 4501 }
    ));
    assert_eq!(db::seasons::count_seasons(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn unresolved_layout_fails_only_its_round() {
    let pool = test_pool().await;
    seed_layouts(&pool).await;
    let reconciler = Reconciler::new(pool.clone());
    reconciler.reconcile_series(&gt3_series()).await.unwrap();

    let summary = reconciler
        .reconcile_season(&gt3_season(vec![
            pattern_round(1, "spa-grand-prix"),
            pattern_round(2, "not-a-real-circuit"),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].unit, "round:2");
    assert!(matches!(
        summary.errors[0].error,
        ReconcileError::UnresolvedLayout { .. }
    ));
    assert_eq!(summary.counts.skipped, 1);

    // The good round landed, the bad one rolled back
    let season = db::seasons::load_season_by_external_id(&pool, 4501)
        .await
        .unwrap()
        .unwrap();
    assert!(db::events::load_event(&pool, season.guid, 1).await.unwrap().is_some());
    assert!(db::events::load_event(&pool, season.guid, 2).await.unwrap().is_none());
}

#[tokio::test]
async fn independent_series_commute() {
    let pool_ab = test_pool().await;
    let pool_ba = test_pool().await;

    Reconciler::new(pool_ab.clone())
        .reconcile_series_list(&[gt3_series(), prototype_series()])
        .await;
    Reconciler::new(pool_ba.clone())
        .reconcile_series_list(&[prototype_series(), gt3_series()])
        .await;

    for pool in [&pool_ab, &pool_ba] {
        assert_eq!(db::series::count_series(pool).await.unwrap(), 2);
        let gt3 = db::series::load_series_by_external_id(pool, 280)
            .await
            .unwrap()
            .unwrap();
        let proto = db::series::load_series_by_external_id(pool, 311)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gt3.name, "GT3 Challenge");
        assert_eq!(proto.name, "Prototype Cup");
        assert!(proto.multiclass);
    }
}

#[tokio::test]
async fn independent_seasons_commute() {
    let pool_ab = test_pool().await;
    let pool_ba = test_pool().await;

    let season_a = gt3_season(vec![pattern_round(1, "spa-grand-prix")]);
    let season_b = prototype_season(vec![pattern_round(1, "monza-gp")]);

    for (pool, first, second) in [
        (&pool_ab, &season_a, &season_b),
        (&pool_ba, &season_b, &season_a),
    ] {
        seed_layouts(pool).await;
        let reconciler = Reconciler::new((*pool).clone());
        reconciler
            .reconcile_series_list(&[gt3_series(), prototype_series()])
            .await;
        assert!(reconciler.reconcile_season(first).await.unwrap().is_clean());
        assert!(reconciler.reconcile_season(second).await.unwrap().is_clean());
    }

    // Both orders produce the same graph
    for pool in [&pool_ab, &pool_ba] {
        assert_eq!(db::seasons::count_seasons(pool).await.unwrap(), 2);

        let gt3 = db::series::load_series_by_external_id(pool, 280)
            .await
            .unwrap()
            .unwrap();
        let proto = db::series::load_series_by_external_id(pool, 311)
            .await
            .unwrap()
            .unwrap();

        let season_a = db::seasons::load_season_by_external_id(pool, 4501)
            .await
            .unwrap()
            .unwrap();
        let season_b = db::seasons::load_season_by_external_id(pool, 4520)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(season_a.series_id, gt3.guid);
        assert_eq!(season_b.series_id, proto.guid);

        let event_a = db::events::load_event(pool, season_a.guid, 1)
            .await
            .unwrap()
            .unwrap();
        let event_b = db::events::load_event(pool, season_b.guid, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event_a.schedule,
            ScheduleDescriptor::Pattern {
                first_session_offset_min: 45,
                repeat_interval_min: 120,
                session_count: None,
            }
        );
        assert_eq!(event_a.schedule, event_b.schedule);
    }
}

#[tokio::test]
async fn pattern_to_fixed_times_replaces_the_descriptor() {
    let pool = test_pool().await;
    seed_layouts(&pool).await;
    let reconciler = Reconciler::new(pool.clone());
    reconciler.reconcile_series(&gt3_series()).await.unwrap();

    reconciler
        .reconcile_season(&gt3_season(vec![pattern_round(1, "spa-grand-prix")]))
        .await
        .unwrap();

    // Upstream converts the round to two fixed sessions
    let times = vec![utc(2026, 6, 20, 14, 0), utc(2026, 6, 21, 14, 0)];
    let summary = reconciler
        .reconcile_season(&gt3_season(vec![fixed_round(1, "spa-grand-prix", times.clone())]))
        .await
        .unwrap();
    assert!(summary.is_clean());

    let season = db::seasons::load_season_by_external_id(&pool, 4501)
        .await
        .unwrap()
        .unwrap();
    let event = db::events::load_event(&pool, season.guid, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.schedule, ScheduleDescriptor::FixedTimes(times.clone()));

    let slots = db::slots::load_slots(&pool, event.guid).await.unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].starts_at, times[0]);

    // And back again: the slots disappear with the descriptor
    reconciler
        .reconcile_season(&gt3_season(vec![pattern_round(1, "spa-grand-prix")]))
        .await
        .unwrap();
    let event = db::events::load_event(&pool, season.guid, 1)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event.schedule, ScheduleDescriptor::Pattern { .. }));
    assert!(db::slots::load_slots(&pool, event.guid).await.unwrap().is_empty());
}

#[tokio::test]
async fn surviving_fixed_slots_keep_their_identity() {
    let pool = test_pool().await;
    seed_layouts(&pool).await;
    let reconciler = Reconciler::new(pool.clone());
    reconciler.reconcile_series(&gt3_series()).await.unwrap();

    let kept = utc(2026, 6, 20, 14, 0);
    reconciler
        .reconcile_season(&gt3_season(vec![fixed_round(
            1,
            "spa-grand-prix",
            vec![kept, utc(2026, 6, 21, 14, 0)],
        )]))
        .await
        .unwrap();

    let season = db::seasons::load_season_by_external_id(&pool, 4501)
        .await
        .unwrap()
        .unwrap();
    let event = db::events::load_event(&pool, season.guid, 1)
        .await
        .unwrap()
        .unwrap();
    let before = db::slots::load_slots(&pool, event.guid).await.unwrap();
    let kept_guid = before.iter().find(|s| s.starts_at == kept).unwrap().guid;

    // One timestamp survives, one is dropped, one is new
    reconciler
        .reconcile_season(&gt3_season(vec![fixed_round(
            1,
            "spa-grand-prix",
            vec![kept, utc(2026, 6, 22, 14, 0)],
        )]))
        .await
        .unwrap();

    let after = db::slots::load_slots(&pool, event.guid).await.unwrap();
    assert_eq!(after.len(), 2);
    assert_eq!(
        after.iter().find(|s| s.starts_at == kept).unwrap().guid,
        kept_guid
    );
    assert!(after.iter().any(|s| s.starts_at == utc(2026, 6, 22, 14, 0)));
    assert!(!after.iter().any(|s| s.starts_at == utc(2026, 6, 21, 14, 0)));
}

#[tokio::test]
async fn season_cannot_move_between_series() {
    let pool = test_pool().await;
    seed_layouts(&pool).await;
    let reconciler = Reconciler::new(pool.clone());
    reconciler
        .reconcile_series_list(&[gt3_series(), prototype_series()])
        .await;

    reconciler
        .reconcile_season(&gt3_season(vec![pattern_round(1, "spa-grand-prix")]))
        .await
        .unwrap();

    let mut moved = gt3_season(vec![pattern_round(1, "spa-grand-prix")]);
    moved.series_external_id = 311;

    let err = reconciler.reconcile_season(&moved).await.unwrap_err();
    assert!(matches!(err, ReconcileError::ConstraintViolation(_)));

    // Original parentage untouched
    let season = db::seasons::load_season_by_external_id(&pool, 4501)
        .await
        .unwrap()
        .unwrap();
    let gt3 = db::series::load_series_by_external_id(&pool, 280)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(season.series_id, gt3.guid);
}

#[tokio::test]
async fn invalid_interval_rejects_the_round_before_any_write() {
    let pool = test_pool().await;
    seed_layouts(&pool).await;
    let reconciler = Reconciler::new(pool.clone());
    reconciler.reconcile_series(&gt3_series()).await.unwrap();

    let mut bad = pattern_round(1, "spa-grand-prix");
    bad.schedule = ScheduleDescriptor::Pattern {
        first_session_offset_min: 45,
        repeat_interval_min: 0,
        session_count: None,
    };

    let summary = reconciler.reconcile_season(&gt3_season(vec![bad])).await.unwrap();
    assert_eq!(summary.errors.len(), 1);
    assert!(matches!(
        summary.errors[0].error,
        ReconcileError::InvalidSchedule { round_number: 1, .. }
    ));

    let season = db::seasons::load_season_by_external_id(&pool, 4501)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db::events::count_events(&pool, season.guid).await.unwrap(), 0);
}
