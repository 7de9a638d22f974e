use super::*;
use crate::calendar::DayKey;
use crate::grid::ViewWindow;
use crate::limits::*;

const H: Ms = 3_600_000;
const M: Ms = 60_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("gridlane_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine_at(path: &PathBuf) -> Engine {
    Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap()
}

fn monday() -> DayKey {
    DayKey::from_ymd(2024, 1, 8).unwrap()
}

async fn calendar(engine: &Engine) -> Ulid {
    let id = Ulid::new();
    engine.create_calendar(id, Some("team".into())).await.unwrap();
    id
}

async fn schedule(engine: &Engine, cid: Ulid, start: Ms, end: Ms) -> Ulid {
    let id = Ulid::new();
    engine
        .schedule_appointment(id, cid, Some(start), Some(end), None)
        .await
        .unwrap();
    id
}

fn info(calendar_id: Ulid, start: Ms, end: Ms) -> AppointmentInfo {
    AppointmentInfo {
        id: Ulid::new(),
        calendar_id,
        start: Some(start),
        end: Some(end),
        title: None,
    }
}

// ── Calendars ────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_calendars() {
    let engine = engine_at(&test_wal_path("create_list.wal"));
    let a = calendar(&engine).await;
    let b = calendar(&engine).await;

    let listed = engine.list_calendars().await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, a.min(b));
    assert_eq!(listed[0].name.as_deref(), Some("team"));
    assert_eq!(listed[0].appointment_count, 0);
}

#[tokio::test]
async fn duplicate_calendar_rejected() {
    let engine = engine_at(&test_wal_path("dup_calendar.wal"));
    let id = calendar(&engine).await;
    assert!(matches!(
        engine.create_calendar(id, None).await,
        Err(EngineError::AlreadyExists(x)) if x == id
    ));
}

#[tokio::test]
async fn overlong_calendar_name_rejected() {
    let engine = engine_at(&test_wal_path("long_name.wal"));
    let name = "n".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(
        engine.create_calendar(Ulid::new(), Some(name)).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn delete_calendar_cascades() {
    let engine = engine_at(&test_wal_path("cascade.wal"));
    let cid = calendar(&engine).await;
    let aid = schedule(&engine, cid, monday().at(9, 0), monday().at(10, 0)).await;

    engine.delete_calendar(cid).await.unwrap();
    assert!(engine.list_calendars().await.is_empty());
    assert!(engine.calendar_for_appointment(&aid).is_none());
    assert!(matches!(
        engine.move_appointment(aid, 0, H).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.delete_calendar(cid).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Appointments ─────────────────────────────────────────

#[tokio::test]
async fn schedule_keeps_missing_bounds() {
    let engine = engine_at(&test_wal_path("null_bounds.wal"));
    let cid = calendar(&engine).await;
    let aid = Ulid::new();
    engine
        .schedule_appointment(aid, cid, Some(monday().at(9, 0)), None, Some("draft".into()))
        .await
        .unwrap();

    let stored = engine.get_appointments(cid).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].end, None);
    assert_eq!(stored[0].title.as_deref(), Some("draft"));

    // stored, but the layout pass drops it
    let grid = engine
        .grid_layout(cid, &ViewWindow::new(monday(), 7))
        .await
        .unwrap();
    assert_eq!(grid.node_count(), 0);
}

#[tokio::test]
async fn inverted_bounds_rejected() {
    let engine = engine_at(&test_wal_path("inverted.wal"));
    let cid = calendar(&engine).await;
    let result = engine
        .schedule_appointment(Ulid::new(), cid, Some(2 * H), Some(H), None)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidSpan { start, end }) if start == 2 * H && end == H
    ));
    assert!(engine.get_appointments(cid).await.is_empty());
}

#[tokio::test]
async fn schedule_into_unknown_calendar() {
    let engine = engine_at(&test_wal_path("unknown_cal.wal"));
    let missing = Ulid::new();
    assert!(matches!(
        engine.schedule_appointment(Ulid::new(), missing, Some(0), Some(H), None).await,
        Err(EngineError::NotFound(x)) if x == missing
    ));
}

#[tokio::test]
async fn duplicate_appointment_rejected_across_calendars() {
    let engine = engine_at(&test_wal_path("dup_appt.wal"));
    let a = calendar(&engine).await;
    let b = calendar(&engine).await;
    let aid = schedule(&engine, a, 0, H).await;
    assert!(matches!(
        engine.schedule_appointment(aid, b, Some(0), Some(H), None).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn move_keeps_insertion_order() {
    let engine = engine_at(&test_wal_path("move_order.wal"));
    let cid = calendar(&engine).await;
    let d = monday();
    let first = schedule(&engine, cid, d.at(9, 0), d.at(10, 0)).await;
    let second = schedule(&engine, cid, d.at(11, 0), d.at(12, 0)).await;

    let moved_in = engine
        .move_appointment(first, d.at(14, 0), d.at(15, 30))
        .await
        .unwrap();
    assert_eq!(moved_in, cid);

    let stored = engine.get_appointments(cid).await;
    assert_eq!(stored[0].id, first);
    assert_eq!(stored[0].start, Some(d.at(14, 0)));
    assert_eq!(stored[0].end, Some(d.at(15, 30)));
    assert_eq!(stored[1].id, second);
}

#[tokio::test]
async fn move_validates_bounds() {
    let engine = engine_at(&test_wal_path("move_invalid.wal"));
    let cid = calendar(&engine).await;
    let aid = schedule(&engine, cid, 0, H).await;
    assert!(matches!(
        engine.move_appointment(aid, H, 0).await,
        Err(EngineError::InvalidSpan { .. })
    ));
    assert!(matches!(
        engine.move_appointment(aid, 0, 367 * 24 * H).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(engine.get_appointments(cid).await[0].end, Some(H));
}

#[tokio::test]
async fn cancel_removes_appointment() {
    let engine = engine_at(&test_wal_path("cancel.wal"));
    let cid = calendar(&engine).await;
    let aid = schedule(&engine, cid, 0, H).await;

    assert_eq!(engine.cancel_appointment(aid).await.unwrap(), cid);
    assert!(engine.get_appointments(cid).await.is_empty());
    assert!(matches!(
        engine.cancel_appointment(aid).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn unknown_calendar_has_no_appointments() {
    let engine = engine_at(&test_wal_path("unknown_list.wal"));
    assert!(engine.get_appointments(Ulid::new()).await.is_empty());
}

// ── Batches ──────────────────────────────────────────────

#[tokio::test]
async fn batch_spans_calendars() {
    let engine = engine_at(&test_wal_path("batch_ok.wal"));
    let a = calendar(&engine).await;
    let b = calendar(&engine).await;
    let batch = vec![info(a, 0, H), info(b, 0, H), info(a, H, 2 * H)];

    engine.batch_schedule_appointments(batch.clone()).await.unwrap();
    let in_a = engine.get_appointments(a).await;
    assert_eq!(in_a, vec![batch[0].clone(), batch[2].clone()]);
    assert_eq!(engine.get_appointments(b).await, vec![batch[1].clone()]);
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let engine = engine_at(&test_wal_path("batch_invalid.wal"));
    let cid = calendar(&engine).await;

    let bad_span = vec![info(cid, 0, H), info(cid, 2 * H, H)];
    assert!(engine.batch_schedule_appointments(bad_span).await.is_err());

    let repeated = info(cid, 0, H);
    let duplicate = vec![repeated.clone(), repeated.clone()];
    assert!(matches!(
        engine.batch_schedule_appointments(duplicate).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(engine.calendar_for_appointment(&repeated.id).is_none());

    let unknown_calendar = vec![info(cid, 0, H), info(Ulid::new(), 0, H)];
    assert!(matches!(
        engine.batch_schedule_appointments(unknown_calendar).await,
        Err(EngineError::NotFound(_))
    ));

    assert!(engine.get_appointments(cid).await.is_empty());
}

#[tokio::test]
async fn batch_size_capped() {
    let engine = engine_at(&test_wal_path("batch_cap.wal"));
    let cid = calendar(&engine).await;
    let batch = (0..=MAX_BATCH_SIZE as i64).map(|i| info(cid, i * H, i * H + M)).collect();
    assert!(matches!(
        engine.batch_schedule_appointments(batch).await,
        Err(EngineError::LimitExceeded("batch too large"))
    ));
    assert!(engine.batch_schedule_appointments(Vec::new()).await.is_ok());
}

// ── Layout ───────────────────────────────────────────────

#[tokio::test]
async fn layout_through_engine() {
    let engine = engine_at(&test_wal_path("layout.wal"));
    let cid = calendar(&engine).await;
    let d = monday();

    let a = schedule(&engine, cid, d.at(9, 0), d.at(11, 0)).await;
    let b = schedule(&engine, cid, d.at(10, 0), d.at(12, 0)).await;
    let c = schedule(&engine, cid, d.at(11, 0), d.at(11, 10)).await;
    let off = schedule(&engine, cid, d.add_days(1).midnight(), d.add_days(3).midnight()).await;

    let grid = engine
        .grid_layout(cid, &ViewWindow::new(d, 7))
        .await
        .unwrap();
    let day = &grid.days[&d];
    assert_eq!(day.node(a).unwrap().level, 0);
    assert_eq!(day.node(b).unwrap().level, 1);
    // c starts when a ends and reuses lane 0
    assert_eq!(day.node(c).unwrap().level, 0);
    assert_eq!(day.max_level, 1);

    let blocker = grid.blockers.node(off).unwrap();
    assert_eq!(blocker.level, 0);
    assert_eq!(blocker.width, 2);
}

#[tokio::test]
async fn layout_follows_moves() {
    let engine = engine_at(&test_wal_path("layout_move.wal"));
    let cid = calendar(&engine).await;
    let d = monday();
    let a = schedule(&engine, cid, d.at(9, 0), d.at(10, 0)).await;
    let b = schedule(&engine, cid, d.at(9, 30), d.at(10, 30)).await;

    let view = ViewWindow::new(d, 1);
    assert_eq!(engine.grid_layout(cid, &view).await.unwrap().days[&d].max_level, 1);

    engine.move_appointment(b, d.at(13, 0), d.at(14, 0)).await.unwrap();
    let grid = engine.grid_layout(cid, &view).await.unwrap();
    assert_eq!(grid.days[&d].max_level, 0);
    assert_eq!(grid.days[&d].node(a).unwrap().width, 1);
}

#[tokio::test]
async fn layout_rejects_bad_view() {
    let engine = engine_at(&test_wal_path("layout_view.wal"));
    let cid = calendar(&engine).await;
    let empty = ViewWindow::new(monday(), 0);
    assert!(matches!(
        engine.grid_layout(cid, &empty).await,
        Err(EngineError::InvalidView(_))
    ));
    let inverted = ViewWindow::new(monday(), 1).with_visible_hours(18, 8);
    assert!(matches!(
        engine.grid_layout(cid, &inverted).await,
        Err(EngineError::InvalidView(_))
    ));
}

#[tokio::test]
async fn layout_of_unknown_calendar() {
    let engine = engine_at(&test_wal_path("layout_unknown.wal"));
    assert!(matches!(
        engine.grid_layout(Ulid::new(), &ViewWindow::new(monday(), 7)).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let d = monday();
    let (cid, kept, gone) = {
        let engine = engine_at(&path);
        let cid = calendar(&engine).await;
        let kept = schedule(&engine, cid, d.at(9, 0), d.at(10, 0)).await;
        let gone = schedule(&engine, cid, d.at(9, 0), d.at(10, 0)).await;
        engine.move_appointment(kept, d.at(15, 0), d.at(16, 0)).await.unwrap();
        engine.cancel_appointment(gone).await.unwrap();
        (cid, kept, gone)
    };

    let engine = engine_at(&path);
    let stored = engine.get_appointments(cid).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, kept);
    assert_eq!(stored[0].start, Some(d.at(15, 0)));
    assert_eq!(engine.calendar_for_appointment(&kept), Some(cid));
    assert!(engine.calendar_for_appointment(&gone).is_none());
}

#[tokio::test]
async fn deleted_calendar_stays_deleted_after_restart() {
    let path = test_wal_path("restart_delete.wal");
    let (cid, aid) = {
        let engine = engine_at(&path);
        let cid = calendar(&engine).await;
        let aid = schedule(&engine, cid, 0, H).await;
        engine.delete_calendar(cid).await.unwrap();
        (cid, aid)
    };

    let engine = engine_at(&path);
    assert!(engine.get_calendar(&cid).is_none());
    assert!(engine.calendar_for_appointment(&aid).is_none());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let (cid, aid) = {
        let engine = engine_at(&path);
        let cid = calendar(&engine).await;
        let aid = schedule(&engine, cid, 0, H).await;
        for i in 1..10 {
            engine.move_appointment(aid, i * H, i * H + 30 * M).await.unwrap();
        }
        let doomed = calendar(&engine).await;
        engine.delete_calendar(doomed).await.unwrap();

        assert_eq!(engine.wal_appends_since_compact().await, 13);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        (cid, aid)
    };

    assert_eq!(Wal::replay(&path).unwrap().len(), 2);
    let engine = engine_at(&path);
    let stored = engine.get_appointments(cid).await;
    assert_eq!(stored[0].id, aid);
    assert_eq!(stored[0].start, Some(9 * H));
    assert_eq!(engine.list_calendars().await.len(), 1);
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn mutations_are_broadcast() {
    let engine = engine_at(&test_wal_path("notify.wal"));
    let cid = calendar(&engine).await;
    let mut rx = engine.notify.subscribe(cid);

    let aid = schedule(&engine, cid, 0, H).await;
    engine.move_appointment(aid, H, 2 * H).await.unwrap();
    engine.cancel_appointment(aid).await.unwrap();

    assert!(matches!(rx.recv().await.unwrap(), Event::AppointmentScheduled { id, .. } if id == aid));
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::AppointmentMoved {
            id: aid,
            calendar_id: cid,
            span: Span::new(H, 2 * H),
        }
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::AppointmentCancelled {
            id: aid,
            calendar_id: cid,
        }
    );
}

#[tokio::test]
async fn calendar_delete_closes_channel() {
    let engine = engine_at(&test_wal_path("notify_delete.wal"));
    let cid = calendar(&engine).await;
    let mut rx = engine.notify.subscribe(cid);

    engine.delete_calendar(cid).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), Event::CalendarDeleted { id: cid });
    assert!(rx.recv().await.is_err());
}

// ── Interleavings ────────────────────────────────────────

const SETTLE: std::time::Duration = std::time::Duration::from_millis(50);

#[tokio::test]
async fn schedule_during_compaction_survives_restart() {
    let path = test_wal_path("compact_race.wal");
    let (a, aid) = {
        let engine = Arc::new(engine_at(&path));
        let a = calendar(&engine).await;
        let b = calendar(&engine).await;

        // compaction stalls on b while it holds the engine exclusively
        let held = engine.get_calendar(&b).unwrap().write_owned().await;
        let compact = tokio::spawn({
            let engine = engine.clone();
            async move { engine.compact_wal().await }
        });
        tokio::time::sleep(SETTLE).await;

        let aid = Ulid::new();
        let scheduled = tokio::spawn({
            let engine = engine.clone();
            async move { engine.schedule_appointment(aid, a, Some(0), Some(H), None).await }
        });
        tokio::time::sleep(SETTLE).await;
        assert!(!scheduled.is_finished());

        drop(held);
        compact.await.unwrap().unwrap();
        scheduled.await.unwrap().unwrap();
        (a, aid)
    };

    let engine = engine_at(&path);
    let stored = engine.get_appointments(a).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, aid);
}

#[tokio::test]
async fn schedule_racing_delete_is_not_found() {
    let engine = Arc::new(engine_at(&test_wal_path("delete_race.wal")));
    let cid = calendar(&engine).await;

    let held = engine.get_calendar(&cid).unwrap().write_owned().await;
    let deleted = tokio::spawn({
        let engine = engine.clone();
        async move { engine.delete_calendar(cid).await }
    });
    tokio::time::sleep(SETTLE).await;
    let aid = Ulid::new();
    let scheduled = tokio::spawn({
        let engine = engine.clone();
        async move { engine.schedule_appointment(aid, cid, Some(0), Some(H), None).await }
    });
    tokio::time::sleep(SETTLE).await;
    drop(held);

    deleted.await.unwrap().unwrap();
    assert!(matches!(
        scheduled.await.unwrap(),
        Err(EngineError::NotFound(x)) if x == cid
    ));
    assert!(engine.calendar_for_appointment(&aid).is_none());

    engine.create_calendar(cid, None).await.unwrap();
    engine
        .schedule_appointment(aid, cid, Some(0), Some(H), None)
        .await
        .unwrap();
    assert_eq!(engine.get_appointments(cid).await.len(), 1);
}

#[tokio::test]
async fn move_racing_delete_is_not_found() {
    let engine = Arc::new(engine_at(&test_wal_path("move_race.wal")));
    let cid = calendar(&engine).await;
    let aid = schedule(&engine, cid, 0, H).await;

    let held = engine.get_calendar(&cid).unwrap().write_owned().await;
    let deleted = tokio::spawn({
        let engine = engine.clone();
        async move { engine.delete_calendar(cid).await }
    });
    tokio::time::sleep(SETTLE).await;
    let moved = tokio::spawn({
        let engine = engine.clone();
        async move { engine.move_appointment(aid, H, 2 * H).await }
    });
    tokio::time::sleep(SETTLE).await;
    drop(held);

    deleted.await.unwrap().unwrap();
    assert!(matches!(
        moved.await.unwrap(),
        Err(EngineError::NotFound(x)) if x == aid
    ));
}

#[tokio::test]
async fn same_id_into_two_calendars_schedules_once() {
    let engine = Arc::new(engine_at(&test_wal_path("id_race.wal")));
    let a = calendar(&engine).await;
    let b = calendar(&engine).await;
    let aid = Ulid::new();

    let held_a = engine.get_calendar(&a).unwrap().write_owned().await;
    let held_b = engine.get_calendar(&b).unwrap().write_owned().await;
    let attempts: Vec<_> = [a, b]
        .into_iter()
        .map(|cid| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.schedule_appointment(aid, cid, Some(0), Some(H), None).await
            })
        })
        .collect();
    tokio::time::sleep(SETTLE).await;
    drop(held_a);
    drop(held_b);

    let mut ok = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert!(matches!(e, EngineError::AlreadyExists(x) if x == aid)),
        }
    }
    assert_eq!(ok, 1);
    let stored = engine.get_appointments(a).await.len() + engine.get_appointments(b).await.len();
    assert_eq!(stored, 1);
}
