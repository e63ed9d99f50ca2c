use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use gym_runner_lib::{
    estimate_one_rep_max, AppService, Config, DbError, NewExercise, Reps, SessionStatus,
    SessionUpdate,
};

struct Fixture {
    service: AppService,
    user_id: i64,
    bench: i64,
    dips: i64,
    push_day: i64,
}

// In-memory service with a user and a "Push Day" template (Bench Press, Dips)
fn setup() -> Result<Fixture> {
    let conn = rusqlite::Connection::open_in_memory()?;
    gym_runner_lib::db::init_db(&conn)?;
    let mut service = AppService {
        config: Config::default(),
        conn,
        db_path: ":memory:".into(),
        config_path: std::env::temp_dir().join("gym-runner-session-test.toml"),
    };

    let user_id = service.create_user("alice")?;
    let bench = service.create_exercise(NewExercise {
        name: "Bench Press",
        muscle_group: "chest",
        default_rest_seconds: Some(90),
        ..Default::default()
    })?;
    let dips = service.create_exercise(NewExercise {
        name: "Dips",
        muscle_group: "triceps",
        default_rest_seconds: Some(60),
        ..Default::default()
    })?;
    let push_day = service.create_template(user_id, "Push Day", None, None)?;
    service.add_exercise_to_template(push_day, bench, 3, Reps::Fixed(10), Some(60.0))?;
    service.add_exercise_to_template(push_day, dips, 3, Reps::ToFailure, None)?;

    Ok(Fixture {
        service,
        user_id,
        bench,
        dips,
        push_day,
    })
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, 18, 0, 0).unwrap()
}

/// Runs a finished session of one exercise with the given weight and reps.
fn log_session(
    fx: &mut Fixture,
    exercise_id: i64,
    started_at: DateTime<Utc>,
    weight: f64,
    reps: Reps,
) -> Result<i64> {
    let session_id = fx.service.start_session_at(fx.user_id, None, started_at)?;
    let slot = fx.service.add_exercise_to_session(session_id, exercise_id)?;
    let id = slot.session_exercise_id;
    fx.service.update_session_exercise(id, SessionUpdate::SetActualSets(3))?;
    fx.service.update_session_exercise(id, SessionUpdate::SetActualReps(reps))?;
    fx.service.update_session_exercise(id, SessionUpdate::SetActualWeight(weight))?;
    fx.service.update_session_exercise(id, SessionUpdate::SetCompleted(true))?;
    fx.service
        .finish_session_at(session_id, started_at + Duration::minutes(50))?;
    Ok(session_id)
}

#[test]
fn test_start_from_template() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;

    let detail = fx.service.get_session_by_id(session_id)?.expect("session exists");
    assert_eq!(detail.status(), SessionStatus::Active);
    assert_eq!(detail.template_name.as_deref(), Some("Push Day"));
    assert_eq!(detail.total_count(), 2);
    assert_eq!(detail.completed_count(), 0);
    for view in &detail.exercises {
        assert!(!view.exercise.completed);
        assert_eq!(view.exercise.actual_sets, None);
        assert_eq!(view.exercise.actual_reps, None);
        assert_eq!(view.exercise.actual_weight, None);
    }
    Ok(())
}

#[test]
fn test_session_mirrors_template_at_start() -> Result<()> {
    let mut fx = setup()?;
    let template = fx.service.get_template_by_id(fx.push_day)?.expect("template exists");
    let expected: Vec<i64> = template.exercises.iter().map(|e| e.exercise_id).collect();

    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;

    // Later template edits don't reach the started session
    fx.service.remove_exercise_from_template(template.exercises[0].id)?;
    fx.service
        .add_exercise_to_template(fx.push_day, fx.bench, 5, Reps::Fixed(5), None)?;
    fx.service
        .reorder_exercises(fx.push_day, &[template.exercises[1].id])?;

    let detail = fx.service.get_session_by_id(session_id)?.expect("session exists");
    let actual: Vec<i64> = detail.exercises.iter().map(|e| e.exercise.exercise_id).collect();
    let positions: Vec<i64> = detail.exercises.iter().map(|e| e.exercise.order_index).collect();
    assert_eq!(actual, expected);
    assert_eq!(positions, vec![0, 1]);
    Ok(())
}

#[test]
fn test_start_without_template_and_add_exercises() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, None)?;
    assert_eq!(fx.service.get_session_by_id(session_id)?.expect("exists").total_count(), 0);

    let first = fx.service.add_exercise_to_session(session_id, fx.dips)?;
    let second = fx.service.add_exercise_to_session(session_id, fx.bench)?;
    assert_eq!(first.rest_seconds, 60);
    assert_eq!(second.rest_seconds, 90);
    assert!(first.ghost.is_none());

    let detail = fx.service.get_session_by_id(session_id)?.expect("exists");
    let slots: Vec<(i64, i64)> = detail
        .exercises
        .iter()
        .map(|e| (e.exercise.id, e.exercise.order_index))
        .collect();
    assert_eq!(
        slots,
        vec![(first.session_exercise_id, 0), (second.session_exercise_id, 1)]
    );

    assert!(fx.service.add_exercise_to_session(session_id, 9999).is_err());
    assert!(fx.service.start_session(fx.user_id, Some(9999)).is_err());
    Ok(())
}

#[test]
fn test_complete_starts_rest_timer_and_weight_keeps_completion() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;
    let detail = fx.service.get_session_by_id(session_id)?.expect("exists");
    let se1 = detail.exercises[0].exercise.id;

    let timer = fx
        .service
        .update_session_exercise(se1, SessionUpdate::SetCompleted(true))?
        .expect("completing starts the rest timer");
    assert_eq!(timer.session_exercise_id, se1);
    assert_eq!(timer.duration_seconds, 90);
    assert!(!timer.is_finished(timer.started_at));
    assert!(timer.is_finished(timer.started_at + Duration::seconds(90)));

    let no_timer = fx
        .service
        .update_session_exercise(se1, SessionUpdate::SetActualWeight(80.0))?;
    assert!(no_timer.is_none());

    let slot = &fx.service.get_session_by_id(session_id)?.expect("exists").exercises[0];
    assert_eq!(slot.exercise.actual_weight, Some(80.0));
    assert!(slot.exercise.completed);

    // Unchecking doesn't start a timer
    let unchecked = fx
        .service
        .update_session_exercise(se1, SessionUpdate::SetCompleted(false))?;
    assert!(unchecked.is_none());
    Ok(())
}

#[test]
fn test_update_rejects_negative_values() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;
    let se1 = fx.service.get_session_by_id(session_id)?.expect("exists").exercises[0]
        .exercise
        .id;

    assert!(fx
        .service
        .update_session_exercise(se1, SessionUpdate::SetActualSets(-1))
        .is_err());
    assert!(fx
        .service
        .update_session_exercise(se1, SessionUpdate::SetActualWeight(-5.0))
        .is_err());
    let err = fx
        .service
        .update_session_exercise(9999, SessionUpdate::SetActualSets(3))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::SessionExerciseNotFound(9999))
    ));
    Ok(())
}

#[test]
fn test_add_and_swap_return_previous_performance() -> Result<()> {
    let mut fx = setup()?;
    let (bench, dips) = (fx.bench, fx.dips);
    let earlier = log_session(&mut fx, dips, day(1), 50.0, Reps::Fixed(12))?;

    let session_id = fx.service.start_session_at(fx.user_id, None, day(2))?;
    let added = fx.service.add_exercise_to_session(session_id, dips)?;
    let ghost = added.ghost.expect("dips were logged before");
    assert_eq!(ghost.session_id, earlier);
    assert_eq!(ghost.weight, Some(50.0));
    assert_eq!(ghost.reps, Some(Reps::Fixed(12)));

    let other = fx.service.add_exercise_to_session(session_id, bench)?;
    assert!(other.ghost.is_none());
    let swapped = fx.service.swap_session_exercise(other.session_exercise_id, dips)?;
    let ghost = swapped.ghost.expect("dips were logged before");
    assert_eq!(ghost.session_id, earlier);
    assert_eq!(ghost.weight, Some(50.0));
    assert_eq!(ghost.reps, Some(Reps::Fixed(12)));
    Ok(())
}

#[test]
fn test_rest_timer_uses_library_rest_or_configured_default() -> Result<()> {
    let mut fx = setup()?;
    fx.service.config.default_rest_seconds = 45;
    assert_eq!(fx.service.rest_seconds_for(fx.dips)?, 60);
    assert_eq!(fx.service.rest_seconds_for(9999)?, 45);

    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;
    let se2 = fx.service.get_session_by_id(session_id)?.expect("exists").exercises[1]
        .exercise
        .id;
    let timer = fx
        .service
        .update_session_exercise(se2, SessionUpdate::SetCompleted(true))?
        .expect("completing starts the rest timer");
    assert_eq!(timer.duration_seconds, 60);
    Ok(())
}

#[test]
fn test_add_after_remove_tolerates_shared_position() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;
    let first = fx.service.get_session_by_id(session_id)?.expect("exists").exercises[0]
        .exercise
        .id;
    fx.service.remove_session_exercise(first)?;
    let added = fx.service.add_exercise_to_session(session_id, fx.bench)?;

    let detail = fx.service.get_session_by_id(session_id)?.expect("exists");
    let positions: Vec<i64> = detail.exercises.iter().map(|e| e.exercise.order_index).collect();
    // Dips kept position 1 and the new slot also lands on 1; ids break the tie
    assert_eq!(positions, vec![1, 1]);
    assert_eq!(detail.exercises[1].exercise.id, added.session_exercise_id);
    Ok(())
}

#[test]
fn test_swap_clears_recorded_values() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;
    let se1 = fx.service.get_session_by_id(session_id)?.expect("exists").exercises[0]
        .exercise
        .id;
    fx.service.update_session_exercise(se1, SessionUpdate::SetActualSets(3))?;
    fx.service.update_session_exercise(se1, SessionUpdate::SetActualReps(Reps::Fixed(8)))?;
    fx.service.update_session_exercise(se1, SessionUpdate::SetActualWeight(70.0))?;
    fx.service.update_session_exercise(se1, SessionUpdate::SetCompleted(true))?;

    let swapped = fx.service.swap_session_exercise(se1, fx.dips)?;
    assert_eq!(swapped.session_exercise_id, se1);
    assert_eq!(swapped.rest_seconds, 60);

    let slot = fx.service.get_session_by_id(session_id)?.expect("exists").exercises[0]
        .exercise
        .clone();
    assert_eq!(slot.exercise_id, fx.dips);
    assert_eq!(slot.actual_sets, None);
    assert_eq!(slot.actual_reps, None);
    assert_eq!(slot.actual_weight, None);
    assert!(!slot.completed);
    assert_eq!(slot.order_index, 0);
    Ok(())
}

#[test]
fn test_remove_then_finish() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;
    let detail = fx.service.get_session_by_id(session_id)?.expect("exists");
    let se2 = detail.exercises[1].exercise.id;

    fx.service.remove_session_exercise(se2)?;
    fx.service.finish_session(session_id)?;

    let finished = fx.service.get_session_by_id(session_id)?.expect("exists");
    assert_eq!(finished.status(), SessionStatus::Completed);
    assert!(finished.session.completed_at.is_some());
    assert_eq!(finished.total_count(), 1);
    assert!(fx.service.last_performance(fx.user_id, fx.dips)?.is_none());
    Ok(())
}

#[test]
fn test_last_performance_uses_most_recent_session() -> Result<()> {
    let mut fx = setup()?;
    let bench = fx.bench;
    // Logged out of order: the later workout gets the smaller id
    let s2 = log_session(&mut fx, bench, day(2), 70.0, Reps::Fixed(8))?;
    let s1 = log_session(&mut fx, bench, day(1), 60.0, Reps::Fixed(10))?;
    assert!(s1 > s2);

    let last = fx
        .service
        .last_performance(fx.user_id, bench)?
        .expect("bench was logged");
    assert_eq!(last.session_id, s2);
    assert_eq!(last.weight, Some(70.0));
    assert_eq!(last.reps, Some(Reps::Fixed(8)));
    assert_eq!(last.sets, Some(3));
    assert_eq!(last.performed_at, day(2));

    // Someone else's sessions don't count
    let bob = fx.service.create_user("bob")?;
    assert!(fx.service.last_performance(bob, bench)?.is_none());
    Ok(())
}

#[test]
fn test_ghost_ignores_current_and_unrecorded_sessions() -> Result<()> {
    let mut fx = setup()?;
    let bench = fx.bench;
    log_session(&mut fx, bench, day(1), 60.0, Reps::Fixed(10))?;

    // A session where bench was present but nothing was logged
    let empty = fx.service.start_session_at(fx.user_id, Some(fx.push_day), day(2))?;
    fx.service.finish_session_at(empty, day(2) + Duration::hours(1))?;

    let current = fx.service.start_session_at(fx.user_id, Some(fx.push_day), day(3))?;
    let se1 = fx.service.get_session_by_id(current)?.expect("exists").exercises[0]
        .exercise
        .id;
    fx.service.update_session_exercise(se1, SessionUpdate::SetActualWeight(100.0))?;

    let detail = fx.service.get_session_by_id(current)?.expect("exists");
    let ghost = detail.exercises[0].ghost.as_ref().expect("bench has history");
    assert_eq!(ghost.weight, Some(60.0));
    assert_eq!(ghost.performed_at, day(1));
    assert!(detail.exercises[1].ghost.is_none());
    Ok(())
}

#[test]
fn test_epley_one_rep_max() -> Result<()> {
    assert_eq!(estimate_one_rep_max(100.0, &Reps::Fixed(1)), 100.0);
    assert_eq!(estimate_one_rep_max(100.0, &Reps::Fixed(10)), 133.0);

    let mut fx = setup()?;
    let bench = fx.bench;
    assert_eq!(fx.service.estimated_one_rep_max(fx.user_id, bench)?, None);
    log_session(&mut fx, bench, day(1), 100.0, Reps::Fixed(10))?;
    assert_eq!(
        fx.service.estimated_one_rep_max(fx.user_id, bench)?,
        Some(133.0)
    );
    Ok(())
}

#[test]
fn test_finished_session_cannot_be_changed() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;
    let se1 = fx.service.get_session_by_id(session_id)?.expect("exists").exercises[0]
        .exercise
        .id;
    fx.service.finish_session(session_id)?;

    let is_not_active = |result: Result<()>| {
        matches!(
            result.unwrap_err().downcast_ref::<DbError>(),
            Some(DbError::SessionNotActive(_))
        )
    };
    assert!(is_not_active(fx.service.discard_session(session_id)));
    assert!(is_not_active(fx.service.finish_session(session_id)));
    assert!(is_not_active(
        fx.service.set_session_notes(session_id, Some("late note"))
    ));
    assert!(is_not_active(fx.service.remove_session_exercise(se1)));
    assert!(is_not_active(
        fx.service
            .update_session_exercise(se1, SessionUpdate::SetActualWeight(50.0))
            .map(|_| ())
    ));
    assert!(is_not_active(
        fx.service.swap_session_exercise(se1, fx.dips).map(|_| ())
    ));
    assert!(is_not_active(
        fx.service.add_exercise_to_session(session_id, fx.dips).map(|_| ())
    ));

    // Still there, still finished
    let detail = fx.service.get_session_by_id(session_id)?.expect("not deleted");
    assert_eq!(detail.status(), SessionStatus::Completed);
    assert_eq!(detail.total_count(), 2);
    Ok(())
}

#[test]
fn test_discard_active_session() -> Result<()> {
    let mut fx = setup()?;
    let session_id = fx.service.start_session(fx.user_id, Some(fx.push_day))?;
    fx.service.set_session_notes(session_id, Some("felt heavy"))?;
    assert_eq!(
        fx.service
            .get_session_by_id(session_id)?
            .expect("exists")
            .session
            .notes
            .as_deref(),
        Some("felt heavy")
    );

    fx.service.discard_session(session_id)?;
    assert!(fx.service.get_session_by_id(session_id)?.is_none());
    let slots: i64 = fx.service.conn.query_row(
        "SELECT COUNT(*) FROM session_exercises WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    assert_eq!(slots, 0);

    let err = fx.service.discard_session(session_id).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::SessionNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_active_session_and_session_log() -> Result<()> {
    let mut fx = setup()?;
    let bench = fx.bench;
    assert!(fx.service.get_active_session(fx.user_id)?.is_none());

    let done = log_session(&mut fx, bench, day(1), 60.0, Reps::Fixed(10))?;
    let open = fx.service.start_session_at(fx.user_id, Some(fx.push_day), day(2))?;

    let active = fx.service.get_active_session(fx.user_id)?.expect("one is open");
    assert_eq!(active.session.id, open);

    let log = fx.service.list_sessions(fx.user_id, 10)?;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].session.id, open);
    assert_eq!(log[0].template_name.as_deref(), Some("Push Day"));
    assert_eq!((log[0].completed_count, log[0].exercise_count), (0, 2));
    assert_eq!(log[1].session.id, done);
    assert_eq!((log[1].completed_count, log[1].exercise_count), (1, 1));

    assert_eq!(fx.service.list_sessions(fx.user_id, 1)?.len(), 1);

    fx.service.finish_session(open)?;
    assert!(fx.service.get_active_session(fx.user_id)?.is_none());
    Ok(())
}

#[test]
fn test_exercise_progress() -> Result<()> {
    let mut fx = setup()?;
    let bench = fx.bench;
    let s1 = log_session(&mut fx, bench, day(1), 60.0, Reps::Fixed(10))?;
    let s2 = log_session(&mut fx, bench, day(2), 80.0, Reps::Fixed(5))?;
    let s3 = log_session(&mut fx, bench, day(3), 70.0, Reps::Fixed(10))?;

    let progress = fx.service.get_exercise_progress(fx.user_id, bench, None)?;
    let sessions: Vec<i64> = progress.history.iter().map(|h| h.session_id).collect();
    assert_eq!(sessions, vec![s1, s2, s3]);
    assert_eq!(progress.history[0].volume, 1800.0);
    assert_eq!(progress.best.as_ref().map(|b| b.session_id), Some(s2));
    assert_eq!(progress.latest.as_ref().map(|l| l.session_id), Some(s3));
    assert_eq!(progress.estimated_one_rep_max, Some(93.0));

    let recent = fx.service.get_exercise_history(fx.user_id, bench, Some(2))?;
    let dates: Vec<DateTime<Utc>> = recent.iter().map(|h| h.date).collect();
    assert_eq!(dates, vec![day(2), day(3)]);

    let empty = fx.service.get_exercise_progress(fx.user_id, fx.dips, None)?;
    assert!(empty.history.is_empty());
    assert!(empty.best.is_none());
    assert!(empty.estimated_one_rep_max.is_none());

    assert!(fx.service.get_exercise_progress(fx.user_id, 9999, None).is_err());
    Ok(())
}
