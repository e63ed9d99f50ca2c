//src/db.rs
use chrono::{DateTime, SecondsFormat, Utc, Weekday};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row, ToSql};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::reps::Reps;
use crate::session::{self, LastPerformance, SessionStatus, SessionUpdate};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection failed")]
    Connection(#[from] rusqlite::Error),
    #[error("Failed to get application data directory")]
    DataDir,
    #[error("I/O error accessing database file")]
    Io(#[from] std::io::Error),
    #[error("Database query failed: {0}")]
    QueryFailed(rusqlite::Error),
    #[error("Database update failed: {0}")]
    UpdateFailed(rusqlite::Error),
    #[error("Database insert failed: {0}")]
    InsertFailed(rusqlite::Error),
    #[error("Database delete failed: {0}")]
    DeleteFailed(rusqlite::Error),
    #[error("User not found: ID {0}")]
    UserNotFound(i64),
    #[error("User name must be unique (case-insensitive): '{0}' already exists.")]
    UserNameNotUnique(String),
    #[error("Exercise not found: {0}")]
    ExerciseNotFound(String),
    #[error("Exercise name must be unique (case-insensitive): '{0}' already exists.")]
    ExerciseNameNotUnique(String),
    #[error("Exercise '{name}' is still used by {template_refs} template entr(ies) and {session_refs} session entr(ies).")]
    ExerciseInUse {
        name: String,
        template_refs: i64,
        session_refs: i64,
    },
    #[error("Workout template not found: ID {0}")]
    TemplateNotFound(i64),
    #[error("Template exercise not found: ID {0}")]
    TemplateExerciseNotFound(i64),
    #[error("Workout session not found: ID {0}")]
    SessionNotFound(i64),
    #[error("Session exercise not found: ID {0}")]
    SessionExerciseNotFound(i64),
    #[error("Workout session {0} is already completed and can no longer be changed.")]
    SessionNotActive(i64),
}

// --- Row types ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exercise {
    pub id: i64,
    pub name: String,
    pub muscle_group: String,
    pub video_reference: Option<String>,
    pub instructions: Option<String>,
    pub default_rest_seconds: u32,
}

#[derive(Debug, Clone, Default)]
pub struct NewExercise<'a> {
    pub name: &'a str,
    pub muscle_group: &'a str,
    pub video_reference: Option<&'a str>,
    pub instructions: Option<&'a str>,
    pub default_rest_seconds: Option<u32>,
}

/// Partial update of a library entry. `Some(None)` clears an optional column.
#[derive(Debug, Clone, Default)]
pub struct ExercisePatch {
    pub name: Option<String>,
    pub muscle_group: Option<String>,
    pub video_reference: Option<Option<String>>,
    pub instructions: Option<Option<String>>,
    pub default_rest_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutTemplate {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub day_assigned: Option<Weekday>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub day_assigned: Option<Option<Weekday>>,
    pub color: Option<Option<String>>,
}

/// A template entry joined with its library exercise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateExercise {
    pub id: i64,
    pub template_id: i64,
    pub exercise_id: i64,
    pub target_sets: i64,
    pub target_reps: Reps,
    pub target_weight: Option<f64>,
    pub order_index: i64,
    pub exercise_name: String,
    pub muscle_group: String,
    pub video_reference: Option<String>,
    pub instructions: Option<String>,
    pub default_rest_seconds: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateExercisePatch {
    pub target_sets: Option<i64>,
    pub target_reps: Option<Reps>,
    pub target_weight: Option<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateWithExercises {
    pub template: WorkoutTemplate,
    pub exercises: Vec<TemplateExercise>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutSession {
    pub id: i64,
    pub user_id: i64,
    pub template_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl WorkoutSession {
    pub const fn status(&self) -> SessionStatus {
        SessionStatus::from_completed_at(self.completed_at.as_ref())
    }

    /// Time since the session started. Presentation only, nothing is persisted.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.completed_at.unwrap_or(now) - self.started_at).max(chrono::Duration::zero())
    }
}

/// A session slot joined with its library exercise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionExercise {
    pub id: i64,
    pub session_id: i64,
    pub exercise_id: i64,
    pub actual_sets: Option<i64>,
    pub actual_reps: Option<Reps>,
    pub actual_weight: Option<f64>,
    pub order_index: i64,
    pub completed: bool,
    pub exercise_name: String,
    pub muscle_group: String,
    pub video_reference: Option<String>,
    pub instructions: Option<String>,
    pub rest_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session: WorkoutSession,
    pub template_name: Option<String>,
    pub exercise_count: i64,
    pub completed_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub session_id: i64,
    pub date: DateTime<Utc>,
    pub weight: Option<f64>,
    pub reps: Option<Reps>,
    pub sets: Option<i64>,
    pub volume: f64,
}

// --- Paths and schema ---

const DB_FILE_NAME: &str = "gym.sqlite";

/// Gets the path to the SQLite database file within the app's data directory.
pub fn get_db_path() -> Result<PathBuf, Error> {
    let data_dir = dirs::data_dir().ok_or(Error::DataDir)?;
    let app_dir = data_dir.join(crate::config::APP_DIR);
    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir)?;
    }
    Ok(app_dir.join(DB_FILE_NAME))
}

/// Opens a connection to the SQLite database.
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<Connection, Error> {
    let conn = Connection::open(path).map_err(Error::Connection)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

const SCHEMA: [&str; 10] = [
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE COLLATE NOCASE,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS exercise_library (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE COLLATE NOCASE,
        muscle_group TEXT NOT NULL,
        video_reference TEXT,
        instructions TEXT,
        default_rest_seconds INTEGER NOT NULL DEFAULT 60 CHECK(default_rest_seconds >= 0)
    )",
    "CREATE TABLE IF NOT EXISTS workout_templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        day_assigned INTEGER CHECK(day_assigned BETWEEN 0 AND 6), -- 0 = Sunday
        color TEXT
    )",
    "CREATE TABLE IF NOT EXISTS template_exercises (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        template_id INTEGER NOT NULL REFERENCES workout_templates(id) ON DELETE CASCADE,
        exercise_id INTEGER NOT NULL REFERENCES exercise_library(id),
        target_sets INTEGER NOT NULL DEFAULT 3 CHECK(target_sets >= 1),
        target_reps TEXT NOT NULL DEFAULT '10-12',
        target_weight REAL,
        order_index INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS workout_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        template_id INTEGER REFERENCES workout_templates(id) ON DELETE SET NULL,
        started_at TEXT NOT NULL, -- RFC3339, UTC, millisecond precision
        completed_at TEXT,
        notes TEXT
    )",
    "CREATE TABLE IF NOT EXISTS session_exercises (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES workout_sessions(id) ON DELETE CASCADE,
        exercise_id INTEGER NOT NULL REFERENCES exercise_library(id),
        actual_sets INTEGER,
        actual_reps TEXT,
        actual_weight REAL,
        order_index INTEGER NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0
    )",
    // One template per user per weekday.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_templates_user_day
        ON workout_templates(user_id, day_assigned) WHERE day_assigned IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_template_exercises_template ON template_exercises(template_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_user_started ON workout_sessions(user_id, started_at)",
    "CREATE INDEX IF NOT EXISTS idx_session_exercises_exercise ON session_exercises(exercise_id)",
];

/// Initializes the database tables if they don't exist.
pub fn init_db(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(Error::Connection)?;
    for statement in SCHEMA {
        conn.execute(statement, []).map_err(Error::Connection)?;
    }
    Ok(())
}

// --- Conversions ---

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str, column: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Weekday as stored: 0 = Sunday .. 6 = Saturday.
pub fn weekday_to_index(day: Weekday) -> i64 {
    i64::from(day.num_days_from_sunday())
}

pub const fn weekday_from_index(index: i64) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

/// Runs `UPDATE <table> SET col = :col, ... WHERE id = :id` for the given columns.
/// Returns the number of rows touched; zero columns means nothing to do.
fn execute_patch(
    conn: &Connection,
    table: &str,
    id: i64,
    columns: Vec<(&'static str, Box<dyn ToSql>)>,
) -> Result<usize, rusqlite::Error> {
    if columns.is_empty() {
        return Ok(0);
    }
    let updates: Vec<String> = columns
        .iter()
        .map(|(col, _)| format!("{col} = :{col}"))
        .collect();
    let sql = format!("UPDATE {table} SET {} WHERE id = :id", updates.join(", "));

    let names: Vec<String> = columns.iter().map(|(col, _)| format!(":{col}")).collect();
    let mut params_for_exec: Vec<(&str, &dyn ToSql)> = names
        .iter()
        .zip(columns.iter())
        .map(|(name, (_, value))| (name.as_str(), value.as_ref()))
        .collect();
    params_for_exec.push((":id", &id));

    conn.execute(&sql, params_for_exec.as_slice())
}

// ---- Users ----

pub fn create_user(conn: &Connection, name: &str, now: DateTime<Utc>) -> Result<i64, Error> {
    match conn.execute(
        "INSERT INTO users (name, created_at) VALUES (?1, ?2)",
        params![name, format_timestamp(now)],
    ) {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_constraint_violation(&e) => Err(Error::UserNameNotUnique(name.to_string())),
        Err(e) => Err(Error::InsertFailed(e)),
    }
}

fn map_row_to_user(row: &Row) -> Result<User, rusqlite::Error> {
    let created_at: String = row.get(2)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_timestamp(&created_at, 2)?,
    })
}

pub fn get_user_by_id(conn: &Connection, id: i64) -> Result<Option<User>, Error> {
    conn.query_row(
        "SELECT id, name, created_at FROM users WHERE id = ?1",
        params![id],
        map_row_to_user,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

pub fn get_user_by_name(conn: &Connection, name: &str) -> Result<Option<User>, Error> {
    conn.query_row(
        "SELECT id, name, created_at FROM users WHERE name = ?1 COLLATE NOCASE",
        params![name],
        map_row_to_user,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>, Error> {
    let mut stmt = conn
        .prepare("SELECT id, name, created_at FROM users ORDER BY name ASC")
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map([], map_row_to_user)
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

// ---- Exercise Library ----

const EXERCISE_COLUMNS: &str =
    "id, name, muscle_group, video_reference, instructions, default_rest_seconds";

fn map_row_to_exercise(row: &Row) -> Result<Exercise, rusqlite::Error> {
    Ok(Exercise {
        id: row.get(0)?,
        name: row.get(1)?,
        muscle_group: row.get(2)?,
        video_reference: row.get(3)?,
        instructions: row.get(4)?,
        default_rest_seconds: row.get(5)?,
    })
}

/// Creates a new library exercise. Returns ID. Handles the UNIQUE name constraint.
pub fn create_exercise(conn: &Connection, new: &NewExercise) -> Result<i64, Error> {
    match conn.execute(
        "INSERT INTO exercise_library (name, muscle_group, video_reference, instructions, default_rest_seconds)
         VALUES (:name, :muscle_group, :video, :instructions, :rest)",
        named_params! {
            ":name": new.name,
            ":muscle_group": new.muscle_group,
            ":video": new.video_reference,
            ":instructions": new.instructions,
            ":rest": new.default_rest_seconds.unwrap_or(session::FALLBACK_REST_SECONDS),
        },
    ) {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_constraint_violation(&e) => {
            Err(Error::ExerciseNameNotUnique(new.name.to_string()))
        }
        Err(e) => Err(Error::InsertFailed(e)),
    }
}

pub fn update_exercise(conn: &Connection, id: i64, patch: ExercisePatch) -> Result<u64, Error> {
    let new_name = patch.name.clone();
    let mut columns: Vec<(&'static str, Box<dyn ToSql>)> = Vec::new();
    if let Some(name) = patch.name {
        columns.push(("name", Box::new(name)));
    }
    if let Some(group) = patch.muscle_group {
        columns.push(("muscle_group", Box::new(group)));
    }
    if let Some(video) = patch.video_reference {
        columns.push(("video_reference", Box::new(video)));
    }
    if let Some(instructions) = patch.instructions {
        columns.push(("instructions", Box::new(instructions)));
    }
    if let Some(rest) = patch.default_rest_seconds {
        columns.push(("default_rest_seconds", Box::new(rest)));
    }
    if columns.is_empty() {
        return Ok(0);
    }

    match execute_patch(conn, "exercise_library", id, columns) {
        Ok(0) => Err(Error::ExerciseNotFound(id.to_string())),
        Ok(rows) => Ok(rows as u64),
        Err(e) if is_constraint_violation(&e) => Err(Error::ExerciseNameNotUnique(
            new_name.unwrap_or_default(),
        )),
        Err(e) => Err(Error::UpdateFailed(e)),
    }
}

/// Counts template and session rows pointing at an exercise.
pub fn count_exercise_references(conn: &Connection, exercise_id: i64) -> Result<(i64, i64), Error> {
    conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM template_exercises WHERE exercise_id = ?1),
            (SELECT COUNT(*) FROM session_exercises WHERE exercise_id = ?1)",
        params![exercise_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(Error::QueryFailed)
}

/// Deletes a library exercise. Refuses while any template or session still references it.
pub fn delete_exercise(conn: &Connection, id: i64) -> Result<u64, Error> {
    let exercise =
        get_exercise_by_id(conn, id)?.ok_or_else(|| Error::ExerciseNotFound(id.to_string()))?;
    let (template_refs, session_refs) = count_exercise_references(conn, id)?;
    if template_refs > 0 || session_refs > 0 {
        return Err(Error::ExerciseInUse {
            name: exercise.name,
            template_refs,
            session_refs,
        });
    }
    let rows_affected = conn
        .execute("DELETE FROM exercise_library WHERE id = ?1", params![id])
        .map_err(Error::DeleteFailed)?;
    Ok(rows_affected as u64)
}

pub fn get_exercise_by_id(conn: &Connection, id: i64) -> Result<Option<Exercise>, Error> {
    conn.query_row(
        &format!("SELECT {EXERCISE_COLUMNS} FROM exercise_library WHERE id = ?1"),
        params![id],
        map_row_to_exercise,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

/// Retrieves a library exercise by its name (case-insensitive).
pub fn get_exercise_by_name(conn: &Connection, name: &str) -> Result<Option<Exercise>, Error> {
    conn.query_row(
        &format!("SELECT {EXERCISE_COLUMNS} FROM exercise_library WHERE name = ?1 COLLATE NOCASE"),
        params![name],
        map_row_to_exercise,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

/// Lists library exercises, optionally only those of one muscle group.
pub fn list_exercises(
    conn: &Connection,
    muscle_group: Option<&str>,
) -> Result<Vec<Exercise>, Error> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EXERCISE_COLUMNS} FROM exercise_library
             WHERE (?1 IS NULL OR muscle_group = ?1 COLLATE NOCASE)
             ORDER BY name ASC"
        ))
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map(params![muscle_group], map_row_to_exercise)
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

pub fn list_muscle_groups(conn: &Connection) -> Result<Vec<String>, Error> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT muscle_group FROM exercise_library
             ORDER BY muscle_group COLLATE NOCASE ASC",
        )
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map([], |row| row.get(0))
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

// ---- Workout Templates ----

fn map_row_to_template(row: &Row) -> Result<WorkoutTemplate, rusqlite::Error> {
    let day: Option<i64> = row.get(3)?;
    Ok(WorkoutTemplate {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        day_assigned: day.and_then(weekday_from_index),
        color: row.get(4)?,
    })
}

/// Clears `day_assigned` on whichever of the user's templates occupies `day`,
/// except `keep_id`. Returns the number of templates unassigned.
pub fn clear_day_slot(
    conn: &Connection,
    user_id: i64,
    day: Weekday,
    keep_id: Option<i64>,
) -> Result<usize, Error> {
    conn.execute(
        "UPDATE workout_templates SET day_assigned = NULL
         WHERE user_id = ?1 AND day_assigned = ?2 AND (?3 IS NULL OR id != ?3)",
        params![user_id, weekday_to_index(day), keep_id],
    )
    .map_err(Error::UpdateFailed)
}

/// Inserts a template row. Callers free the day slot first.
pub fn insert_template(
    conn: &Connection,
    user_id: i64,
    name: &str,
    day_assigned: Option<Weekday>,
    color: Option<&str>,
) -> Result<i64, Error> {
    conn.execute(
        "INSERT INTO workout_templates (user_id, name, day_assigned, color) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, name, day_assigned.map(weekday_to_index), color],
    )
    .map_err(Error::InsertFailed)?;
    Ok(conn.last_insert_rowid())
}

pub fn get_template(conn: &Connection, id: i64) -> Result<Option<WorkoutTemplate>, Error> {
    conn.query_row(
        "SELECT id, user_id, name, day_assigned, color FROM workout_templates WHERE id = ?1",
        params![id],
        map_row_to_template,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

pub fn get_template_by_day(
    conn: &Connection,
    user_id: i64,
    day: Weekday,
) -> Result<Option<WorkoutTemplate>, Error> {
    conn.query_row(
        "SELECT id, user_id, name, day_assigned, color FROM workout_templates
         WHERE user_id = ?1 AND day_assigned = ?2 LIMIT 1",
        params![user_id, weekday_to_index(day)],
        map_row_to_template,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

/// All templates of a user: assigned ones by weekday (Sunday first), then unassigned, each by name.
pub fn list_templates_for_user(
    conn: &Connection,
    user_id: i64,
) -> Result<Vec<WorkoutTemplate>, Error> {
    let mut stmt = conn
        .prepare(
            "SELECT id, user_id, name, day_assigned, color FROM workout_templates
             WHERE user_id = ?1
             ORDER BY day_assigned IS NULL, day_assigned ASC, name COLLATE NOCASE ASC",
        )
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map(params![user_id], map_row_to_template)
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

/// Applies name/color/day changes. Day exclusivity is the caller's job.
pub fn update_template(conn: &Connection, id: i64, patch: TemplatePatch) -> Result<u64, Error> {
    let mut columns: Vec<(&'static str, Box<dyn ToSql>)> = Vec::new();
    if let Some(name) = patch.name {
        columns.push(("name", Box::new(name)));
    }
    if let Some(day) = patch.day_assigned {
        columns.push(("day_assigned", Box::new(day.map(weekday_to_index))));
    }
    if let Some(color) = patch.color {
        columns.push(("color", Box::new(color)));
    }
    if columns.is_empty() {
        return Ok(0);
    }
    match execute_patch(conn, "workout_templates", id, columns) {
        Ok(0) => Err(Error::TemplateNotFound(id)),
        Ok(rows) => Ok(rows as u64),
        Err(e) => Err(Error::UpdateFailed(e)),
    }
}

/// Deletes a template; its exercise entries go with it.
pub fn delete_template(conn: &Connection, id: i64) -> Result<u64, Error> {
    let rows_affected = conn
        .execute("DELETE FROM workout_templates WHERE id = ?1", params![id])
        .map_err(Error::DeleteFailed)?;
    if rows_affected == 0 {
        Err(Error::TemplateNotFound(id))
    } else {
        Ok(rows_affected as u64)
    }
}

fn map_row_to_template_exercise(row: &Row) -> Result<TemplateExercise, rusqlite::Error> {
    let reps: String = row.get(4)?;
    Ok(TemplateExercise {
        id: row.get(0)?,
        template_id: row.get(1)?,
        exercise_id: row.get(2)?,
        target_sets: row.get(3)?,
        target_reps: Reps::parse_lenient(&reps),
        target_weight: row.get(5)?,
        order_index: row.get(6)?,
        exercise_name: row.get(7)?,
        muscle_group: row.get(8)?,
        video_reference: row.get(9)?,
        instructions: row.get(10)?,
        default_rest_seconds: row.get(11)?,
    })
}

const TEMPLATE_EXERCISE_SELECT: &str = "SELECT te.id, te.template_id, te.exercise_id, te.target_sets,
        te.target_reps, te.target_weight, te.order_index,
        e.name, e.muscle_group, e.video_reference, e.instructions, e.default_rest_seconds
    FROM template_exercises te JOIN exercise_library e ON e.id = te.exercise_id";

pub fn list_template_exercises(
    conn: &Connection,
    template_id: i64,
) -> Result<Vec<TemplateExercise>, Error> {
    let mut stmt = conn
        .prepare(&format!(
            "{TEMPLATE_EXERCISE_SELECT} WHERE te.template_id = ?1 ORDER BY te.order_index ASC, te.id ASC"
        ))
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map(params![template_id], map_row_to_template_exercise)
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

pub fn get_template_exercise(
    conn: &Connection,
    id: i64,
) -> Result<Option<TemplateExercise>, Error> {
    conn.query_row(
        &format!("{TEMPLATE_EXERCISE_SELECT} WHERE te.id = ?1"),
        params![id],
        map_row_to_template_exercise,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

/// Appends an exercise at `max(order_index) + 1` (0 for an empty template).
pub fn add_exercise_to_template(
    conn: &Connection,
    template_id: i64,
    exercise_id: i64,
    target_sets: i64,
    target_reps: &Reps,
    target_weight: Option<f64>,
) -> Result<i64, Error> {
    let next_index: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(order_index), -1) + 1 FROM template_exercises WHERE template_id = ?1",
            params![template_id],
            |row| row.get(0),
        )
        .map_err(Error::QueryFailed)?;

    conn.execute(
        "INSERT INTO template_exercises (template_id, exercise_id, target_sets, target_reps, target_weight, order_index)
         VALUES (:template_id, :exercise_id, :sets, :reps, :weight, :order_index)",
        named_params! {
            ":template_id": template_id,
            ":exercise_id": exercise_id,
            ":sets": target_sets,
            ":reps": target_reps.to_string(),
            ":weight": target_weight,
            ":order_index": next_index,
        },
    )
    .map_err(Error::InsertFailed)?;
    Ok(conn.last_insert_rowid())
}

pub fn update_template_exercise(
    conn: &Connection,
    id: i64,
    patch: TemplateExercisePatch,
) -> Result<u64, Error> {
    let mut columns: Vec<(&'static str, Box<dyn ToSql>)> = Vec::new();
    if let Some(sets) = patch.target_sets {
        columns.push(("target_sets", Box::new(sets)));
    }
    if let Some(reps) = patch.target_reps {
        columns.push(("target_reps", Box::new(reps.to_string())));
    }
    if let Some(weight) = patch.target_weight {
        columns.push(("target_weight", Box::new(weight)));
    }
    if columns.is_empty() {
        return Ok(0);
    }
    match execute_patch(conn, "template_exercises", id, columns) {
        Ok(0) => Err(Error::TemplateExerciseNotFound(id)),
        Ok(rows) => Ok(rows as u64),
        Err(e) => Err(Error::UpdateFailed(e)),
    }
}

pub fn remove_exercise_from_template(conn: &Connection, id: i64) -> Result<u64, Error> {
    let rows_affected = conn
        .execute("DELETE FROM template_exercises WHERE id = ?1", params![id])
        .map_err(Error::DeleteFailed)?;
    if rows_affected == 0 {
        Err(Error::TemplateExerciseNotFound(id))
    } else {
        Ok(rows_affected as u64)
    }
}

/// Rewrites `order_index` as 0..n-1 following `ordered_ids`.
/// Ids that aren't entries of this template are skipped and don't use up a position.
pub fn reorder_template_exercises(
    conn: &Connection,
    template_id: i64,
    ordered_ids: &[i64],
) -> Result<u64, Error> {
    let mut stmt = conn
        .prepare(
            "UPDATE template_exercises SET order_index = ?1 WHERE id = ?2 AND template_id = ?3",
        )
        .map_err(Error::UpdateFailed)?;
    let mut position: i64 = 0;
    for id in ordered_ids {
        let rows = stmt
            .execute(params![position, id, template_id])
            .map_err(Error::UpdateFailed)?;
        if rows > 0 {
            position += 1;
        }
    }
    Ok(position as u64)
}

// ---- Workout Sessions ----

fn map_row_to_session(row: &Row) -> Result<WorkoutSession, rusqlite::Error> {
    let started_at: String = row.get(3)?;
    let completed_at: Option<String> = row.get(4)?;
    Ok(WorkoutSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        template_id: row.get(2)?,
        started_at: parse_timestamp(&started_at, 3)?,
        completed_at: completed_at
            .map(|ts| parse_timestamp(&ts, 4))
            .transpose()?,
        notes: row.get(5)?,
    })
}

const SESSION_COLUMNS: &str = "ws.id, ws.user_id, ws.template_id, ws.started_at, ws.completed_at, ws.notes";

pub fn insert_session(
    conn: &Connection,
    user_id: i64,
    template_id: Option<i64>,
    started_at: DateTime<Utc>,
) -> Result<i64, Error> {
    conn.execute(
        "INSERT INTO workout_sessions (user_id, template_id, started_at) VALUES (?1, ?2, ?3)",
        params![user_id, template_id, format_timestamp(started_at)],
    )
    .map_err(Error::InsertFailed)?;
    Ok(conn.last_insert_rowid())
}

pub fn get_session(conn: &Connection, id: i64) -> Result<Option<WorkoutSession>, Error> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM workout_sessions ws WHERE ws.id = ?1"),
        params![id],
        map_row_to_session,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

/// Fails with `SessionNotFound` or `SessionNotActive` unless the session is in progress.
pub fn ensure_session_active(conn: &Connection, session_id: i64) -> Result<WorkoutSession, Error> {
    let session = get_session(conn, session_id)?.ok_or(Error::SessionNotFound(session_id))?;
    match session.status() {
        SessionStatus::Active => Ok(session),
        SessionStatus::Completed => Err(Error::SessionNotActive(session_id)),
    }
}

/// The user's most recently started session that hasn't been finished.
pub fn get_active_session(conn: &Connection, user_id: i64) -> Result<Option<WorkoutSession>, Error> {
    conn.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM workout_sessions ws
             WHERE ws.user_id = ?1 AND ws.completed_at IS NULL
             ORDER BY ws.started_at DESC, ws.id DESC LIMIT 1"
        ),
        params![user_id],
        map_row_to_session,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

pub fn list_sessions(
    conn: &Connection,
    user_id: i64,
    limit: u32,
) -> Result<Vec<SessionSummary>, Error> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SESSION_COLUMNS}, wt.name,
                (SELECT COUNT(*) FROM session_exercises se WHERE se.session_id = ws.id),
                (SELECT COUNT(*) FROM session_exercises se WHERE se.session_id = ws.id AND se.completed = 1)
             FROM workout_sessions ws
             LEFT JOIN workout_templates wt ON wt.id = ws.template_id
             WHERE ws.user_id = ?1
             ORDER BY ws.started_at DESC, ws.id DESC
             LIMIT ?2"
        ))
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map(params![user_id, limit], |row| {
            Ok(SessionSummary {
                session: map_row_to_session(row)?,
                template_name: row.get(6)?,
                exercise_count: row.get(7)?,
                completed_count: row.get(8)?,
            })
        })
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

pub fn set_session_notes(conn: &Connection, id: i64, notes: Option<&str>) -> Result<u64, Error> {
    let rows = conn
        .execute(
            "UPDATE workout_sessions SET notes = ?1 WHERE id = ?2",
            params![notes, id],
        )
        .map_err(Error::UpdateFailed)?;
    if rows == 0 {
        Err(Error::SessionNotFound(id))
    } else {
        Ok(rows as u64)
    }
}

/// Sets `completed_at` on a session that is still in progress.
pub fn finish_session(conn: &Connection, id: i64, completed_at: DateTime<Utc>) -> Result<u64, Error> {
    let rows = conn
        .execute(
            "UPDATE workout_sessions SET completed_at = ?1 WHERE id = ?2 AND completed_at IS NULL",
            params![format_timestamp(completed_at), id],
        )
        .map_err(Error::UpdateFailed)?;
    if rows == 0 {
        ensure_session_active(conn, id)?;
    }
    Ok(rows as u64)
}

/// Deletes an in-progress session and its exercises. Finished sessions are left alone.
pub fn delete_active_session(conn: &Connection, id: i64) -> Result<u64, Error> {
    let rows = conn
        .execute(
            "DELETE FROM workout_sessions WHERE id = ?1 AND completed_at IS NULL",
            params![id],
        )
        .map_err(Error::DeleteFailed)?;
    if rows == 0 {
        ensure_session_active(conn, id)?;
    }
    Ok(rows as u64)
}

// ---- Session Exercises ----

fn map_row_to_session_exercise(row: &Row) -> Result<SessionExercise, rusqlite::Error> {
    let reps: Option<String> = row.get(4)?;
    Ok(SessionExercise {
        id: row.get(0)?,
        session_id: row.get(1)?,
        exercise_id: row.get(2)?,
        actual_sets: row.get(3)?,
        actual_reps: reps.as_deref().map(Reps::parse_lenient),
        actual_weight: row.get(5)?,
        order_index: row.get(6)?,
        completed: row.get(7)?,
        exercise_name: row.get(8)?,
        muscle_group: row.get(9)?,
        video_reference: row.get(10)?,
        instructions: row.get(11)?,
        rest_seconds: row.get(12)?,
    })
}

const SESSION_EXERCISE_SELECT: &str = "SELECT se.id, se.session_id, se.exercise_id, se.actual_sets,
        se.actual_reps, se.actual_weight, se.order_index, se.completed,
        e.name, e.muscle_group, e.video_reference, e.instructions, e.default_rest_seconds
    FROM session_exercises se JOIN exercise_library e ON e.id = se.exercise_id";

pub fn list_session_exercises(
    conn: &Connection,
    session_id: i64,
) -> Result<Vec<SessionExercise>, Error> {
    let mut stmt = conn
        .prepare(&format!(
            "{SESSION_EXERCISE_SELECT} WHERE se.session_id = ?1 ORDER BY se.order_index ASC, se.id ASC"
        ))
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map(params![session_id], map_row_to_session_exercise)
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

pub fn get_session_exercise(
    conn: &Connection,
    id: i64,
) -> Result<Option<SessionExercise>, Error> {
    conn.query_row(
        &format!("{SESSION_EXERCISE_SELECT} WHERE se.id = ?1"),
        params![id],
        map_row_to_session_exercise,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

pub fn insert_session_exercise(
    conn: &Connection,
    session_id: i64,
    exercise_id: i64,
    order_index: i64,
) -> Result<i64, Error> {
    conn.execute(
        "INSERT INTO session_exercises (session_id, exercise_id, order_index, completed) VALUES (?1, ?2, ?3, 0)",
        params![session_id, exercise_id, order_index],
    )
    .map_err(Error::InsertFailed)?;
    Ok(conn.last_insert_rowid())
}

pub fn count_session_exercises(conn: &Connection, session_id: i64) -> Result<i64, Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM session_exercises WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )
    .map_err(Error::QueryFailed)
}

/// Deletes a session slot. Remaining slots keep their `order_index`.
pub fn delete_session_exercise(conn: &Connection, id: i64) -> Result<u64, Error> {
    let rows = conn
        .execute("DELETE FROM session_exercises WHERE id = ?1", params![id])
        .map_err(Error::DeleteFailed)?;
    if rows == 0 {
        Err(Error::SessionExerciseNotFound(id))
    } else {
        Ok(rows as u64)
    }
}

/// Points a slot at another exercise and wipes everything recorded for it.
pub fn swap_session_exercise(conn: &Connection, id: i64, new_exercise_id: i64) -> Result<u64, Error> {
    let rows = conn
        .execute(
            "UPDATE session_exercises
             SET exercise_id = ?1, actual_sets = NULL, actual_reps = NULL, actual_weight = NULL, completed = 0
             WHERE id = ?2",
            params![new_exercise_id, id],
        )
        .map_err(Error::UpdateFailed)?;
    if rows == 0 {
        Err(Error::SessionExerciseNotFound(id))
    } else {
        Ok(rows as u64)
    }
}

/// Persists exactly one field of a session slot.
pub fn update_session_exercise(
    conn: &Connection,
    id: i64,
    update: &SessionUpdate,
) -> Result<u64, Error> {
    let value: Box<dyn ToSql> = match update {
        SessionUpdate::SetActualSets(sets) => Box::new(*sets),
        SessionUpdate::SetActualReps(reps) => Box::new(reps.to_string()),
        SessionUpdate::SetActualWeight(weight) => Box::new(*weight),
        SessionUpdate::SetCompleted(done) => Box::new(*done),
    };
    match execute_patch(conn, "session_exercises", id, vec![(update.column(), value)]) {
        Ok(0) => Err(Error::SessionExerciseNotFound(id)),
        Ok(rows) => Ok(rows as u64),
        Err(e) => Err(Error::UpdateFailed(e)),
    }
}

// ---- History ----

/// Rows of `exercise_id` done by `user_id` with at least one recorded value, newest session first.
const RECORDED_PERFORMANCE_SQL: &str = "SELECT ws.id, ws.started_at, se.actual_weight, se.actual_reps, se.actual_sets
    FROM session_exercises se JOIN workout_sessions ws ON ws.id = se.session_id
    WHERE ws.user_id = :user_id AND se.exercise_id = :exercise_id
      AND (se.actual_weight IS NOT NULL OR se.actual_reps IS NOT NULL OR se.actual_sets IS NOT NULL)
      AND (:exclude_session IS NULL OR ws.id != :exclude_session)
    ORDER BY ws.started_at DESC, ws.id DESC, se.order_index DESC, se.id DESC
    LIMIT :limit";

fn map_row_to_performance(row: &Row) -> Result<LastPerformance, rusqlite::Error> {
    let started_at: String = row.get(1)?;
    let reps: Option<String> = row.get(3)?;
    Ok(LastPerformance {
        session_id: row.get(0)?,
        performed_at: parse_timestamp(&started_at, 1)?,
        weight: row.get(2)?,
        reps: reps.as_deref().map(Reps::parse_lenient),
        sets: row.get(4)?,
    })
}

/// Newest recorded performance, optionally ignoring one session (the one being logged).
pub fn last_performance(
    conn: &Connection,
    user_id: i64,
    exercise_id: i64,
    exclude_session: Option<i64>,
) -> Result<Option<LastPerformance>, Error> {
    conn.query_row(
        RECORDED_PERFORMANCE_SQL,
        named_params! {
            ":user_id": user_id,
            ":exercise_id": exercise_id,
            ":exclude_session": exclude_session,
            ":limit": 1,
        },
        map_row_to_performance,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

/// The `limit` most recent entries for an exercise, returned oldest first.
pub fn exercise_history(
    conn: &Connection,
    user_id: i64,
    exercise_id: i64,
    limit: u32,
) -> Result<Vec<HistoryEntry>, Error> {
    let mut stmt = conn
        .prepare(RECORDED_PERFORMANCE_SQL)
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map(
            named_params! {
                ":user_id": user_id,
                ":exercise_id": exercise_id,
                ":exclude_session": None::<i64>,
                ":limit": limit,
            },
            map_row_to_performance,
        )
        .map_err(Error::QueryFailed)?;
    let mut newest_first = iter
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)?;
    newest_first.reverse();

    Ok(newest_first
        .into_iter()
        .map(|p| HistoryEntry {
            session_id: p.session_id,
            date: p.performed_at,
            volume: session::volume(p.sets, p.reps.as_ref(), p.weight),
            weight: p.weight,
            reps: p.reps,
            sets: p.sets,
        })
        .collect())
}
