// src/lib.rs
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Local, Utc, Weekday};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// --- Declare modules ---
mod config;
pub mod db;
pub mod reps;
pub mod session;

// --- Expose public types ---
pub use config::{
    get_config_path as get_config_path_util, load as load_config_util, parse_color,
    save as save_config_util, Config, Error as ConfigError, StandardColor, Theme, Units,
};
pub use db::{
    get_db_path as get_db_path_util, weekday_from_index, weekday_to_index, Error as DbError,
    Exercise, ExercisePatch, HistoryEntry, NewExercise, SessionExercise, SessionSummary,
    TemplateExercise, TemplateExercisePatch, TemplatePatch, TemplateWithExercises, User,
    WorkoutSession, WorkoutTemplate,
};
pub use reps::{ParseRepsError, Reps};
pub use session::{
    estimate_one_rep_max, LastPerformance, RestTimer, SessionStatus, SessionUpdate,
    FALLBACK_REST_SECONDS,
};

/// One slot of a session as the runner shows it: the row plus its ghost set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionExerciseView {
    pub exercise: SessionExercise,
    pub ghost: Option<LastPerformance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDetail {
    pub session: WorkoutSession,
    pub template_name: Option<String>,
    pub exercises: Vec<SessionExerciseView>,
}

impl SessionDetail {
    pub const fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn total_count(&self) -> usize {
        self.exercises.len()
    }

    pub fn completed_count(&self) -> usize {
        self.exercises.iter().filter(|e| e.exercise.completed).count()
    }
}

/// Result of adding or swapping an exercise in a running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotChange {
    pub session_exercise_id: i64,
    pub rest_seconds: u32,
    pub ghost: Option<LastPerformance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExerciseProgress {
    pub exercise: Exercise,
    /// Oldest first, for charting.
    pub history: Vec<HistoryEntry>,
    pub best: Option<HistoryEntry>,
    pub latest: Option<HistoryEntry>,
    pub estimated_one_rep_max: Option<f64>,
}

/// Parses a weekday given as 0-6 (0 = Sunday) or a name such as "mon" / "Monday".
pub fn parse_day(input: &str) -> Result<Weekday> {
    let trimmed = input.trim();
    if let Ok(index) = trimmed.parse::<i64>() {
        return weekday_from_index(index)
            .with_context(|| format!("Day index must be between 0 (Sunday) and 6, got {index}"));
    }
    trimmed
        .parse::<Weekday>()
        .map_err(|_| anyhow::anyhow!("Invalid day '{trimmed}'. Use 0-6 (0 = Sunday) or a weekday name."))
}

pub struct AppService {
    pub config: Config,
    pub conn: Connection,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl AppService {
    /// Initializes the application service.
    /// # Errors
    /// Returns `anyhow::Error` if config/db path determination, loading, or initialization fails.
    pub fn initialize() -> Result<Self> {
        let config_path =
            config::get_config_path().context("Failed to determine configuration file path")?;
        let config = config::load(&config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"))?;

        let db_path = db::get_db_path().context("Failed to determine database path")?;
        let conn = db::open_db(&db_path)
            .with_context(|| format!("Failed to open database at {db_path:?}"))?;

        db::init_db(&conn).context("Failed to initialize database schema")?;
        debug!("Opened database at {}", db_path.display());

        Ok(Self {
            config,
            conn,
            db_path,
            config_path,
        })
    }

    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Saves the current configuration state.
    /// # Errors
    /// Returns `ConfigError` if saving fails.
    pub fn save_config(&self) -> Result<(), ConfigError> {
        config::save(&self.config_path, &self.config)
    }

    pub fn set_units(&mut self, units: Units) -> Result<(), ConfigError> {
        self.config.units = units;
        self.save_config()
    }

    pub fn set_default_rest_seconds(&mut self, seconds: u32) -> Result<(), ConfigError> {
        self.config.default_rest_seconds = seconds;
        self.save_config()
    }

    /// # Errors
    /// - `ConfigError::InvalidHistoryLimit` if `limit` is 0.
    pub fn set_history_limit(&mut self, limit: u32) -> Result<(), ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidHistoryLimit(limit));
        }
        self.config.history_limit = limit;
        self.save_config()
    }

    // --- Users and current-user context ---

    /// Creates a user.
    /// # Errors
    /// Returns `anyhow::Error` if the name is empty or already taken.
    pub fn create_user(&self, name: &str) -> Result<i64> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("User name cannot be empty.");
        }
        let id = db::create_user(&self.conn, trimmed, Utc::now())?;
        info!(user_id = id, "Created user '{trimmed}'");
        Ok(id)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        db::list_users(&self.conn)
            .context("Failed to list users")
            .map_err(Into::into)
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        db::get_user_by_id(&self.conn, id)
            .with_context(|| format!("Failed to look up user {id}"))
            .map_err(Into::into)
    }

    /// Makes `name` the current user and remembers it in the config file.
    pub fn login(&mut self, name: &str) -> Result<User> {
        let user = db::get_user_by_name(&self.conn, name.trim())?
            .with_context(|| format!("No user named '{}'", name.trim()))?;
        self.config.current_user_id = Some(user.id);
        self.save_config()?;
        info!(user_id = user.id, "Logged in as '{}'", user.name);
        Ok(user)
    }

    pub fn logout(&mut self) -> Result<(), ConfigError> {
        self.config.current_user_id = None;
        self.save_config()
    }

    /// The logged-in user's id, to be passed into store and engine calls.
    /// # Errors
    /// Returns `ConfigError::NotLoggedIn` if nobody is logged in.
    pub fn current_user_id(&self) -> Result<i64, ConfigError> {
        self.config
            .current_user_id
            .ok_or_else(|| ConfigError::NotLoggedIn(self.config_path.clone()))
    }

    fn require_user(&self, user_id: i64) -> Result<User> {
        db::get_user_by_id(&self.conn, user_id)?
            .ok_or_else(|| DbError::UserNotFound(user_id).into())
    }

    // --- Exercise Library ---

    /// Creates a library exercise; a missing rest time falls back to the configured default.
    /// # Errors
    /// Returns `anyhow::Error` if name or muscle group is empty, or the name is taken.
    pub fn create_exercise(&self, new: NewExercise) -> Result<i64> {
        let name = new.name.trim();
        let muscle_group = new.muscle_group.trim();
        if name.is_empty() {
            bail!("Exercise name cannot be empty.");
        }
        if muscle_group.is_empty() {
            bail!("Muscle group cannot be empty.");
        }
        let new = NewExercise {
            name,
            muscle_group,
            default_rest_seconds: new
                .default_rest_seconds
                .or(Some(self.config.default_rest_seconds)),
            ..new
        };
        db::create_exercise(&self.conn, &new).map_err(|db_err| match db_err {
            DbError::ExerciseNameNotUnique(_) => anyhow::anyhow!(db_err),
            _ => anyhow::Error::new(db_err).context(format!("Failed to create exercise '{name}'")),
        })
    }

    /// Edits a library exercise.
    /// # Errors
    /// Returns `anyhow::Error` if a provided name is empty, the id is unknown, or the new name is taken.
    pub fn update_exercise(&self, id: i64, mut patch: ExercisePatch) -> Result<u64> {
        if let Some(name) = patch.name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                bail!("New exercise name cannot be empty if provided.");
            }
        }
        if let Some(group) = patch.muscle_group.as_mut() {
            *group = group.trim().to_string();
            if group.is_empty() {
                bail!("Muscle group cannot be empty if provided.");
            }
        }
        db::update_exercise(&self.conn, id, patch).map_err(|db_err| match db_err {
            DbError::ExerciseNameNotUnique(name) => anyhow::anyhow!("Name '{name}' is already taken."),
            DbError::ExerciseNotFound(_) => anyhow::anyhow!(db_err),
            _ => anyhow::Error::new(db_err).context(format!("Failed to update exercise {id}")),
        })
    }

    /// Deletes a library exercise that no template or session uses.
    /// # Errors
    /// Returns `DbError::ExerciseInUse` (inside `anyhow`) while the exercise is referenced.
    pub fn delete_exercise(&self, id: i64) -> Result<u64> {
        let deleted = db::delete_exercise(&self.conn, id)?;
        info!(exercise_id = id, "Deleted exercise");
        Ok(deleted)
    }

    pub fn get_exercise_by_id(&self, id: i64) -> Result<Option<Exercise>> {
        db::get_exercise_by_id(&self.conn, id)
            .with_context(|| format!("Failed to look up exercise {id}"))
            .map_err(Into::into)
    }

    pub fn get_exercise_by_name(&self, name: &str) -> Result<Option<Exercise>> {
        db::get_exercise_by_name(&self.conn, name.trim())
            .with_context(|| format!("Failed to look up exercise '{name}'"))
            .map_err(Into::into)
    }

    /// Resolves an identifier that is either a numeric id or an exercise name.
    /// # Errors
    /// Returns `anyhow::Error` if the identifier is empty or the lookup fails.
    pub fn resolve_exercise(&self, identifier: &str) -> Result<Option<Exercise>> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            bail!("Exercise identifier cannot be empty.");
        }
        match trimmed.parse::<i64>() {
            Ok(id) => self.get_exercise_by_id(id),
            Err(_) => self.get_exercise_by_name(trimmed),
        }
    }

    fn require_exercise(&self, id: i64) -> Result<Exercise> {
        db::get_exercise_by_id(&self.conn, id)?
            .ok_or_else(|| DbError::ExerciseNotFound(id.to_string()).into())
    }

    pub fn get_all_exercises(&self, muscle_group: Option<&str>) -> Result<Vec<Exercise>> {
        db::list_exercises(&self.conn, muscle_group)
            .context("Failed to list exercises")
            .map_err(Into::into)
    }

    pub fn get_muscle_groups(&self) -> Result<Vec<String>> {
        db::list_muscle_groups(&self.conn)
            .context("Failed to list muscle groups")
            .map_err(Into::into)
    }

    // --- Workout Templates ---

    /// Creates a template. A given day is taken away from whichever template held it.
    /// # Errors
    /// Returns `anyhow::Error` if the name is empty, the user is unknown, or storage fails.
    pub fn create_template(
        &mut self,
        user_id: i64,
        name: &str,
        day_assigned: Option<Weekday>,
        color: Option<&str>,
    ) -> Result<i64> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("Template name cannot be empty.");
        }
        self.require_user(user_id)?;

        let tx = self.conn.transaction().map_err(DbError::Connection)?;
        if let Some(day) = day_assigned {
            let freed = db::clear_day_slot(&tx, user_id, day, None)?;
            if freed > 0 {
                debug!(user_id, ?day, "Unassigned previous template for day");
            }
        }
        let id = db::insert_template(&tx, user_id, trimmed, day_assigned, color)?;
        tx.commit().map_err(DbError::Connection)?;

        info!(template_id = id, user_id, "Created template '{trimmed}'");
        Ok(id)
    }

    fn expand_template(&self, template: WorkoutTemplate) -> Result<TemplateWithExercises> {
        let exercises = db::list_template_exercises(&self.conn, template.id)
            .with_context(|| format!("Failed to load exercises of template {}", template.id))?;
        Ok(TemplateWithExercises {
            template,
            exercises,
        })
    }

    pub fn get_template_by_id(&self, id: i64) -> Result<Option<TemplateWithExercises>> {
        db::get_template(&self.conn, id)?
            .map(|t| self.expand_template(t))
            .transpose()
    }

    pub fn get_template_by_day(
        &self,
        user_id: i64,
        day: Weekday,
    ) -> Result<Option<TemplateWithExercises>> {
        db::get_template_by_day(&self.conn, user_id, day)?
            .map(|t| self.expand_template(t))
            .transpose()
    }

    /// Template pinned to the current local weekday, for the dashboard card.
    pub fn get_todays_template(&self, user_id: i64) -> Result<Option<TemplateWithExercises>> {
        self.get_template_by_day(user_id, Local::now().weekday())
    }

    /// All of the user's templates with their exercises, ordered by day then name.
    pub fn get_weekly_templates(&self, user_id: i64) -> Result<Vec<TemplateWithExercises>> {
        db::list_templates_for_user(&self.conn, user_id)
            .context("Failed to list templates")?
            .into_iter()
            .map(|t| self.expand_template(t))
            .collect()
    }

    /// Patches a template; assigning a day re-applies the one-template-per-day rule.
    /// # Errors
    /// Returns `anyhow::Error` if a provided name is empty, the template is unknown, or storage fails.
    pub fn update_template(&mut self, id: i64, mut patch: TemplatePatch) -> Result<u64> {
        if let Some(name) = patch.name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                bail!("Template name cannot be empty.");
            }
        }
        let tx = self.conn.transaction().map_err(DbError::Connection)?;
        let template = db::get_template(&tx, id)?.ok_or(DbError::TemplateNotFound(id))?;
        if let Some(Some(day)) = patch.day_assigned {
            db::clear_day_slot(&tx, template.user_id, day, Some(id))?;
        }
        let rows = db::update_template(&tx, id, patch)?;
        tx.commit().map_err(DbError::Connection)?;
        debug!(template_id = id, "Updated template");
        Ok(rows)
    }

    /// Pins a template to `day`, or unpins it with `None`.
    /// # Errors
    /// Returns `anyhow::Error` if the template doesn't exist or belongs to another user.
    pub fn assign_template_to_day(
        &mut self,
        user_id: i64,
        template_id: i64,
        day: Option<Weekday>,
    ) -> Result<()> {
        let template =
            db::get_template(&self.conn, template_id)?.ok_or(DbError::TemplateNotFound(template_id))?;
        if template.user_id != user_id {
            bail!("Template {template_id} does not belong to user {user_id}.");
        }
        self.update_template(
            template_id,
            TemplatePatch {
                day_assigned: Some(day),
                ..Default::default()
            },
        )?;
        info!(template_id, ?day, "Assigned template to day");
        Ok(())
    }

    pub fn delete_template(&self, id: i64) -> Result<u64> {
        let rows = db::delete_template(&self.conn, id)?;
        info!(template_id = id, "Deleted template");
        Ok(rows)
    }

    /// Appends an exercise to a template and returns the new entry id.
    /// # Errors
    /// Returns `anyhow::Error` if `sets < 1` or the template or exercise doesn't exist.
    pub fn add_exercise_to_template(
        &self,
        template_id: i64,
        exercise_id: i64,
        sets: i64,
        reps: Reps,
        weight: Option<f64>,
    ) -> Result<i64> {
        if sets < 1 {
            bail!("Target sets must be at least 1, got {sets}.");
        }
        db::get_template(&self.conn, template_id)?.ok_or(DbError::TemplateNotFound(template_id))?;
        self.require_exercise(exercise_id)?;
        let id = db::add_exercise_to_template(&self.conn, template_id, exercise_id, sets, &reps, weight)
            .with_context(|| format!("Failed to add exercise {exercise_id} to template {template_id}"))?;
        debug!(template_id, exercise_id, entry_id = id, "Added exercise to template");
        Ok(id)
    }

    pub fn update_template_exercise(&self, id: i64, patch: TemplateExercisePatch) -> Result<u64> {
        if let Some(sets) = patch.target_sets {
            if sets < 1 {
                bail!("Target sets must be at least 1, got {sets}.");
            }
        }
        db::update_template_exercise(&self.conn, id, patch).map_err(Into::into)
    }

    pub fn remove_exercise_from_template(&self, id: i64) -> Result<u64> {
        db::remove_exercise_from_template(&self.conn, id).map_err(Into::into)
    }

    /// Renumbers a template's entries 0..n-1 in the given order.
    /// Returns how many entries were renumbered.
    pub fn reorder_exercises(&mut self, template_id: i64, ordered_ids: &[i64]) -> Result<u64> {
        if ordered_ids.is_empty() {
            bail!("Reorder needs at least one entry id.");
        }
        let tx = self.conn.transaction().map_err(DbError::Connection)?;
        db::get_template(&tx, template_id)?.ok_or(DbError::TemplateNotFound(template_id))?;
        let moved = db::reorder_template_exercises(&tx, template_id, ordered_ids)?;
        tx.commit().map_err(DbError::Connection)?;
        Ok(moved)
    }

    // --- Workout Session Engine ---

    /// Starts a session now, copying the template's exercises if one is given.
    pub fn start_session(&mut self, user_id: i64, template_id: Option<i64>) -> Result<i64> {
        self.start_session_at(user_id, template_id, Utc::now())
    }

    /// Starts a session with an explicit start time.
    /// # Errors
    /// Returns `anyhow::Error` if the user or template is unknown or storage fails.
    pub fn start_session_at(
        &mut self,
        user_id: i64,
        template_id: Option<i64>,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.require_user(user_id)?;

        let tx = self.conn.transaction().map_err(DbError::Connection)?;
        let entries = match template_id {
            Some(tid) => {
                db::get_template(&tx, tid)?.ok_or(DbError::TemplateNotFound(tid))?;
                db::list_template_exercises(&tx, tid)?
            }
            None => Vec::new(),
        };
        let session_id = db::insert_session(&tx, user_id, template_id, started_at)?;
        for (position, entry) in entries.iter().enumerate() {
            db::insert_session_exercise(&tx, session_id, entry.exercise_id, position as i64)?;
        }
        tx.commit().map_err(DbError::Connection)?;

        info!(
            session_id,
            user_id,
            ?template_id,
            exercises = entries.len(),
            "Started workout session"
        );
        Ok(session_id)
    }

    /// The session with its exercises and a ghost set for each.
    pub fn get_session_by_id(&self, id: i64) -> Result<Option<SessionDetail>> {
        let Some(session) = db::get_session(&self.conn, id)? else {
            return Ok(None);
        };
        self.build_session_detail(session).map(Some)
    }

    /// The user's unfinished session, if any, so a restarted runner can resume it.
    pub fn get_active_session(&self, user_id: i64) -> Result<Option<SessionDetail>> {
        let Some(session) = db::get_active_session(&self.conn, user_id)? else {
            return Ok(None);
        };
        self.build_session_detail(session).map(Some)
    }

    fn build_session_detail(&self, session: WorkoutSession) -> Result<SessionDetail> {
        let template_name = match session.template_id {
            Some(tid) => db::get_template(&self.conn, tid)?.map(|t| t.name),
            None => None,
        };
        let exercises = db::list_session_exercises(&self.conn, session.id)?
            .into_iter()
            .map(|exercise| {
                let ghost = db::last_performance(
                    &self.conn,
                    session.user_id,
                    exercise.exercise_id,
                    Some(session.id),
                )?;
                Ok(SessionExerciseView { exercise, ghost })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SessionDetail {
            session,
            template_name,
            exercises,
        })
    }

    pub fn list_sessions(&self, user_id: i64, limit: u32) -> Result<Vec<SessionSummary>> {
        db::list_sessions(&self.conn, user_id, limit)
            .context("Failed to list sessions")
            .map_err(Into::into)
    }

    fn active_session_of_slot(&self, session_exercise_id: i64) -> Result<(SessionExercise, WorkoutSession)> {
        let slot = db::get_session_exercise(&self.conn, session_exercise_id)?
            .ok_or(DbError::SessionExerciseNotFound(session_exercise_id))?;
        let session = self.ensure_active(slot.session_id)?;
        Ok((slot, session))
    }

    fn ensure_active(&self, session_id: i64) -> Result<WorkoutSession> {
        db::ensure_session_active(&self.conn, session_id).map_err(|e| {
            if let DbError::SessionNotActive(_) = e {
                warn!(session_id, "Rejected change to a completed session");
            }
            e.into()
        })
    }

    /// Appends an exercise to a running session at `order_index = current count`.
    /// # Errors
    /// Returns `anyhow::Error` if the session isn't active or the exercise is unknown.
    pub fn add_exercise_to_session(&self, session_id: i64, exercise_id: i64) -> Result<SlotChange> {
        let session = self.ensure_active(session_id)?;
        let exercise = self.require_exercise(exercise_id)?;

        let position = db::count_session_exercises(&self.conn, session_id)?;
        let id = db::insert_session_exercise(&self.conn, session_id, exercise_id, position)?;
        let ghost = db::last_performance(&self.conn, session.user_id, exercise_id, Some(session_id))?;
        debug!(session_id, exercise_id, slot = id, "Added exercise to session");

        Ok(SlotChange {
            session_exercise_id: id,
            rest_seconds: exercise.default_rest_seconds,
            ghost,
        })
    }

    /// Removes a slot from a running session. Other slots keep their positions.
    pub fn remove_session_exercise(&self, session_exercise_id: i64) -> Result<()> {
        let (slot, _) = self.active_session_of_slot(session_exercise_id)?;
        db::delete_session_exercise(&self.conn, session_exercise_id)?;
        debug!(session_id = slot.session_id, slot = session_exercise_id, "Removed exercise from session");
        Ok(())
    }

    /// Replaces the exercise in a slot; anything recorded for the slot is cleared.
    /// # Errors
    /// Returns `anyhow::Error` if the slot or new exercise is unknown or the session isn't active.
    pub fn swap_session_exercise(
        &self,
        session_exercise_id: i64,
        new_exercise_id: i64,
    ) -> Result<SlotChange> {
        let (slot, session) = self.active_session_of_slot(session_exercise_id)?;
        let exercise = self.require_exercise(new_exercise_id)?;

        db::swap_session_exercise(&self.conn, session_exercise_id, new_exercise_id)?;
        let ghost =
            db::last_performance(&self.conn, session.user_id, new_exercise_id, Some(session.id))?;
        debug!(
            session_id = session.id,
            slot = session_exercise_id,
            from = slot.exercise_id,
            to = new_exercise_id,
            "Swapped session exercise"
        );

        Ok(SlotChange {
            session_exercise_id,
            rest_seconds: exercise.default_rest_seconds,
            ghost,
        })
    }

    /// Persists one field of a slot. Marking it completed returns the rest timer to show.
    /// # Errors
    /// Returns `anyhow::Error` if the slot is unknown, the session isn't active, or a value is negative.
    pub fn update_session_exercise(
        &self,
        session_exercise_id: i64,
        update: SessionUpdate,
    ) -> Result<Option<RestTimer>> {
        match update {
            SessionUpdate::SetActualSets(sets) if sets < 0 => {
                bail!("Sets cannot be negative, got {sets}.")
            }
            SessionUpdate::SetActualWeight(weight) if weight < 0.0 || !weight.is_finite() => {
                bail!("Weight must be a non-negative number, got {weight}.")
            }
            _ => {}
        }
        let (slot, _) = self.active_session_of_slot(session_exercise_id)?;
        db::update_session_exercise(&self.conn, session_exercise_id, &update)?;
        debug!(slot = session_exercise_id, field = update.column(), "Updated session exercise");

        if !update.starts_rest_timer() {
            return Ok(None);
        }
        let rest = self.rest_seconds_for(slot.exercise_id)?;
        Ok(Some(RestTimer::start(session_exercise_id, rest, Utc::now())))
    }

    /// Rest period for a library exercise, or the configured default when it can't be found.
    pub fn rest_seconds_for(&self, exercise_id: i64) -> Result<u32> {
        Ok(db::get_exercise_by_id(&self.conn, exercise_id)?
            .map_or(self.config.default_rest_seconds, |e| e.default_rest_seconds))
    }

    pub fn set_session_notes(&self, session_id: i64, notes: Option<&str>) -> Result<()> {
        self.ensure_active(session_id)?;
        db::set_session_notes(&self.conn, session_id, notes)?;
        Ok(())
    }

    /// Marks a session completed now. Incomplete exercises don't block finishing.
    pub fn finish_session(&self, session_id: i64) -> Result<()> {
        self.finish_session_at(session_id, Utc::now())
    }

    /// # Errors
    /// Returns `anyhow::Error` wrapping `SessionNotFound` or `SessionNotActive`.
    pub fn finish_session_at(&self, session_id: i64, completed_at: DateTime<Utc>) -> Result<()> {
        self.ensure_active(session_id)?;
        db::finish_session(&self.conn, session_id, completed_at)?;
        info!(session_id, "Finished workout session");
        Ok(())
    }

    /// Throws away a running session and everything logged in it.
    /// # Errors
    /// Returns `anyhow::Error` wrapping `SessionNotActive` for a finished session.
    pub fn discard_session(&self, session_id: i64) -> Result<()> {
        self.ensure_active(session_id)?;
        db::delete_active_session(&self.conn, session_id)?;
        info!(session_id, "Discarded workout session");
        Ok(())
    }

    // --- Last performance and progress ---

    /// Most recent recorded performance of an exercise across all of the user's sessions.
    pub fn last_performance(&self, user_id: i64, exercise_id: i64) -> Result<Option<LastPerformance>> {
        db::last_performance(&self.conn, user_id, exercise_id, None)
            .with_context(|| format!("Failed last performance lookup for exercise {exercise_id}"))
            .map_err(Into::into)
    }

    pub fn estimated_one_rep_max(&self, user_id: i64, exercise_id: i64) -> Result<Option<f64>> {
        Ok(self
            .last_performance(user_id, exercise_id)?
            .and_then(|p| p.estimated_one_rep_max()))
    }

    /// Up to `limit` most recent entries (config `history_limit` if `None`), oldest first.
    pub fn get_exercise_history(
        &self,
        user_id: i64,
        exercise_id: i64,
        limit: Option<u32>,
    ) -> Result<Vec<HistoryEntry>> {
        let limit = limit.unwrap_or(self.config.history_limit);
        db::exercise_history(&self.conn, user_id, exercise_id, limit)
            .with_context(|| format!("Failed history fetch for exercise {exercise_id}"))
            .map_err(Into::into)
    }

    /// History series plus best (heaviest), latest and 1RM estimate.
    /// # Errors
    /// Returns `anyhow::Error` if the exercise doesn't exist or storage fails.
    pub fn get_exercise_progress(
        &self,
        user_id: i64,
        exercise_id: i64,
        limit: Option<u32>,
    ) -> Result<ExerciseProgress> {
        let exercise = self.require_exercise(exercise_id)?;
        let history = self.get_exercise_history(user_id, exercise_id, limit)?;

        let best = history
            .iter()
            .filter(|h| h.weight.is_some())
            .fold(None::<&HistoryEntry>, |best, h| match best {
                Some(b) if b.weight >= h.weight => Some(b),
                _ => Some(h),
            })
            .cloned();
        let latest = history.last().cloned();
        let estimated_one_rep_max = latest.as_ref().and_then(|h| {
            h.weight
                .map(|w| estimate_one_rep_max(w, &h.reps.unwrap_or(Reps::Fixed(1))))
        });

        Ok(ExerciseProgress {
            exercise,
            history,
            best,
            latest,
            estimated_one_rep_max,
        })
    }
}
