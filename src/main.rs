//src/main.rs
mod cli;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use std::io::{self, stdout, Write};
use std::thread;
use std::time::Duration as StdDuration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gym_runner_lib::{
    estimate_one_rep_max, parse_day, AppService, DbError, Exercise, ExercisePatch,
    ExerciseProgress, LastPerformance, NewExercise, Reps, RestTimer, SessionDetail,
    SessionSummary, SessionUpdate, TemplateExercisePatch, TemplatePatch, TemplateWithExercises,
    Units, User,
};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gym_runner=info,gym_runner_lib=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli_args = cli::parse_args();
    let export_csv = cli_args.export_csv;

    if let cli::Commands::GenerateCompletion { shell } = cli_args.command {
        let mut cmd = cli::build_cli_command();
        let bin_name = cmd.get_name().to_string();
        eprintln!("Generating completion script for {shell}...");
        clap_complete::generate(shell, &mut cmd, bin_name, &mut stdout());
        return Ok(());
    }

    let mut service =
        AppService::initialize().context("Failed to initialize application service")?;
    let header_color = gym_runner_lib::parse_color(&service.config.theme.header_color)
        .map(Color::from)
        .unwrap_or(Color::Green);
    let units = service.config.units;

    match cli_args.command {
        cli::Commands::GenerateCompletion { .. } => {
            unreachable!("Completion generation should have exited already");
        }

        // --- Users ---
        cli::Commands::User(cli::UserCommands::Add { name }) => {
            let id = service.create_user(&name)?;
            println!("Created user '{}' (ID: {id}).", name.trim());
        }
        cli::Commands::User(cli::UserCommands::List) => {
            let users = service.list_users()?;
            if users.is_empty() {
                println!("No users yet. Create one with 'user add <name>'.");
            } else {
                print_user_table(&users, service.config.current_user_id, header_color);
            }
        }
        cli::Commands::Login { name } => {
            let user = service.login(&name)?;
            println!("Logged in as '{}' (ID: {}).", user.name, user.id);
        }
        cli::Commands::Logout => {
            service.logout()?;
            println!("Logged out.");
        }

        // --- Exercise library ---
        cli::Commands::CreateExercise {
            name,
            muscle_group,
            video,
            instructions,
            rest,
        } => {
            let id = service.create_exercise(NewExercise {
                name: &name,
                muscle_group: &muscle_group,
                video_reference: video.as_deref(),
                instructions: instructions.as_deref(),
                default_rest_seconds: rest,
            })?;
            println!("Added exercise '{}' ({}) ID: {id}", name.trim(), muscle_group.trim());
        }
        cli::Commands::EditExercise {
            identifier,
            name,
            muscle_group,
            video,
            instructions,
            rest,
        } => {
            let exercise = resolve_exercise(&service, &identifier)?;
            let patch = ExercisePatch {
                name,
                muscle_group,
                video_reference: video.map(empty_to_none),
                instructions: instructions.map(empty_to_none),
                default_rest_seconds: rest,
            };
            let rows = service.update_exercise(exercise.id, patch)?;
            println!("Updated exercise '{}' ({rows} row(s) affected).", exercise.name);
        }
        cli::Commands::DeleteExercise { identifier } => {
            let exercise = resolve_exercise(&service, &identifier)?;
            match service.delete_exercise(exercise.id) {
                Ok(_) => println!("Deleted exercise '{}'.", exercise.name),
                Err(e) => {
                    if let Some(DbError::ExerciseInUse { .. }) = e.downcast_ref::<DbError>() {
                        bail!("{e}. Remove it from those templates/sessions first.");
                    }
                    bail!("Error deleting exercise '{}': {e}", exercise.name);
                }
            }
        }
        cli::Commands::ListExercises { muscle_group } => {
            let exercises = service.get_all_exercises(muscle_group.as_deref())?;
            if export_csv {
                print_exercise_csv(&exercises)?;
            } else if exercises.is_empty() {
                println!("No exercises found.");
            } else {
                print_exercise_table(&exercises, header_color);
            }
        }
        cli::Commands::MuscleGroups => {
            for group in service.get_muscle_groups()? {
                println!("{group}");
            }
        }

        // --- Templates ---
        cli::Commands::CreateTemplate { name, day, color } => {
            let user_id = service.current_user_id()?;
            let day = day.as_deref().map(parse_day).transpose()?;
            let id = service.create_template(user_id, &name, day, color.as_deref())?;
            match day {
                Some(d) => println!("Created template '{}' for {d} (ID: {id}).", name.trim()),
                None => println!("Created template '{}' (ID: {id}).", name.trim()),
            }
        }
        cli::Commands::EditTemplate { id, name, color } => {
            let patch = TemplatePatch {
                name,
                color: color.map(empty_to_none),
                ..Default::default()
            };
            service.update_template(id, patch)?;
            println!("Updated template {id}.");
        }
        cli::Commands::AssignDay {
            template_id,
            day,
            clear,
        } => {
            let user_id = service.current_user_id()?;
            let day = if clear {
                None
            } else {
                day.as_deref().map(parse_day).transpose()?
            };
            service.assign_template_to_day(user_id, template_id, day)?;
            match day {
                Some(d) => println!("Template {template_id} is now the {d} workout."),
                None => println!("Template {template_id} is no longer pinned to a day."),
            }
        }
        cli::Commands::DeleteTemplate { id } => {
            service.delete_template(id)?;
            println!("Deleted template {id} and its exercises.");
        }
        cli::Commands::ListTemplates => {
            let user_id = service.current_user_id()?;
            let templates = service.get_weekly_templates(user_id)?;
            if templates.is_empty() {
                println!("No templates yet. Create one with 'create-template'.");
            }
            for template in &templates {
                print_template(template, units, header_color);
            }
        }
        cli::Commands::ShowTemplate { id } => match service.get_template_by_id(id)? {
            Some(template) => print_template(&template, units, header_color),
            None => println!("Template {id} not found."),
        },
        cli::Commands::Today => {
            let user_id = service.current_user_id()?;
            match service.get_todays_template(user_id)? {
                Some(template) => print_template(&template, units, header_color),
                None => println!(
                    "Nothing planned for {}. Start an empty session with 'start'.",
                    Local::now().format("%A")
                ),
            }
        }
        cli::Commands::TemplateAdd {
            template_id,
            exercise,
            sets,
            reps,
            weight,
        } => {
            let exercise = resolve_exercise(&service, &exercise)?;
            let reps: Reps = reps.parse()?;
            let id = service.add_exercise_to_template(template_id, exercise.id, sets, reps, weight)?;
            println!("Added '{}' {sets}x{reps} to template {template_id} (entry ID: {id}).", exercise.name);
        }
        cli::Commands::TemplateEdit {
            entry_id,
            sets,
            reps,
            weight,
            clear_weight,
        } => {
            let patch = TemplateExercisePatch {
                target_sets: sets,
                target_reps: reps.as_deref().map(str::parse).transpose()?,
                target_weight: if clear_weight { Some(None) } else { weight.map(Some) },
            };
            let rows = service.update_template_exercise(entry_id, patch)?;
            println!("Updated template entry {entry_id} ({rows} row(s) affected).");
        }
        cli::Commands::TemplateRemove { entry_id } => {
            service.remove_exercise_from_template(entry_id)?;
            println!("Removed template entry {entry_id}.");
        }
        cli::Commands::TemplateReorder {
            template_id,
            entry_ids,
        } => {
            let moved = service.reorder_exercises(template_id, &entry_ids)?;
            if moved < entry_ids.len() as u64 {
                eprintln!("Warning: some ids are not entries of template {template_id} and were ignored.");
            }
            println!("Reordered {moved} entr(ies) of template {template_id}.");
        }

        // --- Session runner ---
        cli::Commands::Start { template } => {
            let user_id = service.current_user_id()?;
            if let Some(active) = service.get_active_session(user_id)? {
                eprintln!(
                    "Note: session {} started {} is still open.",
                    active.session.id,
                    active.session.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                );
            }
            let session_id = service.start_session(user_id, template)?;
            println!("Started session {session_id}.");
            if let Some(detail) = service.get_session_by_id(session_id)? {
                print_session(&detail, units, header_color);
            }
        }
        cli::Commands::Resume => {
            let user_id = service.current_user_id()?;
            match service.get_active_session(user_id)? {
                Some(detail) => print_session(&detail, units, header_color),
                None => println!("No session in progress."),
            }
        }
        cli::Commands::Show { session_id } => match service.get_session_by_id(session_id)? {
            Some(detail) => print_session(&detail, units, header_color),
            None => println!("Session {session_id} not found."),
        },
        cli::Commands::Add {
            session_id,
            exercise,
        } => {
            let exercise = resolve_exercise(&service, &exercise)?;
            let added = service.add_exercise_to_session(session_id, exercise.id)?;
            println!(
                "Added '{}' to session {session_id} (slot ID: {}, rest {}s).",
                exercise.name, added.session_exercise_id, added.rest_seconds
            );
            print_ghost(added.ghost.as_ref(), units);
        }
        cli::Commands::Remove { slot_id } => {
            service.remove_session_exercise(slot_id)?;
            println!("Removed slot {slot_id}.");
        }
        cli::Commands::Swap { slot_id, exercise } => {
            let exercise = resolve_exercise(&service, &exercise)?;
            let swapped = service.swap_session_exercise(slot_id, exercise.id)?;
            println!("Slot {slot_id} is now '{}'. Logged values were cleared.", exercise.name);
            print_ghost(swapped.ghost.as_ref(), units);
        }
        cli::Commands::SetSets { slot_id, sets } => {
            service.update_session_exercise(slot_id, SessionUpdate::SetActualSets(sets))?;
            println!("Slot {slot_id}: {sets} set(s).");
        }
        cli::Commands::SetReps { slot_id, reps } => {
            let reps: Reps = reps.parse()?;
            service.update_session_exercise(slot_id, SessionUpdate::SetActualReps(reps))?;
            println!("Slot {slot_id}: {reps} rep(s).");
        }
        cli::Commands::SetWeight { slot_id, weight } => {
            service.update_session_exercise(slot_id, SessionUpdate::SetActualWeight(weight))?;
            println!("Slot {slot_id}: {weight} {}.", units.weight_label());
        }
        cli::Commands::Complete { slot_id, wait } => {
            let timer = service.update_session_exercise(slot_id, SessionUpdate::SetCompleted(true))?;
            println!("Slot {slot_id} done.");
            if let Some(timer) = timer {
                println!("Rest {}s.", timer.duration_seconds);
                if wait {
                    run_rest_countdown(&timer)?;
                }
            }
        }
        cli::Commands::Uncomplete { slot_id } => {
            service.update_session_exercise(slot_id, SessionUpdate::SetCompleted(false))?;
            println!("Slot {slot_id} marked as not done.");
        }
        cli::Commands::Notes { session_id, notes } => {
            service.set_session_notes(session_id, Some(notes.trim()).filter(|n| !n.is_empty()))?;
            println!("Saved notes for session {session_id}.");
        }
        cli::Commands::Finish { session_id } => {
            let detail = service
                .get_session_by_id(session_id)?
                .ok_or(DbError::SessionNotFound(session_id))?;
            let (done, total) = (detail.completed_count(), detail.total_count());
            if service.config.warn_on_incomplete_finish && done < total {
                eprintln!("Warning: only {done} of {total} exercise(s) are marked done.");
            }
            service.finish_session(session_id)?;
            let elapsed = detail.session.elapsed(Utc::now());
            println!(
                "Finished session {session_id} after {}h{:02}m.",
                elapsed.num_hours(),
                elapsed.num_minutes() % 60
            );
        }
        cli::Commands::Discard { session_id } => {
            service.discard_session(session_id)?;
            println!("Discarded session {session_id}.");
        }
        cli::Commands::Sessions { limit } => {
            let user_id = service.current_user_id()?;
            let sessions = service.list_sessions(user_id, limit)?;
            if export_csv {
                print_sessions_csv(&sessions)?;
            } else if sessions.is_empty() {
                println!("No sessions logged yet.");
            } else {
                print_sessions_table(&sessions, header_color);
            }
        }

        // --- Progress ---
        cli::Commands::Last { exercise } => {
            let user_id = service.current_user_id()?;
            let exercise = resolve_exercise(&service, &exercise)?;
            println!("{}:", exercise.name);
            print_ghost(service.last_performance(user_id, exercise.id)?.as_ref(), units);
        }
        cli::Commands::History { exercise, limit } => {
            let user_id = service.current_user_id()?;
            let exercise = resolve_exercise(&service, &exercise)?;
            let progress = service.get_exercise_progress(user_id, exercise.id, limit)?;
            if export_csv {
                print_history_csv(&progress)?;
            } else if progress.history.is_empty() {
                println!("No history for '{}' yet.", exercise.name);
            } else {
                print_progress(&progress, units, header_color);
            }
        }
        cli::Commands::OneRm {
            exercise,
            weight,
            reps,
        } => {
            if let Some(weight) = weight {
                let reps: Reps = reps.as_deref().unwrap_or("1").parse()?;
                println!(
                    "Estimated 1RM: {} {}",
                    estimate_one_rep_max(weight, &reps),
                    units.weight_label()
                );
            } else if let Some(identifier) = exercise {
                let user_id = service.current_user_id()?;
                let exercise = resolve_exercise(&service, &identifier)?;
                match service.estimated_one_rep_max(user_id, exercise.id)? {
                    Some(one_rm) => println!(
                        "Estimated 1RM for '{}': {one_rm} {}",
                        exercise.name,
                        units.weight_label()
                    ),
                    None => println!("No weighted performance logged for '{}'.", exercise.name),
                }
            }
        }

        // --- Config ---
        cli::Commands::DbPath => {
            println!("Database file is located at: {:?}", service.get_db_path());
        }
        cli::Commands::ConfigPath => {
            println!("Config file is located at: {:?}", service.get_config_path());
        }
        cli::Commands::SetUnits { units } => {
            let units = match units {
                cli::UnitsCli::Metric => Units::Metric,
                cli::UnitsCli::Imperial => Units::Imperial,
            };
            service.set_units(units)?;
            println!("Units set to {units:?}. Config updated: {:?}", service.get_config_path());
        }
        cli::Commands::SetDefaultRest { seconds } => {
            service.set_default_rest_seconds(seconds)?;
            println!("Default rest set to {seconds}s.");
        }
        cli::Commands::SetHistoryLimit { limit } => {
            service.set_history_limit(limit)?;
            println!("History limit set to {limit}.");
        }
    }

    Ok(())
}

fn resolve_exercise(service: &AppService, identifier: &str) -> Result<Exercise> {
    service
        .resolve_exercise(identifier)?
        .ok_or_else(|| DbError::ExerciseNotFound(identifier.trim().to_string()).into())
}

fn empty_to_none(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Counts the rest timer down on one terminal line.
fn run_rest_countdown(timer: &RestTimer) -> Result<()> {
    let mut out = stdout();
    loop {
        let now = Utc::now();
        if timer.is_finished(now) {
            break;
        }
        let left = timer.remaining_seconds(now);
        write!(out, "\rRest: {}:{:02} ", left / 60, left % 60)?;
        out.flush()?;
        thread::sleep(StdDuration::from_millis(250));
    }
    writeln!(out, "\rRest over. Next set!   ")?;
    Ok(())
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn header_row(titles: &[&str], color: Color) -> Vec<Cell> {
    titles
        .iter()
        .map(|t| Cell::new(t).add_attribute(Attribute::Bold).fg(color))
        .collect()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_user_table(users: &[User], current: Option<i64>, header_color: Color) {
    let mut table = new_table();
    table.set_header(header_row(&["ID", "Name", "Created", ""], header_color));
    for user in users {
        table.add_row(vec![
            Cell::new(user.id),
            Cell::new(&user.name),
            Cell::new(user.created_at.with_timezone(&Local).format("%Y-%m-%d")),
            Cell::new(if current == Some(user.id) { "current" } else { "" }),
        ]);
    }
    println!("{table}");
}

fn print_exercise_table(exercises: &[Exercise], header_color: Color) {
    let mut table = new_table();
    table.set_header(header_row(&["ID", "Name", "Muscle group", "Rest (s)", "Video"], header_color));
    for e in exercises {
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(&e.name),
            Cell::new(&e.muscle_group),
            Cell::new(e.default_rest_seconds),
            Cell::new(e.video_reference.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
}

fn print_exercise_csv(exercises: &[Exercise]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(["id", "name", "muscle_group", "default_rest_seconds", "video_reference"])?;
    for e in exercises {
        writer.write_record([
            e.id.to_string(),
            e.name.clone(),
            e.muscle_group.clone(),
            e.default_rest_seconds.to_string(),
            e.video_reference.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_template(template: &TemplateWithExercises, units: Units, header_color: Color) {
    let t = &template.template;
    let day = t.day_assigned.map_or_else(|| "unassigned".to_string(), |d| d.to_string());
    println!("[{}] {} ({day})", t.id, t.name);

    let mut table = new_table();
    table.set_header(header_row(
        &["Entry", "#", "Exercise", "Sets", "Reps", format!("Weight ({})", units.weight_label()).as_str(), "Rest (s)"],
        header_color,
    ));
    for e in &template.exercises {
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(e.order_index),
            Cell::new(&e.exercise_name),
            Cell::new(e.target_sets),
            Cell::new(e.target_reps),
            Cell::new(fmt_opt(e.target_weight)),
            Cell::new(e.default_rest_seconds),
        ]);
    }
    println!("{table}");
}

fn print_session(detail: &SessionDetail, units: Units, header_color: Color) {
    let s = &detail.session;
    let title = detail.template_name.as_deref().unwrap_or("Free session");
    let elapsed = s.elapsed(Utc::now());
    println!(
        "Session {} - {title} - {:?} - started {} ({}h{:02}m) - {}/{} done",
        s.id,
        detail.status(),
        s.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        elapsed.num_hours(),
        elapsed.num_minutes() % 60,
        detail.completed_count(),
        detail.total_count()
    );
    if let Some(notes) = &s.notes {
        println!("Notes: {notes}");
    }

    let weight_label = units.weight_label();
    let mut table = new_table();
    table.set_header(header_row(
        &["Slot", "Exercise", "Sets", "Reps", format!("Weight ({weight_label})").as_str(), "Done", "Last time"],
        header_color,
    ));
    for view in &detail.exercises {
        let e = &view.exercise;
        let ghost = view
            .ghost
            .as_ref()
            .map_or_else(|| "-".to_string(), |g| describe_performance(g, weight_label));
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(&e.exercise_name),
            Cell::new(fmt_opt(e.actual_sets)),
            Cell::new(fmt_opt(e.actual_reps)),
            Cell::new(fmt_opt(e.actual_weight)),
            Cell::new(if e.completed { "yes" } else { "" }).fg(if e.completed { Color::Green } else { Color::Reset }),
            Cell::new(ghost),
        ]);
    }
    println!("{table}");
}

fn describe_performance(p: &LastPerformance, weight_label: &str) -> String {
    format!(
        "{} x {} @ {} {weight_label}",
        fmt_opt(p.sets),
        fmt_opt(p.reps),
        fmt_opt(p.weight)
    )
}

fn print_ghost(ghost: Option<&LastPerformance>, units: Units) {
    match ghost {
        Some(p) => {
            println!(
                "Last time ({}): {}",
                p.performed_at.with_timezone(&Local).format("%Y-%m-%d"),
                describe_performance(p, units.weight_label())
            );
            if let Some(one_rm) = p.estimated_one_rep_max() {
                println!("Estimated 1RM: {one_rm} {}", units.weight_label());
            }
        }
        None => println!("No previous performance logged."),
    }
}

fn print_sessions_table(sessions: &[SessionSummary], header_color: Color) {
    let mut table = new_table();
    table.set_header(header_row(&["ID", "Started", "Template", "Status", "Done"], header_color));
    for s in sessions {
        table.add_row(vec![
            Cell::new(s.session.id),
            Cell::new(s.session.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")),
            Cell::new(s.template_name.as_deref().unwrap_or("-")),
            Cell::new(format!("{:?}", s.session.status())),
            Cell::new(format!("{}/{}", s.completed_count, s.exercise_count)),
        ]);
    }
    println!("{table}");
}

fn print_sessions_csv(sessions: &[SessionSummary]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(["id", "started_at", "completed_at", "template", "completed", "total"])?;
    for s in sessions {
        writer.write_record([
            s.session.id.to_string(),
            s.session.started_at.to_rfc3339(),
            s.session.completed_at.map(|c| c.to_rfc3339()).unwrap_or_default(),
            s.template_name.clone().unwrap_or_default(),
            s.completed_count.to_string(),
            s.exercise_count.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_progress(progress: &ExerciseProgress, units: Units, header_color: Color) {
    let weight_label = units.weight_label();
    let mut table = new_table();
    table.set_header(header_row(
        &["Date", "Sets", "Reps", format!("Weight ({weight_label})").as_str(), "Volume"],
        header_color,
    ));
    for h in &progress.history {
        table.add_row(vec![
            Cell::new(h.date.with_timezone(&Local).format("%Y-%m-%d")),
            Cell::new(fmt_opt(h.sets)),
            Cell::new(fmt_opt(h.reps)),
            Cell::new(fmt_opt(h.weight)),
            Cell::new(h.volume),
        ]);
    }
    println!("{}", progress.exercise.name);
    println!("{table}");
    if let Some(best) = &progress.best {
        println!("Best: {} {weight_label}", fmt_opt(best.weight));
    }
    if let Some(latest) = &progress.latest {
        println!("Latest: {} {weight_label} x {}", fmt_opt(latest.weight), fmt_opt(latest.reps));
    }
    if let Some(one_rm) = progress.estimated_one_rep_max {
        println!("Estimated 1RM: {one_rm} {weight_label}");
    }
}

fn print_history_csv(progress: &ExerciseProgress) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(["date", "sets", "reps", "weight", "volume"])?;
    for h in &progress.history {
        writer.write_record([
            h.date.format("%Y-%m-%d").to_string(),
            h.sets.map(|s| s.to_string()).unwrap_or_default(),
            h.reps.map(|r| r.to_string()).unwrap_or_default(),
            h.weight.map(|w| w.to_string()).unwrap_or_default(),
            h.volume.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
