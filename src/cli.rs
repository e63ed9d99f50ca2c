// src/cli.rs
use clap::{Command, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(author, version, about = "Plan workout templates and log live sessions", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Print list output as CSV instead of tables
    #[arg(long, global = true)]
    pub export_csv: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitsCli {
    Metric,
    Imperial,
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Create a user
    Add { name: String },
    /// List users
    List,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage users
    #[command(subcommand)]
    User(UserCommands),
    /// Become the current user for all following commands
    Login { name: String },
    /// Forget the current user
    Logout,

    // --- Exercise library ---
    /// Add an exercise to the library
    CreateExercise {
        /// Name of the exercise (e.g., "Bench Press")
        #[arg(short, long)]
        name: String,
        /// Muscle group (e.g., "chest")
        #[arg(short, long)]
        muscle_group: String,
        /// Video reference, e.g. a video id
        #[arg(long)]
        video: Option<String>,
        #[arg(long)]
        instructions: Option<String>,
        /// Rest between sets in seconds (defaults to the configured rest)
        #[arg(short, long)]
        rest: Option<u32>,
    },
    /// Edit a library exercise. Pass an empty string to clear video/instructions
    EditExercise {
        /// Exercise ID or name
        identifier: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        muscle_group: Option<String>,
        #[arg(long)]
        video: Option<String>,
        #[arg(long)]
        instructions: Option<String>,
        #[arg(short, long)]
        rest: Option<u32>,
    },
    /// Delete a library exercise that no template or session uses
    DeleteExercise {
        /// Exercise ID or name
        identifier: String,
    },
    /// List library exercises
    ListExercises {
        /// Only exercises of this muscle group
        #[arg(short, long)]
        muscle_group: Option<String>,
    },
    /// List known muscle groups
    MuscleGroups,

    // --- Templates ---
    /// Create a workout template
    CreateTemplate {
        name: String,
        /// Weekday (0-6, 0 = Sunday, or a name like "mon")
        #[arg(short, long)]
        day: Option<String>,
        #[arg(short, long)]
        color: Option<String>,
    },
    /// Rename or recolor a template
    EditTemplate {
        id: i64,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        color: Option<String>,
    },
    /// Pin a template to a weekday, or unpin it
    AssignDay {
        template_id: i64,
        /// Weekday (0-6, 0 = Sunday, or a name)
        #[arg(required_unless_present = "clear")]
        day: Option<String>,
        #[arg(long, conflicts_with = "day")]
        clear: bool,
    },
    DeleteTemplate { id: i64 },
    /// Show all templates for the week
    ListTemplates,
    /// Show one template with its exercises
    ShowTemplate { id: i64 },
    /// Show today's template
    Today,
    /// Add an exercise to a template
    TemplateAdd {
        template_id: i64,
        /// Exercise ID or name
        exercise: String,
        #[arg(short, long, default_value_t = 3)]
        sets: i64,
        /// Rep target, e.g. "10", "10-12" or "failure"
        #[arg(short, long, default_value = "10-12")]
        reps: String,
        #[arg(short, long)]
        weight: Option<f64>,
    },
    /// Change targets of a template entry
    TemplateEdit {
        entry_id: i64,
        #[arg(short, long)]
        sets: Option<i64>,
        #[arg(short, long)]
        reps: Option<String>,
        #[arg(short, long)]
        weight: Option<f64>,
        /// Remove the target weight
        #[arg(long, conflicts_with = "weight")]
        clear_weight: bool,
    },
    /// Remove an entry from a template
    TemplateRemove { entry_id: i64 },
    /// Reorder template entries (entry ids in the new order)
    TemplateReorder {
        template_id: i64,
        #[arg(required = true, num_args = 1..)]
        entry_ids: Vec<i64>,
    },

    // --- Session runner ---
    /// Start a session, from a template or empty
    Start {
        #[arg(short, long)]
        template: Option<i64>,
    },
    /// Show the unfinished session
    Resume,
    /// Show a session
    Show { session_id: i64 },
    /// Add an exercise to a running session
    Add {
        session_id: i64,
        /// Exercise ID or name
        exercise: String,
    },
    /// Remove an exercise from a running session
    Remove { slot_id: i64 },
    /// Replace the exercise in a slot (clears what was logged)
    Swap {
        slot_id: i64,
        /// Exercise ID or name
        exercise: String,
    },
    SetSets { slot_id: i64, sets: i64 },
    SetReps { slot_id: i64, reps: String },
    SetWeight { slot_id: i64, weight: f64 },
    /// Mark a slot done and start the rest timer
    Complete {
        slot_id: i64,
        /// Count the rest timer down in the terminal
        #[arg(short, long)]
        wait: bool,
    },
    /// Mark a slot as not done
    Uncomplete { slot_id: i64 },
    /// Set notes on a running session
    Notes { session_id: i64, notes: String },
    /// Finish a session
    Finish { session_id: i64 },
    /// Throw away a running session
    Discard { session_id: i64 },
    /// List recent sessions
    Sessions {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },

    // --- Progress ---
    /// Show the last recorded performance of an exercise
    Last { exercise: String },
    /// Show progress history of an exercise
    History {
        exercise: String,
        /// Number of most recent entries (defaults to the configured history limit)
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Estimate a 1RM from the latest performance, or from a given weight and reps
    OneRm {
        /// Exercise ID or name
        #[arg(required_unless_present = "weight")]
        exercise: Option<String>,
        #[arg(short, long, requires = "reps", conflicts_with = "exercise")]
        weight: Option<f64>,
        #[arg(short, long)]
        reps: Option<String>,
    },

    // --- Config ---
    /// Show the path to the database file
    DbPath,
    /// Show the path to the config file
    ConfigPath,
    SetUnits {
        #[arg(value_enum)]
        units: UnitsCli,
    },
    /// Rest seconds used for exercises created without a rest time
    SetDefaultRest { seconds: u32 },
    /// Number of entries shown by `history` by default
    SetHistoryLimit { limit: u32 },
    /// Generate shell completion scripts
    GenerateCompletion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

pub fn build_cli_command() -> Command {
    Cli::command()
}
