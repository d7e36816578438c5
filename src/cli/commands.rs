use clap::{Parser, Subcommand};

const VERSION: &str = env!("TASKCLOCK_VERSION");

#[derive(Parser)]
#[command(
    name = "taskclock",
    version = VERSION,
    about = "Task tracking with linked tasks and a per-task timer",
    after_help = "\
NOTE:
  Requires a git repository. DB is stored at <git-root>/.taskclock/taskclock.db
  (override with TASKCLOCK_DB). Run `taskclock init` before any other command.
  Timer settings are read from config.json next to the database.

EXIT CODES:
  0  Success
  1  Error (DB, validation, not found, link conflict, etc.)

LOGGING:
  Set TASKCLOCK_LOG (e.g. `info`, `taskclock=debug`). Logs go to stderr."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize taskclock in this repository
    Init,

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Time tracking
    #[command(subcommand)]
    Timer(TimerCommands),

    /// Show task counts per status and the active task
    Status,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task
    Add {
        /// Task title
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// low | medium | high
        #[arg(long)]
        priority: Option<String>,
        /// Due date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        due: Option<String>,
        /// backlog | planned | in-progress | under-review | completed | cancelled
        #[arg(long)]
        status: Option<String>,
        /// Attachment reference (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
        /// Allowed application (repeatable)
        #[arg(long = "app")]
        allowed_apps: Vec<String>,
    },
    /// List all tasks, newest first
    List,
    /// Show task details
    Show {
        id: String,
    },
    /// Update task fields. Links and time spent are not touched.
    #[command(after_help = "\
NOTE:
  Passing any --file replaces the whole file list; same for --app.
  Use --clear-assignee / --clear-due / --clear-files / --clear-apps to empty a field.")]
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "clear_assignee")]
        assignee: Option<String>,
        #[arg(long)]
        clear_assignee: bool,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,
        #[arg(long)]
        clear_due: bool,
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "file", conflicts_with = "clear_files")]
        files: Vec<String>,
        #[arg(long)]
        clear_files: bool,
        #[arg(long = "app", conflicts_with = "clear_apps")]
        allowed_apps: Vec<String>,
        #[arg(long)]
        clear_apps: bool,
    },
    /// Delete a task and all of its links
    Delete {
        id: String,
    },
    /// Link two tasks (symmetric)
    Link {
        id: String,
        other: String,
    },
    /// Remove the link between two tasks
    Unlink {
        id: String,
        other: String,
    },
    /// Set the total time spent on a task, in seconds
    SetTime {
        id: String,
        seconds: u64,
    },
    /// Show the most recently updated in-progress task
    Active,
}

#[derive(Subcommand)]
pub enum TimerCommands {
    /// Time a task in the foreground until Ctrl-C or countdown completion
    #[command(after_help = "\
NOTE:
  Elapsed time continues from the task's stored total and is saved in the
  background at most once per flush interval, on stop, and on exit.
  `--countdown` without a value uses default_countdown_secs from config.json.")]
    Run {
        id: String,
        /// Count down from this many seconds instead of counting up
        #[arg(long, value_name = "SECS", num_args = 0..=1)]
        countdown: Option<Option<u64>>,
    },
}
