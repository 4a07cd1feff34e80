//! `chores`: command-line front end for the chore tracker.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chore_tracker::config::{default_config_path, TrackerConfig};
use chore_tracker::file_store::JsonFileStore;
use chore_tracker::model::Recurrence;
use chore_tracker::view::render_text;
use chore_tracker::{tracker_err, Reconciler, Result};

#[derive(Parser)]
#[command(name = "chores", version, about = "Weekly household chore grid")]
struct Cli {
    /// Config file (YAML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON data file, overriding the config.
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Grid year, overriding the config.
    #[arg(long, global = true)]
    year: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the week grid.
    Grid,
    /// Mark or unmark a chore for a week.
    Toggle {
        /// Chore id or title.
        task: String,
        /// Week number, 1-52.
        week: usize,
        /// Acting user id; defaults to `user` from the config.
        #[arg(long)]
        user: Option<String>,
    },
    /// Create a chore.
    Add {
        title: String,
        #[arg(long)]
        recurrence: Option<Recurrence>,
    },
    /// List chores with who did them last.
    List,
    /// List household members.
    Users,
    /// Add a household member.
    AddUser {
        name: String,
        #[arg(long, default_value = "#607D8B")]
        color: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    chore_tracker::init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e.message);
            for hint in &e.recovery_hints {
                eprintln!("  hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let mut config = TrackerConfig::load(&config_path)?;
    if cli.data.is_some() {
        config.data_file = cli.data;
    }
    if cli.year.is_some() {
        config.year = cli.year;
    }

    let store = Arc::new(JsonFileStore::new(config.data_file()));
    let tracker = Reconciler::new(store.clone(), &config);

    match cli.command {
        Commands::Grid => {
            tracker.refresh().await?;
            print_grid(&tracker).await;
        }
        Commands::Toggle { task, week, user } => {
            let user = user
                .or_else(|| config.user.clone())
                .ok_or_else(|| {
                    tracker_err!(ConfigInvalid, "No acting user").with_hints(vec![
                        "Pass --user <id>",
                        "Set `user` in the config file",
                    ])
                })?;
            if week == 0 {
                return Err(tracker_err!(WeekOutOfRange, "Weeks are numbered from 1"));
            }
            tracker.refresh().await?;
            let task_id = resolve_task(&tracker, &task).await?;
            let record = tracker.toggle(&task_id, week - 1, &user).await?.wait().await?;
            let verb = if record.is_unmark() { "Cleared" } else { "Marked" };
            println!("{} week {} of {} for {}", verb, week, task, user);
            print_grid(&tracker).await;
        }
        Commands::Add { title, recurrence } => {
            let task = tracker.create_task(&title, recurrence).await?;
            println!("{}\t{}", task.id, task.title);
        }
        Commands::List => {
            for summary in tracker.chore_summaries().await? {
                let recurrence = summary
                    .task
                    .recurrence
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let last = match (summary.last_done_by, summary.last_done_at) {
                    (Some(by), Some(at)) => format!("{} on {}", by, at.format("%Y-%m-%d")),
                    _ => "never".to_string(),
                };
                println!("{}\t{}\t{}\t{}", summary.task.id, summary.task.title, recurrence, last);
            }
        }
        Commands::Users => {
            tracker.refresh().await?;
            for user in tracker.users().await {
                println!("{}\t{}\t{}", user.id, user.name, user.color);
            }
        }
        Commands::AddUser { name, color } => {
            let user = store
                .add_user(&name, &color)
                .await
                .map_err(|e| chore_tracker::TrackerError::write("adding user", e))?;
            println!("{}\t{}", user.id, user.name);
        }
    }
    Ok(())
}

async fn print_grid(tracker: &Reconciler<JsonFileStore>) {
    if let Some(view) = tracker.view().await {
        print!("{}", render_text(&view));
    }
}

/// Match a chore by id, then by case-insensitive title.
async fn resolve_task(tracker: &Reconciler<JsonFileStore>, needle: &str) -> Result<String> {
    let matrix = tracker.matrix().await.unwrap_or_default();
    matrix
        .rows
        .iter()
        .find(|r| r.id == needle)
        .or_else(|| matrix.rows.iter().find(|r| r.name.eq_ignore_ascii_case(needle)))
        .map(|r| r.id.clone())
        .ok_or_else(|| tracker_err!(TaskNotFound, "No chore matching {:?}", needle))
}
