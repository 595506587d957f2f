//! Command-line front end for the activity tracker.
//!
//! # Responsibility
//! - Parse flags into `GatewayConfig` and logging settings.
//! - Drive `ActivityService` and print every change event it fans out.

use clap::{Parser, Subcommand};
use goodforme_core::{
    default_log_level, init_logging, ActivityService, ChangeEvent, Gateway, GatewayConfig,
    LogicalId, StoreConfig, UserActivity,
};
use log::error;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Track daily activities in a local SQLite store.
#[derive(Parser, Debug)]
#[command(name = "goodforme")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Database file
    #[arg(long, default_value = "./goodforme.sqlite3")]
    db: PathBuf,

    /// Directory for rolling log files; logging is off when omitted
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an activity, marked done today
    Add { name: String },
    /// List activities in creation order
    List,
    /// Mark an activity done today
    Done { id: String },
    /// Remove the most recent day mark from an activity
    Undo { id: String },
    /// Rename an activity
    Rename { id: String, name: String },
    /// Delete an activity
    Remove { id: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = setup_logging(&cli) {
        eprintln!("goodforme: {err}");
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("goodforme: {err}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(cli: &Cli) -> Result<(), String> {
    let Some(dir) = &cli.log_dir else {
        return Ok(());
    };
    let dir = absolute(dir).map_err(|err| err.to_string())?;
    let level = cli.log_level.as_deref().unwrap_or(default_log_level());
    init_logging(level, &dir.to_string_lossy())
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let gateway = Gateway::open(GatewayConfig::new(StoreConfig::file(&cli.db)))?;
    let activities = gateway.activity_service();
    activities.data().fetch();
    activities
        .data()
        .subscribe("cli", |event: &ChangeEvent| println!("change {event}"));

    let outcome = execute(&activities, &cli.command);
    activities.data().flush_presentation();
    drop(activities);
    gateway.shutdown()?;
    outcome
}

fn execute(activities: &ActivityService, command: &Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Add { name } => print_activity(&activities.create_named(name)?),
        Command::List => {
            for activity in activities.activities() {
                print_activity(&activity);
            }
        }
        Command::Done { id } => {
            print_activity(&activities.mark_done_now(&LogicalId::from(id.as_str()))?)
        }
        Command::Undo { id } => {
            let id = LogicalId::from(id.as_str());
            let latest = activities
                .activities()
                .iter()
                .find(|activity| activity.id() == &id)
                .and_then(|activity| activity.dates().last().copied());
            match latest {
                Some(day) => print_activity(&activities.unmark(&id, day)?),
                None => println!("nothing to undo for {id}"),
            }
        }
        Command::Rename { id, name } => {
            print_activity(&activities.rename(&LogicalId::from(id.as_str()), name)?)
        }
        Command::Remove { id } => {
            if !activities.remove(&LogicalId::from(id.as_str()))? {
                println!("no activity {id}");
            }
        }
    }
    Ok(())
}

fn print_activity(activity: &UserActivity) {
    println!(
        "{}  {}  done={}",
        activity.id(),
        activity.name(),
        activity.dates().len()
    );
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
