//! Resilient self-modifying agent loop.
//!
//! Run with no subcommand once per external iteration: it performs exactly one
//! iteration, appends one record to `.warden/state/iterations.jsonl` and prints
//! a single status line.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use warden::core::types::TaskStatus;
use warden::exit_codes;
use warden::io::history::IterationHistory;
use warden::io::init::{InitOptions, ensure_initialized, init_workspace};
use warden::io::model::CommandModel;
use warden::io::notify::FileNotifier;
use warden::io::now_rfc3339;
use warden::io::queue::TaskQueue;
use warden::logging;
use warden::orchestrator::run_one_iteration;

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Resilient self-modifying agent loop: one iteration per invocation"
)]
struct Cli {
    /// Directory holding `.warden/` and the live tree.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.warden/` and take the baseline snapshot.
    Init {
        /// Rewrite config and goal placeholders of an initialized root.
        #[arg(short, long)]
        force: bool,
    },
    /// Add a task to the queue.
    Enqueue {
        /// What the task should achieve.
        description: String,
    },
    /// Print queue counts, stuck tasks and the last iteration record.
    Status,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        None => cmd_run(&cli.root),
        Some(command) => {
            let result = match command {
                Command::Init { force } => cmd_init(&cli.root, force),
                Command::Enqueue { description } => cmd_enqueue(&cli.root, &description),
                Command::Status => cmd_status(&cli.root),
            };
            match result {
                Ok(()) => exit_codes::OK,
                Err(err) => {
                    eprintln!("{err:#}");
                    exit_codes::INVALID
                }
            }
        }
    };
    std::process::exit(code);
}

fn cmd_run(root: &Path) -> i32 {
    let (paths, config) = match ensure_initialized(root) {
        Ok(opened) => opened,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::FATAL;
        }
    };
    let model = CommandModel::new(config.model.clone());
    let notifier = FileNotifier::new(&paths.human_attention_path);
    match run_one_iteration(root, &model, &notifier) {
        Ok(report) => {
            println!("{}", report.status_line());
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{err}");
            exit_codes::FATAL
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let (paths, _) = init_workspace(root, &InitOptions { force })?;
    println!("initialized {}", paths.warden_dir.display());
    Ok(())
}

fn cmd_enqueue(root: &Path, description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(anyhow!("task description must not be empty"));
    }
    let (paths, _) = ensure_initialized(root)?;
    let mut queue = TaskQueue::load(&paths.tasks_path)?;
    let id = queue.enqueue(description, &now_rfc3339(), None)?;
    println!("enqueued task {id}");
    Ok(())
}

fn cmd_status(root: &Path) -> Result<()> {
    let (paths, _) = ensure_initialized(root)?;
    let queue = TaskQueue::load(&paths.tasks_path)?;
    println!(
        "tasks: {} pending, {} in progress, {} done, {} stuck",
        queue.count(TaskStatus::Pending),
        queue.count(TaskStatus::InProgress),
        queue.count(TaskStatus::Done),
        queue.count(TaskStatus::Stuck)
    );
    for task in queue.list_stuck() {
        println!("stuck: task {} after {} attempts: {}", task.id, task.attempts, task.description);
    }
    match IterationHistory::new(&paths.history_path).last()? {
        Some(record) => println!("last: {} at {}: {}", record.status_line(), record.timestamp, record.summary),
        None => println!("last: no iterations yet"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_no_subcommand_runs_an_iteration() {
        let cli = Cli::parse_from(["warden"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["warden", "init", "--force"]);
        assert!(matches!(cli.command, Some(Command::Init { force: true })));
    }

    #[test]
    fn parse_enqueue_with_root() {
        let cli = Cli::parse_from(["warden", "--root", "/tmp/x", "enqueue", "add a parser"]);
        assert_eq!(cli.root, PathBuf::from("/tmp/x"));
        assert!(matches!(
            cli.command,
            Some(Command::Enqueue { ref description }) if description == "add a parser"
        ));
    }
}
