//! Foreman CLI - work-order workflow and scheduling from the terminal.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use foreman::{
    Actor, Client, Daemon, DaemonConfig, Job, JobDraft, JobPatch, JobStatus, Material, Role, Store,
    StoreLedgerExt, StorePipelineExt, TaskStatus, UpdateOutcome, WithdrawalRequest,
    is_daemon_running,
};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::{Cli, Command};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("foreman")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("foreman.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_store_dir(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn actor(cli: &Cli, role: Role) -> Actor {
    let name = cli
        .actor
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "cli".to_string());
    Actor::new(name.clone(), name, role)
}

fn format_job_status(status: &JobStatus) -> ColoredString {
    match status {
        JobStatus::New => "new".green(),
        JobStatus::InProgress => "in_progress".yellow(),
        JobStatus::Done => "done".blue(),
    }
}

fn format_task_status(status: &TaskStatus) -> ColoredString {
    match status {
        TaskStatus::Pending => "pending".red(),
        TaskStatus::InProgress => "in_progress".yellow(),
        TaskStatus::Completed => "completed".green(),
    }
}

fn parse_date(raw: &str) -> Result<chrono::NaiveDate> {
    raw.parse()
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", raw))
}

fn print_job(job: &Job) {
    println!("{}: {}", "ID".bold(), job.id.cyan());
    println!("{}: {}", "Title".bold(), job.title);
    println!("{}: {}", "Status".bold(), format_job_status(&job.status));
    println!("{}: {}", "Type".bold(), job.job_type);
    println!("{}: {}", "Customer".bold(), job.customer_name);
    if !job.location.is_empty() {
        println!("{}: {}", "Location".bold(), job.location);
    }
    println!("{}: {} .. {}", "Range".bold(), job.start_date, job.end_date);
    if let Some(lead) = &job.lead_id {
        println!("{}: {}", "Lead".bold(), lead.cyan());
    }
    if !job.assigned_techs.is_empty() {
        println!("{}: {}", "Crew".bold(), job.assigned_techs.join(", "));
    }

    if !job.tasks.is_empty() {
        println!("{}:", "Pipeline".bold());
        for (i, task) in job.tasks.iter().enumerate() {
            println!(
                "  {}. {} {} {}",
                i + 1,
                format_task_status(&task.status),
                task.id.cyan(),
                task.title
            );
            for update in &task.updates {
                println!("      {} {}", update.updated_by.dimmed(), update.message.dimmed());
            }
            for record in &task.materials {
                println!(
                    "      {} {} {} {}",
                    "-".dimmed(),
                    record.quantity,
                    record.unit.dimmed(),
                    record.material_name.dimmed()
                );
            }
        }
    }

    if !job.edit_history.is_empty() {
        println!("{}:", "Edits".bold());
        for entry in &job.edit_history {
            println!(
                "  {} [{}] {}",
                entry.admin_name,
                entry.changes.join(", ").dimmed(),
                entry.reason.dimmed()
            );
        }
    }
}

fn parse_withdraw_lines(raw: &[String]) -> Result<Vec<WithdrawalRequest>> {
    raw.iter()
        .map(|line| {
            let (id, qty) = line
                .split_once('=')
                .ok_or_else(|| eyre::eyre!("Expected MATERIAL_ID=QTY, got '{}'", line))?;
            let quantity: i64 = qty
                .parse()
                .with_context(|| format!("Invalid quantity in '{}'", line))?;
            Ok(WithdrawalRequest::new(id, quantity))
        })
        .collect()
}

fn run(cli: Cli) -> Result<()> {
    let store_dir = get_store_dir(&cli);

    match &cli.command {
        Command::Init => {
            Store::init(&store_dir).context("Failed to initialize store")?;
            println!("{} Initialized store in {}", "✓".green(), store_dir.display());
        }

        Command::Create {
            title,
            job_type,
            customer,
            start,
            end,
            location,
        } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            let start = parse_date(start)?;
            let end = match end {
                Some(end) => parse_date(end)?,
                None => start,
            };

            let mut draft = JobDraft::new(title, job_type, customer, start, end);
            if let Some(location) = location {
                draft = draft.location(location);
            }

            let job = store
                .create_job(draft, &actor(&cli, Role::Admin))
                .context("Failed to create job")?
                .value;

            println!("{} Created: {} {}", "✓".green(), job.id.cyan(), job.title);
        }

        Command::List { status } => {
            let store = Store::open(&store_dir).context("Failed to open store")?;
            let status_filter = status.as_deref().and_then(JobStatus::normalize);

            let jobs = store.list_jobs(status_filter).context("Failed to list jobs")?;

            if jobs.is_empty() {
                println!("{}", "No jobs found".dimmed());
            } else {
                for job in jobs {
                    let done = job.tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
                    println!(
                        "{} {} {} {} {}",
                        format_job_status(&job.status),
                        job.id.cyan(),
                        job.title,
                        format!("{} .. {}", job.start_date, job.end_date).dimmed(),
                        format!("[{}/{} tasks]", done, job.tasks.len()).dimmed(),
                    );
                }
            }
        }

        Command::Show { id } => {
            let store = Store::open(&store_dir).context("Failed to open store")?;
            match store.get_job(id).context("Failed to get job")? {
                Some(job) => print_job(&job),
                None => {
                    eprintln!("{} Job not found: {}", "✗".red(), id);
                    std::process::exit(1);
                }
            }
        }

        Command::Ack { id } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            let job = store
                .acknowledge(id, &actor(&cli, Role::Lead))
                .context("Failed to acknowledge job")?
                .value;
            println!("{} Acknowledged: {} {}", "→".blue(), job.id.cyan(), job.title);
        }

        Command::Edit {
            id,
            title,
            location,
            reason,
        } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;

            let mut patch = JobPatch::new();
            if let Some(title) = title {
                patch = patch.title(title);
            }
            if let Some(location) = location {
                patch = patch.location(location);
            }

            match store
                .update_job(id, patch, reason, &actor(&cli, Role::Admin))
                .context("Failed to update job")?
            {
                UpdateOutcome::Updated(m) => {
                    println!("{} Updated: {}", "✓".green(), m.value.id.cyan());
                }
                UpdateOutcome::NoChange(job) => {
                    println!("{} No changes for {}", "∅".dimmed(), job.id.cyan());
                }
            }
        }

        Command::Delete { id, reason } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            store
                .delete_job(id, reason, &actor(&cli, Role::Admin))
                .context("Failed to delete job")?;
            println!("{} Deleted: {}", "✓".green(), id.cyan());
        }

        Command::Task {
            id,
            title,
            description,
        } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            let job = store
                .add_task(id, title, description.as_deref(), &actor(&cli, Role::Lead))
                .context("Failed to add task")?
                .value;
            if let Some(task) = job.tasks.last() {
                println!("{} Added task: {} {}", "✓".green(), task.id.cyan(), task.title);
            }
        }

        Command::Advance { id, task } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            store
                .advance(id, task, &actor(&cli, Role::Lead))
                .context("Failed to advance task")?;
            println!("{} Approved: {}", "✓".green(), task.cyan());
        }

        Command::Reject { id, task, reason } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            store
                .reject(id, task, &actor(&cli, Role::Lead), reason, None)
                .context("Failed to reject task")?;
            println!("{} Rejected: {} ({})", "⊘".red(), task.cyan(), reason);
        }

        Command::Progress {
            id,
            task,
            message,
            image,
        } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            store
                .submit_progress(
                    id,
                    task,
                    &actor(&cli, Role::Technician),
                    message,
                    image.as_deref(),
                )
                .context("Failed to submit progress")?;
            println!("{} Progress noted on {}", "→".blue(), task.cyan());
        }

        Command::Withdraw { id, task, lines } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            let requests = parse_withdraw_lines(lines)?;

            let records = store
                .withdraw(id, task, &requests, &actor(&cli, Role::Technician))
                .context("Withdrawal refused")?
                .value;

            for record in records {
                println!(
                    "{} {} {} {}",
                    "✓".green(),
                    record.quantity,
                    record.unit,
                    record.material_name
                );
            }
        }

        Command::Assign { id, lead } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            store
                .assign_lead(id, lead, &actor(&cli, Role::Admin))
                .context("Failed to assign lead")?;
            println!("{} {} now leads {}", "✓".green(), lead.cyan(), id.cyan());
        }

        Command::Crew { id, techs } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            let job = store
                .assign_techs(id, techs, &actor(&cli, Role::Admin))
                .context("Failed to assign crew")?
                .value;
            println!(
                "{} Crew on {}: {}",
                "✓".green(),
                id.cyan(),
                job.assigned_techs.join(", ")
            );
        }

        Command::Materials => {
            let store = Store::open(&store_dir).context("Failed to open store")?;
            let materials = store.list_materials().context("Failed to list materials")?;

            if materials.is_empty() {
                println!("{}", "No materials in catalog".dimmed());
            } else {
                for material in materials {
                    println!(
                        "{} {} {} {}",
                        material.id.cyan(),
                        material.name,
                        format!("{} {}", material.stock, material.unit).bold(),
                        material.category.dimmed(),
                    );
                }
            }
        }

        Command::Stock {
            id,
            name,
            stock,
            unit,
            category,
        } => {
            let mut store = Store::open(&store_dir).context("Failed to open store")?;
            let material = store
                .add_material(Material {
                    id: id.clone(),
                    name: name.clone(),
                    category: category.clone(),
                    unit: unit.clone(),
                    stock: *stock,
                })
                .context("Failed to add material")?;
            println!(
                "{} {} stocked at {} {}",
                "✓".green(),
                material.id.cyan(),
                material.stock,
                material.unit
            );
        }

        Command::Daemon => {
            println!("{} Starting daemon for {}", "→".blue(), store_dir.display());

            let config = DaemonConfig::new(&store_dir);
            let mut daemon = Daemon::new(config).context("Failed to create daemon")?;

            // Run daemon in async runtime
            let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
            rt.block_on(async { daemon.run().await }).context("Daemon error")?;
        }

        Command::DaemonStop => {
            if !is_daemon_running(&store_dir) {
                println!("{} Daemon is not running", "✗".red());
                std::process::exit(1);
            }

            let mut client = Client::connect(&store_dir, false).context("Failed to connect to daemon")?;
            client.shutdown().context("Failed to shutdown daemon")?;
            println!("{} Daemon stopped", "✓".green());
        }

        Command::DaemonStatus => {
            if is_daemon_running(&store_dir) {
                println!("{} Daemon is running", "✓".green());

                // Try to ping
                if let Ok(mut client) = Client::connect(&store_dir, false)
                    && client.ping().is_ok()
                {
                    println!("  {} Responding to requests", "✓".green());
                }
            } else {
                println!("{} Daemon is not running", "✗".red());
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
