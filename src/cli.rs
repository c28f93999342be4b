//! CLI argument parsing for the `fm` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fm",
    about = "Work-order workflow and scheduling engine",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/foreman/logs/foreman.log"
)]
pub struct Cli {
    /// Path to the store directory (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Actor name recorded on mutations (default: $USER)
    #[arg(short = 'a', long, global = true)]
    pub actor: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new store in the current directory
    Init,

    /// Create a new job
    Create {
        /// Job title
        title: String,

        /// Kind of work (installation, maintenance, repair, ...)
        #[arg(short = 't', long, default_value = "maintenance")]
        job_type: String,

        /// Customer name
        #[arg(short, long)]
        customer: String,

        /// First day of the job (YYYY-MM-DD)
        #[arg(short, long)]
        start: String,

        /// Last day of the job (YYYY-MM-DD), defaults to the start day
        #[arg(short, long)]
        end: Option<String>,

        /// Site address
        #[arg(short, long)]
        location: Option<String>,
    },

    /// List jobs
    List {
        /// Filter by status (new, in_progress, done)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show a job with its pipeline and history
    Show {
        /// Job ID
        id: String,
    },

    /// Acknowledge a job as its leader (new -> in_progress)
    Ack {
        /// Job ID
        id: String,
    },

    /// Edit a job field, recording the reason in the edit history
    Edit {
        /// Job ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New site address
        #[arg(long)]
        location: Option<String>,

        /// Reason for the edit
        #[arg(short, long)]
        reason: String,
    },

    /// Delete a job
    Delete {
        /// Job ID
        id: String,

        /// Reason for the deletion
        #[arg(short, long)]
        reason: String,
    },

    /// Append a task to a job's pipeline
    Task {
        /// Job ID
        id: String,

        /// Task title
        title: String,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,
    },

    /// Approve a task (leader action)
    Advance {
        /// Job ID
        id: String,

        /// Task ID
        task: String,
    },

    /// Reject a task back to pending (leader action)
    Reject {
        /// Job ID
        id: String,

        /// Task ID
        task: String,

        /// Reason for the rejection
        #[arg(short, long)]
        reason: String,
    },

    /// Post a progress update on the active task (technician action)
    Progress {
        /// Job ID
        id: String,

        /// Task ID
        task: String,

        /// Progress message
        message: String,

        /// Attached image URL
        #[arg(short, long)]
        image: Option<String>,
    },

    /// Withdraw materials for a task: MATERIAL_ID=QTY pairs
    Withdraw {
        /// Job ID
        id: String,

        /// Task ID
        task: String,

        /// Lines like mat-cable=12 (repeatable)
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Bind a leader to a job (availability re-checked)
    Assign {
        /// Job ID
        id: String,

        /// Leader ID
        lead: String,
    },

    /// Bind the technician crew of a job (comma-separated ids)
    Crew {
        /// Job ID
        id: String,

        /// Technician ids
        #[arg(value_delimiter = ',')]
        techs: Vec<String>,
    },

    /// List the material catalog
    Materials,

    /// Add or replace a catalog material
    Stock {
        /// Material ID
        id: String,

        /// Display name
        name: String,

        /// On-hand stock
        #[arg(short, long)]
        stock: i64,

        /// Unit of measure
        #[arg(short, long, default_value = "pcs")]
        unit: String,

        /// Category
        #[arg(short, long, default_value = "general")]
        category: String,
    },

    /// Run the daemon in foreground
    Daemon,

    /// Stop the running daemon
    DaemonStop,

    /// Check daemon status
    DaemonStatus,
}
