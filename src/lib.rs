//! Foreman: a work-order workflow and scheduling engine.
//!
//! Foreman is the core of a technician work-order application: ordered
//! task pipelines with leader approval, crew availability over date
//! ranges, an all-or-nothing shared material ledger, and an append-only
//! audit trail, persisted as JSONL snapshots with a SQLite query cache.
//!
//! # Example
//!
//! ```no_run
//! use foreman::{Actor, JobDraft, Role, Store, StorePipelineExt};
//! use chrono::NaiveDate;
//! use std::path::Path;
//!
//! // Initialize a new store
//! let mut store = Store::init(Path::new(".")).unwrap();
//!
//! let admin = Actor::new("admin-1", "Dana", Role::Admin);
//! let lead = Actor::new("lead-1", "Kim", Role::Lead);
//!
//! // Create a job and hand it to its leader
//! let draft = JobDraft::new(
//!     "Replace switchgear",
//!     "maintenance",
//!     "Acme",
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
//! );
//! let job = store.create_job(draft, &admin).unwrap().value;
//! store.acknowledge(&job.id, &lead).unwrap();
//!
//! // Build the pipeline and approve the first step
//! let job = store.add_task(&job.id, "Survey site", None, &lead).unwrap().value;
//! store.advance(&job.id, &job.tasks[0].id, &lead).unwrap();
//! ```

mod audit;
mod availability;
mod builder;
mod events;
mod id;
mod ledger;
mod pipeline;
mod storage;
mod store;
mod types;

pub mod client;
pub mod daemon;
pub mod protocol;

// Re-export public API
pub use audit::{ActivityCounts, ActivityQuery, StoreAuditExt, TimelineEntry};
pub use availability::{StoreAvailabilityExt, busy_worker_ids, ranges_overlap, resolve_available};
pub use builder::{JobDraft, JobPatch};
pub use client::Client;
pub use daemon::{Daemon, DaemonConfig, is_daemon_running, start_daemon};
pub use events::{
    DomainEvent, EventKind, LogNotifier, Mutation, NotificationPort, NotifyError, dispatch,
};
pub use ledger::{LedgerError, LineError, StoreLedgerExt, WithdrawalRequest, validate_batch};
pub use pipeline::StorePipelineExt;
pub use protocol::{Request, Response};
pub use storage::ActivityRecord;
pub use store::{Store, StoreError, UpdateOutcome};
pub use types::{
    ActivityEntry, ActivityKind, Actor, EditEntry, Job, JobStatus, Material, MaterialWithdrawal,
    Role, Task, TaskStatus, TaskUpdate, ValidationError, Worker,
};
