//! High-level store API for the Foreman engine.

use crate::builder::{JobDraft, JobPatch};
use crate::events::{DomainEvent, EventKind, Mutation};
use crate::id::{generate_job_id, generate_task_id};
use crate::storage::Storage;
use crate::types::{
    ActivityEntry, ActivityKind, Actor, EditEntry, Job, JobStatus, Material, Role, Task,
    TaskStatus, ValidationError,
};
use chrono::Utc;
use eyre::{Context, Result};
use std::path::Path;

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Job not found.
    JobNotFound(String),
    /// Task not found within the job.
    TaskNotFound { job_id: String, task_id: String },
    /// Task activity attempted before the leader acknowledged the job.
    JobNotAcknowledged(String),
    /// Invalid job status transition.
    InvalidStatusTransition { from: JobStatus, to: JobStatus },
    /// Invalid task status transition.
    InvalidTaskTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// A preceding task in the pipeline is not completed.
    StepOutOfOrder { task_id: String },
    /// Progress submitted on an already-approved task.
    TaskAlreadyCompleted { task_id: String },
    /// Candidate has an overlapping job at bind time.
    CandidateBusy { worker_id: String },
    /// Validation error.
    Validation(ValidationError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::JobNotFound(id) => write!(f, "job not found: {}", id),
            StoreError::TaskNotFound { job_id, task_id } => {
                write!(f, "task not found: {} in job {}", task_id, job_id)
            }
            StoreError::JobNotAcknowledged(id) => {
                write!(f, "job {} has not been acknowledged", id)
            }
            StoreError::InvalidStatusTransition { from, to } => {
                write!(f, "invalid job transition from {} to {}", from.as_str(), to.as_str())
            }
            StoreError::InvalidTaskTransition { task_id, from, to } => {
                write!(
                    f,
                    "invalid transition for task {} from {} to {}",
                    task_id,
                    from.as_str(),
                    to.as_str()
                )
            }
            StoreError::StepOutOfOrder { task_id } => {
                write!(f, "task {} cannot proceed: a preceding task is not completed", task_id)
            }
            StoreError::TaskAlreadyCompleted { task_id } => {
                write!(f, "task {} is already completed", task_id)
            }
            StoreError::CandidateBusy { worker_id } => {
                write!(f, "worker {} has an overlapping job in that range", worker_id)
            }
            StoreError::Validation(e) => write!(f, "validation error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Outcome of an update: either a real mutation or an explicit
/// "nothing to do". The latter is not an error and appends no history.
#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(Mutation<Job>),
    NoChange(Job),
}

impl UpdateOutcome {
    pub fn is_no_change(&self) -> bool {
        matches!(self, UpdateOutcome::NoChange(_))
    }

    pub fn job(&self) -> &Job {
        match self {
            UpdateOutcome::Updated(m) => &m.value,
            UpdateOutcome::NoChange(job) => job,
        }
    }
}

/// The main Foreman store.
///
/// All mutations take `&mut self`, so one `Store` value serializes its
/// callers; cross-process callers go through the daemon, which owns the
/// only open store.
pub struct Store {
    storage: Storage,
}

impl Store {
    /// Initialize a new store in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let storage = Storage::init(root)?;
        Ok(Self { storage })
    }

    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        let storage = Storage::open(root)?;
        Ok(Self { storage })
    }

    /// Direct storage access for the query extension traits.
    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Create a new job in status `new` with empty pipeline and history.
    pub fn create_job(&mut self, draft: JobDraft, actor: &Actor) -> Result<Mutation<Job>> {
        let now = Utc::now();
        let id = generate_job_id(&draft.title, now);

        let job = Job {
            id,
            title: draft.title,
            job_type: draft.job_type,
            customer_name: draft.customer_name,
            customer_phone: draft.customer_phone,
            location: draft.location,
            latitude: draft.latitude,
            longitude: draft.longitude,
            start_date: draft.start_date,
            end_date: draft.end_date,
            lead_id: None,
            assigned_techs: vec![],
            tasks: vec![],
            status: JobStatus::New,
            edit_history: vec![],
            activity_log: vec![],
            created_at: now,
            created_by: actor.name.clone(),
            deleted: false,
        };

        // Validate before persisting
        job.validate()
            .map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;

        self.storage.append_job(&job).context("Failed to persist job")?;

        let events = vec![DomainEvent {
            kind: EventKind::JobCreated,
            recipient_role: Role::Admin,
            recipient_id: None,
            job_id: Some(job.id.clone()),
            payload: serde_json::json!({ "title": job.title }),
        }];

        Ok(Mutation::new(job, events))
    }

    /// Get a job by ID.
    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.storage.get_job(id)
    }

    /// List jobs with optional status filter.
    pub fn list_jobs(&self, status_filter: Option<JobStatus>) -> Result<Vec<Job>> {
        self.storage.list_jobs(status_filter)
    }

    /// Apply a field patch to a job.
    ///
    /// Diffs the patch against stored values; only fields that actually
    /// differ count. An all-equal patch returns
    /// [`UpdateOutcome::NoChange`] and appends nothing. A real change
    /// requires a non-empty `reason` and appends exactly one
    /// [`EditEntry`] naming the changed fields.
    pub fn update_job(
        &mut self,
        job_id: &str,
        patch: JobPatch,
        reason: &str,
        actor: &Actor,
    ) -> Result<UpdateOutcome> {
        let mut job = self.load_job(job_id)?;

        if patch.is_empty() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::EmptyPatch)));
        }

        let mut changes: Vec<String> = Vec::new();

        if let Some(title) = patch.title
            && title != job.title
        {
            job.title = title;
            changes.push("title".to_string());
        }
        if let Some(job_type) = patch.job_type
            && job_type != job.job_type
        {
            job.job_type = job_type;
            changes.push("job_type".to_string());
        }
        if let Some(customer_name) = patch.customer_name
            && customer_name != job.customer_name
        {
            job.customer_name = customer_name;
            changes.push("customer_name".to_string());
        }
        if let Some(customer_phone) = patch.customer_phone
            && customer_phone != job.customer_phone
        {
            job.customer_phone = customer_phone;
            changes.push("customer_phone".to_string());
        }
        if let Some(location) = patch.location
            && location != job.location
        {
            job.location = location;
            changes.push("location".to_string());
        }
        if let Some(latitude) = patch.latitude
            && latitude != job.latitude
        {
            job.latitude = latitude;
            changes.push("latitude".to_string());
        }
        if let Some(longitude) = patch.longitude
            && longitude != job.longitude
        {
            job.longitude = longitude;
            changes.push("longitude".to_string());
        }
        if let Some(start_date) = patch.start_date
            && start_date != job.start_date
        {
            job.start_date = start_date;
            changes.push("start_date".to_string());
        }
        if let Some(end_date) = patch.end_date
            && end_date != job.end_date
        {
            job.end_date = end_date;
            changes.push("end_date".to_string());
        }

        if changes.is_empty() {
            return Ok(UpdateOutcome::NoChange(job));
        }

        if reason.trim().is_empty() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::EmptyReason)));
        }

        // Validate the patched job before persisting (date range etc.)
        job.validate()
            .map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;

        job.edit_history.push(EditEntry {
            admin_name: actor.name.clone(),
            edited_at: Utc::now(),
            reason: reason.to_string(),
            changes: changes.clone(),
        });

        self.storage
            .append_job(&job)
            .context("Failed to persist updated job")?;

        let payload = serde_json::json!({ "changes": changes });
        let mut events =
            DomainEvent::fan_out_to_techs(EventKind::JobUpdated, &job.assigned_techs, &job.id, payload.clone());
        if let Some(lead_id) = &job.lead_id {
            events.push(DomainEvent::addressed(
                EventKind::JobUpdated,
                Role::Lead,
                lead_id,
                &job.id,
                payload,
            ));
        }

        Ok(UpdateOutcome::Updated(Mutation::new(job, events)))
    }

    /// Delete a job. Requires a non-empty reason; the append-only log
    /// keeps the tombstoned snapshot.
    pub fn delete_job(&mut self, job_id: &str, reason: &str, actor: &Actor) -> Result<Mutation<Job>> {
        if reason.trim().is_empty() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::EmptyReason)));
        }

        let mut job = self.load_job(job_id)?;
        job.deleted = true;

        self.storage
            .append_job(&job)
            .context("Failed to persist job deletion")?;

        let payload = serde_json::json!({ "reason": reason, "deleted_by": actor.name });
        let mut events =
            DomainEvent::fan_out_to_techs(EventKind::JobDeleted, &job.assigned_techs, &job.id, payload.clone());
        if let Some(lead_id) = &job.lead_id {
            events.push(DomainEvent::addressed(
                EventKind::JobDeleted,
                Role::Lead,
                lead_id,
                &job.id,
                payload,
            ));
        }

        Ok(Mutation::new(job, events))
    }

    /// Leader acknowledgement: `new` -> `in_progress`. Unlocks task
    /// pipeline activity.
    pub fn acknowledge(&mut self, job_id: &str, actor: &Actor) -> Result<Mutation<Job>> {
        let mut job = self.load_job(job_id)?;

        if job.status != JobStatus::New {
            return Err(eyre::eyre!(StoreError::InvalidStatusTransition {
                from: job.status,
                to: JobStatus::InProgress,
            }));
        }

        job.status = JobStatus::InProgress;
        job.activity_log.push(ActivityEntry {
            kind: ActivityKind::Acknowledged,
            actor: actor.name.clone(),
            message: format!("{} acknowledged the job", actor.name),
            at: Utc::now(),
        });

        self.storage
            .append_job(&job)
            .context("Failed to persist acknowledgement")?;

        let events = DomainEvent::fan_out_to_techs(
            EventKind::JobAcknowledged,
            &job.assigned_techs,
            &job.id,
            serde_json::json!({ "acknowledged_by": actor.name }),
        );

        Ok(Mutation::new(job, events))
    }

    /// Set a job's status directly, checked against the transition table.
    /// Job-level `done` is caller policy; this is the hook for it.
    pub fn set_job_status(
        &mut self,
        job_id: &str,
        status: JobStatus,
        _actor: &Actor,
    ) -> Result<Mutation<Job>> {
        let mut job = self.load_job(job_id)?;

        if !job.status.can_transition_to(&status) {
            return Err(eyre::eyre!(StoreError::InvalidStatusTransition {
                from: job.status,
                to: status,
            }));
        }

        job.status = status;

        self.storage
            .append_job(&job)
            .context("Failed to persist status change")?;

        let events = DomainEvent::fan_out_to_techs(
            EventKind::JobUpdated,
            &job.assigned_techs,
            &job.id,
            serde_json::json!({ "status": status.as_str() }),
        );

        Ok(Mutation::new(job, events))
    }

    /// Append a task to the job's pipeline. Legal only after
    /// acknowledgement. The task starts `in_progress` when it is the
    /// active head (every existing task already completed), otherwise
    /// `pending`.
    pub fn add_task(
        &mut self,
        job_id: &str,
        title: &str,
        description: Option<&str>,
        actor: &Actor,
    ) -> Result<Mutation<Job>> {
        let mut job = self.load_job(job_id)?;
        self.require_acknowledged(&job)?;

        if title.trim().is_empty() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::EmptyTaskTitle)));
        }

        let now = Utc::now();
        let status = if job.tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            TaskStatus::InProgress
        } else {
            TaskStatus::Pending
        };

        let task = Task {
            id: generate_task_id(title, now),
            title: title.to_string(),
            description: description.map(String::from),
            status,
            updates: vec![],
            materials: vec![],
        };
        let task_id = task.id.clone();
        job.tasks.push(task);

        job.activity_log.push(ActivityEntry {
            kind: ActivityKind::TaskAdded,
            actor: actor.name.clone(),
            message: format!("{} added task \"{}\"", actor.name, title),
            at: now,
        });

        self.storage
            .append_job(&job)
            .context("Failed to persist new task")?;

        let events = DomainEvent::fan_out_to_techs(
            EventKind::TaskAdded,
            &job.assigned_techs,
            &job.id,
            serde_json::json!({ "task_id": task_id, "title": title }),
        );

        Ok(Mutation::new(job, events))
    }

    /// Bind a leader to the job, re-validating availability against the
    /// current job snapshot at bind time.
    pub fn assign_lead(&mut self, job_id: &str, lead_id: &str, actor: &Actor) -> Result<Mutation<Job>> {
        let mut job = self.load_job(job_id)?;

        if self.worker_busy(lead_id, &job)? {
            return Err(eyre::eyre!(StoreError::CandidateBusy {
                worker_id: lead_id.to_string(),
            }));
        }

        job.lead_id = Some(lead_id.to_string());
        job.activity_log.push(ActivityEntry {
            kind: ActivityKind::LeadAssigned,
            actor: actor.name.clone(),
            message: format!("{} assigned lead {}", actor.name, lead_id),
            at: Utc::now(),
        });

        self.storage
            .append_job(&job)
            .context("Failed to persist lead assignment")?;

        let events = vec![DomainEvent::addressed(
            EventKind::LeadAssigned,
            Role::Lead,
            lead_id,
            &job.id,
            serde_json::json!({ "title": job.title }),
        )];

        Ok(Mutation::new(job, events))
    }

    /// Bind the technician set, re-validating each candidate's
    /// availability. Duplicates are dropped, insertion order kept.
    pub fn assign_techs(
        &mut self,
        job_id: &str,
        tech_ids: &[String],
        actor: &Actor,
    ) -> Result<Mutation<Job>> {
        let mut job = self.load_job(job_id)?;

        let mut deduped: Vec<String> = Vec::new();
        for tech_id in tech_ids {
            if deduped.contains(tech_id) {
                continue;
            }
            // Already on this job is fine; busy elsewhere is not
            if !job.assigned_techs.contains(tech_id) && self.worker_busy(tech_id, &job)? {
                return Err(eyre::eyre!(StoreError::CandidateBusy {
                    worker_id: tech_id.clone(),
                }));
            }
            deduped.push(tech_id.clone());
        }

        job.assigned_techs = deduped;
        job.activity_log.push(ActivityEntry {
            kind: ActivityKind::TechsAssigned,
            actor: actor.name.clone(),
            message: format!(
                "{} assigned technicians [{}]",
                actor.name,
                job.assigned_techs.join(", ")
            ),
            at: Utc::now(),
        });

        self.storage
            .append_job(&job)
            .context("Failed to persist technician assignment")?;

        let events = DomainEvent::fan_out_to_techs(
            EventKind::TechsAssigned,
            &job.assigned_techs,
            &job.id,
            serde_json::json!({ "title": job.title }),
        );

        Ok(Mutation::new(job, events))
    }

    /// Add a material to the shared catalog (or replace its definition).
    pub fn add_material(&mut self, material: Material) -> Result<Material> {
        if material.stock < 0 {
            eyre::bail!("material stock cannot be negative");
        }

        self.storage
            .append_material(&material)
            .context("Failed to persist material")?;

        Ok(material)
    }

    /// Get a material by ID.
    pub fn get_material(&self, id: &str) -> Result<Option<Material>> {
        self.storage.get_material(id)
    }

    /// List the material catalog.
    pub fn list_materials(&self) -> Result<Vec<Material>> {
        self.storage.list_materials()
    }

    /// Load a job or fail with JobNotFound.
    pub(crate) fn load_job(&self, job_id: &str) -> Result<Job> {
        self.storage
            .get_job(job_id)?
            .ok_or_else(|| eyre::eyre!(StoreError::JobNotFound(job_id.to_string())))
    }

    /// Task activity is only legal once the leader acknowledged the job.
    pub(crate) fn require_acknowledged(&self, job: &Job) -> Result<()> {
        if job.status == JobStatus::New {
            return Err(eyre::eyre!(StoreError::JobNotAcknowledged(job.id.clone())));
        }
        Ok(())
    }

    /// True if the worker is lead or tech on any other job overlapping
    /// this job's range. Terminal jobs still block (see DESIGN.md).
    fn worker_busy(&self, worker_id: &str, job: &Job) -> Result<bool> {
        let overlapping =
            self.storage
                .jobs_overlapping(job.start_date, job.end_date, Some(&job.id))?;

        Ok(overlapping.iter().any(|other| {
            other.lead_id.as_deref() == Some(worker_id)
                || other.assigned_techs.iter().any(|t| t == worker_id)
        }))
    }
}
