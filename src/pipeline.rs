//! Task pipeline operations: ordered approval, rejection, and progress.
//!
//! Tasks advance strictly left-to-right through the pipeline. A task can
//! only complete when every task before it is completed; completing it
//! promotes an immediately following pending task to in-progress.
//! Rejection sends a task back to pending, and the ordering rule then
//! forces it through approval again before anything after it can move.

use crate::events::{DomainEvent, EventKind, Mutation};
use crate::store::{Store, StoreError};
use crate::types::{ActivityEntry, ActivityKind, Actor, Job, TaskStatus, TaskUpdate, ValidationError};
use chrono::Utc;
use eyre::{Context, Result};

/// Pipeline transitions on a job's tasks.
pub trait StorePipelineExt {
    /// Approve a task. Fails with `StepOutOfOrder` (and no mutation) if
    /// any preceding task is not completed.
    fn advance(&mut self, job_id: &str, task_id: &str, actor: &Actor) -> Result<Mutation<Job>>;

    /// Reject a task back to pending with a mandatory reason. The
    /// rejection is recorded as a task update.
    fn reject(
        &mut self,
        job_id: &str,
        task_id: &str,
        actor: &Actor,
        reason: &str,
        image_url: Option<&str>,
    ) -> Result<Mutation<Job>>;

    /// Append a progress update to the active step. A pending task with
    /// every predecessor completed is promoted to in-progress by its
    /// first update; completed or out-of-order tasks are rejected.
    fn submit_progress(
        &mut self,
        job_id: &str,
        task_id: &str,
        actor: &Actor,
        message: &str,
        image_url: Option<&str>,
    ) -> Result<Mutation<Job>>;
}

impl StorePipelineExt for Store {
    fn advance(&mut self, job_id: &str, task_id: &str, actor: &Actor) -> Result<Mutation<Job>> {
        let mut job = self.load_job(job_id)?;
        self.require_acknowledged(&job)?;

        let pos = task_position(&job, task_id)?;

        // A second approval of the same task is a conflict, not a no-op;
        // serialized "concurrent" advances must not both succeed
        if job.tasks[pos].status == TaskStatus::Completed {
            return Err(eyre::eyre!(StoreError::TaskAlreadyCompleted {
                task_id: task_id.to_string(),
            }));
        }

        ensure_predecessors_completed(&job, pos, task_id)?;

        let now = Utc::now();
        let task_title = job.tasks[pos].title.clone();
        job.tasks[pos].status = TaskStatus::Completed;

        // Unlock the next step
        if let Some(next) = job.tasks.get_mut(pos + 1)
            && next.status == TaskStatus::Pending
        {
            next.status = TaskStatus::InProgress;
        }

        job.activity_log.push(ActivityEntry {
            kind: ActivityKind::TaskAdvanced,
            actor: actor.name.clone(),
            message: format!("{} approved \"{}\"", actor.name, task_title),
            at: now,
        });

        self.storage_mut()
            .append_job(&job)
            .context("Failed to persist task approval")?;

        let events = DomainEvent::fan_out_to_techs(
            EventKind::TaskCompleted,
            &job.assigned_techs,
            &job.id,
            serde_json::json!({ "task_id": task_id, "title": task_title }),
        );

        Ok(Mutation::new(job, events))
    }

    fn reject(
        &mut self,
        job_id: &str,
        task_id: &str,
        actor: &Actor,
        reason: &str,
        image_url: Option<&str>,
    ) -> Result<Mutation<Job>> {
        if reason.trim().is_empty() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::EmptyReason)));
        }

        let mut job = self.load_job(job_id)?;
        self.require_acknowledged(&job)?;

        let pos = task_position(&job, task_id)?;
        let from = job.tasks[pos].status;

        // Only started or approved work can be sent back
        if !matches!(from, TaskStatus::InProgress | TaskStatus::Completed) {
            return Err(eyre::eyre!(StoreError::InvalidTaskTransition {
                task_id: task_id.to_string(),
                from,
                to: TaskStatus::Pending,
            }));
        }

        let now = Utc::now();
        let task_title = job.tasks[pos].title.clone();
        job.tasks[pos].status = TaskStatus::Pending;
        job.tasks[pos].updates.push(TaskUpdate {
            message: format!("Rejected: {}", reason),
            image_url: image_url.map(String::from),
            updated_by: actor.name.clone(),
            updated_at: now,
        });

        job.activity_log.push(ActivityEntry {
            kind: ActivityKind::TaskRejected,
            actor: actor.name.clone(),
            message: format!("{} rejected \"{}\": {}", actor.name, task_title, reason),
            at: now,
        });

        self.storage_mut()
            .append_job(&job)
            .context("Failed to persist task rejection")?;

        let events = DomainEvent::fan_out_to_techs(
            EventKind::TaskRejected,
            &job.assigned_techs,
            &job.id,
            serde_json::json!({ "task_id": task_id, "reason": reason }),
        );

        Ok(Mutation::new(job, events))
    }

    fn submit_progress(
        &mut self,
        job_id: &str,
        task_id: &str,
        actor: &Actor,
        message: &str,
        image_url: Option<&str>,
    ) -> Result<Mutation<Job>> {
        if message.trim().is_empty() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::EmptyMessage)));
        }

        let mut job = self.load_job(job_id)?;
        self.require_acknowledged(&job)?;

        let pos = task_position(&job, task_id)?;

        match job.tasks[pos].status {
            TaskStatus::Completed => {
                return Err(eyre::eyre!(StoreError::TaskAlreadyCompleted {
                    task_id: task_id.to_string(),
                }));
            }
            TaskStatus::Pending => {
                // Only the active head may start collecting updates; the
                // first update promotes it rather than bypassing approval
                ensure_predecessors_completed(&job, pos, task_id)?;
                job.tasks[pos].status = TaskStatus::InProgress;
            }
            TaskStatus::InProgress => {}
        }

        let now = Utc::now();
        job.tasks[pos].updates.push(TaskUpdate {
            message: message.to_string(),
            image_url: image_url.map(String::from),
            updated_by: actor.name.clone(),
            updated_at: now,
        });

        job.activity_log.push(ActivityEntry {
            kind: ActivityKind::ProgressSubmitted,
            actor: actor.name.clone(),
            message: format!("{} posted progress on \"{}\"", actor.name, job.tasks[pos].title),
            at: now,
        });

        self.storage_mut()
            .append_job(&job)
            .context("Failed to persist progress update")?;

        let mut events = Vec::new();
        if let Some(lead_id) = &job.lead_id {
            events.push(DomainEvent::addressed(
                EventKind::ProgressSubmitted,
                crate::types::Role::Lead,
                lead_id,
                &job.id,
                serde_json::json!({ "task_id": task_id, "by": actor.name }),
            ));
        }

        Ok(Mutation::new(job, events))
    }
}

/// Position of a task or TaskNotFound.
fn task_position(job: &Job, task_id: &str) -> Result<usize> {
    job.task_position(task_id).ok_or_else(|| {
        eyre::eyre!(StoreError::TaskNotFound {
            job_id: job.id.clone(),
            task_id: task_id.to_string(),
        })
    })
}

/// Every task before `pos` must be completed.
fn ensure_predecessors_completed(job: &Job, pos: usize, task_id: &str) -> Result<()> {
    if job.tasks[..pos]
        .iter()
        .any(|t| t.status != TaskStatus::Completed)
    {
        return Err(eyre::eyre!(StoreError::StepOutOfOrder {
            task_id: task_id.to_string(),
        }));
    }
    Ok(())
}
