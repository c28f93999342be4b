//! IPC protocol types for daemon communication.

use crate::builder::{JobDraft, JobPatch};
use crate::ledger::WithdrawalRequest as LedgerLine;
use crate::types::{Actor, Job, JobStatus, Material, MaterialWithdrawal, Worker};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One withdrawal line on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalLine {
    pub material_id: String,
    pub quantity: i64,
}

impl From<WithdrawalLine> for LedgerLine {
    fn from(line: WithdrawalLine) -> Self {
        LedgerLine::new(line.material_id, line.quantity)
    }
}

/// Request sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Create a new job.
    CreateJob { draft: JobDraft, actor: Actor },

    /// Patch a job's administrative fields.
    UpdateJob {
        job_id: String,
        patch: JobPatch,
        reason: String,
        actor: Actor,
    },

    /// Delete a job.
    DeleteJob {
        job_id: String,
        reason: String,
        actor: Actor,
    },

    /// Leader acknowledgement.
    Acknowledge { job_id: String, actor: Actor },

    /// Direct job status set (caller-side completion policy).
    SetJobStatus {
        job_id: String,
        status: JobStatus,
        actor: Actor,
    },

    /// Append a task to the pipeline.
    AddTask {
        job_id: String,
        title: String,
        description: Option<String>,
        actor: Actor,
    },

    /// Bind a leader (availability re-validated in the store).
    AssignLead {
        job_id: String,
        lead_id: String,
        actor: Actor,
    },

    /// Bind the technician set.
    AssignTechs {
        job_id: String,
        tech_ids: Vec<String>,
        actor: Actor,
    },

    /// Approve a task.
    Advance {
        job_id: String,
        task_id: String,
        actor: Actor,
    },

    /// Reject a task back to pending.
    Reject {
        job_id: String,
        task_id: String,
        reason: String,
        image_url: Option<String>,
        actor: Actor,
    },

    /// Append a progress update to the active step.
    SubmitProgress {
        job_id: String,
        task_id: String,
        message: String,
        image_url: Option<String>,
        actor: Actor,
    },

    /// All-or-nothing material withdrawal for a task.
    Withdraw {
        job_id: String,
        task_id: String,
        lines: Vec<WithdrawalLine>,
        actor: Actor,
    },

    /// Get a job by ID.
    GetJob { job_id: String },

    /// List jobs with optional status filter.
    ListJobs { status: Option<JobStatus> },

    /// Resolve available candidates for a date range.
    Available {
        candidates: Vec<Worker>,
        start: NaiveDate,
        end: NaiveDate,
        exclude_job: Option<String>,
    },

    /// Add or replace a catalog material.
    AddMaterial { material: Material },

    /// List the material catalog.
    ListMaterials,

    /// Force flush pending writes to disk.
    Flush,

    /// Shutdown the daemon.
    Shutdown,

    /// Ping to check if daemon is alive.
    Ping,
}

/// Response sent from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Single job response.
    Job { job: Job },

    /// Multiple jobs response.
    Jobs { jobs: Vec<Job> },

    /// Update applied nothing: the patch matched stored values.
    NoChange { job: Job },

    /// Withdrawal records created for a batch.
    Records { records: Vec<MaterialWithdrawal> },

    /// Available candidates, ordered by workload.
    Workers { workers: Vec<Worker> },

    /// Single material response.
    Material { material: Material },

    /// Material catalog.
    Materials { materials: Vec<Material> },

    /// Job not found.
    NotFound { id: String },

    /// Operation succeeded.
    Ok,

    /// Pong response to ping.
    Pong,

    /// Error response.
    Error { message: String },
}

impl Response {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_request_serialization() {
        let req = Request::Advance {
            job_id: "wo-abc".to_string(),
            task_id: "tk-def".to_string(),
            actor: Actor::new("lead-1", "Kim", Role::Lead),
        };

        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        if let Request::Advance { job_id, task_id, .. } = parsed {
            assert_eq!(job_id, "wo-abc");
            assert_eq!(task_id, "tk-def");
        } else {
            panic!("Wrong request type");
        }
    }

    #[test]
    fn test_withdraw_request_serialization() {
        let req = Request::Withdraw {
            job_id: "wo-abc".to_string(),
            task_id: "tk-def".to_string(),
            lines: vec![WithdrawalLine {
                material_id: "mat-cable".to_string(),
                quantity: 12,
            }],
            actor: Actor::new("tech-1", "Ola", Role::Technician),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("Withdraw"));
        let parsed: Request = serde_json::from_str(&json).unwrap();
        if let Request::Withdraw { lines, .. } = parsed {
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0].quantity, 12);
        } else {
            panic!("Wrong request type");
        }
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::error("stock exhausted");
        let json = serde_json::to_string(&resp).unwrap();

        assert!(json.contains("Error"));
        assert!(json.contains("stock exhausted"));
    }
}
