//! Core data types for the Foreman work-order engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A unit of field work: a date range, a crew, and an ordered task pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique identifier: "wo-" + time prefix + entropy suffix
    pub id: String,

    /// Short description of the work
    pub title: String,

    /// Kind of work (installation, maintenance, repair, ...)
    pub job_type: String,

    /// Customer contact
    pub customer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,

    /// Free-text site address
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    /// Scheduled range, inclusive on both ends
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    /// Assigned leader, if bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,

    /// Assigned technician ids, deduplicated, insertion order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigned_techs: Vec<String>,

    /// Ordered task pipeline; list position is pipeline order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,

    /// Current state
    pub status: JobStatus,

    /// Append-only record of administrative field edits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<EditEntry>,

    /// Append-only record of workflow events
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity_log: Vec<ActivityEntry>,

    /// When created
    pub created_at: DateTime<Utc>,

    /// Admin who created the job
    pub created_by: String,

    /// Tombstone marker for deletion
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Job status states.
///
/// Serialization always emits the canonical string; deserialization runs
/// through [`JobStatus::normalize`] so legacy aliases are accepted at the
/// persistence boundary and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    New,
    InProgress,
    Done,
}

impl Serialize for JobStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        JobStatus::normalize(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown job status '{raw}'")))
    }
}

impl JobStatus {
    /// Check if a status transition is valid.
    pub fn can_transition_to(&self, target: &JobStatus) -> bool {
        use JobStatus::*;
        match (self, target) {
            // Acknowledgement
            (New, InProgress) => true,

            // Caller-side completion policy
            (InProgress, Done) => true,

            // Reopening finished work
            (Done, InProgress) => true,

            // Same status = no-op, allowed
            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Canonical wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
        }
    }

    /// Normalize a stored status string, accepting legacy aliases.
    ///
    /// Older exports spell in-progress with a hyphen and use "completed"
    /// or "finished" interchangeably with "done". This is the single
    /// ingestion point for those variants.
    pub fn normalize(raw: &str) -> Option<JobStatus> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" | "open" => Some(JobStatus::New),
            "in_progress" | "in-progress" | "inprogress" => Some(JobStatus::InProgress),
            "done" | "completed" | "finished" => Some(JobStatus::Done),
            _ => None,
        }
    }
}

/// One ordered step within a job's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier: "tk-" prefixed
    pub id: String,

    /// Short description of the step
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Current state
    pub status: TaskStatus,

    /// Append-only progress log; never edited or removed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<TaskUpdate>,

    /// Materials consumed by this step; immutable once recorded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<MaterialWithdrawal>,
}

/// Task status states.
///
/// Same serialization contract as [`JobStatus`]: canonical strings out,
/// alias-tolerant normalization in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl Serialize for TaskStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TaskStatus::normalize(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown task status '{raw}'")))
    }
}

impl TaskStatus {
    /// Check if a status transition is valid.
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, target) {
            // Promotion when the step becomes active
            (Pending, InProgress) => true,

            // Leader approval; a pending step may be approved directly
            (Pending, Completed) => true,
            (InProgress, Completed) => true,

            // Leader rejection sends the step back for rework
            (InProgress, Pending) => true,
            (Completed, Pending) => true,

            // Same status = no-op, allowed
            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Canonical wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// Normalize a stored status string, accepting legacy aliases.
    pub fn normalize(raw: &str) -> Option<TaskStatus> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "open" => Some(TaskStatus::Pending),
            "in_progress" | "in-progress" | "inprogress" => Some(TaskStatus::InProgress),
            "completed" | "done" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

/// One progress entry on a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskUpdate {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Actor name
    pub updated_by: String,

    pub updated_at: DateTime<Utc>,
}

/// A consumable in the shared catalog. One global ledger across all jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Material {
    pub id: String,
    pub name: String,
    pub category: String,
    /// Unit of measure ("m", "pcs", "kg", ...)
    pub unit: String,
    /// On-hand stock; never negative
    pub stock: i64,
}

/// Record of stock drawn by a task. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialWithdrawal {
    pub material_id: String,
    pub material_name: String,
    pub unit: String,
    pub quantity: i64,
    pub withdrawn_by: String,
    pub withdrawn_at: DateTime<Utc>,
}

/// One administrative field edit. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditEntry {
    pub admin_name: String,
    pub edited_at: DateTime<Utc>,
    /// Why the edit was made; mandatory, non-empty
    pub reason: String,
    /// Names of the fields that differed from the previous value
    pub changes: Vec<String>,
}

/// One workflow event on a job. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    /// Actor name
    pub actor: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Workflow event kinds recorded in a job's activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Acknowledged,
    TaskAdded,
    TaskAdvanced,
    TaskRejected,
    ProgressSubmitted,
    MaterialsWithdrawn,
    LeadAssigned,
    TechsAssigned,
}

impl ActivityKind {
    /// Canonical wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Acknowledged => "acknowledged",
            ActivityKind::TaskAdded => "task_added",
            ActivityKind::TaskAdvanced => "task_advanced",
            ActivityKind::TaskRejected => "task_rejected",
            ActivityKind::ProgressSubmitted => "progress_submitted",
            ActivityKind::MaterialsWithdrawn => "materials_withdrawn",
            ActivityKind::LeadAssigned => "lead_assigned",
            ActivityKind::TechsAssigned => "techs_assigned",
        }
    }

    /// Parse a stored kind string.
    pub fn normalize(raw: &str) -> Option<ActivityKind> {
        match raw {
            "acknowledged" => Some(ActivityKind::Acknowledged),
            "task_added" => Some(ActivityKind::TaskAdded),
            "task_advanced" => Some(ActivityKind::TaskAdvanced),
            "task_rejected" => Some(ActivityKind::TaskRejected),
            "progress_submitted" => Some(ActivityKind::ProgressSubmitted),
            "materials_withdrawn" => Some(ActivityKind::MaterialsWithdrawn),
            "lead_assigned" => Some(ActivityKind::LeadAssigned),
            "techs_assigned" => Some(ActivityKind::TechsAssigned),
            _ => None,
        }
    }
}

/// A leader or technician in the candidate pool.
///
/// Workers are caller-supplied; the engine stores jobs and materials only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub department: String,
    pub position: String,
    /// Rolling workload counter; missing counts as zero when ordering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs_this_month: Option<u32>,
}

/// Caller roles. Authorization is the caller's concern; roles here only
/// route notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Lead,
    Technician,
}

/// Already-authenticated identity supplied with every mutating call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }
}

/// Validation errors for jobs and their mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTitle,
    TitleTooLong,
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    EmptyReason,
    EmptyPatch,
    EmptyTaskTitle,
    EmptyMessage,
    UpdatedBeforeCreated,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyTitle => write!(f, "title cannot be empty"),
            ValidationError::TitleTooLong => write!(f, "title exceeds 500 characters"),
            ValidationError::InvalidDateRange { start, end } => {
                write!(f, "start date {} is after end date {}", start, end)
            }
            ValidationError::EmptyReason => write!(f, "a non-empty reason is required"),
            ValidationError::EmptyPatch => write!(f, "patch contains no fields"),
            ValidationError::EmptyTaskTitle => write!(f, "task title cannot be empty"),
            ValidationError::EmptyMessage => write!(f, "message cannot be empty"),
            ValidationError::UpdatedBeforeCreated => {
                write!(f, "timestamp precedes job creation")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl Job {
    /// Validate the job's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        // Title: required, 1-500 chars
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.title.len() > 500 {
            return Err(ValidationError::TitleTooLong);
        }

        // Date range: inclusive, start must not pass end
        if self.start_date > self.end_date {
            return Err(ValidationError::InvalidDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }

        // Audit entries never predate the job
        if self
            .edit_history
            .iter()
            .any(|e| e.edited_at < self.created_at)
        {
            return Err(ValidationError::UpdatedBeforeCreated);
        }

        Ok(())
    }

    /// True when every task in the pipeline is completed (and at least one
    /// exists). Callers use this to decide job-level completion; the
    /// engine never flips a job to done on its own.
    pub fn all_tasks_completed(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|t| t.status == TaskStatus::Completed)
    }

    /// Position of a task in the pipeline, by id.
    pub fn task_position(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job(title: &str) -> Job {
        let now = Utc::now();
        Job {
            id: "wo-test12345".to_string(),
            title: title.to_string(),
            job_type: "maintenance".to_string(),
            customer_name: "Acme".to_string(),
            customer_phone: None,
            location: "12 Harbor Rd".to_string(),
            latitude: None,
            longitude: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            lead_id: None,
            assigned_techs: vec![],
            tasks: vec![],
            status: JobStatus::New,
            edit_history: vec![],
            activity_log: vec![],
            created_at: now,
            created_by: "admin".to_string(),
            deleted: false,
        }
    }

    #[test]
    fn test_job_validation_valid() {
        let job = make_job("Replace switchgear");
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_job_validation_empty_title() {
        let job = make_job("  ");
        assert_eq!(job.validate(), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn test_job_validation_title_too_long() {
        let job = make_job(&"x".repeat(501));
        assert_eq!(job.validate(), Err(ValidationError::TitleTooLong));
    }

    #[test]
    fn test_job_validation_inverted_range() {
        let mut job = make_job("Valid title");
        job.start_date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        job.end_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(matches!(
            job.validate(),
            Err(ValidationError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn test_job_validation_single_day_range_ok() {
        let mut job = make_job("One-day visit");
        job.end_date = job.start_date;
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_job_status_transitions() {
        use JobStatus::*;

        assert!(New.can_transition_to(&InProgress));
        assert!(InProgress.can_transition_to(&Done));
        assert!(Done.can_transition_to(&InProgress));

        assert!(!New.can_transition_to(&Done));
        assert!(!Done.can_transition_to(&New));
        assert!(!InProgress.can_transition_to(&New));

        // Same status is always allowed
        assert!(New.can_transition_to(&New));
        assert!(Done.can_transition_to(&Done));
    }

    #[test]
    fn test_task_status_transitions() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(&InProgress));
        assert!(Pending.can_transition_to(&Completed));
        assert!(InProgress.can_transition_to(&Completed));
        assert!(InProgress.can_transition_to(&Pending));
        assert!(Completed.can_transition_to(&Pending));

        assert!(!Completed.can_transition_to(&InProgress));

        assert!(Pending.can_transition_to(&Pending));
    }

    #[test]
    fn test_job_status_normalize_aliases() {
        assert_eq!(JobStatus::normalize("done"), Some(JobStatus::Done));
        assert_eq!(JobStatus::normalize("completed"), Some(JobStatus::Done));
        assert_eq!(JobStatus::normalize("Finished"), Some(JobStatus::Done));
        assert_eq!(
            JobStatus::normalize("in-progress"),
            Some(JobStatus::InProgress)
        );
        assert_eq!(JobStatus::normalize("new"), Some(JobStatus::New));
        assert_eq!(JobStatus::normalize("bogus"), None);
    }

    #[test]
    fn test_task_status_normalize_aliases() {
        assert_eq!(TaskStatus::normalize("done"), Some(TaskStatus::Completed));
        assert_eq!(
            TaskStatus::normalize("completed"),
            Some(TaskStatus::Completed)
        );
        assert_eq!(
            TaskStatus::normalize("in-progress"),
            Some(TaskStatus::InProgress)
        );
        assert_eq!(TaskStatus::normalize("pending"), Some(TaskStatus::Pending));
        assert_eq!(TaskStatus::normalize(""), None);
    }

    #[test]
    fn test_all_tasks_completed() {
        let mut job = make_job("Pipeline job");
        assert!(!job.all_tasks_completed());

        job.tasks = vec![
            Task {
                id: "tk-1".to_string(),
                title: "Survey".to_string(),
                description: None,
                status: TaskStatus::Completed,
                updates: vec![],
                materials: vec![],
            },
            Task {
                id: "tk-2".to_string(),
                title: "Install".to_string(),
                description: None,
                status: TaskStatus::Pending,
                updates: vec![],
                materials: vec![],
            },
        ];
        assert!(!job.all_tasks_completed());

        job.tasks[1].status = TaskStatus::Completed;
        assert!(job.all_tasks_completed());
    }

    #[test]
    fn test_job_serialization_roundtrip() {
        let mut job = make_job("Roundtrip job");
        job.tasks.push(Task {
            id: "tk-abc".to_string(),
            title: "Survey site".to_string(),
            description: Some("Check access".to_string()),
            status: TaskStatus::InProgress,
            updates: vec![TaskUpdate {
                message: "Arrived on site".to_string(),
                image_url: None,
                updated_by: "tech-1".to_string(),
                updated_at: Utc::now(),
            }],
            materials: vec![],
        });
        job.edit_history.push(EditEntry {
            admin_name: "admin".to_string(),
            edited_at: job.created_at,
            reason: "initial correction".to_string(),
            changes: vec!["title".to_string()],
        });

        let json = serde_json::to_string(&job).unwrap();
        let deserialized: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(job, deserialized);
    }

    #[test]
    fn test_status_deserialize_accepts_aliases() {
        let status: JobStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, JobStatus::Done);

        let status: TaskStatus = serde_json::from_str("\"done\"").unwrap();
        assert_eq!(status, TaskStatus::Completed);

        assert!(serde_json::from_str::<JobStatus>("\"nonsense\"").is_err());
    }

    #[test]
    fn test_status_serialize_emits_canonical() {
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_material_serialization_roundtrip() {
        let material = Material {
            id: "mat-cable".to_string(),
            name: "Cable 3x2.5".to_string(),
            category: "electrical".to_string(),
            unit: "m".to_string(),
            stock: 120,
        };
        let json = serde_json::to_string(&material).unwrap();
        let deserialized: Material = serde_json::from_str(&json).unwrap();
        assert_eq!(material, deserialized);
    }
}
