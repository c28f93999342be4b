//! Shared test infrastructure for Foreman integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use chrono::NaiveDate;
use foreman::{Actor, Job, JobDraft, Material, Role, Store, StorePipelineExt, TaskStatus, Worker};
use tempfile::TempDir;

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        Self { temp_dir, store }
    }

    pub fn admin(&self) -> Actor {
        Actor::new("admin-1", "Dana", Role::Admin)
    }

    pub fn lead(&self) -> Actor {
        Actor::new("lead-1", "Kim", Role::Lead)
    }

    pub fn tech(&self) -> Actor {
        Actor::new("tech-1", "Ola", Role::Technician)
    }

    /// Create a job spanning the first week of January 2024.
    pub fn create_job(&mut self, title: &str) -> Job {
        self.create_job_in_range(title, date(2024, 1, 1), date(2024, 1, 5))
    }

    /// Create a job over an explicit date range.
    pub fn create_job_in_range(&mut self, title: &str, start: NaiveDate, end: NaiveDate) -> Job {
        let draft = JobDraft::new(title, "maintenance", "Acme", start, end).location("Dock 4");
        self.store
            .create_job(draft, &self.admin())
            .expect("Failed to create job")
            .value
    }

    /// Create a job and acknowledge it so pipeline activity is legal.
    pub fn create_acknowledged_job(&mut self, title: &str) -> Job {
        let job = self.create_job(title);
        self.store
            .acknowledge(&job.id, &self.lead())
            .expect("Failed to acknowledge job")
            .value
    }

    /// Create an acknowledged job with a pipeline of the given task titles.
    pub fn create_job_with_tasks(&mut self, title: &str, tasks: &[&str]) -> Job {
        let mut job = self.create_acknowledged_job(title);
        for task_title in tasks {
            job = self
                .store
                .add_task(&job.id, task_title, None, &self.lead())
                .expect("Failed to add task")
                .value;
        }
        job
    }

    /// Approve a task by pipeline position.
    pub fn advance_nth(&mut self, job: &Job, n: usize) -> Job {
        let task_id = job.tasks[n].id.clone();
        self.store
            .advance(&job.id, &task_id, &self.lead())
            .expect("Failed to advance task")
            .value
    }

    /// Seed a catalog material.
    pub fn seed_material(&mut self, id: &str, stock: i64) -> Material {
        self.store
            .add_material(Material {
                id: id.to_string(),
                name: format!("Material {}", id),
                category: "general".to_string(),
                unit: "pcs".to_string(),
                stock,
            })
            .expect("Failed to add material")
    }

    /// A candidate worker with the given workload counter.
    pub fn worker(&self, id: &str, load: Option<u32>) -> Worker {
        Worker {
            id: id.to_string(),
            name: format!("Worker {}", id),
            department: "field".to_string(),
            position: "technician".to_string(),
            jobs_this_month: load,
        }
    }

    /// Current stock of a material.
    pub fn stock_of(&self, id: &str) -> i64 {
        self.store
            .get_material(id)
            .expect("Failed to get material")
            .expect("Material missing")
            .stock
    }

    /// Reload a job from storage.
    pub fn reload(&self, job: &Job) -> Job {
        self.store
            .get_job(&job.id)
            .expect("Failed to get job")
            .expect("Job missing")
    }

    /// Assert the status of the task at a pipeline position.
    pub fn assert_task_status(&self, job: &Job, n: usize, expected: TaskStatus) {
        let reloaded = self.reload(job);
        assert_eq!(
            reloaded.tasks[n].status,
            expected,
            "Expected task {} of {} to be {:?}",
            n,
            job.id,
            expected
        );
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand date constructor.
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}
