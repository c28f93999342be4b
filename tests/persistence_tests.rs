//! Integration tests for persistence fidelity.
//!
//! Tests reload equality (including nested timestamps), legacy status
//! ingestion, tombstones, and unusual input survival.

mod common;

use common::{TestEnv, date};
use foreman::{
    JobPatch, JobStatus, Store, StoreLedgerExt, StorePipelineExt, TaskStatus, WithdrawalRequest,
};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;

// =============================================================================
// Reload Fidelity Tests
// =============================================================================

#[test]
fn test_job_reloads_structurally_identical() {
    let mut env = TestEnv::new();
    env.seed_material("mat-m", 50);

    // Build a job exercising every nested collection
    let job = env.create_job_with_tasks("Full job", &["Survey", "Install"]);
    let t1 = job.tasks[0].id.clone();
    let admin = env.admin();
    let lead = env.lead();
    let tech = env.tech();

    env.store
        .submit_progress(&job.id, &t1, &tech, "started", Some("https://img/1.jpg"))
        .unwrap();
    env.store
        .withdraw(&job.id, &t1, &[WithdrawalRequest::new("mat-m", 4)], &tech)
        .unwrap();
    env.store.advance(&job.id, &t1, &lead).unwrap();
    env.store
        .update_job(
            &job.id,
            JobPatch::new().title("Full job, revised"),
            "scope clarified",
            &admin,
        )
        .unwrap();

    let before = env.store.get_job(&job.id).unwrap().unwrap();

    // Reopen from disk: cache survives, values must match exactly
    let reopened = Store::open(env.temp_dir.path()).unwrap();
    let after = reopened.get_job(&job.id).unwrap().unwrap();

    assert_eq!(before, after);
}

#[test]
fn test_nested_timestamps_survive_reload() {
    let mut env = TestEnv::new();
    env.seed_material("mat-m", 50);

    let job = env.create_job_with_tasks("Timed job", &["Survey"]);
    let t1 = job.tasks[0].id.clone();
    let tech = env.tech();

    env.store
        .submit_progress(&job.id, &t1, &tech, "on site", None)
        .unwrap();
    env.store
        .withdraw(&job.id, &t1, &[WithdrawalRequest::new("mat-m", 2)], &tech)
        .unwrap();

    let before = env.store.get_job(&job.id).unwrap().unwrap();

    let reopened = Store::open(env.temp_dir.path()).unwrap();
    let after = reopened.get_job(&job.id).unwrap().unwrap();

    assert_eq!(after.created_at, before.created_at);
    assert_eq!(
        after.tasks[0].updates[0].updated_at,
        before.tasks[0].updates[0].updated_at
    );
    assert_eq!(
        after.tasks[0].materials[0].withdrawn_at,
        before.tasks[0].materials[0].withdrawn_at
    );
    assert_eq!(
        after.activity_log.last().unwrap().at,
        before.activity_log.last().unwrap().at
    );
}

#[test]
fn test_materials_survive_reload() {
    let mut env = TestEnv::new();
    env.seed_material("mat-m", 50);

    let job = env.create_job_with_tasks("Stocked", &["Fit"]);
    let t1 = job.tasks[0].id.clone();
    let tech = env.tech();
    env.store
        .withdraw(&job.id, &t1, &[WithdrawalRequest::new("mat-m", 13)], &tech)
        .unwrap();

    let reopened = Store::open(env.temp_dir.path()).unwrap();
    assert_eq!(
        reopened.get_material("mat-m").unwrap().unwrap().stock,
        37
    );
}

// =============================================================================
// Legacy Ingestion Tests
// =============================================================================

#[test]
fn test_legacy_status_aliases_normalize_on_load() {
    let temp_dir = TempDir::new().unwrap();
    Store::init(temp_dir.path()).unwrap();

    // A snapshot written by an older exporter: hyphenated and aliased
    // status spellings
    let legacy = serde_json::json!({
        "id": "wo-legacy001",
        "title": "Imported job",
        "job_type": "repair",
        "customer_name": "Acme",
        "location": "Dock 1",
        "start_date": "2023-11-01",
        "end_date": "2023-11-03",
        "status": "completed",
        "tasks": [{
            "id": "tk-legacy001",
            "title": "Old task",
            "status": "in-progress"
        }],
        "created_at": "2023-10-30T08:15:00Z",
        "created_by": "importer"
    });

    let jobs_path = temp_dir.path().join(".foreman").join("jobs.jsonl");
    let mut file = OpenOptions::new().append(true).open(&jobs_path).unwrap();
    writeln!(file, "{}", legacy).unwrap();

    // Reopen triggers a rebuild; aliases land as canonical enums
    let store = Store::open(temp_dir.path()).unwrap();
    let job = store.get_job("wo-legacy001").unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.tasks[0].status, TaskStatus::InProgress);
}

#[test]
fn test_corrupt_line_is_skipped_not_fatal() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut env_store = Store::init(temp_dir.path()).unwrap();
        let draft = foreman::JobDraft::new(
            "Survivor",
            "repair",
            "Acme",
            date(2024, 1, 1),
            date(2024, 1, 2),
        );
        let actor = foreman::Actor::new("admin-1", "Dana", foreman::Role::Admin);
        env_store.create_job(draft, &actor).unwrap();
    }

    let jobs_path = temp_dir.path().join(".foreman").join("jobs.jsonl");
    let mut file = OpenOptions::new().append(true).open(&jobs_path).unwrap();
    writeln!(file, "{{not valid json").unwrap();

    let store = Store::open(temp_dir.path()).unwrap();
    assert_eq!(store.list_jobs(None).unwrap().len(), 1);
}

// =============================================================================
// Tombstone Tests
// =============================================================================

#[test]
fn test_deleted_job_stays_deleted_across_reload() {
    let mut env = TestEnv::new();
    let admin = env.admin();

    let job = env.create_job("Ephemeral");
    env.store
        .delete_job(&job.id, "duplicate entry", &admin)
        .unwrap();
    assert!(env.store.get_job(&job.id).unwrap().is_none());

    let reopened = Store::open(env.temp_dir.path()).unwrap();
    assert!(reopened.get_job(&job.id).unwrap().is_none());
    assert!(reopened.list_jobs(None).unwrap().is_empty());
}

#[test]
fn test_delete_does_not_disturb_other_jobs() {
    let mut env = TestEnv::new();
    let admin = env.admin();

    let keep = env.create_job_in_range("Keeper", date(2024, 2, 1), date(2024, 2, 3));
    let doomed = env.create_job_in_range("Dropped", date(2024, 3, 1), date(2024, 3, 3));

    env.store.delete_job(&doomed.id, "cancelled", &admin).unwrap();

    let reopened = Store::open(env.temp_dir.path()).unwrap();
    let remaining = reopened.list_jobs(None).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, keep.id);
}

// =============================================================================
// Unusual Input Tests
// =============================================================================

#[test]
fn test_unicode_fields_roundtrip() {
    let mut env = TestEnv::new();

    let job = env.create_job("Skifte sikringsskap på kai 3 ⚡");
    let reloaded = env.reload(&job);
    assert_eq!(reloaded.title, "Skifte sikringsskap på kai 3 ⚡");

    let reopened = Store::open(env.temp_dir.path()).unwrap();
    assert_eq!(
        reopened.get_job(&job.id).unwrap().unwrap().title,
        "Skifte sikringsskap på kai 3 ⚡"
    );
}

#[test]
fn test_multiline_progress_message_roundtrips() {
    let mut env = TestEnv::new();
    let job = env.create_job_with_tasks("Notes", &["T1"]);
    let t1 = job.tasks[0].id.clone();
    let tech = env.tech();

    let message = "line one\nline two\n  indented";
    env.store
        .submit_progress(&job.id, &t1, &tech, message, None)
        .unwrap();

    let reopened = Store::open(env.temp_dir.path()).unwrap();
    let reloaded = reopened.get_job(&job.id).unwrap().unwrap();
    assert_eq!(reloaded.tasks[0].updates[0].message, message);
}

#[test]
fn test_empty_store_lists_nothing() {
    let env = TestEnv::new();

    assert!(env.store.list_jobs(None).unwrap().is_empty());
    assert!(env.store.list_materials().unwrap().is_empty());
}
