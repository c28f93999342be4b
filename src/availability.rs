//! Availability resolution for leaders and technicians.
//!
//! Pure functions over a snapshot of jobs: no caching, no side effects.
//! Callers must re-resolve after any job mutation; binding a candidate
//! re-validates inside the store anyway.

use crate::store::Store;
use crate::types::{Job, Worker};
use chrono::NaiveDate;
use eyre::Result;
use std::collections::HashSet;

/// Inclusive date-range overlap. A single-day range (start == end) still
/// collides with same-day work.
pub fn ranges_overlap(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Ids of everyone committed to a job overlapping [start, end], skipping
/// `exclude_job`. Job status is deliberately not consulted: a done job
/// still blocks its range (see DESIGN.md).
pub fn busy_worker_ids(
    jobs: &[Job],
    start: NaiveDate,
    end: NaiveDate,
    exclude_job: Option<&str>,
) -> HashSet<String> {
    let mut busy = HashSet::new();

    for job in jobs {
        if exclude_job == Some(job.id.as_str()) {
            continue;
        }
        if !ranges_overlap(job.start_date, job.end_date, start, end) {
            continue;
        }
        if let Some(lead_id) = &job.lead_id {
            busy.insert(lead_id.clone());
        }
        for tech_id in &job.assigned_techs {
            busy.insert(tech_id.clone());
        }
    }

    busy
}

/// Filter a candidate pool down to those free in [start, end], ordered by
/// ascending workload (missing counts as zero), ties broken by id so the
/// result is deterministic.
pub fn resolve_available(
    candidates: &[Worker],
    start: NaiveDate,
    end: NaiveDate,
    jobs: &[Job],
    exclude_job: Option<&str>,
) -> Vec<Worker> {
    let busy = busy_worker_ids(jobs, start, end, exclude_job);

    let mut available: Vec<Worker> = candidates
        .iter()
        .filter(|w| !busy.contains(&w.id))
        .cloned()
        .collect();

    available.sort_by(|a, b| {
        let load_a = a.jobs_this_month.unwrap_or(0);
        let load_b = b.jobs_this_month.unwrap_or(0);
        load_a.cmp(&load_b).then_with(|| a.id.cmp(&b.id))
    });

    available
}

/// Store-backed resolution against the current job snapshot.
pub trait StoreAvailabilityExt {
    /// Resolve available candidates against all stored jobs.
    fn available_workers(
        &self,
        candidates: &[Worker],
        start: NaiveDate,
        end: NaiveDate,
        exclude_job: Option<&str>,
    ) -> Result<Vec<Worker>>;
}

impl StoreAvailabilityExt for Store {
    fn available_workers(
        &self,
        candidates: &[Worker],
        start: NaiveDate,
        end: NaiveDate,
        exclude_job: Option<&str>,
    ) -> Result<Vec<Worker>> {
        // Only overlapping jobs can contribute busy workers, so the
        // snapshot is pre-filtered by the cache's range query
        let jobs = self.storage().jobs_overlapping(start, end, exclude_job)?;
        Ok(resolve_available(candidates, start, end, &jobs, exclude_job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn worker(id: &str, load: Option<u32>) -> Worker {
        Worker {
            id: id.to_string(),
            name: format!("Worker {}", id),
            department: "field".to_string(),
            position: "technician".to_string(),
            jobs_this_month: load,
        }
    }

    fn job(id: &str, start: NaiveDate, end: NaiveDate, lead: Option<&str>, techs: &[&str]) -> Job {
        Job {
            id: id.to_string(),
            title: "Job".to_string(),
            job_type: "maintenance".to_string(),
            customer_name: "Acme".to_string(),
            customer_phone: None,
            location: String::new(),
            latitude: None,
            longitude: None,
            start_date: start,
            end_date: end,
            lead_id: lead.map(String::from),
            assigned_techs: techs.iter().map(|s| s.to_string()).collect(),
            tasks: vec![],
            status: JobStatus::InProgress,
            edit_history: vec![],
            activity_log: vec![],
            created_at: Utc::now(),
            created_by: "admin".to_string(),
            deleted: false,
        }
    }

    #[test]
    fn test_ranges_overlap_inclusive_bounds() {
        let a = (date(2024, 1, 1), date(2024, 1, 5));
        assert!(ranges_overlap(a.0, a.1, date(2024, 1, 5), date(2024, 1, 10)));
        assert!(ranges_overlap(a.0, a.1, date(2023, 12, 1), date(2024, 1, 1)));
        assert!(!ranges_overlap(a.0, a.1, date(2024, 1, 6), date(2024, 1, 10)));
    }

    #[test]
    fn test_single_day_range_overlaps_same_day() {
        let day = date(2024, 3, 15);
        assert!(ranges_overlap(day, day, day, day));
        assert!(ranges_overlap(day, day, date(2024, 3, 10), date(2024, 3, 20)));
    }

    #[test]
    fn test_busy_lead_excluded() {
        let jobs = vec![job(
            "wo-a",
            date(2024, 1, 1),
            date(2024, 1, 5),
            Some("lead-1"),
            &[],
        )];
        let candidates = vec![worker("lead-1", Some(2)), worker("lead-2", Some(3))];

        // Overlapping query range: lead-1 is busy
        let available = resolve_available(
            &candidates,
            date(2024, 1, 4),
            date(2024, 1, 10),
            &jobs,
            None,
        );
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "lead-2");

        // Excluding the job itself frees its lead
        let available = resolve_available(
            &candidates,
            date(2024, 1, 4),
            date(2024, 1, 10),
            &jobs,
            Some("wo-a"),
        );
        assert_eq!(available.len(), 2);
    }

    #[test]
    fn test_busy_tech_excluded() {
        let jobs = vec![job(
            "wo-a",
            date(2024, 1, 1),
            date(2024, 1, 5),
            None,
            &["tech-1", "tech-2"],
        )];
        let candidates = vec![worker("tech-1", None), worker("tech-3", None)];

        let available =
            resolve_available(&candidates, date(2024, 1, 3), date(2024, 1, 3), &jobs, None);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "tech-3");
    }

    #[test]
    fn test_non_overlapping_jobs_do_not_block() {
        let jobs = vec![job("wo-a", date(2024, 1, 1), date(2024, 1, 5), Some("lead-1"), &[])];
        let candidates = vec![worker("lead-1", None)];

        let available = resolve_available(
            &candidates,
            date(2024, 1, 6),
            date(2024, 1, 10),
            &jobs,
            None,
        );
        assert_eq!(available.len(), 1);
    }

    #[test]
    fn test_done_job_still_blocks_range() {
        let mut blocking = job("wo-a", date(2024, 1, 1), date(2024, 1, 5), Some("lead-1"), &[]);
        blocking.status = JobStatus::Done;

        let available = resolve_available(
            &[worker("lead-1", None)],
            date(2024, 1, 2),
            date(2024, 1, 3),
            &[blocking],
            None,
        );
        assert!(available.is_empty());
    }

    #[test]
    fn test_ordering_by_load_then_id() {
        let candidates = vec![
            worker("w-c", Some(1)),
            worker("w-a", Some(3)),
            worker("w-b", Some(1)),
            worker("w-d", None), // missing load counts as 0
        ];

        let available =
            resolve_available(&candidates, date(2024, 1, 1), date(2024, 1, 2), &[], None);

        let ids: Vec<&str> = available.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["w-d", "w-b", "w-c", "w-a"]);
    }
}
