//! Audit trail query API with flexible filtering and aggregations.

use crate::storage::ActivityRecord;
use crate::store::{Store, StoreError};
use crate::types::{ActivityKind, EditEntry};
use chrono::{DateTime, Utc};
use eyre::Result;
use std::collections::HashMap;

/// Query builder for fluent activity-log queries.
pub struct ActivityQuery<'a> {
    store: &'a Store,
    job_id: Option<String>,
    kind: Option<ActivityKind>,
    actor: Option<String>,
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl<'a> ActivityQuery<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            job_id: None,
            kind: None,
            actor: None,
            since: None,
            limit: None,
        }
    }

    /// Filter by job.
    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Filter by activity kind.
    pub fn kind(mut self, kind: ActivityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Filter by actor name.
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Filter by timestamp (entries at or after this time).
    pub fn since(mut self, timestamp: DateTime<Utc>) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Limit results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Execute the query, newest entries first.
    pub fn execute(self) -> Result<Vec<ActivityRecord>> {
        self.store.storage().query_activity(
            self.job_id.as_deref(),
            self.kind,
            self.actor.as_deref(),
            self.since,
            self.limit,
        )
    }
}

/// Activity counts grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct ActivityCounts {
    /// Map of activity kind to count.
    pub by_kind: HashMap<ActivityKind, usize>,
    /// Total entry count.
    pub total: usize,
}

/// Timeline entry representing activity in one day bucket.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    /// Start of the day bucket (UTC midnight).
    pub start: DateTime<Utc>,
    /// End of the day bucket.
    pub end: DateTime<Utc>,
    /// Entries in this bucket.
    pub entries: Vec<ActivityRecord>,
}

/// Extension trait adding audit queries to the store.
pub trait StoreAuditExt {
    /// Start building an activity query.
    fn activity_query(&self) -> ActivityQuery<'_>;

    /// Activity counts grouped by kind, optionally for one job.
    fn activity_counts(&self, job_id: Option<&str>) -> Result<ActivityCounts>;

    /// Activity as a timeline grouped by day, most recent day first.
    fn activity_timeline(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<TimelineEntry>>;

    /// The append-only field-edit history of a job.
    fn edit_history(&self, job_id: &str) -> Result<Vec<EditEntry>>;
}

impl StoreAuditExt for Store {
    fn activity_query(&self) -> ActivityQuery<'_> {
        ActivityQuery::new(self)
    }

    fn activity_counts(&self, job_id: Option<&str>) -> Result<ActivityCounts> {
        let records = self
            .storage()
            .query_activity(job_id, None, None, None, None)?;
        let mut counts = ActivityCounts::default();

        for record in records {
            *counts.by_kind.entry(record.kind).or_insert(0) += 1;
            counts.total += 1;
        }

        Ok(counts)
    }

    fn activity_timeline(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<TimelineEntry>> {
        let records = self
            .storage()
            .query_activity(None, None, None, Some(since), Some(limit))?;

        // Group entries by UTC day
        let mut buckets: HashMap<DateTime<Utc>, Vec<ActivityRecord>> = HashMap::new();

        for record in records {
            let day = record
                .at
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or(record.at);

            buckets.entry(day).or_default().push(record);
        }

        let mut timeline: Vec<TimelineEntry> = buckets
            .into_iter()
            .map(|(start, entries)| TimelineEntry {
                start,
                end: start + chrono::Duration::days(1),
                entries,
            })
            .collect();

        timeline.sort_by(|a, b| b.start.cmp(&a.start)); // Most recent first

        Ok(timeline)
    }

    fn edit_history(&self, job_id: &str) -> Result<Vec<EditEntry>> {
        let job = self
            .get_job(job_id)?
            .ok_or_else(|| eyre::eyre!(StoreError::JobNotFound(job_id.to_string())))?;
        Ok(job.edit_history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{JobDraft, JobPatch};
    use crate::pipeline::StorePipelineExt;
    use crate::types::{Actor, Role};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn setup_test_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seeded_job(store: &mut Store) -> String {
        let admin = Actor::new("admin-1", "Dana", Role::Admin);
        let lead = Actor::new("lead-1", "Kim", Role::Lead);

        let draft = JobDraft::new("Audit job", "repair", "Acme", date(2024, 1, 1), date(2024, 1, 5));
        let job = store.create_job(draft, &admin).unwrap().value;
        store.acknowledge(&job.id, &lead).unwrap();
        let job = store.add_task(&job.id, "Survey", None, &lead).unwrap().value;
        let task_id = job.tasks[0].id.clone();
        store.advance(&job.id, &task_id, &lead).unwrap();
        job.id.clone()
    }

    #[test]
    fn test_activity_query_by_kind() {
        let (_temp_dir, mut store) = setup_test_store();
        let job_id = seeded_job(&mut store);

        let advanced = store
            .activity_query()
            .job(&job_id)
            .kind(ActivityKind::TaskAdvanced)
            .execute()
            .unwrap();
        assert_eq!(advanced.len(), 1);

        let all = store.activity_query().job(&job_id).execute().unwrap();
        assert_eq!(all.len(), 3); // acknowledged, task_added, task_advanced
    }

    #[test]
    fn test_activity_query_by_actor() {
        let (_temp_dir, mut store) = setup_test_store();
        let job_id = seeded_job(&mut store);

        let by_kim = store
            .activity_query()
            .job(&job_id)
            .actor("Kim")
            .execute()
            .unwrap();
        assert_eq!(by_kim.len(), 3);

        let by_nobody = store
            .activity_query()
            .actor("Nobody")
            .execute()
            .unwrap();
        assert!(by_nobody.is_empty());
    }

    #[test]
    fn test_activity_counts() {
        let (_temp_dir, mut store) = setup_test_store();
        let job_id = seeded_job(&mut store);

        let counts = store.activity_counts(Some(&job_id)).unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.by_kind.get(&ActivityKind::Acknowledged), Some(&1));
        assert_eq!(counts.by_kind.get(&ActivityKind::TaskAdded), Some(&1));
        assert_eq!(counts.by_kind.get(&ActivityKind::TaskAdvanced), Some(&1));
    }

    #[test]
    fn test_activity_timeline_buckets_by_day() {
        let (_temp_dir, mut store) = setup_test_store();
        seeded_job(&mut store);

        let timeline = store
            .activity_timeline(Utc::now() - chrono::Duration::hours(1), 100)
            .unwrap();

        // Everything just happened, so one bucket holds all three entries
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].entries.len(), 3);
        assert_eq!(timeline[0].end - timeline[0].start, chrono::Duration::days(1));
    }

    #[test]
    fn test_edit_history_accessor() {
        let (_temp_dir, mut store) = setup_test_store();
        let job_id = seeded_job(&mut store);

        assert!(store.edit_history(&job_id).unwrap().is_empty());

        let admin = Actor::new("admin-1", "Dana", Role::Admin);
        store
            .update_job(
                &job_id,
                JobPatch::new().title("Audit job, revised"),
                "clarified scope",
                &admin,
            )
            .unwrap();

        let history = store.edit_history(&job_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].changes, vec!["title"]);

        assert!(store.edit_history("wo-missing").is_err());
    }
}
