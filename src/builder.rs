//! Draft and patch types for creating and editing jobs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Everything needed to create a job, with a fluent API.
///
/// # Example
///
/// ```ignore
/// let draft = JobDraft::new("Replace switchgear", "maintenance", "Acme",
///                           start, end)
///     .location("12 Harbor Rd")
///     .coordinates(59.91, 10.75)
///     .customer_phone("555-0100");
/// let job = store.create_job(draft, &actor)?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDraft {
    pub title: String,
    pub job_type: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl JobDraft {
    /// Create a draft with the mandatory fields.
    pub fn new(
        title: impl Into<String>,
        job_type: impl Into<String>,
        customer_name: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            title: title.into(),
            job_type: job_type.into(),
            customer_name: customer_name.into(),
            customer_phone: None,
            location: String::new(),
            latitude: None,
            longitude: None,
            start_date,
            end_date,
        }
    }

    /// Set the site address.
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set the site coordinates.
    pub fn coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Set the customer phone number.
    pub fn customer_phone(mut self, phone: impl Into<String>) -> Self {
        self.customer_phone = Some(phone.into());
        self
    }
}

/// A partial edit of a job's administrative fields.
///
/// Only fields that are `Some` participate in the diff; crew binding is
/// not patchable here (it goes through the assign operations, which
/// re-validate availability).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPatch {
    pub title: Option<String>,
    pub job_type: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<Option<String>>,
    pub location: Option<String>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no field is set at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.job_type.is_none()
            && self.customer_name.is_none()
            && self.customer_phone.is_none()
            && self.location.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn customer_name(mut self, name: impl Into<String>) -> Self {
        self.customer_name = Some(name.into());
        self
    }

    /// Set or clear the customer phone.
    pub fn customer_phone(mut self, phone: Option<String>) -> Self {
        self.customer_phone = Some(phone);
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set or clear the site coordinates.
    pub fn coordinates(mut self, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn start_date(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn end_date(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_draft_builder() {
        let draft = JobDraft::new(
            "Replace pump",
            "repair",
            "Acme",
            date(2024, 1, 1),
            date(2024, 1, 3),
        )
        .location("Dock 4")
        .coordinates(59.91, 10.75)
        .customer_phone("555-0100");

        assert_eq!(draft.title, "Replace pump");
        assert_eq!(draft.location, "Dock 4");
        assert_eq!(draft.latitude, Some(59.91));
        assert_eq!(draft.customer_phone.as_deref(), Some("555-0100"));
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(JobPatch::new().is_empty());
        assert!(!JobPatch::new().title("New title").is_empty());
        // Clearing a field still counts as a set field
        assert!(!JobPatch::new().customer_phone(None).is_empty());
    }
}
