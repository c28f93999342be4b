//! ID generation for jobs and tasks.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a unique job ID.
/// Format: "wo-" + 8 hex chars of the creation second + 6 hex chars of
/// SHA256(title + timestamp + random). Collisions are treated as
/// negligible; there is no uniqueness retry loop.
pub fn generate_job_id(title: &str, created_at: DateTime<Utc>) -> String {
    format!("wo-{:08x}-{}", created_at.timestamp() as u32, entropy_suffix(title, created_at))
}

/// Generate a unique task ID. Same scheme as job IDs, "tk-" prefixed.
pub fn generate_task_id(title: &str, created_at: DateTime<Utc>) -> String {
    format!("tk-{:08x}-{}", created_at.timestamp() as u32, entropy_suffix(title, created_at))
}

/// 6 hex chars = 24 bits of content + entropy hash.
fn entropy_suffix(title: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(created_at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    // 8 bytes of randomness to prevent same-second collisions
    hasher.update(rand::rng().random::<[u8; 8]>());
    let hash = hasher.finalize();
    format!("{:02x}{:02x}{:02x}", hash[0], hash[1], hash[2])
}
