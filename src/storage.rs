//! Storage layer for Foreman: JSONL files + SQLite cache.
//!
//! The JSONL files are the durable source of truth: every mutation
//! appends a full entity snapshot (last occurrence wins, tombstones mark
//! deletion). The SQLite database is a disposable query cache rebuilt
//! from the JSONL whenever the recorded line counts disagree.

use crate::types::{
    ActivityEntry, ActivityKind, EditEntry, Job, JobStatus, Material, MaterialWithdrawal, Task,
    TaskStatus, TaskUpdate,
};
use chrono::{DateTime, NaiveDate, Utc};
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Storage directory name.
const FOREMAN_DIR: &str = ".foreman";

/// JSONL file for job snapshots.
const JOBS_FILE: &str = "jobs.jsonl";

/// JSONL file for material snapshots.
const MATERIALS_FILE: &str = "materials.jsonl";

/// SQLite database file.
const DB_FILE: &str = "foreman.db";

/// One activity-log row as read back from the cache, with the job it
/// belongs to.
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub job_id: String,
    pub kind: ActivityKind,
    pub actor: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Storage handle for reading/writing foreman data.
pub struct Storage {
    root: PathBuf,
    db: Connection,
}

impl Storage {
    /// Initialize storage in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let data_dir = root.join(FOREMAN_DIR);
        fs::create_dir_all(&data_dir).context("Failed to create .foreman directory")?;

        // Create empty JSONL files if they don't exist
        let jobs_path = data_dir.join(JOBS_FILE);
        let materials_path = data_dir.join(MATERIALS_FILE);

        if !jobs_path.exists() {
            File::create(&jobs_path).context("Failed to create jobs.jsonl")?;
        }
        if !materials_path.exists() {
            File::create(&materials_path).context("Failed to create materials.jsonl")?;
        }

        // Create SQLite database
        let db_path = data_dir.join(DB_FILE);
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;

        let mut storage = Self {
            root: root.to_path_buf(),
            db,
        };

        storage.init_schema()?;
        storage.rebuild_from_jsonl()?;

        Ok(storage)
    }

    /// Open existing storage.
    pub fn open(root: &Path) -> Result<Self> {
        let data_dir = root.join(FOREMAN_DIR);
        if !data_dir.exists() {
            eyre::bail!("No .foreman directory found. Run 'fm init' first.");
        }

        let db_path = data_dir.join(DB_FILE);
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;

        let mut storage = Self {
            root: root.to_path_buf(),
            db,
        };

        storage.init_schema()?;

        // Check consistency and rebuild if needed
        if storage.needs_rebuild()? {
            storage.rebuild_from_jsonl()?;
        }

        Ok(storage)
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    job_type TEXT NOT NULL,
                    customer_name TEXT NOT NULL,
                    customer_phone TEXT,
                    location TEXT NOT NULL,
                    latitude REAL,
                    longitude REAL,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    lead_id TEXT,
                    status TEXT NOT NULL CHECK (status IN ('new', 'in_progress', 'done')),
                    created_at TEXT NOT NULL,
                    created_by TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_jobs_range ON jobs(start_date, end_date);
                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

                CREATE TABLE IF NOT EXISTS job_techs (
                    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    tech_id TEXT NOT NULL,
                    PRIMARY KEY (job_id, tech_id)
                );
                CREATE INDEX IF NOT EXISTS idx_job_techs_tech ON job_techs(tech_id);

                CREATE TABLE IF NOT EXISTS tasks (
                    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    task_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL CHECK (status IN ('pending', 'in_progress', 'completed')),
                    PRIMARY KEY (job_id, task_id)
                );

                CREATE TABLE IF NOT EXISTS task_updates (
                    job_id TEXT NOT NULL,
                    task_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    message TEXT NOT NULL,
                    image_url TEXT,
                    updated_by TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (job_id, task_id, seq)
                );

                CREATE TABLE IF NOT EXISTS withdrawal_records (
                    job_id TEXT NOT NULL,
                    task_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    material_id TEXT NOT NULL,
                    material_name TEXT NOT NULL,
                    unit TEXT NOT NULL,
                    quantity INTEGER NOT NULL,
                    withdrawn_by TEXT NOT NULL,
                    withdrawn_at TEXT NOT NULL,
                    PRIMARY KEY (job_id, task_id, seq)
                );

                CREATE TABLE IF NOT EXISTS edit_history (
                    job_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    admin_name TEXT NOT NULL,
                    edited_at TEXT NOT NULL,
                    reason TEXT NOT NULL,
                    changes TEXT NOT NULL,
                    PRIMARY KEY (job_id, seq)
                );

                CREATE TABLE IF NOT EXISTS activity_log (
                    job_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    actor TEXT NOT NULL,
                    message TEXT NOT NULL,
                    at TEXT NOT NULL,
                    PRIMARY KEY (job_id, seq)
                );
                CREATE INDEX IF NOT EXISTS idx_activity_kind ON activity_log(kind);
                CREATE INDEX IF NOT EXISTS idx_activity_at ON activity_log(at);

                CREATE TABLE IF NOT EXISTS materials (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    category TEXT NOT NULL,
                    unit TEXT NOT NULL,
                    stock INTEGER NOT NULL CHECK (stock >= 0)
                );

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Check if SQLite needs to be rebuilt from JSONL.
    fn needs_rebuild(&self) -> Result<bool> {
        let jobs_path = self.data_path(JOBS_FILE);
        let materials_path = self.data_path(MATERIALS_FILE);

        let jobs_lines = count_lines(&jobs_path)?;
        let materials_lines = count_lines(&materials_path)?;

        let stored_jobs: i64 = self
            .db
            .query_row(
                "SELECT COALESCE((SELECT value FROM meta WHERE key = 'jsonl_jobs_lines'), '0')",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let stored_materials: i64 = self
            .db
            .query_row(
                "SELECT COALESCE((SELECT value FROM meta WHERE key = 'jsonl_materials_lines'), '0')",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(jobs_lines as i64 != stored_jobs || materials_lines as i64 != stored_materials)
    }

    /// Rebuild the SQLite cache from the JSONL files.
    pub fn rebuild_from_jsonl(&mut self) -> Result<()> {
        let jobs_path = self.data_path(JOBS_FILE);
        let materials_path = self.data_path(MATERIALS_FILE);

        // Clear existing data
        self.db
            .execute_batch(
                r#"
                DELETE FROM job_techs;
                DELETE FROM tasks;
                DELETE FROM task_updates;
                DELETE FROM withdrawal_records;
                DELETE FROM edit_history;
                DELETE FROM activity_log;
                DELETE FROM jobs;
                DELETE FROM materials;
            "#,
            )
            .context("Failed to clear tables")?;

        // Read job snapshots (last occurrence wins, tombstones drop the job)
        let mut jobs: HashMap<String, Job> = HashMap::new();
        let mut jobs_line_count = 0;

        if jobs_path.exists() {
            let file = File::open(&jobs_path).context("Failed to open jobs.jsonl")?;
            let reader = BufReader::new(file);

            for line in reader.lines() {
                jobs_line_count += 1;
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        log::warn!("Failed to read line {}: {}", jobs_line_count, e);
                        continue;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<Job>(&line) {
                    Ok(job) => {
                        if job.deleted {
                            jobs.remove(&job.id);
                        } else {
                            jobs.insert(job.id.clone(), job);
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to parse job at line {}: {}", jobs_line_count, e);
                    }
                }
            }
        }

        for job in jobs.values() {
            self.insert_job_to_db(job)?;
        }

        // Read material snapshots (last occurrence wins)
        let mut materials: HashMap<String, Material> = HashMap::new();
        let mut materials_line_count = 0;

        if materials_path.exists() {
            let file = File::open(&materials_path).context("Failed to open materials.jsonl")?;
            let reader = BufReader::new(file);

            for line in reader.lines() {
                materials_line_count += 1;
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        log::warn!("Failed to read material line {}: {}", materials_line_count, e);
                        continue;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<Material>(&line) {
                    Ok(material) => {
                        materials.insert(material.id.clone(), material);
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to parse material at line {}: {}",
                            materials_line_count,
                            e
                        );
                    }
                }
            }
        }

        for material in materials.values() {
            self.insert_material_to_db(material)?;
        }

        // Update metadata
        self.db.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('jsonl_jobs_lines', ?)",
            params![jobs_line_count.to_string()],
        )?;
        self.db.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('jsonl_materials_lines', ?)",
            params![materials_line_count.to_string()],
        )?;

        Ok(())
    }

    /// Insert a job snapshot into SQLite, replacing all child rows.
    fn insert_job_to_db(&self, job: &Job) -> Result<()> {
        self.db.execute(
            r#"
            INSERT OR REPLACE INTO jobs
                (id, title, job_type, customer_name, customer_phone, location,
                 latitude, longitude, start_date, end_date, lead_id, status,
                 created_at, created_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                job.id,
                job.title,
                job.job_type,
                job.customer_name,
                job.customer_phone,
                job.location,
                job.latitude,
                job.longitude,
                job.start_date.to_string(),
                job.end_date.to_string(),
                job.lead_id,
                job.status.as_str(),
                job.created_at.to_rfc3339(),
                job.created_by,
            ],
        )?;

        // Replace child rows wholesale; the snapshot is authoritative
        self.db
            .execute("DELETE FROM job_techs WHERE job_id = ?", params![job.id])?;
        for (i, tech_id) in job.assigned_techs.iter().enumerate() {
            self.db.execute(
                "INSERT INTO job_techs (job_id, position, tech_id) VALUES (?, ?, ?)",
                params![job.id, i as i64, tech_id],
            )?;
        }

        self.db
            .execute("DELETE FROM tasks WHERE job_id = ?", params![job.id])?;
        self.db
            .execute("DELETE FROM task_updates WHERE job_id = ?", params![job.id])?;
        self.db.execute(
            "DELETE FROM withdrawal_records WHERE job_id = ?",
            params![job.id],
        )?;
        for (pos, task) in job.tasks.iter().enumerate() {
            self.db.execute(
                r#"
                INSERT INTO tasks (job_id, task_id, position, title, description, status)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![
                    job.id,
                    task.id,
                    pos as i64,
                    task.title,
                    task.description,
                    task.status.as_str(),
                ],
            )?;

            for (seq, update) in task.updates.iter().enumerate() {
                self.db.execute(
                    r#"
                    INSERT INTO task_updates
                        (job_id, task_id, seq, message, image_url, updated_by, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        job.id,
                        task.id,
                        seq as i64,
                        update.message,
                        update.image_url,
                        update.updated_by,
                        update.updated_at.to_rfc3339(),
                    ],
                )?;
            }

            for (seq, record) in task.materials.iter().enumerate() {
                self.db.execute(
                    r#"
                    INSERT INTO withdrawal_records
                        (job_id, task_id, seq, material_id, material_name, unit,
                         quantity, withdrawn_by, withdrawn_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        job.id,
                        task.id,
                        seq as i64,
                        record.material_id,
                        record.material_name,
                        record.unit,
                        record.quantity,
                        record.withdrawn_by,
                        record.withdrawn_at.to_rfc3339(),
                    ],
                )?;
            }
        }

        self.db
            .execute("DELETE FROM edit_history WHERE job_id = ?", params![job.id])?;
        for (seq, entry) in job.edit_history.iter().enumerate() {
            self.db.execute(
                r#"
                INSERT INTO edit_history (job_id, seq, admin_name, edited_at, reason, changes)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![
                    job.id,
                    seq as i64,
                    entry.admin_name,
                    entry.edited_at.to_rfc3339(),
                    entry.reason,
                    serde_json::to_string(&entry.changes)?,
                ],
            )?;
        }

        self.db
            .execute("DELETE FROM activity_log WHERE job_id = ?", params![job.id])?;
        for (seq, entry) in job.activity_log.iter().enumerate() {
            self.db.execute(
                r#"
                INSERT INTO activity_log (job_id, seq, kind, actor, message, at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![
                    job.id,
                    seq as i64,
                    entry.kind.as_str(),
                    entry.actor,
                    entry.message,
                    entry.at.to_rfc3339(),
                ],
            )?;
        }

        Ok(())
    }

    /// Insert a material into SQLite.
    fn insert_material_to_db(&self, material: &Material) -> Result<()> {
        self.db.execute(
            r#"
            INSERT OR REPLACE INTO materials (id, name, category, unit, stock)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                material.id,
                material.name,
                material.category,
                material.unit,
                material.stock,
            ],
        )?;

        Ok(())
    }

    /// Append a job snapshot to the JSONL file.
    pub fn append_job(&mut self, job: &Job) -> Result<()> {
        let jobs_path = self.data_path(JOBS_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&jobs_path)
            .context("Failed to open jobs.jsonl for append")?;

        let json = serde_json::to_string(job).context("Failed to serialize job")?;
        writeln!(file, "{}", json).context("Failed to write to jobs.jsonl")?;
        file.sync_all().context("Failed to sync jobs.jsonl")?;

        // Update SQLite cache
        if job.deleted {
            self.remove_job_from_db(&job.id)?;
        } else {
            self.insert_job_to_db(job)?;
        }

        // Update line count
        self.db.execute(
            "UPDATE meta SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT) WHERE key = 'jsonl_jobs_lines'",
            [],
        )?;

        Ok(())
    }

    /// Append material snapshots to the JSONL file in one write, then
    /// update the cache in one transaction. Used by the ledger so a batch
    /// withdrawal lands as a single logical mutation.
    pub fn append_materials(&mut self, batch: &[Material]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let materials_path = self.data_path(MATERIALS_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&materials_path)
            .context("Failed to open materials.jsonl for append")?;

        let mut buf = String::new();
        for material in batch {
            buf.push_str(&serde_json::to_string(material).context("Failed to serialize material")?);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .context("Failed to write to materials.jsonl")?;
        file.sync_all().context("Failed to sync materials.jsonl")?;

        let tx = self
            .db
            .transaction()
            .context("Failed to start materials transaction")?;
        for material in batch {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO materials (id, name, category, unit, stock)
                VALUES (?, ?, ?, ?, ?)
                "#,
                params![
                    material.id,
                    material.name,
                    material.category,
                    material.unit,
                    material.stock,
                ],
            )?;
        }
        tx.execute(
            "UPDATE meta SET value = CAST(CAST(value AS INTEGER) + ? AS TEXT) WHERE key = 'jsonl_materials_lines'",
            params![batch.len() as i64],
        )?;
        tx.commit().context("Failed to commit materials transaction")?;

        Ok(())
    }

    /// Append a single material snapshot.
    pub fn append_material(&mut self, material: &Material) -> Result<()> {
        self.append_materials(std::slice::from_ref(material))
    }

    /// Remove a job and its child rows from the cache (tombstone applied).
    fn remove_job_from_db(&self, job_id: &str) -> Result<()> {
        for table in [
            "job_techs",
            "tasks",
            "task_updates",
            "withdrawal_records",
            "edit_history",
            "activity_log",
            "jobs",
        ] {
            self.db.execute(
                &format!("DELETE FROM {} WHERE {} = ?", table, if table == "jobs" { "id" } else { "job_id" }),
                params![job_id],
            )?;
        }
        Ok(())
    }

    /// Get a job by ID, with all nested collections.
    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let mut stmt = self.db.prepare(
            r#"
            SELECT id, title, job_type, customer_name, customer_phone, location,
                   latitude, longitude, start_date, end_date, lead_id, status,
                   created_at, created_by
            FROM jobs WHERE id = ?
            "#,
        )?;

        let job = stmt.query_row(params![id], Self::row_to_job).optional()?;

        match job {
            Some(mut job) => {
                self.load_job_children(&mut job)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// List all jobs with optional status filter, oldest first.
    pub fn list_jobs(&self, status_filter: Option<JobStatus>) -> Result<Vec<Job>> {
        let sql = match status_filter {
            Some(_) => "SELECT id FROM jobs WHERE status = ? ORDER BY created_at ASC, id ASC",
            None => "SELECT id FROM jobs ORDER BY created_at ASC, id ASC",
        };

        let mut stmt = self.db.prepare(sql)?;
        let ids: Vec<String> = if let Some(status) = status_filter {
            stmt.query_map(params![status.as_str()], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt.query_map([], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_job(&id)? {
                jobs.push(job);
            }
        }

        Ok(jobs)
    }

    /// Jobs whose inclusive date range overlaps [start, end], minus an
    /// optional excluded job. ISO date strings compare lexicographically,
    /// so the overlap test runs directly on the TEXT columns.
    pub fn jobs_overlapping(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        exclude_job: Option<&str>,
    ) -> Result<Vec<Job>> {
        let mut stmt = self.db.prepare(
            r#"
            SELECT id FROM jobs
            WHERE start_date <= ? AND end_date >= ? AND id != COALESCE(?, '')
            ORDER BY start_date ASC, id ASC
            "#,
        )?;

        let ids: Vec<String> = stmt
            .query_map(
                params![end.to_string(), start.to_string(), exclude_job],
                |row| row.get(0),
            )?
            .filter_map(|r| r.ok())
            .collect();

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_job(&id)? {
                jobs.push(job);
            }
        }

        Ok(jobs)
    }

    /// Get a material by ID.
    pub fn get_material(&self, id: &str) -> Result<Option<Material>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, name, category, unit, stock FROM materials WHERE id = ?")?;

        let material = stmt
            .query_row(params![id], Self::row_to_material)
            .optional()?;

        Ok(material)
    }

    /// List the whole material catalog, by id.
    pub fn list_materials(&self) -> Result<Vec<Material>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, name, category, unit, stock FROM materials ORDER BY id ASC")?;

        let materials: Vec<Material> = stmt
            .query_map([], Self::row_to_material)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(materials)
    }

    /// Query activity-log rows across jobs, newest first.
    pub fn query_activity(
        &self,
        job_id: Option<&str>,
        kind: Option<ActivityKind>,
        actor: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityRecord>> {
        let mut sql = String::from(
            "SELECT job_id, kind, actor, message, at FROM activity_log WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(job_id) = job_id {
            sql.push_str(" AND job_id = ?");
            args.push(Box::new(job_id.to_string()));
        }
        if let Some(kind) = kind {
            sql.push_str(" AND kind = ?");
            args.push(Box::new(kind.as_str().to_string()));
        }
        if let Some(actor) = actor {
            sql.push_str(" AND actor = ?");
            args.push(Box::new(actor.to_string()));
        }
        if let Some(since) = since {
            sql.push_str(" AND at >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }

        sql.push_str(" ORDER BY at DESC, job_id ASC, seq DESC");

        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
        }

        let mut stmt = self.db.prepare(&sql)?;
        let records: Vec<ActivityRecord> = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
                let kind_str: String = row.get(1)?;
                let at_str: String = row.get(4)?;
                Ok(ActivityRecord {
                    job_id: row.get(0)?,
                    kind: ActivityKind::normalize(&kind_str)
                        .unwrap_or(ActivityKind::ProgressSubmitted),
                    actor: row.get(2)?,
                    message: row.get(3)?,
                    at: parse_timestamp(&at_str),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// Load the nested collections of a job from their cache tables.
    fn load_job_children(&self, job: &mut Job) -> Result<()> {
        let mut tech_stmt = self
            .db
            .prepare("SELECT tech_id FROM job_techs WHERE job_id = ? ORDER BY position ASC")?;
        job.assigned_techs = tech_stmt
            .query_map(params![job.id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut task_stmt = self.db.prepare(
            r#"
            SELECT task_id, title, description, status
            FROM tasks WHERE job_id = ? ORDER BY position ASC
            "#,
        )?;
        let mut tasks: Vec<Task> = task_stmt
            .query_map(params![job.id], |row| {
                let status_str: String = row.get(3)?;
                Ok(Task {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    status: TaskStatus::normalize(&status_str).unwrap_or(TaskStatus::Pending),
                    updates: vec![],
                    materials: vec![],
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        for task in &mut tasks {
            let mut update_stmt = self.db.prepare(
                r#"
                SELECT message, image_url, updated_by, updated_at
                FROM task_updates WHERE job_id = ? AND task_id = ? ORDER BY seq ASC
                "#,
            )?;
            task.updates = update_stmt
                .query_map(params![job.id, task.id], |row| {
                    let updated_at_str: String = row.get(3)?;
                    Ok(TaskUpdate {
                        message: row.get(0)?,
                        image_url: row.get(1)?,
                        updated_by: row.get(2)?,
                        updated_at: parse_timestamp(&updated_at_str),
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();

            let mut record_stmt = self.db.prepare(
                r#"
                SELECT material_id, material_name, unit, quantity, withdrawn_by, withdrawn_at
                FROM withdrawal_records WHERE job_id = ? AND task_id = ? ORDER BY seq ASC
                "#,
            )?;
            task.materials = record_stmt
                .query_map(params![job.id, task.id], |row| {
                    let withdrawn_at_str: String = row.get(5)?;
                    Ok(MaterialWithdrawal {
                        material_id: row.get(0)?,
                        material_name: row.get(1)?,
                        unit: row.get(2)?,
                        quantity: row.get(3)?,
                        withdrawn_by: row.get(4)?,
                        withdrawn_at: parse_timestamp(&withdrawn_at_str),
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
        }
        job.tasks = tasks;

        let mut edit_stmt = self.db.prepare(
            r#"
            SELECT admin_name, edited_at, reason, changes
            FROM edit_history WHERE job_id = ? ORDER BY seq ASC
            "#,
        )?;
        job.edit_history = edit_stmt
            .query_map(params![job.id], |row| {
                let edited_at_str: String = row.get(1)?;
                let changes_str: String = row.get(3)?;
                Ok(EditEntry {
                    admin_name: row.get(0)?,
                    edited_at: parse_timestamp(&edited_at_str),
                    reason: row.get(2)?,
                    changes: serde_json::from_str(&changes_str).unwrap_or_default(),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut activity_stmt = self.db.prepare(
            r#"
            SELECT kind, actor, message, at
            FROM activity_log WHERE job_id = ? ORDER BY seq ASC
            "#,
        )?;
        job.activity_log = activity_stmt
            .query_map(params![job.id], |row| {
                let kind_str: String = row.get(0)?;
                let at_str: String = row.get(3)?;
                Ok(ActivityEntry {
                    kind: ActivityKind::normalize(&kind_str)
                        .unwrap_or(ActivityKind::ProgressSubmitted),
                    actor: row.get(1)?,
                    message: row.get(2)?,
                    at: parse_timestamp(&at_str),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(())
    }

    /// Convert a database row to a Job shell (children loaded separately).
    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status_str: String = row.get(11)?;
        let start_str: String = row.get(8)?;
        let end_str: String = row.get(9)?;
        let created_at_str: String = row.get(12)?;

        Ok(Job {
            id: row.get(0)?,
            title: row.get(1)?,
            job_type: row.get(2)?,
            customer_name: row.get(3)?,
            customer_phone: row.get(4)?,
            location: row.get(5)?,
            latitude: row.get(6)?,
            longitude: row.get(7)?,
            start_date: parse_date(&start_str),
            end_date: parse_date(&end_str),
            lead_id: row.get(10)?,
            assigned_techs: vec![],
            tasks: vec![],
            status: JobStatus::normalize(&status_str).unwrap_or(JobStatus::New),
            edit_history: vec![],
            activity_log: vec![],
            created_at: parse_timestamp(&created_at_str),
            created_by: row.get(13)?,
            deleted: false,
        })
    }

    /// Convert a database row to a Material.
    fn row_to_material(row: &rusqlite::Row) -> rusqlite::Result<Material> {
        Ok(Material {
            id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            unit: row.get(3)?,
            stock: row.get(4)?,
        })
    }

    fn data_path(&self, file: &str) -> PathBuf {
        self.root.join(FOREMAN_DIR).join(file)
    }
}

/// Parse a stored RFC 3339 timestamp; corrupt rows fall back to now.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a stored ISO date; corrupt rows fall back to the epoch.
fn parse_date(raw: &str) -> NaiveDate {
    raw.parse::<NaiveDate>()
        .unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date"))
}

/// Count lines in a file.
fn count_lines(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path).context("Failed to open file for line count")?;
    let reader = BufReader::new(file);
    Ok(reader.lines().count())
}
