//! Client for connecting to the work-order daemon.

use crate::builder::{JobDraft, JobPatch};
use crate::daemon::{DaemonConfig, is_daemon_running, start_daemon};
use crate::protocol::{Request, Response, WithdrawalLine};
use crate::types::{Actor, Job, JobStatus, Material, MaterialWithdrawal, Worker};
use chrono::NaiveDate;
use eyre::{Context, Result, bail};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client for communicating with the work-order daemon.
pub struct Client {
    root: PathBuf,
    stream: UnixStream,
}

impl Client {
    /// Connect to the daemon, optionally auto-starting it if not running.
    pub fn connect(root: &Path, auto_start: bool) -> Result<Self> {
        let config = DaemonConfig::new(root);
        let socket_path = config.socket_path();

        // Try to connect, auto-start if needed
        let stream = match UnixStream::connect(&socket_path) {
            Ok(stream) => stream,
            Err(_) if auto_start => {
                if !is_daemon_running(root) {
                    start_daemon(root).context("Failed to auto-start daemon")?;

                    // Wait for daemon to be ready
                    let mut attempts = 0;
                    loop {
                        if attempts > 20 {
                            bail!("Daemon failed to start in time");
                        }
                        std::thread::sleep(Duration::from_millis(50));
                        if let Ok(stream) = UnixStream::connect(&socket_path) {
                            break stream;
                        }
                        attempts += 1;
                    }
                } else {
                    UnixStream::connect(&socket_path).context("Failed to connect to daemon")?
                }
            }
            Err(e) => {
                bail!("Failed to connect to daemon: {}. Is it running?", e);
            }
        };

        // Set read timeout
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .context("Failed to set read timeout")?;

        Ok(Self {
            root: root.to_path_buf(),
            stream,
        })
    }

    /// Get the store root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Send a request and receive a response.
    fn request(&mut self, request: Request) -> Result<Response> {
        let request_json = serde_json::to_string(&request)?;
        writeln!(self.stream, "{}", request_json)?;
        self.stream.flush()?;

        let mut reader = BufReader::new(&self.stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line)?;

        let response: Response = serde_json::from_str(&response_line)?;
        Ok(response)
    }

    /// Send a request, expecting a job back.
    fn request_job(&mut self, request: Request) -> Result<Job> {
        match self.request(request)? {
            Response::Job { job } => Ok(job),
            Response::NotFound { id } => bail!("job not found: {}", id),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Create a new job.
    pub fn create_job(&mut self, draft: JobDraft, actor: &Actor) -> Result<Job> {
        self.request_job(Request::CreateJob {
            draft,
            actor: actor.clone(),
        })
    }

    /// Patch a job's administrative fields. Returns `(job, changed)`;
    /// `changed == false` means the patch matched stored values.
    pub fn update_job(
        &mut self,
        job_id: &str,
        patch: JobPatch,
        reason: &str,
        actor: &Actor,
    ) -> Result<(Job, bool)> {
        let response = self.request(Request::UpdateJob {
            job_id: job_id.to_string(),
            patch,
            reason: reason.to_string(),
            actor: actor.clone(),
        })?;

        match response {
            Response::Job { job } => Ok((job, true)),
            Response::NoChange { job } => Ok((job, false)),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Delete a job.
    pub fn delete_job(&mut self, job_id: &str, reason: &str, actor: &Actor) -> Result<()> {
        match self.request(Request::DeleteJob {
            job_id: job_id.to_string(),
            reason: reason.to_string(),
            actor: actor.clone(),
        })? {
            Response::Ok => Ok(()),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Leader acknowledgement.
    pub fn acknowledge(&mut self, job_id: &str, actor: &Actor) -> Result<Job> {
        self.request_job(Request::Acknowledge {
            job_id: job_id.to_string(),
            actor: actor.clone(),
        })
    }

    /// Set a job's status directly.
    pub fn set_job_status(&mut self, job_id: &str, status: JobStatus, actor: &Actor) -> Result<Job> {
        self.request_job(Request::SetJobStatus {
            job_id: job_id.to_string(),
            status,
            actor: actor.clone(),
        })
    }

    /// Append a task to the pipeline.
    pub fn add_task(
        &mut self,
        job_id: &str,
        title: &str,
        description: Option<&str>,
        actor: &Actor,
    ) -> Result<Job> {
        self.request_job(Request::AddTask {
            job_id: job_id.to_string(),
            title: title.to_string(),
            description: description.map(String::from),
            actor: actor.clone(),
        })
    }

    /// Bind a leader.
    pub fn assign_lead(&mut self, job_id: &str, lead_id: &str, actor: &Actor) -> Result<Job> {
        self.request_job(Request::AssignLead {
            job_id: job_id.to_string(),
            lead_id: lead_id.to_string(),
            actor: actor.clone(),
        })
    }

    /// Bind the technician set.
    pub fn assign_techs(&mut self, job_id: &str, tech_ids: &[String], actor: &Actor) -> Result<Job> {
        self.request_job(Request::AssignTechs {
            job_id: job_id.to_string(),
            tech_ids: tech_ids.to_vec(),
            actor: actor.clone(),
        })
    }

    /// Approve a task.
    pub fn advance(&mut self, job_id: &str, task_id: &str, actor: &Actor) -> Result<Job> {
        self.request_job(Request::Advance {
            job_id: job_id.to_string(),
            task_id: task_id.to_string(),
            actor: actor.clone(),
        })
    }

    /// Reject a task back to pending.
    pub fn reject(
        &mut self,
        job_id: &str,
        task_id: &str,
        reason: &str,
        image_url: Option<&str>,
        actor: &Actor,
    ) -> Result<Job> {
        self.request_job(Request::Reject {
            job_id: job_id.to_string(),
            task_id: task_id.to_string(),
            reason: reason.to_string(),
            image_url: image_url.map(String::from),
            actor: actor.clone(),
        })
    }

    /// Append a progress update to a task.
    pub fn submit_progress(
        &mut self,
        job_id: &str,
        task_id: &str,
        message: &str,
        image_url: Option<&str>,
        actor: &Actor,
    ) -> Result<Job> {
        self.request_job(Request::SubmitProgress {
            job_id: job_id.to_string(),
            task_id: task_id.to_string(),
            message: message.to_string(),
            image_url: image_url.map(String::from),
            actor: actor.clone(),
        })
    }

    /// Withdraw materials for a task, all-or-nothing.
    pub fn withdraw(
        &mut self,
        job_id: &str,
        task_id: &str,
        lines: Vec<WithdrawalLine>,
        actor: &Actor,
    ) -> Result<Vec<MaterialWithdrawal>> {
        match self.request(Request::Withdraw {
            job_id: job_id.to_string(),
            task_id: task_id.to_string(),
            lines,
            actor: actor.clone(),
        })? {
            Response::Records { records } => Ok(records),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Get a job by ID.
    pub fn get_job(&mut self, job_id: &str) -> Result<Option<Job>> {
        match self.request(Request::GetJob {
            job_id: job_id.to_string(),
        })? {
            Response::Job { job } => Ok(Some(job)),
            Response::NotFound { .. } => Ok(None),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// List jobs with optional status filter.
    pub fn list_jobs(&mut self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        match self.request(Request::ListJobs { status })? {
            Response::Jobs { jobs } => Ok(jobs),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Resolve available candidates for a date range.
    pub fn available(
        &mut self,
        candidates: Vec<Worker>,
        start: NaiveDate,
        end: NaiveDate,
        exclude_job: Option<&str>,
    ) -> Result<Vec<Worker>> {
        match self.request(Request::Available {
            candidates,
            start,
            end,
            exclude_job: exclude_job.map(String::from),
        })? {
            Response::Workers { workers } => Ok(workers),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Add or replace a catalog material.
    pub fn add_material(&mut self, material: Material) -> Result<Material> {
        match self.request(Request::AddMaterial { material })? {
            Response::Material { material } => Ok(material),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// List the material catalog.
    pub fn list_materials(&mut self) -> Result<Vec<Material>> {
        match self.request(Request::ListMaterials)? {
            Response::Materials { materials } => Ok(materials),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Force flush pending writes.
    pub fn flush(&mut self) -> Result<()> {
        match self.request(Request::Flush)? {
            Response::Ok => Ok(()),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Shutdown the daemon.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.request(Request::Shutdown)? {
            Response::Ok => Ok(()),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }

    /// Ping the daemon.
    pub fn ping(&mut self) -> Result<()> {
        match self.request(Request::Ping)? {
            Response::Pong => Ok(()),
            Response::Error { message } => bail!("{}", message),
            _ => bail!("Unexpected response"),
        }
    }
}
