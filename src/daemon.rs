//! Background daemon for concurrent access to the work-order store.
//!
//! The daemon provides:
//! - Linearization (one request loop owns the only open store, so every
//!   mutation is serialized per process boundary)
//! - Lock management (single writer prevents JSONL corruption)
//! - Domain event delivery through the configured notification port

use crate::availability::resolve_available;
use crate::events::{LogNotifier, NotificationPort, dispatch};
use crate::ledger::StoreLedgerExt;
use crate::pipeline::StorePipelineExt;
use crate::protocol::{Request, Response};
use crate::store::{Store, UpdateOutcome};
use eyre::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Socket file name within the .foreman directory.
const SOCKET_FILE: &str = "daemon.sock";

/// PID file name within the .foreman directory.
const PID_FILE: &str = "daemon.pid";

/// Default flush interval in milliseconds.
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

/// Configuration for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root directory containing .foreman
    pub root: PathBuf,

    /// Flush interval for pending writes
    pub flush_interval: Duration,
}

impl DaemonConfig {
    /// Create config with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
        }
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.root.join(".foreman").join(SOCKET_FILE)
    }

    /// Get the PID file path.
    pub fn pid_path(&self) -> PathBuf {
        self.root.join(".foreman").join(PID_FILE)
    }
}

/// The work-order daemon.
pub struct Daemon {
    config: DaemonConfig,
    store: Store,
    notifier: Box<dyn NotificationPort + Send>,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Create a new daemon instance with the default log notifier.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        Self::with_notifier(config, Box::new(LogNotifier))
    }

    /// Create a daemon that delivers events through the given port.
    pub fn with_notifier(
        config: DaemonConfig,
        notifier: Box<dyn NotificationPort + Send>,
    ) -> Result<Self> {
        let store = Store::open(&config.root).context("Failed to open store")?;

        Ok(Self {
            config,
            store,
            notifier,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get a shutdown handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the daemon (blocking).
    pub async fn run(&mut self) -> Result<()> {
        // Clean up any stale socket
        let socket_path = self.config.socket_path();
        if socket_path.exists() {
            fs::remove_file(&socket_path).ok();
        }

        // Write PID file
        let pid_path = self.config.pid_path();
        fs::write(&pid_path, std::process::id().to_string()).context("Failed to write PID file")?;

        // Create Unix socket listener
        let listener = UnixListener::bind(&socket_path).context("Failed to bind to Unix socket")?;
        listener
            .set_nonblocking(true)
            .context("Failed to set socket to non-blocking")?;

        log::info!("Daemon listening on {:?}", socket_path);

        // Create channel for client requests
        let (tx, mut rx) = mpsc::channel::<(Request, mpsc::Sender<Response>)>(100);

        // Spawn connection acceptor task
        let shutdown_flag = Arc::clone(&self.shutdown);
        let tx_clone = tx.clone();
        tokio::spawn(async move {
            Self::accept_connections(listener, tx_clone, shutdown_flag).await;
        });

        // Main event loop: requests drain one at a time, which is the
        // linearization guarantee for job and ledger mutations
        let mut flush_interval = interval(self.config.flush_interval);

        loop {
            tokio::select! {
                // Handle incoming request
                Some((request, response_tx)) = rx.recv() => {
                    let response = self.handle_request(request);
                    let _ = response_tx.send(response).await;
                }

                // Periodic flush (writes are currently immediate)
                _ = flush_interval.tick() => {}
            }

            // Check shutdown flag
            if self.shutdown.load(Ordering::Relaxed) {
                log::info!("Daemon shutting down");
                break;
            }
        }

        // Cleanup
        fs::remove_file(&socket_path).ok();
        fs::remove_file(&pid_path).ok();

        Ok(())
    }

    /// Accept connections in a background task.
    async fn accept_connections(
        listener: UnixListener,
        tx: mpsc::Sender<(Request, mpsc::Sender<Response>)>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Try to accept connection with a small delay to allow checking shutdown
            match listener.accept() {
                Ok((stream, _)) => {
                    let tx_clone = tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, tx_clone).await {
                            log::warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No pending connections, sleep briefly
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle a single client connection.
    async fn handle_connection(
        stream: UnixStream,
        tx: mpsc::Sender<(Request, mpsc::Sender<Response>)>,
    ) -> Result<()> {
        stream.set_nonblocking(false)?;

        let reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;

        for line in reader.lines() {
            let line = line.context("Failed to read line")?;
            if line.is_empty() {
                continue;
            }

            let request: Request = serde_json::from_str(&line).context("Failed to parse request")?;

            // Check for shutdown request
            let is_shutdown = matches!(request, Request::Shutdown);

            // Send to main loop and wait for response
            let (resp_tx, mut resp_rx) = mpsc::channel(1);
            tx.send((request, resp_tx))
                .await
                .context("Failed to send request to daemon")?;

            if let Some(response) = resp_rx.recv().await {
                let response_json = serde_json::to_string(&response)?;
                writeln!(writer, "{}", response_json)?;
                writer.flush()?;
            }

            if is_shutdown {
                break;
            }
        }

        Ok(())
    }

    /// Handle a single request. Domain events from successful mutations
    /// are dispatched here, after commit, so a notification failure can
    /// never fail the mutation.
    fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::CreateJob { draft, actor } => match self.store.create_job(draft, &actor) {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::UpdateJob {
                job_id,
                patch,
                reason,
                actor,
            } => match self.store.update_job(&job_id, patch, &reason, &actor) {
                Ok(UpdateOutcome::Updated(m)) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Ok(UpdateOutcome::NoChange(job)) => Response::NoChange { job },
                Err(e) => Response::error(e.to_string()),
            },

            Request::DeleteJob {
                job_id,
                reason,
                actor,
            } => match self.store.delete_job(&job_id, &reason, &actor) {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Ok
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::Acknowledge { job_id, actor } => match self.store.acknowledge(&job_id, &actor) {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::SetJobStatus {
                job_id,
                status,
                actor,
            } => match self.store.set_job_status(&job_id, status, &actor) {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::AddTask {
                job_id,
                title,
                description,
                actor,
            } => match self
                .store
                .add_task(&job_id, &title, description.as_deref(), &actor)
            {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::AssignLead {
                job_id,
                lead_id,
                actor,
            } => match self.store.assign_lead(&job_id, &lead_id, &actor) {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::AssignTechs {
                job_id,
                tech_ids,
                actor,
            } => match self.store.assign_techs(&job_id, &tech_ids, &actor) {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::Advance {
                job_id,
                task_id,
                actor,
            } => match self.store.advance(&job_id, &task_id, &actor) {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::Reject {
                job_id,
                task_id,
                reason,
                image_url,
                actor,
            } => match self
                .store
                .reject(&job_id, &task_id, &actor, &reason, image_url.as_deref())
            {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::SubmitProgress {
                job_id,
                task_id,
                message,
                image_url,
                actor,
            } => match self.store.submit_progress(
                &job_id,
                &task_id,
                &actor,
                &message,
                image_url.as_deref(),
            ) {
                Ok(m) => {
                    dispatch(self.notifier.as_ref(), &m.events);
                    Response::Job { job: m.value }
                }
                Err(e) => Response::error(e.to_string()),
            },

            Request::Withdraw {
                job_id,
                task_id,
                lines,
                actor,
            } => {
                let requests: Vec<_> = lines.into_iter().map(Into::into).collect();
                match self.store.withdraw(&job_id, &task_id, &requests, &actor) {
                    Ok(m) => {
                        dispatch(self.notifier.as_ref(), &m.events);
                        Response::Records { records: m.value }
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }

            Request::GetJob { job_id } => match self.store.get_job(&job_id) {
                Ok(Some(job)) => Response::Job { job },
                Ok(None) => Response::NotFound { id: job_id },
                Err(e) => Response::error(e.to_string()),
            },

            Request::ListJobs { status } => match self.store.list_jobs(status) {
                Ok(jobs) => Response::Jobs { jobs },
                Err(e) => Response::error(e.to_string()),
            },

            Request::Available {
                candidates,
                start,
                end,
                exclude_job,
            } => match self.store.list_jobs(None) {
                Ok(jobs) => Response::Workers {
                    workers: resolve_available(
                        &candidates,
                        start,
                        end,
                        &jobs,
                        exclude_job.as_deref(),
                    ),
                },
                Err(e) => Response::error(e.to_string()),
            },

            Request::AddMaterial { material } => match self.store.add_material(material) {
                Ok(material) => Response::Material { material },
                Err(e) => Response::error(e.to_string()),
            },

            Request::ListMaterials => match self.store.list_materials() {
                Ok(materials) => Response::Materials { materials },
                Err(e) => Response::error(e.to_string()),
            },

            Request::Flush => {
                // Writes are immediate; kept for protocol compatibility
                Response::Ok
            }

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Response::Ok
            }

            Request::Ping => Response::Pong,
        }
    }
}

/// Check if a daemon is running for the given store path.
pub fn is_daemon_running(root: &Path) -> bool {
    let config = DaemonConfig::new(root);
    let socket_path = config.socket_path();
    let pid_path = config.pid_path();

    // Check if socket exists
    if !socket_path.exists() {
        return false;
    }

    // Check if PID file exists and process is alive
    if let Ok(pid_str) = fs::read_to_string(&pid_path)
        && let Ok(pid) = pid_str.trim().parse::<i32>()
    {
        // Check if process exists (signal 0 doesn't send a signal but checks existence)
        unsafe {
            if libc::kill(pid, 0) == 0 {
                return true;
            }
        }
    }

    // Stale socket, clean up
    fs::remove_file(&socket_path).ok();
    fs::remove_file(&pid_path).ok();
    false
}

/// Start the daemon as a background process.
pub fn start_daemon(root: &Path) -> Result<()> {
    use std::process::Command;

    // Get the path to the current executable
    let exe = std::env::current_exe().context("Failed to get current executable")?;

    // Start daemon in background
    Command::new(exe)
        .args(["--dir", root.to_str().unwrap_or("."), "daemon"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;

    // Wait a bit for daemon to start
    std::thread::sleep(Duration::from_millis(100));

    Ok(())
}
