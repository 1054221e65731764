//! # egd-daemon
//!
//! The daemon half of EGD: owns the entropy pool and the source set,
//! ticks sources on their intervals, persists the pool in the background,
//! serves the loopback control protocol and guards against a second
//! instance with a lock file.
//!
//! [`run`] is the whole lifecycle: acquire the lock, load or create the
//! pool, bind the control port, schedule cycles until a termination
//! signal or a `quit` command arrives, then persist one final time and
//! release the lock. A failed final persist is the only unclean exit.

pub mod control;
pub mod lockfile;
pub mod scheduler;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use egd_core::config::Config;
use egd_core::error::{codes, Component, EgdError};
use egd_core::pool::EntropyPool;
use egd_core::source::SourceState;

/// One scheduled source: its state plus an in-flight marker that keeps
/// cycles for the same source serialized.
pub struct SourceRunner {
    pub state: Mutex<SourceState>,
    pub running: AtomicBool,
}

/// Shared state of a running daemon.
pub struct DaemonContext {
    pub config: Config,
    pub pool: RwLock<EntropyPool>,
    pub sources: Vec<SourceRunner>,
    pub started_at: Instant,
    last_persist_instant: Mutex<Instant>,
    last_persist_wall: Mutex<Option<SystemTime>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Result of one successful persist, echoed on the control channel.
#[derive(Debug, Clone)]
pub struct PersistReceipt {
    pub bytes_written: u64,
    pub file_path: PathBuf,
    pub persist_time: SystemTime,
}

impl DaemonContext {
    pub fn new(config: Config, pool: EntropyPool) -> Arc<Self> {
        let started_at = Instant::now();
        let sources = config
            .enabled_sources()
            .cloned()
            .map(|spec| SourceRunner {
                state: Mutex::new(SourceState::new(spec, started_at)),
                running: AtomicBool::new(false),
            })
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            pool: RwLock::new(pool),
            sources,
            started_at,
            last_persist_instant: Mutex::new(started_at),
            last_persist_wall: Mutex::new(None),
            shutdown_tx,
        })
    }

    /// Flip the daemon into shutdown; idempotent.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// A receiver that resolves once shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Wall-clock time of the last successful persist, if any.
    pub fn last_persist(&self) -> Option<SystemTime> {
        *self.last_persist_wall.lock().unwrap()
    }

    /// Snapshot the pool under the read lock and write the image without
    /// holding any pool lock during disk I/O.
    pub async fn persist_now(&self) -> Result<PersistReceipt, EgdError> {
        let snapshot = self.pool.read().await.snapshot();
        let bytes_written = snapshot.write_to(&self.config.persist_file)?;

        let persist_time = SystemTime::now();
        *self.last_persist_instant.lock().unwrap() = Instant::now();
        *self.last_persist_wall.lock().unwrap() = Some(persist_time);

        info!(
            bytes = bytes_written,
            file = %self.config.persist_file.display(),
            "pool persisted"
        );
        Ok(PersistReceipt {
            bytes_written,
            file_path: self.config.persist_file.clone(),
            persist_time,
        })
    }

    /// Whether the background watcher should persist now. Only successful
    /// persists advance the reference instant, so a failed attempt is
    /// retried on the next tick.
    pub(crate) fn persist_due(&self, now: Instant) -> bool {
        now >= *self.last_persist_instant.lock().unwrap() + self.config.persist_interval
    }
}

/// Run the daemon to completion.
pub async fn run(config: Config, force: bool) -> Result<(), EgdError> {
    let lock = lockfile::LockFile::acquire(&config.lock_path(), force)?;
    let pool = open_pool(&config)?;
    let listener = control::bind(config.tcp_port).await?;

    info!(
        version = egd_core::VERSION,
        port = config.tcp_port,
        persist_file = %config.persist_file.display(),
        sources = config.sources.len(),
        pool_bytes = pool.total_bytes(),
        "daemon starting"
    );

    let ctx = DaemonContext::new(config, pool);

    let control_task = tokio::spawn(control::serve(listener, ctx.clone()));
    let persist_task = tokio::spawn(scheduler::persist_watcher(ctx.clone()));
    spawn_signal_listener(ctx.clone());

    scheduler::run(ctx.clone()).await;

    // Both stop on the same shutdown signal the scheduler observed.
    let _ = control_task.await;
    let _ = persist_task.await;

    let result = match ctx.persist_now().await {
        Ok(_) => Ok(()),
        Err(err) => Err(EgdError::fatal(
            Component::Scheduler,
            codes::FINAL_PERSIST_FAILED,
            "final persist failed",
        )
        .with_cause(err)),
    };

    lock.release();
    match &result {
        Ok(()) => info!("daemon stopped"),
        Err(err) => error!(error = %err, "daemon stopped uncleanly"),
    }
    result
}

/// Load the persisted pool when present, otherwise start empty. A corrupt
/// pool file is fatal; it is never silently replaced.
fn open_pool(config: &Config) -> Result<EntropyPool, EgdError> {
    if !config.persist_file.exists() {
        return Ok(EntropyPool::new(
            config.max_entropy,
            config.pool_chunk_max_entropy as usize,
        ));
    }

    let pool = EntropyPool::load(&config.persist_file)?;
    if pool.max_total_bytes() != config.max_entropy
        || pool.chunk_capacity() as u64 != config.pool_chunk_max_entropy
    {
        warn!(
            file_max = pool.max_total_bytes(),
            config_max = config.max_entropy,
            file_chunk = pool.chunk_capacity(),
            config_chunk = config.pool_chunk_max_entropy,
            "pool file geometry differs from configuration; keeping the persisted geometry"
        );
    }
    info!(
        bytes = pool.total_bytes(),
        chunks = pool.chunk_count(),
        "loaded persisted pool"
    );
    Ok(pool)
}

fn spawn_signal_listener(ctx: Arc<DaemonContext>) {
    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown_signal();
        tokio::select! {
            _ = wait_for_termination() => {
                info!("termination signal received");
                ctx.begin_shutdown();
            }
            _ = shutdown.wait_for(|v| *v) => {}
        }
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
