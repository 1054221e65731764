//! Source runtime state and the per-cycle pipeline.
//!
//! A cycle is one fetch -> compress -> stir -> scale -> deposit pass. Any
//! failure increments the consecutive-failure counter and a successful
//! deposit resets it; at five consecutive failures the source is disabled
//! until the process restarts. Readiness combines the per-source interval
//! with the configured initial delay.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clock;
use crate::compress;
use crate::config::{SourceSpec, DISABLE_THRESHOLD};
use crate::error::EgdError;
use crate::pool::EntropyPool;
use crate::sources;
use crate::stir;

/// Where a source currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePhase {
    Idle,
    Fetching,
    Processing,
    Disabled,
}

/// Runtime state of one configured source.
pub struct SourceState {
    pub spec: SourceSpec,
    pub phase: SourcePhase,
    /// Monotonic instant of the last cycle start, for readiness checks.
    pub last_attempt: Option<Instant>,
    /// Wall-clock mirrors of the attempt/success instants, for reports.
    pub last_attempt_at: Option<SystemTime>,
    pub last_success_at: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub disabled: bool,
    pub first_run_deadline: Instant,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub bytes_deposited: u64,
    pub last_error: Option<String>,
}

impl SourceState {
    pub fn new(spec: SourceSpec, start: Instant) -> Self {
        let first_run_deadline = start + spec.init_delay.unwrap_or(Duration::ZERO);
        let disabled = spec.disabled();
        Self {
            spec,
            phase: if disabled { SourcePhase::Disabled } else { SourcePhase::Idle },
            last_attempt: None,
            last_attempt_at: None,
            last_success_at: None,
            consecutive_failures: 0,
            disabled,
            first_run_deadline,
            cycles_ok: 0,
            cycles_failed: 0,
            bytes_deposited: 0,
            last_error: None,
        }
    }

    /// Whether the scheduler should dispatch a cycle now.
    pub fn is_ready(&self, now: Instant) -> bool {
        if self.disabled || now < self.first_run_deadline {
            return false;
        }
        match self.last_attempt {
            Some(last) => now >= last + self.spec.interval,
            None => true,
        }
    }

    fn record_success(&mut self, deposited: usize) {
        self.phase = SourcePhase::Idle;
        self.consecutive_failures = 0;
        self.cycles_ok += 1;
        self.bytes_deposited += deposited as u64;
        self.last_success_at = Some(SystemTime::now());
        self.last_error = None;
    }

    fn record_failure(&mut self, err: &EgdError) {
        self.cycles_failed += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(err.to_string());
        if self.consecutive_failures >= DISABLE_THRESHOLD {
            self.disabled = true;
            self.phase = SourcePhase::Disabled;
            warn!(
                source = %self.spec.name,
                failures = self.consecutive_failures,
                "source disabled until restart"
            );
        } else {
            self.phase = SourcePhase::Idle;
        }
    }

    /// Structured report for the control channel.
    pub fn report(&self) -> SourceReport {
        SourceReport {
            name: self.spec.name.clone(),
            method: self.spec.acquisition().kind(),
            phase: self.phase,
            interval: humantime::format_duration(self.spec.interval).to_string(),
            scale: self.spec.scale,
            disabled: self.disabled,
            consecutive_failures: self.consecutive_failures,
            cycles_ok: self.cycles_ok,
            cycles_failed: self.cycles_failed,
            bytes_deposited: self.bytes_deposited,
            last_attempt: self.last_attempt_at.map(clock::format_iso8601),
            last_success: self.last_success_at.map(clock::format_iso8601),
            last_error: self.last_error.clone(),
        }
    }
}

/// Wire representation of a source's runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub method: &'static str,
    pub phase: SourcePhase,
    pub interval: String,
    pub scale: f64,
    pub disabled: bool,
    pub consecutive_failures: u32,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub bytes_deposited: u64,
    pub last_attempt: Option<String>,
    pub last_success: Option<String>,
    pub last_error: Option<String>,
}

/// Run one full cycle for `state`, depositing into `pool`.
///
/// The state mutex is only held across phase bookkeeping, never across an
/// await point; the daemon serializes cycles per source, so the spec
/// observed at cycle start stays authoritative for the whole cycle.
pub async fn run_cycle(state: &Mutex<SourceState>, pool: &RwLock<EntropyPool>) {
    let spec = {
        let mut s = state.lock().unwrap();
        s.phase = SourcePhase::Fetching;
        s.last_attempt = Some(Instant::now());
        s.last_attempt_at = Some(SystemTime::now());
        s.spec.clone()
    };

    let outcome = cycle_pipeline(&spec, state, pool).await;

    let mut s = state.lock().unwrap();
    match outcome {
        Ok(deposited) => {
            debug!(source = %spec.name, deposited, "cycle complete");
            s.record_success(deposited);
        }
        Err(err) => {
            warn!(source = %spec.name, error = %err, "cycle failed");
            s.record_failure(&err);
        }
    }
}

async fn cycle_pipeline(
    spec: &SourceSpec,
    state: &Mutex<SourceState>,
    pool: &RwLock<EntropyPool>,
) -> Result<usize, EgdError> {
    let raw = sources::fetch(spec).await?;
    debug!(source = %spec.name, bytes = raw.len(), "fetched sample");
    state.lock().unwrap().phase = SourcePhase::Processing;

    let material = if spec.no_compress() {
        raw
    } else {
        compress::compress(&raw)
    };
    let stirred = stir::stir(&material);
    let scaled_count = (spec.scale * stirred.len() as f64).floor() as usize;

    let deposited = pool.write().await.deposit(&stirred[..scaled_count]);
    Ok(deposited)
}
