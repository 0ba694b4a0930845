//! Startup KV probe and shutdown drain, wrapping the whole request pipeline.

use std::sync::atomic::{AtomicI64, AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Error;
use crate::kv::KvClient;

pub struct Lifecycle {
    shutting_down: AtomicBool,
    in_flight: AtomicI64,
    drain_deadline: Duration,
}

/// RAII guard decrementing `in_flight` exactly once, on every exit path
/// (success or failure) — the one decrement site the controller requires.
pub struct InFlightGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Lifecycle {
    pub fn new(drain_deadline: Duration) -> Self {
        Self {
            shutting_down: AtomicBool::new(false),
            in_flight: AtomicI64::new(0),
            drain_deadline,
        }
    }

    /// Exponential-backoff probe (1s, 2s, 4s) run once at process startup.
    /// The Embedding and LLM Clients are deliberately not probed here; they
    /// are failure-tolerated at request time instead.
    pub async fn probe_startup(kv: &dyn KvClient) -> Result<(), Error> {
        let delays = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];
        let mut last_error = None;

        for (attempt, delay) in delays.iter().enumerate() {
            match kv.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "KV startup probe failed");
                    last_error = Some(e);
                    if attempt + 1 < delays.len() {
                        tokio::time::sleep(*delay).await;
                    }
                }
            }
        }

        Err(Error::DependencyUnavailable(format!(
            "KV store unreachable after startup probe: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Admission check-and-increment. The flag is read before the counter is
    /// incremented so a request racing shutdown can never slip past.
    pub fn admit(&self) -> Result<InFlightGuard<'_>, Error> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(InFlightGuard { lifecycle: self })
    }

    pub fn in_flight_count(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Sets the shutdown flag, then polls `in_flight` down to zero or the
    /// drain deadline, whichever comes first.
    pub async fn drain(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        info!(in_flight = self.in_flight_count(), "shutdown initiated, draining in-flight requests");

        let deadline = tokio::time::Instant::now() + self.drain_deadline;
        while self.in_flight_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.in_flight_count();
        if remaining > 0 {
            warn!(remaining, "drain deadline elapsed with requests still in flight, exiting anyway");
        } else {
            info!("drain complete, no requests in flight");
        }
    }
}

/// Resolves once either SIGTERM or SIGINT (Ctrl+C) is received.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c");
}

pub type SharedLifecycle = Arc<Lifecycle>;
