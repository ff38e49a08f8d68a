//! # Reachability Prober
//!
//! Answers "is the network actually usable right now?" independently of
//! what the OS reports about the link.
//!
//! ## Probe Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        probe_once(connection_type)                      │
//! │                                                                         │
//! │  deadline = 3s (cellular) | 5s (otherwise)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  HEAD primary ──── ok ────────────────────────────┐                    │
//! │       │                                           │                    │
//! │     fail/timeout                                  │                    │
//! │       ▼                                           ▼                    │
//! │  ┌──────────┬──────────┬──────────┐        failures = 0               │
//! │  │fallback 1│fallback 2│fallback 3│ race   Reachable                   │
//! │  └────┬─────┴────┬─────┴────┬─────┘                                    │
//! │       └── first ok ─────────┴──────────────► (same as above)           │
//! │       │                                                                 │
//! │     all fail                                                            │
//! │       ▼                                                                 │
//! │  failures += 1 ──► Unreachable { failures }                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Loop
//! The periodic loop probes every `interval` and additionally whenever
//! [`ReachabilityProber::trigger`] is called (the store does this when the
//! classifier sees ambiguous reachability). Outcomes go to a [`ProbeSink`],
//! held weakly so a dropped store ends the loop.

use async_trait::async_trait;
use futures_util::future::select_ok;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};
use url::Url;

use tether_core::ConnectionType;

use crate::config::{ProbeSettings, ProbeTargets};
use crate::error::SyncResult;

// =============================================================================
// Probe Errors
// =============================================================================

/// Why a single probe request failed.
///
/// Internal to the prober: these are only ever counted, never surfaced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe to {endpoint} timed out after {after:?}")]
    Timeout { endpoint: String, after: Duration },

    #[error("probe to {endpoint} failed: {reason}")]
    Failure { endpoint: String, reason: String },
}

impl ProbeError {
    pub fn failure(endpoint: &Url, reason: impl ToString) -> Self {
        ProbeError::Failure {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Probe Transport
// =============================================================================

/// One liveness request against one endpoint.
///
/// Implementations do not enforce a deadline; the prober does.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn probe(&self, endpoint: &Url) -> Result<(), ProbeError>;
}

/// HEAD request over HTTP(S).
///
/// Any response below 500 counts as alive: captive portals and auth walls
/// still prove a working path. The body is never read.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    ceiling: Duration,
}

impl HttpProbe {
    /// Creates a probe client. `ceiling` bounds every request even if the
    /// prober's own deadline is longer.
    pub fn new(ceiling: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(ceiling)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(HttpProbe { client, ceiling })
    }
}

#[async_trait]
impl ProbeTransport for HttpProbe {
    async fn probe(&self, endpoint: &Url) -> Result<(), ProbeError> {
        let response = self
            .client
            .head(endpoint.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout {
                        endpoint: endpoint.to_string(),
                        after: self.ceiling,
                    }
                } else {
                    ProbeError::failure(endpoint, e)
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProbeError::failure(endpoint, format!("HTTP {}", status)));
        }

        trace!(endpoint = %endpoint, status = %status, "Probe answered");
        Ok(())
    }
}

// =============================================================================
// Failure Counter
// =============================================================================

/// Consecutive probe failures, shared between the prober and the guard.
#[derive(Debug, Clone, Default)]
pub struct FailureCounter(Arc<AtomicU32>);

impl FailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Adds one failure and returns the new count.
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

// =============================================================================
// Probe Outcome / Sink
// =============================================================================

/// Result of one [`ReachabilityProber::probe_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Some endpoint answered; the failure counter was reset.
    Reachable { endpoint: Url },

    /// Every endpoint failed; `failures` is the new consecutive count.
    Unreachable { failures: u32 },
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable { .. })
    }
}

/// Receiver of periodic probe outcomes (the network state store).
pub trait ProbeSink: Send + Sync {
    /// Transport the next probe should assume (picks the deadline).
    fn connection_type(&self) -> ConnectionType;

    /// Applies a probe result.
    fn apply_probe(&self, outcome: &ProbeOutcome);
}

// =============================================================================
// Reachability Prober
// =============================================================================

/// Issues liveness probes against one primary and several fallback
/// endpoints.
pub struct ReachabilityProber {
    settings: ProbeSettings,
    targets: ProbeTargets,
    transport: Arc<dyn ProbeTransport>,
    failures: FailureCounter,
    wake: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReachabilityProber {
    /// Creates a prober. Fails if an endpoint URL is invalid.
    pub fn new(settings: ProbeSettings, transport: Arc<dyn ProbeTransport>) -> SyncResult<Self> {
        let targets = settings.targets()?;

        Ok(ReachabilityProber {
            settings,
            targets,
            transport,
            failures: FailureCounter::new(),
            wake: Notify::new(),
            task: Mutex::new(None),
        })
    }

    /// The shared consecutive-failure counter.
    pub fn failures(&self) -> &FailureCounter {
        &self.failures
    }

    /// Probes once, updating the failure counter.
    pub async fn probe_once(&self, connection_type: ConnectionType) -> ProbeOutcome {
        let deadline = self.settings.deadline(connection_type.is_cellular());

        let primary = &self.targets.primary;
        let reached = match self.probe_with_deadline(primary, deadline).await {
            Ok(()) => Some(primary.clone()),
            Err(e) => {
                debug!(error = %e, "Primary probe failed, racing fallbacks");
                self.race_fallbacks(deadline).await
            }
        };

        match reached {
            Some(endpoint) => {
                self.failures.reset();
                trace!(endpoint = %endpoint, "Network reachable");
                ProbeOutcome::Reachable { endpoint }
            }
            None => {
                let failures = self.failures.increment();
                debug!(
                    failures,
                    connection = %connection_type,
                    "All probe endpoints failed"
                );
                ProbeOutcome::Unreachable { failures }
            }
        }
    }

    /// Requests an immediate probe from the running loop.
    ///
    /// A trigger with no running loop is kept and served once the loop
    /// starts.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Starts the periodic loop. No-op if already running.
    pub fn start_periodic(self: &Arc<Self>, sink: Weak<dyn ProbeSink>) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        info!(
            interval_secs = self.settings.interval_secs,
            fallbacks = self.targets.fallbacks.len(),
            "Starting reachability prober"
        );

        let prober = Arc::clone(self);
        *task = Some(tokio::spawn(async move { prober.run(sink).await }));
    }

    /// Stops the periodic loop. Idempotent.
    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            info!("Reachability prober stopped");
        }
    }

    /// Returns true while the periodic loop is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    async fn run(self: Arc<Self>, sink: Weak<dyn ProbeSink>) {
        let period = self.settings.interval();
        // First periodic probe one period from now; startup probes come
        // through trigger()
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {
                    trace!("Probe triggered");
                }
            }

            let Some(sink) = sink.upgrade() else {
                debug!("Probe sink dropped, prober exiting");
                break;
            };

            let outcome = self.probe_once(sink.connection_type()).await;
            sink.apply_probe(&outcome);
        }
    }

    async fn probe_with_deadline(
        &self,
        endpoint: &Url,
        deadline: Duration,
    ) -> Result<(), ProbeError> {
        match tokio::time::timeout(deadline, self.transport.probe(endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                endpoint: endpoint.to_string(),
                after: deadline,
            }),
        }
    }

    async fn race_fallbacks(&self, deadline: Duration) -> Option<Url> {
        if self.targets.fallbacks.is_empty() {
            return None;
        }

        type Attempt<'a> = Pin<Box<dyn Future<Output = Result<Url, ProbeError>> + Send + 'a>>;

        let attempts: Vec<Attempt<'_>> = self
            .targets
            .fallbacks
            .iter()
            .map(|endpoint| {
                Box::pin(async move {
                    self.probe_with_deadline(endpoint, deadline)
                        .await
                        .map(|()| endpoint.clone())
                }) as Attempt<'_>
            })
            .collect();

        match select_ok(attempts).await {
            Ok((endpoint, _rest)) => Some(endpoint),
            Err(last) => {
                debug!(error = %last, "Fallback race lost");
                None
            }
        }
    }
}

impl Drop for ReachabilityProber {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().ok().and_then(Option::take) {
            task.abort();
        }
    }
}
