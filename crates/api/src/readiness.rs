//! Background readiness waits, one owned task per preview namespace.
//!
//! A wait is started after a successful preview and never blocks the command that
//! started it. Its state is observable through [`ReadinessTracker::state`]; deleting
//! the namespace cancels it, and starting a new wait for the same namespace replaces
//! the old one. Finished waits are kept for a retention period so status can report
//! them, then evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use previews_core::ReadinessState;
use previews_ops::{deadline_after, ClusterGateway, WaitOutcome};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct TrackedWait {
    id: u64,
    token: CancellationToken,
    state: ReadinessState,
    handle: Option<JoinHandle<()>>,
    finished_at: Option<Instant>,
}

struct Registry {
    next_id: u64,
    retention: Duration,
    waits: HashMap<String, TrackedWait>,
}

impl Registry {
    /// Mark waits whose task died as failed, then drop finished waits older than
    /// the retention period.
    fn evict_expired(&mut self, now: Instant) {
        for (ns, w) in self.waits.iter_mut() {
            let died = !w.state.is_terminal() && w.handle.as_ref().map_or(false, |h| h.is_finished());
            if died {
                warn!(namespace = %ns, "readiness: task ended without an outcome");
                w.state = ReadinessState::Failed { message: "readiness task ended without an outcome".to_string() };
                w.finished_at = Some(now);
            }
        }
        let retention = self.retention;
        let before = self.waits.len();
        self.waits.retain(|_, w| match w.finished_at {
            Some(t) => now.saturating_duration_since(t) < retention,
            None => true,
        });
        let evicted = before - self.waits.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.waits.len(), "readiness: evicted finished waits");
        }
    }
}

/// How long a finished wait stays visible.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);

#[derive(Clone)]
pub struct ReadinessTracker {
    inner: Arc<Mutex<Registry>>,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

fn state_label(state: &ReadinessState) -> &'static str {
    match state {
        ReadinessState::Pending => "pending",
        ReadinessState::Ready => "ready",
        ReadinessState::TimedOut => "timed_out",
        ReadinessState::Failed { .. } => "failed",
        ReadinessState::Cancelled => "cancelled",
    }
}

/// Wait for every workload under one shared deadline.
async fn wait_all(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    workloads: &[String],
    timeout: Duration,
    poll: Duration,
) -> ReadinessState {
    let deadline = deadline_after(timeout);
    for w in workloads {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match gateway.wait_for_ready(namespace, w, remaining, poll).await {
            Ok(WaitOutcome::Ready) => continue,
            Ok(WaitOutcome::TimedOut) => return ReadinessState::TimedOut,
            Err(e) => return ReadinessState::Failed { message: format!("{:#}", e) },
        }
    }
    ReadinessState::Ready
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        let reg = Registry { next_id: 0, retention, waits: HashMap::new() };
        Self { inner: Arc::new(Mutex::new(reg)) }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start waiting for `workloads` in `namespace`, replacing any earlier wait there.
    pub fn track(
        &self,
        namespace: &str,
        gateway: Arc<dyn ClusterGateway>,
        workloads: Vec<String>,
        timeout: Duration,
        poll: Duration,
    ) {
        let token = CancellationToken::new();
        let id = {
            let mut reg = self.lock();
            reg.evict_expired(Instant::now());
            reg.next_id += 1;
            let id = reg.next_id;
            let prev = reg.waits.insert(
                namespace.to_string(),
                TrackedWait { id, token: token.clone(), state: ReadinessState::Pending, handle: None, finished_at: None },
            );
            if let Some(prev) = prev {
                prev.token.cancel();
                info!(namespace, "readiness: replaced earlier wait");
            }
            id
        };

        let ns = namespace.to_string();
        let tracker = self.clone();
        let handle = tokio::spawn(async move {
            let t0 = Instant::now();
            let state = tokio::select! {
                _ = token.cancelled() => ReadinessState::Cancelled,
                s = wait_all(gateway.as_ref(), &ns, &workloads, timeout, poll) => s,
            };
            let took_ms = t0.elapsed().as_millis();
            match &state {
                ReadinessState::Failed { message } => warn!(namespace = %ns, error = %message, took_ms = %took_ms, "readiness: wait failed"),
                s => info!(namespace = %ns, state = state_label(s), took_ms = %took_ms, "readiness: wait finished"),
            }
            counter!("previews_readiness_outcomes_total", 1u64, "state" => state_label(&state));
            tracker.finish(&ns, id, state);
        });

        let mut reg = self.lock();
        if let Some(w) = reg.waits.get_mut(namespace).filter(|w| w.id == id) {
            w.handle = Some(handle);
        }
    }

    fn finish(&self, namespace: &str, id: u64, state: ReadinessState) {
        let mut reg = self.lock();
        if let Some(w) = reg.waits.get_mut(namespace).filter(|w| w.id == id) {
            w.state = state;
            w.finished_at = Some(Instant::now());
        }
    }

    pub fn state(&self, namespace: &str) -> Option<ReadinessState> {
        let mut reg = self.lock();
        reg.evict_expired(Instant::now());
        reg.waits.get(namespace).map(|w| w.state.clone())
    }

    /// Forget waits under `prefix` whose namespace is not in `live`. Pending ones
    /// are cancelled.
    pub fn retain_live<'a>(&self, prefix: &str, live: impl IntoIterator<Item = &'a str>) {
        let live: Vec<&str> = live.into_iter().collect();
        let mut reg = self.lock();
        reg.waits.retain(|ns, w| {
            let keep = !ns.starts_with(prefix) || live.contains(&ns.as_str());
            if !keep {
                w.token.cancel();
                debug!(namespace = %ns, "readiness: namespace gone, wait forgotten");
            }
            keep
        });
    }

    /// Cancel and forget the wait for `namespace`. Returns true if one was still pending.
    pub fn cancel(&self, namespace: &str) -> bool {
        match self.lock().waits.remove(namespace) {
            Some(w) => {
                w.token.cancel();
                !w.state.is_terminal()
            }
            None => false,
        }
    }

    /// Await the wait for `namespace` and return its final state.
    pub async fn wait(&self, namespace: &str) -> Option<ReadinessState> {
        let taken = self.lock().waits.get_mut(namespace).and_then(|w| w.handle.take().map(|h| (w.id, h)));
        if let Some((id, h)) = taken {
            if let Err(e) = h.await {
                warn!(namespace, error = %e, "readiness: task aborted");
                counter!("previews_readiness_outcomes_total", 1u64, "state" => "failed");
                self.finish(namespace, id, ReadinessState::Failed { message: format!("readiness task aborted: {}", e) });
            }
        }
        self.state(namespace)
    }

    /// Namespaces with a wait still running.
    pub fn pending(&self) -> Vec<String> {
        let mut reg = self.lock();
        reg.evict_expired(Instant::now());
        let mut out: Vec<String> =
            reg.waits.iter().filter(|(_, w)| !w.state.is_terminal()).map(|(ns, _)| ns.clone()).collect();
        out.sort();
        out
    }
}
