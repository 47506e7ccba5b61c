//! Activity liveness signals
//!
//! A long-running activity proves progress by calling
//! [`ActivityContext::heartbeat`]. The runner watches the paired
//! [`HeartbeatMonitor`] and fails the attempt when the signal goes quiet.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Handle given to every activity attempt.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    activity: &'static str,
    attempt: u32,
    beats: Option<Arc<watch::Sender<u64>>>,
}

impl ActivityContext {
    /// Context with no liveness requirement; heartbeats are accepted and ignored
    pub fn detached(activity: &'static str) -> Self {
        Self {
            activity,
            attempt: 1,
            beats: None,
        }
    }

    /// Context whose heartbeats feed the returned monitor
    pub(crate) fn monitored(
        activity: &'static str,
        attempt: u32,
        timeout: Duration,
    ) -> (Self, HeartbeatMonitor) {
        let (tx, rx) = watch::channel(0);
        let ctx = Self {
            activity,
            attempt,
            beats: Some(Arc::new(tx)),
        };
        (ctx, HeartbeatMonitor { rx, timeout })
    }

    pub(crate) fn unmonitored(activity: &'static str, attempt: u32) -> Self {
        Self {
            activity,
            attempt,
            beats: None,
        }
    }

    pub fn activity(&self) -> &'static str {
        self.activity
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record proof of progress
    pub fn heartbeat(&self) {
        if let Some(beats) = &self.beats {
            beats.send_modify(|count| *count += 1);
        }
    }
}

/// Runner-side half of a monitored [`ActivityContext`].
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    rx: watch::Receiver<u64>,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves once no heartbeat arrived within the timeout.
    ///
    /// Never resolves after the activity dropped its context; the activity's
    /// own result decides the attempt in that case.
    pub(crate) async fn expired(mut self) {
        loop {
            match tokio::time::timeout(self.timeout, self.rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => std::future::pending::<()>().await,
                Err(_) => return,
            }
        }
    }
}
