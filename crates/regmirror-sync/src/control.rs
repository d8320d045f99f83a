//! Run-level cancellation.

use tokio_util::sync::CancellationToken;

/// Two-stage cancellation for a run.
///
/// `stop` prevents new artifacts from being dispatched while in-flight work
/// finishes. `abort` additionally kills running transfers; those artifacts
/// are recorded as failed. Aborting implies stopping.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    stop: CancellationToken,
    abort: CancellationToken,
}

impl RunControl {
    /// Creates an untriggered control.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops dispatching new artifacts.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::warn!("stop requested, finishing in-flight artifacts");
        }
        self.stop.cancel();
    }

    /// Stops dispatching and kills in-flight transfers.
    pub fn abort(&self) {
        if !self.abort.is_cancelled() {
            tracing::warn!("abort requested, killing in-flight transfers");
        }
        self.stop.cancel();
        self.abort.cancel();
    }

    /// Returns true once [`stop`](Self::stop) or [`abort`](Self::abort) was called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Returns true once [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Token that fires on stop.
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Token that fires on abort.
    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_implies_stop() {
        let control = RunControl::new();
        assert!(!control.is_stopped());

        control.abort();
        assert!(control.is_stopped());
        assert!(control.is_aborted());
    }

    #[test]
    fn test_stop_does_not_abort() {
        let control = RunControl::new();
        control.stop();
        assert!(control.is_stopped());
        assert!(!control.is_aborted());
    }

    #[test]
    fn test_clones_share_state() {
        let control = RunControl::new();
        let handle = control.clone();
        handle.stop();
        assert!(control.is_stopped());
    }
}
