//! Request processing loop shared across all input modes.
//!
//! Drives any [`RequestSource`] into a [`SessionEngine`]. Engine calls are
//! synchronous and may block on storage, so each one runs on the blocking
//! pool while the loop keeps listening for cancellation.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{RequestSource, SourceEvent};
use crate::config::defaults::REPLAY_PROGRESS_INTERVAL;
use crate::engine::{EngineError, ErrorKind, SessionEngine, SessionPhase};
use crate::types::{EngineRequest, SessionStatus};

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub requests: u64,
    pub acks: u64,
    pub sessions_completed: u64,
    pub validation_failures: u64,
    pub processing_failures: u64,
    pub storage_failures: u64,
}

impl LoopStats {
    fn record(&mut self, err: &EngineError) {
        match err.kind() {
            ErrorKind::Validation => self.validation_failures += 1,
            ErrorKind::Processing => self.processing_failures += 1,
            ErrorKind::Storage => self.storage_failures += 1,
        }
    }

    pub fn failures(&self) -> u64 {
        self.validation_failures + self.processing_failures + self.storage_failures
    }
}

// ============================================================================
// Processing Loop
// ============================================================================

/// Feeds requests from a source into a shared engine until EOF or
/// cancellation.
pub struct ProcessingLoop {
    engine: Arc<SessionEngine>,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(engine: Arc<SessionEngine>, cancel_token: CancellationToken) -> Self {
        Self {
            engine,
            cancel_token,
        }
    }

    /// Run until the source is exhausted or cancellation.
    ///
    /// Returns final loop statistics.
    pub async fn run<S: RequestSource>(self, source: &mut S) -> LoopStats {
        let mut stats = LoopStats::default();
        let mut pushed = 0u64;

        info!("Processing engine requests from {}...", source.source_name());

        loop {
            let event = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[ProcessingLoop] Shutdown signal received");
                    break;
                }
                result = source.next_event() => {
                    match result {
                        Ok(ev) => ev,
                        Err(e) => {
                            warn!("[ProcessingLoop] Source error: {}", e);
                            break;
                        }
                    }
                }
            };

            let request = match event {
                SourceEvent::Request(r) => r,
                SourceEvent::Eof => {
                    info!(
                        "[ProcessingLoop] Source reached end ({} requests processed)",
                        stats.requests
                    );
                    break;
                }
            };

            stats.requests += 1;
            let op = request.op_name();
            let is_push = matches!(request, EngineRequest::PushSample { .. });

            let engine = Arc::clone(&self.engine);
            let result = match tokio::task::spawn_blocking(move || engine.handle(request)).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(op, error = %e, "[ProcessingLoop] Engine task failed, stopping");
                    break;
                }
            };

            match result {
                Ok(ack) => {
                    stats.acks += 1;
                    if ack.status == SessionStatus::Completed {
                        stats.sessions_completed += 1;
                    }
                    debug!(op, status = %ack.status, "{}", ack.message);
                }
                Err(err) => {
                    stats.record(&err);
                    warn!(op, kind = ?err.kind(), "Request failed: {}", err);
                }
            }

            if is_push {
                pushed += 1;
                if pushed % REPLAY_PROGRESS_INTERVAL == 0 {
                    info!(
                        "Progress: {} samples | Acks: {} | Failures: {}",
                        pushed,
                        stats.acks,
                        stats.failures()
                    );
                }
            }
        }

        if self.engine.phase() == SessionPhase::Active {
            warn!("Input ended with a session still active; it will not be finalized");
        }

        info!(
            requests = stats.requests,
            acks = stats.acks,
            sessions = stats.sessions_completed,
            validation_failures = stats.validation_failures,
            processing_failures = stats.processing_failures,
            storage_failures = stats.storage_failures,
            "Processing finished"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::InMemoryStorageProvider;
    use crate::types::{Sample, SessionMeta};
    use async_trait::async_trait;

    struct VecSource(std::vec::IntoIter<EngineRequest>);

    #[async_trait]
    impl RequestSource for VecSource {
        async fn next_event(&mut self) -> anyhow::Result<SourceEvent> {
            Ok(self.0.next().map_or(SourceEvent::Eof, SourceEvent::Request))
        }

        fn source_name(&self) -> &str {
            "vec"
        }
    }

    /// Never yields; only cancellation ends the loop.
    struct PendingSource;

    #[async_trait]
    impl RequestSource for PendingSource {
        async fn next_event(&mut self) -> anyhow::Result<SourceEvent> {
            std::future::pending().await
        }

        fn source_name(&self) -> &str {
            "pending"
        }
    }

    fn engine() -> (Arc<SessionEngine>, InMemoryStorageProvider) {
        let provider = InMemoryStorageProvider::new();
        let engine = SessionEngine::new(EngineConfig::default(), provider.clone());
        (Arc::new(engine), provider)
    }

    #[tokio::test]
    async fn test_loop_counts_acks_and_failures() {
        let (engine, provider) = engine();
        let requests = vec![
            EngineRequest::PushSample {
                sample: Some(Sample::new(1000.0, 0.5, 0.1, 3.7, 25.0, 3.0, 1)),
            },
            EngineRequest::StartSession {
                meta: Some(SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 10.0)),
            },
            EngineRequest::PushSample {
                sample: Some(Sample::new(1000.0, 0.5, 0.1, 3.7, 25.0, 3.0, 1)),
            },
            EngineRequest::PushSample { sample: None },
            EngineRequest::EndSession,
        ];
        let mut source = VecSource(requests.into_iter());

        let stats = ProcessingLoop::new(Arc::clone(&engine), CancellationToken::new())
            .run(&mut source)
            .await;

        assert_eq!(stats.requests, 5);
        assert_eq!(stats.acks, 3);
        assert_eq!(stats.sessions_completed, 1);
        assert_eq!(stats.validation_failures, 2);
        assert_eq!(stats.failures(), 2);
        assert_eq!(engine.phase(), SessionPhase::Idle);
        assert_eq!(provider.last_session().unwrap().samples.len(), 1);
    }

    #[tokio::test]
    async fn test_loop_stops_on_cancel() {
        let (engine, _) = engine();
        let token = CancellationToken::new();
        token.cancel();
        let stats = ProcessingLoop::new(engine, token)
            .run(&mut PendingSource)
            .await;
        assert_eq!(stats, LoopStats::default());
    }
}
