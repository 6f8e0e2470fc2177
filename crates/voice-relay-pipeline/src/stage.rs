//! One deadline-bounded pipeline stage.
//!
//! A stage owns an ordered provider chain. Each candidate runs inside its
//! own retry loop, the chain moves on to the next candidate once retries
//! are exhausted, and the whole walk is cancelled when the stage deadline
//! passes. Cancellation drops the in-flight provider future, which closes
//! its connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use voice_relay_core::backoff::RetryConfig;
use voice_relay_core::config::StageConfig;
use voice_relay_core::error::ProviderError;
use voice_relay_providers::{
    FallbackChainExecutor, FallbackResult, Provider, ProviderCandidate, RetryExecutor, ServiceType,
};

use crate::error::PipelineError;

/// Lifecycle of a single stage invocation, used in log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Validating,
    Attempting { level: usize },
    Succeeded,
    Failed,
}

/// Which provider served a stage and how long it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub provider: String,
    /// 0 for the primary, n for the nth fallback.
    pub fallback_level: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub report: StageReport,
}

impl<T> StageOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        StageOutcome {
            value: f(self.value),
            report: self.report,
        }
    }
}

pub struct Stage<P: ?Sized> {
    service: ServiceType,
    deadline: Duration,
    retry: RetryExecutor,
    providers: Vec<Arc<P>>,
}

impl<P: Provider + ?Sized> Stage<P> {
    pub fn new(service: ServiceType, config: &StageConfig, providers: Vec<Arc<P>>) -> Self {
        Self::with_deadline(service, config.timeout(), config.retry.clone(), providers)
    }

    pub fn with_deadline(
        service: ServiceType,
        deadline: Duration,
        retry: RetryConfig,
        providers: Vec<Arc<P>>,
    ) -> Self {
        Self {
            service,
            deadline,
            retry: RetryExecutor::new(retry),
            providers,
        }
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn providers(&self) -> &[Arc<P>] {
        &self.providers
    }

    /// Run `call` against the chain until one provider succeeds, the chain
    /// is exhausted, or the deadline passes.
    ///
    /// On exhaustion the error reported is the primary provider's.
    pub async fn run<'a, T, F>(&'a self, call: F) -> Result<StageOutcome<T>, PipelineError>
    where
        F: Fn(&'a P) -> BoxFuture<'a, Result<T, ProviderError>> + Send + Sync,
        T: Send + 'a,
    {
        let service = self.service;
        if self.providers.is_empty() {
            warn!(stage = %service, state = ?StageState::Failed, "No providers in chain");
            return Err(PipelineError::Internal(format!(
                "no providers configured for {service} stage"
            )));
        }

        let started = Instant::now();
        let call = &call;
        let retry = &self.retry;

        let mut candidates: Vec<_> = self
            .providers
            .iter()
            .enumerate()
            .map(|(level, provider)| {
                let provider: &'a P = provider.as_ref();
                ProviderCandidate::new(provider.id(), move || async move {
                    debug!(
                        stage = %service,
                        provider = provider.id(),
                        state = ?StageState::Attempting { level },
                        "Stage attempting provider"
                    );
                    let name = format!("{service}:{}", provider.id());
                    retry.run(&name, || call(provider)).await.into_result()
                })
            })
            .collect();
        let primary = candidates.remove(0);
        let executor = FallbackChainExecutor::new();
        let chain = executor.execute(service, primary, candidates);

        match tokio::time::timeout(self.deadline, chain).await {
            Ok(FallbackResult::Served {
                value,
                provider,
                level,
            }) => {
                let elapsed = started.elapsed();
                info!(
                    stage = %service,
                    provider = %provider,
                    fallback_level = level,
                    elapsed_ms = elapsed.as_millis() as u64,
                    state = ?StageState::Succeeded,
                    "Stage complete"
                );
                Ok(StageOutcome {
                    value,
                    report: StageReport {
                        provider,
                        fallback_level: level,
                        elapsed,
                    },
                })
            }
            Ok(FallbackResult::Failed { error, tried }) => {
                warn!(
                    stage = %service,
                    tried = ?tried,
                    error = %error,
                    state = ?StageState::Failed,
                    "Stage exhausted its provider chain"
                );
                Err(PipelineError::StageFailed {
                    stage: service,
                    retryable: error.is_retryable(),
                    source: error,
                })
            }
            Err(_) => {
                warn!(
                    stage = %service,
                    deadline_secs = self.deadline.as_secs_f64(),
                    state = ?StageState::Failed,
                    "Stage deadline exceeded"
                );
                Err(PipelineError::StageTimeout {
                    stage: service,
                    deadline: self.deadline,
                })
            }
        }
    }
}

impl<P: Provider + ?Sized> std::fmt::Debug for Stage<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.providers.iter().map(|p| p.id()).collect();
        f.debug_struct("Stage")
            .field("service", &self.service)
            .field("deadline", &self.deadline)
            .field("providers", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo {
        id: &'static str,
        calls: AtomicU32,
        fail_with: Option<ProviderError>,
        delay: Duration,
    }

    impl Echo {
        fn ok(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                fail_with: None,
                delay: Duration::ZERO,
            })
        }

        fn failing(id: &'static str, error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                fail_with: Some(error),
                delay: Duration::ZERO,
            })
        }

        fn slow(id: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                fail_with: None,
                delay,
            })
        }

        async fn say(&self, text: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(format!("{}:{text}", self.id)),
            }
        }
    }

    impl Provider for Echo {
        fn id(&self) -> &str {
            self.id
        }
    }

    fn stage(providers: Vec<Arc<Echo>>, deadline: Duration) -> Stage<Echo> {
        Stage::with_deadline(
            ServiceType::Ai,
            deadline,
            RetryConfig::new(3, Duration::from_millis(10), Duration::from_millis(100))
                .without_jitter(),
            providers,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_serves() {
        let primary = Echo::ok("primary");
        let stage = stage(vec![primary.clone()], Duration::from_secs(5));
        let text = String::from("hi");
        let outcome = stage.run(|p| p.say(&text).boxed()).await.unwrap();
        assert_eq!(outcome.value, "primary:hi");
        assert_eq!(outcome.report.provider, "primary");
        assert_eq!(outcome.report.fallback_level, 0);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_falls_back() {
        let primary = Echo::failing("primary", ProviderError::Connection("refused".into()));
        let backup = Echo::ok("backup");
        let stage = stage(vec![primary.clone(), backup.clone()], Duration::from_secs(5));
        let outcome = stage.run(|p| p.say("x").boxed()).await.unwrap();
        assert_eq!(outcome.report.provider, "backup");
        assert_eq!(outcome.report.fallback_level, 1);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_moves_on_immediately() {
        let primary = Echo::failing(
            "primary",
            ProviderError::Http {
                status: 401,
                body: "bad key".into(),
            },
        );
        let backup = Echo::ok("backup");
        let stage = stage(vec![primary.clone(), backup], Duration::from_secs(5));
        stage.run(|p| p.say("x").boxed()).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_primary_error() {
        let primary = Echo::failing("primary", ProviderError::Timeout("slow".into()));
        let backup = Echo::failing("backup", ProviderError::Other("nope".into()));
        let stage = stage(vec![primary, backup], Duration::from_secs(5));
        let err = stage.run(|p| p.say("x").boxed()).await.unwrap_err();
        match err {
            PipelineError::StageFailed {
                stage,
                retryable,
                source,
            } => {
                assert_eq!(stage, ServiceType::Ai);
                assert!(retryable);
                assert!(matches!(source, ProviderError::Timeout(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_chain() {
        let slow = Echo::slow("slow", Duration::from_secs(31));
        let backup = Echo::ok("backup");
        let stage = stage(vec![slow.clone(), backup.clone()], Duration::from_secs(30));
        let err = stage.run(|p| p.say("x").boxed()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageTimeout {
                stage: ServiceType::Ai,
                deadline,
            } if deadline == Duration::from_secs(30)
        ));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_is_internal_error() {
        let stage = stage(Vec::new(), Duration::from_secs(1));
        let err = stage.run(|p| p.say("x").boxed()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
    }
}
