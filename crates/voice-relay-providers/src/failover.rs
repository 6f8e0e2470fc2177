//! Fallback chain: tries candidates in priority order.
//!
//! The primary runs first. When it fails, each fallback is tried in turn
//! and the first success wins. Candidates are expected to carry their own
//! retry loop; the chain itself calls each one exactly once.

use std::fmt::{self, Display};
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which kind of work a chain performs. Used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Stt,
    Ai,
    Tts,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Ai => "ai",
            Self::Tts => "tts",
        }
    }
}

impl Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named way of doing the work.
pub struct ProviderCandidate<'a, T, E> {
    name: String,
    call: Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>,
}

impl<'a, T, E> ProviderCandidate<'a, T, E> {
    pub fn new<F, Fut>(name: impl Into<String>, call: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        Self {
            name: name.into(),
            call: Box::new(move || call().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T, E> fmt::Debug for ProviderCandidate<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCandidate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Outcome of a fallback chain.
#[derive(Debug)]
pub enum FallbackResult<T, E> {
    /// A candidate succeeded. `level` is 0 for the primary, n for the nth fallback.
    Served {
        value: T,
        provider: String,
        level: usize,
    },
    /// Every candidate failed. `error` is the primary's error.
    Failed { error: E, tried: Vec<String> },
}

impl<T, E> FallbackResult<T, E> {
    pub fn success(&self) -> bool {
        matches!(self, Self::Served { .. })
    }

    /// 0 = primary, n = nth fallback, -1 = all failed.
    pub fn fallback_level(&self) -> i32 {
        match self {
            Self::Served { level, .. } => *level as i32,
            Self::Failed { .. } => -1,
        }
    }

    pub fn provider_used(&self) -> Option<&str> {
        match self {
            Self::Served { provider, .. } => Some(provider),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Served { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Served { value, .. } => Ok(value),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Runs a primary candidate, then fallbacks in order until one succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackChainExecutor;

impl FallbackChainExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute<'a, T, E>(
        &self,
        service: ServiceType,
        primary: ProviderCandidate<'a, T, E>,
        fallbacks: Vec<ProviderCandidate<'a, T, E>>,
    ) -> FallbackResult<T, E>
    where
        E: Display,
    {
        let ProviderCandidate { name, call } = primary;
        debug!(service = %service, provider = %name, "Trying primary provider");

        let primary_error = match call().await {
            Ok(value) => {
                return FallbackResult::Served {
                    value,
                    provider: name,
                    level: 0,
                };
            }
            Err(e) => {
                warn!(service = %service, provider = %name, error = %e, "Primary provider failed");
                e
            }
        };

        let mut tried = vec![name];

        for (i, candidate) in fallbacks.into_iter().enumerate() {
            let level = i + 1;
            let ProviderCandidate { name, call } = candidate;
            debug!(service = %service, provider = %name, level, "Trying fallback provider");

            match call().await {
                Ok(value) => {
                    info!(service = %service, provider = %name, level, "Fallback provider succeeded");
                    return FallbackResult::Served {
                        value,
                        provider: name,
                        level,
                    };
                }
                Err(e) => {
                    warn!(
                        service = %service,
                        provider = %name,
                        level,
                        error = %e,
                        "Fallback provider failed, trying next"
                    );
                    tried.push(name);
                }
            }
        }

        warn!(
            service = %service,
            tried = tried.len(),
            error = %primary_error,
            "All providers failed"
        );
        FallbackResult::Failed {
            error: primary_error,
            tried,
        }
    }
}
