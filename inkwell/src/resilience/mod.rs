//! Resilient generation calls.
//!
//! [`execute_with_retry`] runs a fallible async call with bounded retries,
//! growing backoff, and a per-attempt deadline enforced through a
//! [`CancellationToken`]. [`ResilientExecutor`] layers the fallback library and
//! the response validator on top so callers of the generation path always get
//! text back, never an error.

mod backoff;
mod fallback;
mod validator;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use backoff::{Backoff, DEFAULT_BACKOFF_MULTIPLIER, MAX_RETRY_DELAY};
pub use fallback::{
    load_fallback_library, FallbackLibrary, RandomSource, ThreadRandom, UNAVAILABLE_SENTINEL,
};
pub use validator::{is_valid, is_valid_text, MIN_RESPONSE_CHARS, PHRASE_CHECK_MAX_CHARS};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_retries: u32,
    /// Delay before the second attempt.
    pub retry_delay: Duration,
    /// Deadline for each attempt.
    pub timeout: Duration,
    pub max_retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub fallback_responses: FallbackLibrary,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_retry_delay: MAX_RETRY_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            fallback_responses: FallbackLibrary::builtin(),
        }
    }
}

impl RetryConfig {
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.retry_delay,
            self.backoff_multiplier,
            self.max_retry_delay,
        )
    }
}

/// Handed to the wrapped call on every attempt.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Cancelled when the attempt's deadline passes.
    pub cancel: CancellationToken,
}

#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    #[error("attempt timed out after {}ms", .timeout.as_millis())]
    TimedOut { timeout: Duration },
    #[error("{0}")]
    Failed(E),
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    /// Backoff delay at the end of the sequence.
    pub retry_delay: Duration,
}

/// Every attempt failed. Carries the most recent attempt's error only.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted<E: std::fmt::Display> {
    pub attempts: u32,
    pub retry_delay: Duration,
    pub last_error: AttemptError<E>,
}

/// Run `call` until it succeeds or `config.attempts()` attempts have failed.
pub async fn execute_with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    mut call: F,
) -> Result<RetryOutcome<T>, RetryExhausted<E>>
where
    F: FnMut(AttemptContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.attempts();
    let mut backoff = config.backoff();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let cancel = CancellationToken::new();
        let context = AttemptContext {
            attempt,
            cancel: cancel.clone(),
        };

        let error = match tokio::time::timeout(config.timeout, call(context)).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Generation call succeeded after retry");
                }
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                    retry_delay: backoff.current(),
                });
            }
            Ok(Err(err)) => AttemptError::Failed(err),
            Err(_) => {
                cancel.cancel();
                AttemptError::TimedOut {
                    timeout: config.timeout,
                }
            }
        };

        if attempt >= max_attempts {
            return Err(RetryExhausted {
                attempts: attempt,
                retry_delay: backoff.current(),
                last_error: error,
            });
        }

        let delay = backoff.current();
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Generation attempt failed; retrying"
        );
        tokio::time::sleep(delay).await;
        backoff.advance();
    }
}

/// Retry + fallback + validation, sharing one config and random source.
#[derive(Clone)]
pub struct ResilientExecutor {
    config: Arc<RetryConfig>,
    rng: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for ResilientExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ResilientExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_random_source(config, Arc::new(ThreadRandom))
    }

    pub fn with_random_source(config: RetryConfig, rng: Arc<dyn RandomSource>) -> Self {
        Self {
            config: Arc::new(config),
            rng,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        call: F,
    ) -> Result<RetryOutcome<T>, RetryExhausted<E>>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        execute_with_retry(&self.config, call).await
    }

    pub fn get_fallback(&self, category: &str) -> String {
        self.config
            .fallback_responses
            .pick(category, self.rng.as_ref())
    }

    /// Like [`execute_with_retry`], but exhaustion yields canned text for
    /// `category` instead of an error.
    pub async fn execute_with_fallback<E, F, Fut>(&self, category: &str, call: F) -> String
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: std::fmt::Display,
    {
        match self.execute_with_retry(call).await {
            Ok(outcome) => outcome.value,
            Err(exhausted) => {
                tracing::warn!(
                    category,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Generation failed after retries; serving fallback content"
                );
                self.get_fallback(category)
            }
        }
    }

    /// Replace an invalid response with canned text for `category`.
    pub fn sanitize_or_fallback(
        &self,
        response: serde_json::Value,
        category: &str,
    ) -> serde_json::Value {
        if is_valid(&response) {
            response
        } else {
            tracing::info!(category, "Generation response failed validation; using fallback");
            serde_json::Value::String(self.get_fallback(category))
        }
    }

    /// Text form of [`Self::sanitize_or_fallback`].
    pub fn sanitize_text_or_fallback(&self, response: String, category: &str) -> String {
        if is_valid_text(&response) {
            response
        } else {
            tracing::info!(category, "Generation response failed validation; using fallback");
            self.get_fallback(category)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct First;

    impl RandomSource for First {
        fn pick_index(&self, _len: usize) -> usize {
            0
        }
    }

    fn quick_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            retry_delay: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
            fallback_responses: FallbackLibrary::new()
                .with_category("outline", ["canned outline text"])
                .with_category("ai-assistance", ["canned assistance text"]),
            ..RetryConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success_without_retry() {
        let calls = AtomicU32::new(0);
        let outcome = execute_with_retry(&quick_config(3), |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>(ctx.attempt) }
        })
        .await
        .unwrap();
        assert_eq!(outcome.value, 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let outcome = execute_with_retry(&quick_config(5), |ctx| async move {
            if ctx.attempt < 3 {
                Err(format!("transient {}", ctx.attempt))
            } else {
                Ok("third time lucky")
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.value, "third time lucky");
        assert!(outcome.retry_delay > Duration::from_millis(15));
        assert!(outcome.retry_delay < Duration::from_millis(23));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let err = execute_with_retry(&quick_config(4), |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(format!("failure #{}", ctx.attempt)) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.attempts, 4);
        match err.last_error {
            AttemptError::Failed(message) => assert_eq!(message, "failure #4"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_still_attempts_once() {
        let calls = AtomicU32::new(0);
        let _ = execute_with_retry(&quick_config(0), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("nope") }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_attempt_token() {
        let tokens = std::sync::Mutex::new(Vec::new());
        let err = execute_with_retry(&quick_config(2), |ctx| {
            tokens.lock().unwrap().push(ctx.cancel.clone());
            async move {
                ctx.cancel.cancelled().await;
                Ok::<_, String>(())
            }
        })
        .await;
        // The future is dropped at the deadline, so the attempt never sees the
        // cancellation itself; the token is still fired for spawned work.
        let err = err.unwrap_err();
        assert!(matches!(err.last_error, AttemptError::TimedOut { .. }));
        let tokens = tokens.lock().unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_absorbs_exhaustion() {
        let executor = ResilientExecutor::with_random_source(quick_config(2), Arc::new(First));
        let text = executor
            .execute_with_fallback("outline", |_| async { Err::<String, _>("503") })
            .await;
        assert_eq!(text, "canned outline text");
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_passes_live_result_through() {
        let executor = ResilientExecutor::with_random_source(quick_config(2), Arc::new(First));
        let text = executor
            .execute_with_fallback("outline", |_| async {
                Ok::<_, String>("a live outline".to_string())
            })
            .await;
        assert_eq!(text, "a live outline");
    }

    #[test]
    fn sanitize_replaces_invalid_responses() {
        let executor = ResilientExecutor::with_random_source(quick_config(1), Arc::new(First));
        assert_eq!(
            executor.sanitize_or_fallback(serde_json::Value::Null, "outline"),
            serde_json::json!("canned outline text")
        );
        assert_eq!(
            executor.sanitize_text_or_fallback("sorry".to_string(), "unknown-key"),
            "canned assistance text"
        );
        let good = "A perfectly serviceable opening line.".to_string();
        assert_eq!(
            executor.sanitize_text_or_fallback(good.clone(), "outline"),
            good
        );
    }
}
