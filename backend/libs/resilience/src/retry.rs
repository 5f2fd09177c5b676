/// Bounded retry driven by a [`BackoffPolicy`]
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::backoff::{BackoffPolicy, RetryState};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay schedule between attempts
    pub policy: BackoffPolicy,
    /// Give up once the next sleep would push the episode past this bound
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::default(),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Retry deadline exceeded after {attempts} attempt(s): {last_error}")]
    DeadlineExceeded { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::DeadlineExceeded { last_error, .. } => last_error,
        }
    }
}

/// Run `f` until it succeeds or the retry window closes.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut state = RetryState::new();

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let delay = state.next_delay(&config.policy);

                if state.elapsed() + delay > config.max_elapsed {
                    warn!(
                        attempts = state.attempt(),
                        elapsed_ms = state.elapsed().as_millis() as u64,
                        "Retry window of {:?} exhausted: {}",
                        config.max_elapsed,
                        e
                    );
                    return Err(RetryError::DeadlineExceeded {
                        attempts: state.attempt(),
                        last_error: e,
                    });
                }

                warn!(
                    attempt = state.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying: {}",
                    e
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
