/// Resilience patterns for background consumers
///
/// - **Backoff**: exponential delay with symmetric jitter and a ceiling
/// - **Retry**: bounded retry of a fallible async operation
/// - **Timeout**: time limits on commits, deletes and other external calls
/// - **Supervisor**: restart loop with panic recovery and cancellation
///
/// # Example: Connect with bounded retry
///
/// ```rust,no_run
/// use resilience::{with_retry, BackoffPolicy, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig {
///         policy: BackoffPolicy::default(),
///         max_elapsed: Duration::from_secs(60),
///     };
///
///     let result = with_retry(&config, || async {
///         // Open a connection here
///         Ok::<_, String>(())
///     })
///     .await;
/// }
/// ```

pub mod backoff;
pub mod retry;
pub mod supervisor;
pub mod timeout;

pub use backoff::{BackoffPolicy, RetryState};
pub use retry::{with_retry, RetryConfig, RetryError};
pub use supervisor::{Episode, StopReason, Supervisor, SupervisorConfig, SupervisorReport, Terminal};
pub use timeout::{with_timeout, with_timeout_result, TimeoutError};
