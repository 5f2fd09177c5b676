/// Restart loop for long-running background episodes
///
/// An episode is one attempt at running a long-lived loop (a consumer session,
/// a polling job). The supervisor reruns it after failures and recovered panics
/// until the episode reports a terminal error or the cancellation token fires.
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Errors that end supervision instead of triggering a restart.
pub trait Terminal {
    fn is_terminal(&self) -> bool;
}

#[async_trait]
pub trait Episode: Send {
    type Error: Terminal + Display + Send;

    /// Run one episode to completion.
    async fn run(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Wait after an episode fails with a restartable error
    pub crash_delay: Duration,
    /// Extra wait after a recovered panic, before the crash delay
    pub panic_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            crash_delay: Duration::from_secs(5),
            panic_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The episode returned a terminal error
    Terminal,
    /// The token was cancelled between episodes or during a delay
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub episodes: u32,
    pub restarts: u32,
    pub panics: u32,
    pub stopped_by: StopReason,
}

pub struct Supervisor {
    name: String,
    config: SupervisorConfig,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, config: SupervisorConfig, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            config,
            cancel,
        }
    }

    /// Run `episode` until it fails terminally or supervision is cancelled.
    pub async fn run<E: Episode>(&self, episode: &mut E) -> SupervisorReport {
        let mut episodes = 0u32;
        let mut restarts = 0u32;
        let mut panics = 0u32;

        let stopped_by = loop {
            if self.cancel.is_cancelled() {
                info!(runner = %self.name, "Cancellation observed, not starting a new episode");
                break StopReason::Cancelled;
            }

            episodes += 1;

            let failure = match AssertUnwindSafe(episode.run()).catch_unwind().await {
                Ok(Ok(())) => {
                    warn!(runner = %self.name, "Episode returned without error, restarting");
                    restarts += 1;
                    continue;
                }
                Ok(Err(e)) if e.is_terminal() => {
                    info!(runner = %self.name, "Context cancelled. Stopping gracefully: {}", e);
                    break StopReason::Terminal;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => {
                    panics += 1;
                    let message = panic_message(payload.as_ref());
                    error!(
                        runner = %self.name,
                        cooldown_ms = self.config.panic_delay.as_millis() as u64,
                        "Panic occurred: {}",
                        message
                    );
                    if !self.pause(self.config.panic_delay).await {
                        break StopReason::Cancelled;
                    }
                    format!("recovered from panic: {}", message)
                }
            };

            error!(
                runner = %self.name,
                "Runner crashed: {}. Restarting after {:?}",
                failure,
                self.config.crash_delay
            );
            if !self.pause(self.config.crash_delay).await {
                break StopReason::Cancelled;
            }
            restarts += 1;
        };

        SupervisorReport {
            episodes,
            restarts,
            panics,
            stopped_by,
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
