use std::time::Duration;

use log::{debug, info};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};

use crate::sampler::{Sampler, SamplerTag, SAMPLING_FREQUENCY_HZ};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("CPU profiling is already in use")]
    AlreadyActive,
    #[error("CPU profiler hasn't been started")]
    NotActive,
    #[error("No CPU profile samples captured -- app is idle?")]
    EmptyCapture,
    #[error(transparent)]
    Sampler(#[from] anyhow::Error),
}

/// Serializes access to the process-wide profiling capability.
///
/// At most one session may be active at any time. Callers racing for the
/// session are rejected with [`SessionError::AlreadyActive`] instead of
/// queueing behind the running capture.
pub struct SessionController<S> {
    state: Mutex<Option<SamplerTag>>,
    sampler: S,
}

impl<S: Sampler> SessionController<S> {
    pub fn new(sampler: S) -> Self {
        SessionController {
            state: Mutex::new(None),
            sampler,
        }
    }

    /// Begin a profiling session, marking the controller active.
    ///
    /// The active check and the transition happen under the state lock,
    /// exactly one caller can win the session.
    pub async fn start(&self, seconds: u64) -> Result<SamplerTag, SessionError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        let tag = self
            .sampler
            .begin(SAMPLING_FREQUENCY_HZ, Duration::from_secs(seconds))?;
        *state = Some(tag);
        info!("Started CPU profiling session for {seconds}s");

        Ok(tag)
    }

    /// End the session identified by `tag` and export its samples.
    ///
    /// The controller goes back to idle as soon as the stop is attempted,
    /// a failed export never leaves the session locked.
    pub async fn stop(&self, tag: SamplerTag) -> Result<Vec<u8>, SessionError> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            return Err(SessionError::NotActive);
        }

        *state = None;
        self.sampler.end(tag)?;
        let profile = self.sampler.export()?;
        drop(state);

        if profile.is_empty() {
            return Err(SessionError::EmptyCapture);
        }

        debug!("Captured CPU profile, {} bytes", profile.len());
        Ok(profile)
    }

    /// Run a full profiling session: start, sample for `seconds` of
    /// wall-clock time, stop and export.
    ///
    /// The wait runs outside the state lock so concurrent callers fail
    /// fast with [`SessionError::AlreadyActive`] instead of blocking.
    pub async fn capture(&self, seconds: u64) -> Result<Vec<u8>, SessionError> {
        let tag = self.start(seconds).await?;
        sleep_full(Duration::from_secs(seconds)).await;
        self.stop(tag).await
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_some()
    }

    #[cfg(test)]
    pub(crate) fn sampler(&self) -> &S {
        &self.sampler
    }
}

/// Sleep until at least `total` wall-clock time has elapsed, going back
/// to sleep for the remainder if the wait returns early.
async fn sleep_full(total: Duration) {
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= total {
            return;
        }
        tokio::time::sleep(total - elapsed).await;
    }
}
