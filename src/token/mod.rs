//! Token cache: keeps one valid IAM token available to scrapes.
//!
//! The token is fetched once at startup (failure is fatal to the caller)
//! and then refreshed on a fixed interval by a background task. Readers
//! take a shared lock only long enough to clone the string; the refresh
//! path takes the exclusive lock only to swap in the new value, so a
//! reader sees either the old token or the new one.
//!
//! A failed refresh is logged and the previous token stays in place.
//! Recovery is left to the next tick.

use reqwest::StatusCode;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info, warn};
use zeroize::Zeroize;

pub mod iam;

pub use iam::IamClient;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token request failed, status: {status}, body: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("token not found in response header")]
    MissingToken,
}

struct Shared {
    iam: IamClient,
    token: RwLock<String>,
}

impl Shared {
    fn read(&self) -> String {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let fresh = self.iam.authenticate().await?;

        let mut old = {
            let mut guard = match self.token.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *guard, fresh)
        };
        old.zeroize();

        info!("token refreshed successfully");
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Ok(token) = self.token.get_mut() {
            token.zeroize();
        }
    }
}

struct RefreshTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct TokenCache {
    shared: Arc<Shared>,
    interval: Duration,
    task: Mutex<Option<RefreshTask>>,
}

impl TokenCache {
    pub fn new(iam: IamClient, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                iam,
                token: RwLock::new(String::new()),
            }),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Current token, or an empty string before the first success.
    pub fn token(&self) -> String {
        self.shared.read()
    }

    /// Fetch a new token now and swap it in. The cached value is left
    /// untouched on error.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        self.shared.refresh().await
    }

    /// Fetch the first token, then start the background refresh task.
    pub async fn start(&self) -> Result<(), AuthError> {
        self.refresh().await?;

        let mut slot = self.task_slot();
        if slot.is_some() {
            warn!("token refresh already running");
            return Ok(());
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_refresh(Arc::clone(&self.shared), self.interval, stop_rx));
        *slot = Some(RefreshTask { stop: stop_tx, handle });

        info!(
            url = self.shared.iam.url(),
            interval_secs = self.interval.as_secs(),
            "token refresh scheduled"
        );
        Ok(())
    }

    /// Stop the background refresh and wait for it to exit. Safe to call
    /// more than once.
    pub async fn stop(&self) {
        let task = self.task_slot().take();
        if let Some(task) = task {
            let _ = task.stop.send(());
            if let Err(e) = task.handle.await {
                error!("token refresh task ended abnormally: {}", e);
            }
        }
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<RefreshTask>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Refresh on every tick until a stop is requested or the cache is dropped.
async fn run_refresh(shared: Arc<Shared>, period: Duration, mut stop: oneshot::Receiver<()>) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    interval.tick().await; // Skip the immediate tick (start already fetched)

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = shared.refresh().await {
                    error!("token refresh failed: {}", e);
                }
            }
            _ = &mut stop => {
                info!("token refresh stopped");
                return;
            }
        }
    }
}
