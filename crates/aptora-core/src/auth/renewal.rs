//! Background renewal of the access token.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::ApiClient;

/// Refresh every 14 minutes; access tokens live for 15.
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(14 * 60);

/// Owns the single renewal task of a session store.
#[derive(Default)]
pub struct RenewalTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start renewing for the session generation that is current now,
    /// aborting any previous task.
    pub fn start(&self, api: ApiClient, period: Duration) {
        let generation = api.session().generation();
        let handle = tokio::spawn(run(api, period, generation));
        if let Some(previous) = self.lock().replace(handle) {
            previous.abort();
        }
        debug!(period_secs = period.as_secs(), "Renewal timer started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.lock().take() {
            handle.abort();
            debug!("Renewal timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tick until the session generation changes. A failed refresh ends the
/// session on the spot. A tick that lands while another task is already
/// refreshing reuses that task's token.
async fn run(api: ApiClient, period: Duration, generation: u64) {
    let session = Arc::clone(api.session());
    let mut state = session.subscribe();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = state.changed() => {
                if changed.is_err() || session.generation() != generation {
                    debug!("Session ended, renewal timer exiting");
                    return;
                }
                continue;
            }
        }

        if session.generation() != generation {
            return;
        }

        match api.renew_access_token().await {
            Ok(_) => debug!("Scheduled token refresh succeeded"),
            Err(_) if session.generation() != generation => {
                debug!("Session replaced during scheduled refresh, renewal timer exiting");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Scheduled token refresh failed, logging out");
                // A 401 on the exchange has already purged the session.
                if let Some(refresh_token) = session.expire_if(generation) {
                    if let Err(e) = api.logout(&refresh_token).await {
                        debug!(error = %e, "Server logout after failed renewal failed");
                    }
                }
                info!("Session ended by failed renewal");
                return;
            }
        }
    }
}
