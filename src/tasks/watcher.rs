use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::{db::settings::SettingsRepository, infrastructure::shutdown::ShutdownListener};

/// Polls the settings database for commits made by other processes, such as one-shot commands,
/// and republishes them on the store's change channel.
pub struct StoreWatcher {
    store: SettingsRepository,
    profile: String,
    every: Duration,
}

impl StoreWatcher {
    pub fn new(store: SettingsRepository, profile: String, every: Duration) -> Self {
        Self {
            store,
            profile,
            every,
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.notified() => break,
                }
                match self.store.poll_external(&self.profile).await {
                    Ok(true) => {
                        tracing::info!(
                            target: "settings",
                            profile = %self.profile,
                            "picked up settings committed by another process"
                        );
                    }
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(target: "settings", error = %err, "settings poll failed");
                    }
                }
            }
            tracing::debug!(target: "settings", "store watcher stopped");
        })
    }
}
