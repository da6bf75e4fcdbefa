use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use crate::{
    db::settings::{Area, SettingsRepository},
    infrastructure::{files::write_atomic, shutdown::ShutdownListener},
    settings::{build_export, ensure_defaults},
};

/// Keeps an export file in step with the stored settings of one profile.
pub struct ExportBackup {
    store: SettingsRepository,
    profile: String,
    path: PathBuf,
}

impl ExportBackup {
    pub fn new(store: SettingsRepository, profile: String, path: PathBuf) -> Self {
        Self {
            store,
            profile,
            path,
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        let mut changes = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Ok(change) if change.profile == self.profile
                            && change.areas.iter().any(|area| *area != Area::Rows) => {}
                        Ok(_) => continue,
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown.notified() => break,
                }
                if let Err(err) = self.write().await {
                    tracing::warn!(
                        target: "settings",
                        path = %self.path.display(),
                        error = %err,
                        "export backup failed"
                    );
                }
            }
        })
    }

    pub async fn write(&self) -> Result<()> {
        let snapshot = self.store.snapshot(&self.profile).await?;
        let local = ensure_defaults(snapshot.local, &snapshot.sync);
        let export = build_export(&local, &snapshot.sync, Utc::now());
        let body = serde_json::to_vec_pretty(&export)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body)).await??;
        tracing::debug!(target: "settings", path = %self.path.display(), "export backup written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::{
        db::{memory_pool, settings::SettingsCommit},
        settings::LocalState,
    };

    #[tokio::test]
    async fn writes_current_export() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsRepository::new(memory_pool().await.unwrap());
        let local = LocalState {
            subscribed_lists: vec!["pk1".into()],
            local_blocked_users: vec!["troll".into()],
            ..Default::default()
        };
        store.commit("p", SettingsCommit::local(local)).await.unwrap();

        let backup = ExportBackup::new(store, "p".into(), dir.path().join("backup.json"));
        backup.write().await.unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("backup.json")).unwrap())
                .unwrap();
        assert_eq!(written["version"], 2);
        assert_eq!(written["lists"]["pk1"]["subscribed"], true);
        assert_eq!(written["localBlockedUsers"], serde_json::json!(["troll"]));
    }
}
