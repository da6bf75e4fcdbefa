use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    process,
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

const LOCK_FILENAME: &str = ".overmod.lock";

/// Exclusive lock on the data directory. One daemon per settings database.
#[derive(Debug)]
pub struct InstanceGuard {
    file: File,
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    profile: String,
    started_at: i64,
}

impl InstanceGuard {
    pub fn acquire(data_dir: &Path, profile: &str) -> Result<Self> {
        let path = data_dir.join(LOCK_FILENAME);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                let holder = read_lock_info(&path)
                    .map(|info| format!("pid {} (profile {})", info.pid, info.profile))
                    .unwrap_or_else(|| "another process".to_string());
                return Err(anyhow!(
                    "data directory {} is already in use by {holder}",
                    data_dir.display()
                ));
            }
            Err(err) => return Err(err.into()),
        }

        write_lock_info(&mut file, profile)?;
        tracing::info!(
            target: "lifecycle",
            pid = process::id(),
            path = %path.display(),
            "acquired data directory lock"
        );
        Ok(Self { file, path })
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    target: "lifecycle",
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove lock file on shutdown"
                );
            }
        }
    }
}

fn write_lock_info(file: &mut File, profile: &str) -> Result<()> {
    let info = LockInfo {
        pid: process::id(),
        profile: profile.to_string(),
        started_at: Utc::now().timestamp_millis(),
    };
    let payload = serde_json::to_vec(&info)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&payload)?;
    file.sync_all()?;
    Ok(())
}

fn read_lock_info(path: &Path) -> Option<LockInfo> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_guard_on_same_directory_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let first = InstanceGuard::acquire(dir.path(), "default").unwrap();
        let err = InstanceGuard::acquire(dir.path(), "other").unwrap_err();
        assert!(err.to_string().contains("profile default"));

        drop(first);
        assert!(!dir.path().join(LOCK_FILENAME).exists());
        InstanceGuard::acquire(dir.path(), "other").unwrap();
    }
}
