use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

use crate::config::DirectoryConfig;

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub logs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub pages_dir: Option<PathBuf>,
}

/// Creates the log and data directories. Page snapshots are produced elsewhere, so a configured
/// pages directory must already exist.
pub fn ensure_directories(cfg: &DirectoryConfig) -> Result<ResolvedPaths> {
    let logs_dir = create_dir(&cfg.logs_dir)?;
    let data_dir = create_dir(&cfg.data_dir)?;
    check_writable(&data_dir)?;
    let pages_dir = cfg.pages_dir.as_deref().map(existing_dir).transpose()?;

    Ok(ResolvedPaths {
        db_path: data_dir.join(&cfg.db_filename),
        logs_dir,
        data_dir,
        pages_dir,
    })
}

fn create_dir(path: &str) -> Result<PathBuf> {
    fs::create_dir_all(path).with_context(|| format!("failed to create directory {path}"))?;
    existing_dir(path)
}

fn existing_dir(path: &str) -> Result<PathBuf> {
    let dir = fs::canonicalize(path).with_context(|| format!("directory {path} not found"))?;
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    Ok(dir)
}

/// The database, lock file and export backup all live in the data directory.
fn check_writable(dir: &Path) -> Result<()> {
    let mut scratch = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("data directory {} is not writable", dir.display()))?;
    scratch
        .write_all(b"ok")
        .with_context(|| format!("data directory {} is not writable", dir.display()))
}
