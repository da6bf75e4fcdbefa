use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{query, query_as, query_scalar, sqlite::SqlitePool, Sqlite, Transaction};
use tokio::sync::broadcast;

use crate::settings::{LocalState, RowHighlights, SyncSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    Local,
    Sync,
    Rows,
}

impl Area {
    pub const ALL: [Area; 3] = [Area::Local, Area::Sync, Area::Rows];

    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Local => "local",
            Area::Sync => "sync",
            Area::Rows => "rows",
        }
    }
}

/// Published after every successful commit, and when a commit from another process is noticed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsChange {
    pub profile: String,
    pub areas: Vec<Area>,
    pub revision: u64,
}

/// All settings areas of one profile, read in a single transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsSnapshot {
    pub local: LocalState,
    pub sync: SyncSettings,
    pub rows: RowHighlights,
}

/// Areas to write; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsCommit {
    pub local: Option<LocalState>,
    pub sync: Option<SyncSettings>,
    pub rows: Option<RowHighlights>,
}

impl SettingsCommit {
    pub fn local(local: LocalState) -> Self {
        Self {
            local: Some(local),
            ..Default::default()
        }
    }

    pub fn sync(sync: SyncSettings) -> Self {
        Self {
            sync: Some(sync),
            ..Default::default()
        }
    }

    pub fn both(local: LocalState, sync: SyncSettings) -> Self {
        Self {
            local: Some(local),
            sync: Some(sync),
            rows: None,
        }
    }

    pub fn rows(rows: RowHighlights) -> Self {
        Self {
            rows: Some(rows),
            ..Default::default()
        }
    }

    fn areas(&self) -> Vec<Area> {
        let mut areas = Vec::new();
        if self.local.is_some() {
            areas.push(Area::Local);
        }
        if self.sync.is_some() {
            areas.push(Area::Sync);
        }
        if self.rows.is_some() {
            areas.push(Area::Rows);
        }
        areas
    }
}

#[derive(Clone, Copy)]
enum Counter {
    /// Bumped by every commit.
    Revision,
    /// Bumped by every projection snapshot.
    Generation,
}

#[derive(Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
    changes: broadcast::Sender<SettingsChange>,
    seen: Arc<Mutex<HashMap<String, u64>>>,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            pool,
            changes,
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.changes.subscribe()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn snapshot(&self, profile: &str) -> Result<SettingsSnapshot> {
        let mut tx = self.pool.begin().await?;
        let snapshot = read_snapshot(&mut tx, profile).await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    /// Takes the next pass generation of `profile` together with the settings it projects.
    ///
    /// The counter lives in the database and is bumped under the write lock, so a higher generation
    /// never carries older settings than a lower one, whichever process took it.
    pub async fn stamped_snapshot(&self, profile: &str) -> Result<(u64, SettingsSnapshot)> {
        let mut tx = self.pool.begin().await?;
        let generation = bump(&mut tx, profile, Counter::Generation).await?;
        let snapshot = read_snapshot(&mut tx, profile).await?;
        tx.commit().await?;
        Ok((generation, snapshot))
    }

    /// Writes every provided area atomically, then notifies subscribers.
    pub async fn commit(&self, profile: &str, commit: SettingsCommit) -> Result<()> {
        if commit.areas().is_empty() {
            return Ok(());
        }
        self.update(profile, |_| Ok::<_, anyhow::Error>((commit, ()))).await
    }

    /// Read-modify-write of one profile.
    ///
    /// `apply` receives the areas as stored while this transaction holds the write lock and returns
    /// the areas to write back. Commits made meanwhile by other tasks or processes are part of what
    /// it reads, never overwritten by an older copy. An empty commit writes and publishes nothing.
    pub async fn update<T, E, F>(&self, profile: &str, apply: F) -> Result<T, E>
    where
        F: FnOnce(SettingsSnapshot) -> Result<(SettingsCommit, T), E>,
        E: From<anyhow::Error>,
    {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        // Writing first takes the database write lock before anything is read.
        let revision = bump(&mut tx, profile, Counter::Revision).await?;
        let snapshot = read_snapshot(&mut tx, profile).await?;

        let (commit, value) = apply(snapshot)?;
        let areas = commit.areas();
        if areas.is_empty() {
            tx.rollback().await.map_err(anyhow::Error::from)?;
            return Ok(value);
        }

        if let Some(local) = &commit.local {
            write_area(&mut tx, profile, Area::Local, local).await?;
        }
        if let Some(sync) = &commit.sync {
            write_area(&mut tx, profile, Area::Sync, sync).await?;
        }
        if let Some(rows) = &commit.rows {
            write_area(&mut tx, profile, Area::Rows, rows).await?;
        }
        tx.commit()
            .await
            .with_context(|| format!("failed to commit settings for profile {profile}"))?;

        tracing::debug!(target: "db", profile, revision, ?areas, "settings committed");
        self.publish(profile, areas, revision);
        Ok(value)
    }

    /// Number of commits ever made to `profile`, by any process.
    pub async fn revision(&self, profile: &str) -> Result<u64> {
        let revision: Option<i64> =
            query_scalar(r#"SELECT revision FROM settings_revisions WHERE profile = ?1"#)
                .bind(profile)
                .fetch_optional(&self.pool)
                .await?;
        Ok(revision.map_or(0, to_counter))
    }

    /// Publishes one change covering every area when the stored revision moved past the last one
    /// this handle committed or reported. Returns whether it did.
    pub async fn poll_external(&self, profile: &str) -> Result<bool> {
        let revision = self.revision(profile).await?;
        {
            let mut seen = self.seen.lock();
            let last = seen.entry(profile.to_string()).or_default();
            if revision <= *last {
                return Ok(false);
            }
            *last = revision;
        }
        tracing::debug!(target: "db", profile, revision, "settings changed by another process");
        let _ = self.changes.send(SettingsChange {
            profile: profile.to_string(),
            areas: Area::ALL.to_vec(),
            revision,
        });
        Ok(true)
    }

    fn publish(&self, profile: &str, areas: Vec<Area>, revision: u64) {
        {
            let mut seen = self.seen.lock();
            let last = seen.entry(profile.to_string()).or_default();
            *last = (*last).max(revision);
        }
        let _ = self.changes.send(SettingsChange {
            profile: profile.to_string(),
            areas,
            revision,
        });
    }
}

async fn bump(tx: &mut Transaction<'_, Sqlite>, profile: &str, counter: Counter) -> Result<u64> {
    let sql = match counter {
        Counter::Revision => {
            r#"INSERT INTO settings_revisions (profile, revision) VALUES (?1, 1)
            ON CONFLICT(profile) DO UPDATE SET revision = revision + 1
            RETURNING revision"#
        }
        Counter::Generation => {
            r#"INSERT INTO settings_revisions (profile, generation) VALUES (?1, 1)
            ON CONFLICT(profile) DO UPDATE SET generation = generation + 1
            RETURNING generation"#
        }
    };
    let value: i64 = query_scalar(sql).bind(profile).fetch_one(&mut **tx).await?;
    Ok(to_counter(value))
}

fn to_counter(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

async fn read_snapshot(
    tx: &mut Transaction<'_, Sqlite>,
    profile: &str,
) -> Result<SettingsSnapshot> {
    Ok(SettingsSnapshot {
        local: read_area(tx, profile, Area::Local).await?,
        sync: read_area(tx, profile, Area::Sync).await?,
        rows: read_area(tx, profile, Area::Rows).await?,
    })
}

async fn read_area<T>(tx: &mut Transaction<'_, Sqlite>, profile: &str, area: Area) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let row: Option<(String,)> =
        query_as(r#"SELECT value FROM settings WHERE profile = ?1 AND area = ?2"#)
            .bind(profile)
            .bind(area.as_str())
            .fetch_optional(&mut **tx)
            .await?;

    match row {
        Some((value,)) => match serde_json::from_str(&value) {
            Ok(parsed) => Ok(parsed),
            Err(err) => {
                tracing::warn!(
                    target: "db",
                    error = %err,
                    profile,
                    area = area.as_str(),
                    "stored settings unreadable; using defaults"
                );
                Ok(T::default())
            }
        },
        None => Ok(T::default()),
    }
}

async fn write_area<T: Serialize>(
    tx: &mut Transaction<'_, Sqlite>,
    profile: &str,
    area: Area,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    query(
        r#"INSERT INTO settings (profile, area, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(profile, area)
            DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP"#,
    )
    .bind(profile)
    .bind(area.as_str())
    .bind(json)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
