use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs2::FileExt;
use futures::{future::BoxFuture, FutureExt};
use serde::Deserialize;

use crate::{
    domain::{PageKind, RawRow},
    infrastructure::files::write_atomic,
    page::{GenerationGuard, PageAdapter, PageProjection},
};

const EFFECTS_SUFFIX: &str = ".effects.json";

#[derive(Deserialize)]
struct AppliedStamp {
    generation: u64,
}

#[derive(Debug, Default, Deserialize)]
struct PageSnapshot {
    #[serde(default)]
    kind: PageKind,
    #[serde(default)]
    rows: Vec<RawRow>,
}

/// A page captured as `<name>.json`; effects are written next to it as `<name>.effects.json`.
#[derive(Debug)]
pub struct SnapshotPage {
    id: String,
    kind: PageKind,
    source: PathBuf,
    output: PathBuf,
    guard: GenerationGuard,
}

impl SnapshotPage {
    pub async fn load(source: &Path) -> Result<Self> {
        let snapshot = read_snapshot(source).await?;
        let id = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let output = source.with_file_name(format!("{id}{EFFECTS_SUFFIX}"));
        Ok(Self {
            id,
            kind: snapshot.kind,
            source: source.to_path_buf(),
            output,
            guard: GenerationGuard::default(),
        })
    }

    /// Loads every page snapshot in `dir`, skipping effect files and unreadable pages.
    pub async fn discover(dir: &Path) -> Result<Vec<Self>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to read pages directory {}", dir.display()))?;
        let mut sources = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.ends_with(".json") && !name.ends_with(EFFECTS_SUFFIX) {
                sources.push(path);
            }
        }
        sources.sort();

        let mut pages = Vec::with_capacity(sources.len());
        for source in sources {
            match Self::load(&source).await {
                Ok(page) => pages.push(page),
                Err(err) => tracing::warn!(
                    target: "page",
                    path = %source.display(),
                    error = %err,
                    "skipping unreadable page snapshot"
                ),
            }
        }
        Ok(pages)
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }
}

impl PageAdapter for SnapshotPage {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PageKind {
        self.kind
    }

    fn rows(&self) -> BoxFuture<'_, Result<Vec<RawRow>>> {
        async move { Ok(read_snapshot(&self.source).await?.rows) }.boxed()
    }

    fn apply<'a>(&'a self, projection: &'a PageProjection) -> BoxFuture<'a, Result<bool>> {
        async move {
            if !self.guard.try_advance(projection.generation) {
                tracing::debug!(
                    target: "page",
                    page = %self.id,
                    generation = projection.generation,
                    applied = self.guard.applied(),
                    "dropping stale projection"
                );
                return Ok(false);
            }
            let body = serde_json::to_vec_pretty(projection)?;
            let output = self.output.clone();
            let generation = projection.generation;
            let stored =
                tokio::task::spawn_blocking(move || write_if_newer(&output, generation, &body))
                    .await??;
            if let Some(stored) = stored {
                tracing::debug!(
                    target: "page",
                    page = %self.id,
                    generation,
                    stored,
                    "effects file already holds a newer projection"
                );
                return Ok(false);
            }
            tracing::debug!(
                target: "page",
                page = %self.id,
                generation = projection.generation,
                moved = projection.moved.len(),
                "projection applied"
            );
            Ok(true)
        }
        .boxed()
    }
}

/// Replaces the effects file unless it already holds `generation` or a newer one, and returns that
/// stored generation when it does. Every process writing the page takes the same lock file, so the
/// check and the write cannot interleave.
fn write_if_newer(output: &Path, generation: u64, body: &[u8]) -> Result<Option<u64>> {
    let lock_path = output.with_extension("lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;
    lock.lock_exclusive()
        .with_context(|| format!("failed to lock {}", lock_path.display()))?;

    let stored = std::fs::read(output)
        .ok()
        .and_then(|raw| serde_json::from_slice::<AppliedStamp>(&raw).ok())
        .map(|stamp| stamp.generation)
        .filter(|&stored| stored >= generation);
    if stored.is_none() {
        write_atomic(output, body)?;
    }
    lock.unlock()?;
    Ok(stored)
}

async fn read_snapshot(path: &Path) -> Result<PageSnapshot> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read page snapshot {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid page snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::settings::{LocalState, RowHighlights};

    const THREAD: &str = r#"{
        "kind": "comments",
        "rows": [
            {"id": "r1", "author": "troll", "indent_width": 0},
            {"id": "r2", "author": "bob", "indent_width": 40},
            {"id": "r3", "author": "carol", "indent_width": 0}
        ]
    }"#;

    fn read_effects(page: &SnapshotPage) -> Value {
        serde_json::from_str(&std::fs::read_to_string(page.output_path()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn discovers_pages_and_skips_effect_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("thread.json"), THREAD).unwrap();
        std::fs::write(dir.path().join("thread.effects.json"), "{}").unwrap();
        std::fs::write(dir.path().join("broken.json"), "not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let pages = SnapshotPage::discover(dir.path()).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id(), "thread");
        assert_eq!(pages[0].kind(), PageKind::Comments);
        assert_eq!(pages[0].rows().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn writes_effects_and_ignores_older_generations() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("thread.json");
        std::fs::write(&source, THREAD).unwrap();
        let page = SnapshotPage::load(&source).await.unwrap();

        let mut state = LocalState::default();
        state.blocked.combined = vec!["troll".into()];
        let rows = page.rows().await.unwrap();
        let manual = RowHighlights::new();
        let newer = PageProjection::compute(2, page.id(), page.kind(), &rows, &state, &manual);
        let cleared = LocalState::default();
        let older = PageProjection::compute(1, page.id(), page.kind(), &rows, &cleared, &manual);

        assert!(page.apply(&newer).await.unwrap());
        assert!(!page.apply(&older).await.unwrap());

        let written = read_effects(&page);
        assert_eq!(written["generation"], 2);
        assert_eq!(written["rows"][0]["effect"], "collapsed_placeholder");
        assert_eq!(written["rows"][0]["placeholder"], "blocked");
        assert_eq!(written["rows"][1]["effect"], "hidden");
        assert_eq!(written["render_order"], serde_json::json!(["r2", "r3", "r1"]));
    }

    #[tokio::test]
    async fn separate_handles_on_one_page_keep_the_newest_projection() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("thread.json");
        std::fs::write(&source, THREAD).unwrap();
        // Two loads stand in for the daemon and a one-shot command with their own guards.
        let daemon = SnapshotPage::load(&source).await.unwrap();
        let command = SnapshotPage::load(&source).await.unwrap();

        let rows = daemon.rows().await.unwrap();
        let manual = RowHighlights::new();
        let mut blocked = LocalState::default();
        blocked.blocked.combined = vec!["troll".into()];
        let cleared = LocalState::default();
        let at = |generation, state: &LocalState| {
            PageProjection::compute(generation, "thread", PageKind::Comments, &rows, state, &manual)
        };
        let newer = at(7, &blocked);
        let stale = at(6, &cleared);

        assert!(command.apply(&newer).await.unwrap());
        assert!(!daemon.apply(&stale).await.unwrap());
        let written = read_effects(&daemon);
        assert_eq!(written["generation"], 7);
        assert_eq!(written["rows"][0]["effect"], "collapsed_placeholder");

        assert!(daemon.apply(&at(8, &blocked)).await.unwrap());
        assert_eq!(read_effects(&command)["generation"], 8);

        let pages = SnapshotPage::discover(dir.path()).await.unwrap();
        assert_eq!(pages.len(), 1);
    }
}
