use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    sync::broadcast::error::RecvError,
    task::JoinHandle,
    time::sleep,
};

use crate::{
    db::settings::SettingsRepository,
    infrastructure::shutdown::ShutdownListener,
    page::{PageAdapter, PageProjection},
    settings::{ensure_defaults, LocalState, RowHighlights},
    tasks::{
        queue::{Trigger, TriggerQueue},
        sync::SyncService,
    },
};

/// Single consumer of the trigger queue. Passes run one at a time.
pub struct TriggerWorker {
    profile: String,
    queue: Arc<TriggerQueue>,
    sync: Arc<SyncService>,
    store: SettingsRepository,
    pages: Vec<Arc<dyn PageAdapter>>,
}

impl TriggerWorker {
    pub fn new(
        profile: String,
        queue: Arc<TriggerQueue>,
        sync: Arc<SyncService>,
        store: SettingsRepository,
        pages: Vec<Arc<dyn PageAdapter>>,
    ) -> Self {
        Self {
            profile,
            queue,
            sync,
            store,
            pages,
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.run_loop(&mut shutdown).await {
                tracing::error!(target: "worker", error = %err, "trigger worker crashed");
            }
        })
    }

    async fn run_loop(&self, shutdown: &mut ShutdownListener) -> Result<()> {
        let mut changes = self.store.subscribe();
        loop {
            if shutdown.is_triggered() {
                break;
            }

            let queued = self.queue.snapshot();
            let batch = self.queue.drain_ordered();
            if batch.is_empty() {
                tokio::select! {
                    _ = self.queue.ready() => {}
                    change = changes.recv() => match change {
                        Ok(change) if change.profile == self.profile => {
                            tracing::debug!(
                                target: "worker",
                                revision = change.revision,
                                "settings changed"
                            );
                            self.queue.push(Trigger::SettingsChanged);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(
                                target: "worker",
                                skipped,
                                "settings notifications lagged"
                            );
                            self.queue.push(Trigger::SettingsChanged);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = sleep(Duration::from_millis(500)) => {}
                    _ = shutdown.notified() => break,
                }
                continue;
            }

            tracing::debug!(
                target: "worker",
                high = queued.high_priority,
                normal = queued.normal_priority,
                "draining triggers"
            );
            for trigger in batch {
                if shutdown.is_triggered() {
                    tracing::info!(
                        target: "worker",
                        "shutdown requested; dropping queued triggers"
                    );
                    break;
                }
                if let Err(err) = self.handle(&trigger).await {
                    tracing::error!(target: "worker", ?trigger, error = %err, "trigger failed");
                }
            }
        }
        tracing::info!(target: "worker", "trigger worker stopped");
        Ok(())
    }

    pub async fn handle(&self, trigger: &Trigger) -> Result<()> {
        match trigger {
            Trigger::Sync { force: true } => {
                self.sync.sync(&self.profile).await?;
            }
            Trigger::Sync { force: false } => {
                self.sync.maybe_sync(&self.profile).await?;
            }
            Trigger::SettingsChanged => {
                self.project(|_| true).await?;
            }
            Trigger::PageRestored(page_id) => {
                if self.project(|page| page.id() == page_id).await? == 0 {
                    tracing::warn!(
                        target: "worker",
                        page = %page_id,
                        "restored page is not registered"
                    );
                }
            }
        }
        Ok(())
    }

    /// Projects the current settings onto every page accepted by `filter`.
    async fn project<F>(&self, filter: F) -> Result<usize>
    where
        F: Fn(&dyn PageAdapter) -> bool,
    {
        // Generations come from the store, so passes of other processes are ordered with ours.
        let (generation, snapshot) = self.store.stamped_snapshot(&self.profile).await?;
        let state = ensure_defaults(snapshot.local, &snapshot.sync);

        let mut visited = 0;
        for page in self.pages.iter().filter(|page| filter(page.as_ref())) {
            visited += 1;
            if let Err(err) = self
                .project_page(page.as_ref(), generation, &state, &snapshot.rows)
                .await
            {
                tracing::warn!(
                    target: "worker",
                    page = %page.id(),
                    generation,
                    error = %err,
                    "projection failed"
                );
            }
        }
        Ok(visited)
    }

    async fn project_page(
        &self,
        page: &dyn PageAdapter,
        generation: u64,
        state: &LocalState,
        manual: &RowHighlights,
    ) -> Result<()> {
        let rows = page.rows().await?;
        let projection =
            PageProjection::compute(generation, page.id(), page.kind(), &rows, state, manual);
        if page.apply(&projection).await? {
            tracing::info!(
                target: "worker",
                page = %page.id(),
                generation,
                rows = projection.rows.len(),
                "page projected"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use futures::{future::BoxFuture, FutureExt};
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::*;
    use crate::{
        api::testing::StubApi,
        db::{init_pool, memory_pool, settings::SettingsCommit},
        domain::{PageKind, RawRow},
        engine::RowEffect,
        infrastructure::shutdown::Shutdown,
        page::{GenerationGuard, SnapshotPage},
        tasks::{retry::RetryPolicy, watcher::StoreWatcher},
    };

    const THREAD: &str = r#"{
        "kind": "comments",
        "rows": [
            {"id": "r1", "author": "spammer", "indent_width": 0},
            {"id": "r2", "author": "bob", "indent_width": 40}
        ]
    }"#;

    struct RecordingPage {
        id: String,
        rows: Vec<RawRow>,
        guard: GenerationGuard,
        applied: Mutex<Vec<PageProjection>>,
    }

    impl RecordingPage {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                rows: vec![
                    RawRow {
                        id: Some("r1".into()),
                        author: Some("spammer".into()),
                        indent_width: Some(0),
                    },
                    RawRow {
                        id: Some("r2".into()),
                        author: Some("bob".into()),
                        indent_width: Some(40),
                    },
                ],
                guard: GenerationGuard::default(),
                applied: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> Option<PageProjection> {
            self.applied.lock().last().cloned()
        }
    }

    impl PageAdapter for RecordingPage {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> PageKind {
            PageKind::Comments
        }

        fn rows(&self) -> BoxFuture<'_, Result<Vec<RawRow>>> {
            let rows = self.rows.clone();
            async move { Ok(rows) }.boxed()
        }

        fn apply<'a>(&'a self, projection: &'a PageProjection) -> BoxFuture<'a, Result<bool>> {
            let fresh = self.guard.try_advance(projection.generation);
            if fresh {
                self.applied.lock().push(projection.clone());
            }
            async move { Ok(fresh) }.boxed()
        }
    }

    async fn worker(pages: Vec<Arc<dyn PageAdapter>>) -> (Arc<TriggerWorker>, SettingsRepository) {
        let store = SettingsRepository::new(memory_pool().await.unwrap());
        (worker_on(store.clone(), pages), store)
    }

    fn worker_on(
        store: SettingsRepository,
        pages: Vec<Arc<dyn PageAdapter>>,
    ) -> Arc<TriggerWorker> {
        let api = StubApi::default().with_list("spam", None, None, &["spammer"]);
        let sync = Arc::new(SyncService::new(
            store.clone(),
            Arc::new(api),
            RetryPolicy {
                retries: 0,
                delay: Duration::ZERO,
            },
            Duration::from_secs(3600),
        ));
        let worker = Arc::new(TriggerWorker::new(
            "p".into(),
            Arc::new(TriggerQueue::new()),
            sync,
            store,
            pages,
        ));
        worker
    }

    /// A worker with its own database handle and page handle, as a separate process would have.
    async fn process_worker(
        db: &Path,
        source: &Path,
    ) -> (Arc<TriggerWorker>, SettingsRepository) {
        let store = SettingsRepository::new(init_pool(db).await.unwrap());
        let page: Arc<dyn PageAdapter> = Arc::new(SnapshotPage::load(source).await.unwrap());
        (worker_on(store.clone(), vec![page]), store)
    }

    fn effects(dir: &Path) -> Value {
        let raw = std::fs::read_to_string(dir.join("thread.effects.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn blocking_spammer() -> SettingsCommit {
        let mut local = LocalState::default();
        local.blocked.combined = vec!["spammer".into()];
        SettingsCommit::local(local)
    }

    #[tokio::test]
    async fn settings_change_reprojects_every_page() {
        let a = RecordingPage::new("a");
        let b = RecordingPage::new("b");
        let (worker, store) = worker(vec![a.clone(), b.clone()]).await;
        let mut local = LocalState::default();
        local.blocked.combined = vec!["spammer".into()];
        store.commit("p", SettingsCommit::local(local)).await.unwrap();

        worker.handle(&Trigger::SettingsChanged).await.unwrap();
        let projection = a.last().unwrap();
        assert_eq!(projection.effect_of("r1"), Some(&RowEffect::CollapsedPlaceholder));
        assert_eq!(projection.effect_of("r2"), Some(&RowEffect::Hidden));
        assert_eq!(b.last().unwrap().generation, projection.generation);
    }

    #[tokio::test]
    async fn restored_page_is_projected_alone_with_newer_generation() {
        let a = RecordingPage::new("a");
        let b = RecordingPage::new("b");
        let (worker, _store) = worker(vec![a.clone(), b.clone()]).await;

        worker.handle(&Trigger::SettingsChanged).await.unwrap();
        worker
            .handle(&Trigger::PageRestored("b".into()))
            .await
            .unwrap();
        assert_eq!(a.applied.lock().len(), 1);
        assert_eq!(b.applied.lock().len(), 2);
        assert!(b.last().unwrap().generation > a.last().unwrap().generation);
    }

    #[tokio::test]
    async fn forced_sync_flows_through_to_pages() {
        let page = RecordingPage::new("thread");
        let (worker, store) = worker(vec![page.clone()]).await;
        let local = LocalState {
            subscribed_lists: vec!["spam".into()],
            ..Default::default()
        };
        store.commit("p", SettingsCommit::local(local)).await.unwrap();

        let (shutdown, _) = Shutdown::new();
        let handle = worker.clone().spawn(shutdown.subscribe());
        worker.queue.push(Trigger::Sync { force: true });

        let projected = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(projection) = page.last() {
                    if projection.effect_of("r1") == Some(&RowEffect::CollapsedPlaceholder) {
                        return projection;
                    }
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(projected.moved, vec!["r1"]);

        shutdown.trigger("test");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn workers_sharing_a_store_never_regress_a_page() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("settings.db");
        let source = dir.path().join("thread.json");
        std::fs::write(&source, THREAD).unwrap();
        let (daemon, daemon_store) = process_worker(&db, &source).await;
        let (command, command_store) = process_worker(&db, &source).await;

        // The daemon starts a pass before the command commits.
        let (started, before) = daemon_store.stamped_snapshot("p").await.unwrap();
        command_store.commit("p", blocking_spammer()).await.unwrap();
        command.handle(&Trigger::SettingsChanged).await.unwrap();
        let written = effects(dir.path());
        assert!(written["generation"].as_u64().unwrap() > started);
        assert_eq!(written["rows"][0]["effect"], "collapsed_placeholder");

        // Its pass finishes late with the older settings and must not overwrite the file.
        let late_page = SnapshotPage::load(&source).await.unwrap();
        let rows = late_page.rows().await.unwrap();
        let late = PageProjection::compute(
            started,
            "thread",
            PageKind::Comments,
            &rows,
            &ensure_defaults(before.local, &before.sync),
            &before.rows,
        );
        assert!(!late_page.apply(&late).await.unwrap());
        assert_eq!(effects(dir.path()), written);

        // A fresh daemon pass carries a newer generation and the committed settings.
        daemon.handle(&Trigger::SettingsChanged).await.unwrap();
        let refreshed = effects(dir.path());
        assert!(refreshed["generation"].as_u64() > written["generation"].as_u64());
        assert_eq!(refreshed["rows"][0]["effect"], "collapsed_placeholder");
    }

    #[tokio::test]
    async fn running_worker_reprojects_after_another_process_commits() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("settings.db");
        let source = dir.path().join("thread.json");
        std::fs::write(&source, THREAD).unwrap();
        let (daemon, daemon_store) = process_worker(&db, &source).await;
        let command_store = SettingsRepository::new(init_pool(&db).await.unwrap());

        let (shutdown, _) = Shutdown::new();
        let worker_handle = daemon.clone().spawn(shutdown.subscribe());
        let watcher = Arc::new(StoreWatcher::new(
            daemon_store,
            "p".into(),
            Duration::from_millis(20),
        ));
        let watcher_handle = watcher.spawn(shutdown.subscribe());

        command_store.commit("p", blocking_spammer()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if dir.path().join("thread.effects.json").exists()
                    && effects(dir.path())["rows"][0]["effect"] == "collapsed_placeholder"
                {
                    return;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        shutdown.trigger("test");
        worker_handle.await.unwrap();
        watcher_handle.await.unwrap();
    }
}
