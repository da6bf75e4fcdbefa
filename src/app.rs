use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;
use tokio::{task::JoinHandle, time::timeout};
use tokio_cron_scheduler::JobScheduler;

use crate::{
    api::{ApiClient, ListApi},
    cli::{self, Command},
    commands::{CommandOutcome, CommandService},
    config::AppConfig,
    db::{self, settings::SettingsRepository},
    infrastructure::{
        directories::ResolvedPaths, instance_guard::InstanceGuard, shutdown::Shutdown,
    },
    page::{PageAdapter, SnapshotPage},
    settings::DEFAULT_API_BASE_URL,
    tasks::{
        backup::ExportBackup,
        processor::TriggerWorker,
        queue::{Trigger, TriggerQueue},
        scheduler::configure_sync_jobs,
        sync::SyncService,
        watcher::StoreWatcher,
    },
};

/// Everything one profile needs, shared by the daemon and one-shot commands.
struct Services {
    store: SettingsRepository,
    sync: Arc<SyncService>,
    commands: CommandService,
    pages: Vec<Arc<dyn PageAdapter>>,
}

impl Services {
    async fn build(config: &AppConfig, paths: &ResolvedPaths) -> Result<Self> {
        let pool = db::init_pool(&paths.db_path).await.with_context(|| {
            format!("failed to open settings database {}", paths.db_path.display())
        })?;
        let store = SettingsRepository::new(pool);

        let http = Client::builder()
            .user_agent(format!("overmod/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.http.timeout)
            .build()?;
        let api: Arc<dyn ListApi> = Arc::new(ApiClient::new(http));

        let sync = Arc::new(SyncService::new(
            store.clone(),
            api.clone(),
            config.sync.retry_policy(),
            config.sync.max_age,
        ));
        let commands =
            CommandService::new(config.profile.clone(), store.clone(), api, sync.clone());

        if config.api_base_url != DEFAULT_API_BASE_URL {
            if let CommandOutcome::Failed(error) =
                commands.set_api_base_url(Some(&config.api_base_url)).await
            {
                bail!("failed to apply configured API base URL: {error}");
            }
        }

        let pages = match &paths.pages_dir {
            Some(dir) => SnapshotPage::discover(dir)
                .await?
                .into_iter()
                .map(|page| Arc::new(page) as Arc<dyn PageAdapter>)
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            store,
            sync,
            commands,
            pages,
        })
    }
}

pub struct OvermodApp {
    _guard: InstanceGuard,
    scheduler: JobScheduler,
    worker_handle: JoinHandle<()>,
    backup_handle: Option<JoinHandle<()>>,
    watcher_handle: JoinHandle<()>,
    store: SettingsRepository,
    shutdown: Shutdown,
}

impl OvermodApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let guard = InstanceGuard::acquire(&paths.data_dir, &config.profile)?;
        let services = Services::build(&config, &paths).await?;

        if let Some(path) = &config.transfer.import_file {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read import file {}", path.display()))?;
            if let CommandOutcome::Failed(error) = services.commands.import(&text).await {
                bail!("import of {} failed: {error}", path.display());
            }
            tracing::info!(target: "settings", path = %path.display(), "settings imported");
        }

        let queue = Arc::new(TriggerQueue::new());
        tracing::info!(
            target: "lifecycle",
            profile = %config.profile,
            pages = services.pages.len(),
            "starting trigger worker"
        );
        let worker = Arc::new(TriggerWorker::new(
            config.profile.clone(),
            queue.clone(),
            services.sync.clone(),
            services.store.clone(),
            services.pages,
        ));
        let worker_handle = worker.spawn(shutdown.subscribe());

        let backup_handle = config.transfer.export_file.clone().map(|path| {
            let backup = Arc::new(ExportBackup::new(
                services.store.clone(),
                config.profile.clone(),
                path,
            ));
            backup.spawn(shutdown.subscribe())
        });

        let watcher = Arc::new(StoreWatcher::new(
            services.store.clone(),
            config.profile.clone(),
            config.sync.store_poll,
        ));
        let watcher_handle = watcher.spawn(shutdown.subscribe());

        let scheduler = configure_sync_jobs(&config.sync.cron_specs, queue.clone()).await?;

        queue.push(Trigger::Sync { force: false });
        queue.push(Trigger::SettingsChanged);

        Ok(Self {
            _guard: guard,
            scheduler,
            worker_handle,
            backup_handle,
            watcher_handle,
            store: services.store,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let OvermodApp {
            _guard,
            mut scheduler,
            mut worker_handle,
            backup_handle,
            watcher_handle,
            store,
            shutdown,
        } = self;

        tracing::info!(target: "lifecycle", "overmod daemon started");

        let mut shutdown_listener = shutdown.subscribe();
        shutdown_listener.notified().await;
        tracing::info!(
            target: "lifecycle",
            reason = shutdown.reason().unwrap_or("unknown"),
            "stopping daemon"
        );

        let shutdown_timeout = Duration::from_secs(5);

        match timeout(shutdown_timeout, scheduler.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(target: "scheduler", ?err, "failed to stop scheduler");
            }
            Err(_) => {
                tracing::warn!(
                    target: "scheduler",
                    "scheduler did not stop within {:?}",
                    shutdown_timeout
                );
            }
        }

        let worker_sleep = tokio::time::sleep(shutdown_timeout);
        tokio::pin!(worker_sleep);
        tokio::select! {
            res = &mut worker_handle => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!(target: "worker", "trigger worker panicked");
                    }
                }
            }
            _ = &mut worker_sleep => {
                tracing::warn!(
                    target: "worker",
                    "trigger worker did not stop within {:?}; aborting",
                    shutdown_timeout
                );
                worker_handle.abort();
            }
        }

        if let Some(handle) = backup_handle {
            if timeout(shutdown_timeout, handle).await.is_err() {
                tracing::warn!(target: "settings", "export backup did not stop in time");
            }
        }

        if timeout(shutdown_timeout, watcher_handle).await.is_err() {
            tracing::warn!(target: "settings", "store watcher did not stop in time");
        }

        if timeout(shutdown_timeout, store.close()).await.is_err() {
            tracing::warn!(
                target: "db",
                "settings store did not close within {:?}",
                shutdown_timeout
            );
        }

        tracing::info!(target: "lifecycle", "overmod stopped");
        Ok(())
    }
}

/// Runs one command against the stored settings, then refreshes page effects when it succeeded.
pub async fn run_once(
    config: AppConfig,
    paths: ResolvedPaths,
    command: Command,
) -> Result<(bool, Value)> {
    let services = Services::build(&config, &paths).await?;
    let (ok, output) = cli::execute(command, &services.commands).await?;

    if ok && !services.pages.is_empty() {
        let worker = TriggerWorker::new(
            config.profile.clone(),
            Arc::new(TriggerQueue::new()),
            services.sync.clone(),
            services.store.clone(),
            services.pages,
        );
        if let Err(err) = worker.handle(&Trigger::SettingsChanged).await {
            tracing::warn!(target: "worker", error = %err, "failed to refresh page effects");
        }
    }

    services.store.close().await;
    Ok((ok, output))
}
