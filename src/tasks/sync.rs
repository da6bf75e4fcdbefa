use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::{
    api::{ListApi, RemoteList},
    db::settings::{SettingsCommit, SettingsRepository},
    domain::{name_set, ListKind, NameSet, SourceList},
    engine::{classify, Classification},
    settings::{ensure_defaults, LocalState},
    tasks::retry::{with_retry, RetryPolicy},
};

/// Fetches subscribed lists, classifies every name and commits the verdict caches.
pub struct SyncService {
    store: SettingsRepository,
    api: Arc<dyn ListApi>,
    retry: RetryPolicy,
    max_age: Duration,
}

struct FetchedList {
    id: String,
    kind: ListKind,
    members: Vec<String>,
    label: Option<String>,
    fresh: bool,
}

impl SyncService {
    pub fn new(
        store: SettingsRepository,
        api: Arc<dyn ListApi>,
        retry: RetryPolicy,
        max_age: Duration,
    ) -> Self {
        Self {
            store,
            api,
            retry,
            max_age,
        }
    }

    pub async fn sync(&self, profile: &str) -> Result<LocalState> {
        self.pass(profile, true).await
    }

    /// Reruns classification over the cached members without touching the network.
    pub async fn reclassify(&self, profile: &str) -> Result<LocalState> {
        self.pass(profile, false).await
    }

    async fn pass(&self, profile: &str, fetch: bool) -> Result<LocalState> {
        let remote = if fetch {
            let snapshot = self.store.snapshot(profile).await?;
            self.fetch_all(&ensure_defaults(snapshot.local, &snapshot.sync)).await
        } else {
            HashMap::new()
        };
        let synced_at = fetch.then(Utc::now);

        // Classify against the settings as stored at write time; edits committed while the lists
        // were in flight are kept and only the derived caches are replaced.
        let (next, list_count, stale) = self
            .store
            .update(profile, |snapshot| {
                let state = ensure_defaults(snapshot.local, &snapshot.sync);
                let lists = resolve_lists(&state, &remote);
                let stale = lists.iter().filter(|list| !list.fresh).count();
                let classification = classify_lists(&state, &lists);
                let next = apply_pass(state, &lists, &classification, synced_at);

                let mut sync = snapshot.sync;
                sync.subscribed_labels.extend(next.subscribed_labels.clone());
                let commit = SettingsCommit::both(next.clone(), sync);
                Ok::<_, anyhow::Error>((commit, (next, lists.len(), stale)))
            })
            .await?;

        tracing::info!(
            target: "sync",
            profile,
            fetch,
            lists = list_count,
            stale,
            blocked = next.blocked.combined.len(),
            highlighted = next.highlighted.combined.len(),
            "sync pass committed"
        );
        Ok(next)
    }

    /// Syncs only when the last successful pass is older than the configured age.
    pub async fn maybe_sync(&self, profile: &str) -> Result<LocalState> {
        let snapshot = self.store.snapshot(profile).await?;
        let max_age = chrono::Duration::from_std(self.max_age)
            .unwrap_or_else(|_| chrono::Duration::hours(4));
        if !snapshot.local.sync_is_stale(Utc::now(), max_age) {
            return Ok(ensure_defaults(snapshot.local, &snapshot.sync));
        }
        match self.sync(profile).await {
            Ok(next) => Ok(next),
            Err(err) => {
                tracing::warn!(target: "sync", error = %err, profile, "automatic sync failed");
                Ok(ensure_defaults(snapshot.local, &snapshot.sync))
            }
        }
    }

    /// Lists that could not be fetched are left out and fall back to their last known members.
    async fn fetch_all(&self, state: &LocalState) -> HashMap<String, RemoteList> {
        let base = state.api_base();
        let mut fetched = HashMap::with_capacity(state.subscribed_lists.len());
        for id in subscribed_ids(state) {
            match with_retry(self.retry, || self.api.fetch_list(base, id)).await {
                Ok(list) => {
                    fetched.insert(id.to_string(), list);
                }
                Err(err) => tracing::warn!(
                    target: "sync",
                    list_id = %id,
                    error = %err,
                    "list fetch failed; using last known members"
                ),
            }
        }
        fetched
    }
}

/// One entry per current subscription, in priority order.
fn resolve_lists(state: &LocalState, remote: &HashMap<String, RemoteList>) -> Vec<FetchedList> {
    subscribed_ids(state)
        .map(|id| {
            let override_kind = state.subscribed_overrides.get(id).copied();
            match remote.get(id) {
                Some(list) => FetchedList {
                    id: id.to_string(),
                    kind: override_kind.or(list.kind).unwrap_or_default(),
                    members: list.members.clone(),
                    label: list.name.clone(),
                    fresh: true,
                },
                None => last_known(state, id, override_kind),
            }
        })
        .collect()
}

fn classify_lists(state: &LocalState, lists: &[FetchedList]) -> Classification {
    let sources: Vec<SourceList> = lists
        .iter()
        .enumerate()
        .map(|(priority, list)| SourceList {
            id: list.id.clone(),
            kind: list.kind,
            transient: state.is_transient(&list.id),
            members: list.members.clone(),
            priority,
        })
        .collect();
    classify(
        &name_set(&state.local_blocked_users),
        &name_set(&state.highlighted_users),
        &sources,
    )
}

fn subscribed_ids(state: &LocalState) -> impl Iterator<Item = &str> {
    state
        .subscribed_lists
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
}

fn last_known(state: &LocalState, id: &str, override_kind: Option<ListKind>) -> FetchedList {
    let previous_highlight = state
        .highlighted
        .source_lists
        .get(id)
        .filter(|members| !members.is_empty());
    let previous_kind = if previous_highlight.is_some() {
        ListKind::Highlight
    } else {
        ListKind::Block
    };
    let members = previous_highlight
        .or_else(|| state.blocked.source_lists.get(id))
        .cloned()
        .unwrap_or_default();
    FetchedList {
        id: id.to_string(),
        kind: override_kind.unwrap_or(previous_kind),
        members,
        label: None,
        fresh: false,
    }
}

fn apply_pass(
    mut state: LocalState,
    fetched: &[FetchedList],
    classification: &Classification,
    synced_at: Option<DateTime<Utc>>,
) -> LocalState {
    let mut blocked_sources = BTreeMap::new();
    let mut highlighted_sources = BTreeMap::new();
    for list in fetched {
        if let Some(label) = &list.label {
            state
                .subscribed_labels
                .entry(list.id.clone())
                .or_insert_with(|| label.clone());
        }
        match list.kind {
            ListKind::Block => blocked_sources.insert(list.id.clone(), list.members.clone()),
            ListKind::Highlight => {
                highlighted_sources.insert(list.id.clone(), list.members.clone())
            }
        };
    }

    let names = |set: NameSet| -> Vec<String> {
        set.into_iter().map(|key| key.as_str().to_string()).collect()
    };

    state.blocked.combined = names(classification.blocked(true));
    state.blocked.combined_without_transient = names(classification.blocked(false));
    state.blocked.transient_only = names(classification.transient_only_blocked.clone());
    state.blocked.source_lists = blocked_sources;
    if synced_at.is_some() {
        state.blocked.last_sync = synced_at;
        state.highlighted.last_sync = synced_at;
    }
    state.highlighted.combined = names(classification.highlighted());
    state.highlighted.source_lists = highlighted_sources;
    state
}
