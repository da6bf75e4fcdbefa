use std::{future::Future, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::{
    api::ListApi,
    db::settings::{SettingsCommit, SettingsRepository},
    domain::{ListKind, NameKey},
    engine::{is_default_style, resolve_style, RawColor},
    settings::{
        apply_import, build_export, ensure_defaults, full_state, parse_import, ExportData,
        FullState, HideMode, LocalState, SyncSettings, WritableList, DEFAULT_API_BASE_URL,
    },
    tasks::sync::SyncService,
};

use super::{CommandError, CommandOutcome};

type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatePayload {
    pub state: LocalState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPayload {
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPayload {
    pub public_key: String,
    pub state: LocalState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportPayload {
    pub data: ExportData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowPayload {
    pub id: String,
    pub highlighted: bool,
}

/// Settings and list-membership commands of one profile.
pub struct CommandService {
    profile: String,
    store: SettingsRepository,
    api: Arc<dyn ListApi>,
    sync: Arc<SyncService>,
}

impl CommandService {
    pub fn new(
        profile: String,
        store: SettingsRepository,
        api: Arc<dyn ListApi>,
        sync: Arc<SyncService>,
    ) -> Self {
        Self {
            profile,
            store,
            api,
            sync,
        }
    }

    pub async fn sync_now(&self) -> CommandOutcome<StatePayload> {
        self.run("sync_now", async {
            let state = self.sync.sync(&self.profile).await?;
            Ok(StatePayload { state })
        })
        .await
    }

    /// Current merged view, refreshed first when the last sync is stale.
    pub async fn state(&self) -> CommandOutcome<FullState> {
        self.run("state", async {
            self.sync.maybe_sync(&self.profile).await?;
            let snapshot = self.store.snapshot(&self.profile).await?;
            Ok(full_state(&snapshot.local, &snapshot.sync))
        })
        .await
    }

    pub async fn add_member(
        &self,
        username: &str,
        public_key: Option<&str>,
    ) -> CommandOutcome<ResultPayload> {
        self.run("add_member", async {
            let username = required_name(username)?;
            let (local, sync) = self.load().await?;
            let target = match public_key.map(str::trim).filter(|pk| !pk.is_empty()) {
                Some(pk) => sync.writable(pk),
                None if sync.writable_lists.len() == 1 => sync.writable_lists.first(),
                None => None,
            }
            .ok_or(CommandError::NoWritableList)?;

            let result = self
                .api
                .add_member(write_base(target, &local), target, username)
                .await?;
            tracing::info!(target: "api", list_id = %target.public_key, "member added");
            self.sync.sync(&self.profile).await?;
            Ok(ResultPayload { result })
        })
        .await
    }

    pub async fn remove_member(
        &self,
        username: &str,
        public_key: &str,
    ) -> CommandOutcome<ResultPayload> {
        self.run("remove_member", async {
            let username = required_name(username)?;
            let (local, sync) = self.load().await?;
            let target = sync
                .writable(public_key)
                .ok_or(CommandError::NoMatchingWritable)?;

            let result = self
                .api
                .remove_member(write_base(target, &local), target, username)
                .await?;
            tracing::info!(target: "api", list_id = %target.public_key, "member removed");
            self.sync.sync(&self.profile).await?;
            Ok(ResultPayload { result })
        })
        .await
    }

    pub async fn verify_list_key(
        &self,
        public_key: &str,
        private_key: &str,
        base_url: Option<&str>,
    ) -> CommandOutcome<ResultPayload> {
        self.run("verify_list_key", async {
            let (local, _) = self.load().await?;
            let base = base_url
                .map(str::trim)
                .filter(|base| !base.is_empty())
                .unwrap_or(local.api_base());
            let result = self.api.verify_key(base, public_key, private_key).await?;
            Ok(ResultPayload { result })
        })
        .await
    }

    /// Creates a list, keeps its key pair as a writable list and subscribes to it.
    pub async fn create_list(
        &self,
        kind: ListKind,
        name: Option<&str>,
        description: Option<&str>,
    ) -> CommandOutcome<CreatedPayload> {
        self.run("create_list", async {
            let name = name.map(str::trim).filter(|name| !name.is_empty());
            let description = description.map(str::trim).filter(|d| !d.is_empty());
            let (local, _) = self.load().await?;
            let base = local.api_base().to_string();

            let created = self.api.create_list(&base, kind, name, description).await?;
            let label = name
                .map(str::to_string)
                .unwrap_or_else(|| format!("{kind} list"));
            let writable = WritableList {
                public_key: created.public_key.clone(),
                private_key: created.private_key,
                label: Some(label.clone()),
                kind,
                base_url: Some(base),
            };
            self.edit_sync(|sync| {
                sync.writable_lists.push(writable);
                Ok(())
            })
            .await?;
            tracing::info!(target: "api", list_id = %created.public_key, %kind, "list created");

            let state = self
                .subscribe_inner(&created.public_key, Some(kind), Some(&label))
                .await?;
            Ok(CreatedPayload {
                public_key: created.public_key,
                state,
            })
        })
        .await
    }

    pub async fn subscribe(
        &self,
        public_key: &str,
        kind: Option<ListKind>,
        name: Option<&str>,
    ) -> CommandOutcome<StatePayload> {
        self.run("subscribe", async {
            let state = self.subscribe_inner(public_key, kind, name).await?;
            Ok(StatePayload { state })
        })
        .await
    }

    pub async fn unsubscribe(&self, public_key: &str) -> CommandOutcome<StatePayload> {
        self.run("unsubscribe", async {
            let public_key = required_key(public_key)?;
            self.edit(|local| {
                local.forget_list(public_key);
                Ok(())
            })
            .await?;
            Ok(StatePayload {
                state: self.sync_tolerant().await?,
            })
        })
        .await
    }

    /// Moves `from` to the position currently held by `to`.
    pub async fn reorder_subscription(&self, from: &str, to: &str) -> CommandOutcome<StatePayload> {
        self.run("reorder_subscription", async {
            self.edit(|local| {
                let position = |id: &str| {
                    local
                        .subscribed_lists
                        .iter()
                        .position(|item| item == id.trim())
                        .ok_or_else(|| CommandError::NotSubscribed(id.trim().to_string()))
                };
                let from_index = position(from)?;
                let to_index = position(to)?;
                let item = local.subscribed_lists.remove(from_index);
                local.subscribed_lists.insert(to_index, item);
                Ok(())
            })
            .await?;
            Ok(StatePayload {
                state: self.sync_tolerant().await?,
            })
        })
        .await
    }

    pub async fn set_transient_unblock(&self, enabled: bool) -> CommandOutcome<StatePayload> {
        self.local_command("set_transient_unblock", |local| {
            local.transient_unblock_active = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_list_transient(
        &self,
        public_key: &str,
        transient: bool,
    ) -> CommandOutcome<StatePayload> {
        self.run("set_list_transient", async {
            let public_key = required_key(public_key)?;
            self.edit(|local| {
                if transient {
                    local.transient_lists.insert(public_key.to_string(), true);
                } else {
                    local.transient_lists.remove(public_key);
                }
                Ok(())
            })
            .await?;
            let state = self.sync.reclassify(&self.profile).await?;
            Ok(StatePayload { state })
        })
        .await
    }

    /// Stores the normalized color of a list. An empty, invalid or default color clears the
    /// override.
    pub async fn set_highlight_color(
        &self,
        public_key: &str,
        raw: Option<RawColor>,
    ) -> CommandOutcome<StatePayload> {
        self.run("set_highlight_color", async {
            let public_key = required_key(public_key)?;
            let style = resolve_style(raw.as_ref());
            let state = self
                .edit(|local| {
                    if is_default_style(&style) {
                        local.highlight_colors.remove(public_key);
                    } else {
                        local
                            .highlight_colors
                            .insert(public_key.to_string(), RawColor::from(&style));
                    }
                    Ok(local.clone())
                })
                .await?;
            Ok(StatePayload { state })
        })
        .await
    }

    pub async fn add_local_blocked(&self, name: &str) -> CommandOutcome<StatePayload> {
        self.edit_names("add_local_blocked", name, NameField::Blocked, true).await
    }

    pub async fn remove_local_blocked(&self, name: &str) -> CommandOutcome<StatePayload> {
        self.edit_names("remove_local_blocked", name, NameField::Blocked, false).await
    }

    pub async fn add_highlighted_user(&self, name: &str) -> CommandOutcome<StatePayload> {
        self.edit_names("add_highlighted_user", name, NameField::Highlighted, true).await
    }

    pub async fn remove_highlighted_user(&self, name: &str) -> CommandOutcome<StatePayload> {
        self.edit_names("remove_highlighted_user", name, NameField::Highlighted, false).await
    }

    pub async fn remove_writable(&self, public_key: &str) -> CommandOutcome<()> {
        self.run("remove_writable", async {
            let public_key = required_key(public_key)?;
            self.edit_sync(|sync| {
                let before = sync.writable_lists.len();
                sync.writable_lists
                    .retain(|list| list.public_key.trim() != public_key);
                if sync.writable_lists.len() == before {
                    return Err(CommandError::NoMatchingWritable);
                }
                Ok(())
            })
            .await
        })
        .await
    }

    /// Blank resets to the default server.
    pub async fn set_api_base_url(&self, url: Option<&str>) -> CommandOutcome<StatePayload> {
        let url = url.map(str::trim).filter(|url| !url.is_empty()).map(str::to_string);
        self.local_command("set_api_base_url", move |local| {
            local.api_base_url = match url {
                Some(url) => normalize_base_url(&url)?,
                None => DEFAULT_API_BASE_URL.to_string(),
            };
            Ok(())
        })
        .await
    }

    pub async fn set_hide_mode(&self, mode: HideMode) -> CommandOutcome<StatePayload> {
        self.local_command("set_hide_mode", |local| {
            local.hide_mode = mode;
            Ok(())
        })
        .await
    }

    pub async fn toggle_row_highlight(&self, row_id: &str) -> CommandOutcome<RowPayload> {
        self.run("toggle_row_highlight", async {
            let id = row_id.trim();
            if id.is_empty() {
                return Err(anyhow::anyhow!("Missing row id").into());
            }
            let highlighted = self
                .store
                .update(&self.profile, |snapshot| {
                    let mut rows = snapshot.rows;
                    let highlighted = if rows.remove(id) {
                        false
                    } else {
                        rows.insert(id.to_string());
                        true
                    };
                    Ok::<_, CommandError>((SettingsCommit::rows(rows), highlighted))
                })
                .await?;
            Ok(RowPayload {
                id: id.to_string(),
                highlighted,
            })
        })
        .await
    }

    pub async fn export(&self) -> CommandOutcome<ExportPayload> {
        self.run("export", async {
            let (local, sync) = self.load().await?;
            Ok(ExportPayload {
                data: build_export(&local, &sync, Utc::now()),
            })
        })
        .await
    }

    /// Validates the whole document before anything is written.
    pub async fn import(&self, text: &str) -> CommandOutcome<StatePayload> {
        self.run("import", async {
            let data = parse_import(text)?;
            self.store
                .update(&self.profile, |snapshot| {
                    let local = ensure_defaults(snapshot.local, &snapshot.sync);
                    let (local, sync) = apply_import(&data, local, snapshot.sync);
                    Ok::<_, CommandError>((SettingsCommit::both(local, sync), ()))
                })
                .await?;
            tracing::info!(target: "settings", lists = data.lists.len(), "settings imported");
            Ok(StatePayload {
                state: self.sync_tolerant().await?,
            })
        })
        .await
    }

    async fn run<T, Fut>(&self, command: &'static str, fut: Fut) -> CommandOutcome<T>
    where
        Fut: Future<Output = CommandResult<T>>,
    {
        let result = fut.await;
        if let Err(err) = &result {
            tracing::warn!(target: "settings", command, error = %err, "command failed");
        }
        result.into()
    }

    /// Read-only view; edits go through `edit`, `edit_local` or `edit_sync`.
    async fn load(&self) -> CommandResult<(LocalState, SyncSettings)> {
        let snapshot = self.store.snapshot(&self.profile).await?;
        let local = ensure_defaults(snapshot.local, &snapshot.sync);
        Ok((local, snapshot.sync))
    }

    /// Applies `edit` to the stored local state in one write and mirrors its roaming subset into
    /// the synced area.
    async fn edit<T, F>(&self, edit: F) -> CommandResult<T>
    where
        F: FnOnce(&mut LocalState) -> CommandResult<T>,
    {
        self.store
            .update(&self.profile, |snapshot| {
                let mut local = ensure_defaults(snapshot.local, &snapshot.sync);
                let value = edit(&mut local)?;
                let mut sync = snapshot.sync;
                sync.mirror_from(&local);
                Ok((SettingsCommit::both(local, sync), value))
            })
            .await
    }

    /// Like `edit` for settings that stay on this device.
    async fn edit_local<T, F>(&self, edit: F) -> CommandResult<T>
    where
        F: FnOnce(&mut LocalState) -> CommandResult<T>,
    {
        self.store
            .update(&self.profile, |snapshot| {
                let mut local = ensure_defaults(snapshot.local, &snapshot.sync);
                let value = edit(&mut local)?;
                Ok((SettingsCommit::local(local), value))
            })
            .await
    }

    async fn edit_sync<F>(&self, edit: F) -> CommandResult<()>
    where
        F: FnOnce(&mut SyncSettings) -> CommandResult<()>,
    {
        self.store
            .update(&self.profile, |snapshot| {
                let mut sync = snapshot.sync;
                edit(&mut sync)?;
                Ok((SettingsCommit::sync(sync), ()))
            })
            .await
    }

    async fn local_command<F>(
        &self,
        command: &'static str,
        edit: F,
    ) -> CommandOutcome<StatePayload>
    where
        F: FnOnce(&mut LocalState) -> CommandResult<()>,
    {
        self.run(command, async {
            let state = self
                .edit_local(|local| {
                    edit(local)?;
                    Ok(local.clone())
                })
                .await?;
            Ok(StatePayload { state })
        })
        .await
    }

    async fn edit_names(
        &self,
        command: &'static str,
        name: &str,
        field: NameField,
        add: bool,
    ) -> CommandOutcome<StatePayload> {
        self.run(command, async {
            let name = required_name(name)?;
            let key = NameKey::new(name).ok_or(CommandError::MissingUsername)?;
            self.edit(|local| {
                let names = field.of(local);
                let present = names
                    .iter()
                    .any(|existing| NameKey::new(existing).as_ref() == Some(&key));
                if add && !present {
                    names.push(name.to_string());
                } else if !add {
                    names.retain(|existing| NameKey::new(existing).as_ref() != Some(&key));
                }
                Ok(())
            })
            .await?;
            let state = self.sync.reclassify(&self.profile).await?;
            Ok(StatePayload { state })
        })
        .await
    }

    async fn subscribe_inner(
        &self,
        public_key: &str,
        kind: Option<ListKind>,
        name: Option<&str>,
    ) -> CommandResult<LocalState> {
        let public_key = required_key(public_key)?;
        self.edit(|local| {
            if !local.subscribed_lists.iter().any(|id| id == public_key) {
                local.subscribed_lists.push(public_key.to_string());
            }
            if let Some(kind) = kind {
                local
                    .subscribed_overrides
                    .insert(public_key.to_string(), kind);
            }
            if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
                local
                    .subscribed_labels
                    .insert(public_key.to_string(), name.to_string());
            }
            Ok(())
        })
        .await?;
        tracing::info!(target: "settings", list_id = %public_key, "list subscribed");
        self.sync_tolerant().await
    }

    /// Runs a sync pass; a failure leaves the committed settings in place.
    async fn sync_tolerant(&self) -> CommandResult<LocalState> {
        match self.sync.sync(&self.profile).await {
            Ok(state) => Ok(state),
            Err(err) => {
                tracing::warn!(target: "sync", error = %err, "sync after settings change failed");
                Ok(self.load().await?.0)
            }
        }
    }
}

#[derive(Clone, Copy)]
enum NameField {
    Blocked,
    Highlighted,
}

impl NameField {
    fn of(self, local: &mut LocalState) -> &mut Vec<String> {
        match self {
            NameField::Blocked => &mut local.local_blocked_users,
            NameField::Highlighted => &mut local.highlighted_users,
        }
    }
}

fn required_name(name: &str) -> CommandResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CommandError::MissingUsername);
    }
    Ok(name)
}

fn required_key(public_key: &str) -> CommandResult<&str> {
    let public_key = public_key.trim();
    if public_key.is_empty() {
        return Err(CommandError::MissingPublicKey);
    }
    Ok(public_key)
}

fn write_base<'a>(target: &'a WritableList, local: &'a LocalState) -> &'a str {
    target
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|base| !base.is_empty())
        .unwrap_or(local.api_base())
}

fn normalize_base_url(raw: &str) -> CommandResult<String> {
    let url = Url::parse(raw).map_err(|err| CommandError::InvalidBaseUrl(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CommandError::InvalidBaseUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
