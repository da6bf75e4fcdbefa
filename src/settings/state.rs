use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{name_set, names::merge_names, ListKind, NameSet},
    engine::{highlight_style_map, RawColor, StyleMap},
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.overmod.org";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HideMode {
    #[default]
    Remove,
    Collapse,
}

impl std::str::FromStr for HideMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "remove" => Ok(HideMode::Remove),
            "collapse" => Ok(HideMode::Collapse),
            other => Err(format!(
                "unknown hide mode {other:?}; expected \"remove\" or \"collapse\""
            )),
        }
    }
}

/// Last classification result, kept so a failed fetch can fall back to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockedCache {
    pub combined: Vec<String>,
    pub combined_without_transient: Vec<String>,
    pub transient_only: Vec<String>,
    pub source_lists: BTreeMap<String, Vec<String>>,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightedCache {
    pub combined: Vec<String>,
    pub source_lists: BTreeMap<String, Vec<String>>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Device-local settings of one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalState {
    pub api_base_url: String,
    /// Subscription order doubles as list priority.
    pub subscribed_lists: Vec<String>,
    pub subscribed_overrides: BTreeMap<String, ListKind>,
    pub subscribed_labels: BTreeMap<String, String>,
    pub highlight_colors: BTreeMap<String, RawColor>,
    pub transient_lists: BTreeMap<String, bool>,
    pub local_blocked_users: Vec<String>,
    pub highlighted_users: Vec<String>,
    pub hide_mode: HideMode,
    pub transient_unblock_active: bool,
    pub blocked: BlockedCache,
    pub highlighted: HighlightedCache,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            subscribed_lists: Vec::new(),
            subscribed_overrides: BTreeMap::new(),
            subscribed_labels: BTreeMap::new(),
            highlight_colors: BTreeMap::new(),
            transient_lists: BTreeMap::new(),
            local_blocked_users: Vec::new(),
            highlighted_users: Vec::new(),
            hide_mode: HideMode::default(),
            transient_unblock_active: false,
            blocked: BlockedCache::default(),
            highlighted: HighlightedCache::default(),
        }
    }
}

impl LocalState {
    pub fn is_transient(&self, list_id: &str) -> bool {
        self.transient_lists.get(list_id).copied().unwrap_or(false)
    }

    /// Base URL without a trailing slash, falling back to the default when blank.
    pub fn api_base(&self) -> &str {
        let base = self.api_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            DEFAULT_API_BASE_URL
        } else {
            base
        }
    }

    /// Blocked names for projection; transient lists are ignored while the toggle is on.
    pub fn effective_blocked(&self) -> NameSet {
        if self.transient_unblock_active {
            name_set(&self.blocked.combined_without_transient)
        } else {
            name_set(&self.blocked.combined)
        }
    }

    pub fn effective_highlighted(&self) -> NameSet {
        let mut set = name_set(&self.highlighted_users);
        set.extend(name_set(&self.highlighted.combined));
        set
    }

    pub fn style_map(&self) -> StyleMap {
        highlight_style_map(
            &self.subscribed_lists,
            &self.highlighted.source_lists,
            &self.highlight_colors,
        )
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.blocked.last_sync
    }

    pub fn sync_is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.last_sync().map_or(true, |last| now - last > max_age)
    }

    /// Drops every per-list setting of `list_id`.
    pub fn forget_list(&mut self, list_id: &str) {
        self.subscribed_lists.retain(|id| id != list_id);
        self.subscribed_overrides.remove(list_id);
        self.subscribed_labels.remove(list_id);
        self.highlight_colors.remove(list_id);
        self.transient_lists.remove(list_id);
    }
}

/// A list this profile holds the signing key for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritableList {
    pub public_key: String,
    pub private_key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ListKind,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Settings that roam between devices of the same profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub writable_lists: Vec<WritableList>,
    pub subscribed_lists: Vec<String>,
    pub subscribed_overrides: BTreeMap<String, ListKind>,
    pub subscribed_labels: BTreeMap<String, String>,
    pub highlight_colors: BTreeMap<String, RawColor>,
    pub transient_lists: BTreeMap<String, bool>,
    pub local_blocked_users: Vec<String>,
    pub highlighted_users: Vec<String>,
}

impl SyncSettings {
    /// Copies the roaming subset of `local`; writable lists are left untouched.
    pub fn mirror_from(&mut self, local: &LocalState) {
        self.subscribed_lists = local.subscribed_lists.clone();
        self.subscribed_overrides = local.subscribed_overrides.clone();
        self.subscribed_labels = local.subscribed_labels.clone();
        self.highlight_colors = local.highlight_colors.clone();
        self.transient_lists = local.transient_lists.clone();
        self.local_blocked_users = local.local_blocked_users.clone();
        self.highlighted_users = local.highlighted_users.clone();
    }

    pub fn writable(&self, public_key: &str) -> Option<&WritableList> {
        let wanted = public_key.trim();
        self.writable_lists
            .iter()
            .find(|list| list.public_key.trim() == wanted)
    }
}

/// Row ids the user flagged for highlighting on rendered pages.
pub type RowHighlights = BTreeSet<String>;

/// Pulls roaming settings into the local state without clobbering local-only values.
pub fn ensure_defaults(mut local: LocalState, sync: &SyncSettings) -> LocalState {
    if !sync.subscribed_lists.is_empty() {
        local.subscribed_lists = sync.subscribed_lists.clone();
    }
    local
        .subscribed_overrides
        .extend(sync.subscribed_overrides.clone());
    local.subscribed_labels.extend(sync.subscribed_labels.clone());
    local.highlight_colors.extend(sync.highlight_colors.clone());
    local.transient_lists.extend(sync.transient_lists.clone());
    local.local_blocked_users = merge_names(&local.local_blocked_users, &sync.local_blocked_users);
    local.highlighted_users = merge_names(&local.highlighted_users, &sync.highlighted_users);
    local
}

/// Combined read view of both settings areas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullState {
    #[serde(flatten)]
    pub local: LocalState,
    pub writable_lists: Vec<WritableList>,
}

pub fn full_state(local: &LocalState, sync: &SyncSettings) -> FullState {
    let mut merged = ensure_defaults(local.clone(), sync);
    if sync.subscribed_lists.is_empty() {
        merged.subscribed_lists = local.subscribed_lists.clone();
    }
    FullState {
        local: merged,
        writable_lists: sync.writable_lists.clone(),
    }
}
