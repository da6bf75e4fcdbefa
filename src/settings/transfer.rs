use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    domain::ListKind,
    engine::RawColor,
    settings::state::{LocalState, SyncSettings, WritableList, DEFAULT_API_BASE_URL},
};

pub const EXPORT_VERSION: u32 = 2;
const SUPPORTED_VERSIONS: &[u32] = &[2];

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid JSON structure")]
    InvalidStructure,
    #[error("Missing or invalid version field")]
    InvalidVersion,
    #[error("Version {0} not supported")]
    UnsupportedVersion(String),
    #[error("{0}")]
    Field(String),
    #[error("malformed import data: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Versioned export document. Keys of `lists` are list public keys, in subscription order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub version: u32,
    #[serde(default)]
    pub exported_at: String,
    #[serde(default)]
    pub lists: IndexMap<String, ExportEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_blocked_users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlighted_users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub subscribed: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ListKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_color: Option<RawColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient: Option<bool>,
}

pub fn build_export(local: &LocalState, sync: &SyncSettings, now: DateTime<Utc>) -> ExportData {
    let mut keys: Vec<&str> = local.subscribed_lists.iter().map(String::as_str).collect();
    for writable in &sync.writable_lists {
        if !writable.public_key.is_empty() && !keys.contains(&writable.public_key.as_str()) {
            keys.push(&writable.public_key);
        }
    }

    let mut lists = IndexMap::new();
    for key in keys {
        let writable = sync.writable_lists.iter().find(|w| w.public_key == key);
        let label = local
            .subscribed_labels
            .get(key)
            .cloned()
            .or_else(|| writable.and_then(|w| w.label.clone()))
            .filter(|label| !label.is_empty());
        let kind = local
            .subscribed_overrides
            .get(key)
            .copied()
            .or_else(|| writable.map(|w| w.kind))
            .unwrap_or_default();

        let entry = ExportEntry {
            label,
            subscribed: local.subscribed_lists.iter().any(|id| id == key),
            kind: Some(kind),
            private_key: writable
                .map(|w| w.private_key.clone())
                .filter(|pk| !pk.is_empty()),
            base_url: writable
                .and_then(|w| w.base_url.clone())
                .filter(|url| !url.is_empty() && url != DEFAULT_API_BASE_URL),
            highlight_color: local.highlight_colors.get(key).cloned(),
            transient: local.is_transient(key).then_some(true),
        };
        lists.insert(key.to_string(), entry);
    }

    ExportData {
        version: EXPORT_VERSION,
        exported_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        lists,
        local_blocked_users: Some(local.local_blocked_users.clone()).filter(|v| !v.is_empty()),
        highlighted_users: Some(local.highlighted_users.clone()).filter(|v| !v.is_empty()),
        api_base_url: Some(local.api_base_url.clone())
            .filter(|url| !url.is_empty() && url != DEFAULT_API_BASE_URL),
    }
}

/// Checks the version and every field the import relies on, naming the offending field.
pub fn validate_import(data: &Value) -> Result<(), TransferError> {
    let object = data.as_object().ok_or(TransferError::InvalidStructure)?;
    let version = object
        .get("version")
        .and_then(Value::as_f64)
        .filter(|v| *v >= 1.0)
        .ok_or(TransferError::InvalidVersion)?;
    let supported = object
        .get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .is_some_and(|v| SUPPORTED_VERSIONS.contains(&v));
    if !supported {
        let shown = object
            .get("version")
            .and_then(Value::as_i64)
            .map(|v| v.to_string())
            .unwrap_or_else(|| version.to_string());
        return Err(TransferError::UnsupportedVersion(shown));
    }

    for field in ["localBlockedUsers", "highlightedUsers"] {
        if let Some(value) = object.get(field) {
            if !value.is_array() {
                return Err(TransferError::Field(format!("{field} must be an array")));
            }
        }
    }

    let Some(lists) = object.get("lists") else {
        return Ok(());
    };
    let lists = lists
        .as_object()
        .ok_or_else(|| TransferError::Field("lists must be an object".to_string()))?;
    for (key, entry) in lists {
        let entry = entry
            .as_object()
            .ok_or_else(|| TransferError::Field(format!("lists[\"{key}\"] must be an object")))?;
        if let Some(kind) = entry.get("type") {
            if !matches!(kind.as_str(), Some("block" | "highlight")) {
                return Err(TransferError::Field(format!(
                    "lists[\"{key}\"].type must be \"block\" or \"highlight\""
                )));
            }
        }
        if let Some(transient) = entry.get("transient") {
            if !transient.is_boolean() {
                return Err(TransferError::Field(format!(
                    "lists[\"{key}\"].transient must be boolean"
                )));
            }
        }
    }
    Ok(())
}

/// Parses and validates an import document. Nothing is applied on error.
pub fn parse_import(text: &str) -> Result<ExportData, TransferError> {
    let value: Value = serde_json::from_str(text).map_err(|_| TransferError::InvalidStructure)?;
    validate_import(&value)?;
    Ok(serde_json::from_value(value)?)
}

/// Rebuilds subscription and writable-list state from `data`. Local name lists and the API
/// base URL are replaced only when the document carries them.
pub fn apply_import(
    data: &ExportData,
    mut local: LocalState,
    mut sync: SyncSettings,
) -> (LocalState, SyncSettings) {
    local.subscribed_lists.clear();
    local.subscribed_overrides.clear();
    local.subscribed_labels.clear();
    local.highlight_colors.clear();
    local.transient_lists.clear();
    let mut writable_lists = Vec::new();

    for (key, entry) in &data.lists {
        if entry.subscribed {
            local.subscribed_lists.push(key.clone());
            if let Some(kind) = entry.kind {
                local.subscribed_overrides.insert(key.clone(), kind);
            }
            if let Some(label) = entry.label.clone().filter(|l| !l.is_empty()) {
                local.subscribed_labels.insert(key.clone(), label);
            }
            if let Some(color) = &entry.highlight_color {
                local.highlight_colors.insert(key.clone(), color.clone());
            }
            if entry.transient == Some(true) {
                local.transient_lists.insert(key.clone(), true);
            }
        }

        if let Some(private_key) = entry.private_key.clone().filter(|pk| !pk.is_empty()) {
            writable_lists.push(WritableList {
                public_key: key.clone(),
                private_key,
                label: entry.label.clone().filter(|l| !l.is_empty()),
                kind: entry.kind.unwrap_or_default(),
                base_url: entry.base_url.clone().filter(|url| !url.is_empty()),
            });
        }
    }

    if let Some(users) = &data.local_blocked_users {
        local.local_blocked_users = users.clone();
    }
    if let Some(users) = &data.highlighted_users {
        local.highlighted_users = users.clone();
    }
    if let Some(url) = data.api_base_url.clone().filter(|url| !url.is_empty()) {
        local.api_base_url = url;
    }

    sync.mirror_from(&local);
    sync.writable_lists = writable_lists;
    (local, sync)
}
