use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ListKind;

/// A remote list as fetched, before any local override is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteList {
    pub kind: Option<ListKind>,
    pub name: Option<String>,
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListResponse {
    #[serde(rename = "type", default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub users: Option<Vec<Value>>,
}

impl ListResponse {
    pub fn into_remote(self) -> RemoteList {
        let kind = self
            .kind
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|kind| kind.parse().ok());
        let name = self
            .name
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let members = self
            .users
            .unwrap_or_default()
            .iter()
            .filter_map(|user| match user.get("username") {
                Some(Value::String(name)) => Some(name.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .filter(|name| !name.is_empty())
            .collect();
        RemoteList {
            kind,
            name,
            members,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AddMemberRequest<'a> {
    pub username: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SignedTimestamp {
    pub ts: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyKeyRequest<'a> {
    pub public_key: &'a str,
    pub ts: i64,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct CreateListRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(rename = "type")]
    pub kind: ListKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedList {
    pub public_key: String,
    pub private_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}
