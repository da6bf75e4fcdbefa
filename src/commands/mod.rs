mod service;

use serde::{ser::Error as _, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{api::ApiError, settings::TransferError};

pub use service::CommandService;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No writable list selected or configured")]
    NoWritableList,
    #[error("No matching writable list for removal")]
    NoMatchingWritable,
    #[error("Missing publicKey")]
    MissingPublicKey,
    #[error("Missing username")]
    MissingUsername,
    #[error("List {0} is not subscribed")]
    NotSubscribed(String),
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of one command, serialized as `{"ok": true, ...payload}` or
/// `{"ok": false, "error": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome<T> {
    Done(T),
    Failed(String),
}

impl<T> CommandOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Done(_))
    }
}

#[cfg(test)]
impl<T> CommandOutcome<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            CommandOutcome::Done(value) => Ok(value),
            CommandOutcome::Failed(error) => Err(error),
        }
    }
}

impl<T> From<Result<T, CommandError>> for CommandOutcome<T> {
    fn from(result: Result<T, CommandError>) -> Self {
        match result {
            Ok(value) => CommandOutcome::Done(value),
            Err(err) => CommandOutcome::Failed(err.to_string()),
        }
    }
}

impl<T: Serialize> Serialize for CommandOutcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = Map::new();
        match self {
            CommandOutcome::Done(payload) => {
                map.insert("ok".into(), Value::Bool(true));
                match serde_json::to_value(payload).map_err(S::Error::custom)? {
                    Value::Object(fields) => map.extend(fields),
                    Value::Null => {}
                    other => {
                        map.insert("result".into(), other);
                    }
                }
            }
            CommandOutcome::Failed(error) => {
                map.insert("ok".into(), Value::Bool(false));
                map.insert("error".into(), Value::String(error.clone()));
            }
        }
        map.serialize(serializer)
    }
}
