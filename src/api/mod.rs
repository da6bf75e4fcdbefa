mod client;
pub mod signing;
pub mod wire;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::{domain::ListKind, settings::WritableList};

pub use client::ApiClient;
pub use wire::{CreatedList, RemoteList};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    MissingKeys(&'static str),
    #[error("{action} failed: HTTP {status}{detail}")]
    Status {
        action: &'static str,
        status: u16,
        detail: String,
    },
    #[error(transparent)]
    Signing(#[from] signing::SigningError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Remote list service. Object safe so sync and command paths can run against a stub.
pub trait ListApi: Send + Sync {
    fn fetch_list<'a>(
        &'a self,
        base: &'a str,
        list_id: &'a str,
    ) -> BoxFuture<'a, Result<RemoteList, ApiError>>;

    fn add_member<'a>(
        &'a self,
        base: &'a str,
        list: &'a WritableList,
        username: &'a str,
    ) -> BoxFuture<'a, Result<Value, ApiError>>;

    fn remove_member<'a>(
        &'a self,
        base: &'a str,
        list: &'a WritableList,
        username: &'a str,
    ) -> BoxFuture<'a, Result<Value, ApiError>>;

    fn verify_key<'a>(
        &'a self,
        base: &'a str,
        public_key: &'a str,
        private_key: &'a str,
    ) -> BoxFuture<'a, Result<Value, ApiError>>;

    fn create_list<'a>(
        &'a self,
        base: &'a str,
        kind: ListKind,
        name: Option<&'a str>,
        description: Option<&'a str>,
    ) -> BoxFuture<'a, Result<CreatedList, ApiError>>;
}

#[cfg(test)]
pub mod testing {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use futures::FutureExt;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    /// In-memory list service. Clones share their recorded calls.
    #[derive(Clone, Default)]
    pub struct StubApi {
        lists: Arc<Mutex<HashMap<String, Option<RemoteList>>>>,
        fetches: Arc<AtomicUsize>,
        writes: Arc<Mutex<Vec<String>>>,
        reject_keys: bool,
    }

    impl StubApi {
        pub fn with_list(
            self,
            id: &str,
            kind: Option<ListKind>,
            name: Option<&str>,
            members: &[&str],
        ) -> Self {
            self.lists.lock().insert(
                id.to_string(),
                Some(RemoteList {
                    kind,
                    name: name.map(str::to_string),
                    members: members.iter().map(|m| m.to_string()).collect(),
                }),
            );
            self
        }

        pub fn with_failure(self, id: &str) -> Self {
            self.lists.lock().insert(id.to_string(), None);
            self
        }

        pub fn rejecting_keys(mut self) -> Self {
            self.reject_keys = true;
            self
        }

        pub fn fetch_calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.fetches)
        }

        pub fn writes(&self) -> Vec<String> {
            self.writes.lock().clone()
        }

        fn denied(action: &'static str) -> ApiError {
            ApiError::Status {
                action,
                status: 401,
                detail: " - invalid signature".to_string(),
            }
        }
    }

    impl ListApi for StubApi {
        fn fetch_list<'a>(
            &'a self,
            _base: &'a str,
            list_id: &'a str,
        ) -> BoxFuture<'a, Result<RemoteList, ApiError>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let found = self.lists.lock().get(list_id).cloned().flatten();
            async move {
                found.ok_or(ApiError::Status {
                    action: "Fetch list",
                    status: 503,
                    detail: String::new(),
                })
            }
            .boxed()
        }

        fn add_member<'a>(
            &'a self,
            _base: &'a str,
            list: &'a WritableList,
            username: &'a str,
        ) -> BoxFuture<'a, Result<Value, ApiError>> {
            let result = if self.reject_keys {
                Err(Self::denied("Add"))
            } else {
                self.writes
                    .lock()
                    .push(format!("add:{}:{username}", list.public_key));
                Ok(json!({ "ok": true }))
            };
            async move { result }.boxed()
        }

        fn remove_member<'a>(
            &'a self,
            _base: &'a str,
            list: &'a WritableList,
            username: &'a str,
        ) -> BoxFuture<'a, Result<Value, ApiError>> {
            let result = if self.reject_keys {
                Err(Self::denied("Remove"))
            } else {
                self.writes
                    .lock()
                    .push(format!("remove:{}:{username}", list.public_key));
                Ok(json!({ "ok": true }))
            };
            async move { result }.boxed()
        }

        fn verify_key<'a>(
            &'a self,
            _base: &'a str,
            public_key: &'a str,
            _private_key: &'a str,
        ) -> BoxFuture<'a, Result<Value, ApiError>> {
            let result = if self.reject_keys {
                Err(Self::denied("Verify"))
            } else {
                Ok(json!({ "ok": true, "publicKey": public_key }))
            };
            async move { result }.boxed()
        }

        fn create_list<'a>(
            &'a self,
            _base: &'a str,
            kind: ListKind,
            name: Option<&'a str>,
            _description: Option<&'a str>,
        ) -> BoxFuture<'a, Result<CreatedList, ApiError>> {
            let public_key = format!("pk-{}-{}", kind, name.unwrap_or("unnamed"));
            self.lists.lock().insert(
                public_key.clone(),
                Some(RemoteList {
                    kind: Some(kind),
                    name: name.map(str::to_string),
                    members: Vec::new(),
                }),
            );
            let created = CreatedList {
                private_key: format!("sk-{public_key}"),
                public_key,
            };
            async move { Ok(created) }.boxed()
        }
    }
}
