use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::{header, Client, Response};
use serde_json::Value;

use crate::{domain::ListKind, settings::WritableList};

use super::{
    signing::{encode_component, sign_message, write_message},
    wire::{
        AddMemberRequest, CreateListRequest, CreatedList, ErrorBody, ListResponse, RemoteList,
        SignedTimestamp, VerifyKeyRequest,
    },
    ApiError, ListApi,
};

const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
}

impl ApiClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn get_list(&self, base: &str, list_id: &str) -> Result<RemoteList, ApiError> {
        let url = format!("{}/lists/{}", trim_base(base), encode_component(list_id));
        let response = self
            .http
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let response = ensure_success("Fetch list", response).await?;
        let body: ListResponse = response.json().await?;
        Ok(body.into_remote())
    }

    pub async fn post_member(
        &self,
        base: &str,
        list: &WritableList,
        username: &str,
    ) -> Result<Value, ApiError> {
        let (public_key, private_key) = list_keys(list)?;
        let path = format!("/lists/{}/users", encode_component(public_key));
        let body = serde_json::to_string(&AddMemberRequest { username })?;
        let signature = sign_message(&write_message("POST", &path, &body), private_key)?;

        let response = self
            .http
            .post(format!("{}{path}", trim_base(base)))
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;
        let response = ensure_success("Add user", response).await?;
        json_or_null(response).await
    }

    pub async fn delete_member(
        &self,
        base: &str,
        list: &WritableList,
        username: &str,
    ) -> Result<Value, ApiError> {
        let (public_key, private_key) = list_keys(list)?;
        let path = format!(
            "/lists/{}/users/{}",
            encode_component(public_key),
            encode_component(username)
        );
        let signature = sign_message(&write_message("DELETE", &path, "{}"), private_key)?;

        let response = self
            .http
            .delete(format!("{}{path}", trim_base(base)))
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .send()
            .await?;
        let response = ensure_success("Remove user", response).await?;
        json_or_null(response).await
    }

    pub async fn post_verify_key(
        &self,
        base: &str,
        public_key: &str,
        private_key: &str,
    ) -> Result<Value, ApiError> {
        let public_key = public_key.trim();
        let private_key = private_key.trim();
        if public_key.is_empty() || private_key.is_empty() {
            return Err(ApiError::MissingKeys("Missing public or private key"));
        }
        let ts = Utc::now().timestamp_millis();
        let message = serde_json::to_string(&SignedTimestamp { ts })?;
        let signature = sign_message(&message, private_key)?;

        let response = self
            .http
            .post(format!("{}/verify-key", trim_base(base)))
            .json(&VerifyKeyRequest {
                public_key,
                ts,
                signature,
            })
            .send()
            .await?;
        let response = ensure_success("Verify key", response).await?;
        json_or_null(response).await
    }

    pub async fn post_new_list(
        &self,
        base: &str,
        kind: ListKind,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<CreatedList, ApiError> {
        let response = self
            .http
            .post(format!("{}/lists/new", trim_base(base)))
            .json(&CreateListRequest {
                name: name.filter(|n| !n.is_empty()),
                description: description.filter(|d| !d.is_empty()),
                kind,
            })
            .send()
            .await?;
        let response = ensure_success("Create list", response).await?;
        Ok(response.json().await?)
    }
}

impl ListApi for ApiClient {
    fn fetch_list<'a>(
        &'a self,
        base: &'a str,
        list_id: &'a str,
    ) -> BoxFuture<'a, Result<RemoteList, ApiError>> {
        Box::pin(self.get_list(base, list_id))
    }

    fn add_member<'a>(
        &'a self,
        base: &'a str,
        list: &'a WritableList,
        username: &'a str,
    ) -> BoxFuture<'a, Result<Value, ApiError>> {
        Box::pin(self.post_member(base, list, username))
    }

    fn remove_member<'a>(
        &'a self,
        base: &'a str,
        list: &'a WritableList,
        username: &'a str,
    ) -> BoxFuture<'a, Result<Value, ApiError>> {
        Box::pin(self.delete_member(base, list, username))
    }

    fn verify_key<'a>(
        &'a self,
        base: &'a str,
        public_key: &'a str,
        private_key: &'a str,
    ) -> BoxFuture<'a, Result<Value, ApiError>> {
        Box::pin(self.post_verify_key(base, public_key, private_key))
    }

    fn create_list<'a>(
        &'a self,
        base: &'a str,
        kind: ListKind,
        name: Option<&'a str>,
        description: Option<&'a str>,
    ) -> BoxFuture<'a, Result<CreatedList, ApiError>> {
        Box::pin(self.post_new_list(base, kind, name, description))
    }
}

fn trim_base(base: &str) -> &str {
    base.trim().trim_end_matches('/')
}

fn list_keys(list: &WritableList) -> Result<(&str, &str), ApiError> {
    let public_key = list.public_key.trim();
    let private_key = list.private_key.trim();
    if public_key.is_empty() || private_key.is_empty() {
        return Err(ApiError::MissingKeys("Missing list keys"));
    }
    Ok((public_key, private_key))
}

async fn ensure_success(action: &'static str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error)
        .map(|error| format!(" - {error}"))
        .unwrap_or_default();
    tracing::debug!(target: "api", action, status = status.as_u16(), %detail, "request rejected");
    Err(ApiError::Status {
        action,
        status: status.as_u16(),
        detail,
    })
}

async fn json_or_null(response: Response) -> Result<Value, ApiError> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}
