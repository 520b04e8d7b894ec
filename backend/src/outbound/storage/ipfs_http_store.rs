//! Reqwest-backed IPFS content store.
//!
//! Transport details only: request building, timeout and status mapping,
//! and JSON decoding. Retries belong to the callers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};

use super::dto::{AddResponseDto, ErrorDto, ObjectStatDto};
use crate::domain::ContentHash;
use crate::domain::ports::{ContentStore, ContentStoreError, ObjectStat};

/// Per-request timeout used by [`IpfsHttpStore::new`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const OBJECT_STAT_PATH: &str = "api/v0/object/stat";
const ADD_PATH: &str = "api/v0/add";

/// Content store backed by one IPFS RPC endpoint.
pub struct IpfsHttpStore {
    client: Client,
    base: Url,
}

impl IpfsHttpStore {
    /// Build a store for `base`, e.g. `http://127.0.0.1:5001`.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ContentStoreError> {
        self.base
            .join(path)
            .map_err(|err| ContentStoreError::rejected(format!("invalid endpoint {path}: {err}")))
    }

    async fn post(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, ContentStoreError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ContentStore for IpfsHttpStore {
    async fn stat(&self, hash: &ContentHash) -> Result<ObjectStat, ContentStoreError> {
        let mut url = self.endpoint(OBJECT_STAT_PATH)?;
        url.query_pairs_mut().append_pair("arg", hash.as_ref());
        let body = self
            .post(self.client.post(url))
            .await
            .map_err(|err| not_found_for(err, hash))?;
        parse_stat(&body)
    }

    async fn add(&self, bytes: &[u8], only_hash: bool) -> Result<ContentHash, ContentStoreError> {
        let mut url = self.endpoint(ADD_PATH)?;
        url.query_pairs_mut()
            .append_pair("only-hash", if only_hash { "true" } else { "false" })
            .append_pair("pin", if only_hash { "false" } else { "true" });
        let form = Form::new().part("file", Part::bytes(bytes.to_vec()).file_name("upload"));
        let body = self.post(self.client.post(url).multipart(form)).await?;
        parse_add(&body)
    }
}

fn parse_stat(body: &[u8]) -> Result<ObjectStat, ContentStoreError> {
    let decoded: ObjectStatDto = serde_json::from_slice(body).map_err(|error| {
        ContentStoreError::decode(format!("invalid object stat payload: {error}"))
    })?;
    Ok(decoded.into())
}

fn parse_add(body: &[u8]) -> Result<ContentHash, ContentStoreError> {
    let decoded: AddResponseDto = serde_json::from_slice(body)
        .map_err(|error| ContentStoreError::decode(format!("invalid add payload: {error}")))?;
    decoded
        .into_hash()
        .map_err(|error| ContentStoreError::decode(format!("engine returned bad hash: {error}")))
}

// Kubo reports unknown objects as a 500 whose message mentions "not found".
fn not_found_for(error: ContentStoreError, hash: &ContentHash) -> ContentStoreError {
    match &error {
        ContentStoreError::Rejected { message } | ContentStoreError::Transport { message }
            if message.contains("not found") =>
        {
            ContentStoreError::not_found(hash.as_ref())
        }
        _ => error,
    }
}

fn map_transport_error(error: reqwest::Error) -> ContentStoreError {
    if error.is_timeout() {
        ContentStoreError::timeout(error.to_string())
    } else {
        ContentStoreError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> ContentStoreError {
    let detail = serde_json::from_slice::<ErrorDto>(body)
        .map(|dto| dto.message)
        .unwrap_or_else(|_| body_preview(body));
    let message = if detail.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), detail)
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ContentStoreError::timeout(message)
        }
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            ContentStoreError::transport(message)
        }
        _ => ContentStoreError::rejected(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
