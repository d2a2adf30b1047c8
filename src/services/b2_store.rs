//! B2ObjectStore: Backblaze B2 bucket accessed through the native v2 API.
//!
//! The account is authorized in [`B2ObjectStore::connect`]; the resulting
//! token, API URL and bucket id are shared by every request until
//! [`ObjectStore::shutdown`] drops them. Tokens expire after at most a day,
//! so a call rejected with `expired_auth_token` or `bad_auth_token`
//! re-authorizes with the retained key and is retried once.

use crate::{
    config::B2Config,
    services::object_store::{
        ObjectBody, ObjectHandle, ObjectStore, ObjectStoreError, ObjectStoreResult,
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha1::{Digest, Sha1};
use std::{io, sync::RwLock};
use tracing::{debug, info, warn};

const DEFAULT_AUTH_URL: &str = "https://api.backblazeb2.com";
const API_PREFIX: &str = "/b2api/v2";

/// Session obtained from `b2_authorize_account`.
#[derive(Debug, Clone)]
struct Session {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
    bucket_id: String,
}

pub struct B2ObjectStore {
    client: Client,
    auth_url: String,
    /// Base64 `key_id:application_key`, kept for re-authorization.
    credentials: String,
    bucket_name: String,
    /// `None` once shut down.
    session: RwLock<Option<Session>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeAccountResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsRequest<'a> {
    account_id: &'a str,
    bucket_name: &'a str,
}

#[derive(Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<BucketEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketEntry {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetUploadUrlRequest<'a> {
    bucket_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNamesRequest<'a> {
    bucket_id: &'a str,
    start_file_name: &'a str,
    prefix: &'a str,
    max_file_count: u32,
}

#[derive(Deserialize)]
struct ListFileNamesResponse {
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    file_id: String,
    file_name: String,
    #[serde(default)]
    content_length: Option<u64>,
    #[serde(default)]
    action: Option<String>,
}

/// Error body returned by every B2 endpoint.
#[derive(Deserialize)]
struct ApiErrorBody {
    status: u16,
    code: String,
    message: String,
}

impl B2ObjectStore {
    /// Authorize against the public B2 endpoint and resolve the bucket.
    pub async fn connect(config: &B2Config) -> ObjectStoreResult<Self> {
        Self::connect_to(DEFAULT_AUTH_URL, config).await
    }

    /// Like [`connect`](Self::connect) with an explicit authorization host.
    pub async fn connect_to(auth_url: &str, config: &B2Config) -> ObjectStoreResult<Self> {
        let key_id = required(&config.key_id, "B2_KEY_ID")?;
        let application_key = required(&config.application_key, "B2_APPLICATION_KEY")?;
        let bucket_name = required(&config.bucket_name, "B2_BUCKET_NAME")?;

        let client = Client::builder()
            .build()
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;

        let mut store = Self {
            client,
            auth_url: auth_url.trim_end_matches('/').to_string(),
            credentials: general_purpose::STANDARD
                .encode(format!("{}:{}", key_id, application_key)),
            bucket_name: bucket_name.to_string(),
            session: RwLock::new(None),
        };
        let session = store.authorize().await?;
        store.session = RwLock::new(Some(session));
        Ok(store)
    }

    /// `b2_authorize_account` followed by the bucket id lookup.
    async fn authorize(&self) -> ObjectStoreResult<Session> {
        let auth: AuthorizeAccountResponse = send_json(
            self.client
                .get(format!("{}{}/b2_authorize_account", self.auth_url, API_PREFIX))
                .header(header::AUTHORIZATION, format!("Basic {}", self.credentials)),
        )
        .await
        .map_err(into_auth_error)?;

        let buckets: ListBucketsResponse = send_json(
            self.client
                .post(format!("{}{}/b2_list_buckets", auth.api_url, API_PREFIX))
                .header(header::AUTHORIZATION, &auth.authorization_token)
                .json(&ListBucketsRequest {
                    account_id: &auth.account_id,
                    bucket_name: &self.bucket_name,
                }),
        )
        .await
        .map_err(into_auth_error)?;

        let bucket = buckets
            .buckets
            .into_iter()
            .find(|b| b.bucket_name == self.bucket_name)
            .ok_or_else(|| {
                ObjectStoreError::Auth(format!(
                    "bucket `{}` not visible to this key",
                    self.bucket_name
                ))
            })?;

        info!(
            "authorized B2 account {} for bucket {}",
            auth.account_id, self.bucket_name
        );

        Ok(Session {
            account_id: auth.account_id,
            authorization_token: auth.authorization_token,
            api_url: auth.api_url,
            download_url: auth.download_url,
            bucket_id: bucket.bucket_id,
        })
    }

    fn session(&self) -> ObjectStoreResult<Session> {
        self.session
            .read()
            .map_err(|_| poisoned())?
            .clone()
            .ok_or_else(shut_down)
    }

    /// Replace a session whose token B2 rejected.
    ///
    /// If another request already swapped in a newer token it is reused. A
    /// client shut down while authorizing stays shut down.
    async fn reauthorize(&self, rejected_token: &str) -> ObjectStoreResult<Session> {
        {
            let guard = self.session.read().map_err(|_| poisoned())?;
            match guard.as_ref() {
                None => return Err(shut_down()),
                Some(current) if current.authorization_token != rejected_token => {
                    return Ok(current.clone());
                }
                Some(_) => {}
            }
        }

        let fresh = self.authorize().await?;

        let mut guard = self.session.write().map_err(|_| poisoned())?;
        let current = guard.as_mut().ok_or_else(shut_down)?;
        *current = fresh.clone();
        Ok(fresh)
    }

    /// Run `call` with the current session, re-authorizing and retrying once
    /// when the token is rejected.
    async fn with_session<T, F, Fut>(&self, call: F) -> ObjectStoreResult<T>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = ObjectStoreResult<T>>,
    {
        let session = self.session()?;
        let token = session.authorization_token.clone();
        match call(session).await {
            Err(err) if is_rejected_token(&err) => {
                warn!("B2 rejected the authorization token ({}); re-authorizing", err);
                let session = self.reauthorize(&token).await?;
                call(session).await
            }
            other => other,
        }
    }

    fn api_call(&self, session: &Session, operation: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}/{}", session.api_url, API_PREFIX, operation))
            .header(header::AUTHORIZATION, &session.authorization_token)
    }
}

#[async_trait]
impl ObjectStore for B2ObjectStore {
    async fn upload(&self, name: &str, data: Bytes) -> ObjectStoreResult<ObjectHandle> {
        if name.is_empty() {
            return Err(ObjectStoreError::InvalidName(name.to_string()));
        }
        let sha1 = format!("{:x}", Sha1::digest(&data));
        let length = data.len() as u64;

        let stored: FileEntry = self
            .with_session(|session| {
                let data = data.clone();
                let sha1 = sha1.clone();
                async move {
                    let target: GetUploadUrlResponse = send_json(
                        self.api_call(&session, "b2_get_upload_url")
                            .json(&GetUploadUrlRequest {
                                bucket_id: &session.bucket_id,
                            }),
                    )
                    .await?;

                    send_json(
                        self.client
                            .post(&target.upload_url)
                            .header(header::AUTHORIZATION, &target.authorization_token)
                            .header("X-Bz-File-Name", urlencoding::encode(name).into_owned())
                            .header(header::CONTENT_TYPE, "b2/x-auto")
                            .header("X-Bz-Content-Sha1", sha1)
                            .body(data),
                    )
                    .await
                }
            })
            .await?;

        debug!("uploaded {} ({} bytes) as {}", name, length, stored.file_id);
        Ok(ObjectHandle {
            id: stored.file_id,
            name: stored.file_name,
            content_length: stored.content_length.or(Some(length)),
        })
    }

    async fn lookup_by_name(&self, name: &str) -> ObjectStoreResult<ObjectHandle> {
        let listing: ListFileNamesResponse = self
            .with_session(|session| async move {
                send_json(
                    self.api_call(&session, "b2_list_file_names")
                        .json(&ListFileNamesRequest {
                            bucket_id: &session.bucket_id,
                            start_file_name: name,
                            prefix: name,
                            max_file_count: 1,
                        }),
                )
                .await
            })
            .await?;

        listing
            .files
            .into_iter()
            .find(|f| f.file_name == name && f.action.as_deref().unwrap_or("upload") == "upload")
            .map(|f| ObjectHandle {
                id: f.file_id,
                name: f.file_name,
                content_length: f.content_length,
            })
            .ok_or_else(|| ObjectStoreError::NotFound(name.to_string()))
    }

    async fn download(&self, handle: &ObjectHandle) -> ObjectStoreResult<ObjectBody> {
        let response = self
            .with_session(|session| async move {
                let response = self
                    .client
                    .get(format!(
                        "{}{}/b2_download_file_by_id",
                        session.download_url, API_PREFIX
                    ))
                    .query(&[("fileId", handle.id.as_str())])
                    .header(header::AUTHORIZATION, &session.authorization_token)
                    .send()
                    .await
                    .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
                check_status(response).await
            })
            .await
            .map_err(|err| match err {
                ObjectStoreError::Api { status: 404, .. } => {
                    ObjectStoreError::NotFound(handle.name.clone())
                }
                other => other,
            })?;

        Ok(ObjectBody {
            content_length: response.content_length(),
            stream: response.bytes_stream().map_err(io::Error::other).boxed(),
        })
    }

    async fn check_ready(&self) -> ObjectStoreResult<()> {
        self.session().map(|_| ())
    }

    async fn shutdown(&self) {
        if let Ok(mut guard) = self.session.write() {
            if let Some(session) = guard.take() {
                info!(
                    "released B2 session for account {} (bucket {})",
                    session.account_id, self.bucket_name
                );
            }
        }
    }
}

fn poisoned() -> ObjectStoreError {
    ObjectStoreError::Auth("session lock poisoned".into())
}

fn shut_down() -> ObjectStoreError {
    ObjectStoreError::Auth("client has been shut down".into())
}

/// B2 answers 401 with one of these codes once a token has expired or been
/// revoked; a fresh `b2_authorize_account` fixes both.
fn is_rejected_token(err: &ObjectStoreError) -> bool {
    matches!(err, ObjectStoreError::Auth(msg)
        if msg.starts_with("expired_auth_token") || msg.starts_with("bad_auth_token"))
}

fn required<'a>(value: &'a Option<String>, name: &str) -> ObjectStoreResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ObjectStoreError::Auth(format!("{} is not set", name)))
}

/// Any failure while authorizing is reported as an authorization failure.
fn into_auth_error(err: ObjectStoreError) -> ObjectStoreError {
    match err {
        ObjectStoreError::Auth(_) => err,
        other => ObjectStoreError::Auth(other.to_string()),
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> ObjectStoreResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
    check_status(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ObjectStoreError::Transport(e.to_string()))
}

/// Turn a non-2xx response into `ObjectStoreError::Api`.
async fn check_status(response: Response) -> ObjectStoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(parse_api_error(status.as_u16(), &text))
}

fn parse_api_error(status: u16, body: &str) -> ObjectStoreError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(api) if api.status == 401 => {
            ObjectStoreError::Auth(format!("{}: {}", api.code, api.message))
        }
        Ok(api) => ObjectStoreError::Api {
            status: api.status,
            code: api.code,
            message: api.message,
        },
        Err(_) => ObjectStoreError::Api {
            status,
            code: "unknown".into(),
            message: body.to_string(),
        },
    }
}
