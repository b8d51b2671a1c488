// src/drive/client.rs

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::{RemoteFileMeta, RemoteFiles, TokenProvider, META_FIELDS};
use crate::report::Scalar;
use crate::{Error, Result};

pub const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
pub const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
pub const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

const QUOTA_REASON: &str = "storageQuotaExceeded";
const QUOTA_MESSAGE: &str = "Service Accounts do not have storage quota";

/// Body of a successful call. Some endpoints answer with raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    Json(Value),
    Text(String),
}

impl ApiBody {
    fn into_meta(self, what: &str) -> Result<RemoteFileMeta> {
        match self {
            ApiBody::Json(v) => serde_json::from_value(v.clone())
                .map_err(|e| Error::remote(format!("{} returned no file id: {}", what, e), v)),
            ApiBody::Text(t) => Err(Error::remote(
                format!("{} returned a non-JSON body", what),
                Value::String(t),
            )),
        }
    }
}

/// Sort a response into a successful body or one of the remote error kinds.
pub fn classify_response(status: u16, text: &str) -> Result<ApiBody> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        if (200..300).contains(&status) {
            return Ok(ApiBody::Text(text.to_string()));
        }
        return Err(Error::remote(
            format!("HTTP {}", status),
            Value::String(text.to_string()),
        ));
    };

    let Some(envelope) = value.get("error") else {
        if (200..300).contains(&status) {
            return Ok(ApiBody::Json(value));
        }
        return Err(Error::remote(format!("HTTP {}", status), value));
    };

    let reason = envelope
        .pointer("/errors/0/reason")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = envelope
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if reason == QUOTA_REASON || message.contains(QUOTA_MESSAGE) {
        return Err(Error::QuotaExceeded { payload: value });
    }
    let message = if message.is_empty() {
        format!("HTTP {}", status)
    } else {
        message
    };
    Err(Error::remote(message, value))
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFileMeta>,
}

/// Drive v3 / Sheets v4 client. Every call fetches a bearer token first and
/// never retries.
pub struct DriveClient<T> {
    http: Client,
    tokens: T,
    files_url: String,
    upload_url: String,
    sheets_url: String,
}

impl<T: TokenProvider> DriveClient<T> {
    pub fn new(http: Client, tokens: T) -> Self {
        Self::with_base_urls(http, tokens, DRIVE_FILES_URL, DRIVE_UPLOAD_URL, SHEETS_URL)
    }

    /// Client talking to other endpoints than Google's, e.g. a local stub.
    pub fn with_base_urls(
        http: Client,
        tokens: T,
        files_url: impl Into<String>,
        upload_url: impl Into<String>,
        sheets_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            files_url: files_url.into(),
            upload_url: upload_url.into(),
            sheets_url: sheets_url.into(),
        }
    }

    async fn call(
        &self,
        method: Method,
        url: Url,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<ApiBody> {
        let token = self.tokens.access_token().await?;
        debug!(%method, url = %url, "drive call");
        let req = build(self.http.request(method, url).bearer_auth(token));
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let body = classify_response(status, &text);
        if let Err(e) = &body {
            warn!(status, error = %e, "drive call failed");
        }
        body
    }
}

fn api_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<Url> {
    let raw = if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    };
    Url::parse_with_params(&raw, params)
        .map_err(|e| Error::Config(format!("bad API url {}: {}", raw, e)))
}

/// `multipart/related` body: JSON metadata part followed by the media part.
fn multipart_body(boundary: &str, metadata: &Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
            b = boundary,
            m = metadata,
            t = mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--", boundary).as_bytes());
    body
}

#[async_trait]
impl<T: TokenProvider> RemoteFiles for DriveClient<T> {
    async fn get(&self, id: &str, fields: &str) -> Result<RemoteFileMeta> {
        let url = api_url(
            &self.files_url,
            id,
            &[("fields", fields), ("supportsAllDrives", "true")],
        )?;
        self.call(Method::GET, url, |r| r)
            .await?
            .into_meta("files.get")
    }

    async fn search(&self, query: &str, order_by: &str, limit: u32) -> Result<Vec<RemoteFileMeta>> {
        let page_size = limit.to_string();
        let fields = format!("files({})", META_FIELDS);
        let url = api_url(
            &self.files_url,
            "",
            &[
                ("q", query),
                ("fields", fields.as_str()),
                ("orderBy", order_by),
                ("pageSize", page_size.as_str()),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ],
        )?;
        match self.call(Method::GET, url, |r| r).await? {
            ApiBody::Json(v) => {
                let list: FileList = serde_json::from_value(v.clone())
                    .map_err(|e| Error::remote(format!("files.list: {}", e), v))?;
                Ok(list.files)
            }
            ApiBody::Text(t) => Err(Error::remote(
                "files.list returned a non-JSON body",
                Value::String(t),
            )),
        }
    }

    async fn create_metadata_only(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
    ) -> Result<RemoteFileMeta> {
        let url = api_url(
            &self.files_url,
            "",
            &[("supportsAllDrives", "true"), ("fields", META_FIELDS)],
        )?;
        let metadata = json!({ "name": name, "mimeType": mime_type, "parents": [parent] });
        self.call(Method::POST, url, |r| r.json(&metadata))
            .await?
            .into_meta("files.create")
    }

    async fn create_multipart(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<RemoteFileMeta> {
        let url = api_url(
            &self.upload_url,
            "",
            &[
                ("uploadType", "multipart"),
                ("supportsAllDrives", "true"),
                ("fields", META_FIELDS),
            ],
        )?;
        let boundary = format!("site-reports-{}", Utc::now().timestamp_micros());
        let metadata = json!({ "name": name, "parents": [parent] });
        let body = multipart_body(&boundary, &metadata, mime_type, content);
        let content_type = format!("multipart/related; boundary={}", boundary);
        self.call(Method::POST, url, |r| {
            r.header(reqwest::header::CONTENT_TYPE, content_type).body(body)
        })
        .await?
        .into_meta("files.create (multipart)")
    }

    async fn replace_content(
        &self,
        id: &str,
        content: &[u8],
        mime_type: &str,
    ) -> Result<RemoteFileMeta> {
        let url = api_url(
            &self.upload_url,
            id,
            &[
                ("uploadType", "media"),
                ("supportsAllDrives", "true"),
                ("fields", META_FIELDS),
            ],
        )?;
        let body = content.to_vec();
        let mime = mime_type.to_string();
        match self
            .call(Method::PATCH, url, |r| {
                r.header(reqwest::header::CONTENT_TYPE, mime).body(body)
            })
            .await?
        {
            ApiBody::Json(v) => Ok(serde_json::from_value(v)
                .unwrap_or_else(|_| RemoteFileMeta::with_id(id))),
            ApiBody::Text(_) => Ok(RemoteFileMeta::with_id(id)),
        }
    }

    async fn update_values(&self, id: &str, range: &str, values: &[Vec<Scalar>]) -> Result<Value> {
        let url = api_url(
            &self.sheets_url,
            &format!("{}/values/{}", id, range),
            &[("valueInputOption", "RAW")],
        )?;
        let payload = json!({ "values": values });
        match self.call(Method::PUT, url, |r| r.json(&payload)).await? {
            ApiBody::Json(v) => Ok(v),
            ApiBody::Text(t) => Ok(Value::String(t)),
        }
    }
}
