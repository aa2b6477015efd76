//! HTTP transport to the remote store.
//!
//! Signed calls carry the app id header and an HMAC `sign` form field; the
//! bootstrap auth calls are unsigned and exchange a cookie session instead.

use crate::config::StoreSettings;
use crate::error::{StoreError, StoreResult};
use crate::installer::traits::{ArchiveChannel, ArchiveSource};
use crate::installer::types::ProgressReporter;
use crate::store::credentials::StoreCredentials;
use crate::store::signature::{self, Payload};
use crate::store::types::{Envelope, SessionToken, SUCCESS_CODE};
use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub const APP_ID_HEADER: &str = "appId";
pub const SESSION_KEY_HEADER: &str = "Session-Key";

pub type SharedCredentials = Arc<RwLock<StoreCredentials>>;

pub struct StoreTransport {
    http: Client,
    settings: Arc<StoreSettings>,
    credentials: SharedCredentials,
}

impl StoreTransport {
    pub fn new(settings: Arc<StoreSettings>, credentials: SharedCredentials) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(concat!("plugin-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::StoreUnreachable(e.to_string()))?;
        Ok(Self {
            http,
            settings,
            credentials,
        })
    }

    pub fn credentials(&self) -> StoreCredentials {
        match self.credentials.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn endpoint(&self, path: &str) -> StoreResult<String> {
        let server = self.credentials().server;
        let base = self
            .settings
            .server_url(server)
            .ok_or_else(|| StoreError::StoreUnreachable("no store route configured".to_string()))?;
        Ok(format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    fn signed_request(&self, path: &str, payload: Payload) -> StoreResult<RequestBuilder> {
        let credentials = self.credentials();
        credentials.require_authenticated()?;

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let payload = payload
            .with("timestamp", chrono::Utc::now().timestamp())
            .with("nonce", &nonce);
        let form = signature::signed(payload, &credentials.app_key);

        Ok(self
            .http
            .post(self.endpoint(path)?)
            .header(APP_ID_HEADER, credentials.app_id.as_str())
            .header(SESSION_KEY_HEADER, nonce)
            .form(form.fields()))
    }

    /// Signed call returning the envelope `data`.
    pub async fn call_signed(&self, path: &str, payload: Payload) -> StoreResult<Value> {
        let request = self.signed_request(path, payload)?;
        log::debug!("POST {} (signed)", path);
        let response = request.send().await.map_err(transport_error)?;
        into_data(read_envelope(response).await?)
    }

    /// Unsigned bootstrap call. Returns the envelope `data` and the session cookies the
    /// store set, if any.
    pub async fn call_unsigned(
        &self,
        path: &str,
        payload: Payload,
        session: Option<&SessionToken>,
    ) -> StoreResult<(Value, Option<SessionToken>)> {
        let mut request = self.http.post(self.endpoint(path)?).form(payload.fields());
        if let Some(session) = session.filter(|s| !s.is_empty()) {
            request = request.header(COOKIE, session.as_str());
        }
        log::debug!("POST {} (unsigned)", path);

        let response = request.send().await.map_err(transport_error)?;
        let session = session_from(&response);
        let data = into_data(read_envelope(response).await?)?;
        Ok((data, session))
    }

    /// Multipart upload of a local file; unsigned.
    pub async fn upload(&self, path: &str, file: &Path) -> StoreResult<Value> {
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.zip")
            .to_string();
        log::info!("Uploading {:?} ({} bytes) to {}", file, bytes.len(), path);

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(self.endpoint(path)?)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        into_data(read_envelope(response).await?)
    }

    /// Signed download streamed into `dest`.
    pub async fn download_signed(
        &self,
        path: &str,
        payload: Payload,
        dest: &Path,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<u64> {
        let result = self.download_inner(path, payload, dest, reporter).await;
        if result.is_err() {
            // Leave nothing half-written behind
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn download_inner(
        &self,
        path: &str,
        payload: Payload,
        dest: &Path,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<u64> {
        let start = Instant::now();
        let request = self.signed_request(path, payload)?;
        log::debug!("Downloading: {} -> {:?}", path, dest);

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::DownloadFailed(format!("HTTP error {}: {}", status, path)));
        }

        // The store answers with an envelope instead of an archive when it refuses
        if is_json(&response) {
            let envelope = read_envelope(response).await?;
            into_data(envelope)?;
            return Err(StoreError::InvalidResponse(format!(
                "{} returned JSON instead of an archive",
                path
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let total_size = response.content_length();
        let mut file = File::create(dest).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| StoreError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            reporter.update_bytes(downloaded, total_size);
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        log::info!(
            "Download stats: endpoint={}, size={} bytes, time={:.2}s",
            path,
            downloaded,
            start.elapsed().as_secs_f64()
        );
        Ok(downloaded)
    }
}

impl ArchiveSource for StoreTransport {
    fn fetch_archive<'a>(
        &'a self,
        channel: ArchiveChannel,
        plugin_id: i64,
        dest: &'a Path,
        reporter: &'a dyn ProgressReporter,
    ) -> BoxFuture<'a, StoreResult<u64>> {
        Box::pin(self.download_signed(
            channel.endpoint(),
            Payload::new().with("plugin_id", plugin_id),
            dest,
            reporter,
        ))
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::StoreUnreachable(err.to_string())
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or(false)
}

/// `name=value` pairs of every Set-Cookie header, joined as a Cookie header value.
fn session_from(response: &Response) -> Option<SessionToken> {
    let pairs: Vec<&str> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(SessionToken(pairs.join("; ")))
    }
}

async fn read_envelope(response: Response) -> StoreResult<Envelope> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    match serde_json::from_str::<Envelope>(&body) {
        Ok(envelope) => Ok(envelope),
        Err(_) if !status.is_success() => {
            Err(StoreError::StoreUnreachable(format!("HTTP error {}", status)))
        }
        Err(e) => {
            let preview: String = body.chars().take(120).collect();
            Err(StoreError::InvalidResponse(format!("{}: {}", e, preview)))
        }
    }
}

fn into_data(envelope: Envelope) -> StoreResult<Value> {
    if envelope.code == SUCCESS_CODE {
        Ok(envelope.data)
    } else {
        log::warn!(
            "Store rejected request: code={}, msg={}",
            envelope.code,
            envelope.msg
        );
        Err(StoreError::RemoteRejected {
            code: envelope.code,
            msg: envelope.msg,
        })
    }
}
