//! SABnzbd-compatible download backend with a WebDAV file listing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::BackendConfig;

use super::{BackendError, DownloadBackend, DownloadJob, JobStatus, PlayableMedia};

const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "mov", "wmv", "ts", "webm"];

/// Directory levels walked below a job folder.
const MAX_LISTING_DEPTH: usize = 3;

/// One entry of a PROPFIND multistatus listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DavEntry {
    pub href: String,
    pub size_bytes: u64,
    pub is_dir: bool,
}

/// SABnzbd API client.
pub struct SabnzbdBackend {
    client: Client,
    config: BackendConfig,
}

impl SabnzbdBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| BackendError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn api_url(&self, mode: &str, extra: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/api?mode={}&output=json&apikey={}",
            self.base_url(),
            mode,
            urlencoding::encode(&self.config.api_key)
        );
        for (key, value) in extra {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }
        url
    }

    async fn api_get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, BackendError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(BackendError::AuthenticationFailed(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(BackendError::ApiError(format!("HTTP {}", status)));
        }

        let body = response.text().await.map_err(BackendError::from_reqwest)?;
        if let Ok(err) = serde_json::from_str::<SabError>(&body) {
            if !err.status {
                let message = err.error.unwrap_or_default();
                if message.to_ascii_lowercase().contains("api key") {
                    return Err(BackendError::AuthenticationFailed(message));
                }
                return Err(BackendError::ApiError(message));
            }
        }

        serde_json::from_str(&body)
            .map_err(|e| BackendError::ApiError(format!("Failed to parse response: {}", e)))
    }

    /// Issue a depth-1 PROPFIND and parse the listing.
    async fn propfind(&self, url: &Url) -> Result<Vec<DavEntry>, BackendError> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| BackendError::Internal(e.to_string()))?;
        let mut request = self
            .client
            .request(method, url.clone())
            .header("Depth", "1");
        if let Some(user) = &self.config.webdav_username {
            request = request.basic_auth(user, self.config.webdav_password.as_ref());
        }

        let response = request.send().await.map_err(BackendError::from_reqwest)?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(BackendError::AuthenticationFailed(format!("WebDAV HTTP {}", status)));
        }
        if status.as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(BackendError::ApiError(format!("WebDAV HTTP {}", status)));
        }

        let body = response.text().await.map_err(BackendError::from_reqwest)?;
        parse_multistatus(&body)
    }

    /// Folder holding a completed job's files.
    fn job_folder(&self, webdav_url: &str, job: &DownloadJob) -> Result<Url, BackendError> {
        let folder = job
            .storage
            .as_deref()
            .and_then(|s| s.trim_end_matches(['/', '\\']).rsplit(['/', '\\']).next())
            .filter(|s| !s.is_empty())
            .unwrap_or(&job.name);
        let raw = format!(
            "{}/{}/{}/",
            webdav_url.trim_end_matches('/'),
            urlencoding::encode(&job.category),
            urlencoding::encode(folder)
        );
        Url::parse(&raw).map_err(|e| BackendError::Internal(format!("Invalid WebDAV URL: {}", e)))
    }
}

#[async_trait]
impl DownloadBackend for SabnzbdBackend {
    fn name(&self) -> &str {
        "sabnzbd"
    }

    async fn enqueue(&self, download_ref: &str, category: &str) -> Result<String, BackendError> {
        let url = self.api_url("addurl", &[("name", download_ref), ("cat", category)]);
        let response: AddUrlResponse = self.api_get(&url).await?;

        let job_id = response
            .nzo_ids
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::ApiError("addurl returned no job id".to_string()))?;
        debug!(job_id = %job_id, category = category, "Enqueued download");
        Ok(job_id)
    }

    async fn queue(&self, limit: usize) -> Result<Vec<DownloadJob>, BackendError> {
        let limit = limit.to_string();
        let url = self.api_url("queue", &[("limit", &limit)]);
        let response: QueueResponse = self.api_get(&url).await?;

        Ok(response
            .queue
            .slots
            .into_iter()
            .map(|s| DownloadJob {
                job_id: s.nzo_id,
                name: s.filename,
                category: s.cat.unwrap_or_default(),
                status: JobStatus::from_backend(&s.status),
                fail_message: None,
                storage: None,
            })
            .collect())
    }

    async fn history(&self, limit: usize) -> Result<Vec<DownloadJob>, BackendError> {
        let limit = limit.to_string();
        let url = self.api_url("history", &[("limit", &limit)]);
        let response: HistoryResponse = self.api_get(&url).await?;

        Ok(response
            .history
            .slots
            .into_iter()
            .map(|s| DownloadJob {
                job_id: s.nzo_id,
                name: s.name,
                category: s.category.unwrap_or_default(),
                status: JobStatus::from_backend(&s.status),
                fail_message: s.fail_message.filter(|m| !m.is_empty()),
                storage: s.storage.filter(|m| !m.is_empty()),
            })
            .collect())
    }

    async fn resolve_playable(
        &self,
        job: &DownloadJob,
    ) -> Result<Option<PlayableMedia>, BackendError> {
        let Some(webdav_url) = self.config.webdav_url.as_deref() else {
            return Err(BackendError::Internal("No WebDAV listing configured".to_string()));
        };
        let root = self.job_folder(webdav_url, job)?;

        let mut files = Vec::new();
        let mut pending = vec![(root.clone(), 0usize)];
        while let Some((dir, depth)) = pending.pop() {
            for entry in self.propfind(&dir).await? {
                let Ok(url) = dir.join(&entry.href) else {
                    warn!(href = %entry.href, "Skipping unparseable WebDAV href");
                    continue;
                };
                if url.path().trim_end_matches('/') == dir.path().trim_end_matches('/') {
                    continue;
                }
                if entry.is_dir {
                    if depth + 1 < MAX_LISTING_DEPTH {
                        pending.push((url, depth + 1));
                    }
                } else {
                    files.push((url, entry.size_bytes));
                }
            }
        }

        let best = pick_playable(files.iter().map(|(url, size)| (url.path(), *size)));
        Ok(best.and_then(|path| {
            let (url, size) = files.iter().find(|(u, _)| u.path() == path)?;
            Some(PlayableMedia {
                job_id: job.job_id.clone(),
                path: path.to_string(),
                url: url.to_string(),
                size_bytes: *size,
            })
        }))
    }
}

/// Parse a WebDAV multistatus body. Responses without an href are skipped.
///
/// Element names are matched on their local part, so any namespace prefix
/// the server picks for `DAV:` is accepted.
pub(crate) fn parse_multistatus(body: &str) -> Result<Vec<DavEntry>, BackendError> {
    let doc: Multistatus = quick_xml::de::from_str(body)
        .map_err(|e| BackendError::ApiError(format!("Invalid WebDAV listing: {}", e)))?;

    Ok(doc
        .responses
        .into_iter()
        .filter_map(|response| {
            let href = response.href?.trim().to_string();
            if href.is_empty() {
                return None;
            }
            let props = response.propstat.iter().map(|p| &p.prop);
            let mut size_bytes = 0;
            let mut is_dir = false;
            for prop in props {
                if let Some(len) = prop
                    .getcontentlength
                    .as_deref()
                    .and_then(|l| l.trim().parse().ok())
                {
                    size_bytes = len;
                }
                is_dir |= prop
                    .resourcetype
                    .as_ref()
                    .is_some_and(|t| t.collection.is_some());
            }
            Some(DavEntry {
                href,
                size_bytes,
                is_dir,
            })
        })
        .collect())
}

/// The largest video file whose name does not mark it as a sample.
pub(crate) fn pick_playable<'a>(files: impl Iterator<Item = (&'a str, u64)>) -> Option<&'a str> {
    files
        .filter(|(path, _)| {
            let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
            let is_video = name
                .rsplit_once('.')
                .is_some_and(|(_, ext)| VIDEO_EXTENSIONS.contains(&ext));
            is_video && !name.contains("sample")
        })
        .max_by_key(|(_, size)| *size)
        .map(|(path, _)| path)
}

// WebDAV multistatus document
#[derive(Debug, Deserialize)]
struct Multistatus {
    #[serde(rename = "response", default)]
    responses: Vec<DavResponse>,
}

#[derive(Debug, Deserialize)]
struct DavResponse {
    href: Option<String>,
    #[serde(default)]
    propstat: Vec<DavPropstat>,
}

#[derive(Debug, Deserialize)]
struct DavPropstat {
    #[serde(default)]
    prop: DavProp,
}

#[derive(Debug, Default, Deserialize)]
struct DavProp {
    getcontentlength: Option<String>,
    resourcetype: Option<DavResourceType>,
}

#[derive(Debug, Default, Deserialize)]
struct DavResourceType {
    collection: Option<serde::de::IgnoredAny>,
}

// SABnzbd API response types
#[derive(Debug, Deserialize)]
struct SabError {
    status: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddUrlResponse {
    #[serde(default)]
    nzo_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    queue: SlotList<QueueSlot>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: SlotList<HistorySlot>,
}

#[derive(Debug, Deserialize)]
struct SlotList<T> {
    #[serde(default = "Vec::new")]
    slots: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct QueueSlot {
    nzo_id: String,
    filename: String,
    cat: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct HistorySlot {
    nzo_id: String,
    name: String,
    category: Option<String>,
    status: String,
    fail_message: Option<String>,
    storage: Option<String>,
}
