use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TabulaError};

pub const DEFAULT_ACCEPT: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/svg+xml",
    "video/mp4",
    "*/*",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub key: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Uploaded {
    pub url: String,
    pub name: String,
}

/// A local file waiting to be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadFile {
    pub path: PathBuf,
    pub name: String,
    pub mime: String,
}

impl UploadFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = mime_for(&path).to_string();
        Self { path, name, mime }
    }
}

pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    Done(Uploaded),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct QueuedUpload {
    pub id: Uuid,
    pub file: UploadFile,
    /// 0..=100
    pub progress: u8,
    pub state: UploadState,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &UploadFile, path: Option<&str>) -> Result<Uploaded>;
}

pub struct UploadQueue {
    accept: Vec<String>,
    items: Vec<QueuedUpload>,
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPT.iter().map(|s| s.to_string()).collect())
    }
}

impl UploadQueue {
    pub fn new(accept: Vec<String>) -> Self {
        Self {
            accept,
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[QueuedUpload] {
        &self.items
    }

    pub fn accepts(&self, mime: &str) -> bool {
        if self.accept.iter().any(|a| a == "*/*") {
            return true;
        }
        self.accept.iter().any(|a| match a.strip_suffix("/*") {
            Some(family) => mime
                .split_once('/')
                .is_some_and(|(top, _)| top == family),
            None => a == mime,
        })
    }

    /// Queues every file. Files of a type outside the accept list are queued
    /// already failed. Returns how many were accepted.
    pub fn add_files(&mut self, files: impl IntoIterator<Item = UploadFile>) -> usize {
        let mut accepted = 0;
        for file in files {
            let state = if self.accepts(&file.mime) {
                accepted += 1;
                UploadState::Pending
            } else {
                tracing::debug!(name = %file.name, mime = %file.mime, "rejected by accept list");
                UploadState::Failed("type not allowed".into())
            };
            self.items.push(QueuedUpload {
                id: Uuid::new_v4(),
                file,
                progress: 0,
                state,
            });
        }
        accepted
    }

    pub fn remove_at(&mut self, idx: usize) -> Option<QueuedUpload> {
        (idx < self.items.len()).then(|| self.items.remove(idx))
    }

    pub fn can_upload(&self) -> bool {
        self.items.iter().any(|i| i.state == UploadState::Pending)
    }

    /// Sends pending items one at a time. A failure marks that item and moves
    /// on. `on_each` sees the index of every item that finished.
    pub async fn upload_all<F>(
        &mut self,
        uploader: &dyn Uploader,
        path: Option<&str>,
        mut on_each: F,
    ) -> (usize, usize)
    where
        F: FnMut(usize, &Uploaded) + Send,
    {
        let (mut done, mut failed) = (0, 0);
        for (i, item) in self.items.iter_mut().enumerate() {
            if item.state != UploadState::Pending {
                continue;
            }
            match uploader.upload(&item.file, path).await {
                Ok(up) => {
                    item.progress = 100;
                    on_each(i, &up);
                    item.state = UploadState::Done(up);
                    done += 1;
                }
                Err(e) => {
                    tracing::warn!(name = %item.file.name, error = %e, "upload failed");
                    item.state = UploadState::Failed(e.to_string());
                    failed += 1;
                }
            }
        }
        (done, failed)
    }
}

/// Client for the image storage service.
pub struct ImageLibrary {
    http: reqwest::Client,
    endpoint: String,
}

impl ImageLibrary {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TabulaError::Upload(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, route: &str, query: &[(&str, Option<&str>)]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}/api/{route}", self.endpoint))
            .map_err(|e| TabulaError::Config(format!("upload endpoint {:?}: {e}", self.endpoint)))?;
        let present: Vec<(&str, &str)> = query
            .iter()
            .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| (*k, v)))
            .collect();
        if !present.is_empty() {
            url.query_pairs_mut().extend_pairs(present);
        }
        Ok(url)
    }

    async fn checked(&self, what: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let res = req
            .send()
            .await
            .map_err(|e| TabulaError::Upload(format!("{what}: {e}")))?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let detail = res.text().await.unwrap_or_default();
        let detail = detail.trim();
        Err(TabulaError::Upload(if detail.is_empty() {
            format!("{what} failed: {}", status.as_u16())
        } else {
            format!("{what} failed: {} {detail}", status.as_u16())
        }))
    }

    pub async fn list_images(&self, path: Option<&str>) -> Result<Vec<Image>> {
        let url = self.url("list", &[("path", path)])?;
        let res = self.checked("list", self.http.get(url)).await?;
        res.json().await.map_err(|e| TabulaError::Upload(format!("list: {e}")))
    }

    pub async fn delete_by_key(&self, key: &str) -> Result<()> {
        let url = self.url("delete", &[("key", Some(key))])?;
        self.checked("delete", self.http.delete(url)).await?;
        Ok(())
    }

    /// Known collection paths. Any failure yields an empty list.
    pub async fn list_collections(&self) -> Vec<String> {
        let fetch = async {
            let url = self.url("collections", &[])?;
            let res = self.checked("collections", self.http.get(url)).await?;
            res.json::<Vec<String>>()
                .await
                .map_err(|e| TabulaError::Upload(e.to_string()))
        };
        match fetch.await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "collections unavailable");
                Vec::new()
            }
        }
    }

    pub async fn create_collection(&self, path: &str) -> Result<()> {
        let url = self.url("collections", &[])?;
        let body = serde_json::json!({ "path": path });
        self.checked("create collection", self.http.post(url).json(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Uploader for ImageLibrary {
    async fn upload(&self, file: &UploadFile, path: Option<&str>) -> Result<Uploaded> {
        let bytes = tokio::fs::read(&file.path).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(|e| TabulaError::Upload(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = self.url("upload", &[("path", path)])?;
        let res = self.checked("upload", self.http.post(url).multipart(form)).await?;
        res.json()
            .await
            .map_err(|e| TabulaError::Upload(format!("upload response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn file(name: &str) -> UploadFile {
        UploadFile::from_path(format!("/tmp/{name}"))
    }

    fn strict() -> UploadQueue {
        UploadQueue::new(vec!["image/*".into(), "video/mp4".into()])
    }

    #[test]
    fn accept_list_matching() {
        let q = strict();
        assert!(q.accepts("image/webp"));
        assert!(q.accepts("video/mp4"));
        assert!(!q.accepts("video/webm"));
        assert!(!q.accepts("imagex/png"));
        assert!(UploadQueue::default().accepts("application/pdf"));
    }

    #[test]
    fn rejected_files_are_queued_as_failed() {
        let mut q = strict();
        let n = q.add_files([file("a.png"), file("notes.pdf")]);
        assert_eq!(n, 1);
        assert_eq!(q.items().len(), 2);
        assert_eq!(q.items()[1].state, UploadState::Failed("type not allowed".into()));
        assert!(q.can_upload());
        q.remove_at(0);
        assert!(!q.can_upload());
        assert!(q.remove_at(5).is_none());
    }

    struct FlakyUploader {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Uploader for FlakyUploader {
        async fn upload(&self, file: &UploadFile, path: Option<&str>) -> Result<Uploaded> {
            self.seen.lock().unwrap().push(file.name.clone());
            if file.name.starts_with("bad") {
                return Err(TabulaError::Upload("upload failed: 500".into()));
            }
            Ok(Uploaded {
                url: format!("http://cdn.test/{}/{}", path.unwrap_or(""), file.name),
                name: file.name.clone(),
            })
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_queue() {
        let mut q = strict();
        q.add_files([file("a.png"), file("bad.jpg"), file("c.gif"), file("x.txt")]);
        let up = FlakyUploader {
            seen: Mutex::new(Vec::new()),
        };
        let mut finished = Vec::new();
        let (done, failed) = q
            .upload_all(&up, Some("banners"), |i, _| finished.push(i))
            .await;

        assert_eq!((done, failed), (2, 1));
        assert_eq!(finished, vec![0, 2]);
        assert_eq!(*up.seen.lock().unwrap(), vec!["a.png", "bad.jpg", "c.gif"]);
        assert_eq!(q.items()[0].progress, 100);
        assert!(matches!(&q.items()[2].state, UploadState::Done(u) if u.url == "http://cdn.test/banners/c.gif"));
        assert!(matches!(q.items()[1].state, UploadState::Failed(_)));
        assert!(!q.can_upload());
    }

    #[test]
    fn empty_query_values_are_omitted() {
        let lib = ImageLibrary::new("http://img.test/", Duration::from_secs(1)).unwrap();
        assert_eq!(lib.url("list", &[("path", None)]).unwrap().as_str(), "http://img.test/api/list");
        assert_eq!(
            lib.url("list", &[("path", Some(""))]).unwrap().as_str(),
            "http://img.test/api/list"
        );
        assert_eq!(
            lib.url("delete", &[("key", Some("a/b c.png"))]).unwrap().as_str(),
            "http://img.test/api/delete?key=a%2Fb+c.png"
        );
    }

    #[tokio::test]
    async fn unreachable_collections_degrade_to_empty() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let lib = ImageLibrary::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(2)).unwrap();
        assert!(lib.list_collections().await.is_empty());
        assert!(matches!(lib.create_collection("x").await, Err(TabulaError::Upload(_))));
    }
}
