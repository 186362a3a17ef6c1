//! Single-item downloader
//!
//! One authenticated GET per call, streamed to local storage in fixed-size
//! chunks. A failed call never leaves a partial content file behind.

use crate::credentials::ServerCredentials;
use crate::error::{OfflineError, Result};
use crate::layout::{path_to_string, remove_if_present, StorageLayout};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest, HttpStreamResponse};
use bridge_traits::storage::FileSystemAccess;
use core_library::models::{AudioQuality, CachedAsset, MediaItem};
use core_runtime::config::{DownloadLimits, ServerConfig};
use core_runtime::logging::strip_path;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const AUTHORIZATION_HEADER: &str = "X-Emby-Authorization";
const TOKEN_HEADER: &str = "X-Emby-Token";
const FALLBACK_FORMAT: &str = "bin";

/// Receives transfer progress after every chunk
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    /// `fraction` is 0.0 when the total size is unknown
    async fn on_progress(&self, fraction: f64, bytes_downloaded: u64, total_bytes: Option<u64>);
}

/// Result of a successful content transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedAsset {
    pub path: PathBuf,
    pub bytes: u64,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArt {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Transfers bytes for one asset
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream the audio content of `content_id` to local storage
    ///
    /// # Errors
    /// - `NonSuccessStatus`, `ContentTypeMismatch`, `SizeMismatch`,
    ///   `NetworkFailure`, `Storage` for typed transfer failures
    /// - `Cancelled` when `cancel` fires between chunks
    async fn download_asset(
        &self,
        content_id: &str,
        quality: AudioQuality,
        credentials: &ServerCredentials,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<DownloadedAsset>;

    /// Best-effort cover art fetch; every failure yields `None`
    async fn download_art(
        &self,
        content_id: &str,
        image_tag: Option<&str>,
        credentials: &ServerCredentials,
    ) -> Option<DownloadedArt>;
}

/// Downloader talking to the media server over the host HTTP client
pub struct HttpDownloader {
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    server: ServerConfig,
    layout: StorageLayout,
    chunk_size: usize,
    connect_timeout: Duration,
    content_timeout: Duration,
    image_timeout: Duration,
}

impl HttpDownloader {
    pub fn new(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        server: ServerConfig,
        layout: StorageLayout,
        limits: &DownloadLimits,
    ) -> Self {
        Self {
            http,
            fs,
            server,
            layout,
            chunk_size: limits.chunk_size.max(1),
            connect_timeout: limits.connect_timeout,
            content_timeout: limits.content_timeout,
            image_timeout: limits.image_timeout,
        }
    }

    fn authorized(&self, request: HttpRequest, credentials: &ServerCredentials) -> HttpRequest {
        request
            .header(AUTHORIZATION_HEADER, self.server.identity.authorization_header())
            .header(TOKEN_HEADER, credentials.access_token.clone())
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse> {
        match timeout(self.connect_timeout, self.http.execute_stream(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(OfflineError::NetworkFailure(e.to_string())),
            Err(_) => Err(OfflineError::NetworkFailure(format!(
                "no response within {}s",
                self.connect_timeout.as_secs()
            ))),
        }
    }

    /// Copy `body` into `path` chunk by chunk
    async fn transfer(
        &self,
        mut body: Box<dyn AsyncRead + Send + Unpin>,
        path: &Path,
        declared: Option<u64>,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut writer = self
            .fs
            .open_write_stream(path)
            .await
            .map_err(|e| OfflineError::Storage(format!("{}: {}", path.display(), e)))?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(OfflineError::Cancelled);
            }

            let read = timeout(self.content_timeout, body.read(&mut buffer))
                .await
                .map_err(|_| OfflineError::NetworkFailure("read timed out".to_string()))?
                .map_err(|e| OfflineError::NetworkFailure(e.to_string()))?;
            if read == 0 {
                break;
            }

            write_chunk(&mut writer, &buffer[..read], self.content_timeout).await?;
            written += read as u64;

            let fraction = match declared {
                Some(0) => 1.0,
                Some(total) => (written as f64 / total as f64).min(1.0),
                None => 0.0,
            };
            progress.on_progress(fraction, written, declared).await;
        }

        timeout(self.content_timeout, writer.shutdown())
            .await
            .map_err(|_| OfflineError::Storage("flush timed out".to_string()))?
            .map_err(|e| OfflineError::Storage(e.to_string()))?;

        if let Some(expected) = declared {
            if expected != written {
                return Err(OfflineError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }

        Ok(written)
    }
}

async fn write_chunk(
    writer: &mut Box<dyn AsyncWrite + Send + Unpin>,
    chunk: &[u8],
    limit: Duration,
) -> Result<()> {
    timeout(limit, writer.write_all(chunk))
        .await
        .map_err(|_| OfflineError::Storage("write timed out".to_string()))?
        .map_err(|e| OfflineError::Storage(e.to_string()))
}

#[async_trait]
impl Downloader for HttpDownloader {
    #[instrument(skip(self, credentials, progress, cancel))]
    async fn download_asset(
        &self,
        content_id: &str,
        quality: AudioQuality,
        credentials: &ServerCredentials,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<DownloadedAsset> {
        let url = stream_url(&self.server.base_url, content_id, quality);
        let request = self.authorized(HttpRequest::get(url), credentials);

        let response = self.open_stream(request).await?;
        if !response.is_success() {
            return Err(OfflineError::NonSuccessStatus {
                status: response.status,
            });
        }

        let content_type = response.content_type().map(str::to_string);
        if !is_acceptable_content_type(content_type.as_deref()) {
            return Err(OfflineError::ContentTypeMismatch {
                content_type: content_type.unwrap_or_default(),
            });
        }

        let format = content_type
            .as_deref()
            .and_then(format_for_content_type)
            .or_else(|| quality.container())
            .unwrap_or(FALLBACK_FORMAT)
            .to_string();
        let declared = response.content_length();
        let path = self.layout.content_path(content_id, &format);

        let file = path_to_string(&path);
        debug!(file = %strip_path(&file), declared = ?declared, "Streaming content");

        match self
            .transfer(response.body, &path, declared, progress, cancel)
            .await
        {
            Ok(bytes) => {
                info!(bytes, format = %format, "Content downloaded");
                Ok(DownloadedAsset {
                    path,
                    bytes,
                    format,
                })
            }
            Err(e) => {
                if let Err(cleanup) = remove_if_present(self.fs.as_ref(), &path).await {
                    warn!(error = %cleanup, file = %strip_path(&file), "Failed to remove partial file");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self, credentials))]
    async fn download_art(
        &self,
        content_id: &str,
        image_tag: Option<&str>,
        credentials: &ServerCredentials,
    ) -> Option<DownloadedArt> {
        let url = art_url(&self.server.base_url, content_id, image_tag);
        let request = self
            .authorized(HttpRequest::get(url), credentials)
            .timeout(self.image_timeout);

        let response = match timeout(self.image_timeout, self.http.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(error = %e, "Art request failed");
                return None;
            }
            Err(_) => {
                debug!("Art request timed out");
                return None;
            }
        };

        if !response.is_success() || response.body.is_empty() {
            debug!(status = response.status, "No art available");
            return None;
        }
        if let Some(content_type) = response.content_type() {
            if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
                debug!(content_type = %content_type, "Art response is not an image");
                return None;
            }
        }

        let path = self.layout.art_path(content_id);
        let bytes = response.body.len() as u64;
        let write = self.fs.write_file(&path, response.body);
        match timeout(self.image_timeout, write).await {
            Ok(Ok(())) => Some(DownloadedArt { path, bytes }),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to store art");
                remove_if_present(self.fs.as_ref(), &path).await.ok();
                None
            }
            Err(_) => {
                warn!("Storing art timed out");
                remove_if_present(self.fs.as_ref(), &path).await.ok();
                None
            }
        }
    }
}

/// Streaming URL for a quality tier
pub fn stream_url(base_url: &str, content_id: &str, quality: AudioQuality) -> String {
    let id = urlencoding::encode(content_id);
    match (quality.max_bitrate_kbps(), quality.container()) {
        (Some(kbps), Some(container)) => format!(
            "{}/Audio/{}/stream?maxStreamingBitrate={}&container={}&audioCodec={}",
            base_url,
            id,
            kbps * 1000,
            container,
            container
        ),
        _ => format!("{}/Audio/{}/stream?static=true", base_url, id),
    }
}

pub fn art_url(base_url: &str, content_id: &str, image_tag: Option<&str>) -> String {
    let mut url = format!(
        "{}/Items/{}/Images/Primary",
        base_url,
        urlencoding::encode(content_id)
    );
    if let Some(tag) = image_tag {
        url.push_str(&format!("?tag={}", urlencoding::encode(tag)));
    }
    url
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Audio-like or a generic binary stream; servers that omit the header pass
pub fn is_acceptable_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(value) => {
            let media = media_type(value);
            media.starts_with("audio/") || media == "application/octet-stream"
        }
    }
}

/// File extension for a known audio media type
pub fn format_for_content_type(content_type: &str) -> Option<&'static str> {
    let format = match media_type(content_type).as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/ogg" | "audio/vorbis" => "ogg",
        "audio/opus" => "opus",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" => "webm",
        _ => return None,
    };
    Some(format)
}

/// Metadata row for a freshly downloaded item
pub fn build_cached_asset(
    item: &MediaItem,
    quality: AudioQuality,
    content: &DownloadedAsset,
    art: Option<&DownloadedArt>,
    now: i64,
) -> CachedAsset {
    CachedAsset {
        id: item.content_id.clone(),
        title: item.title.clone(),
        artist: item.artist.clone(),
        album: item.album.clone(),
        duration_ms: item.duration_ms,
        quality,
        content_path: path_to_string(&content.path),
        art_path: art.map(|a| path_to_string(&a.path)),
        downloaded_at: now,
        content_bytes: content.bytes,
        art_bytes: art.map(|a| a.bytes).unwrap_or(0),
        last_access_at: now,
        bitrate: quality.max_bitrate_kbps(),
        format: content.format.clone(),
        album_id: item.album_id.clone(),
        artist_id: item.artist_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpResponse;
    use bytes::Bytes;
    use core_runtime::config::ClientIdentity;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    struct Reply {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    }

    #[derive(Default)]
    struct FakeHttp {
        reply: Mutex<Option<Reply>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeHttp {
        fn replying(reply: Reply) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn take(&self, request: HttpRequest) -> BridgeResult<Reply> {
            self.requests.lock().unwrap().push(request);
            self.reply
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| BridgeError::OperationFailed("connection refused".into()))
        }
    }

    fn headers(reply: &Reply) -> HashMap<String, String> {
        reply
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[async_trait]
    impl HttpClient for FakeHttp {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            let reply = self.take(request)?;
            Ok(HttpResponse {
                status: reply.status,
                headers: headers(&reply),
                body: Bytes::from(reply.body),
            })
        }

        async fn execute_stream(&self, request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
            let reply = self.take(request)?;
            Ok(HttpStreamResponse {
                status: reply.status,
                headers: headers(&reply),
                body: Box::new(std::io::Cursor::new(reply.body.clone())),
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(f64, u64)>>,
    }

    #[async_trait]
    impl ProgressObserver for Recorder {
        async fn on_progress(&self, fraction: f64, bytes: u64, _total: Option<u64>) {
            self.calls.lock().unwrap().push((fraction, bytes));
        }
    }

    fn audio(body: Vec<u8>, declared: Option<usize>) -> Reply {
        let mut headers = vec![("Content-Type", "audio/flac".to_string())];
        if let Some(len) = declared {
            headers.push(("Content-Length", len.to_string()));
        }
        Reply {
            status: 200,
            headers,
            body,
        }
    }

    fn setup(http: FakeHttp) -> (tempfile::TempDir, Arc<FakeHttp>, HttpDownloader) {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(TokioFileSystem::with_directories(
            dir.path().join("cache"),
            dir.path().join("data"),
        ));
        let http = Arc::new(http);
        let server = ServerConfig::new(
            "https://media.example.com/",
            ClientIdentity::new("Offline", "Desktop", "dev-1", "1.0.0"),
        );
        let layout = StorageLayout::new(dir.path().join("data/offline"));
        let limits = DownloadLimits {
            chunk_size: 4,
            ..DownloadLimits::default()
        };
        let downloader = HttpDownloader::new(http.clone(), fs, server, layout, &limits);
        (dir, http, downloader)
    }

    fn creds() -> ServerCredentials {
        ServerCredentials::new("tok")
    }

    #[test]
    fn test_stream_urls() {
        assert_eq!(
            stream_url("https://m", "a b", AudioQuality::Original),
            "https://m/Audio/a%20b/stream?static=true"
        );
        assert_eq!(
            stream_url("https://m", "id", AudioQuality::Medium),
            "https://m/Audio/id/stream?maxStreamingBitrate=192000&container=mp3&audioCodec=mp3"
        );
        assert_eq!(
            art_url("https://m", "id", Some("t1")),
            "https://m/Items/id/Images/Primary?tag=t1"
        );
        assert_eq!(art_url("https://m", "id", None), "https://m/Items/id/Images/Primary");
    }

    #[test]
    fn test_content_type_rules() {
        assert!(is_acceptable_content_type(None));
        assert!(is_acceptable_content_type(Some("audio/mpeg")));
        assert!(is_acceptable_content_type(Some("Audio/FLAC; charset=binary")));
        assert!(is_acceptable_content_type(Some("application/octet-stream")));
        assert!(!is_acceptable_content_type(Some("text/html")));
        assert!(!is_acceptable_content_type(Some("application/json")));

        assert_eq!(format_for_content_type("audio/mpeg"), Some("mp3"));
        assert_eq!(format_for_content_type("audio/x-m4a"), Some("m4a"));
        assert_eq!(format_for_content_type("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn test_download_writes_file_and_reports_progress() {
        let body = b"0123456789".to_vec();
        let (_dir, http, downloader) = setup(FakeHttp::replying(audio(body.clone(), Some(10))));
        let recorder = Recorder::default();

        let asset = downloader
            .download_asset("song-1", AudioQuality::Original, &creds(), &recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(asset.bytes, 10);
        assert_eq!(asset.format, "flac");
        assert!(asset.path.ends_with("offline/content/song-1.flac"));
        assert_eq!(tokio::fs::read(&asset.path).await.unwrap(), body);

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls.iter().map(|c| c.1).collect::<Vec<_>>(), vec![4, 8, 10]);
        assert_eq!(calls.last().unwrap().0, 1.0);

        let request = http.requests.lock().unwrap()[0].clone();
        assert_eq!(request.url, "https://media.example.com/Audio/song-1/stream?static=true");
        assert_eq!(request.headers.get(TOKEN_HEADER).map(String::as_str), Some("tok"));
        assert!(request.headers[AUTHORIZATION_HEADER].contains("DeviceId=\"dev-1\""));
    }

    #[tokio::test]
    async fn test_size_mismatch_removes_partial_file() {
        let (dir, _http, downloader) = setup(FakeHttp::replying(audio(vec![1; 6], Some(10))));

        let err = downloader
            .download_asset("song-1", AudioQuality::Original, &creds(), &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OfflineError::SizeMismatch { expected: 10, actual: 6 }));
        assert!(!dir.path().join("data/offline/content/song-1.flac").exists());
    }

    #[tokio::test]
    async fn test_rejects_status_and_content_type() {
        let (_dir, _http, downloader) = setup(FakeHttp::replying(Reply {
            status: 404,
            headers: vec![],
            body: vec![],
        }));
        let err = downloader
            .download_asset("x", AudioQuality::High, &creds(), &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::NonSuccessStatus { status: 404 }));

        let (_dir, _http, downloader) = setup(FakeHttp::replying(Reply {
            status: 200,
            headers: vec![("Content-Type", "text/html".to_string())],
            body: b"<html>".to_vec(),
        }));
        let err = downloader
            .download_asset("x", AudioQuality::High, &creds(), &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::ContentTypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unknown_length_falls_back_to_quality_container() {
        let reply = Reply {
            status: 200,
            headers: vec![("Content-Type", "application/octet-stream".to_string())],
            body: vec![7; 5],
        };
        let (_dir, _http, downloader) = setup(FakeHttp::replying(reply));

        let asset = downloader
            .download_asset("s", AudioQuality::Low, &creds(), &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(asset.format, "mp3");
        assert_eq!(asset.bytes, 5);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let (dir, _http, downloader) = setup(FakeHttp::replying(audio(vec![1; 8], Some(8))));
        let token = CancellationToken::new();
        token.cancel();

        let err = downloader
            .download_asset("song-1", AudioQuality::Original, &creds(), &Recorder::default(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::Cancelled));
        assert!(!dir.path().join("data/offline/content/song-1.flac").exists());
    }

    #[tokio::test]
    async fn test_network_error_is_typed() {
        let (_dir, _http, downloader) = setup(FakeHttp::default());
        let err = downloader
            .download_asset("s", AudioQuality::Original, &creds(), &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_art_is_best_effort() {
        let (_dir, _http, downloader) = setup(FakeHttp::replying(Reply {
            status: 200,
            headers: vec![("Content-Type", "image/jpeg".to_string())],
            body: vec![9; 32],
        }));
        let art = downloader.download_art("song-1", Some("abc"), &creds()).await.unwrap();
        assert_eq!(art.bytes, 32);
        assert!(art.path.ends_with("offline/art/song-1.jpg"));

        let (_dir, _http, downloader) = setup(FakeHttp::replying(Reply {
            status: 500,
            headers: vec![],
            body: vec![],
        }));
        assert!(downloader.download_art("song-1", None, &creds()).await.is_none());

        let (_dir, _http, downloader) = setup(FakeHttp::default());
        assert!(downloader.download_art("song-1", None, &creds()).await.is_none());
    }

    #[test]
    fn test_build_cached_asset() {
        let item = MediaItem::new("s1", "Title", "Artist").with_album("Album", Some("al-1".into()));
        let content = DownloadedAsset {
            path: PathBuf::from("/c/s1.mp3"),
            bytes: 100,
            format: "mp3".into(),
        };
        let art = DownloadedArt {
            path: PathBuf::from("/a/s1.jpg"),
            bytes: 10,
        };

        let asset = build_cached_asset(&item, AudioQuality::High, &content, Some(&art), 42);
        assert_eq!(asset.total_bytes(), 110);
        assert_eq!(asset.bitrate, Some(320));
        assert_eq!(asset.last_access_at, 42);
        assert_eq!(asset.art_path.as_deref(), Some("/a/s1.jpg"));
        assert_eq!(asset.album_id.as_deref(), Some("al-1"));
    }
}
