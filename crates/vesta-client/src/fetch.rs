//! Resource download.
//!
//! The crawl pool only talks to the network through [`ResourceFetcher`], so
//! it can be driven by [`HttpFetcher`] in production and by an in-memory
//! fake in tests.

use std::ffi::OsString;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use vesta_core::config::HttpConfig;
use vesta_core::error::AppError;

/// Downloads one resource to a local file.
pub trait ResourceFetcher: Send + Sync + 'static {
    /// Fetches `url` into `destination`, returning the number of bytes
    /// written.
    ///
    /// On error `destination` must not exist afterwards unless it existed
    /// before: a file at the destination is always a complete download.
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Streaming HTTP implementation of [`ResourceFetcher`].
///
/// The body is written to `<destination>.part` chunk by chunk and renamed
/// into place once the stream has completed. A destination whose name ends
/// in `.gz` is gzip-compressed on the fly.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use vesta_client::{HttpFetcher, ResourceFetcher};
/// use vesta_core::HttpConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = HttpFetcher::new(&HttpConfig::default())?;
/// let bytes = fetcher
///     .fetch(
///         "https://data.example.org/api/views/abcd-1234/rows.tsv?accessType=DOWNLOAD",
///         Path::new("/srv/archive/data.example.org/20240101/tsv/abcd-1234.tsv.gz"),
///     )
///     .await?;
/// println!("{} bytes", bytes);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds the fetcher's HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, AppError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn stream_to(&self, url: &str, part: &Path, gzip: bool) -> Result<u64, AppError> {
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(parent) = part.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        // Compressed output accumulates in memory between chunks
        let mut encoder = gzip.then(|| GzEncoder::new(Vec::new(), Compression::default()));

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            match encoder.as_mut() {
                Some(encoder) => {
                    encoder.write_all(&chunk)?;
                    file.write_all(encoder.get_ref()).await?;
                    encoder.get_mut().clear();
                }
                None => file.write_all(&chunk).await?,
            }
            written += chunk.len() as u64;
        }

        if let Some(encoder) = encoder {
            file.write_all(&encoder.finish()?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
    ) -> impl Future<Output = Result<u64, AppError>> + Send {
        async move {
            let part = part_path(destination);

            match self.stream_to(url, &part, is_gzip(destination)).await {
                Ok(bytes) => {
                    fs::rename(&part, destination).await?;
                    debug!("Wrote {} bytes to {}", bytes, destination.display());
                    Ok(bytes)
                }
                Err(e) => {
                    // Best effort; the .part name is never mistaken for a download.
                    let _ = fs::remove_file(&part).await;
                    Err(e)
                }
            }
        }
    }
}

/// `<destination>.part`, in the same directory so the final rename is atomic.
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".part");
    destination.with_file_name(name)
}

/// True if `path` names a gzip file.
pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn classify(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::NetworkError(format!("Timed out: {}", e))
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {}", e))
    } else {
        AppError::ClientError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serves `response` verbatim to the first connection and returns the
    /// base URL.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn test_fetcher() -> HttpFetcher {
        HttpFetcher::with_client(Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/a/b/ds1.tsv")),
            PathBuf::from("/a/b/ds1.tsv.part")
        );
    }

    #[test]
    fn test_is_gzip() {
        assert!(is_gzip(Path::new("/a/ds1.tsv.gz")));
        assert!(!is_gzip(Path::new("/a/ds1.tsv")));
        assert!(!is_gzip(Path::new("/a/gz")));
    }

    #[test]
    fn test_new_with_default_config() {
        assert!(HttpFetcher::new(&HttpConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_writes_destination() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nConnection: close\r\n\r\na\tb\n1\t2\n3\t4\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("d1").join("20240101").join("tsv").join("ds1.tsv");

        let bytes = test_fetcher()
            .fetch(&format!("{}/api/views/ds1/rows.tsv", base), &destination)
            .await
            .unwrap();

        assert_eq!(bytes, 12);
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "a\tb\n1\t2\n3\t4\n");
        assert!(!part_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_fetch_compresses_gz_destination() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nConnection: close\r\n\r\na\tb\n1\t2\n3\t4\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("tsv").join("ds1.tsv.gz");

        let bytes = test_fetcher()
            .fetch(&format!("{}/api/views/ds1/rows.tsv", base), &destination)
            .await
            .unwrap();
        assert_eq!(bytes, 12);
        assert!(!part_path(&destination).exists());

        let mut content = String::new();
        GzDecoder::new(std::fs::File::open(&destination).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "a\tb\n1\t2\n3\t4\n");
    }

    #[tokio::test]
    async fn test_fetch_error_status_leaves_no_file() {
        let base = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("ds1.tsv");

        let err = test_fetcher()
            .fetch(&format!("{}/missing", base), &destination)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::HttpStatus { status: 404, .. }));
        assert!(!err.is_retryable());
        assert!(!destination.exists());
        assert!(!part_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_fetch_truncated_body_leaves_no_file() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\npartial",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("ds1.tsv.gz");

        let result = test_fetcher()
            .fetch(&format!("{}/rows.tsv", base), &destination)
            .await;

        assert!(result.is_err());
        assert!(!destination.exists());
        assert!(!part_path(&destination).exists());
    }
}
