mod upload;

use {
    anyhow::{Error, Result, format_err},
    filecrypt_protocol::{ChunkHash, FileId, KeyId, Mac},
    std::{future::Future, time::Duration},
    tokio::time::sleep,
    tracing::warn,
    url::Url,
};

pub use upload::{DEFAULT_UPLOAD_CHUNK_SIZE, UploadOptions};

/// Reuse created client or clone it in order to reuse a connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    reqwest: reqwest::Client,
    base_url: Url,
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[must_use]
#[inline]
pub fn upload_timeout(upload_size: u64) -> Duration {
    // Assuming upload speed above 1 MB/s.
    DEFAULT_TIMEOUT.saturating_add(Duration::from_micros(upload_size))
}

impl Client {
    /// `base_url` is the server root that download links and upload requests are relative to.
    #[inline]
    pub fn new(base_url: Url) -> Result<Self> {
        Ok(Self {
            base_url,
            reqwest: reqwest::Client::builder()
                .connect_timeout(DEFAULT_TIMEOUT)
                .build()?,
        })
    }

    #[must_use]
    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_with_segments<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| format_err!("base URL cannot have path segments: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `{base_url}/{file_id}/{token}/{filename}`
    #[inline]
    pub fn download_url(&self, file_id: &FileId, token: &str, filename: &str) -> Result<Url> {
        self.url_with_segments([file_id.as_str(), token, filename])
    }

    fn upload_url(
        &self,
        key_id: &KeyId,
        file_id: &FileId,
        mac: &Mac,
        chunk_hash: &ChunkHash,
    ) -> Result<Url> {
        self.url_with_segments([
            key_id.to_string().as_str(),
            file_id.as_str(),
            mac.to_string().as_str(),
            chunk_hash.to_string().as_str(),
        ])
    }
}

/// Retry policy for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of attempts before giving up. `None` retries forever.
    pub max_attempts: Option<usize>,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

/// Retries the request if an error arises due to the transport.
async fn ok_or_retry<T, F, Fut>(policy: RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 0_usize;
    loop {
        attempt = attempt.saturating_add(1);
        let transport_err = match f().await {
            Ok(x) => break Ok(x),
            Err(RequestError::Application(err)) => break Err(err),
            Err(RequestError::Transport(err)) => err,
        };
        if policy
            .max_attempts
            .is_some_and(|max_attempts| attempt >= max_attempts)
        {
            break Err(transport_err.context(format!("giving up after {attempt} attempts")));
        }
        warn!(error = %transport_err, attempt, "transport failed, will retry");
        sleep(policy.delay).await;
    }
}

enum RequestError {
    Transport(Error),
    Application(Error),
}

impl RequestError {
    fn application(err: impl Into<Error>) -> Self {
        Self::Application(err.into())
    }

    fn transport(err: impl Into<Error>) -> Self {
        Self::Transport(err.into())
    }
}

impl From<RequestError> for Error {
    #[inline]
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Transport(err) | RequestError::Application(err) => err,
        }
    }
}
