use {
    super::{Client, RequestError, RetryPolicy, ok_or_retry, upload_timeout},
    crate::crypto::read_chunk,
    anyhow::{Context as _, Result, ensure},
    bytes::Bytes,
    cadd::{ops::Cadd, prelude::IntoType},
    filecrypt_protocol::{
        ChunkHash, ContentRange, FileId, UploadKey, mac::upload_mac,
        util::maybe_block_in_place,
    },
    fs_err::File,
    reqwest::{StatusCode, header::CONTENT_RANGE},
    std::{path::Path, time::Duration},
    tracing::{debug, info, instrument, warn},
    url::Url,
};

/// Default size of a single upload request body.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Size of the body of every request except possibly the last one.
    pub chunk_size: usize,
    /// Number of attempts per chunk. `None` retries transport failures forever.
    pub max_retries: Option<usize>,
    /// Delay between attempts to send a chunk.
    pub retry_delay: Duration,
}

impl Default for UploadOptions {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            max_retries: None,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl UploadOptions {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            delay: self.retry_delay,
        }
    }
}

impl Client {
    /// Uploads an encrypted file in chunks and removes the local copy afterwards.
    ///
    /// Each chunk is signed with `key`. Transport failures are retried with the same
    /// chunk; any other failure aborts the upload and leaves the local file in place.
    /// `progress` is called with the size of every accepted chunk.
    #[instrument(skip_all, fields(%file_id))]
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        file_id: &FileId,
        key: &UploadKey,
        options: &UploadOptions,
        progress: impl FnMut(u64),
    ) -> Result<()> {
        let path = path.as_ref();
        self.upload_chunks(path, file_id, key, options, progress)
            .await
            .inspect_err(|err| {
                warn!(?path, ?err, "upload failed, encrypted file is kept");
            })?;
        maybe_block_in_place(|| fs_err::remove_file(path))?;
        info!(?path, "upload complete, local copy removed");
        Ok(())
    }

    async fn upload_chunks(
        &self,
        path: &Path,
        file_id: &FileId,
        key: &UploadKey,
        options: &UploadOptions,
        mut progress: impl FnMut(u64),
    ) -> Result<()> {
        ensure!(options.chunk_size > 0, "upload chunk size must be positive");
        let mut file = maybe_block_in_place(|| File::open(path))?;
        let total = file.metadata()?.len();
        let key_id = key.key_id();
        let policy = options.retry_policy();

        let mut position = 0_u64;
        loop {
            let chunk = maybe_block_in_place(|| read_chunk(&mut file, options.chunk_size))?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len().try_into_type::<u64>()?;
            let range = ContentRange::for_chunk(position, len, total)?;
            let range_header = range.to_string();
            let hash = ChunkHash::of(&chunk);
            let mac = upload_mac(key, file_id, &hash, Some(&range_header));
            let url = self.upload_url(&key_id, file_id, &mac, &hash)?;
            let chunk = Bytes::from(chunk);

            let mut attempts = 0_usize;
            let status = ok_or_retry(policy, || {
                attempts = attempts.saturating_add(1);
                self.post_chunk(url.clone(), chunk.clone(), &range_header)
            })
            .await
            .with_context(|| format!("failed to upload {range_header}"))?;

            ensure!(
                status != StatusCode::CONFLICT || attempts > 1,
                "file {file_id} already exists on the server"
            );
            ensure!(
                chunk_accepted(status, range.is_last(), attempts > 1),
                "unexpected status {status} for {range_header}"
            );
            debug!(%range, %status, "chunk accepted");
            position = position.cadd(len)?;
            progress(len);
        }
        ensure!(
            position == total,
            "file size changed during upload; expected {total}, read {position}"
        );
        Ok(())
    }

    async fn post_chunk(
        &self,
        url: Url,
        chunk: Bytes,
        content_range: &str,
    ) -> Result<StatusCode, RequestError> {
        let timeout = upload_timeout(chunk.len().saturating_into_type::<u64>());
        let response = self
            .reqwest
            .post(url)
            .header(CONTENT_RANGE, content_range)
            .body(chunk)
            .timeout(timeout)
            .send()
            .await
            .map_err(RequestError::transport)?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(status);
        }
        response
            .error_for_status()
            .map_err(RequestError::application)?;
        Ok(status)
    }
}

/// Every chunk but the last is answered with 206 and the last one with 200.
/// When the last chunk was sent more than once, an earlier attempt may have completed
/// the upload before its response got lost, so 409 means success too.
fn chunk_accepted(status: StatusCode, is_last: bool, retried: bool) -> bool {
    match (is_last, status) {
        (false, StatusCode::PARTIAL_CONTENT) | (true, StatusCode::OK) => true,
        (true, StatusCode::CONFLICT) => retried,
        _ => false,
    }
}
