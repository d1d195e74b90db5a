use {
    crate::{
        Body, Context,
        error::{ServeError, internal},
    },
    bytes::Bytes,
    cadd::ops::{Cadd, Csub},
    filecrypt_protocol::{FileId, Token, util::maybe_block_in_place},
    filecrypt_sdk::crypto::{DEFAULT_CHUNK_SIZE, recover},
    futures::StreamExt,
    http_body_util::{BodyExt, StreamBody},
    hyper::{
        HeaderMap, Response, StatusCode,
        body::Frame,
        header::{
            ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
            RANGE,
        },
    },
    percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode},
    regex::Regex,
    std::{io, sync::LazyLock},
    tokio::{sync::mpsc, task::spawn_blocking},
    tokio_stream::wrappers::ReceiverStream,
    tracing::{Span, debug, instrument, warn},
};

/// Decrypted chunks waiting to be sent to the client.
const CHANNEL_CAPACITY: usize = 4;

/// Characters allowed unescaped in an RFC 5987 `ext-value`.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

static RANGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^bytes=([0-9]+)-([0-9]*)$").expect("valid regex"));

/// Part of the file to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteRange {
    Full,
    /// Inclusive bounds.
    Partial { start: u64, end: u64 },
}

/// Interprets the `Range` header against a payload of `size` bytes.
///
/// Values that don't look like `bytes=<start>-[<end>]` are ignored.
pub(crate) fn parse_range(header: Option<&str>, size: u64) -> Result<ByteRange, ServeError> {
    let Some(captures) = header.and_then(|header| RANGE_REGEX.captures(header)) else {
        return Ok(ByteRange::Full);
    };
    let unsatisfiable = ServeError::RangeNotSatisfiable { size: Some(size) };
    let start: u64 = captures[1].parse().map_err(|_| unsatisfiable)?;
    let end = if captures[2].is_empty() {
        let end = size.checked_sub(1).ok_or(unsatisfiable)?;
        if start > end {
            return Err(unsatisfiable);
        }
        end
    } else {
        let end: u64 = captures[2].parse().map_err(|_| unsatisfiable)?;
        if end >= size || start >= end {
            return Err(unsatisfiable);
        }
        end
    };
    Ok(ByteRange::Partial { start, end })
}

fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(filename, ATTR_CHAR)
    )
}

/// `GET /{file_id}/{token}/{filename}`
#[instrument(skip_all, fields(%file_id))]
pub(crate) async fn download(
    ctx: &Context,
    headers: &HeaderMap,
    file_id: &str,
    token: &str,
    filename: &str,
) -> Result<Response<Body>, ServeError> {
    let file_id: FileId = file_id.parse().map_err(|err| {
        warn!(?err, "invalid file id");
        ServeError::MalformedIdentifier
    })?;
    let token: Token = token.parse().map_err(|err| {
        warn!(?err, "invalid token");
        ServeError::MalformedIdentifier
    })?;
    if filename.is_empty() {
        warn!("empty filename");
        return Err(ServeError::MalformedIdentifier);
    }

    let file = maybe_block_in_place(|| ctx.storage.open(&file_id)).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            debug!("file not found");
        } else {
            warn!(%err, "failed to open encrypted file");
        }
        ServeError::AuthenticationFailure
    })?;
    let key = recover(file.header(), &token, filename).map_err(|err| {
        warn!(%err, "rejected download");
        ServeError::AuthenticationFailure
    })?;

    let size = file.payload_size();
    let range = parse_range(
        headers.get(RANGE).and_then(|value| value.to_str().ok()),
        size,
    )?;
    let (status, seek, end, len) = match range {
        ByteRange::Full => (StatusCode::OK, 0, None, size),
        ByteRange::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            start,
            Some(end),
            end.csub(start)
                .and_then(|len| len.cadd(1_u64))
                .map_err(internal)?,
        ),
    };
    let chunks = maybe_block_in_place(|| file.decrypt(&key, seek, end, DEFAULT_CHUNK_SIZE))
        .map_err(internal)?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let span = Span::current();
    spawn_blocking(move || {
        let _entered = span.enter();
        send_chunks(chunks, &tx);
    });

    let mut builder = Response::builder()
        .status(status)
        .header(ACCEPT_RANGES, "bytes")
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_DISPOSITION, content_disposition(filename))
        .header(CONTENT_LENGTH, len);
    if let ByteRange::Partial { start, end } = range {
        builder = builder.header(CONTENT_RANGE, format!("bytes {start}-{end}/{size}"));
    }
    builder
        .body(BodyExt::boxed(StreamBody::new(
            ReceiverStream::new(rx).map(|bytes| Ok(Frame::data(bytes))),
        )))
        .map_err(internal)
}

/// Feeds decrypted chunks to the response body until the input ends, fails,
/// or the receiving side is dropped.
fn send_chunks(chunks: impl IntoIterator<Item = io::Result<Vec<u8>>>, tx: &mpsc::Sender<Bytes>) {
    for chunk in chunks {
        match chunk {
            Ok(chunk) => {
                if tx.blocking_send(Bytes::from(chunk)).is_err() {
                    debug!("client went away, download stopped");
                    break;
                }
            }
            Err(err) => {
                warn!(%err, "failed to read encrypted file");
                break;
            }
        }
    }
}
